//! Transverse Mercator projection (ellipsoidal form).
//!
//! Used for the UTM zones aerial imagery tiles are delivered in. The series
//! expansions follow Snyder, "Map Projections: A Working Manual" (1987),
//! and are accurate to well under a centimetre within a UTM zone.

use std::f64::consts::PI;

/// Reference ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    /// Semi-major axis (meters)
    pub a: f64,
    /// Flattening
    pub f: f64,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        f: 1.0 / 298.257_223_563,
    };

    /// GRS80, the ellipsoid of NAD83.
    pub const GRS80: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        f: 1.0 / 298.257_222_101,
    };

    /// First eccentricity squared.
    pub fn e2(&self) -> f64 {
        self.f * (2.0 - self.f)
    }
}

/// Transverse Mercator projection parameters.
#[derive(Debug, Clone)]
pub struct TransverseMercator {
    pub ellipsoid: Ellipsoid,
    /// Central meridian in radians
    pub lon0: f64,
    /// Scale factor on the central meridian
    pub k0: f64,
    pub false_easting: f64,
    pub false_northing: f64,
    e2: f64,
    ep2: f64,
}

impl TransverseMercator {
    pub fn new(
        ellipsoid: Ellipsoid,
        lon0_deg: f64,
        k0: f64,
        false_easting: f64,
        false_northing: f64,
    ) -> Self {
        let e2 = ellipsoid.e2();
        Self {
            ellipsoid,
            lon0: lon0_deg.to_radians(),
            k0,
            false_easting,
            false_northing,
            e2,
            ep2: e2 / (1.0 - e2),
        }
    }

    /// UTM zone `zone` (1..=60) in the given hemisphere.
    pub fn utm(zone: u8, south: bool, ellipsoid: Ellipsoid) -> Self {
        let lon0 = -183.0 + 6.0 * zone as f64;
        let false_northing = if south { 10_000_000.0 } else { 0.0 };
        Self::new(ellipsoid, lon0, 0.9996, 500_000.0, false_northing)
    }

    /// Meridional arc length from the equator to `phi`.
    #[cfg(test)]
    fn meridian_arc(&self, phi: f64) -> f64 {
        let e2 = self.e2;
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        self.ellipsoid.a
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
    }

    /// Project geographic degrees to easting/northing in meters.
    #[cfg(test)]
    fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let phi = lat_deg.to_radians();
        let lam = lon_deg.to_radians();
        let a = self.ellipsoid.a;

        let sin_phi = phi.sin();
        let cos_phi = phi.cos();
        let tan_phi = phi.tan();

        let n = a / (1.0 - self.e2 * sin_phi * sin_phi).sqrt();
        let t = tan_phi * tan_phi;
        let c = self.ep2 * cos_phi * cos_phi;
        let aa = (lam - self.lon0) * cos_phi;
        let m = self.meridian_arc(phi);

        let x = self.k0
            * n
            * (aa
                + (1.0 - t + c) * aa.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * self.ep2) * aa.powi(5) / 120.0)
            + self.false_easting;

        let y = self.k0
            * (m + n
                * tan_phi
                * (aa * aa / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * aa.powi(4) / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * self.ep2) * aa.powi(6)
                        / 720.0))
            + self.false_northing;

        (x, y)
    }

    /// Unproject easting/northing in meters to geographic `(lon, lat)` degrees.
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let a = self.ellipsoid.a;
        let e2 = self.e2;
        let e4 = e2 * e2;
        let e6 = e4 * e2;

        let m = (y - self.false_northing) / self.k0;
        let mu = m / (a * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

        let sqrt_1me2 = (1.0 - e2).sqrt();
        let e1 = (1.0 - sqrt_1me2) / (1.0 + sqrt_1me2);

        // Footpoint latitude
        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let sin_phi1 = phi1.sin();
        let cos_phi1 = phi1.cos();
        let tan_phi1 = phi1.tan();

        let c1 = self.ep2 * cos_phi1 * cos_phi1;
        let t1 = tan_phi1 * tan_phi1;
        let denom = 1.0 - e2 * sin_phi1 * sin_phi1;
        let n1 = a / denom.sqrt();
        let r1 = a * (1.0 - e2) / denom.powf(1.5);
        let d = (x - self.false_easting) / (n1 * self.k0);

        let lat = phi1
            - (n1 * tan_phi1 / r1)
                * (d * d / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * self.ep2) * d.powi(4)
                        / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                        - 252.0 * self.ep2
                        - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);

        let lon = self.lon0
            + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
                + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * self.ep2 + 24.0 * t1 * t1)
                    * d.powi(5)
                    / 120.0)
                / cos_phi1;

        (normalize_lon(lon * 180.0 / PI), lat * 180.0 / PI)
    }
}

fn normalize_lon(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else if lon < -180.0 {
        lon + 360.0
    } else {
        lon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_central_meridian_maps_to_false_easting() {
        let proj = TransverseMercator::utm(10, false, Ellipsoid::WGS84);
        let (x, _) = proj.forward(-123.0, 46.0);
        assert!((x - 500_000.0).abs() < 1e-6, "x should be 500000, got {}", x);

        let (lon, lat) = proj.inverse(500_000.0, 0.0);
        assert!((lon + 123.0).abs() < 1e-9);
        assert!(lat.abs() < 1e-9);
    }

    #[test]
    fn test_utm_roundtrip_within_zone() {
        let proj = TransverseMercator::utm(10, false, Ellipsoid::GRS80);

        for &(lon, lat) in &[(-120.5, 46.1), (-123.0, 47.9), (-125.9, 41.2), (-121.1, 49.0)] {
            let (x, y) = proj.forward(lon, lat);
            let (lon2, lat2) = proj.inverse(x, y);
            assert!((lon - lon2).abs() < 1e-6, "lon roundtrip failed: {} vs {}", lon, lon2);
            assert!((lat - lat2).abs() < 1e-6, "lat roundtrip failed: {} vs {}", lat, lat2);
        }
    }

    #[test]
    fn test_southern_hemisphere_false_northing() {
        let proj = TransverseMercator::utm(33, true, Ellipsoid::WGS84);
        let (lon, lat) = proj.inverse(500_000.0, 10_000_000.0);
        assert!((lon - 15.0).abs() < 1e-9);
        assert!(lat.abs() < 1e-9);

        let (_, y) = proj.forward(15.0, -30.0);
        assert!(y < 10_000_000.0 && y > 6_000_000.0, "unexpected northing {}", y);
    }

    #[test]
    fn test_known_point() {
        // One degree of latitude along the central meridian is ~111.1 km near 45N.
        let proj = TransverseMercator::utm(10, false, Ellipsoid::WGS84);
        let (_, y45) = proj.forward(-123.0, 45.0);
        let (_, y46) = proj.forward(-123.0, 46.0);
        let span = (y46 - y45) / 0.9996;
        assert!((span - 111_141.0).abs() < 100.0, "meridian degree span {}", span);
    }
}
