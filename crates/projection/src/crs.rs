//! EPSG code dispatch and footprint reprojection.

use thiserror::Error;

use crate::transverse_mercator::{Ellipsoid, TransverseMercator};

/// Decimal places kept on reprojected coordinates (~0.1 m).
pub const COORD_PRECISION: i32 = 6;

#[derive(Debug, Error, PartialEq)]
pub enum ProjectionError {
    #[error("Unsupported CRS: EPSG:{0}")]
    UnsupportedCrs(u32),

    #[error("Non-finite coordinate ({0}, {1})")]
    NonFinite(f64, f64),
}

/// Coordinate reference systems raster tiles are delivered in.
#[derive(Debug, Clone)]
pub enum Crs {
    /// Longitude/latitude degrees (EPSG:4326, EPSG:4269).
    Geographic { epsg: u32 },
    /// Universal Transverse Mercator on WGS84 or NAD83.
    Utm {
        epsg: u32,
        zone: u8,
        south: bool,
        projection: TransverseMercator,
    },
}

impl Crs {
    /// Resolve an EPSG code.
    ///
    /// NAD83 and WGS84 are treated as coincident; the sub-meter datum shift
    /// is below the precision footprints are stored at.
    pub fn from_epsg(epsg: u32) -> Result<Self, ProjectionError> {
        match epsg {
            4326 | 4269 => Ok(Crs::Geographic { epsg }),
            32601..=32660 => Ok(Self::utm(epsg, (epsg - 32600) as u8, false, Ellipsoid::WGS84)),
            32701..=32760 => Ok(Self::utm(epsg, (epsg - 32700) as u8, true, Ellipsoid::WGS84)),
            26901..=26923 => Ok(Self::utm(epsg, (epsg - 26900) as u8, false, Ellipsoid::GRS80)),
            _ => Err(ProjectionError::UnsupportedCrs(epsg)),
        }
    }

    fn utm(epsg: u32, zone: u8, south: bool, ellipsoid: Ellipsoid) -> Self {
        Crs::Utm {
            epsg,
            zone,
            south,
            projection: TransverseMercator::utm(zone, south, ellipsoid),
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Geographic { epsg } | Crs::Utm { epsg, .. } => *epsg,
        }
    }

    /// Transform a native coordinate to geographic `(lon, lat)` degrees.
    pub fn to_geographic(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(ProjectionError::NonFinite(x, y));
        }
        Ok(match self {
            Crs::Geographic { .. } => (x, y),
            Crs::Utm { projection, .. } => projection.inverse(x, y),
        })
    }
}

/// Round a coordinate component to [`COORD_PRECISION`] decimals.
pub fn round_coord(value: f64) -> f64 {
    let scale = 10f64.powi(COORD_PRECISION);
    let rounded = (value * scale).round() / scale;
    // Avoid emitting "-0.0"
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Reproject a ring of native coordinates from `epsg` to EPSG:4326,
/// rounding every component.
pub fn reproject_ring(epsg: u32, ring: &[[f64; 2]]) -> Result<Vec<[f64; 2]>, ProjectionError> {
    let crs = Crs::from_epsg(epsg)?;
    ring.iter()
        .map(|p| {
            let (lon, lat) = crs.to_geographic(p[0], p[1])?;
            Ok([round_coord(lon), round_coord(lat)])
        })
        .collect()
}
