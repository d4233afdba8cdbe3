//! GeoTIFF header access.
//!
//! Only the georeferencing tags are read; pixel data is never decoded here.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use stac_common::BoundingBox;
use tiff::decoder::Decoder;
use tiff::tags::Tag;

use crate::error::{unreadable, Result, StacError};

/// GeoKey ids (GeoTIFF 1.0, section 6.2).
mod geokey {
    pub const GEOGRAPHIC_TYPE: u32 = 2048;
    pub const PROJECTED_CS_TYPE: u32 = 3072;
    pub const USER_DEFINED: u32 = 32767;
}

/// Georeferencing of a raster file.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    pub width: u32,
    pub height: u32,
    pub epsg: u32,
    /// Affine pixel-to-model transform `[a, b, c, d, e, f]`:
    /// `x = a*col + b*row + c`, `y = d*col + e*row + f`
    pub transform: [f64; 6],
}

impl RasterInfo {
    /// Read the georeferencing tags of a GeoTIFF file.
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| unreadable(path.display(), e))?;
        let mut decoder =
            Decoder::new(BufReader::new(file)).map_err(|e| unreadable(path.display(), e))?;

        let (width, height) = decoder
            .dimensions()
            .map_err(|e| unreadable(path.display(), e))?;

        let pixel_scale = read_f64_tag(&mut decoder, Tag::ModelPixelScaleTag)?;
        let tiepoint = read_f64_tag(&mut decoder, Tag::ModelTiepointTag)?;
        let model_transform = read_f64_tag(&mut decoder, Tag::ModelTransformationTag)?;

        let transform = match (pixel_scale, tiepoint, model_transform) {
            (Some(scale), Some(tie), _) if scale.len() >= 2 && tie.len() >= 6 => {
                let (sx, sy) = (scale[0], scale[1]);
                let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
                [sx, 0.0, x - i * sx, 0.0, -sy, y + j * sy]
            }
            (_, _, Some(m)) if m.len() >= 8 => [m[0], m[1], m[3], m[4], m[5], m[7]],
            _ => {
                return Err(StacError::AssetUnreadable(format!(
                    "{} has no georeferencing tags",
                    path.display()
                )))
            }
        };

        let geokeys = decoder
            .find_tag(Tag::GeoKeyDirectoryTag)
            .map_err(|e| unreadable(path.display(), e))?
            .map(|v| v.into_u32_vec())
            .transpose()
            .map_err(|e| unreadable(path.display(), e))?
            .ok_or_else(|| {
                StacError::AssetUnreadable(format!("{} has no GeoKey directory", path.display()))
            })?;

        let epsg = epsg_from_geokeys(&geokeys).ok_or_else(|| {
            StacError::Geometry(format!("{} has no EPSG coordinate system", path.display()))
        })?;

        Ok(Self {
            width,
            height,
            epsg,
            transform,
        })
    }

    /// Native resolution `(x, y)` in CRS units per pixel.
    pub fn resolution(&self) -> (f64, f64) {
        let [a, b, _, d, e, _] = self.transform;
        (a.hypot(d), b.hypot(e))
    }

    /// Ground sample distance: x resolution rounded to one decimal.
    pub fn gsd(&self) -> f64 {
        (self.resolution().0 * 10.0).round() / 10.0
    }

    /// Map a pixel corner to native coordinates.
    pub fn pixel_to_model(&self, col: f64, row: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.transform;
        (a * col + b * row + c, d * col + e * row + f)
    }

    /// Native bounds over the four image corners.
    pub fn bounds(&self) -> BoundingBox {
        let (w, h) = (self.width as f64, self.height as f64);
        let corners: Vec<[f64; 2]> = [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)]
            .iter()
            .map(|&(col, row)| {
                let (x, y) = self.pixel_to_model(col, row);
                [x, y]
            })
            .collect();
        BoundingBox::from_points(&corners).unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0))
    }

    /// 3x3 affine matrix, row-major, as published in `proj:transform`.
    pub fn transform_matrix(&self) -> [f64; 9] {
        let [a, b, c, d, e, f] = self.transform;
        [a, b, c, d, e, f, 0.0, 0.0, 1.0]
    }
}

fn read_f64_tag<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    tag: Tag,
) -> Result<Option<Vec<f64>>> {
    decoder
        .find_tag(tag)
        .map_err(|e| unreadable("tag read", e))?
        .map(|v| v.into_f64_vec())
        .transpose()
        .map_err(|e| unreadable("tag decode", e))
}

/// EPSG code from a GeoKey directory: the projected CS when present,
/// otherwise the geographic CS.
fn epsg_from_geokeys(directory: &[u32]) -> Option<u32> {
    let header = directory.get(..4)?;
    let count = header[3] as usize;

    let mut projected = None;
    let mut geographic = None;
    for entry in directory[4..].chunks_exact(4).take(count) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        // Location 0 means the value is stored inline.
        if location != 0 || value == geokey::USER_DEFINED {
            continue;
        }
        match key {
            geokey::PROJECTED_CS_TYPE => projected = Some(value),
            geokey::GEOGRAPHIC_TYPE => geographic = Some(value),
            _ => {}
        }
    }
    projected.or(geographic)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> RasterInfo {
        RasterInfo {
            width: 6000,
            height: 7500,
            epsg: 26910,
            transform: [1.0, 0.0, 500_000.0, 0.0, -1.0, 5_105_000.0],
        }
    }

    #[test]
    fn test_bounds_and_resolution() {
        let info = info();
        assert_eq!(info.bounds().to_array(), [500_000.0, 5_097_500.0, 506_000.0, 5_105_000.0]);
        assert_eq!(info.resolution(), (1.0, 1.0));
        assert_eq!(info.gsd(), 1.0);
        assert_eq!(
            info.transform_matrix(),
            [1.0, 0.0, 500_000.0, 0.0, -1.0, 5_105_000.0, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn test_gsd_rounds_to_one_decimal() {
        let mut info = info();
        info.transform[0] = 0.5999999;
        assert_eq!(info.gsd(), 0.6);
        info.transform[0] = 1.04;
        assert_eq!(info.gsd(), 1.0);
    }

    #[test]
    fn test_epsg_from_geokeys() {
        // version header, then GTModelType=1 (projected), ProjectedCSType=26910
        let dir = [1, 1, 0, 2, 1024, 0, 1, 1, 3072, 0, 1, 26910];
        assert_eq!(epsg_from_geokeys(&dir), Some(26910));

        let geographic = [1, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4326];
        assert_eq!(epsg_from_geokeys(&geographic), Some(4326));

        let user_defined = [1, 1, 0, 1, 3072, 0, 1, 32767];
        assert_eq!(epsg_from_geokeys(&user_defined), None);
        assert_eq!(epsg_from_geokeys(&[1, 1]), None);
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let err = RasterInfo::read(Path::new("/nonexistent/tile.tif")).unwrap_err();
        assert!(matches!(err, StacError::AssetUnreadable(_)));
    }
}
