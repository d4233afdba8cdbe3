//! Common test fixtures for raster ingestion tests.

use std::fs::File;
use std::path::Path;

use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tiff::TiffResult;

/// Locators of a Washington 2015 NAIP tile and its siblings.
pub mod naip {
    pub const ACCOUNT_DOMAIN: &str = "https://naipeuwest.blob.core.windows.net";
    pub const CONTAINER: &str = "stacify";
    pub const RASTER_BLOB: &str =
        "v002/wa/2015/wa_100cm_2015/46119/m_4611962_ne_10_1_20150601.tif";
    pub const METADATA_BLOB: &str =
        "v002/wa/2015/wa_fgdc_2015/46119/m_4611962_ne_10_1_20150601.txt";
    pub const PREVIEW_BLOB: &str =
        "v002/wa/2015/wa_100cm_2015/46119/m_4611962_ne_10_1_20150601.jpg";
    pub const ITEM_ID: &str = "wa_m_4611962_ne_10_1_20150601";
    pub const GRID_CODE: &str = "DOQQ-4611962NE";

    pub fn raster_url() -> String {
        format!("{}/{}/{}", ACCOUNT_DOMAIN, CONTAINER, RASTER_BLOB)
    }

    pub fn event_payload() -> Vec<u8> {
        serde_json::json!({ "data": { "url": raster_url() } })
            .to_string()
            .into_bytes()
    }
}

/// FGDC side-metadata for the NAIP fixture tile. The calendar date differs
/// from the date embedded in the file name.
pub const FGDC_METADATA: &str = r#"Metadata:
  Identification_Information:
    Citation:
      Citation_Information:
        Originator: USDA-FSA-APFO Aerial Photography Field Office
        Publication_Date: 20151020
        Title: NAIP Digital Ortho Photo Image
    Description:
      Abstract:
        This data set contains imagery from the National
        Agriculture Imagery Program (NAIP).
    Time_Period_of_Content:
      Time_Period_Information:
        Single_Date/Time:
          Calendar_Date: 20150712
      Currentness_Reference: Ground Condition
  Distribution_Information:
    Resource_Description: m_4611962_ne_10_1_20150601.tif
    Distribution_Liability: None
"#;

/// Georeferencing of a synthetic GeoTIFF.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTiffSpec {
    pub width: u32,
    pub height: u32,
    pub epsg: u16,
    /// Upper-left corner in CRS units
    pub origin: (f64, f64),
    /// Pixel size in CRS units
    pub resolution: f64,
}

impl GeoTiffSpec {
    /// A small 1 m tile in NAD83 / UTM zone 10N.
    pub fn utm_10n() -> Self {
        Self {
            width: 64,
            height: 80,
            epsg: 26910,
            origin: (730_000.0, 5_120_000.0),
            resolution: 1.0,
        }
    }

    /// A small tile in geographic WGS 84.
    pub fn geographic() -> Self {
        Self {
            width: 40,
            height: 20,
            epsg: 4326,
            origin: (-120.0, 46.2),
            resolution: 0.005,
        }
    }

    /// GeoKey directory declaring the EPSG code.
    fn geokeys(&self) -> Vec<u16> {
        if self.epsg == 4326 || self.epsg == 4269 {
            // GTModelType = geographic, GeographicType
            vec![1, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, self.epsg]
        } else {
            // GTModelType = projected, GTRasterType = area, ProjectedCSType
            vec![1, 1, 0, 3, 1024, 0, 1, 1, 1025, 0, 1, 1, 3072, 0, 1, self.epsg]
        }
    }

    /// Write a 4-band 8-bit GeoTIFF with a gradient in the first two bands.
    pub fn write(&self, path: &Path) -> TiffResult<()> {
        let file = File::create(path)?;
        let mut tiff = TiffEncoder::new(file)?;
        let mut image = tiff.new_image::<colortype::RGBA8>(self.width, self.height)?;

        let pixel_scale = [self.resolution, self.resolution, 0.0];
        let tiepoint = [0.0, 0.0, 0.0, self.origin.0, self.origin.1, 0.0];
        let geokeys = self.geokeys();
        image
            .encoder()
            .write_tag(Tag::ModelPixelScaleTag, &pixel_scale[..])?;
        image.encoder().write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
        image
            .encoder()
            .write_tag(Tag::GeoKeyDirectoryTag, &geokeys[..])?;

        image.write_data(&rgbir_pixels(self.width, self.height))
    }
}

/// Pixel data for a 4-band image: red and green ramps, constant blue and NIR.
pub fn rgbir_pixels(width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut pixels = Vec::with_capacity(w * h * 4);
    for y in 0..h {
        for x in 0..w {
            let r = ((x as f32 / w as f32) * 255.0) as u8;
            let g = ((y as f32 / h as f32) * 255.0) as u8;
            pixels.extend_from_slice(&[r, g, 128, 255]);
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_geotiff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.tif");
        GeoTiffSpec::utm_10n().write(&path).unwrap();

        let mut decoder = tiff::decoder::Decoder::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (64, 80));
        let scale = decoder
            .get_tag_f64_vec(Tag::ModelPixelScaleTag)
            .unwrap();
        assert_eq!(scale, vec![1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_naip_locator() {
        assert!(naip::raster_url().ends_with(naip::RASTER_BLOB));
        let payload: serde_json::Value = serde_json::from_slice(&naip::event_payload()).unwrap();
        assert_eq!(payload["data"]["url"], naip::raster_url());
    }

    #[test]
    fn test_pixel_count() {
        assert_eq!(rgbir_pixels(3, 2).len(), 24);
    }
}
