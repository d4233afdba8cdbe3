//! Raster asset locators.
//!
//! Raster tiles are announced by URL, and everything else about them is
//! positional in that URL:
//!
//! ```text
//! https://{account}.blob.core.windows.net/{container}/{version}/{region}/{year}/{region_res_year}/{folder}/{file}
//! ```

use std::path::Path;

use crate::error::{Result, StacError};

/// Directory segments a locator must have, counting the scheme and host.
const MIN_DIR_SEGMENTS: usize = 9;

const RASTER_EXTENSIONS: &[&str] = &["tif", "tiff"];

/// A raster asset addressed by URL.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterAssetRef {
    /// The locator exactly as announced
    pub url: String,
    /// `scheme://host/container`
    pub domain: String,
    pub container: String,
    /// Object name inside the container
    pub blob_path: String,
    pub version: String,
    pub region: String,
    pub year: String,
    pub region_res_year: String,
    pub folder: String,
    pub file_name: String,
    pub stem: String,
}

impl RasterAssetRef {
    /// Parse a locator; only GeoTIFF files are accepted.
    pub fn parse(url: &str) -> Result<Self> {
        let (dir, file_name) = url
            .rsplit_once('/')
            .ok_or_else(|| StacError::MalformedInput(format!("not a locator: {}", url)))?;

        let segments: Vec<&str> = dir.split('/').collect();
        if segments.len() < MIN_DIR_SEGMENTS {
            return Err(StacError::MalformedInput(format!(
                "locator has {} directory segments, expected at least {}: {}",
                segments.len(),
                MIN_DIR_SEGMENTS,
                url
            )));
        }

        let path = Path::new(file_name);
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !RASTER_EXTENSIONS.contains(&extension.as_str()) {
            return Err(StacError::MalformedInput(format!(
                "unsupported file format, only GeoTIFF is accepted: {}",
                file_name
            )));
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name)
            .to_string();

        let domain = segments[..4].join("/");
        let blob_path = url
            .strip_prefix(&domain)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            url: url.to_string(),
            domain,
            container: segments[3].to_string(),
            blob_path,
            version: segments[4].to_string(),
            region: segments[5].to_string(),
            year: segments[6].to_string(),
            region_res_year: segments[7].to_string(),
            folder: segments[8].to_string(),
            file_name: file_name.to_string(),
            stem,
        })
    }

    /// Object name of the FGDC side-metadata in the same container.
    pub fn metadata_blob(&self, metadata_type: &str) -> String {
        format!(
            "{}/{}/{}/{}_{}_{}/{}/{}.txt",
            self.version,
            self.region,
            self.year,
            self.region,
            metadata_type,
            self.year,
            self.folder,
            self.stem
        )
    }

    /// Object name of the JPEG preview in the same container.
    pub fn preview_blob(&self, jpg_extension: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}/{}.{}",
            self.version,
            self.region,
            self.year,
            self.region_res_year,
            self.folder,
            self.stem,
            jpg_extension
        )
    }

    /// Absolute URL of an object next to this asset.
    pub fn sibling_url(&self, blob: &str) -> String {
        format!("{}/{}", self.domain, blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://naipeuwest.blob.core.windows.net/stacify/v002/wa/2015/wa_100cm_2015/46119/m_4611962_ne_10_1_20150601.tif";

    #[test]
    fn test_parse_positional_fields() {
        let asset = RasterAssetRef::parse(URL).unwrap();
        assert_eq!(asset.domain, "https://naipeuwest.blob.core.windows.net/stacify");
        assert_eq!(asset.container, "stacify");
        assert_eq!(asset.version, "v002");
        assert_eq!(asset.region, "wa");
        assert_eq!(asset.year, "2015");
        assert_eq!(asset.region_res_year, "wa_100cm_2015");
        assert_eq!(asset.folder, "46119");
        assert_eq!(asset.stem, "m_4611962_ne_10_1_20150601");
        assert_eq!(
            asset.blob_path,
            "v002/wa/2015/wa_100cm_2015/46119/m_4611962_ne_10_1_20150601.tif"
        );
    }

    #[test]
    fn test_derived_blob_names() {
        let asset = RasterAssetRef::parse(URL).unwrap();
        assert_eq!(
            asset.metadata_blob("fgdc"),
            "v002/wa/2015/wa_fgdc_2015/46119/m_4611962_ne_10_1_20150601.txt"
        );
        assert_eq!(
            asset.preview_blob("jpg"),
            "v002/wa/2015/wa_100cm_2015/46119/m_4611962_ne_10_1_20150601.jpg"
        );
        assert_eq!(
            asset.sibling_url(&asset.preview_blob("jpg")),
            "https://naipeuwest.blob.core.windows.net/stacify/v002/wa/2015/wa_100cm_2015/46119/m_4611962_ne_10_1_20150601.jpg"
        );
    }

    #[test]
    fn test_too_few_segments() {
        let err = RasterAssetRef::parse("https://acct.blob.core.windows.net/stacify/v002/wa/x.tif")
            .unwrap_err();
        assert!(matches!(err, StacError::MalformedInput(_)));
    }

    #[test]
    fn test_non_tiff_rejected() {
        let url = URL.replace(".tif", ".png");
        assert!(matches!(
            RasterAssetRef::parse(&url),
            Err(StacError::MalformedInput(_))
        ));
        assert!(RasterAssetRef::parse(&URL.replace(".tif", ".TIFF")).is_ok());
    }
}
