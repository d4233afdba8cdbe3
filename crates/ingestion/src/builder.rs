//! Catalog record builder.
//!
//! Turns a raster tile (plus optional FGDC side-metadata) into a STAC Item.
//! The output depends only on the inputs; no clock is read.

use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde_json::json;
use stac_common::item::{
    media_type, EO_EXTENSION, GRID_EXTENSION, PROJECTION_EXTENSION, RASTER_EXTENSION,
};
use stac_common::{Asset, Band, Geometry, Item, Provider, RasterBand};
use tracing::debug;

use crate::error::{geometry, Result, StacError};
use crate::fgdc::{parse_fgdc, FgdcValue, CALENDAR_DATE, RESOURCE_DESCRIPTION};
use crate::locator::RasterAssetRef;
use crate::raster::RasterInfo;

/// Offset applied to acquisition dates, which carry no time of day.
/// 16:00 UTC is mid-morning across the continental US.
const ACQUISITION_HOUR_OFFSET: i64 = 16;

/// Underscore-delimited token of a tile file stem holding `YYYYMMDD`.
const STEM_DATE_TOKEN: usize = 5;

const RASTER_BAND_COUNT: usize = 4;

/// Digital Orthophoto Quarter Quadrangle code embedded in tile ids.
fn doqq_pattern() -> &'static Regex {
    static DOQQ: OnceLock<Regex> = OnceLock::new();
    DOQQ.get_or_init(|| {
        Regex::new(r"[A-Za-z]{2}_m_(\d{7})_(ne|se|nw|sw)_").expect("DOQQ pattern is valid")
    })
}

/// FGDC side-metadata as fetched from the store.
#[derive(Debug, Clone)]
pub struct SideMetadata {
    pub text: String,
    pub href: String,
}

/// Everything needed to build one item.
#[derive(Debug, Clone)]
pub struct BuildInput<'a> {
    /// Local copy of the raster
    pub raster_path: &'a Path,
    pub asset: &'a RasterAssetRef,
    pub metadata: Option<SideMetadata>,
    pub thumbnail_href: Option<String>,
    pub collection_id: &'a str,
    pub additional_providers: &'a [Provider],
}

/// Build a STAC Item for a raster tile.
pub fn build_item(input: &BuildInput<'_>) -> Result<Item> {
    let raster = RasterInfo::read(input.raster_path)?;
    build_item_from_raster(input, &raster)
}

/// Build a STAC Item from already-read georeferencing.
pub fn build_item_from_raster(input: &BuildInput<'_>, raster: &RasterInfo) -> Result<Item> {
    let native_bounds = raster.bounds();
    let ring = projection::reproject_ring(raster.epsg, &native_bounds.ring()).map_err(geometry)?;
    let footprint = Geometry::polygon(ring);

    let fgdc = match &input.metadata {
        Some(side) => Some(parse_fgdc(&side.text)?).filter(|md| !md.is_empty()),
        None => None,
    };

    let resource = fgdc
        .as_ref()
        .and_then(|md| md.text_at(RESOURCE_DESCRIPTION))
        .unwrap_or(input.asset.file_name.as_str());
    let id = item_id(&input.asset.region, resource);

    let date = match &fgdc {
        Some(md) => metadata_date(md)?,
        None => date_from_file_stem(&input.asset.stem)?,
    };
    let datetime = acquisition_datetime(date);

    debug!(id = %id, epsg = raster.epsg, "Building item");

    let collection = input.collection_id;
    let gsd = raster.gsd();

    let mut item = Item::new(id, footprint, datetime, collection);
    item.set_property(format!("{}:state", collection), input.asset.region.as_str());
    item.set_property(format!("{}:year", collection), input.asset.year.as_str());

    let mut providers = vec![usda_provider()];
    providers.extend(input.additional_providers.iter().cloned());
    item.set_property("providers", serde_json::to_value(providers)?);
    item.set_property("gsd", gsd);

    item.add_extension(EO_EXTENSION);

    item.add_extension(PROJECTION_EXTENSION);
    item.set_property("proj:epsg", raster.epsg);
    item.set_property("proj:shape", json!([raster.height, raster.width]));
    item.set_property("proj:bbox", json!(native_bounds.to_array()));
    item.set_property("proj:transform", json!(raster.transform_matrix()));

    item.add_extension(GRID_EXTENSION);
    if let Some(code) = grid_code(&item.id) {
        item.set_property("grid:code", code);
    }

    let mut image = Asset::new(&input.asset.url, media_type::COG, "data", "RGBIR COG tile");
    image.eo_bands = Some(naip_bands());
    image.raster_bands = Some(vec![
        RasterBand {
            nodata: 0.0,
            spatial_resolution: gsd,
            data_type: "uint8".to_string(),
            unit: "none".to_string(),
        };
        RASTER_BAND_COUNT
    ]);
    item.add_asset("image", image);
    item.add_extension(RASTER_EXTENSION);

    if let (Some(side), Some(_)) = (&input.metadata, &fgdc) {
        item.add_asset(
            "metadata",
            Asset::new(&side.href, media_type::TEXT, "metadata", "FGDC Metadata"),
        );
    }

    if let Some(href) = &input.thumbnail_href {
        item.add_asset(
            "thumbnail",
            Asset::new(href, thumbnail_media_type(href), "thumbnail", "Thumbnail"),
        );
    }

    Ok(item)
}

/// Item id: `{region}_{resource name without extension}`.
pub fn item_id(region: &str, resource: &str) -> String {
    let stem = Path::new(resource)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(resource);
    format!("{}_{}", region, stem)
}

/// `DOQQ-{7 digits}{QUADRANT}` when the id embeds a quarter-quad name.
pub fn grid_code(id: &str) -> Option<String> {
    let caps = doqq_pattern().captures(id)?;
    Some(format!("DOQQ-{}{}", &caps[1], caps[2].to_uppercase()))
}

fn thumbnail_media_type(href: &str) -> &'static str {
    if href.to_ascii_lowercase().ends_with("png") {
        media_type::PNG
    } else {
        media_type::JPEG
    }
}

fn metadata_date(md: &FgdcValue) -> Result<NaiveDate> {
    let raw = md.text_at(CALENDAR_DATE).ok_or_else(|| {
        StacError::MetadataParse("metadata has no Single_Date/Time Calendar_Date".to_string())
    })?;
    parse_calendar_date(raw)
        .ok_or_else(|| StacError::MetadataParse(format!("invalid Calendar_Date: {}", raw)))
}

/// Acquisition date from the sixth underscore-delimited token of a stem,
/// e.g. `m_4611962_ne_10_1_20150601`.
pub fn date_from_file_stem(stem: &str) -> Result<NaiveDate> {
    let token = stem.split('_').nth(STEM_DATE_TOKEN).ok_or_else(|| {
        StacError::MalformedInput(format!("file name carries no acquisition date: {}", stem))
    })?;
    parse_calendar_date(token)
        .ok_or_else(|| StacError::MalformedInput(format!("invalid date token in {}", stem)))
}

/// `YYYYMMDD` or `YYYY-MM-DD`.
pub fn parse_calendar_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .ok()
}

pub fn acquisition_datetime(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
        + Duration::hours(ACQUISITION_HOUR_OFFSET)
}

pub fn usda_provider() -> Provider {
    Provider {
        name: "USDA Farm Service Agency".to_string(),
        description: None,
        roles: vec!["producer".to_string(), "licensor".to_string()],
        url: Some(
            "https://www.fsa.usda.gov/programs-and-services/aerial-photography/imagery-programs/naip-imagery/"
                .to_string(),
        ),
    }
}

pub fn naip_bands() -> Vec<Band> {
    let band = |name: &str, common: &str, description: Option<&str>| Band {
        name: name.to_string(),
        common_name: Some(common.to_string()),
        description: description.map(str::to_string),
    };
    vec![
        band("Red", "red", None),
        band("Green", "green", None),
        band("Blue", "blue", None),
        band("NIR", "nir", Some("near-infrared")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://acct.blob.core.windows.net/stacify/v002/wa/2015/wa_100cm_2015/46119/m_4611962_ne_10_1_20150601.tif";

    fn raster() -> RasterInfo {
        RasterInfo {
            width: 5000,
            height: 7000,
            epsg: 26910,
            transform: [1.0, 0.0, 600_000.0, 0.0, -1.0, 5_160_000.0],
        }
    }

    fn input<'a>(asset: &'a RasterAssetRef, metadata: Option<SideMetadata>) -> BuildInput<'a> {
        BuildInput {
            raster_path: Path::new("unused.tif"),
            asset,
            metadata,
            thumbnail_href: Some(asset.sibling_url(&asset.preview_blob("jpg"))),
            collection_id: "naip",
            additional_providers: &[],
        }
    }

    #[test]
    fn test_grid_code() {
        assert_eq!(
            grid_code("wa_m_4611962_ne_10_1_20150601").as_deref(),
            Some("DOQQ-4611962NE")
        );
        assert_eq!(grid_code("wa_other_tile"), None);
        assert_eq!(grid_code("wa_m_461196_ne_10"), None);
    }

    #[test]
    fn test_item_id_strips_extension() {
        assert_eq!(item_id("wa", "m_4611962_ne_10_1_20150601.tif"), "wa_m_4611962_ne_10_1_20150601");
        assert_eq!(item_id("tx", "plain"), "tx_plain");
    }

    #[test]
    fn test_dates() {
        let d = date_from_file_stem("m_4611962_ne_10_1_20150601").unwrap();
        assert_eq!(acquisition_datetime(d).to_rfc3339(), "2015-06-01T16:00:00+00:00");
        assert!(matches!(
            date_from_file_stem("m_4611962_ne"),
            Err(StacError::MalformedInput(_))
        ));
        assert_eq!(parse_calendar_date("2015-06-01"), NaiveDate::from_ymd_opt(2015, 6, 1));
        assert_eq!(parse_calendar_date("June 1"), None);
    }

    #[test]
    fn test_build_without_metadata() {
        let asset = RasterAssetRef::parse(URL).unwrap();
        let item = build_item_from_raster(&input(&asset, None), &raster()).unwrap();

        assert_eq!(item.id, "wa_m_4611962_ne_10_1_20150601");
        assert_eq!(item.collection, "naip");
        assert!(item.bbox_matches_geometry());
        assert_eq!(item.geometry.exterior().len(), 5);
        assert_eq!(item.property("naip:state"), Some(&json!("wa")));
        assert_eq!(item.property("naip:year"), Some(&json!("2015")));
        assert_eq!(item.property("grid:code"), Some(&json!("DOQQ-4611962NE")));
        assert_eq!(item.property("proj:epsg"), Some(&json!(26910)));
        assert_eq!(item.property("proj:shape"), Some(&json!([7000, 5000])));
        assert_eq!(item.property("gsd"), Some(&json!(1.0)));
        assert_eq!(
            item.properties.datetime.to_rfc3339(),
            "2015-06-01T16:00:00+00:00"
        );

        assert!(!item.assets.contains_key("metadata"));
        let image = &item.assets["image"];
        assert_eq!(image.href, URL);
        assert_eq!(image.media_type.as_deref(), Some(media_type::COG));
        assert_eq!(image.eo_bands.as_ref().unwrap().len(), 4);
        assert_eq!(image.raster_bands.as_ref().unwrap()[3].spatial_resolution, 1.0);
        assert_eq!(
            item.assets["thumbnail"].media_type.as_deref(),
            Some(media_type::JPEG)
        );
        assert_eq!(item.stac_extensions.len(), 4);
    }

    #[test]
    fn test_build_with_metadata_uses_resource_and_date() {
        let asset = RasterAssetRef::parse(URL).unwrap();
        let metadata = SideMetadata {
            text: "Metadata:\n  Identification_Information:\n    Time_Period_of_Content:\n      Time_Period_Information:\n        Single_Date/Time:\n          Calendar_Date: 20150715\n  Distribution_Information:\n    Resource_Description: m_4611962_ne_10_1_20150715_20151019.tif\n".to_string(),
            href: asset.sibling_url(&asset.metadata_blob("fgdc")),
        };
        let item = build_item_from_raster(&input(&asset, Some(metadata)), &raster()).unwrap();

        assert_eq!(item.id, "wa_m_4611962_ne_10_1_20150715_20151019");
        assert_eq!(
            item.properties.datetime.to_rfc3339(),
            "2015-07-15T16:00:00+00:00"
        );
        let md = &item.assets["metadata"];
        assert_eq!(md.media_type.as_deref(), Some(media_type::TEXT));
        assert!(md.href.ends_with("wa_fgdc_2015/46119/m_4611962_ne_10_1_20150601.txt"));
    }

    #[test]
    fn test_metadata_without_date_fails() {
        let asset = RasterAssetRef::parse(URL).unwrap();
        let metadata = SideMetadata {
            text: "Metadata:\n  Distribution_Information:\n    Resource_Description: x.tif\n"
                .to_string(),
            href: "https://x/y.txt".to_string(),
        };
        let err = build_item_from_raster(&input(&asset, Some(metadata)), &raster()).unwrap_err();
        assert!(matches!(err, StacError::MetadataParse(_)));
    }

    #[test]
    fn test_unsupported_crs_is_geometry_error() {
        let asset = RasterAssetRef::parse(URL).unwrap();
        let mut raster = raster();
        raster.epsg = 3857;
        let err = build_item_from_raster(&input(&asset, None), &raster).unwrap_err();
        assert!(matches!(err, StacError::Geometry(_)));
    }

    #[test]
    fn test_png_thumbnail() {
        assert_eq!(thumbnail_media_type("https://x/a.PNG"), media_type::PNG);
        assert_eq!(thumbnail_media_type("https://x/a.jpg"), media_type::JPEG);
    }

    #[test]
    fn test_build_is_deterministic() {
        let asset = RasterAssetRef::parse(URL).unwrap();
        let a = build_item_from_raster(&input(&asset, None), &raster()).unwrap();
        let b = build_item_from_raster(&input(&asset, None), &raster()).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
