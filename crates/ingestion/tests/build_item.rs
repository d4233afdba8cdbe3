//! Item building from real GeoTIFF files.

use std::path::PathBuf;

use ingestion::builder::SideMetadata;
use ingestion::{build_item, serialize, BuildInput, RasterAssetRef, RasterInfo};
use serde_json::{json, Value};
use stac_common::Item;
use test_utils::{assert_approx_eq, naip, GeoTiffSpec, FGDC_METADATA};

fn write_tile(dir: &tempfile::TempDir, spec: &GeoTiffSpec) -> PathBuf {
    let path = dir.path().join("m_4611962_ne_10_1_20150601.tif");
    spec.write(&path).unwrap();
    path
}

fn build(raster_path: &PathBuf, metadata: Option<SideMetadata>) -> Item {
    let asset = RasterAssetRef::parse(&naip::raster_url()).unwrap();
    build_item(&BuildInput {
        raster_path,
        asset: &asset,
        metadata,
        thumbnail_href: Some(asset.sibling_url(naip::PREVIEW_BLOB)),
        collection_id: "naip",
        additional_providers: &[],
    })
    .unwrap()
}

#[test]
fn test_raster_info_from_geotiff() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tile(&dir, &GeoTiffSpec::utm_10n());

    let info = RasterInfo::read(&path).unwrap();
    assert_eq!((info.width, info.height), (64, 80));
    assert_eq!(info.epsg, 26910);
    assert_eq!(
        info.bounds().to_array(),
        [730_000.0, 5_119_920.0, 730_064.0, 5_120_000.0]
    );
}

#[test]
fn test_naip_tile_without_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tile(&dir, &GeoTiffSpec::utm_10n());
    let item = build(&path, None);

    assert_eq!(item.id, naip::ITEM_ID);
    assert_eq!(item.property("grid:code"), Some(&json!(naip::GRID_CODE)));
    assert_eq!(item.properties.datetime.to_rfc3339(), "2015-06-01T16:00:00+00:00");
    assert_eq!(item.property("proj:epsg"), Some(&json!(26910)));
    assert_eq!(item.property("proj:shape"), Some(&json!([80, 64])));
    assert_eq!(
        item.property("proj:bbox"),
        Some(&json!([730_000.0, 5_119_920.0, 730_064.0, 5_120_000.0]))
    );

    // Zone 10 tile east of its central meridian, inside Washington.
    let ring = item.geometry.exterior();
    assert_eq!(ring.len(), 5);
    assert_eq!(ring.first(), ring.last());
    for [lon, lat] in ring {
        assert!((-121.0..-119.0).contains(lon), "lon {}", lon);
        assert!((46.0..46.3).contains(lat), "lat {}", lat);
    }
    assert!(item.bbox_matches_geometry());
    assert!(!item.assets.contains_key("metadata"));
}

#[test]
fn test_naip_tile_with_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tile(&dir, &GeoTiffSpec::utm_10n());
    let asset = RasterAssetRef::parse(&naip::raster_url()).unwrap();
    let href = asset.sibling_url(naip::METADATA_BLOB);

    let item = build(
        &path,
        Some(SideMetadata {
            text: FGDC_METADATA.to_string(),
            href: href.clone(),
        }),
    );

    assert_eq!(item.id, naip::ITEM_ID);
    // The FGDC calendar date wins over the file name date.
    assert_eq!(item.properties.datetime.to_rfc3339(), "2015-07-12T16:00:00+00:00");
    assert_eq!(item.assets["metadata"].href, href);
    assert_eq!(item.assets["metadata"].title.as_deref(), Some("FGDC Metadata"));
}

#[test]
fn test_geographic_tile_footprint_equals_native_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tile(&dir, &GeoTiffSpec::geographic());
    let item = build(&path, None);

    assert_approx_eq!(item.bbox[0], -120.0, 1e-9);
    assert_approx_eq!(item.bbox[1], 46.1, 1e-9);
    assert_approx_eq!(item.bbox[2], -119.8, 1e-9);
    assert_approx_eq!(item.bbox[3], 46.2, 1e-9);
    assert_eq!(item.property("proj:epsg"), Some(&json!(4326)));
}

#[test]
fn test_built_item_serializes_to_one_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tile(&dir, &GeoTiffSpec::utm_10n());
    let item = build(&path, None);

    let line = serialize(&item).unwrap();
    assert!(line.ends_with('\n'));
    assert_eq!(line.matches('\n').count(), 1);

    let value: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["type"], "Feature");
    assert_eq!(value["id"], naip::ITEM_ID);
    assert_eq!(value["properties"]["datetime"], "2015-06-01T16:00:00Z");
    assert_eq!(value["assets"]["image"]["href"], naip::raster_url());
    assert_eq!(value["assets"]["image"]["raster:bands"].as_array().unwrap().len(), 4);
    assert_eq!(value["assets"]["thumbnail"]["type"], "image/jpeg");
}

#[test]
fn test_unreadable_raster() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("m_4611962_ne_10_1_20150601.tif");
    std::fs::write(&path, b"II*\0garbage").unwrap();
    let asset = RasterAssetRef::parse(&naip::raster_url()).unwrap();

    let err = build_item(&BuildInput {
        raster_path: &path,
        asset: &asset,
        metadata: None,
        thumbnail_href: None,
        collection_id: "naip",
        additional_providers: &[],
    })
    .unwrap_err();
    assert_eq!(err.kind(), "asset_unreadable");
    assert!(!err.is_retryable());
}
