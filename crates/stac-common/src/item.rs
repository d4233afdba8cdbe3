//! STAC Item model.
//!
//! Only the subset of the STAC 1.0 Item model that the pipeline produces is
//! modelled. Property and asset maps are ordered so serialization is
//! deterministic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bbox::BoundingBox;

pub const STAC_VERSION: &str = "1.0.0";

pub const EO_EXTENSION: &str = "https://stac-extensions.github.io/eo/v1.0.0/schema.json";
pub const PROJECTION_EXTENSION: &str =
    "https://stac-extensions.github.io/projection/v1.0.0/schema.json";
pub const GRID_EXTENSION: &str = "https://stac-extensions.github.io/grid/v1.0.0/schema.json";
pub const RASTER_EXTENSION: &str = "https://stac-extensions.github.io/raster/v1.1.0/schema.json";

/// Media types used by item assets.
pub mod media_type {
    pub const COG: &str = "image/tiff; application=geotiff; profile=cloud-optimized";
    pub const TEXT: &str = "text/plain";
    pub const JPEG: &str = "image/jpeg";
    pub const PNG: &str = "image/png";
    pub const JSON: &str = "application/json";
}

/// A STAC Item: one spatio-temporal asset record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "type")]
    pub kind: String,
    pub stac_version: String,
    #[serde(default)]
    pub stac_extensions: Vec<String>,
    pub id: String,
    pub geometry: Geometry,
    pub bbox: [f64; 4],
    pub properties: Properties,
    #[serde(default)]
    pub links: Vec<Link>,
    pub assets: BTreeMap<String, Asset>,
    pub collection: String,
}

impl Item {
    /// Create an item whose bbox is derived from `geometry`.
    pub fn new(
        id: impl Into<String>,
        geometry: Geometry,
        datetime: DateTime<Utc>,
        collection: impl Into<String>,
    ) -> Self {
        let bbox = geometry.bounds().to_array();
        Self {
            kind: "Feature".to_string(),
            stac_version: STAC_VERSION.to_string(),
            stac_extensions: Vec::new(),
            id: id.into(),
            geometry,
            bbox,
            properties: Properties {
                datetime,
                fields: Map::new(),
            },
            links: Vec::new(),
            assets: BTreeMap::new(),
            collection: collection.into(),
        }
    }

    /// Set a free-form property (e.g. `proj:epsg`, `naip:state`).
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.fields.insert(key.into(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.fields.get(key)
    }

    pub fn add_extension(&mut self, schema: &str) {
        if !self.stac_extensions.iter().any(|e| e == schema) {
            self.stac_extensions.push(schema.to_string());
        }
    }

    pub fn add_asset(&mut self, key: impl Into<String>, asset: Asset) {
        self.assets.insert(key.into(), asset);
    }

    /// Replace any existing `self` link.
    pub fn set_self_href(&mut self, href: impl Into<String>) {
        self.links.retain(|l| l.rel != "self");
        self.links.push(Link {
            rel: "self".to_string(),
            href: href.into(),
            media_type: Some(media_type::JSON.to_string()),
        });
    }

    /// Whether the stored bbox matches the bounds of the geometry.
    pub fn bbox_matches_geometry(&self) -> bool {
        self.geometry.bounds().to_array() == self.bbox
    }
}

/// Item properties: the mandatory datetime plus extension fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    pub datetime: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// GeoJSON polygon geometry (single exterior ring).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

impl Geometry {
    pub fn polygon(ring: Vec<[f64; 2]>) -> Self {
        Self {
            kind: "Polygon".to_string(),
            coordinates: vec![ring],
        }
    }

    pub fn exterior(&self) -> &[[f64; 2]] {
        self.coordinates.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Bounds over every vertex of every ring.
    pub fn bounds(&self) -> BoundingBox {
        let points: Vec<[f64; 2]> = self.coordinates.iter().flatten().copied().collect();
        BoundingBox::from_points(&points).unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// A typed reference to a file belonging to an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub href: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(rename = "eo:bands", skip_serializing_if = "Option::is_none")]
    pub eo_bands: Option<Vec<Band>>,
    #[serde(rename = "raster:bands", skip_serializing_if = "Option::is_none")]
    pub raster_bands: Option<Vec<RasterBand>>,
}

impl Asset {
    pub fn new(href: impl Into<String>, media_type: &str, role: &str, title: &str) -> Self {
        Self {
            href: href.into(),
            media_type: Some(media_type.to_string()),
            title: Some(title.to_string()),
            roles: vec![role.to_string()],
            eo_bands: None,
            raster_bands: None,
        }
    }
}

/// Electro-optical band description (eo extension).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Raster band description (raster extension).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterBand {
    pub nodata: f64,
    pub spatial_resolution: f64,
    pub data_type: String,
    pub unit: String,
}

/// Organization that produced or hosts the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}
