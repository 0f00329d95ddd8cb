//! Output data structures for commands

use cellstore_core::models::{AttrValue, BBox, Feature, IndexLevel, Item};
use cellstore_engine::PutOutcome;
use serde::Serialize;
use tabled::Tabled;

/// One row per stored feature
#[derive(Debug, Serialize, Tabled)]
pub struct FeatureRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Geometry")]
    pub geometry: String,
    #[tabled(rename = "Bounds")]
    pub bounds: String,
    #[tabled(rename = "Properties")]
    pub properties: String,
}

impl From<&Feature> for FeatureRow {
    fn from(feature: &Feature) -> Self {
        let bounds = feature.geometry.bbox().map(|b| format_bbox(&b)).unwrap_or_default();
        Self {
            id: feature.id.clone().unwrap_or_default(),
            geometry: format!("{:?}", feature.geometry.geometry_type()),
            bounds,
            properties: serde_json::Value::Object(feature.properties.clone()).to_string(),
        }
    }
}

/// Result of one feature written by `put`
#[derive(Debug, Serialize, Tabled)]
pub struct PutRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Action")]
    pub action: String,
    #[tabled(rename = "Level")]
    pub level: String,
    #[tabled(rename = "Cells")]
    pub cells: usize,
    #[tabled(rename = "Version")]
    pub version: i64,
}

impl From<PutOutcome> for PutRow {
    fn from(outcome: PutOutcome) -> Self {
        Self {
            id: outcome.id,
            action: if outcome.created { "created" } else { "updated" }.to_string(),
            level: outcome.level.to_string(),
            cells: outcome.cells,
            version: outcome.version.0,
        }
    }
}

/// A raw index row
#[derive(Debug, Serialize, Tabled)]
pub struct ItemRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Attributes")]
    pub attributes: String,
}

impl From<&Item> for ItemRow {
    fn from(item: &Item) -> Self {
        let attributes = item
            .attrs
            .iter()
            .map(|(name, value)| format!("{}={}", name, describe(value)))
            .collect::<Vec<_>>()
            .join(" ");
        Self { key: item.key.clone(), attributes }
    }
}

/// An indexed cell
#[derive(Debug, Serialize, Tabled)]
pub struct CellRow {
    #[tabled(rename = "Feature")]
    pub primary: String,
    #[tabled(rename = "Index")]
    pub level: String,
    #[tabled(rename = "Cell Level")]
    pub cell_level: u64,
    #[tabled(rename = "Token")]
    pub token: String,
}

impl From<&Feature> for CellRow {
    fn from(cell: &Feature) -> Self {
        let text = |name: &str| {
            cell.properties.get(name).and_then(|v| v.as_str()).unwrap_or_default().to_string()
        };
        let number = |name: &str| cell.properties.get(name).and_then(|v| v.as_u64());
        let level = number("level")
            .and_then(|n| u8::try_from(n).ok())
            .and_then(IndexLevel::from_u8)
            .map(|l| l.to_string())
            .unwrap_or_default();
        Self {
            primary: text("primary"),
            level,
            cell_level: number("cell_level").unwrap_or(0),
            token: text("token"),
        }
    }
}

/// A resolved configuration value
#[derive(Debug, Serialize, Tabled)]
pub struct ConfigRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Source")]
    pub source: String,
}

pub fn format_bbox(bbox: &BBox) -> String {
    format!("[{:.6}, {:.6}, {:.6}, {:.6}]", bbox.west, bbox.south, bbox.east, bbox.north)
}

fn describe(value: &AttrValue) -> String {
    match value {
        AttrValue::Str(s) => s.clone(),
        AttrValue::Int(i) => i.to_string(),
        AttrValue::Bytes(b) => format!("<{} bytes>", b.len()),
        AttrValue::Floats(f) => format!("{:?}", f),
    }
}
