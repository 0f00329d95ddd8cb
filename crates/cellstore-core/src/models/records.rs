//! Typed views of the rows kept in the index store.
//!
//! Every row names its primary id. Payload placement is explicit: a row
//! carries inline bytes (`val`), a blob key (`blob`), or neither, in which
//! case the geometry lives behind the canonical record.

use super::feature::Version;
use super::geometry::BBox;
use super::item::{AttrValue, Item, PRIMARY_ATTR};
use super::keys::{canonical_key, cell_key, secondary_key, IndexLevel, RowKey};
use crate::error::{CellstoreError, Result};

const VERSION_ATTR: &str = "version";
const INLINE_ATTR: &str = "val";
const BLOB_ATTR: &str = "blob";
const BOUNDS_ATTR: &str = "bounds";
const LEVEL_ATTR: &str = "level";
const CHECKSUM_ATTR: &str = "checksum";
const SIZE_ATTR: &str = "size";
const SECONDARY_ATTR: &str = "usid";

/// Where a canonical record keeps its encoded geometry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Inline(Vec<u8>),
    BlobRef(String),
}

impl Locator {
    pub fn is_inline(&self) -> bool {
        matches!(self, Locator::Inline(_))
    }

    pub fn blob_key(&self) -> Option<&str> {
        match self {
            Locator::BlobRef(key) => Some(key),
            Locator::Inline(_) => None,
        }
    }
}

/// What any row knows about its geometry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryRef {
    Inline(Vec<u8>),
    BlobRef(String),
    /// Only the primary id; resolve through the canonical record
    IndexOnly(String),
}

impl From<Locator> for GeometryRef {
    fn from(locator: Locator) -> Self {
        match locator {
            Locator::Inline(bytes) => GeometryRef::Inline(bytes),
            Locator::BlobRef(key) => GeometryRef::BlobRef(key),
        }
    }
}

/// The authoritative row for a feature
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub primary: String,
    pub version: Version,
    pub locator: Locator,
    pub bounds: BBox,
    pub level: IndexLevel,
    /// CRC32 of the encoded payload
    pub checksum: u32,
    /// Encoded payload length in bytes
    pub size: u64,
    pub secondary: Option<String>,
}

impl CanonicalRecord {
    pub fn key(&self) -> String {
        canonical_key(&self.primary)
    }

    pub fn to_item(&self, dataset: &str) -> Item {
        let item = Item::new(dataset, self.key())
            .with(PRIMARY_ATTR, AttrValue::Str(self.primary.clone()))
            .with(VERSION_ATTR, AttrValue::Int(self.version.0))
            .with(BOUNDS_ATTR, AttrValue::Floats(self.bounds.to_array().to_vec()))
            .with(LEVEL_ATTR, AttrValue::Int(self.level.as_u8() as i64))
            .with(CHECKSUM_ATTR, AttrValue::Int(self.checksum as i64))
            .with(SIZE_ATTR, AttrValue::Int(self.size as i64));
        let item = match &self.locator {
            Locator::Inline(bytes) => item.with(INLINE_ATTR, AttrValue::Bytes(bytes.clone())),
            Locator::BlobRef(key) => item.with(BLOB_ATTR, AttrValue::Str(key.clone())),
        };
        match &self.secondary {
            Some(secondary) => item.with(SECONDARY_ATTR, AttrValue::Str(secondary.clone())),
            None => item,
        }
    }

    pub fn from_item(item: &Item) -> Result<Self> {
        let primary = required_primary(item)?;
        let version = item
            .get_int(VERSION_ATTR)
            .map(Version)
            .ok_or_else(|| missing(item, VERSION_ATTR))?;
        let locator = match geometry_ref_of(item, &primary)? {
            GeometryRef::Inline(bytes) => Locator::Inline(bytes),
            GeometryRef::BlobRef(key) => Locator::BlobRef(key),
            GeometryRef::IndexOnly(_) => {
                return Err(CellstoreError::Serialization(format!(
                    "canonical record {} carries no geometry payload",
                    item.key
                )))
            }
        };
        let bounds = match item.get_floats(BOUNDS_ATTR) {
            Some(&[w, s, e, n]) => BBox::new(w, s, e, n)?,
            _ => return Err(missing(item, BOUNDS_ATTR)),
        };
        let level = item
            .get_int(LEVEL_ATTR)
            .and_then(|l| u8::try_from(l).ok())
            .and_then(IndexLevel::from_u8)
            .ok_or_else(|| missing(item, LEVEL_ATTR))?;

        Ok(Self {
            primary,
            version,
            locator,
            bounds,
            level,
            checksum: item.get_int(CHECKSUM_ATTR).unwrap_or_default() as u32,
            size: item.get_int(SIZE_ATTR).unwrap_or_default() as u64,
            secondary: item.get_str(SECONDARY_ATTR).map(str::to_string),
        })
    }

    /// Attribute name and value guarding an update against a stale read
    pub fn version_guard(&self) -> (&'static str, AttrValue) {
        (VERSION_ATTR, AttrValue::Int(self.version.0))
    }

    /// Attribute whose absence guards a first insert
    pub fn creation_guard_attr() -> &'static str {
        PRIMARY_ATTR
    }
}

/// One cell of a feature's covering
#[derive(Debug, Clone, PartialEq)]
pub struct CellRow {
    pub level: IndexLevel,
    pub token: String,
    pub primary: String,
    /// Denormalized copy of a small geometry, or `IndexOnly`
    pub geometry: GeometryRef,
}

impl CellRow {
    pub fn key(&self) -> String {
        cell_key(self.level, &self.token, &self.primary)
    }

    pub fn to_item(&self, dataset: &str) -> Item {
        with_geometry_ref(
            Item::new(dataset, self.key()).with(PRIMARY_ATTR, AttrValue::Str(self.primary.clone())),
            &self.geometry,
        )
    }
}

/// Maps a user-declared identifier to a primary id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryRow {
    pub secondary: String,
    pub primary: String,
}

impl SecondaryRow {
    pub fn key(&self) -> String {
        secondary_key(&self.secondary, &self.primary)
    }

    pub fn to_item(&self, dataset: &str) -> Item {
        Item::new(dataset, self.key()).with(PRIMARY_ATTR, AttrValue::Str(self.primary.clone()))
    }
}

/// Any row of a dataset, decoded from its key and attributes
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Canonical(CanonicalRecord),
    Cell(CellRow),
    Secondary(SecondaryRow),
}

impl Row {
    pub fn from_item(item: &Item) -> Result<Row> {
        let key = RowKey::parse(&item.key).ok_or_else(|| {
            CellstoreError::Serialization(format!("unrecognized row key: {}", item.key))
        })?;
        match key {
            RowKey::Canonical { .. } => CanonicalRecord::from_item(item).map(Row::Canonical),
            RowKey::Cell { level, token, primary } => {
                let geometry = geometry_ref_of(item, &primary)?;
                Ok(Row::Cell(CellRow { level, token, primary, geometry }))
            }
            RowKey::Secondary { secondary, primary } => {
                Ok(Row::Secondary(SecondaryRow { secondary, primary }))
            }
        }
    }

    pub fn primary(&self) -> &str {
        match self {
            Row::Canonical(record) => &record.primary,
            Row::Cell(cell) => &cell.primary,
            Row::Secondary(secondary) => &secondary.primary,
        }
    }

    pub fn key(&self) -> String {
        match self {
            Row::Canonical(record) => record.key(),
            Row::Cell(cell) => cell.key(),
            Row::Secondary(secondary) => secondary.key(),
        }
    }

    /// The geometry reference a resolver should follow for this row
    pub fn geometry_ref(&self) -> GeometryRef {
        match self {
            Row::Canonical(record) => record.locator.clone().into(),
            Row::Cell(cell) => cell.geometry.clone(),
            Row::Secondary(secondary) => GeometryRef::IndexOnly(secondary.primary.clone()),
        }
    }
}

fn with_geometry_ref(item: Item, geometry: &GeometryRef) -> Item {
    match geometry {
        GeometryRef::Inline(bytes) => item.with(INLINE_ATTR, AttrValue::Bytes(bytes.clone())),
        GeometryRef::BlobRef(key) => item.with(BLOB_ATTR, AttrValue::Str(key.clone())),
        GeometryRef::IndexOnly(_) => item,
    }
}

fn geometry_ref_of(item: &Item, primary: &str) -> Result<GeometryRef> {
    match (item.get_bytes(INLINE_ATTR), item.get_str(BLOB_ATTR)) {
        (Some(bytes), None) => Ok(GeometryRef::Inline(bytes.to_vec())),
        (None, Some(key)) => Ok(GeometryRef::BlobRef(key.to_string())),
        (None, None) => Ok(GeometryRef::IndexOnly(primary.to_string())),
        (Some(_), Some(_)) => Err(CellstoreError::Serialization(format!(
            "row {} carries both inline bytes and a blob reference",
            item.key
        ))),
    }
}

fn required_primary(item: &Item) -> Result<String> {
    item.primary().map(str::to_string).ok_or_else(|| missing(item, PRIMARY_ATTR))
}

fn missing(item: &Item, attr: &str) -> CellstoreError {
    CellstoreError::Serialization(format!("row {} is missing attribute '{}'", item.key, attr))
}
