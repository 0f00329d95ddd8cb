use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute holding the primary id every row references.
///
/// Index stores must answer `KeyCondition::PrimaryEquals` queries over it.
pub const PRIMARY_ATTR: &str = "primary";

/// A typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Bytes(Vec<u8>),
    Floats(Vec<f64>),
}

/// Address of a row: (dataset, key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub dataset: String,
    pub key: String,
}

impl ItemKey {
    pub fn new(dataset: impl Into<String>, key: impl Into<String>) -> Self {
        Self { dataset: dataset.into(), key: key.into() }
    }
}

/// A row in the index store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub dataset: String,
    pub key: String,
    pub attrs: BTreeMap<String, AttrValue>,
}

impl Item {
    pub fn new(dataset: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            key: key.into(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: AttrValue) -> Self {
        self.attrs.insert(name.to_string(), value);
        self
    }

    pub fn item_key(&self) -> ItemKey {
        ItemKey::new(self.dataset.clone(), self.key.clone())
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.attrs.get(name) {
            Some(AttrValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.attrs.get(name) {
            Some(AttrValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_bytes(&self, name: &str) -> Option<&[u8]> {
        match self.attrs.get(name) {
            Some(AttrValue::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    pub fn get_floats(&self, name: &str) -> Option<&[f64]> {
        match self.attrs.get(name) {
            Some(AttrValue::Floats(f)) => Some(f),
            _ => None,
        }
    }

    /// The primary id this row references
    pub fn primary(&self) -> Option<&str> {
        self.get_str(PRIMARY_ATTR)
    }
}
