//! Row key layout inside a dataset.
//!
//! ```text
//! id!<primary>                      canonical record
//! cell!<level>!<token>!<primary>    cell-index row
//! usid!<secondary>!<primary>        secondary-id row
//! ```
//!
//! `!` separates key segments, so neither primary nor secondary ids may
//! contain it.

use serde::{Deserialize, Serialize};

use crate::error::{CellstoreError, Result};

const SEP: char = '!';

/// Sorts after every valid UTF-8 sequence; closes inclusive key ranges.
const KEY_MAX: char = char::MAX;

/// Index tier selected per feature from its extent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndexLevel {
    /// Larger cells for features with a large extent
    Coarse,
    /// Smaller cells for compact features
    Fine,
}

impl IndexLevel {
    pub const ALL: [IndexLevel; 2] = [IndexLevel::Coarse, IndexLevel::Fine];

    pub fn as_u8(&self) -> u8 {
        match self {
            IndexLevel::Coarse => 0,
            IndexLevel::Fine => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(IndexLevel::Coarse),
            1 => Some(IndexLevel::Fine),
            _ => None,
        }
    }
}

impl std::fmt::Display for IndexLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Parsed form of a row key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowKey {
    Canonical { primary: String },
    Cell { level: IndexLevel, token: String, primary: String },
    Secondary { secondary: String, primary: String },
}

impl RowKey {
    pub fn parse(key: &str) -> Option<RowKey> {
        let mut parts = key.split(SEP);
        match parts.next()? {
            "id" => {
                let primary = parts.next()?;
                parts.next().is_none().then(|| RowKey::Canonical { primary: primary.to_string() })
            }
            "cell" => {
                let level = IndexLevel::from_u8(parts.next()?.parse().ok()?)?;
                let token = parts.next()?.to_string();
                let primary = parts.next()?.to_string();
                parts.next().is_none().then_some(RowKey::Cell { level, token, primary })
            }
            "usid" => {
                let secondary = parts.next()?.to_string();
                let primary = parts.next()?.to_string();
                parts.next().is_none().then_some(RowKey::Secondary { secondary, primary })
            }
            _ => None,
        }
    }

    pub fn primary(&self) -> &str {
        match self {
            RowKey::Canonical { primary }
            | RowKey::Cell { primary, .. }
            | RowKey::Secondary { primary, .. } => primary,
        }
    }
}

pub fn canonical_key(primary: &str) -> String {
    format!("id{SEP}{primary}")
}

/// Prefix shared by every canonical record in a dataset
pub fn canonical_prefix() -> String {
    format!("id{SEP}")
}

pub fn cell_key(level: IndexLevel, token: &str, primary: &str) -> String {
    format!("cell{SEP}{level}{SEP}{token}{SEP}{primary}")
}

/// Prefix shared by every cell row of an index level
pub fn cell_prefix(level: IndexLevel) -> String {
    format!("cell{SEP}{level}{SEP}")
}

/// Inclusive key bounds selecting every row whose token lies in `[start, end]`
pub fn cell_range(level: IndexLevel, start: &str, end: &str) -> (String, String) {
    (
        format!("cell{SEP}{level}{SEP}{start}"),
        format!("cell{SEP}{level}{SEP}{end}{SEP}{KEY_MAX}"),
    )
}

pub fn secondary_key(secondary: &str, primary: &str) -> String {
    format!("usid{SEP}{secondary}{SEP}{primary}")
}

/// Prefix selecting every row for one secondary id
pub fn secondary_prefix(secondary: &str) -> String {
    format!("usid{SEP}{secondary}{SEP}")
}

/// Check an identifier can be embedded in a key segment
pub fn validate_id(field: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(CellstoreError::validation(field, "must not be empty"));
    }
    if id.contains(SEP) {
        return Err(CellstoreError::validation(
            field,
            format!("'{}' must not contain '{}'", id, SEP),
        ));
    }
    Ok(())
}

/// Check a primary id; it also becomes a blob key segment
pub fn validate_primary(primary: &str) -> Result<()> {
    validate_id("primary", primary)?;
    validate_path_segment("primary", primary)
}

/// Check a dataset name is usable as a namespace
pub fn validate_dataset(dataset: &str) -> Result<()> {
    if dataset.trim().is_empty() {
        return Err(CellstoreError::validation("dataset", "must not be empty"));
    }
    validate_path_segment("dataset", dataset)
}

fn validate_path_segment(field: &str, value: &str) -> Result<()> {
    if value == "." || value == ".." {
        return Err(CellstoreError::validation(field, format!("'{}' is reserved", value)));
    }
    if value.contains('/') || value.contains('\\') {
        return Err(CellstoreError::validation(
            field,
            format!("'{}' must not contain path separators", value),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keys() {
        assert_eq!(
            RowKey::parse(&canonical_key("abc")),
            Some(RowKey::Canonical { primary: "abc".into() })
        );
        assert_eq!(
            RowKey::parse(&cell_key(IndexLevel::Fine, "0123", "abc")),
            Some(RowKey::Cell {
                level: IndexLevel::Fine,
                token: "0123".into(),
                primary: "abc".into()
            })
        );
        assert_eq!(
            RowKey::parse(&secondary_key("road-7", "abc")),
            Some(RowKey::Secondary { secondary: "road-7".into(), primary: "abc".into() })
        );
        assert_eq!(RowKey::parse("cell!7!01!abc"), None);
        assert_eq!(RowKey::parse("nope!abc"), None);
        assert_eq!(RowKey::parse("id!a!b"), None);
    }

    #[test]
    fn test_cell_range_includes_descendants_only_when_asked() {
        let (start, end) = cell_range(IndexLevel::Coarse, "01", "01");
        let own = cell_key(IndexLevel::Coarse, "01", "zzz");
        let child = cell_key(IndexLevel::Coarse, "012", "abc");
        let parent = cell_key(IndexLevel::Coarse, "0", "abc");
        assert!(start <= own && own <= end);
        assert!(child > end);
        assert!(parent < start);

        let (start, end) = cell_range(IndexLevel::Coarse, "01", "0133");
        assert!(start <= child && child <= end);
        let deep = cell_key(IndexLevel::Coarse, "0133", "abc");
        assert!(deep <= end);
        let sibling = cell_key(IndexLevel::Coarse, "02", "abc");
        assert!(sibling > end);
    }

    #[test]
    fn test_levels_do_not_share_key_space() {
        let (_, coarse_end) = cell_range(IndexLevel::Coarse, "3", "3333");
        let fine = cell_key(IndexLevel::Fine, "0", "abc");
        assert!(fine > coarse_end);
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("primary", "abc-123").is_ok());
        assert!(validate_id("primary", "").is_err());
        assert!(validate_id("primary", "a!b").is_err());
        assert!(validate_id("secondary_id", "road/7").is_ok());
    }

    #[test]
    fn test_primary_and_dataset_are_path_safe() {
        assert!(validate_primary("v1.2").is_ok());
        assert!(validate_primary("..").is_err());
        assert!(validate_primary(".").is_err());
        assert!(validate_primary("a/b").is_err());
        assert!(validate_primary("a!b").is_err());

        assert!(validate_dataset("parcels").is_ok());
        assert!(validate_dataset("..").is_err());
        assert!(validate_dataset("a/../b").is_err());
    }
}
