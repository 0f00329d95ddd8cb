use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::geometry::BBox;

/// Aggregate information about a dataset, kept by the metadata collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    /// Dataset name
    pub dataset: String,

    /// Union of all feature bounds, `None` when empty
    pub bounds: Option<BBox>,

    /// Number of features
    pub feature_count: u64,

    /// When the dataset last changed
    pub updated_at: Option<DateTime<Utc>>,
}

impl DatasetInfo {
    pub fn empty(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            bounds: None,
            feature_count: 0,
            updated_at: None,
        }
    }
}
