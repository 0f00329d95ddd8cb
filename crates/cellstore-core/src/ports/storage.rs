use async_trait::async_trait;

use crate::error::Result;
use crate::models::{AttrValue, BBox, DatasetInfo, Item, ItemKey};

/// Most items a single `batch_put` / `batch_delete` call may carry
pub const BATCH_LIMIT: usize = 25;

/// Condition attached to a single-item write
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    /// Fail unless the stored item lacks this attribute (or does not exist)
    AttributeNotExists(String),
    /// Fail unless the stored item has this attribute with exactly this value
    AttributeEquals(String, AttrValue),
}

/// Key condition for `IndexStore::query`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyCondition {
    /// Keys in `[start, end]`, inclusive
    Between { start: String, end: String },
    /// Keys starting with the prefix
    BeginsWith(String),
    /// Every row whose primary attribute equals the value, via the by-primary index
    PrimaryEquals(String),
}

/// Pagination request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum items per page; `None` lets the store choose
    pub limit: Option<usize>,
    /// Resume strictly after this key
    pub start_after: Option<String>,
}

impl PageRequest {
    pub fn first(limit: Option<usize>) -> Self {
        Self { limit, start_after: None }
    }

    pub fn after(&self, key: impl Into<String>) -> Self {
        Self { limit: self.limit, start_after: Some(key.into()) }
    }
}

/// One page of results, in key order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    /// Key to resume from; `None` when the result is exhausted
    pub last_key: Option<String>,
}

/// Port for the ordered key-value index store
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Write one item, optionally guarded. A rejected guard fails with
    /// `ConditionFailed`.
    async fn put_item(&self, item: Item, guard: Option<Guard>) -> Result<()>;

    /// Read one item
    async fn get_item(&self, dataset: &str, key: &str) -> Result<Option<Item>>;

    /// Query one dataset by key condition, paginated
    async fn query(
        &self,
        dataset: &str,
        condition: &KeyCondition,
        page: &PageRequest,
    ) -> Result<Page>;

    /// Scan every item of a dataset in key order, paginated
    async fn scan(&self, dataset: &str, page: &PageRequest) -> Result<Page>;

    /// Write up to `BATCH_LIMIT` items unguarded. Returns the items the store
    /// did not process; callers retry those.
    async fn batch_put(&self, items: Vec<Item>) -> Result<Vec<Item>>;

    /// Delete up to `BATCH_LIMIT` items. Deleting an absent key succeeds.
    /// Returns the keys the store did not process.
    async fn batch_delete(&self, keys: Vec<ItemKey>) -> Result<Vec<ItemKey>>;
}

/// Port for the blob object store
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under a key, replacing any previous object
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Fetch bytes; a missing object fails with `BlobNotFound`
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove an object; removing a missing object succeeds
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Port for per-dataset aggregate bookkeeping.
///
/// Every operation is keyed by primary id so retried calls are harmless.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Add a feature's bounds to the dataset aggregate
    async fn register_feature(&self, dataset: &str, primary: &str, bounds: BBox) -> Result<()>;

    /// Replace a feature's bounds contribution
    async fn adjust_bounds(
        &self,
        dataset: &str,
        primary: &str,
        old: BBox,
        new: BBox,
    ) -> Result<()>;

    /// Drop a feature's contribution
    async fn remove_feature(&self, dataset: &str, primary: &str, bounds: BBox) -> Result<()>;

    /// Current aggregate for a dataset
    async fn get_info(&self, dataset: &str) -> Result<DatasetInfo>;
}
