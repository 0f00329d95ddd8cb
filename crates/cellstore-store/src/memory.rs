//! In-memory storage implementations for development and testing.
//!
//! These implementations use `RwLock::unwrap()` intentionally. Lock poisoning
//! only occurs when another thread panicked while holding the lock, which is
//! an unrecoverable state. No lock is held across an `.await`.

use async_trait::async_trait;
use cellstore_core::error::{CellstoreError, Result};
use cellstore_core::models::{BBox, DatasetInfo, Item, ItemKey};
use cellstore_core::ports::{
    BlobStore, Guard, IndexStore, KeyCondition, MetadataStore, Page, PageRequest, BATCH_LIMIT,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::{Arc, RwLock};

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Default)]
struct IndexTables {
    /// dataset -> key -> item
    items: HashMap<String, BTreeMap<String, Item>>,
    /// (dataset, primary) -> keys of rows referencing it
    by_primary: HashMap<(String, String), BTreeSet<String>>,
}

impl IndexTables {
    fn insert(&mut self, item: Item) {
        let table = self.items.entry(item.dataset.clone()).or_default();
        if let Some(previous) = table.get(&item.key) {
            if let Some(primary) = previous.primary() {
                let slot = (item.dataset.clone(), primary.to_string());
                if let Some(keys) = self.by_primary.get_mut(&slot) {
                    keys.remove(&item.key);
                }
            }
        }
        if let Some(primary) = item.primary() {
            self.by_primary
                .entry((item.dataset.clone(), primary.to_string()))
                .or_default()
                .insert(item.key.clone());
        }
        table.insert(item.key.clone(), item);
    }

    fn remove(&mut self, key: &ItemKey) {
        let Some(table) = self.items.get_mut(&key.dataset) else {
            return;
        };
        if let Some(item) = table.remove(&key.key) {
            if let Some(primary) = item.primary() {
                let slot = (key.dataset.clone(), primary.to_string());
                if let Some(keys) = self.by_primary.get_mut(&slot) {
                    keys.remove(&key.key);
                    if keys.is_empty() {
                        self.by_primary.remove(&slot);
                    }
                }
            }
        }
    }

    fn check_guard(&self, item: &Item, guard: &Guard) -> Result<()> {
        let existing = self.items.get(&item.dataset).and_then(|t| t.get(&item.key));
        let passes = match guard {
            Guard::AttributeNotExists(attr) => existing.map_or(true, |e| e.get(attr).is_none()),
            Guard::AttributeEquals(attr, expected) => {
                existing.and_then(|e| e.get(attr)).map_or(false, |v| v == expected)
            }
        };
        if passes {
            Ok(())
        } else {
            Err(CellstoreError::ConditionFailed { key: item.key.clone() })
        }
    }
}

/// Serializable contents of a [`MemoryIndexStore`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub items: Vec<Item>,
}

/// In-memory implementation of IndexStore: an ordered map per dataset plus a
/// by-primary secondary index serving `KeyCondition::PrimaryEquals`
#[derive(Debug, Clone)]
pub struct MemoryIndexStore {
    tables: Arc<RwLock<IndexTables>>,
    page_size: usize,
}

impl Default for MemoryIndexStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIndexStore {
    /// Create a new in-memory index store
    pub fn new() -> Self {
        Self { tables: Arc::default(), page_size: DEFAULT_PAGE_SIZE }
    }

    /// Cap every page at `page_size` items regardless of the requested limit
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Number of rows stored for a dataset
    pub fn item_count(&self, dataset: &str) -> usize {
        let tables = self.tables.read().unwrap();
        tables.items.get(dataset).map_or(0, BTreeMap::len)
    }

    /// Copy out every row of every dataset
    pub fn snapshot(&self) -> IndexSnapshot {
        let tables = self.tables.read().unwrap();
        let items = tables.items.values().flat_map(|t| t.values().cloned()).collect();
        IndexSnapshot { items }
    }

    /// Build a store holding the rows of a snapshot
    pub fn from_snapshot(snapshot: IndexSnapshot) -> Self {
        let store = Self::new();
        {
            let mut tables = store.tables.write().unwrap();
            for item in snapshot.items {
                tables.insert(item);
            }
        }
        store
    }

    fn page_limit(&self, page: &PageRequest) -> usize {
        page.limit.unwrap_or(self.page_size).clamp(1, self.page_size)
    }
}

/// Take up to `limit` items, reporting a resume key when more remain
fn paginate<'a>(rows: impl Iterator<Item = &'a Item>, limit: usize) -> Page {
    let mut items: Vec<Item> = rows.take(limit + 1).cloned().collect();
    let last_key = if items.len() > limit {
        items.truncate(limit);
        items.last().map(|i| i.key.clone())
    } else {
        None
    };
    Page { items, last_key }
}

fn lower_bound<'a>(start: &'a str, start_after: Option<&'a str>) -> Bound<&'a str> {
    match start_after {
        Some(after) if after >= start => Bound::Excluded(after),
        _ => Bound::Included(start),
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn put_item(&self, item: Item, guard: Option<Guard>) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        if let Some(guard) = &guard {
            tables.check_guard(&item, guard)?;
        }
        tables.insert(item);
        Ok(())
    }

    async fn get_item(&self, dataset: &str, key: &str) -> Result<Option<Item>> {
        let tables = self.tables.read().unwrap();
        Ok(tables.items.get(dataset).and_then(|t| t.get(key)).cloned())
    }

    async fn query(
        &self,
        dataset: &str,
        condition: &KeyCondition,
        page: &PageRequest,
    ) -> Result<Page> {
        let limit = self.page_limit(page);
        let tables = self.tables.read().unwrap();
        let Some(table) = tables.items.get(dataset) else {
            return Ok(Page::default());
        };
        let after = page.start_after.as_deref();

        let result = match condition {
            KeyCondition::Between { start, end } => {
                let lower = lower_bound(start, after);
                let empty = match lower {
                    Bound::Included(l) => l > end.as_str(),
                    Bound::Excluded(l) => l >= end.as_str(),
                    Bound::Unbounded => false,
                };
                if empty {
                    Page::default()
                } else {
                    let range = table
                        .range::<str, _>((lower, Bound::Included(end.as_str())))
                        .map(|(_, item)| item);
                    paginate(range, limit)
                }
            }
            KeyCondition::BeginsWith(prefix) => {
                let rows = table
                    .range::<str, _>((lower_bound(prefix, after), Bound::Unbounded))
                    .take_while(|(key, _)| key.starts_with(prefix.as_str()))
                    .map(|(_, item)| item);
                paginate(rows, limit)
            }
            KeyCondition::PrimaryEquals(primary) => {
                match tables.by_primary.get(&(dataset.to_string(), primary.clone())) {
                    Some(keys) => {
                        let rows = keys
                            .iter()
                            .filter(|k| after.map_or(true, |a| k.as_str() > a))
                            .filter_map(|k| table.get(k));
                        paginate(rows, limit)
                    }
                    None => Page::default(),
                }
            }
        };
        Ok(result)
    }

    async fn scan(&self, dataset: &str, page: &PageRequest) -> Result<Page> {
        let limit = self.page_limit(page);
        let tables = self.tables.read().unwrap();
        let Some(table) = tables.items.get(dataset) else {
            return Ok(Page::default());
        };
        let lower = match page.start_after.as_deref() {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        let rows = table.range::<str, _>((lower, Bound::Unbounded)).map(|(_, item)| item);
        Ok(paginate(rows, limit))
    }

    async fn batch_put(&self, items: Vec<Item>) -> Result<Vec<Item>> {
        if items.len() > BATCH_LIMIT {
            return Err(CellstoreError::validation(
                "batch",
                format!("{} items exceeds the batch limit of {}", items.len(), BATCH_LIMIT),
            ));
        }
        let mut tables = self.tables.write().unwrap();
        for item in items {
            tables.insert(item);
        }
        Ok(Vec::new())
    }

    async fn batch_delete(&self, keys: Vec<ItemKey>) -> Result<Vec<ItemKey>> {
        if keys.len() > BATCH_LIMIT {
            return Err(CellstoreError::validation(
                "batch",
                format!("{} keys exceeds the batch limit of {}", keys.len(), BATCH_LIMIT),
            ));
        }
        let mut tables = self.tables.write().unwrap();
        for key in &keys {
            tables.remove(key);
        }
        Ok(Vec::new())
    }
}

/// In-memory implementation of BlobStore
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    /// Create a new in-memory blob store
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.read().unwrap().contains_key(key)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.blobs.write().unwrap().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let blobs = self.blobs.read().unwrap();
        blobs
            .get(key)
            .cloned()
            .ok_or_else(|| CellstoreError::BlobNotFound { key: key.to_string() })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.write().unwrap().remove(key);
        Ok(())
    }
}

/// Per-dataset aggregate: each feature's bounds keyed by primary id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DatasetAggregate {
    features: BTreeMap<String, BBox>,
    updated_at: Option<DateTime<Utc>>,
}

/// Serializable contents of a [`MemoryMetadataStore`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    datasets: BTreeMap<String, DatasetAggregate>,
}

/// In-memory implementation of MetadataStore
#[derive(Debug, Clone, Default)]
pub struct MemoryMetadataStore {
    datasets: Arc<RwLock<HashMap<String, DatasetAggregate>>>,
}

impl MemoryMetadataStore {
    /// Create a new in-memory metadata store
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetadataSnapshot {
        let datasets = self.datasets.read().unwrap();
        MetadataSnapshot {
            datasets: datasets.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    pub fn from_snapshot(snapshot: MetadataSnapshot) -> Self {
        Self { datasets: Arc::new(RwLock::new(snapshot.datasets.into_iter().collect())) }
    }

    fn record(&self, dataset: &str, primary: &str, bounds: Option<BBox>) {
        let mut datasets = self.datasets.write().unwrap();
        let aggregate = datasets.entry(dataset.to_string()).or_default();
        match bounds {
            Some(bounds) => {
                aggregate.features.insert(primary.to_string(), bounds);
            }
            None => {
                aggregate.features.remove(primary);
            }
        }
        aggregate.updated_at = Some(Utc::now());
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn register_feature(&self, dataset: &str, primary: &str, bounds: BBox) -> Result<()> {
        self.record(dataset, primary, Some(bounds));
        Ok(())
    }

    async fn adjust_bounds(
        &self,
        dataset: &str,
        primary: &str,
        _old: BBox,
        new: BBox,
    ) -> Result<()> {
        self.record(dataset, primary, Some(new));
        Ok(())
    }

    async fn remove_feature(&self, dataset: &str, primary: &str, _bounds: BBox) -> Result<()> {
        self.record(dataset, primary, None);
        Ok(())
    }

    async fn get_info(&self, dataset: &str) -> Result<DatasetInfo> {
        let datasets = self.datasets.read().unwrap();
        let Some(aggregate) = datasets.get(dataset) else {
            return Ok(DatasetInfo::empty(dataset));
        };
        let bounds = aggregate.features.values().copied().reduce(|a, b| a.union(&b));
        Ok(DatasetInfo {
            dataset: dataset.to_string(),
            bounds,
            feature_count: aggregate.features.len() as u64,
            updated_at: aggregate.updated_at,
        })
    }
}
