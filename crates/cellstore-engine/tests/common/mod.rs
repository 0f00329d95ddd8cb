//! Shared fixtures for engine integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use cellstore_core::config::StoreSettings;
use cellstore_core::error::{CellstoreError, Result};
use cellstore_core::models::{Geometry, Item, ItemKey};
use cellstore_core::ports::{Guard, IndexStore, KeyCondition, Page, PageRequest};
use cellstore_engine::{Collaborators, FeatureStore};
use cellstore_store::{MemoryBlobStore, MemoryIndexStore, MemoryMetadataStore};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;

/// Index store wrapper that injects throttling, transient failures,
/// unprocessed batch items and read barriers
pub struct FaultyIndexStore {
    pub inner: MemoryIndexStore,
    /// Batch calls left to fail with `Throttled`
    pub throttle_batches: AtomicUsize,
    /// Fail every batch call with `Throttled`
    pub always_throttle: AtomicBool,
    /// Batch calls left to hand back half their items unprocessed
    pub partial_batches: AtomicUsize,
    /// Guarded puts left that land but report `Transient`
    pub lose_put_acks: AtomicUsize,
    /// Canonical reads left that wait on `gate`
    pub gated_reads: AtomicUsize,
    pub gate: Mutex<Option<Arc<Barrier>>>,
    /// Next batch put meets the first barrier, then holds until the second
    pub stall: Mutex<Option<(Arc<Barrier>, Arc<Barrier>)>>,
    pub batch_calls: AtomicUsize,
}

impl FaultyIndexStore {
    pub fn new(inner: MemoryIndexStore) -> Self {
        Self {
            inner,
            throttle_batches: AtomicUsize::new(0),
            always_throttle: AtomicBool::new(false),
            partial_batches: AtomicUsize::new(0),
            lose_put_acks: AtomicUsize::new(0),
            gated_reads: AtomicUsize::new(0),
            gate: Mutex::new(None),
            stall: Mutex::new(None),
            batch_calls: AtomicUsize::new(0),
        }
    }

    /// Make the next `reads` canonical reads rendezvous in groups of `parties`
    pub fn gate_reads(&self, parties: usize, reads: usize) {
        *self.gate.lock().unwrap() = Some(Arc::new(Barrier::new(parties)));
        self.gated_reads.store(reads, Ordering::SeqCst);
    }

    /// Hold the next batch put. Returns the barriers the test side waits on:
    /// the first once the put has arrived, the second to let it proceed.
    pub fn stall_next_batch_put(&self) -> (Arc<Barrier>, Arc<Barrier>) {
        let reached = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        *self.stall.lock().unwrap() = Some((reached.clone(), release.clone()));
        (reached, release)
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn batch_fault(&self) -> Result<()> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.always_throttle.load(Ordering::SeqCst) || Self::take(&self.throttle_batches) {
            return Err(CellstoreError::Throttled("provisioned throughput exceeded".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl IndexStore for FaultyIndexStore {
    async fn put_item(&self, item: Item, guard: Option<Guard>) -> Result<()> {
        let guarded = guard.is_some();
        self.inner.put_item(item, guard).await?;
        if guarded && Self::take(&self.lose_put_acks) {
            return Err(CellstoreError::Transient("connection reset after write".into()));
        }
        Ok(())
    }

    async fn get_item(&self, dataset: &str, key: &str) -> Result<Option<Item>> {
        if key.starts_with("id!") && Self::take(&self.gated_reads) {
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.wait().await;
            }
        }
        self.inner.get_item(dataset, key).await
    }

    async fn query(
        &self,
        dataset: &str,
        condition: &KeyCondition,
        page: &PageRequest,
    ) -> Result<Page> {
        self.inner.query(dataset, condition, page).await
    }

    async fn scan(&self, dataset: &str, page: &PageRequest) -> Result<Page> {
        self.inner.scan(dataset, page).await
    }

    async fn batch_put(&self, mut items: Vec<Item>) -> Result<Vec<Item>> {
        let stall = self.stall.lock().unwrap().take();
        if let Some((reached, release)) = stall {
            reached.wait().await;
            release.wait().await;
        }
        self.batch_fault()?;
        if items.len() > 1 && Self::take(&self.partial_batches) {
            let unprocessed = items.split_off(items.len() / 2);
            self.inner.batch_put(items).await?;
            return Ok(unprocessed);
        }
        self.inner.batch_put(items).await
    }

    async fn batch_delete(&self, mut keys: Vec<ItemKey>) -> Result<Vec<ItemKey>> {
        self.batch_fault()?;
        if keys.len() > 1 && Self::take(&self.partial_batches) {
            let unprocessed = keys.split_off(keys.len() / 2);
            self.inner.batch_delete(keys).await?;
            return Ok(unprocessed);
        }
        self.inner.batch_delete(keys).await
    }
}

/// A store plus handles on its in-memory collaborators
pub struct Harness {
    pub store: FeatureStore,
    pub index: Arc<FaultyIndexStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub metadata: Arc<MemoryMetadataStore>,
    pub collaborators: Collaborators,
}

impl Harness {
    pub fn new(settings: StoreSettings) -> Self {
        let index = Arc::new(FaultyIndexStore::new(MemoryIndexStore::new()));
        let blobs = Arc::new(MemoryBlobStore::new());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let collaborators = Collaborators::new(index.clone(), blobs.clone(), metadata.clone());
        let store = FeatureStore::new(collaborators.clone(), settings).unwrap();
        Self { store, index, blobs, metadata, collaborators }
    }

    pub fn rows(&self, dataset: &str) -> usize {
        self.index.inner.item_count(dataset)
    }
}

/// Settings with a fast retry budget
pub fn test_settings() -> StoreSettings {
    StoreSettings { retry_base_delay_ms: 1, ..StoreSettings::default() }
}

/// Closed axis-aligned rectangle polygon
pub fn rect(west: f64, south: f64, east: f64, north: f64) -> Geometry {
    Geometry::polygon(vec![vec![
        [west, south],
        [east, south],
        [east, north],
        [west, north],
        [west, south],
    ]])
}
