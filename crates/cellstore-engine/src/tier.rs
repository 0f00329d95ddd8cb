//! Geometry Tier Store.
//!
//! Small payloads live inline in the canonical record; larger ones go to the
//! blob store under `{prefix}/{dataset}/{primary}/{version}`. Resolution
//! follows a row's geometry reference, redirecting index-only rows through
//! the canonical record exactly once.

use cellstore_core::error::{CellstoreError, Result};
use cellstore_core::models::keys::canonical_key;
use cellstore_core::models::{CanonicalRecord, GeometryRef, Locator, Version};
use cellstore_core::ports::{BlobStore, IndexStore};
use std::sync::Arc;

/// Places encoded payloads and resolves references back to bytes
#[derive(Clone)]
pub struct GeometryTierStore {
    index: Arc<dyn IndexStore>,
    blobs: Arc<dyn BlobStore>,
    inline_threshold: usize,
    blob_prefix: String,
}

impl GeometryTierStore {
    pub fn new(
        index: Arc<dyn IndexStore>,
        blobs: Arc<dyn BlobStore>,
        inline_threshold: usize,
        blob_prefix: impl Into<String>,
    ) -> Self {
        Self { index, blobs, inline_threshold, blob_prefix: blob_prefix.into() }
    }

    pub fn inline_threshold(&self) -> usize {
        self.inline_threshold
    }

    /// Deterministic blob key for one version of a feature
    pub fn blob_key(&self, dataset: &str, primary: &str, version: Version) -> String {
        format!("{}/{}/{}/{}", self.blob_prefix, dataset, primary, version)
    }

    /// Choose a location for `bytes`, writing the blob when tiered out
    pub async fn place(
        &self,
        dataset: &str,
        primary: &str,
        version: Version,
        bytes: Vec<u8>,
    ) -> Result<Locator> {
        if bytes.len() <= self.inline_threshold {
            return Ok(Locator::Inline(bytes));
        }
        let key = self.blob_key(dataset, primary, version);
        let size = bytes.len();
        self.blobs.put(&key, bytes).await?;
        tracing::debug!(dataset = %dataset, primary = %primary, key = %key, size, "Placed payload in blob store");
        Ok(Locator::BlobRef(key))
    }

    /// Bytes behind a canonical locator
    pub async fn resolve_locator(&self, locator: &Locator) -> Result<Vec<u8>> {
        match locator {
            Locator::Inline(bytes) => Ok(bytes.clone()),
            Locator::BlobRef(key) => self.blobs.get(key).await,
        }
    }

    /// Bytes behind any row's geometry reference.
    ///
    /// An index-only reference fails with `NotFound` when the canonical
    /// record is gone.
    pub async fn resolve(&self, dataset: &str, geometry: &GeometryRef) -> Result<Vec<u8>> {
        match geometry {
            GeometryRef::Inline(bytes) => Ok(bytes.clone()),
            GeometryRef::BlobRef(key) => self.blobs.get(key).await,
            GeometryRef::IndexOnly(primary) => {
                let record = self
                    .load_canonical(dataset, primary)
                    .await?
                    .ok_or_else(|| CellstoreError::not_found(dataset, primary.as_str()))?;
                // Canonical locators never point elsewhere in the index
                self.resolve_locator(&record.locator).await
            }
        }
    }

    /// Read and decode the canonical record for `primary`
    pub async fn load_canonical(
        &self,
        dataset: &str,
        primary: &str,
    ) -> Result<Option<CanonicalRecord>> {
        match self.index.get_item(dataset, &canonical_key(primary)).await? {
            Some(item) => CanonicalRecord::from_item(&item).map(Some),
            None => Ok(None),
        }
    }

    /// What a cell row should carry for a feature stored at `locator`
    pub fn cell_payload(&self, primary: &str, locator: &Locator, denormalize: bool) -> GeometryRef {
        match locator {
            Locator::Inline(bytes) if denormalize => GeometryRef::Inline(bytes.clone()),
            _ => GeometryRef::IndexOnly(primary.to_string()),
        }
    }

    /// Best-effort removal of a tiered payload
    pub async fn remove(&self, locator: &Locator) {
        if let Some(key) = locator.blob_key() {
            if let Err(e) = self.blobs.delete(key).await {
                tracing::warn!(key = %key, error = %e, "Failed to delete blob");
            }
        }
    }
}
