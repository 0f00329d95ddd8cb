//! The public feature store facade.
//!
//! Every call returns an [`OperationResult`], so callers always get explicit
//! retry advice alongside the error.

use cellstore_core::config::StoreSettings;
use cellstore_core::error::{OperationError, OperationResult, Result};
use cellstore_core::models::{
    feature_collection, BBox, DatasetInfo, Feature, IndexLevel, Item, Version,
};
use cellstore_core::ports::{MetadataStore, PageRequest};
use serde::Serialize;
use std::sync::Arc;

use crate::collaborators::Collaborators;
use crate::manager::{IndexManager, WriteOutcome};
use crate::query::{FeaturePage, QueryEngine, QueryResult};

/// What a `put` did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PutOutcome {
    pub id: String,
    pub version: Version,
    /// `false` when an existing feature was replaced
    pub created: bool,
    pub level: IndexLevel,
    pub cells: usize,
}

impl PutOutcome {
    fn from_write(outcome: WriteOutcome, created: bool) -> Self {
        Self {
            id: outcome.primary,
            version: outcome.version,
            created,
            level: outcome.level,
            cells: outcome.cells,
        }
    }
}

/// Geospatial feature store over an index store, a blob store and a
/// metadata collaborator
pub struct FeatureStore {
    manager: IndexManager,
    engine: QueryEngine,
    metadata: Arc<dyn MetadataStore>,
    settings: StoreSettings,
}

impl FeatureStore {
    pub fn new(collaborators: Collaborators, settings: StoreSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            manager: IndexManager::new(collaborators.clone(), settings.clone()),
            engine: QueryEngine::new(collaborators.clone(), settings.clone()),
            metadata: collaborators.metadata,
            settings,
        })
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Insert or replace a feature.
    ///
    /// Without an id a new one is assigned. With an id the stored feature is
    /// updated, or created under that id when absent.
    pub async fn put(&self, dataset: &str, feature: Feature) -> OperationResult<PutOutcome> {
        let result: Result<PutOutcome> = async {
            let existing = match &feature.id {
                Some(id) => self.manager.current(dataset, id).await?,
                None => None,
            };
            match existing {
                Some(_) => {
                    self.manager.update(dataset, feature).await.map(|o| PutOutcome::from_write(o, false))
                }
                None => {
                    self.manager.insert(dataset, feature).await.map(|o| PutOutcome::from_write(o, true))
                }
            }
        }
        .await;
        report("put", dataset, result)
    }

    /// The feature with primary id `id`; an empty collection when absent
    pub async fn get(&self, dataset: &str, id: &str) -> OperationResult<geojson::FeatureCollection> {
        let result: Result<geojson::FeatureCollection> = async {
            let features: Vec<Feature> = self.engine.get_by_id(dataset, id).await?.into_iter().collect();
            feature_collection(&features)
        }
        .await;
        report("get", dataset, result)
    }

    /// The feature with primary id `id`, if any
    pub async fn get_feature(&self, dataset: &str, id: &str) -> OperationResult<Option<Feature>> {
        report("get", dataset, self.engine.get_by_id(dataset, id).await)
    }

    /// Every feature declaring `id` as its secondary id.
    ///
    /// Features that could not be resolved are left out and logged.
    pub async fn get_by_secondary_id(
        &self,
        dataset: &str,
        id: &str,
    ) -> OperationResult<geojson::FeatureCollection> {
        let result: Result<geojson::FeatureCollection> = async {
            let found = self.engine.by_secondary(dataset, id).await?;
            found.feature_collection()
        }
        .await;
        report("get_by_secondary_id", dataset, result)
    }

    /// Delete a feature. Returns `true` when anything was removed; deleting
    /// an unknown id is a successful no-op.
    pub async fn delete(&self, dataset: &str, id: &str) -> OperationResult<bool> {
        report("delete", dataset, self.manager.delete(dataset, id).await)
    }

    /// Features touching `bbox`, with per-item failures and timings
    pub async fn bbox_query(&self, dataset: &str, bbox: &BBox) -> OperationResult<QueryResult> {
        report("bbox_query", dataset, self.engine.bbox(dataset, bbox).await)
    }

    /// Aggregate bounds and count for a dataset
    pub async fn info(&self, dataset: &str) -> OperationResult<DatasetInfo> {
        report("info", dataset, self.metadata.get_info(dataset).await)
    }

    /// One page of features in primary id order
    pub async fn list(&self, dataset: &str, page: &PageRequest) -> OperationResult<FeaturePage> {
        report("list", dataset, self.engine.list(dataset, page).await)
    }

    /// Every feature of a dataset
    pub async fn export(&self, dataset: &str) -> OperationResult<QueryResult> {
        report("export", dataset, self.engine.export(dataset).await)
    }

    /// Every raw row of a dataset
    pub async fn dump(&self, dataset: &str) -> OperationResult<Vec<Item>> {
        report("dump", dataset, self.engine.dump(dataset).await)
    }

    /// Indexed cells as polygon features
    pub async fn dump_cells(&self, dataset: &str) -> OperationResult<Vec<Feature>> {
        report("dump_cells", dataset, self.engine.dump_cells(dataset).await)
    }
}

fn report<T>(operation: &str, dataset: &str, result: Result<T>) -> OperationResult<T> {
    result.map_err(|e| {
        let error = OperationError::from(e);
        tracing::warn!(
            operation = %operation,
            dataset = %dataset,
            retryable = error.retryable,
            error = %error,
            "Operation failed"
        );
        error
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellstore_core::error::CellstoreError;
    use cellstore_core::models::Geometry;
    use cellstore_store::{MemoryBlobStore, MemoryIndexStore, MemoryMetadataStore};

    fn store() -> FeatureStore {
        let collaborators = Collaborators::new(
            Arc::new(MemoryIndexStore::new()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemoryMetadataStore::new()),
        );
        FeatureStore::new(collaborators, StoreSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn test_put_inserts_then_updates() {
        let store = store();
        let created = store.put("ds", Feature::new(Geometry::point(1.0, 2.0))).await.unwrap();
        assert!(created.created);

        let replaced = store
            .put("ds", Feature::new(Geometry::point(3.0, 4.0)).with_id(created.id.clone()))
            .await
            .unwrap();
        assert!(!replaced.created);
        assert!(replaced.version > created.version);

        let fetched = store.get_feature("ds", &created.id).await.unwrap().unwrap();
        assert_eq!(fetched.geometry, Geometry::point(3.0, 4.0));
    }

    #[tokio::test]
    async fn test_put_with_unknown_id_creates() {
        let store = store();
        let outcome =
            store.put("ds", Feature::new(Geometry::point(0.0, 0.0)).with_id("chosen")).await.unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.id, "chosen");
    }

    #[tokio::test]
    async fn test_errors_carry_retry_flag() {
        let store = store();
        let err = store.put("", Feature::new(Geometry::point(0.0, 0.0))).await.unwrap_err();
        assert!(!err.retryable);
        assert!(matches!(err.error, CellstoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_path_like_ids_rejected_regardless_of_tier() {
        for threshold in [0, usize::MAX] {
            let collaborators = Collaborators::new(
                Arc::new(MemoryIndexStore::new()),
                Arc::new(MemoryBlobStore::new()),
                Arc::new(MemoryMetadataStore::new()),
            );
            let settings = StoreSettings { inline_threshold_bytes: threshold, ..StoreSettings::default() };
            let store = FeatureStore::new(collaborators, settings).unwrap();

            for id in ["..", ".", "a/b"] {
                let err = store.put("ds", Feature::new(Geometry::point(0.0, 0.0)).with_id(id)).await.unwrap_err();
                assert!(matches!(err.error, CellstoreError::Validation { .. }), "id {:?}", id);
            }
            let err = store.put("a/../b", Feature::new(Geometry::point(0.0, 0.0))).await.unwrap_err();
            assert!(matches!(err.error, CellstoreError::Validation { .. }));
        }
    }

    #[tokio::test]
    async fn test_get_absent_is_empty() {
        let store = store();
        assert!(store.get("ds", "missing").await.unwrap().features.is_empty());
        assert!(store.get_by_secondary_id("ds", "missing").await.unwrap().features.is_empty());
    }

    #[test]
    fn test_new_rejects_invalid_settings() {
        let collaborators = Collaborators::new(
            Arc::new(MemoryIndexStore::new()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemoryMetadataStore::new()),
        );
        let settings = StoreSettings { read_concurrency: 0, ..StoreSettings::default() };
        assert!(FeatureStore::new(collaborators, settings).is_err());
    }
}
