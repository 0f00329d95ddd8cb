//! Index Manager: the insert / update / delete protocol.
//!
//! A feature is one canonical record plus derived rows: one cell row per
//! covering cell and an optional secondary-id row. The canonical record is
//! the commit point for writes. Inserts are guarded on absence, updates on
//! the previously read version, and deletes remove it last so an
//! interrupted delete can be re-run.

use cellstore_core::config::StoreSettings;
use cellstore_core::error::{CellstoreError, Result};
use cellstore_core::models::keys::{
    canonical_key, cell_key, validate_dataset, validate_id, validate_primary,
};
use cellstore_core::models::{
    BBox, CanonicalRecord, CellRow, Feature, GeometryRef, IndexLevel, Item, ItemKey, Locator,
    SecondaryRow, Version,
};
use cellstore_core::ports::{Guard, KeyCondition};
use cellstore_geo::select_level;
use cellstore_geo::validation::validate_geometry;
use std::collections::{BTreeMap, BTreeSet};

use crate::batch::BatchWriter;
use crate::collaborators::Collaborators;
use crate::diff::{cell_set, CellId, CoveringDiff};
use crate::query::collect_pages;
use crate::retry::RetryPolicy;
use crate::tier::GeometryTierStore;

/// Sweeps before reconcile gives up on a record that keeps changing
const RECONCILE_ROUNDS: usize = 3;

/// Result of a successful insert or update
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub primary: String,
    pub version: Version,
    pub level: IndexLevel,
    /// Number of covering cells indexed
    pub cells: usize,
}

/// Everything derived from a feature before any write happens
struct Prepared {
    primary: String,
    bounds: BBox,
    level: IndexLevel,
    tokens: Vec<String>,
    bytes: Vec<u8>,
    checksum: u32,
    secondary: Option<String>,
}

impl Prepared {
    fn record(&self, version: Version, locator: Locator) -> CanonicalRecord {
        CanonicalRecord {
            primary: self.primary.clone(),
            version,
            locator,
            bounds: self.bounds,
            level: self.level,
            checksum: self.checksum,
            size: self.bytes.len() as u64,
            secondary: self.secondary.clone(),
        }
    }
}

/// Keeps canonical records, cell rows and secondary rows consistent
pub struct IndexManager {
    collaborators: Collaborators,
    tier: GeometryTierStore,
    writer: BatchWriter,
    settings: StoreSettings,
}

impl IndexManager {
    pub fn new(collaborators: Collaborators, settings: StoreSettings) -> Self {
        let tier = GeometryTierStore::new(
            collaborators.index.clone(),
            collaborators.blobs.clone(),
            settings.inline_threshold_bytes,
            settings.blob_prefix.clone(),
        );
        let writer = BatchWriter::new(
            collaborators.index.clone(),
            RetryPolicy::from_settings(&settings),
            settings.write_concurrency,
        );
        Self { collaborators, tier, writer, settings }
    }

    /// The current canonical record, if any
    pub async fn current(&self, dataset: &str, primary: &str) -> Result<Option<CanonicalRecord>> {
        validate_dataset(dataset)?;
        validate_primary(primary)?;
        self.tier.load_canonical(dataset, primary).await
    }

    /// Insert a new feature, assigning a primary id when it has none.
    ///
    /// Re-running an insert with the same id and payload succeeds without
    /// writing a second record.
    pub async fn insert(&self, dataset: &str, feature: Feature) -> Result<WriteOutcome> {
        validate_dataset(dataset)?;
        let primary = match &feature.id {
            Some(id) => id.clone(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let prepared = self.prepare(feature, primary)?;
        let primary = prepared.primary.as_str();

        let version = Version::now();
        let locator = self.tier.place(dataset, primary, version, prepared.bytes.clone()).await?;
        let ours = prepared.record(version, locator);

        let guard = Guard::AttributeNotExists(CanonicalRecord::creation_guard_attr().to_string());
        let record = match self.collaborators.index.put_item(ours.to_item(dataset), Some(guard)).await
        {
            Ok(()) => ours,
            Err(e) if e.is_condition_failed() => self.resolve_existing(dataset, ours).await?,
            // The write may or may not have landed, so the blob stays
            Err(e) => return Err(e),
        };

        let rows = self.expected_rows(dataset, &record, &prepared.tokens);
        self.writer.put_all(rows.into_values().collect()).await?;

        self.collaborators.metadata.register_feature(dataset, primary, record.bounds).await?;

        tracing::info!(
            dataset = %dataset,
            primary = %primary,
            level = ?record.level,
            cells = prepared.tokens.len(),
            inline = record.locator.is_inline(),
            "Inserted feature"
        );

        Ok(WriteOutcome {
            primary: record.primary,
            version: record.version,
            level: record.level,
            cells: prepared.tokens.len(),
        })
    }

    /// The creation guard failed: either a retry of this very insert or a
    /// different feature already holding the id
    async fn resolve_existing(&self, dataset: &str, ours: CanonicalRecord) -> Result<CanonicalRecord> {
        let existing = self.tier.load_canonical(dataset, &ours.primary).await?;
        match existing {
            Some(existing) if existing.checksum == ours.checksum && existing.size == ours.size => {
                if existing.locator != ours.locator {
                    self.tier.remove(&ours.locator).await;
                }
                tracing::info!(
                    dataset = %dataset,
                    primary = %ours.primary,
                    "Feature already stored with identical payload, completing insert"
                );
                Ok(existing)
            }
            Some(_) => {
                self.tier.remove(&ours.locator).await;
                Err(CellstoreError::conflict(
                    dataset,
                    ours.primary.as_str(),
                    "a different feature already uses this id",
                ))
            }
            None => {
                self.tier.remove(&ours.locator).await;
                Err(CellstoreError::Transient(format!(
                    "record {} changed while inserting",
                    ours.primary
                )))
            }
        }
    }

    /// Replace an existing feature, guarded by the version read at the start
    pub async fn update(&self, dataset: &str, feature: Feature) -> Result<WriteOutcome> {
        validate_dataset(dataset)?;
        let primary = feature
            .id
            .clone()
            .ok_or_else(|| CellstoreError::validation("id", "update requires a primary id"))?;
        validate_primary(&primary)?;

        let current = self
            .tier
            .load_canonical(dataset, &primary)
            .await?
            .ok_or_else(|| CellstoreError::not_found(dataset, primary.as_str()))?;
        let old_cells = self.previous_cells(dataset, &current).await?;

        let prepared = self.prepare(feature, primary)?;
        let primary = prepared.primary.as_str();
        let version = Version::after(current.version);
        let locator = self.tier.place(dataset, primary, version, prepared.bytes.clone()).await?;
        let record = prepared.record(version, locator);

        let (attr, value) = current.version_guard();
        let guard = Guard::AttributeEquals(attr.to_string(), value);
        match self.collaborators.index.put_item(record.to_item(dataset), Some(guard)).await {
            Ok(()) => {}
            Err(e) if e.is_condition_failed() => {
                self.discard_losing_payload(dataset, &record).await;
                tracing::warn!(
                    dataset = %dataset,
                    primary = %primary,
                    read_version = %current.version,
                    "Update lost a version race"
                );
                return Err(CellstoreError::conflict(
                    dataset,
                    primary,
                    format!("version {} is no longer current", current.version),
                ));
            }
            Err(e) => return Err(e),
        }

        let new_cells = cell_set(record.level, &prepared.tokens);
        let diff = CoveringDiff::between(&old_cells, &new_cells);
        let old_payload = self.tier.cell_payload(primary, &current.locator, self.settings.denormalize_cells);
        let new_payload = self.tier.cell_payload(primary, &record.locator, self.settings.denormalize_cells);

        let mut puts: Vec<Item> = diff
            .added
            .iter()
            .map(|cell| cell_row(primary, cell, new_payload.clone()).to_item(dataset))
            .collect();
        if old_payload != new_payload {
            puts.extend(
                diff.retained
                    .iter()
                    .map(|cell| cell_row(primary, cell, new_payload.clone()).to_item(dataset)),
            );
        }
        let mut deletes: Vec<ItemKey> = diff
            .removed
            .iter()
            .map(|cell| ItemKey::new(dataset, cell_key(cell.level, &cell.token, primary)))
            .collect();

        if current.secondary != record.secondary {
            if let Some(old) = &current.secondary {
                let row = SecondaryRow { secondary: old.clone(), primary: primary.to_string() };
                deletes.push(ItemKey::new(dataset, row.key()));
            }
            if let Some(new) = &record.secondary {
                let row = SecondaryRow { secondary: new.clone(), primary: primary.to_string() };
                puts.push(row.to_item(dataset));
            }
        }

        tracing::debug!(
            dataset = %dataset,
            primary = %primary,
            added = diff.added.len(),
            removed = diff.removed.len(),
            retained = diff.retained.len(),
            "Applying covering diff"
        );
        self.writer.put_all(puts).await?;
        self.writer.delete_all(deletes).await?;

        // A newer writer may own the feature by now; its bounds win
        if let Some(latest) = self.reconcile(dataset, &record, &prepared.tokens).await? {
            self.collaborators
                .metadata
                .adjust_bounds(dataset, primary, current.bounds, latest.bounds)
                .await?;
        }

        if current.locator.blob_key().is_some() && current.locator != record.locator {
            self.tier.remove(&current.locator).await;
        }

        tracing::info!(
            dataset = %dataset,
            primary = %primary,
            version = %record.version,
            level = ?record.level,
            cells = prepared.tokens.len(),
            "Updated feature"
        );

        Ok(WriteOutcome {
            primary: record.primary.clone(),
            version: record.version,
            level: record.level,
            cells: prepared.tokens.len(),
        })
    }

    /// Delete a feature and every row that references it.
    ///
    /// Returns `false` when nothing referenced the primary id.
    pub async fn delete(&self, dataset: &str, primary: &str) -> Result<bool> {
        validate_dataset(dataset)?;
        validate_primary(primary)?;

        let rows = self.discover(dataset, primary).await?;
        if rows.is_empty() {
            tracing::debug!(dataset = %dataset, primary = %primary, "Nothing to delete");
            return Ok(false);
        }

        let canonical = canonical_key(primary);
        let record = match rows.iter().find(|item| item.key == canonical) {
            Some(item) => match CanonicalRecord::from_item(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(dataset = %dataset, primary = %primary, error = %e, "Deleting malformed canonical record");
                    None
                }
            },
            None => None,
        };

        let derived: Vec<ItemKey> =
            rows.iter().filter(|item| item.key != canonical).map(Item::item_key).collect();
        let derived_count = derived.len();
        self.writer.delete_all(derived).await?;

        if let Some(record) = &record {
            self.collaborators.metadata.remove_feature(dataset, primary, record.bounds).await?;
        }

        if rows.iter().any(|item| item.key == canonical) {
            self.writer.delete_all(vec![ItemKey::new(dataset, canonical)]).await?;
        }

        if let Some(record) = &record {
            self.tier.remove(&record.locator).await;
        }

        tracing::info!(
            dataset = %dataset,
            primary = %primary,
            rows = derived_count + usize::from(record.is_some()),
            "Deleted feature"
        );
        Ok(true)
    }

    /// Every row whose primary attribute names `primary`
    pub async fn discover(&self, dataset: &str, primary: &str) -> Result<Vec<Item>> {
        collect_pages(
            self.collaborators.index.as_ref(),
            dataset,
            &KeyCondition::PrimaryEquals(primary.to_string()),
        )
        .await
    }

    /// Validate and derive index data for a feature stored under `primary`
    fn prepare(&self, mut feature: Feature, primary: String) -> Result<Prepared> {
        validate_primary(&primary)?;
        validate_geometry(&feature.geometry).into_result()?;

        let bounds = feature.bbox()?;
        let level = select_level(&bounds, self.settings.coarse_threshold_meters);
        let params = self.settings.cover.for_level(level).index;
        let tokens = self.collaborators.covering.indexes_for(&feature.geometry, &params)?;

        let secondary = feature.secondary_id(&self.settings.secondary_id_property);
        if let Some(secondary) = &secondary {
            validate_id("secondary_id", secondary)?;
        }

        feature.id = Some(primary.clone());
        let bytes = self.collaborators.codec.encode(&feature)?;
        let checksum = crc32fast::hash(&bytes);

        Ok(Prepared { primary, bounds, level, tokens, bytes, checksum, secondary })
    }

    /// Recompute the covering of the stored geometry.
    ///
    /// An unreadable payload yields an empty set; the reconcile pass then
    /// removes whatever the old covering left behind.
    async fn previous_cells(
        &self,
        dataset: &str,
        current: &CanonicalRecord,
    ) -> Result<BTreeSet<CellId>> {
        let tokens = self.stored_tokens(dataset, current).await?.unwrap_or_default();
        Ok(cell_set(current.level, &tokens))
    }

    /// Covering tokens of a stored record's geometry, `None` when its
    /// payload cannot be read back
    async fn stored_tokens(
        &self,
        dataset: &str,
        record: &CanonicalRecord,
    ) -> Result<Option<Vec<String>>> {
        let bytes = match self.tier.resolve_locator(&record.locator).await {
            Ok(bytes) => bytes,
            Err(e @ CellstoreError::BlobNotFound { .. }) => {
                tracing::warn!(dataset = %dataset, primary = %record.primary, error = %e, "Stored payload missing");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let feature = match self.collaborators.codec.decode(&bytes) {
            Ok(feature) => feature,
            Err(e) => {
                tracing::warn!(dataset = %dataset, primary = %record.primary, error = %e, "Stored payload unreadable");
                return Ok(None);
            }
        };
        let params = self.settings.cover.for_level(record.level).index;
        self.collaborators.covering.indexes_for(&feature.geometry, &params).map(Some)
    }

    /// Derived rows a feature stored as `record` should have, keyed by row key
    fn expected_rows(
        &self,
        dataset: &str,
        record: &CanonicalRecord,
        tokens: &[String],
    ) -> BTreeMap<String, Item> {
        let payload =
            self.tier.cell_payload(&record.primary, &record.locator, self.settings.denormalize_cells);
        let mut rows: BTreeMap<String, Item> = cell_set(record.level, tokens)
            .iter()
            .map(|cell| {
                let item = cell_row(&record.primary, cell, payload.clone()).to_item(dataset);
                (item.key.clone(), item)
            })
            .collect();
        if let Some(secondary) = &record.secondary {
            let item = SecondaryRow { secondary: secondary.clone(), primary: record.primary.clone() }
                .to_item(dataset);
            rows.insert(item.key.clone(), item);
        }
        rows
    }

    /// Make the stored derived rows match the current canonical record.
    ///
    /// Starts from the record this writer committed. When a newer writer has
    /// committed since, its record is the target instead, so rows this writer
    /// landed late are still swept. A deleted record leaves no rows. The pass
    /// repeats while the canonical version keeps moving. Returns the record
    /// the rows now follow, `None` when the feature was deleted.
    async fn reconcile(
        &self,
        dataset: &str,
        record: &CanonicalRecord,
        tokens: &[String],
    ) -> Result<Option<CanonicalRecord>> {
        let primary = record.primary.as_str();
        let canonical = record.key();
        let mut target = Target::Record(record.clone(), tokens.to_vec());

        for _ in 0..RECONCILE_ROUNDS {
            let stored = self.discover(dataset, primary).await?;
            let current = match stored.iter().find(|item| item.key == canonical) {
                Some(item) => Some(CanonicalRecord::from_item(item)?),
                None => None,
            };
            target = self.retarget(dataset, target, current).await?;

            let mut missing = match &target {
                Target::Record(record, tokens) => self.expected_rows(dataset, record, tokens),
                Target::Deleted => BTreeMap::new(),
                Target::Unreadable(current) => {
                    tracing::warn!(dataset = %dataset, primary = %primary, version = %current.version, "Skipping reconcile, current covering unknown");
                    return Ok(Some(current.clone()));
                }
            };
            let mut stale = Vec::new();
            for item in stored {
                if item.key == canonical {
                    continue;
                }
                match missing.get(&item.key) {
                    Some(expected) if *expected == item => {
                        missing.remove(&item.key);
                    }
                    Some(_) => {}
                    None => stale.push(item.item_key()),
                }
            }

            if !missing.is_empty() || !stale.is_empty() {
                tracing::info!(
                    dataset = %dataset,
                    primary = %primary,
                    version = ?target.version(),
                    missing = missing.len(),
                    stale = stale.len(),
                    "Reconciling derived rows"
                );
            }
            self.writer.put_all(missing.into_values().collect()).await?;
            self.writer.delete_all(stale).await?;

            let after = self.tier.load_canonical(dataset, primary).await?;
            if after.map(|r| r.version) == target.version() {
                return Ok(target.into_record());
            }
        }

        tracing::warn!(dataset = %dataset, primary = %primary, "Record kept changing during reconcile");
        Ok(target.into_record())
    }

    /// What to reconcile against, given the canonical record stored now
    async fn retarget(
        &self,
        dataset: &str,
        target: Target,
        current: Option<CanonicalRecord>,
    ) -> Result<Target> {
        let Some(current) = current else {
            return Ok(Target::Deleted);
        };
        if target.version() == Some(current.version) {
            return Ok(target);
        }
        tracing::debug!(
            dataset = %dataset,
            primary = %current.primary,
            version = %current.version,
            "Reconciling against a newer record"
        );
        Ok(match self.stored_tokens(dataset, &current).await? {
            Some(tokens) => Target::Record(current, tokens),
            None => Target::Unreadable(current),
        })
    }

    /// Remove the blob an update wrote before losing the version race,
    /// unless the winner happens to reference the same key
    async fn discard_losing_payload(&self, dataset: &str, ours: &CanonicalRecord) {
        if ours.locator.blob_key().is_none() {
            return;
        }
        match self.tier.load_canonical(dataset, &ours.primary).await {
            Ok(Some(winner)) if winner.locator == ours.locator => {}
            Ok(_) => self.tier.remove(&ours.locator).await,
            Err(e) => {
                tracing::warn!(dataset = %dataset, primary = %ours.primary, error = %e, "Could not check winning record, keeping blob");
            }
        }
    }
}

/// The state a reconcile pass converges derived rows towards
enum Target {
    Record(CanonicalRecord, Vec<String>),
    Deleted,
    /// A record whose payload could not be read back
    Unreadable(CanonicalRecord),
}

impl Target {
    fn version(&self) -> Option<Version> {
        match self {
            Target::Record(record, _) | Target::Unreadable(record) => Some(record.version),
            Target::Deleted => None,
        }
    }

    fn into_record(self) -> Option<CanonicalRecord> {
        match self {
            Target::Record(record, _) | Target::Unreadable(record) => Some(record),
            Target::Deleted => None,
        }
    }
}

fn cell_row(primary: &str, cell: &CellId, geometry: GeometryRef) -> CellRow {
    CellRow {
        level: cell.level,
        token: cell.token.clone(),
        primary: primary.to_string(),
        geometry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellstore_core::models::Geometry;
    use cellstore_store::{MemoryBlobStore, MemoryIndexStore, MemoryMetadataStore};
    use std::sync::Arc;

    fn manager(settings: StoreSettings) -> (IndexManager, Arc<MemoryIndexStore>, Arc<MemoryBlobStore>) {
        let index = Arc::new(MemoryIndexStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let collaborators =
            Collaborators::new(index.clone(), blobs.clone(), Arc::new(MemoryMetadataStore::new()));
        (IndexManager::new(collaborators, settings), index, blobs)
    }

    fn square(x: f64, y: f64, size: f64) -> Geometry {
        Geometry::polygon(vec![vec![
            [x, y],
            [x + size, y],
            [x + size, y + size],
            [x, y + size],
            [x, y],
        ]])
    }

    #[tokio::test]
    async fn test_insert_writes_canonical_cells_and_secondary() {
        let (manager, index, _) = manager(StoreSettings::default());
        let feature = Feature::new(square(10.0, 10.0, 0.01)).with_property("id", "plot-1");

        let outcome = manager.insert("ds", feature).await.unwrap();
        assert_eq!(outcome.level, IndexLevel::Fine);
        assert!(outcome.cells >= 1 && outcome.cells <= 4);

        let rows = manager.discover("ds", &outcome.primary).await.unwrap();
        // canonical + cells + secondary
        assert_eq!(rows.len(), outcome.cells + 2);
        assert_eq!(index.item_count("ds"), outcome.cells + 2);
        assert!(rows.iter().any(|r| r.key == format!("usid!plot-1!{}", outcome.primary)));
    }

    #[tokio::test]
    async fn test_update_requires_existing_record() {
        let (manager, _, _) = manager(StoreSettings::default());
        let err = manager
            .update("ds", Feature::new(Geometry::point(1.0, 1.0)).with_id("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, CellstoreError::NotFound { .. }));

        let err = manager.update("ds", Feature::new(Geometry::point(1.0, 1.0))).await.unwrap_err();
        assert!(matches!(err, CellstoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_update_drops_old_secondary_row() {
        let (manager, _, _) = manager(StoreSettings::default());
        let feature = Feature::new(Geometry::point(1.0, 1.0)).with_id("a").with_property("id", "old");
        manager.insert("ds", feature).await.unwrap();

        let feature = Feature::new(Geometry::point(1.0, 1.0)).with_id("a").with_property("id", "new");
        manager.update("ds", feature).await.unwrap();

        let keys: Vec<String> =
            manager.discover("ds", "a").await.unwrap().into_iter().map(|i| i.key).collect();
        assert!(keys.contains(&"usid!new!a".to_string()));
        assert!(!keys.contains(&"usid!old!a".to_string()));
    }

    #[tokio::test]
    async fn test_update_replaces_blob() {
        let settings = StoreSettings { inline_threshold_bytes: 0, ..StoreSettings::default() };
        let (manager, _, blobs) = manager(settings);
        manager.insert("ds", Feature::new(Geometry::point(1.0, 1.0)).with_id("a")).await.unwrap();
        assert_eq!(blobs.len(), 1);

        let outcome =
            manager.update("ds", Feature::new(Geometry::point(2.0, 2.0)).with_id("a")).await.unwrap();
        assert_eq!(blobs.len(), 1);
        assert!(blobs.contains(&format!("features/ds/a/{}", outcome.version)));
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let settings = StoreSettings { inline_threshold_bytes: 0, ..StoreSettings::default() };
        let (manager, index, blobs) = manager(settings);
        manager
            .insert("ds", Feature::new(square(0.0, 0.0, 1.0)).with_id("a").with_property("id", "x"))
            .await
            .unwrap();

        assert!(manager.delete("ds", "a").await.unwrap());
        assert_eq!(index.item_count("ds"), 0);
        assert!(blobs.is_empty());
        assert!(!manager.delete("ds", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_ids_with_separator() {
        let (manager, _, _) = manager(StoreSettings::default());
        let err = manager
            .insert("ds", Feature::new(Geometry::point(0.0, 0.0)).with_id("a!b"))
            .await
            .unwrap_err();
        assert!(matches!(err, CellstoreError::Validation { .. }));

        let err = manager
            .insert("ds", Feature::new(Geometry::point(0.0, 0.0)).with_property("id", "x!y"))
            .await
            .unwrap_err();
        assert!(matches!(err, CellstoreError::Validation { .. }));
    }
}
