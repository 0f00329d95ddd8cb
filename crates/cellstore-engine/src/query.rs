//! Query Engine.
//!
//! Bounding-box queries read one key range per covering range at both index
//! levels, merge the rows by primary id, resolve each unique primary through
//! the tier store and keep the features that really touch the box. Range
//! reads and resolutions share the read concurrency cap.

use cellstore_core::config::StoreSettings;
use cellstore_core::error::{CellstoreError, Result};
use cellstore_core::models::keys::{
    canonical_prefix, cell_prefix, cell_range, secondary_prefix, validate_dataset, validate_id,
    validate_primary, RowKey,
};
use cellstore_core::models::{feature_collection, BBox, Feature, IndexLevel, Item, Row};
use cellstore_core::ports::{IndexStore, KeyCondition, PageRequest};
use cellstore_geo::models::GeometryExt;
use cellstore_geo::Cell;
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::collaborators::Collaborators;
use crate::fanout::fan_out;
use crate::merge::merge_rows;
use crate::tier::GeometryTierStore;

/// Read every page matching `condition`
pub async fn collect_pages(
    index: &dyn IndexStore,
    dataset: &str,
    condition: &KeyCondition,
) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    let mut page = PageRequest::default();
    loop {
        let result = index.query(dataset, condition, &page).await?;
        items.extend(result.items);
        match result.last_key {
            Some(key) => page = page.after(key),
            None => return Ok(items),
        }
    }
}

/// Read every row of a dataset
pub async fn scan_all(index: &dyn IndexStore, dataset: &str) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    let mut page = PageRequest::default();
    loop {
        let result = index.scan(dataset, &page).await?;
        items.extend(result.items);
        match result.last_key {
            Some(key) => page = page.after(key),
            None => return Ok(items),
        }
    }
}

/// Per-phase diagnostics for one query
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryTimings {
    /// Key ranges read
    pub ranges: usize,
    /// Rows returned by the range reads, before dedupe
    pub rows: usize,
    /// Unique primaries resolved
    pub candidates: usize,
    pub range_query_ms: f64,
    pub resolve_ms: f64,
}

/// One candidate that could not be turned into a feature
#[derive(Debug)]
pub struct ResolveFailure {
    /// Primary id, or the raw row key when the row itself is malformed
    pub primary: String,
    pub error: CellstoreError,
}

/// Features found by a query plus the candidates that failed
#[derive(Debug, Default)]
pub struct QueryResult {
    pub features: Vec<Feature>,
    pub failures: Vec<ResolveFailure>,
    pub timings: QueryTimings,
}

impl QueryResult {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn feature_collection(&self) -> Result<geojson::FeatureCollection> {
        feature_collection(&self.features)
    }
}

/// A page of features in canonical key order
#[derive(Debug, Default)]
pub struct FeaturePage {
    pub features: Vec<Feature>,
    pub failures: Vec<ResolveFailure>,
    /// Pass to the next `list` call; `None` when done
    pub last_key: Option<String>,
}

/// Executes bounding-box and identifier queries
pub struct QueryEngine {
    collaborators: Collaborators,
    tier: GeometryTierStore,
    settings: StoreSettings,
}

impl QueryEngine {
    pub fn new(collaborators: Collaborators, settings: StoreSettings) -> Self {
        let tier = GeometryTierStore::new(
            collaborators.index.clone(),
            collaborators.blobs.clone(),
            settings.inline_threshold_bytes,
            settings.blob_prefix.clone(),
        );
        Self { collaborators, tier, settings }
    }

    /// Every feature whose geometry touches `bbox`, each exactly once
    pub async fn bbox(&self, dataset: &str, bbox: &BBox) -> Result<QueryResult> {
        validate_dataset(dataset)?;
        let started = Instant::now();

        let mut conditions = Vec::new();
        for level in IndexLevel::ALL {
            let params = self.settings.cover.for_level(level);
            let ranges =
                self.collaborators.covering.query_ranges_for(bbox, &params.query, &params.index)?;
            for range in ranges {
                let (start, end) = cell_range(level, &range.start, &range.end);
                conditions.push(KeyCondition::Between { start, end });
            }
        }
        let range_count = conditions.len();

        let index = self.collaborators.index.as_ref();
        let pages = fan_out(conditions, self.settings.read_concurrency, |condition| async move {
            collect_pages(index, dataset, &condition).await
        })
        .await
        .into_result()?;
        let items: Vec<Item> = pages.into_iter().flatten().collect();
        let row_count = items.len();
        let range_query = started.elapsed();

        let (rows, mut failures) = parse_rows(items);
        let candidates = merge_rows(rows);
        let candidate_count = candidates.len();

        let resolve_started = Instant::now();
        let (resolved, resolve_failures) = self.resolve_rows(dataset, candidates).await;
        failures.extend(resolve_failures);
        let features: Vec<Feature> =
            resolved.into_iter().filter(|f| f.geometry.intersects_bbox(bbox)).collect();
        let resolve = resolve_started.elapsed();

        tracing::info!(
            dataset = %dataset,
            ranges = range_count,
            rows = row_count,
            candidates = candidate_count,
            matched = features.len(),
            failed = failures.len(),
            range_query_ms = millis(range_query),
            resolve_ms = millis(resolve),
            "Bbox query complete"
        );

        Ok(QueryResult {
            features,
            failures,
            timings: QueryTimings {
                ranges: range_count,
                rows: row_count,
                candidates: candidate_count,
                range_query_ms: millis(range_query),
                resolve_ms: millis(resolve),
            },
        })
    }

    /// Features declaring `secondary` as their secondary id
    pub async fn by_secondary(&self, dataset: &str, secondary: &str) -> Result<QueryResult> {
        validate_dataset(dataset)?;
        validate_id("secondary_id", secondary)?;
        let started = Instant::now();

        let condition = KeyCondition::BeginsWith(secondary_prefix(secondary));
        let items = collect_pages(self.collaborators.index.as_ref(), dataset, &condition).await?;
        let row_count = items.len();
        let range_query = started.elapsed();

        let (rows, mut failures) = parse_rows(items);
        let candidates = merge_rows(rows);
        let candidate_count = candidates.len();

        let resolve_started = Instant::now();
        let (features, resolve_failures) = self.resolve_rows(dataset, candidates).await;
        failures.extend(resolve_failures);

        tracing::debug!(
            dataset = %dataset,
            secondary = %secondary,
            matched = features.len(),
            "Secondary id query complete"
        );

        Ok(QueryResult {
            features,
            failures,
            timings: QueryTimings {
                ranges: 1,
                rows: row_count,
                candidates: candidate_count,
                range_query_ms: millis(range_query),
                resolve_ms: millis(resolve_started.elapsed()),
            },
        })
    }

    /// The feature stored under `primary`, if any
    pub async fn get_by_id(&self, dataset: &str, primary: &str) -> Result<Option<Feature>> {
        validate_dataset(dataset)?;
        validate_primary(primary)?;
        let Some(record) = self.tier.load_canonical(dataset, primary).await? else {
            return Ok(None);
        };
        let bytes = self.tier.resolve_locator(&record.locator).await?;
        let mut feature = self.collaborators.codec.decode(&bytes)?;
        feature.id = Some(record.primary);
        Ok(Some(feature))
    }

    /// One page of features in primary id order
    pub async fn list(&self, dataset: &str, page: &PageRequest) -> Result<FeaturePage> {
        validate_dataset(dataset)?;
        let condition = KeyCondition::BeginsWith(canonical_prefix());
        let result = self.collaborators.index.query(dataset, &condition, page).await?;
        let (rows, mut failures) = parse_rows(result.items);
        let (features, resolve_failures) = self.resolve_rows(dataset, rows).await;
        failures.extend(resolve_failures);
        Ok(FeaturePage { features, failures, last_key: result.last_key })
    }

    /// Every feature of a dataset
    pub async fn export(&self, dataset: &str) -> Result<QueryResult> {
        validate_dataset(dataset)?;
        let started = Instant::now();
        let condition = KeyCondition::BeginsWith(canonical_prefix());
        let items = collect_pages(self.collaborators.index.as_ref(), dataset, &condition).await?;
        let row_count = items.len();
        let range_query = started.elapsed();

        let (rows, mut failures) = parse_rows(items);
        let resolve_started = Instant::now();
        let (features, resolve_failures) = self.resolve_rows(dataset, rows).await;
        failures.extend(resolve_failures);

        tracing::info!(dataset = %dataset, features = features.len(), "Exported dataset");
        Ok(QueryResult {
            features,
            failures,
            timings: QueryTimings {
                ranges: 1,
                rows: row_count,
                candidates: row_count,
                range_query_ms: millis(range_query),
                resolve_ms: millis(resolve_started.elapsed()),
            },
        })
    }

    /// Every raw row of a dataset in key order
    pub async fn dump(&self, dataset: &str) -> Result<Vec<Item>> {
        validate_dataset(dataset)?;
        scan_all(self.collaborators.index.as_ref(), dataset).await
    }

    /// Each indexed cell as a polygon feature carrying its row key
    pub async fn dump_cells(&self, dataset: &str) -> Result<Vec<Feature>> {
        validate_dataset(dataset)?;
        let index = self.collaborators.index.as_ref();
        let mut features = Vec::new();
        for level in IndexLevel::ALL {
            let condition = KeyCondition::BeginsWith(cell_prefix(level));
            for item in collect_pages(index, dataset, &condition).await? {
                let Some(RowKey::Cell { level, token, primary }) = RowKey::parse(&item.key) else {
                    tracing::warn!(dataset = %dataset, key = %item.key, "Skipping malformed cell key");
                    continue;
                };
                let cell = Cell::from_token(&token)?;
                features.push(
                    Feature::new(cell.to_geometry())
                        .with_property("key", item.key.clone())
                        .with_property("level", level.as_u8())
                        .with_property("cell_level", cell.level())
                        .with_property("token", token)
                        .with_property("primary", primary),
                );
            }
        }
        Ok(features)
    }

    /// Resolve and decode rows, reporting failures per row.
    ///
    /// Rows whose feature disappeared mid-query are dropped silently.
    async fn resolve_rows(
        &self,
        dataset: &str,
        rows: Vec<Row>,
    ) -> (Vec<Feature>, Vec<ResolveFailure>) {
        let primaries: Vec<String> = rows.iter().map(|r| r.primary().to_string()).collect();
        let outcome = fan_out(rows, self.settings.read_concurrency, |row| {
            self.resolve_row(dataset, row)
        })
        .await;

        let features = outcome.results.into_iter().flatten().collect();
        let failures = outcome
            .errors
            .into_iter()
            .map(|(position, error)| {
                tracing::warn!(dataset = %dataset, primary = %primaries[position], error = %error, "Failed to resolve feature");
                ResolveFailure { primary: primaries[position].clone(), error }
            })
            .collect();
        (features, failures)
    }

    async fn resolve_row(&self, dataset: &str, row: Row) -> Result<Option<Feature>> {
        let bytes = match self.tier.resolve(dataset, &row.geometry_ref()).await {
            Ok(bytes) => bytes,
            Err(CellstoreError::NotFound { .. }) => {
                tracing::debug!(dataset = %dataset, primary = %row.primary(), "Feature vanished during query");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let mut feature = self.collaborators.codec.decode(&bytes)?;
        feature.id = Some(row.primary().to_string());
        Ok(Some(feature))
    }
}

/// Decode items into rows; malformed ones become failures
fn parse_rows(items: Vec<Item>) -> (Vec<Row>, Vec<ResolveFailure>) {
    let mut rows = Vec::with_capacity(items.len());
    let mut failures = Vec::new();
    for item in items {
        match Row::from_item(&item) {
            Ok(row) => rows.push(row),
            Err(error) => failures.push(ResolveFailure {
                primary: item.primary().map(str::to_string).unwrap_or(item.key),
                error,
            }),
        }
    }
    (rows, failures)
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
