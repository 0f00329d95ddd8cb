//! Read commands returning features

use anyhow::Result;
use cellstore_core::models::{feature_collection, BBox, Feature};
use cellstore_engine::{QueryResult, ResolveFailure};

use crate::cli::{BboxArgs, DatasetArgs, IdArgs};
use crate::output::OutputWriter;
use crate::output_types::FeatureRow;
use crate::storage::Storage;

pub async fn get(args: IdArgs, storage: &Storage, output: &OutputWriter) -> Result<()> {
    let found = storage.store.get_feature(&args.dataset.dataset, &args.id).await?;
    if output.is_json() {
        let features: Vec<Feature> = found.into_iter().collect();
        return output.data(&feature_collection(&features)?);
    }
    match found {
        Some(feature) => show_feature(&feature, output),
        None => {
            output.info(format!("No feature '{}' in '{}'", args.id, args.dataset.dataset));
            Ok(())
        }
    }
}

pub async fn find(args: IdArgs, storage: &Storage, output: &OutputWriter) -> Result<()> {
    let collection = storage.store.get_by_secondary_id(&args.dataset.dataset, &args.id).await?;
    if output.is_json() {
        return output.data(&collection);
    }
    let features = collection
        .features
        .into_iter()
        .map(Feature::from_geojson)
        .collect::<cellstore_core::Result<Vec<_>>>()?;
    output.table(features.iter().map(FeatureRow::from).collect())
}

pub async fn bbox(args: BboxArgs, storage: &Storage, output: &OutputWriter) -> Result<()> {
    let bbox = BBox::new(args.west, args.south, args.east, args.north)?;
    let result = storage.store.bbox_query(&args.dataset.dataset, &bbox).await?;
    show_result(result, output)
}

pub async fn export(args: DatasetArgs, storage: &Storage, output: &OutputWriter) -> Result<()> {
    let result = storage.store.export(&args.dataset).await?;
    show_result(result, output)
}

fn show_feature(feature: &Feature, output: &OutputWriter) -> Result<()> {
    let row = FeatureRow::from(feature);
    output.kv("ID", &row.id);
    output.kv("Geometry", &row.geometry);
    output.kv("Bounds", &row.bounds);
    if !feature.properties.is_empty() {
        output.section("Properties");
        for (key, value) in &feature.properties {
            output.kv(key, value);
        }
    }
    Ok(())
}

/// GeoJSON in JSON mode, with timings and failures as foreign members
fn show_result(result: QueryResult, output: &OutputWriter) -> Result<()> {
    for failure in &result.failures {
        output.warning(format!("Could not resolve '{}': {}", failure.primary, failure.error));
    }

    if output.is_json() {
        let mut collection = result.feature_collection()?;
        let mut members = serde_json::Map::new();
        members.insert("timings".to_string(), serde_json::to_value(&result.timings)?);
        members.insert("failures".to_string(), failures_json(&result.failures));
        collection.foreign_members = Some(members);
        return output.data(&collection);
    }

    output.table(result.features.iter().map(FeatureRow::from).collect())?;
    output.section("Query");
    output.kv("Features", result.features.len());
    output.kv("Failures", result.failures.len());
    output.kv("Ranges", result.timings.ranges);
    output.kv("Rows", result.timings.rows);
    output.kv("Candidates", result.timings.candidates);
    output.kv(
        "Time",
        format!(
            "{:.2} ms range reads, {:.2} ms resolve",
            result.timings.range_query_ms, result.timings.resolve_ms
        ),
    );
    Ok(())
}

fn failures_json(failures: &[ResolveFailure]) -> serde_json::Value {
    failures
        .iter()
        .map(|f| {
            serde_json::json!({
                "id": f.primary,
                "error": f.error.to_string(),
                "retryable": f.error.is_retryable(),
            })
        })
        .collect()
}
