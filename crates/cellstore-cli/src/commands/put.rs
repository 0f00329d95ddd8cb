//! Write commands: put and delete

use anyhow::{bail, Context, Result};
use cellstore_core::models::Feature;
use geojson::GeoJson;
use std::fs;
use std::path::Path;

use crate::cli::{IdArgs, PutArgs};
use crate::output::OutputWriter;
use crate::output_types::PutRow;
use crate::storage::Storage;

pub async fn execute(args: PutArgs, storage: &Storage, output: &OutputWriter) -> Result<()> {
    let features = read_features(&args.file)?;
    let dataset = &args.dataset.dataset;

    let mut rows = Vec::with_capacity(features.len());
    let mut failure = None;
    for feature in features {
        match storage.store.put(dataset, feature).await {
            Ok(outcome) => rows.push(PutRow::from(outcome)),
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    // Persist whatever landed before reporting a failure
    storage.save()?;
    if let Some(err) = failure {
        if !rows.is_empty() {
            output.warning(format!("{} feature(s) written before the failure", rows.len()));
        }
        return Err(err.into());
    }

    if !output.is_json() {
        output.success(format!("Stored {} feature(s) in '{}'", rows.len(), dataset));
    }
    output.table(rows)
}

pub async fn delete(args: IdArgs, storage: &Storage, output: &OutputWriter) -> Result<()> {
    let dataset = &args.dataset.dataset;
    let removed = storage.store.delete(dataset, &args.id).await?;
    storage.save()?;

    if output.is_json() {
        output.result(serde_json::json!({ "id": args.id, "deleted": removed }))
    } else {
        if removed {
            output.success(format!("Deleted '{}' from '{}'", args.id, dataset));
        } else {
            output.info(format!("No feature '{}' in '{}'", args.id, dataset));
        }
        Ok(())
    }
}

/// Features from a GeoJSON Feature or FeatureCollection file
fn read_features(path: &Path) -> Result<Vec<Feature>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let geojson: GeoJson =
        content.parse().with_context(|| format!("Failed to parse GeoJSON in {}", path.display()))?;

    let features = match geojson {
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Geometry(_) => bail!("Expected a Feature or FeatureCollection, found a bare geometry"),
    };

    features
        .into_iter()
        .enumerate()
        .map(|(i, f)| Feature::from_geojson(f).with_context(|| format!("Invalid feature at index {}", i)))
        .collect()
}
