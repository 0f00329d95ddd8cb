//! Dataset inspection commands

use anyhow::Result;
use cellstore_core::models::feature_collection;

use crate::cli::DatasetArgs;
use crate::output::OutputWriter;
use crate::output_types::{format_bbox, CellRow, ItemRow};
use crate::storage::Storage;

pub async fn info(args: DatasetArgs, storage: &Storage, output: &OutputWriter) -> Result<()> {
    let info = storage.store.info(&args.dataset).await?;
    if output.is_json() {
        return output.result(info);
    }

    output.section(format!("Dataset '{}'", info.dataset));
    output.kv("Features", info.feature_count);
    output.kv("Bounds", info.bounds.as_ref().map(format_bbox).unwrap_or_else(|| "(empty)".into()));
    output.kv(
        "Updated",
        info.updated_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".into()),
    );
    Ok(())
}

pub async fn dump(args: DatasetArgs, storage: &Storage, output: &OutputWriter) -> Result<()> {
    let items = storage.store.dump(&args.dataset).await?;
    if output.is_json() {
        return output.result(items);
    }
    output.table(items.iter().map(ItemRow::from).collect())
}

pub async fn cells(args: DatasetArgs, storage: &Storage, output: &OutputWriter) -> Result<()> {
    let cells = storage.store.dump_cells(&args.dataset).await?;
    if output.is_json() {
        return output.data(&feature_collection(&cells)?);
    }
    output.table(cells.iter().map(CellRow::from).collect())
}
