//! Config command implementation

use anyhow::Result;
use cellstore_core::config::LayeredConfig;

use crate::output::OutputWriter;
use crate::output_types::ConfigRow;

pub fn execute(config: &LayeredConfig, output: &OutputWriter) -> Result<()> {
    // Surface invalid combinations before listing
    config.resolve()?;

    let mut rows: Vec<ConfigRow> = config
        .to_inspection_map()
        .into_iter()
        .map(|(key, (value, source))| ConfigRow { key, value, source: format!("{:?}", source) })
        .collect();
    rows.sort_by(|a, b| a.key.cmp(&b.key));

    output.table(rows)
}
