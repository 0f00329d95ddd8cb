use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// cellstore - Geospatial feature store over an ordered key-value index
#[derive(Parser, Debug)]
#[command(name = "cellstore")]
#[command(about = "Geospatial feature store with cell-covering bbox queries", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Directory holding the index snapshot and blobs
    #[arg(long, global = true, default_value = ".cellstore")]
    pub data_dir: PathBuf,

    /// Configuration file (defaults to DATA_DIR/config.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output results in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Inline threshold in bytes; larger geometries go to the blob store
    #[arg(long, global = true)]
    pub inline_threshold: Option<usize>,

    /// Concurrent reads per query
    #[arg(long, global = true)]
    pub read_concurrency: Option<usize>,

    /// Concurrent batch writes per operation
    #[arg(long, global = true)]
    pub write_concurrency: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Insert or replace features from a GeoJSON file
    Put(PutArgs),

    /// Fetch a feature by primary id
    Get(IdArgs),

    /// Find features by secondary id
    Find(IdArgs),

    /// Delete a feature by primary id
    Delete(IdArgs),

    /// Query features intersecting a bounding box
    Bbox(BboxArgs),

    /// Show dataset bounds and feature count
    Info(DatasetArgs),

    /// Export every feature of a dataset
    Export(DatasetArgs),

    /// Dump the raw index rows of a dataset
    Dump(DatasetArgs),

    /// Show the indexed cells of a dataset as polygons
    Cells(DatasetArgs),

    /// Show the resolved configuration and where each value came from
    Config,
}

#[derive(Args, Debug)]
pub struct DatasetArgs {
    /// Dataset name
    #[arg(short, long)]
    pub dataset: String,
}

#[derive(Parser, Debug)]
pub struct PutArgs {
    /// GeoJSON file holding a Feature or a FeatureCollection
    pub file: PathBuf,

    #[command(flatten)]
    pub dataset: DatasetArgs,
}

#[derive(Parser, Debug)]
pub struct IdArgs {
    /// Feature id
    pub id: String,

    #[command(flatten)]
    pub dataset: DatasetArgs,
}

#[derive(Parser, Debug)]
pub struct BboxArgs {
    /// West longitude
    #[arg(allow_negative_numbers = true)]
    pub west: f64,

    /// South latitude
    #[arg(allow_negative_numbers = true)]
    pub south: f64,

    /// East longitude
    #[arg(allow_negative_numbers = true)]
    pub east: f64,

    /// North latitude
    #[arg(allow_negative_numbers = true)]
    pub north: f64,

    #[command(flatten)]
    pub dataset: DatasetArgs,
}
