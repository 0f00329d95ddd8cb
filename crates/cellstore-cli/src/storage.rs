//! Local storage for CLI runs
//!
//! The index and metadata stores live in memory while a command runs and
//! are persisted as JSON snapshots in the data directory. Blobs are written
//! straight to `DATA_DIR/blobs`.

use anyhow::{Context, Result};
use cellstore_core::config::StoreSettings;
use cellstore_engine::{Collaborators, FeatureStore};
use cellstore_store::{
    FsBlobStore, IndexSnapshot, MemoryIndexStore, MemoryMetadataStore, MetadataSnapshot,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const INDEX_FILE: &str = "index.json";
const METADATA_FILE: &str = "metadata.json";
const BLOB_DIR: &str = "blobs";

/// A feature store backed by the data directory
pub struct Storage {
    data_dir: PathBuf,
    index: Arc<MemoryIndexStore>,
    metadata: Arc<MemoryMetadataStore>,
    pub store: FeatureStore,
}

impl Storage {
    /// Load the snapshots under `data_dir`, starting empty when absent
    pub fn open(data_dir: &Path, settings: StoreSettings) -> Result<Self> {
        let index_snapshot: IndexSnapshot = read_snapshot(&data_dir.join(INDEX_FILE))?;
        let metadata_snapshot: MetadataSnapshot = read_snapshot(&data_dir.join(METADATA_FILE))?;

        let index = Arc::new(MemoryIndexStore::from_snapshot(index_snapshot));
        let metadata = Arc::new(MemoryMetadataStore::from_snapshot(metadata_snapshot));
        let blobs = Arc::new(FsBlobStore::new(data_dir.join(BLOB_DIR)));

        let collaborators = Collaborators::new(index.clone(), blobs, metadata.clone());
        let store = FeatureStore::new(collaborators, settings)?;

        tracing::debug!(data_dir = %data_dir.display(), "Opened storage");
        Ok(Self { data_dir: data_dir.to_path_buf(), index, metadata, store })
    }

    /// Write both snapshots back to the data directory
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir).with_context(|| {
            format!("Failed to create data directory {}", self.data_dir.display())
        })?;
        write_snapshot(&self.data_dir.join(INDEX_FILE), &self.index.snapshot())?;
        write_snapshot(&self.data_dir.join(METADATA_FILE), &self.metadata.snapshot())?;
        Ok(())
    }
}

fn read_snapshot<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Write to a temporary file, then rename over the snapshot
fn write_snapshot<T: Serialize>(path: &Path, snapshot: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let content = serde_json::to_string(snapshot)?;
    fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
