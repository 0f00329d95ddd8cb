//! cellstore store - adapters for the storage ports
//!
//! This crate provides in-memory implementations of the index, blob and
//! metadata ports plus a filesystem blob store.

pub mod fs;
pub mod memory;

pub use fs::FsBlobStore;
pub use memory::{
    IndexSnapshot, MemoryBlobStore, MemoryIndexStore, MemoryMetadataStore, MetadataSnapshot,
};
