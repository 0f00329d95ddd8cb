//! cellstore core - Domain models, ports, and configuration
//!
//! This crate contains the row model, key layout, error taxonomy and the port
//! traits that the index, blob and metadata adapters implement.

pub mod config;
pub mod error;
pub mod models;
pub mod ports;

pub use error::{CellstoreError, OperationError, OperationResult, Result};
