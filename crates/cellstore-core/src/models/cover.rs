//! Covering parameters per index level.

use serde::{Deserialize, Serialize};

use super::keys::IndexLevel;

/// Bounds on a uniform-level cell covering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelParams {
    /// Coarsest cell level allowed. Lower = larger cells.
    pub min_level: u8,

    /// Finest cell level allowed. Higher = smaller cells.
    pub max_level: u8,

    /// Refinement stops before a covering would exceed this many cells.
    /// The `min_level` covering is kept even when it is larger.
    pub max_cells: usize,
}

impl LevelParams {
    pub const fn new(min_level: u8, max_level: u8, max_cells: usize) -> Self {
        Self { min_level, max_level, max_cells }
    }
}

/// Parameters for indexing features and for querying at one index level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverParams {
    pub index: LevelParams,
    pub query: LevelParams,
}

/// Covering parameters for both index levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverOptions {
    pub coarse: CoverParams,
    pub fine: CoverParams,
}

impl Default for CoverOptions {
    fn default() -> Self {
        Self {
            coarse: CoverParams {
                index: LevelParams::new(2, 10, 4),
                query: LevelParams::new(1, 10, 16),
            },
            fine: CoverParams {
                index: LevelParams::new(8, 18, 4),
                query: LevelParams::new(1, 18, 32),
            },
        }
    }
}

impl CoverOptions {
    pub fn for_level(&self, level: IndexLevel) -> &CoverParams {
        match level {
            IndexLevel::Coarse => &self.coarse,
            IndexLevel::Fine => &self.fine,
        }
    }
}
