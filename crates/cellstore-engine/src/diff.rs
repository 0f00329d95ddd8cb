use cellstore_core::models::IndexLevel;
use std::collections::BTreeSet;

/// One index cell: level plus token
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    pub level: IndexLevel,
    pub token: String,
}

impl CellId {
    pub fn new(level: IndexLevel, token: impl Into<String>) -> Self {
        Self { level, token: token.into() }
    }
}

/// Build the cell set for one covering
pub fn cell_set(level: IndexLevel, tokens: &[String]) -> BTreeSet<CellId> {
    tokens.iter().map(|t| CellId::new(level, t.clone())).collect()
}

/// Partition of an old and a new covering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoveringDiff {
    /// Only in the new covering
    pub added: Vec<CellId>,
    /// Only in the old covering
    pub removed: Vec<CellId>,
    /// In both
    pub retained: Vec<CellId>,
}

impl CoveringDiff {
    pub fn between(old: &BTreeSet<CellId>, new: &BTreeSet<CellId>) -> Self {
        Self {
            added: new.difference(old).cloned().collect(),
            removed: old.difference(new).cloned().collect(),
            retained: old.intersection(new).cloned().collect(),
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
