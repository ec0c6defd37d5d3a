use crate::error::{Result, VectorStoreError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable catalog identifier of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ItemId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Dense position of a vector inside one index generation.
///
/// Slots are reassigned on every rebuild and must never be persisted outside
/// the generation that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slot(pub u32);

impl Slot {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub type EmbeddingVector = Vec<f32>;

/// One `(item, vector)` pair as enumerated by a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub item: ItemId,
    pub vector: EmbeddingVector,
}

impl CatalogEntry {
    pub fn new(item: impl Into<ItemId>, vector: EmbeddingVector) -> Self {
        Self {
            item: item.into(),
            vector,
        }
    }
}

/// Rejects vectors with the wrong number of components or non-finite values.
pub fn validate_vector(item: ItemId, vector: &[f32], dimension: usize) -> Result<()> {
    if vector.len() != dimension {
        return Err(VectorStoreError::InvalidVector {
            item,
            expected: dimension,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(VectorStoreError::InvalidVector {
            item,
            expected: dimension,
            actual: vector.len(),
        });
    }
    Ok(())
}
