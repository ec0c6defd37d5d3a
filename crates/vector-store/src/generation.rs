use crate::error::{Result, VectorStoreError};
use crate::forest::AnnForest;
use crate::item_map::ItemMap;
use crate::metric::Metric;
use crate::types::{ItemId, Slot};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const INDEX_SCHEMA_VERSION: u32 = 1;

/// Written at the top of both persisted artifacts; the pair only loads when the
/// two headers are identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationHeader {
    pub schema_version: u32,
    pub generation: u64,
    pub dimension: usize,
    pub metric: Metric,
    pub slot_count: usize,
    pub built_at_unix_ms: u64,
}

impl GenerationHeader {
    #[must_use]
    pub fn fresh(dimension: usize, metric: Metric, slot_count: usize) -> Self {
        Self {
            schema_version: INDEX_SCHEMA_VERSION,
            generation: rand::random(),
            dimension,
            metric,
            slot_count,
            built_at_unix_ms: unix_now_ms(),
        }
    }
}

#[derive(Debug)]
struct BuiltIndex {
    header: GenerationHeader,
    forest: AnnForest,
    items: ItemMap,
}

/// One immutable build of the forest together with its item map.
///
/// Readers always hold the forest and the map of the same generation because
/// both live behind the same `Arc<IndexGeneration>`.
#[derive(Debug)]
pub struct IndexGeneration {
    dimension: usize,
    metric: Metric,
    built: Option<BuiltIndex>,
}

/// Serializable description of a generation for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub empty: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    pub dimension: usize,
    pub metric: Metric,
    pub item_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trees: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub built_at_unix_ms: Option<u64>,
}

impl IndexGeneration {
    #[must_use]
    pub const fn empty(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            built: None,
        }
    }

    /// Pairs a forest with its map after checking they describe the same slots.
    pub fn from_parts(header: GenerationHeader, forest: AnnForest, items: ItemMap) -> Result<Self> {
        if header.schema_version != INDEX_SCHEMA_VERSION {
            return Err(VectorStoreError::InconsistentState(format!(
                "unsupported index schema_version {} (expected {INDEX_SCHEMA_VERSION})",
                header.schema_version
            )));
        }
        if forest.dimension() != header.dimension || forest.metric() != header.metric {
            return Err(VectorStoreError::InconsistentState(format!(
                "forest is {}-d/{} but header says {}-d/{}",
                forest.dimension(),
                forest.metric(),
                header.dimension,
                header.metric
            )));
        }
        if forest.len() != header.slot_count || items.len() != header.slot_count {
            return Err(VectorStoreError::InconsistentState(format!(
                "slot count mismatch: header {}, forest {}, map {}",
                header.slot_count,
                forest.len(),
                items.len()
            )));
        }
        forest.validate()?;

        Ok(Self {
            dimension: header.dimension,
            metric: header.metric,
            built: Some(BuiltIndex {
                header,
                forest,
                items,
            }),
        })
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub const fn metric(&self) -> Metric {
        self.metric
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.built.is_none()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.built.as_ref().map_or(0, |b| b.items.len())
    }

    #[must_use]
    pub fn header(&self) -> Option<&GenerationHeader> {
        self.built.as_ref().map(|b| &b.header)
    }

    #[must_use]
    pub fn generation_id(&self) -> Option<u64> {
        self.header().map(|h| h.generation)
    }

    #[must_use]
    pub fn forest(&self) -> Option<&AnnForest> {
        self.built.as_ref().map(|b| &b.forest)
    }

    #[must_use]
    pub fn items(&self) -> Option<&ItemMap> {
        self.built.as_ref().map(|b| &b.items)
    }

    #[must_use]
    pub fn slot_of(&self, item: ItemId) -> Option<Slot> {
        self.items().and_then(|map| map.slot(item))
    }

    #[must_use]
    pub fn item_at(&self, slot: Slot) -> Option<ItemId> {
        self.items().and_then(|map| map.item(slot))
    }

    #[must_use]
    pub fn summary(&self) -> GenerationSummary {
        GenerationSummary {
            empty: self.is_empty(),
            generation: self.generation_id(),
            dimension: self.dimension,
            metric: self.metric,
            item_count: self.len(),
            trees: self.forest().map(AnnForest::tree_count),
            built_at_unix_ms: self.header().map(|h| h.built_at_unix_ms),
        }
    }
}

pub(crate) fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
