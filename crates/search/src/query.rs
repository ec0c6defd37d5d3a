use crate::error::{Result, SearchError};
use serde::Serialize;
use similar_vector_store::{EmbeddingVector, ItemId, SearchBudget, SearchSettings, Slot};

/// Per-call query arguments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarQuery {
    pub k: usize,
    pub threshold: f32,
    pub min_results: usize,
}

impl SimilarQuery {
    #[must_use]
    pub const fn new(k: usize, threshold: f32, min_results: usize) -> Self {
        Self {
            k,
            threshold,
            min_results,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(SearchError::InvalidQuery("k must be at least 1".into()));
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(SearchError::InvalidQuery(format!(
                "threshold must be a non-negative number (got {})",
                self.threshold
            )));
        }
        Ok(())
    }
}

impl From<&SearchSettings> for SimilarQuery {
    fn from(settings: &SearchSettings) -> Self {
        Self::new(settings.k, settings.threshold, settings.min_results)
    }
}

/// Engine-wide tuning for the thresholded phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchPolicy {
    /// Phase 1 asks the forest for `overfetch_factor * k + 1` candidates.
    pub overfetch_factor: usize,
    /// Visit the whole forest in phase 1 instead of stopping early.
    pub exhaustive: bool,
}

impl Default for SearchPolicy {
    fn default() -> Self {
        Self::from(&SearchSettings::default())
    }
}

impl From<&SearchSettings> for SearchPolicy {
    fn from(settings: &SearchSettings) -> Self {
        Self {
            overfetch_factor: settings.overfetch_factor.max(1),
            exhaustive: settings.exhaustive,
        }
    }
}

impl SearchPolicy {
    pub(crate) fn thresholded_candidates(&self, k: usize) -> usize {
        self.overfetch_factor.saturating_mul(k).saturating_add(1)
    }

    pub(crate) const fn thresholded_budget(&self) -> SearchBudget {
        if self.exhaustive {
            SearchBudget::Exhaustive
        } else {
            SearchBudget::Default
        }
    }
}

/// Where the query's own vector came from.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryVector {
    /// The item is indexed; search from its stored vector.
    FoundBySlot(Slot),
    /// The item is not indexed but the catalog has a usable vector for it.
    FoundByFetchedVector(EmbeddingVector),
    NotFound,
}

/// Which phase produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    Thresholded,
    Fallback,
    /// Empty index, or no usable vector for the query item.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub item: ItemId,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarResult {
    pub query: ItemId,
    pub phase: SearchPhase,
    /// Generation the neighbors were drawn from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    pub neighbors: Vec<Neighbor>,
}

impl SimilarResult {
    pub(crate) const fn skipped(query: ItemId, generation: Option<u64>) -> Self {
        Self {
            query,
            phase: SearchPhase::Skipped,
            generation,
            neighbors: Vec::new(),
        }
    }

    #[must_use]
    pub fn items(&self) -> Vec<ItemId> {
        self.neighbors.iter().map(|n| n.item).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_bad_arguments() {
        assert!(SimilarQuery::new(10, 0.9, 3).validate().is_ok());
        assert!(SimilarQuery::new(1, 0.0, 0).validate().is_ok());
        assert!(SimilarQuery::new(0, 0.9, 3).validate().is_err());
        assert!(SimilarQuery::new(5, -0.1, 3).validate().is_err());
        assert!(SimilarQuery::new(5, f32::INFINITY, 3).validate().is_err());
    }

    #[test]
    fn default_policy_overfetches_five_times_exhaustively() {
        let policy = SearchPolicy::default();
        assert_eq!(policy.thresholded_candidates(10), 51);
        assert_eq!(policy.thresholded_budget(), SearchBudget::Exhaustive);

        let quick = SearchPolicy {
            overfetch_factor: 2,
            exhaustive: false,
        };
        assert_eq!(quick.thresholded_candidates(4), 9);
        assert_eq!(quick.thresholded_budget(), SearchBudget::Default);
    }
}
