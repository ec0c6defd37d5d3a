use crate::error::Result;
use crate::query::{Neighbor, QueryVector, SearchPhase, SearchPolicy, SimilarQuery, SimilarResult};
use similar_vector_store::{
    validate_vector, ActiveIndex, AnnForest, IndexGeneration, ItemId, SearchBudget, Slot,
    VectorCatalogReader,
};
use std::sync::Arc;

/// Answers "items similar to X" against whichever generation is active when
/// the query starts.
///
/// The generation is pinned once per query, so a rebuild published mid-query
/// never mixes slots from two structures.
pub struct SearchEngine {
    active: Arc<ActiveIndex>,
    catalog: Arc<dyn VectorCatalogReader>,
    policy: SearchPolicy,
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("active", &self.active)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SearchEngine {
    pub fn new(
        active: Arc<ActiveIndex>,
        catalog: Arc<dyn VectorCatalogReader>,
        policy: SearchPolicy,
    ) -> Self {
        Self {
            active,
            catalog,
            policy,
        }
    }

    #[must_use]
    pub fn active(&self) -> &Arc<ActiveIndex> {
        &self.active
    }

    #[must_use]
    pub const fn policy(&self) -> &SearchPolicy {
        &self.policy
    }

    /// Neighbor ids, nearest first. Empty when nothing usable is found.
    pub async fn find_similar(&self, item: ItemId, query: &SimilarQuery) -> Result<Vec<ItemId>> {
        Ok(self.find_similar_scored(item, query).await?.items())
    }

    /// Two-phase search: thresholded first, then an unthresholded top-k when
    /// the thresholded pass keeps fewer than `min_results` neighbors.
    pub async fn find_similar_scored(
        &self,
        item: ItemId,
        query: &SimilarQuery,
    ) -> Result<SimilarResult> {
        query.validate()?;

        let generation = self.active.current();
        let Some(forest) = generation.forest() else {
            log::debug!("Similarity query for {item} against an empty index");
            return Ok(SimilarResult::skipped(item, None));
        };

        let located = self.locate(&generation, item).await;
        if matches!(located, QueryVector::NotFound) {
            log::debug!("No usable vector for item {item}; returning no neighbors");
            return Ok(SimilarResult::skipped(item, generation.generation_id()));
        }

        let self_slot = match &located {
            QueryVector::FoundBySlot(slot) => Some(*slot),
            _ => None,
        };

        let n = self.policy.thresholded_candidates(query.k);
        let candidates = gather_candidates(forest, &located, n, self.policy.thresholded_budget());
        let thresholded: Vec<Neighbor> = resolve(&generation, item, self_slot, candidates)
            .filter(|n| n.distance < query.threshold)
            .take(query.k)
            .collect();

        if thresholded.len() >= query.min_results {
            log::debug!(
                "Item {item}: {} neighbors within threshold {}",
                thresholded.len(),
                query.threshold
            );
            return Ok(SimilarResult {
                query: item,
                phase: SearchPhase::Thresholded,
                generation: generation.generation_id(),
                neighbors: thresholded,
            });
        }

        log::debug!(
            "Item {item}: {} of {} required neighbors within threshold; falling back to top {}",
            thresholded.len(),
            query.min_results,
            query.k
        );
        let candidates = gather_candidates(
            forest,
            &located,
            query.k.saturating_add(1),
            SearchBudget::Default,
        );
        let fallback: Vec<Neighbor> = resolve(&generation, item, self_slot, candidates)
            .take(query.k)
            .collect();

        Ok(SimilarResult {
            query: item,
            phase: SearchPhase::Fallback,
            generation: generation.generation_id(),
            neighbors: fallback,
        })
    }

    /// Map lookup first, then the catalog.
    pub async fn locate(&self, generation: &IndexGeneration, item: ItemId) -> QueryVector {
        if let Some(slot) = generation.slot_of(item) {
            return QueryVector::FoundBySlot(slot);
        }
        match self.catalog.fetch_vector(item).await {
            Ok(Some(vector)) => match validate_vector(item, &vector, generation.dimension()) {
                Ok(()) => QueryVector::FoundByFetchedVector(vector),
                Err(err) => {
                    log::debug!("Catalog vector for {item} is unusable: {err}");
                    QueryVector::NotFound
                }
            },
            Ok(None) => QueryVector::NotFound,
            Err(err) => {
                log::warn!("Failed to fetch vector for item {item}: {err}");
                QueryVector::NotFound
            }
        }
    }
}

fn gather_candidates(
    forest: &AnnForest,
    located: &QueryVector,
    n: usize,
    budget: SearchBudget,
) -> Vec<(Slot, f32)> {
    match located {
        QueryVector::FoundBySlot(slot) => forest.nearest_by_slot(*slot, n, budget),
        QueryVector::FoundByFetchedVector(vector) => {
            match forest.nearest_by_vector(vector, n, budget) {
                Ok(found) => found,
                Err(err) => {
                    log::warn!("Vector search failed: {err}");
                    Vec::new()
                }
            }
        }
        QueryVector::NotFound => Vec::new(),
    }
}

/// Drops the query itself and slots without a map entry, in candidate order.
fn resolve<'a>(
    generation: &'a IndexGeneration,
    query: ItemId,
    self_slot: Option<Slot>,
    candidates: Vec<(Slot, f32)>,
) -> impl Iterator<Item = Neighbor> + 'a {
    candidates
        .into_iter()
        .filter(move |(slot, _)| Some(*slot) != self_slot)
        .filter_map(move |(slot, distance)| {
            generation
                .item_at(slot)
                .filter(|item| *item != query)
                .map(|item| Neighbor { item, distance })
        })
}
