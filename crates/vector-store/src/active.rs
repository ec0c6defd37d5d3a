use crate::generation::IndexGeneration;
use crate::metric::Metric;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// The single published generation shared by the rebuild path and all readers.
///
/// Publishing is one pointer swap. A reader that called [`ActiveIndex::current`]
/// keeps its generation alive until it drops the `Arc`, so in-flight queries
/// finish against the generation they started with.
#[derive(Debug)]
pub struct ActiveIndex {
    current: ArcSwap<IndexGeneration>,
}

impl ActiveIndex {
    #[must_use]
    pub fn new(generation: IndexGeneration) -> Self {
        Self {
            current: ArcSwap::from_pointee(generation),
        }
    }

    #[must_use]
    pub fn empty(dimension: usize, metric: Metric) -> Self {
        Self::new(IndexGeneration::empty(dimension, metric))
    }

    #[must_use]
    pub fn current(&self) -> Arc<IndexGeneration> {
        self.current.load_full()
    }

    /// Replaces the active generation and returns the one it superseded.
    pub fn publish(&self, generation: IndexGeneration) -> Arc<IndexGeneration> {
        let next = Arc::new(generation);
        log::info!(
            "Publishing index generation {} with {} items",
            next.generation_id()
                .map_or_else(|| "<empty>".to_string(), |id| format!("{id:016x}")),
            next.len()
        );
        self.current.swap(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_keep_their_generation_after_publish() {
        let active = ActiveIndex::empty(3, Metric::Angular);
        let before = active.current();
        let previous = active.publish(IndexGeneration::empty(3, Metric::Euclidean));

        assert!(Arc::ptr_eq(&before, &previous));
        assert_eq!(before.metric(), Metric::Angular);
        assert_eq!(active.current().metric(), Metric::Euclidean);
    }
}
