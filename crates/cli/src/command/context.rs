use anyhow::Result;
use similar_indexer::{
    BuildSettings, IndexBuilder, JsonFileStalenessRepository, RebuildScheduler, StalenessTracker,
};
use similar_search::{SearchEngine, SearchPolicy};
use similar_vector_store::{ActiveIndex, IndexFiles, JsonFileCatalog, SimilarConfig};
use std::sync::Arc;

/// Wiring shared by every command, derived from one loaded configuration.
pub struct CommandContext {
    config: SimilarConfig,
}

impl CommandContext {
    pub fn new(config: SimilarConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &SimilarConfig {
        &self.config
    }

    pub fn files(&self) -> IndexFiles {
        IndexFiles::new(&self.config.index.dir)
    }

    pub fn catalog(&self) -> Arc<JsonFileCatalog> {
        Arc::new(JsonFileCatalog::new(&self.config.rebuild.catalog_path))
    }

    pub fn tracker(&self) -> Arc<StalenessTracker> {
        Arc::new(StalenessTracker::new(Arc::new(
            JsonFileStalenessRepository::in_dir(&self.config.index.dir),
        )))
    }

    /// The persisted generation, or an empty one when nothing usable is on disk.
    pub async fn load_active(&self) -> Arc<ActiveIndex> {
        let generation = self
            .files()
            .load_or_empty(self.config.index.dimension, self.config.index.metric)
            .await;
        Arc::new(ActiveIndex::new(generation))
    }

    pub fn scheduler(
        &self,
        active: Arc<ActiveIndex>,
        tracker: Arc<StalenessTracker>,
        trees: Option<usize>,
    ) -> RebuildScheduler {
        let mut builder =
            IndexBuilder::new(BuildSettings::from(&self.config.index), self.files());
        if let Some(trees) = trees {
            builder = builder.with_trees(trees);
        }
        RebuildScheduler::new(builder, self.catalog(), tracker, active)
    }

    pub fn engine(&self, active: Arc<ActiveIndex>) -> SearchEngine {
        SearchEngine::new(
            active,
            self.catalog(),
            SearchPolicy::from(&self.config.search),
        )
    }

    pub fn validate_trees(trees: Option<usize>) -> Result<()> {
        if trees == Some(0) {
            anyhow::bail!("--trees must be at least 1");
        }
        Ok(())
    }
}
