use crate::error::{IndexerError, Result};
use serde::Serialize;
use similar_vector_store::{
    validate_vector, ForestBuilder, ForestParams, GenerationHeader, IndexFiles, IndexGeneration,
    IndexSettings, ItemMap, Metric, VectorCatalogReader, VectorStoreError,
};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSettings {
    pub dimension: usize,
    pub metric: Metric,
    pub forest: ForestParams,
}

impl From<&IndexSettings> for BuildSettings {
    fn from(settings: &IndexSettings) -> Self {
        Self {
            dimension: settings.dimension,
            metric: settings.metric,
            forest: settings.forest_params(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub item_count: usize,
    pub skipped_invalid: usize,
    pub skipped_duplicate: usize,
    pub empty: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    pub trees: usize,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub struct BuildOutput {
    pub generation: IndexGeneration,
    pub report: BuildReport,
}

/// Builds a fresh generation from a catalog snapshot and persists it.
///
/// The builder never publishes; callers decide when the returned generation
/// becomes active. Each build holds the index directory's writer lock from
/// enumeration through persistence, so builders in other processes pointed at
/// the same directory are turned away with [`IndexerError::AlreadyRunning`].
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    settings: BuildSettings,
    files: IndexFiles,
}

impl IndexBuilder {
    #[must_use]
    pub const fn new(settings: BuildSettings, files: IndexFiles) -> Self {
        Self { settings, files }
    }

    #[must_use]
    pub fn with_trees(mut self, trees: usize) -> Self {
        self.settings.forest.trees = trees;
        self
    }

    #[must_use]
    pub const fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    #[must_use]
    pub const fn files(&self) -> &IndexFiles {
        &self.files
    }

    pub async fn build(&self, source: &dyn VectorCatalogReader) -> Result<BuildOutput> {
        let started = Instant::now();
        let BuildSettings {
            dimension,
            metric,
            forest: params,
        } = self.settings;
        let mut report = BuildReport::default();

        let Some(_lock) = self.files.try_lock()? else {
            log::info!(
                "Another builder holds {}; skipping build",
                self.files.lock_path().display()
            );
            return Err(IndexerError::AlreadyRunning);
        };

        log::info!("Building {dimension}-d {metric} index from catalog");

        let entries = source
            .enumerate()
            .await
            .map_err(|e| IndexerError::BuildFailure(format!("catalog enumeration failed: {e}")))?;

        let mut items = ItemMap::new();
        let mut forest = ForestBuilder::new(dimension, metric);
        for entry in entries {
            if let Err(err) = validate_vector(entry.item, &entry.vector, dimension) {
                log::warn!("Skipping item {}: {err}", entry.item);
                report.skipped_invalid += 1;
                continue;
            }
            if items.contains(entry.item) {
                log::warn!(
                    "Skipping duplicate enumeration of item {}; keeping the first vector",
                    entry.item
                );
                report.skipped_duplicate += 1;
                continue;
            }
            let slot = items.push(entry.item)?;
            forest.add_item(slot, entry.vector)?;
        }

        if items.is_empty() {
            log::warn!("No valid embeddings in catalog; index will be empty");
            self.files.remove_all().await.map_err(|e| {
                IndexerError::BuildFailure(format!("failed to remove stale index files: {e}"))
            })?;
            report.empty = true;
            report.duration_ms = elapsed_ms(started);
            return Ok(BuildOutput {
                generation: IndexGeneration::empty(dimension, metric),
                report,
            });
        }

        log::info!(
            "Added {} items to the index. Building {} trees...",
            items.len(),
            params.trees
        );
        let forest = tokio::task::spawn_blocking(move || forest.build(params))
            .await
            .map_err(|e| IndexerError::BuildFailure(format!("forest construction panicked: {e}")))?;

        let header = GenerationHeader::fresh(dimension, metric, items.len());
        report.item_count = items.len();
        report.trees = forest.tree_count();
        report.generation = Some(header.generation);
        let generation = IndexGeneration::from_parts(header, forest, items)?;

        match self.files.save(&generation).await {
            Ok(()) => {}
            Err(VectorStoreError::PartiallyPublished { generation: id, source }) => {
                // The structure is committed; the next load finishes the map.
                log::warn!("Generation {id:016x} committed with its map pending: {source}");
            }
            Err(e) => {
                log::error!(
                    "Failed to persist index to {}: {e}",
                    self.files.dir().display()
                );
                return Err(IndexerError::BuildFailure(format!(
                    "failed to persist index: {e}"
                )));
            }
        }

        report.duration_ms = elapsed_ms(started);
        log::info!(
            "Index build complete: {} items, {} skipped, {}ms",
            report.item_count,
            report.skipped_invalid + report.skipped_duplicate,
            report.duration_ms
        );
        Ok(BuildOutput { generation, report })
    }
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
