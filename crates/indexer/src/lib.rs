//! # Similar Indexer
//!
//! Builds, persists and republishes the similarity index.
//!
//! ## Rebuild cycle
//!
//! ```text
//! Catalog change
//!     │
//!     ├──> StalenessTracker::mark_stale   (idempotent flag)
//!     │
//! RebuildWatcher tick (every interval)
//!     │
//!     └──> RebuildScheduler::maybe_rebuild
//!            ├─> is_stale? no  ──> NotNeeded
//!            └─> IndexBuilder::build ──> IndexFiles::save
//!                   └─> ActiveIndex::publish ──> clear flag
//! ```
//!
//! A failed build keeps both the previous generation and the flag, so the
//! next tick retries.
//!
//! ## Example
//!
//! ```no_run
//! use similar_indexer::{
//!     BuildSettings, IndexBuilder, JsonFileStalenessRepository, RebuildScheduler,
//!     StalenessTracker,
//! };
//! use similar_vector_store::{ActiveIndex, IndexFiles, JsonFileCatalog, SimilarConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SimilarConfig::load(None)?;
//!     let files = IndexFiles::new(&config.index.dir);
//!     let builder = IndexBuilder::new(BuildSettings::from(&config.index), files);
//!     let tracker = Arc::new(StalenessTracker::new(Arc::new(
//!         JsonFileStalenessRepository::in_dir(&config.index.dir),
//!     )));
//!     let active = Arc::new(ActiveIndex::empty(config.index.dimension, config.index.metric));
//!     let catalog = Arc::new(JsonFileCatalog::new(&config.rebuild.catalog_path));
//!
//!     let scheduler = RebuildScheduler::new(builder, catalog, tracker, active);
//!     println!("{:?}", scheduler.maybe_rebuild().await);
//!     Ok(())
//! }
//! ```

mod builder;
mod error;
mod scheduler;
mod staleness;
mod watcher;

pub use builder::{BuildOutput, BuildReport, BuildSettings, IndexBuilder};
pub use error::{IndexerError, Result};
pub use scheduler::{
    IndexStatus, IndexUpdate, RebuildOutcome, RebuildPhase, RebuildScheduler, SchedulerHealth,
};
pub use staleness::{
    JsonFileStalenessRepository, MemoryStalenessRepository, RebuildTicket, StalenessRecord,
    StalenessRepository, StalenessTracker, STALENESS_FILE_NAME,
};
pub use watcher::{CatalogWatcher, RebuildWatcher};
