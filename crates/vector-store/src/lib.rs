//! # Similar Vector Store
//!
//! Approximate nearest-neighbour storage for fixed-dimension item embeddings.
//!
//! ## Layout
//!
//! ```text
//! Catalog (VectorCatalogReader)
//!     │
//!     ├──> ForestBuilder ──> AnnForest ─┐
//!     │                                 ├──> IndexGeneration ──> IndexFiles (similar.ann.json + similar.map.json)
//!     └──> ItemMap (slot ↔ item id) ────┘            │
//!                                                    └──> ActiveIndex (atomic publish)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use similar_vector_store::{IndexFiles, Metric};
//!
//! #[tokio::main]
//! async fn main() {
//!     let files = IndexFiles::new(".similar");
//!     let generation = files.load_or_empty(512, Metric::Angular).await;
//!     println!("{} items indexed", generation.len());
//! }
//! ```

mod active;
mod catalog;
mod config;
mod error;
mod forest;
mod generation;
mod item_map;
mod lock;
mod metric;
mod persist;
mod types;

pub use active::ActiveIndex;
pub use catalog::{CatalogRecord, JsonFileCatalog, MemoryCatalog, VectorCatalogReader};
pub use config::{
    IndexSettings, RebuildSettings, SearchSettings, SimilarConfig, DEFAULT_CONFIG_FILE_NAME,
};
pub use error::{Result, VectorStoreError};
pub use forest::{AnnForest, ForestBuilder, ForestParams, SearchBudget};
pub use generation::{GenerationHeader, GenerationSummary, IndexGeneration, INDEX_SCHEMA_VERSION};
pub use item_map::ItemMap;
pub use lock::FileLock;
pub use metric::Metric;
pub use persist::{IndexFiles, INDEX_LOCK_FILE_NAME, ITEM_MAP_FILE_NAME, STRUCTURE_FILE_NAME};
pub use types::{validate_vector, CatalogEntry, EmbeddingVector, ItemId, Slot};
