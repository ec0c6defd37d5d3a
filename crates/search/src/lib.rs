//! # Similar Search
//!
//! Neighbor queries over the active similarity index.
//!
//! ```text
//! find_similar(item, k, threshold, min_results)
//!     │
//!     ├──> locate: ItemMap slot, else catalog vector, else empty
//!     │
//!     ├──> phase 1: factor·k+1 candidates, exhaustive, distance < threshold
//!     │
//!     └──> phase 2 (phase 1 kept < min_results): top k+1, no threshold
//! ```
//!
//! The phases are never merged; phase 2 replaces phase 1.

mod engine;
mod error;
mod query;

pub use engine::SearchEngine;
pub use error::{Result, SearchError};
pub use query::{Neighbor, QueryVector, SearchPhase, SearchPolicy, SimilarQuery, SimilarResult};
