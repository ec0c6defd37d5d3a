use crate::types::ItemId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid vector for item {item}: expected {expected} components, got {actual}")]
    InvalidVector {
        item: ItemId,
        expected: usize,
        actual: usize,
    },

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Inconsistent persisted state: {0}")]
    InconsistentState(String),

    #[error("Generation {generation:016x} committed but not fully published: {source}")]
    PartiallyPublished {
        generation: u64,
        source: std::io::Error,
    },

    #[error("Catalog error: {0}")]
    CatalogError(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}
