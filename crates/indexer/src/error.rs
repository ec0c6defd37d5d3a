use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] similar_vector_store::VectorStoreError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Another build holds the index directory lock")]
    AlreadyRunning,

    #[error("Index build failed: {0}")]
    BuildFailure(String),

    #[error("{0}")]
    Other(String),
}
