//! Typed errors for the core engine: lease lock, staging/merge, dedup,
//! description regeneration, and the queue worker.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("lease lost (key={key})")]
    LeaseLost { key: String },

    #[error("lease busy (key={key})")]
    LeaseBusy { key: String },

    #[error("extraction error: {0}")]
    Extract(#[from] graph_extract::ExtractError),

    #[error("model error: {0}")]
    Model(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("broker error: {0}")]
    Broker(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("missing relationship endpoint(s) for public_id(s): {0:?}")]
    MissingEndpoints(Vec<String>),

    #[error("missing preprocessed artifact: {0}")]
    MissingArtifact(String),

    #[error("object store error: {0}")]
    ObjectStore(#[from] graph_loaders::ObjectStoreError),

    #[error("content loader error: {0}")]
    Loader(#[from] graph_loaders::LoadError),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, CoreError>;
