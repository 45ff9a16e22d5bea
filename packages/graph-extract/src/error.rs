//! Typed errors for the extraction library. Library errors use `thiserror`,
//! matching `packages/extraction/src/error.rs`'s split of a top-level error
//! from nested cause-specific errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("model call failed: {0}")]
    Model(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("model returned output that could not be parsed after repair: {0}")]
    Unparseable(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid unit configuration: {reason}")]
    InvalidConfig { reason: String },
}

pub type Result<T> = std::result::Result<T, ExtractError>;
