//! Error types for envelope encoding.

use thiserror::Error;

/// Failure to turn bytes into an envelope or back.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("envelope body is empty")]
    Empty,

    #[error("envelope nested {depth} levels deep, limit is {max}")]
    TooDeep { depth: usize, max: usize },
}
