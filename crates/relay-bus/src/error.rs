//! Connection manager errors.

use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("connection manager is closed")]
    Closed,

    #[error("invalid connection settings: {0}")]
    Config(String),
}

impl ConnectionError {
    /// The broker fault behind this error, if any.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::RetriesExhausted { source, .. } => Some(source),
            Self::Transport(e) => Some(e),
            Self::Closed | Self::Config(_) => None,
        }
    }
}
