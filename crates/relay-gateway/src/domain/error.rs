//! Gateway error types with HTTP status mapping.
//!
//! A timed-out call and a call answered with an error envelope are distinct
//! failures: 504 versus 502.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relay_bus::ConnectionError;
use relay_types::{CodecError, Envelope};
use serde_json::json;
use thiserror::Error;

use super::config::ConfigError;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// No reply arrived before the deadline
    #[error("no reply on `{topic}` within {}ms", timeout.as_millis())]
    Timeout { topic: String, timeout: Duration },

    /// The responder (or a component downstream of it) failed
    #[error("`{topic}` replied with an error")]
    ErrorReply {
        topic: String,
        envelope: Box<Envelope>,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Too many calls in flight
    #[error("too many concurrent calls (limit {limit})")]
    Overloaded { limit: usize },

    #[error("gateway is shutting down")]
    ShuttingDown,

    #[error("broker unavailable: {0}")]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("http listener failed: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::ErrorReply { .. } => StatusCode::BAD_GATEWAY,
            Self::InvalidRequest(_) | Self::Codec(_) => StatusCode::BAD_REQUEST,
            Self::Overloaded { .. } | Self::ShuttingDown | Self::Connection(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Config(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::ErrorReply { envelope, .. } => json!({
                "error": envelope.error,
                "traceback": envelope.traceback,
                "data": envelope.data,
            }),
            other => json!({
                "error": {
                    "type": error_type(other),
                    "message": other.to_string(),
                }
            }),
        };
        (status, Json(body)).into_response()
    }
}

fn error_type(error: &GatewayError) -> &'static str {
    match error {
        GatewayError::Timeout { .. } => "Timeout",
        GatewayError::ErrorReply { .. } => "ErrorReply",
        GatewayError::InvalidRequest(_) => "InvalidRequest",
        GatewayError::Overloaded { .. } => "Overloaded",
        GatewayError::ShuttingDown => "ShuttingDown",
        GatewayError::Connection(_) => "ConnectionError",
        GatewayError::Codec(_) => "DecodeError",
        GatewayError::Config(_) => "ConfigError",
        GatewayError::Io(_) => "IoError",
    }
}
