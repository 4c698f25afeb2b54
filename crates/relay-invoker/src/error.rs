//! Invocation errors.
//!
//! [`HandlerError`] is what user handlers return. Any `std::error::Error`
//! converts into it with `?`, capturing the type name and the source location
//! of the conversion. [`InvocationError`] covers everything that can go wrong
//! between decoding an inbound envelope and publishing its results; each
//! variant renders into the [`ErrorRecord`] carried by error envelopes.

use std::any::Any;
use std::fmt;
use std::panic::Location;

use relay_bus::ConnectionError;
use relay_types::{CodecError, ErrorRecord};
use serde_json::Value;
use thiserror::Error;

use crate::binding::BindingError;
use crate::bus_invoker::InvokerState;
use crate::config::ConfigError;

pub type HandlerResult<T> = Result<T, HandlerError>;

/// Where a handler error was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

/// A failure raised by user handler code.
#[derive(Debug, Clone)]
pub struct HandlerError {
    kind: String,
    message: String,
    location: Option<SourceLocation>,
    chain: Vec<String>,
    info: Option<Value>,
}

impl HandlerError {
    #[track_caller]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            location: Some(caller()),
            chain: Vec::new(),
            info: None,
        }
    }

    /// A `HandlerError` kind carrying only a message.
    #[track_caller]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new("HandlerError", message)
    }

    /// Convert a caught panic payload.
    pub fn panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "handler panicked".to_string());
        Self {
            kind: "panic".to_string(),
            message,
            location: None,
            chain: Vec::new(),
            info: None,
        }
    }

    /// Attach structured detail, published as `error.info`.
    #[must_use]
    pub fn with_info(mut self, info: impl Into<Value>) -> Self {
        self.info = Some(info.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    pub fn info(&self) -> Option<&Value> {
        self.info.as_ref()
    }

    /// Messages of the underlying causes, outermost first.
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    fn record(&self, func: &str) -> ErrorRecord {
        ErrorRecord {
            kind: self.kind.clone(),
            message: self.message.clone(),
            file: self.location.as_ref().map(|l| l.file.clone()),
            line: self.location.as_ref().map(|l| l.line),
            func: Some(func.to_string()),
            info: self.info.clone(),
        }
    }

    fn traceback(&self) -> String {
        let mut out = match &self.location {
            Some(loc) => format!("{}: {}\n  at {}:{}", self.kind, self.message, loc.file, loc.line),
            None => format!("{}: {}", self.kind, self.message),
        };
        for cause in &self.chain {
            out.push_str("\ncaused by: ");
            out.push_str(cause);
        }
        out
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + 'static,
{
    /// `type` and `message` both describe `error` itself; its sources go to
    /// the traceback as `caused by:` lines.
    #[track_caller]
    fn from(error: E) -> Self {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        Self {
            kind: short_type_name::<E>(),
            message: error.to_string(),
            location: Some(caller()),
            chain,
            info: None,
        }
    }
}

#[track_caller]
fn caller() -> SourceLocation {
    let location = Location::caller();
    SourceLocation {
        file: location.file().to_string(),
        line: location.line(),
    }
}

/// `core::num::ParseFloatError` -> `ParseFloatError`.
fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Everything that can fail while processing one inbound envelope.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error("{0}")]
    Handler(HandlerError),

    #[error("failed to decode inbound message: {0}")]
    Decode(#[from] CodecError),
}

impl From<HandlerError> for InvocationError {
    fn from(error: HandlerError) -> Self {
        Self::Handler(error)
    }
}

impl InvocationError {
    /// Short error type name published as `error.type`.
    pub fn kind(&self) -> &str {
        match self {
            Self::Binding(_) => "BindingError",
            Self::Handler(e) => e.kind(),
            Self::Decode(_) => "DecodeError",
        }
    }

    pub fn to_record(&self, func: &str) -> ErrorRecord {
        match self {
            Self::Handler(e) => e.record(func),
            other => {
                let mut record = ErrorRecord::new(other.kind(), other.to_string());
                record.func = Some(func.to_string());
                record
            }
        }
    }

    pub fn traceback(&self) -> String {
        match self {
            Self::Handler(e) => e.traceback(),
            other => format!("{}: {}", other.kind(), other),
        }
    }
}

/// Failures that stop an invoker as a whole.
#[derive(Debug, Error)]
pub enum InvokerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("broker connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("consume loop for `{queue}` failed: {source}")]
    ConsumeLoop {
        queue: String,
        #[source]
        source: ConnectionError,
    },

    #[error("invoker is {actual:?}, expected {expected:?}")]
    InvalidState {
        actual: InvokerState,
        expected: InvokerState,
    },

    #[error("http listener failed: {0}")]
    Io(#[from] std::io::Error),
}
