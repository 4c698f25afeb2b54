//! Message envelope exchanged on the bus.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{timestamp, unique_id};
use crate::scope::{Scope, ScopeChain};

/// One hop in an envelope's trace log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Seconds since the Unix epoch.
    pub ts: f64,
    /// Message id of this hop.
    pub mid: String,
    /// Conversation id, inherited from the previous hop.
    pub cid: String,
}

/// Structured failure attached to envelopes routed to an error destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func: Option<String>,
    /// Extra structured detail supplied by the handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
}

impl ErrorRecord {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            file: None,
            line: None,
            func: None,
            info: None,
        }
    }
}

/// The unit exchanged on the bus.
///
/// An envelope with `error` set is a failure report and travels on error keys
/// only; it is never a successful result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    #[serde(default)]
    pub scope: Option<ScopeChain>,
    #[serde(default)]
    pub error: Option<ErrorRecord>,
    #[serde(default)]
    pub traceback: Option<String>,
}

impl Envelope {
    pub fn new(data: impl Into<Value>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: Option<ScopeChain>) -> Self {
        self.scope = scope;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn current_scope(&self) -> Option<&Scope> {
        self.scope.as_ref().map(ScopeChain::current)
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.scope.as_ref().and_then(ScopeChain::reply_to)
    }

    /// Nearest correlation id from the innermost scope outwards.
    pub fn correlation_id(&self) -> Option<&str> {
        self.scope.as_ref().and_then(ScopeChain::correlation_id)
    }

    /// Append a trace entry for a new hop, continuing the conversation id.
    pub fn stamp(&mut self) {
        let cid = self
            .log
            .last()
            .map(|entry| entry.cid.clone())
            .unwrap_or_else(unique_id);
        self.log.push(LogEntry {
            ts: timestamp(),
            mid: unique_id(),
            cid,
        });
    }

    /// Last conversation id, if the envelope has been stamped.
    pub fn conversation_id(&self) -> Option<&str> {
        self.log.last().map(|entry| entry.cid.as_str())
    }
}
