//! # Invocation Context
//!
//! The handler's view of one invocation: the inbound payload, the scope stack,
//! the default pubtopic, and the output sink.
//!
//! The context owns a private [`ScopeArena`] loaded from the inbound envelope,
//! so opening or exiting scopes never touches a scope another invocation can
//! see. Each emitted result captures a snapshot of the scope branch and the
//! pubtopic as they were at the moment of emission.

use std::sync::Arc;

use relay_types::{Envelope, ErrorRecord, Scope, ScopeArena, ScopeChain, ScopeIdx, REPLY_TO};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::{HandlerError, HandlerResult};
use crate::routing::Identity;

/// A handler result with optional routing overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub data: Value,
    /// Publish under this topic instead of the default route.
    pub topic: Option<String>,
    /// Ask downstream handlers to answer to this address.
    pub reply_to: Option<String>,
}

impl Output {
    pub fn data(data: impl Into<Value>) -> Self {
        Self {
            data: data.into(),
            topic: None,
            reply_to: None,
        }
    }
}

/// An output together with the invocation state it was emitted under.
#[derive(Debug, Clone)]
pub struct Emitted {
    pub output: Output,
    pub scope: Option<ScopeChain>,
    pub pubtopic: Option<String>,
    /// The current scope was opened during this invocation rather than
    /// received with the inbound envelope.
    pub opened_scope: bool,
}

pub(crate) enum Emitter {
    Buffered(Vec<Emitted>),
    Streaming(mpsc::Sender<Emitted>),
}

pub struct Context {
    identity: Arc<Identity>,
    pubtopic: Option<String>,
    data: Value,
    inbound_error: Option<ErrorRecord>,
    arena: ScopeArena,
    inbound_scopes: usize,
    scope: Option<ScopeIdx>,
    emitter: Emitter,
    emitted: usize,
}

impl Context {
    pub(crate) fn new(
        identity: Arc<Identity>,
        pubtopic: Option<String>,
        inbound: &Envelope,
        emitter: Emitter,
    ) -> Self {
        let (arena, scope) = match &inbound.scope {
            Some(chain) => ScopeArena::from_chain(chain),
            None => (ScopeArena::new(), None),
        };
        Self {
            identity,
            pubtopic,
            data: inbound.data.clone(),
            inbound_error: inbound.error.clone(),
            inbound_scopes: arena.len(),
            arena,
            scope,
            emitter,
            emitted: 0,
        }
    }

    /// A context that collects outputs in memory.
    pub fn buffered(identity: Arc<Identity>, pubtopic: Option<String>, inbound: &Envelope) -> Self {
        Self::new(identity, pubtopic, inbound, Emitter::Buffered(Vec::new()))
    }

    /// Outputs collected by a buffered context.
    pub fn take_buffered(&mut self) -> Vec<Emitted> {
        match &mut self.emitter {
            Emitter::Buffered(items) => std::mem::take(items),
            Emitter::Streaming(_) => Vec::new(),
        }
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Error record of the inbound envelope, for error-handling components.
    pub fn inbound_error(&self) -> Option<&ErrorRecord> {
        self.inbound_error.as_ref()
    }

    pub fn instance_id(&self) -> &str {
        &self.identity.instance_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn pubtopic(&self) -> Option<&str> {
        self.pubtopic.as_deref()
    }

    /// Change the default topic for results emitted from now on.
    pub fn set_pubtopic(&mut self, pubtopic: Option<impl Into<String>>) {
        self.pubtopic = pubtopic.map(Into::into);
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.and_then(|idx| self.arena.scope(idx))
    }

    pub fn scope_depth(&self) -> usize {
        self.scope.map_or(0, |idx| self.arena.depth(idx))
    }

    /// Open a child of the current scope and make it current.
    pub fn begin_scope(&mut self) -> &mut Scope {
        let idx = self.arena.open_child(self.scope);
        self.scope = Some(idx);
        self.current_scope_mut()
    }

    /// Return to the parent of the current scope.
    pub fn exit_scope(&mut self) {
        self.scope = self.scope.and_then(|idx| self.arena.exit(idx));
    }

    /// Field of the current scope.
    pub fn scope_get(&self, field: &str) -> Option<&Value> {
        self.scope().and_then(|scope| scope.get(field))
    }

    /// Set a field on the current scope, opening a root scope if there is none.
    pub fn scope_set(&mut self, field: &str, value: impl Into<Value>) {
        if self.scope.is_none() {
            self.scope = Some(self.arena.open_child(None));
        }
        self.current_scope_mut().set(field, value);
    }

    /// Emit `data` under the default route.
    pub fn emit(&mut self, data: impl Into<Value>) -> HandlerResult<()> {
        self.emit_output(Output::data(data))
    }

    pub fn emit_output(&mut self, output: Output) -> HandlerResult<()> {
        let emitted = Emitted {
            output,
            scope: self.arena.chain(self.scope),
            pubtopic: self.pubtopic.clone(),
            opened_scope: self
                .scope
                .is_some_and(|idx| idx.position() >= self.inbound_scopes),
        };
        match &mut self.emitter {
            Emitter::Buffered(items) => items.push(emitted),
            Emitter::Streaming(tx) => tx
                .blocking_send(emitted)
                .map_err(|_| HandlerError::new("ChannelClosed", "result consumer went away"))?,
        }
        self.emitted += 1;
        Ok(())
    }

    /// Number of results emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Build an output that overrides the topic and/or reply address.
    pub fn envelope(data: impl Into<Value>, topic: Option<&str>, reply_to: Option<&str>) -> Output {
        Output {
            data: data.into(),
            topic: topic.map(str::to_string),
            reply_to: reply_to.map(str::to_string),
        }
    }

    /// Send `data` to `topic` in a new scope whose replies come back to this instance.
    pub fn request(&mut self, topic: &str, data: impl Into<Value>) -> HandlerResult<()> {
        let instance_id = self.identity.instance_id.clone();
        self.begin_scope().set(REPLY_TO, instance_id);
        let result = self.emit_output(Output {
            data: data.into(),
            topic: Some(topic.to_string()),
            reply_to: None,
        });
        self.exit_scope();
        result
    }

    /// JSON view used for argument binding.
    pub(crate) fn binding_view(&self) -> Value {
        json!({
            "context": {
                "instance_id": self.identity.instance_id,
                "component": self.identity.component,
                "subtopic": self.identity.subtopic,
                "pubtopic": self.pubtopic,
            },
            "data": self.data,
            "error": self.inbound_error,
        })
    }

    fn current_scope_mut(&mut self) -> &mut Scope {
        // `scope` always indexes a node of `arena`; fall back to a detached
        // root rather than panicking if that ever stops holding.
        let idx = match self.scope {
            Some(idx) if self.arena.scope(idx).is_some() => idx,
            _ => {
                let idx = self.arena.open_child(None);
                self.scope = Some(idx);
                idx
            }
        };
        match self.arena.scope_mut(idx) {
            Some(scope) => scope,
            None => unreachable!("scope index checked above"),
        }
    }
}
