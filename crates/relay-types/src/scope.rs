//! # Scope / Correlation Stack
//!
//! Every message carries a stack of scopes. A scope records where a logical
//! request should be answered (`reply_to`), an optional `correlation_id`, and
//! any other metadata a handler attaches (`cc`, `subscribers`, ...).
//!
//! While an invocation runs, scopes live in a [`ScopeArena`]: nodes are
//! addressed by [`ScopeIdx`] and link to their parent by index, so opening and
//! exiting a scope only moves the index held by the invocation. When a result
//! is published the active branch is frozen into a [`ScopeChain`], an owned
//! root-first snapshot that serializes to the nested wire record
//! `{id, metadata, parent}`.

use serde::de::{Error as _, Unexpected};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::ids::unique_id;

/// Metadata field naming the address a downstream handler should answer to.
pub const REPLY_TO: &str = "reply_to";
/// Metadata field used by the RPC gateway to match replies to callers.
pub const CORRELATION_ID: &str = "correlation_id";
/// Metadata field listing topics that receive a copy of every result.
pub const CC: &str = "cc";
/// Metadata field listing parties to notify about the exchange.
pub const SUBSCRIBERS: &str = "subscribers";

/// One correlation record.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    id: String,
    metadata: Map<String, Value>,
}

impl Scope {
    /// Create a scope with a fresh id and no metadata.
    pub fn new() -> Self {
        Self {
            id: unique_id(),
            metadata: Map::new(),
        }
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.metadata.get(field).filter(|v| !v.is_null())
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.metadata.insert(field.to_string(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.metadata.remove(field)
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.get(REPLY_TO).and_then(Value::as_str)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.get(CORRELATION_ID).and_then(Value::as_str)
    }

    /// Topics that should receive a copy of results published under this scope.
    pub fn cc(&self) -> Vec<String> {
        self.string_list(CC)
    }

    pub fn subscribers(&self) -> Vec<String> {
        self.string_list(SUBSCRIBERS)
    }

    /// Append `entry` to a list field, creating the list when absent.
    pub fn push_to(&mut self, field: &str, entry: impl Into<Value>) {
        let slot = self
            .metadata
            .entry(field.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match slot {
            Value::Array(items) => items.push(entry.into()),
            other => *other = Value::Array(vec![entry.into()]),
        }
    }

    fn string_list(&self, field: &str) -> Vec<String> {
        match self.get(field) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(single)) => vec![single.clone()],
            _ => Vec::new(),
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of a scope inside a [`ScopeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeIdx(usize);

impl ScopeIdx {
    /// Insertion position inside the owning arena.
    pub fn position(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct ScopeNode {
    scope: Scope,
    parent: Option<ScopeIdx>,
}

/// Scope nodes for the duration of one invocation.
///
/// Nodes are only ever appended, so an index stays valid for the arena's
/// lifetime and exiting a scope never invalidates a snapshot taken earlier.
#[derive(Debug, Clone, Default)]
pub struct ScopeArena {
    nodes: Vec<ScopeNode>,
}

impl ScopeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a published chain; returns the arena and the index of its innermost scope.
    pub fn from_chain(chain: &ScopeChain) -> (Self, Option<ScopeIdx>) {
        let mut arena = Self::new();
        let mut current = None;
        for scope in chain.iter() {
            current = Some(arena.insert(scope.clone(), current));
        }
        (arena, current)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append `scope` under `parent`.
    pub fn insert(&mut self, scope: Scope, parent: Option<ScopeIdx>) -> ScopeIdx {
        self.nodes.push(ScopeNode { scope, parent });
        ScopeIdx(self.nodes.len() - 1)
    }

    /// Push a fresh child of `parent` (a new root when `parent` is `None`).
    pub fn open_child(&mut self, parent: Option<ScopeIdx>) -> ScopeIdx {
        self.insert(Scope::new(), parent)
    }

    /// Pop to the parent of `idx`; `None` at the root.
    pub fn exit(&self, idx: ScopeIdx) -> Option<ScopeIdx> {
        self.nodes.get(idx.0).and_then(|node| node.parent)
    }

    pub fn scope(&self, idx: ScopeIdx) -> Option<&Scope> {
        self.nodes.get(idx.0).map(|node| &node.scope)
    }

    pub fn scope_mut(&mut self, idx: ScopeIdx) -> Option<&mut Scope> {
        self.nodes.get_mut(idx.0).map(|node| &mut node.scope)
    }

    pub fn get(&self, idx: ScopeIdx, field: &str) -> Option<&Value> {
        self.scope(idx).and_then(|scope| scope.get(field))
    }

    /// Returns false when `idx` does not belong to this arena.
    pub fn set(&mut self, idx: ScopeIdx, field: &str, value: impl Into<Value>) -> bool {
        match self.scope_mut(idx) {
            Some(scope) => {
                scope.set(field, value);
                true
            }
            None => false,
        }
    }

    /// Number of scopes from `idx` up to and including the root.
    pub fn depth(&self, idx: ScopeIdx) -> usize {
        self.ancestry(idx).count()
    }

    /// Freeze the branch ending at `idx` into an owned snapshot.
    pub fn chain(&self, idx: Option<ScopeIdx>) -> Option<ScopeChain> {
        let mut scopes: Vec<Scope> = self
            .ancestry(idx?)
            .map(|node| node.scope.clone())
            .collect();
        scopes.reverse();
        ScopeChain::from_scopes(scopes)
    }

    fn ancestry(&self, idx: ScopeIdx) -> impl Iterator<Item = &ScopeNode> {
        let mut next = Some(idx);
        std::iter::from_fn(move || {
            let node = self.nodes.get(next?.0)?;
            next = node.parent;
            Some(node)
        })
    }
}

/// Immutable snapshot of a scope branch, root first.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeChain {
    scopes: Vec<Scope>,
}

impl ScopeChain {
    pub fn root(scope: Scope) -> Self {
        Self {
            scopes: vec![scope],
        }
    }

    /// `None` for an empty list: a chain always has a current scope.
    pub fn from_scopes(scopes: Vec<Scope>) -> Option<Self> {
        (!scopes.is_empty()).then_some(Self { scopes })
    }

    /// The innermost scope.
    pub fn current(&self) -> &Scope {
        // non-empty by construction
        &self.scopes[self.scopes.len() - 1]
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Root-first iteration.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Scope> {
        self.scopes.iter()
    }

    /// The chain without its innermost scope; `None` when only the root remains.
    pub fn parent(&self) -> Option<ScopeChain> {
        Self::from_scopes(self.scopes[..self.scopes.len() - 1].to_vec())
    }

    /// A new chain with a child pushed on top.
    #[must_use]
    pub fn child(&self, scope: Scope) -> ScopeChain {
        let mut scopes = self.scopes.clone();
        scopes.push(scope);
        Self { scopes }
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.current().reply_to()
    }

    /// The value of `field` in the innermost scope that sets it.
    pub fn find(&self, field: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(field))
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.find(CORRELATION_ID).and_then(Value::as_str)
    }
}

/// Wire form of a scope chain, `{id, metadata, parent}` with the innermost
/// scope outermost. Borrows the scopes of a chain, the last one being current.
struct WireRecord<'a>(&'a [Scope]);

impl Serialize for WireRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let Some((current, parents)) = self.0.split_last() else {
            return serializer.serialize_none();
        };
        let mut record = serializer.serialize_struct("Scope", 3)?;
        record.serialize_field("id", &current.id)?;
        record.serialize_field("metadata", &current.metadata)?;
        record.serialize_field("parent", &WireRecord(parents))?;
        record.end()
    }
}

impl Serialize for ScopeChain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireRecord(&self.scopes).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ScopeChain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut scopes = Vec::new();
        let mut next = Value::deserialize(deserializer)?;
        // unlinks each parent before the record is dropped, so teardown stays flat
        loop {
            let mut record = match next {
                Value::Object(record) => record,
                other => return Err(D::Error::invalid_type(unexpected(&other), &"a scope record")),
            };
            let id = match record.remove("id") {
                Some(Value::String(id)) => id,
                Some(other) => return Err(D::Error::invalid_type(unexpected(&other), &"a string id")),
                None => return Err(D::Error::missing_field("id")),
            };
            let metadata = match record.remove("metadata").or_else(|| record.remove("data")) {
                Some(Value::Object(metadata)) => metadata,
                None | Some(Value::Null) => Map::new(),
                Some(other) => {
                    return Err(D::Error::invalid_type(unexpected(&other), &"a metadata map"))
                }
            };
            scopes.push(Scope { id, metadata });
            match record.remove("parent") {
                None | Some(Value::Null) => break,
                Some(parent) => next = parent,
            }
        }
        scopes.reverse();
        Ok(Self { scopes })
    }
}

fn unexpected(value: &Value) -> Unexpected<'_> {
    match value {
        Value::Null => Unexpected::Unit,
        Value::Bool(b) => Unexpected::Bool(*b),
        Value::Number(_) => Unexpected::Other("number"),
        Value::String(s) => Unexpected::Str(s),
        Value::Array(_) => Unexpected::Seq,
        Value::Object(_) => Unexpected::Map,
    }
}
