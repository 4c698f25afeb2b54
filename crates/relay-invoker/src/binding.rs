//! # Argument Binding
//!
//! Maps an inbound envelope onto a handler's declared parameters.
//!
//! The lookup view is `{"context": {...}, "data": <payload>, "error": <record|null>}`.
//! For a parameter `p`, with `path = args[p]` (default `p`), the first non-null
//! of these wins:
//!
//! 1. `view.<path>`: so a parameter named `data` binds the whole payload
//! 2. `view.data.<path>`: the common case, a field of the payload
//! 3. the parameter's declared default
//!
//! Otherwise the parameter is missing, which fails the invocation.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::error::{HandlerError, HandlerResult};

/// Name of the parameter that receives the invocation context itself.
pub const CONTEXT_PARAM: &str = "context";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("missing required argument `{param}` (looked up `{path}`)")]
    MissingArgument { param: String, path: String },
}

/// A declared handler parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Value>,
}

impl Param {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: Some(default.into()),
        }
    }
}

/// Bound argument values, by parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    values: BTreeMap<String, Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Deserialize argument `name` into `T`.
    #[track_caller]
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> HandlerResult<T> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| HandlerError::new("KeyError", format!("no argument named `{name}`")))?;
        Ok(T::deserialize(value)?)
    }

    /// Argument `name` as a number, accepting numeric strings such as query parameters.
    #[track_caller]
    pub fn number(&self, name: &str) -> HandlerResult<f64> {
        match self.values.get(name) {
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| HandlerError::new("ValueError", format!("`{name}` is not finite"))),
            Some(Value::String(s)) => Ok(s.trim().parse::<f64>()?),
            Some(other) => Err(HandlerError::new(
                "TypeError",
                format!("`{name}` must be a number, got {other}"),
            )),
            None => Err(HandlerError::new(
                "KeyError",
                format!("no argument named `{name}`"),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Resolve every parameter in `params` against `view`.
pub fn bind(
    params: &[Param],
    table: &BTreeMap<String, String>,
    view: &Value,
) -> Result<Args, BindingError> {
    let mut args = Args::new();
    for param in params {
        if param.name == CONTEXT_PARAM {
            continue;
        }
        let path = table
            .get(&param.name)
            .map(String::as_str)
            .unwrap_or(param.name.as_str());

        let value = lookup(view, path)
            .or_else(|| view.get("data").and_then(|data| lookup(data, path)))
            .cloned()
            .or_else(|| param.default.clone())
            .ok_or_else(|| BindingError::MissingArgument {
                param: param.name.clone(),
                path: path.to_string(),
            })?;
        args.insert(param.name.clone(), value);
    }
    Ok(args)
}

/// Follow a dotted path through objects (and arrays, by index). Null counts as absent.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(root, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
        .filter(|value| !value.is_null())
}
