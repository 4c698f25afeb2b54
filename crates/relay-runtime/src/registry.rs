//! Handler registry.
//!
//! Manifests name handlers as `module:name`. The registry maps those
//! references to compiled handlers; `std` holds the built-ins below.
//!
//! | Reference | Parameters | Results |
//! |-----------|------------|---------|
//! | `std:product` | `x`, `y` | `x * y` |
//! | `std:echo` | `data` | the payload unchanged |
//! | `std:fail` | `message` (optional) | always fails with `ValueError` |
//! | `std:count` | `n` | `0, 1, ..., n - 1`, one result each |

use std::collections::BTreeMap;
use std::sync::Arc;

use relay_invoker::{handler_fn, ContextHandler, FuncRef, Handler, HandlerError, Param};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no handler registered as `{0}`")]
    Unknown(String),

    #[error("`{0}` is already registered")]
    Duplicate(String),
}

#[derive(Default)]
pub struct Registry {
    handlers: BTreeMap<String, Arc<dyn Handler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the `std` handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (name, handler) in builtins() {
            let func = FuncRef {
                module: "std".into(),
                name: name.into(),
            };
            // names are distinct
            let _ = registry.register(&func, handler);
        }
        registry
    }

    pub fn register(
        &mut self,
        func: &FuncRef,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RegistryError> {
        let key = func.to_string();
        if self.handlers.contains_key(&key) {
            return Err(RegistryError::Duplicate(key));
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    pub fn resolve(&self, func: &FuncRef) -> Result<Arc<dyn Handler>, RegistryError> {
        let key = func.to_string();
        self.handlers
            .get(&key)
            .cloned()
            .ok_or(RegistryError::Unknown(key))
    }

    /// Registered references, sorted.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

fn builtins() -> Vec<(&'static str, Arc<dyn Handler>)> {
    vec![
        (
            "product",
            handler_fn("product", vec![Param::required("x"), Param::required("y")], |args| {
                Ok(json!(args.number("x")? * args.number("y")?))
            }),
        ),
        (
            "echo",
            handler_fn("echo", vec![Param::required("data")], |args| {
                Ok(args.value("data").cloned().unwrap_or_default())
            }),
        ),
        (
            "fail",
            handler_fn("fail", vec![Param::optional("message", "failure")], |args| {
                Err(HandlerError::new("ValueError", args.get::<String>("message")?))
            }),
        ),
        (
            "count",
            Arc::new(ContextHandler::generator(
                "count",
                vec![Param::required("n")],
                |ctx, args| {
                    for i in 0..args.get::<u64>("n")? {
                        ctx.emit(i)?;
                    }
                    Ok(())
                },
            )),
        ),
    ]
}
