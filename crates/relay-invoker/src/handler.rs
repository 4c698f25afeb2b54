//! # Handler Registration Interface
//!
//! A handler declares its parameters and is called once per inbound envelope
//! with a mutable [`Context`] and the bound [`Args`]. Results are emitted
//! through the context, so a handler can produce none, one, or many.
//!
//! Two adapters cover the usual shapes:
//!
//! - [`FnHandler`]: a plain function of its arguments; its return value is
//!   emitted as the single result
//! - [`ContextHandler`]: full access to the context, for generators and for
//!   handlers that open scopes, override topics or issue requests

use std::sync::Arc;

use serde_json::Value;

use crate::binding::{Args, Param};
use crate::context::Context;
use crate::error::HandlerResult;

pub trait Handler: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn params(&self) -> &[Param];

    /// Whether the handler is expected to emit a sequence (affects HTTP responses).
    fn yields_many(&self) -> bool {
        false
    }

    fn call(&self, ctx: &mut Context, args: &Args) -> HandlerResult<()>;
}

/// Handler built from a function returning its single result.
pub struct FnHandler<F> {
    name: String,
    params: Vec<Param>,
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Args) -> HandlerResult<Value> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, params: Vec<Param>, func: F) -> Self {
        Self {
            name: name.into(),
            params,
            func,
        }
    }
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&Args) -> HandlerResult<Value> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &[Param] {
        &self.params
    }

    fn call(&self, ctx: &mut Context, args: &Args) -> HandlerResult<()> {
        let result = (self.func)(args)?;
        ctx.emit(result)
    }
}

/// Handler with direct access to the invocation context.
pub struct ContextHandler<F> {
    name: String,
    params: Vec<Param>,
    many: bool,
    func: F,
}

impl<F> ContextHandler<F>
where
    F: Fn(&mut Context, &Args) -> HandlerResult<()> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, params: Vec<Param>, func: F) -> Self {
        Self {
            name: name.into(),
            params,
            many: false,
            func,
        }
    }

    /// A handler that emits a sequence of results.
    pub fn generator(name: impl Into<String>, params: Vec<Param>, func: F) -> Self {
        Self {
            many: true,
            ..Self::new(name, params, func)
        }
    }
}

impl<F> Handler for ContextHandler<F>
where
    F: Fn(&mut Context, &Args) -> HandlerResult<()> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &[Param] {
        &self.params
    }

    fn yields_many(&self) -> bool {
        self.many
    }

    fn call(&self, ctx: &mut Context, args: &Args) -> HandlerResult<()> {
        (self.func)(ctx, args)
    }
}

/// Shorthand for an `Arc<dyn Handler>` from a plain function.
pub fn handler_fn<F>(name: &str, params: Vec<Param>, func: F) -> Arc<dyn Handler>
where
    F: Fn(&Args) -> HandlerResult<Value> + Send + Sync + 'static,
{
    Arc::new(FnHandler::new(name, params, func))
}
