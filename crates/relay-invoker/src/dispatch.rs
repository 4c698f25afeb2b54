//! # Handler Dispatch
//!
//! Runs one handler invocation on the blocking worker pool and streams its
//! results back to the async side as they are emitted.
//!
//! ```text
//!  dispatch() ──► acquire worker permit ──► spawn_blocking(bind + call)
//!       │                                          │ ctx.emit()
//!       ▼                                          ▼
//!  Invocation::next_output() ◄──── mpsc (bounded) ─┘
//!  Invocation::finish()      ◄──── Ok / InvocationError
//! ```
//!
//! The permit bounds concurrent handler work across every consume loop of the
//! component; intake keeps running while a slow handler holds its permit.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use relay_types::Envelope;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::binding::bind;
use crate::context::{Context, Emitted, Emitter};
use crate::error::{HandlerError, InvocationError};
use crate::handler::Handler;
use crate::routing::Identity;

/// Results buffered between the handler thread and the publisher.
const OUTPUT_BUFFER: usize = 16;

pub struct Dispatcher {
    identity: Arc<Identity>,
    pubtopic: Option<String>,
    handler: Arc<dyn Handler>,
    args: Arc<BTreeMap<String, String>>,
    workers: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        identity: Arc<Identity>,
        pubtopic: Option<String>,
        handler: Arc<dyn Handler>,
        args: BTreeMap<String, String>,
        max_workers: usize,
    ) -> Self {
        Self {
            identity,
            pubtopic,
            handler,
            args: Arc::new(args),
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    /// Idle worker slots.
    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Start invoking the handler for `inbound`.
    pub fn dispatch(&self, inbound: &Envelope) -> Invocation {
        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
        let ctx = Context::new(
            self.identity.clone(),
            self.pubtopic.clone(),
            inbound,
            Emitter::Streaming(tx),
        );
        let task = tokio::spawn(execute(
            self.workers.clone(),
            self.handler.clone(),
            self.args.clone(),
            ctx,
        ));

        Invocation { rx, task }
    }

    /// Invoke and collect every result before returning.
    pub async fn collect(&self, inbound: &Envelope) -> (Vec<Emitted>, Result<(), InvocationError>) {
        let mut invocation = self.dispatch(inbound);
        let mut outputs = Vec::new();
        while let Some(emitted) = invocation.next_output().await {
            outputs.push(emitted);
        }
        (outputs, invocation.finish().await)
    }
}

async fn execute(
    workers: Arc<Semaphore>,
    handler: Arc<dyn Handler>,
    table: Arc<BTreeMap<String, String>>,
    ctx: Context,
) -> Result<(), InvocationError> {
    let _permit = workers
        .acquire_owned()
        .await
        .map_err(|_| HandlerError::new("Cancelled", "worker pool closed"))?;
    tokio::task::spawn_blocking(move || run(handler.as_ref(), &table, ctx))
        .await
        .map_err(|e| HandlerError::new("JoinError", e.to_string()))?
}

fn run(
    handler: &dyn Handler,
    table: &BTreeMap<String, String>,
    mut ctx: Context,
) -> Result<(), InvocationError> {
    let args = bind(handler.params(), table, &ctx.binding_view())?;
    match catch_unwind(AssertUnwindSafe(|| handler.call(&mut ctx, &args))) {
        Ok(result) => Ok(result?),
        Err(payload) => Err(HandlerError::panic(payload).into()),
    }
}

/// A running handler invocation.
pub struct Invocation {
    rx: mpsc::Receiver<Emitted>,
    task: JoinHandle<Result<(), InvocationError>>,
}

impl Invocation {
    /// Next emitted result; `None` once the handler has returned.
    pub async fn next_output(&mut self) -> Option<Emitted> {
        self.rx.recv().await
    }

    /// Wait for the handler to return.
    ///
    /// Dropping unread results first lets a handler blocked on a full buffer
    /// observe the closed channel and unwind.
    pub async fn finish(self) -> Result<(), InvocationError> {
        drop(self.rx);
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(HandlerError::new("JoinError", e.to_string()).into()),
        }
    }
}
