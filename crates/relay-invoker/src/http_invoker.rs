//! # HTTP Invoker
//!
//! Hosts a handler directly over HTTP instead of consuming from the bus.
//!
//! `GET|POST` on any path: a JSON body (or, without one, the query parameters)
//! becomes the inbound envelope. The response is the routed result envelope,
//! an array of envelopes for handlers that yield many, or the error envelope
//! with status 500.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use relay_bus::ShutdownGate;
use relay_types::{decode, decode_value, unique_id, Envelope};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::ComponentConfig;
use crate::dispatch::Dispatcher;
use crate::error::{InvocationError, InvokerError};
use crate::handler::Handler;
use crate::routing::{route_error, route_output, Identity};

pub struct HttpInvoker {
    config: ComponentConfig,
    dispatcher: Arc<Dispatcher>,
    gate: ShutdownGate,
}

impl HttpInvoker {
    pub fn new(config: ComponentConfig, handler: Arc<dyn Handler>) -> Result<Self, InvokerError> {
        config.validate()?;
        let instance_id = config.instance_id.clone().unwrap_or_else(unique_id);
        let identity = Arc::new(Identity::new(
            config.name(),
            instance_id,
            config.subtopic.as_deref(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            identity,
            config.pubtopic.clone(),
            handler,
            config.args.clone(),
            config.max_workers,
        ));
        Ok(Self {
            config,
            dispatcher,
            gate: ShutdownGate::new(),
        })
    }

    pub fn shutdown_gate(&self) -> ShutdownGate {
        self.gate.clone()
    }

    pub fn router(&self) -> Router {
        let state = HttpState {
            dispatcher: self.dispatcher.clone(),
            func: Arc::from(self.config.func.as_str()),
        };
        Router::new()
            .route("/", any(invoke))
            .route("/*path", any(invoke))
            .with_state(state)
    }

    /// Bind the configured address and serve until the gate is triggered.
    pub async fn run(&self) -> Result<(), InvokerError> {
        let listener = TcpListener::bind(self.config.http.addr()).await?;
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<(), InvokerError> {
        info!(
            component = %self.dispatcher.identity().component,
            addr = %listener.local_addr()?,
            "Serving handler over HTTP"
        );
        let gate = self.gate.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { gate.cancelled().await })
            .await?;
        info!(component = %self.dispatcher.identity().component, "HTTP invoker stopped");
        Ok(())
    }
}

#[derive(Clone)]
struct HttpState {
    dispatcher: Arc<Dispatcher>,
    func: Arc<str>,
}

async fn invoke(
    State(state): State<HttpState>,
    Query(query): Query<BTreeMap<String, String>>,
    body: Bytes,
) -> Response {
    let decoded = if body.iter().all(u8::is_ascii_whitespace) {
        decode_value(json!(query))
    } else {
        decode(&body)
    };
    let inbound = match decoded {
        Ok(envelope) => envelope,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let identity = state.dispatcher.identity().clone();
    let (outputs, result) = state.dispatcher.collect(&inbound).await;

    if let Err(failure) = result {
        warn!(component = %identity.component, kind = %failure.kind(), error = %failure, "Invocation failed");
        let envelope = error_envelope(&identity, &inbound, &failure, &state.func);
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(envelope)).into_response();
    }

    let mut results: Vec<Envelope> = outputs
        .iter()
        .map(|emitted| {
            let route = route_output(&identity, emitted);
            let mut envelope = Envelope {
                data: emitted.output.data.clone(),
                key: Some(route.key),
                log: inbound.log.clone(),
                scope: route.scope,
                error: None,
                traceback: None,
            };
            envelope.stamp();
            envelope
        })
        .collect();
    debug!(component = %identity.component, results = results.len(), "Handled HTTP invocation");

    if state.dispatcher.handler().yields_many() {
        Json(results).into_response()
    } else if results.is_empty() {
        Json(Value::Null).into_response()
    } else {
        Json(results.swap_remove(0)).into_response()
    }
}

fn error_envelope(
    identity: &Identity,
    inbound: &Envelope,
    failure: &InvocationError,
    func: &str,
) -> Envelope {
    let route = route_error(identity, inbound.scope.clone());
    let mut envelope = inbound.clone();
    envelope.key = Some(route.key);
    envelope.scope = route.scope;
    envelope.error = Some(failure.to_record(func));
    envelope.traceback = Some(failure.traceback());
    envelope.stamp();
    envelope
}
