//! Failure delivery: error replies reach the original caller, the optional
//! error topic gets a copy, and errors crossing an intermediate component are
//! forwarded without invoking its handler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use relay_gateway::GatewayError;
use relay_invoker::{handler_fn, ContextHandler, Handler, HandlerError};
use relay_types::Envelope;
use serde_json::json;

use super::support::*;

fn failing(message: &'static str) -> Arc<dyn Handler> {
    handler_fn("fail", vec![], move |_| {
        Err(HandlerError::new("ValueError", message))
    })
}

#[tokio::test]
async fn test_gateway_receives_error_reply() {
    let harness = Harness::new();
    let thrower = harness
        .launch(component("thrower", "t1", Some("explode"), Some("out")), failing("boom"))
        .await;
    let gateway = harness.gateway("gw-errors").await;

    let err = gateway
        .call("explode", json!({"x": 1}), Some(WAIT))
        .await
        .unwrap_err();
    let (topic, envelope) = match err {
        GatewayError::ErrorReply { topic, envelope } => (topic, envelope),
        other => panic!("expected an error reply, got {other:?}"),
    };
    assert_eq!(topic, "explode");
    let record = envelope.error.as_ref().unwrap();
    assert_eq!(record.kind, "ValueError");
    assert_eq!(record.message, "boom");
    assert_eq!(envelope.data, json!({"x": 1}));
    assert_eq!(gateway.pending().pending_count(), 0);

    gateway.shutdown().await;
    thrower.stop().await;
}

#[tokio::test]
async fn test_error_pubtopic_receives_copy() {
    let harness = Harness::new();
    harness.observe("watch-alerts", "alerts").await;
    let mut config = component("thrower", "t1", Some("in"), Some("out"));
    config.error_pubtopic = Some("alerts".into());
    let thrower = harness.launch(config, failing("bad input")).await;

    harness.publish("in", &Envelope::new(json!({"n": 3}))).await;

    let alerts = harness.collect("watch-alerts", 1).await;
    assert_eq!(alerts[0].error.as_ref().unwrap().message, "bad input");
    assert_eq!(alerts[0].key.as_deref(), Some("alerts"));
    let errors = harness.collect("thrower_error", 1).await;
    assert_eq!(errors.len(), 1);
    thrower.stop().await;
}

#[tokio::test]
async fn test_error_crosses_orchestrator_to_caller() {
    let harness = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let orchestrator = Arc::new(ContextHandler::new("orchestrate", vec![], move |ctx, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        let data = ctx.data().clone();
        ctx.request("explode", data)
    }));
    let orch = harness
        .launch(
            component("orchestrator", "orch1", Some("orchestrate"), Some("orchestrated")),
            orchestrator,
        )
        .await;
    let thrower = harness
        .launch(component("thrower", "t1", Some("explode"), Some("out")), failing("deep"))
        .await;
    let gateway = harness.gateway("gw-multihop").await;

    let err = gateway
        .call("orchestrate", json!({"x": 1}), Some(WAIT))
        .await
        .unwrap_err();
    let envelope = match err {
        GatewayError::ErrorReply { envelope, .. } => envelope,
        other => panic!("expected an error reply, got {other:?}"),
    };
    assert_eq!(envelope.error.as_ref().unwrap().message, "deep");
    let scope = envelope.scope.as_ref().unwrap();
    assert_eq!(scope.depth(), 1);
    assert!(scope.reply_to().unwrap().starts_with("gw-multihop."));

    settle().await;
    // the forwarded error did not re-enter the handler
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.depth("orchestrator/orch1"), 0);

    gateway.shutdown().await;
    thrower.stop().await;
    orch.stop().await;
}
