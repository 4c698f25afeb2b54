//! The four reference scenarios: a product component, a failing component,
//! a directed reply, and an unanswered gateway call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use relay_invoker::{handler_fn, ContextHandler, HandlerError, Param};
use relay_types::{Envelope, PubTopic, Scope, ScopeChain, REPLY_TO};
use serde_json::json;

use super::support::*;

fn product() -> Arc<dyn relay_invoker::Handler> {
    handler_fn(
        "product",
        vec![Param::required("x"), Param::required("y")],
        |args| Ok(json!(args.number("x")? * args.number("y")?)),
    )
}

#[tokio::test]
async fn test_product_result_on_pubtopic() {
    let harness = Harness::new();
    harness.observe("watch-out", "out").await;
    let product = harness
        .launch(component("product", "p1", Some("in"), Some("out")), product())
        .await;

    let mut request = Envelope::new(json!({"x": 4, "y": 5}));
    request.stamp();
    harness.publish("in", &request).await;

    let results = harness.collect("watch-out", 1).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].data, json!(20.0));
    assert!(results[0].error.is_none());
    assert_eq!(results[0].log.len(), 2);
    assert_eq!(results[0].log[0].cid, results[0].log[1].cid);
    product.stop().await;
}

#[tokio::test]
async fn test_failure_only_reaches_error_queue() {
    let harness = Harness::new();
    harness.observe("watch-out", "out").await;
    let failing = handler_fn("thrower", vec![], |_| {
        Err(HandlerError::new("ValueError", "deterministic bug"))
    });
    let thrower = harness
        .launch(component("thrower", "t1", Some("in"), Some("out")), failing)
        .await;

    harness.publish("in", &Envelope::new(json!({"any": 1}))).await;

    let errors = harness.collect("thrower_error", 1).await;
    assert_eq!(errors.len(), 1);
    let record = errors[0].error.as_ref().unwrap();
    assert_eq!(record.kind, "ValueError");
    assert_eq!(record.message, "deterministic bug");
    assert_eq!(errors[0].data, json!({"any": 1}));
    assert!(errors[0].traceback.is_some());

    settle().await;
    assert_eq!(harness.depth("watch-out"), 0);
    // acknowledged, not redelivered
    assert_eq!(harness.depth("thrower"), 0);
    assert_eq!(harness.depth("thrower_error"), 0);
    thrower.stop().await;
}

#[tokio::test]
async fn test_directed_reply_skips_shared_queue() {
    let harness = Harness::new();
    // stands in for B's shared queue binding
    harness.observe("watch-b-shared", "b").await;
    // stands in for B's private instance queue binding
    harness.observe("watch-b-instance", "b1").await;

    let replier = Arc::new(ContextHandler::new(
        "replier",
        vec![Param::required("value")],
        |ctx, args| {
            let value = args.get::<i64>("value")?;
            ctx.emit(json!(value + 1))
        },
    ));
    let a = harness
        .launch(component("a", "a1", Some("ask.a"), Some("answer")), replier)
        .await;

    // B asks A with its own instance id as reply address
    let request = Envelope::new(json!({"value": 41}))
        .with_scope(Some(ScopeChain::root(Scope::new().with_field(REPLY_TO, "b1"))));
    harness.publish("ask.a", &request).await;

    let replies = harness.collect("watch-b-instance", 1).await;
    assert_eq!(replies[0].data, json!(42));
    assert_eq!(replies[0].reply_to(), Some("b1"));
    assert_eq!(
        replies[0].key.as_deref(),
        Some(PubTopic::parse("answer.b1").render().as_str())
    );

    settle().await;
    assert_eq!(harness.depth("watch-b-shared"), 0);
    a.stop().await;
}

#[tokio::test]
async fn test_gateway_call_times_out_after_deadline() {
    let harness = Harness::new();
    let gateway = harness.gateway("gw-timeout").await;

    let started = Instant::now();
    let err = gateway
        .call("nobody.listens", json!({"x": 1}), Some(Duration::from_secs(1)))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout());
    assert!(elapsed >= Duration::from_secs(1), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "waited too long: {elapsed:?}");
    assert_eq!(gateway.pending().pending_count(), 0);
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_gateway_call_answered_by_component() {
    let harness = Harness::new();
    let product = harness
        .launch(component("product", "p1", Some("product"), Some("out")), product())
        .await;
    let gateway = harness.gateway("gw-product").await;

    let reply = gateway
        .call("product", json!({"x": 4, "y": 5}), Some(WAIT))
        .await
        .unwrap();
    assert_eq!(reply.data, json!(20.0));

    gateway.shutdown().await;
    product.stop().await;
}
