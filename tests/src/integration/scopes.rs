//! Scope correlation across hops: automatic exit on a reply addressed to the
//! handling component, request chains through an intermediate component, and
//! cc fan-out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use relay_invoker::{handler_fn, ContextHandler, Param};
use relay_types::{Envelope, Scope, ScopeChain, CC, REPLY_TO};
use serde_json::json;

use super::support::*;

fn passthrough() -> Arc<dyn relay_invoker::Handler> {
    handler_fn("passthrough", vec![Param::required("data")], |args| {
        Ok(args.value("data").cloned().unwrap_or_default())
    })
}

#[tokio::test]
async fn test_reply_to_self_exits_to_parent_scope() {
    let harness = Harness::new();
    harness.observe("watch-done", "done").await;
    let worker = harness
        .launch(component("worker", "I", Some("S"), Some("done")), passthrough())
        .await;

    let chain = ScopeChain::root(Scope::with_id("parent").with_field("origin", "caller"))
        .child(Scope::with_id("request").with_field(REPLY_TO, "S.I"));
    harness
        .publish("S", &Envelope::new(json!(7)).with_scope(Some(chain)))
        .await;

    let results = harness.collect("watch-done", 1).await;
    let scope = results[0].scope.as_ref().unwrap();
    assert_eq!(scope.depth(), 1);
    assert_eq!(scope.current().id(), "parent");
    assert_eq!(scope.current().get("origin"), Some(&json!("caller")));
    assert_eq!(results[0].key.as_deref(), Some("done"));
    assert_eq!(results[0].data, json!(7));
    worker.stop().await;
}

#[tokio::test]
async fn test_foreign_reply_to_keeps_scope_and_extends_key() {
    let harness = Harness::new();
    harness.observe("watch-elsewhere", "elsewhere").await;
    let worker = harness
        .launch(component("worker", "I", Some("S"), Some("done")), passthrough())
        .await;

    let chain = ScopeChain::root(Scope::with_id("parent"))
        .child(Scope::with_id("request").with_field(REPLY_TO, "elsewhere"));
    harness
        .publish("S", &Envelope::new(json!(1)).with_scope(Some(chain)))
        .await;

    let results = harness.collect("watch-elsewhere", 1).await;
    let scope = results[0].scope.as_ref().unwrap();
    assert_eq!(scope.depth(), 2);
    assert_eq!(scope.current().id(), "request");
    assert_eq!(results[0].key.as_deref(), Some("done.elsewhere"));
    worker.stop().await;
}

#[tokio::test]
async fn test_request_chain_through_orchestrator() {
    let harness = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let orchestrator = Arc::new(ContextHandler::new("orchestrate", vec![], move |ctx, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        let answered = ctx.scope().and_then(Scope::reply_to) == Some(ctx.instance_id());
        let data = ctx.data().clone();
        if answered {
            ctx.emit(json!({"result": data}))
        } else {
            let x = data["x"].as_i64().unwrap_or_default();
            ctx.request("double", json!({"x": x}))
        }
    }));
    let doubler = handler_fn("double", vec![Param::required("x")], |args| {
        Ok(json!(args.get::<i64>("x")? * 2))
    });

    let orch = harness
        .launch(
            component("orchestrator", "orch1", Some("orchestrate"), Some("orchestrated")),
            orchestrator,
        )
        .await;
    let double = harness
        .launch(component("doubler", "dbl1", Some("double"), Some("doubled")), doubler)
        .await;
    let gateway = harness.gateway("gw-chain").await;

    let reply = gateway
        .call("orchestrate", json!({"x": 21}), Some(WAIT))
        .await
        .unwrap();
    assert_eq!(reply.data, json!({"result": 42}));
    // once for the request, once for the doubler's reply
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let scope = reply.scope.as_ref().unwrap();
    assert_eq!(scope.depth(), 1);
    assert!(scope.reply_to().unwrap().starts_with("gw-chain."));

    gateway.shutdown().await;
    double.stop().await;
    orch.stop().await;
}

#[tokio::test]
async fn test_cc_copies_result_to_extra_topic() {
    let harness = Harness::new();
    harness.observe("watch-out", "out").await;
    harness.observe("watch-audit", "audit").await;

    let copier = Arc::new(ContextHandler::new("copier", vec![], |ctx, _| {
        let data = ctx.data().clone();
        ctx.scope_set(CC, json!(["audit"]));
        ctx.emit(data)
    }));
    let running = harness
        .launch(component("copier", "c1", Some("in"), Some("out")), copier)
        .await;

    harness.publish("in", &Envelope::new(json!("hello"))).await;

    let primary = harness.collect("watch-out", 1).await;
    let copy = harness.collect("watch-audit", 1).await;
    assert_eq!(primary[0].data, json!("hello"));
    assert_eq!(copy[0].data, json!("hello"));
    assert_eq!(primary[0].key.as_deref(), Some("out"));
    assert_eq!(copy[0].key.as_deref(), Some("audit"));

    settle().await;
    assert_eq!(harness.depth("watch-out"), 0);
    assert_eq!(harness.depth("watch-audit"), 0);
    running.stop().await;
}
