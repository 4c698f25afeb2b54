//! Connection loss: a component reconnects after the broker drops every
//! connection, replays its topology and keeps processing.

use std::time::Duration;

use relay_invoker::{handler_fn, Param};
use relay_types::Envelope;
use serde_json::json;

use super::support::*;

#[tokio::test]
async fn test_component_recovers_after_broker_restart() {
    let harness = Harness::new();
    harness.observe("watch-out", "out").await;
    let increment = handler_fn("increment", vec![Param::required("n")], |args| {
        Ok(json!(args.get::<i64>("n")? + 1))
    });
    let running = harness
        .launch(component("increment", "w1", Some("in"), Some("out")), increment)
        .await;

    harness.publish("in", &Envelope::new(json!({"n": 1}))).await;
    assert_eq!(harness.collect("watch-out", 1).await[0].data, json!(2));

    let connection = running.invoker.connection().clone();
    let before = connection.generation();
    let attempts = harness.broker.connect_attempts();
    harness.broker.sever_connections();

    tokio::time::timeout(WAIT, async {
        while connection.generation() <= before {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("component never reconnected");
    assert!(harness.broker.connect_attempts() > attempts);

    // the exclusive instance queue died with the old connection and was redeclared
    assert!(harness.broker.queue_exists("increment/w1"));
    assert!(harness
        .broker
        .bindings("increment/w1")
        .contains(&"#.w1.#".to_string()));
    assert!(harness
        .broker
        .bindings("increment")
        .contains(&"#.in.#".to_string()));

    harness.publish("in", &Envelope::new(json!({"n": 41}))).await;
    assert_eq!(harness.collect("watch-out", 1).await[0].data, json!(42));
    running.stop().await;
}

#[tokio::test]
async fn test_messages_published_while_down_are_kept() {
    let harness = Harness::new();
    harness.observe("watch-out", "out").await;
    let echo = handler_fn("echo", vec![Param::required("data")], |args| {
        Ok(args.value("data").cloned().unwrap_or_default())
    });
    let running = harness
        .launch(component("echo", "e1", Some("in"), Some("out")), echo)
        .await;

    harness.broker.sever_connections();
    // the shared queue survives, so this waits there until the consumer is back
    harness.publish("in", &Envelope::new(json!("queued"))).await;

    let results = harness.collect("watch-out", 1).await;
    assert_eq!(results[0].data, json!("queued"));
    running.stop().await;
}
