//! Delivery order: a component acknowledges and publishes in the order it
//! consumed, and a generator's results come out in emission order.

use std::sync::Arc;
use std::time::Duration;

use relay_invoker::{handler_fn, ContextHandler, Param};
use relay_types::Envelope;
use serde_json::json;

use super::support::*;

const MESSAGES: i64 = 8;

#[tokio::test]
async fn test_results_follow_consumption_order() {
    let harness = Harness::new();
    harness.observe("watch-out", "out").await;
    // earlier messages take longer, so any overtaking would show
    let slow = handler_fn("slow", vec![Param::required("i")], |args| {
        let i = args.get::<i64>("i")?;
        std::thread::sleep(Duration::from_millis((MESSAGES - i) as u64 * 5));
        Ok(json!(i))
    });
    let running = harness
        .launch(component("slow", "s1", Some("in"), Some("out")), slow)
        .await;

    for i in 0..MESSAGES {
        harness.publish("in", &Envelope::new(json!({"i": i}))).await;
    }

    let results = harness.collect("watch-out", MESSAGES as usize).await;
    let order: Vec<i64> = results.iter().filter_map(|e| e.data.as_i64()).collect();
    assert_eq!(order, (0..MESSAGES).collect::<Vec<_>>());
    running.stop().await;
}

#[tokio::test]
async fn test_generator_results_in_emission_order() {
    let harness = Harness::new();
    harness.observe("watch-counted", "counted").await;
    let count = Arc::new(ContextHandler::generator(
        "count",
        vec![Param::required("n")],
        |ctx, args| {
            for i in 0..args.get::<u64>("n")? {
                ctx.emit(json!(i))?;
            }
            Ok(())
        },
    ));
    let running = harness
        .launch(component("count", "c1", Some("count"), Some("counted")), count)
        .await;

    let mut request = Envelope::new(json!({"n": 3}));
    request.stamp();
    harness.publish("count", &request).await;

    let results = harness.collect("watch-counted", 3).await;
    let values: Vec<_> = results.iter().map(|e| e.data.clone()).collect();
    assert_eq!(values, vec![json!(0), json!(1), json!(2)]);
    let conversation = request.conversation_id().unwrap();
    assert!(results
        .iter()
        .all(|e| e.conversation_id() == Some(conversation)));

    settle().await;
    assert_eq!(harness.depth("watch-counted"), 0);
    running.stop().await;
}
