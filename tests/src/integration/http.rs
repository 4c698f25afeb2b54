//! The gateway's HTTP surface in front of live components.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use relay_gateway::GatewayService;
use relay_invoker::{handler_fn, HandlerError, Param};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::support::*;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_query_parameters_become_payload() {
    let harness = Harness::new();
    // query values arrive as strings
    let double = handler_fn("double", vec![Param::required("x")], |args| {
        let x: i64 = args
            .get::<String>("x")?
            .parse()
            .map_err(|e| HandlerError::new("ValueError", format!("{e}")))?;
        Ok(json!(x * 2))
    });
    let running = harness
        .launch(component("double", "d1", Some("double"), Some("doubled")), double)
        .await;
    let service = GatewayService::from_gateway(harness.gateway("gw-http-query").await);

    let response = service
        .router()
        .oneshot(Request::get("/double?x=21").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!(42));

    service.gateway().shutdown().await;
    running.stop().await;
}

#[tokio::test]
async fn test_json_body_on_nested_path() {
    let harness = Harness::new();
    let product = handler_fn(
        "product",
        vec![Param::required("x"), Param::required("y")],
        |args| Ok(json!(args.number("x")? * args.number("y")?)),
    );
    let running = harness
        .launch(component("product", "p1", Some("math.product"), None), product)
        .await;
    let service = GatewayService::from_gateway(harness.gateway("gw-http-body").await);

    let response = service
        .router()
        .oneshot(
            Request::post("/math/product")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"x": 4, "y": 5}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!(20.0));

    service.gateway().shutdown().await;
    running.stop().await;
}

#[tokio::test]
async fn test_error_reply_maps_to_bad_gateway() {
    let harness = Harness::new();
    let failing = handler_fn("fail", vec![], |_| {
        Err(HandlerError::new("ValueError", "no good"))
    });
    let running = harness
        .launch(component("fail", "f1", Some("fail"), None), failing)
        .await;
    let service = GatewayService::from_gateway(harness.gateway("gw-http-error").await);

    let response = service
        .router()
        .oneshot(Request::get("/fail").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], json!("ValueError"));
    assert_eq!(body["error"]["message"], json!("no good"));
    assert!(body["traceback"].is_string());

    service.gateway().shutdown().await;
    running.stop().await;
}
