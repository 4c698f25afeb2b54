//! Gateway HTTP surface.
//!
//! `GET|POST /<topic-path>`: path segments become topic segments
//! (`/product/fast` calls `product.fast`). A JSON body, or the query
//! parameters when there is none, is the request payload. The reply
//! envelope's `data` is the response body.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    routing::{any, get},
    Json, Router,
};
use relay_bus::Transport;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::domain::config::GatewayConfig;
use crate::domain::error::GatewayError;
use crate::rpc::RpcGateway;

/// HTTP front end over one [`RpcGateway`].
pub struct GatewayService {
    gateway: Arc<RpcGateway>,
}

impl GatewayService {
    pub fn new(config: GatewayConfig, transport: Arc<dyn Transport>) -> Result<Self, GatewayError> {
        Ok(Self {
            gateway: RpcGateway::new(config, transport)?,
        })
    }

    pub fn from_gateway(gateway: Arc<RpcGateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<RpcGateway> {
        &self.gateway
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", any(missing_topic))
            .route("/health", get(health_check))
            .route("/*path", any(handle_call))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.gateway))
    }

    /// Start the gateway, bind the configured address and serve until `shutdown`.
    pub async fn run(
        &self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(self.gateway.config().http_addr()).await?;
        self.serve(listener, shutdown).await
    }

    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), GatewayError> {
        self.gateway.start().await?;
        info!(addr = %listener.local_addr()?, "Gateway listening");

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;
        self.gateway.shutdown().await;
        served?;
        Ok(())
    }
}

/// `/a/b/c` → `a.b.c`; empty segments are dropped.
pub fn topic_from_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

async fn missing_topic() -> GatewayError {
    GatewayError::InvalidRequest("request path must name a topic".into())
}

async fn health_check(State(gateway): State<Arc<RpcGateway>>) -> Json<Value> {
    Json(json!({
        "status": if gateway.is_shutting_down() { "stopping" } else { "ok" },
        "instance_id": gateway.instance_id(),
        "pending": gateway.pending().pending_count(),
    }))
}

async fn handle_call(
    State(gateway): State<Arc<RpcGateway>>,
    Path(path): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
    body: Bytes,
) -> Result<Json<Value>, GatewayError> {
    let topic = topic_from_path(&path);
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        json!(query)
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| GatewayError::InvalidRequest(format!("malformed JSON body: {e}")))?
    };
    let reply = gateway.call(&topic, payload, None).await?;
    Ok(Json(reply.data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use relay_bus::InMemoryBroker;
    use std::time::Duration;
    use tower::ServiceExt;

    fn service(rpc_timeout_ms: u64) -> GatewayService {
        let config = GatewayConfig {
            instance_id: Some("gw-http".into()),
            rpc_timeout_ms,
            ..GatewayConfig::default()
        };
        GatewayService::new(config, Arc::new(InMemoryBroker::new())).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_topic_from_path() {
        assert_eq!(topic_from_path("product"), "product");
        assert_eq!(topic_from_path("a/b/c"), "a.b.c");
        assert_eq!(topic_from_path("/a//b/"), "a.b");
    }

    #[tokio::test]
    async fn test_root_path_rejected() {
        let response = service(1000)
            .router()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"]["type"],
            json!("InvalidRequest")
        );
    }

    #[tokio::test]
    async fn test_malformed_body_rejected() {
        let response = service(1000)
            .router()
            .oneshot(Request::post("/product").body(Body::from("{oops")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unanswered_call_times_out_with_504() {
        let service = service(200);
        service.gateway().start().await.unwrap();

        let response = tokio::time::timeout(
            Duration::from_secs(5),
            service
                .router()
                .oneshot(Request::get("/nobody/home?x=1").body(Body::empty()).unwrap()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body_json(response).await["error"]["type"], json!("Timeout"));
        service.gateway().shutdown().await;
    }

    #[tokio::test]
    async fn test_health() {
        let response = service(1000)
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["status"], json!("ok"));
        assert_eq!(body["instance_id"], json!("gw-http"));
    }
}
