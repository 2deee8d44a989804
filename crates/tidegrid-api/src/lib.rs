//! tidegrid-api — REST API for TideGrid.
//!
//! Provides axum route handlers for managing target configs, feeding usage,
//! editing standalone workload state, and reading decisions.
//!
//! Target ids have the form `{namespace}/{kind}/{name}` and are addressed
//! as three path segments.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/targets` | List target configs |
//! | POST | `/api/v1/targets` | Create or update a target config |
//! | GET | `/api/v1/targets/{ns}/{kind}/{name}` | Get a target config |
//! | DELETE | `/api/v1/targets/{ns}/{kind}/{name}` | Delete a target config |
//! | GET | `/api/v1/targets/{ns}/{kind}/{name}/decisions` | Recent decision events |
//! | GET | `/api/v1/targets/{ns}/{kind}/{name}/recommendations` | Latest recommendations |
//! | GET | `/api/v1/targets/{ns}/{kind}/{name}/workload` | Standalone workload state |
//! | PUT | `/api/v1/targets/{ns}/{kind}/{name}/workload` | Replace workload state |
//! | POST | `/api/v1/targets/{ns}/{kind}/{name}/usage` | Ingest usage samples |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use tidegrid_metrics::InMemoryUsageProvider;
use tidegrid_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub usage: InMemoryUsageProvider,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(store: StateStore, usage: InMemoryUsageProvider) -> Router {
    let api_state = ApiState { store, usage };

    let target = "/targets/{namespace}/{kind}/{name}";
    let api_routes = Router::new()
        .route("/targets", get(handlers::list_targets).post(handlers::put_target))
        .route(target, get(handlers::get_target).delete(handlers::delete_target))
        .route(&format!("{target}/decisions"), get(handlers::list_decisions))
        .route(&format!("{target}/recommendations"), get(handlers::get_recommendations))
        .route(
            &format!("{target}/workload"),
            get(handlers::get_workload).put(handlers::put_workload),
        )
        .route(&format!("{target}/usage"), post(handlers::ingest_usage))
        .with_state(api_state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(api_state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> (Router, StateStore) {
        let store = StateStore::open_in_memory().unwrap();
        let usage = InMemoryUsageProvider::new(Duration::from_secs(3600));
        (build_router(store.clone(), usage), store)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn target_body(min: u32, max: u32) -> serde_json::Value {
        serde_json::json!({
            "target": { "namespace": "default", "kind": "deployment", "name": "api" },
            "horizontal": {
                "min_replicas": min,
                "max_replicas": max,
                "metrics": [{ "name": "cpu", "target_value": 60.0, "target_type": "utilization" }]
            }
        })
    }

    #[tokio::test]
    async fn create_then_fetch_target() {
        let (app, _) = router();

        let resp = app
            .clone()
            .oneshot(json_request("POST", "/api/v1/targets", target_body(1, 5)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app
            .oneshot(
                Request::get("/api/v1/targets/default/deployment/api")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["horizontal"]["max_replicas"], 5);
        assert_eq!(body["data"]["horizontal"]["stabilization_window"], "5m");
    }

    #[tokio::test]
    async fn invalid_target_is_rejected() {
        let (app, store) = router();

        let resp = app
            .oneshot(json_request("POST", "/api/v1/targets", target_body(6, 5)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("min_replicas"));
        assert!(store.list_targets().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_target_is_not_found() {
        let (app, _) = router();
        let resp = app
            .oneshot(
                Request::get("/api/v1/targets/default/deployment/missing/recommendations")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn usage_ingest_feeds_provider() {
        let store = StateStore::open_in_memory().unwrap();
        let usage = InMemoryUsageProvider::new(Duration::from_secs(3600));
        let app = build_router(store, usage.clone());

        let body = serde_json::json!({
            "metric": "cpu",
            "samples": [
                { "instance_id": "i-0", "container_name": "app", "value": 120.0 },
                { "instance_id": "i-1", "container_name": "app", "value": 80.0, "timestamp": 1 }
            ]
        });
        let resp = app
            .oneshot(json_request("POST", "/api/v1/targets/default/deployment/api/usage", body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(usage.sample_count("default/deployment/api", "cpu").await, 1);
    }

    #[tokio::test]
    async fn metrics_endpoint_is_text() {
        let (app, _) = router();
        let resp = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}
