//! The broker HTTP service: a small job queue that bot and worker clients
//! drive through token-authenticated routes. See `routes` for the handlers
//! and `broker_sqlite` for the storage/claim semantics this binary wraps.

pub mod auth;
pub mod config;
pub mod dto;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use broker_sqlite::SqliteJobStore;
use tower_http::trace::TraceLayer;

pub use config::BrokerConfig;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteJobStore>,
    pub config: Arc<BrokerConfig>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/jobs", post(routes::create_job))
        .route("/jobs/next", get(routes::next_job))
        .route("/jobs/:job_id", get(routes::get_job))
        .route("/jobs/:job_id/result", post(routes::post_result))
        .route("/jobs/:job_id/fail", post(routes::post_fail))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    // A real temp file rather than ":memory:" — separate pooled connections
    // to ":memory:" are independent databases, which breaks these tests as
    // soon as more than one connection in the pool gets used.
    async fn test_app() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("broker-test.db");
        let store = SqliteJobStore::connect(db_path.to_str().unwrap(), 60).await.unwrap();
        let config = BrokerConfig {
            db_path: db_path.to_string_lossy().into_owned(),
            host: "127.0.0.1".into(),
            port: 8000,
            worker_token: "wtok".into(),
            bot_token: "btok".into(),
            lease_seconds: 60,
        };
        (app(AppState { store: Arc::new(store), config: Arc::new(config) }), dir)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_requires_no_auth() {
        let (app, _dir) = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_job_without_token_is_unauthorized() {
        let (app, _dir) = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"command":"ping","payload":"{}"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_then_fetch_job() {
        let (app, _dir) = test_app().await;
        let create_resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs")
                    .header("content-type", "application/json")
                    .header("X-Bot-Token", "btok")
                    .body(Body::from(json!({"command":"ping","payload":"{}"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create_resp.status(), StatusCode::OK);
        let created = body_json(create_resp).await;
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["status"], "queued");

        let get_resp = app
            .oneshot(
                Request::builder()
                    .uri(format!("/jobs/{id}"))
                    .header("X-Bot-Token", "btok")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(get_resp.status(), StatusCode::OK);
        let fetched = body_json(get_resp).await;
        assert_eq!(fetched["status"], "queued");
    }

    #[tokio::test]
    async fn claim_then_result_then_idempotent_repeat() {
        let (app, _dir) = test_app().await;
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs")
                    .header("content-type", "application/json")
                    .header("X-Bot-Token", "btok")
                    .body(Body::from(json!({"command":"ping","payload":"{}"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let claim_resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/jobs/next")
                    .header("X-Worker-Token", "wtok")
                    .header("X-Worker-Id", "w1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let claimed = body_json(claim_resp).await;
        let job_id = claimed["job"]["id"].as_str().unwrap().to_string();
        assert_eq!(claimed["job"]["status"], "running");

        let result_resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/jobs/{job_id}/result"))
                    .header("content-type", "application/json")
                    .header("X-Worker-Token", "wtok")
                    .body(Body::from(json!({"result":"pong"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(result_resp.status(), StatusCode::OK);
        let first = body_json(result_resp).await;
        assert_eq!(first["status"], "done");

        let repeat_resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/jobs/{job_id}/result"))
                    .header("content-type", "application/json")
                    .header("X-Worker-Token", "wtok")
                    .body(Body::from(json!({"result":"pong again"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(repeat_resp.status(), StatusCode::OK);
        let second = body_json(repeat_resp).await;
        assert_eq!(second["status"], "done");
    }

    #[tokio::test]
    async fn finish_without_claim_is_bad_request() {
        let (app, _dir) = test_app().await;
        let create_resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs")
                    .header("content-type", "application/json")
                    .header("X-Bot-Token", "btok")
                    .body(Body::from(json!({"command":"ping","payload":"{}"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let created = body_json(create_resp).await;
        let id = created["id"].as_str().unwrap().to_string();

        let result_resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/jobs/{id}/result"))
                    .header("content-type", "application/json")
                    .header("X-Worker-Token", "wtok")
                    .body(Body::from(json!({"result":"pong"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(result_resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (app, _dir) = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/jobs/does-not-exist")
                    .header("X-Bot-Token", "btok")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
