//! Exercises the HTTP surface against the in-memory store double, without a
//! real Redis or a bound socket.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use queue_core::{AdmissionController, QueueConfig, QueueManager, StoreAdapter};
use queue_server::routes::build_router;
use queue_server::state::AppState;
use queue_testing::InMemoryStore;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> axum::Router {
    let config = QueueConfig::default();
    let store = Arc::new(InMemoryStore::new()) as Arc<dyn StoreAdapter>;
    let queue = Arc::new(QueueManager::new(store.clone(), config.clone()));
    let admission = Arc::new(AdmissionController::new(store, config.clone()));
    build_router(AppState {
        admission,
        queue,
        config,
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_healthy() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn submit_then_read_status_round_trips() {
    let app = app();
    let submit_body = json!({"user_id": "user-1", "tier": "pro", "payload": {"prompt": "hi"}});
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/projects")
                .header("content-type", "application/json")
                .body(Body::from(submit_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let submitted = body_json(response).await;
    assert_eq!(submitted["status"], "queued");
    let job_id = submitted["job_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/projects/{job_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = body_json(response).await;
    assert_eq!(status["job_id"], job_id);
    assert_eq!(status["status"], "queued");
    assert_eq!(status["queue_position"], 1);
}

#[tokio::test]
async fn submit_with_invalid_tier_is_bad_request() {
    let submit_body = json!({"user_id": "user-1", "tier": "hobbyist", "payload": {"prompt": "hi"}});
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/projects")
                .header("content-type", "application/json")
                .body(Body::from(submit_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "INVALID_TIER");
}

#[tokio::test]
async fn unknown_job_id_is_not_found() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri(format!("/projects/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_removes_job_from_pending() {
    let app = app();
    let submit_body = json!({"user_id": "user-1", "tier": "indie", "payload": {"prompt": "hi"}});
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/projects")
                .header("content-type", "application/json")
                .body(Body::from(submit_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let submitted = body_json(response).await;
    let job_id = submitted["job_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/projects/{job_id}/cancel"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "cancelled");
}

#[tokio::test]
async fn queue_stats_reports_pending_depth() {
    let app = app();
    let submit_body = json!({"user_id": "user-1", "tier": "free", "payload": {"prompt": "hi"}});
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/projects")
                .header("content-type", "application/json")
                .body(Body::from(submit_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .oneshot(Request::builder().uri("/queue/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["pending"], 1);
}
