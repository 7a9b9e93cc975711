//! Thin translations onto the core — no queue logic lives in this module.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use queue_core::StatsEstimator;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub user_id: String,
    pub tier: String,
    pub payload: Value,
}

pub async fn submit_project(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let job = state
        .admission
        .admit(&req.user_id, &req.tier, req.payload)
        .await?;
    state.queue.submit(&job).await?;

    let view = state.queue.get_status(job.job_id).await?;
    let body = serde_json::to_value(view).map_err(|e| AppError::bad_request(e.to_string()))?;
    Ok((StatusCode::ACCEPTED, Json(body)))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let view = state.queue.get_status(job_id).await?;
    let body = serde_json::to_value(view).map_err(|e| AppError::bad_request(e.to_string()))?;
    Ok(Json(body))
}

pub async fn cancel_project(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    state.queue.cancel(job_id).await?;
    let view = state.queue.get_status(job_id).await?;
    Ok(Json(json!({
        "job_id": job_id,
        "status": view.status,
    })))
}

pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let estimator = StatsEstimator::new(Arc::clone(state.queue.store()), state.config.clone());
    let stats = estimator
        .queue_stats()
        .await
        .map_err(queue_core::QueueError::Store)?;
    let body = serde_json::to_value(stats).map_err(|e| AppError::bad_request(e.to_string()))?;
    Ok(Json(body))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
    }))
}
