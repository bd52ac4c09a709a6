//! HTTP request handlers for the status surface

use crate::api::server::AppContext;
use crate::pipeline::{PipelineSnapshot, WorkerStatus};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use fallguard_common::db::FallEventRecord;
use serde::{Deserialize, Serialize};
use tracing::error;

/// JPEG quality for frames served over HTTP
const FRAME_JPEG_QUALITY: u8 = 80;

const DEFAULT_EVENT_LIMIT: i64 = 50;
const MAX_EVENT_LIMIT: i64 = 500;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    git_hash: String,
    build_timestamp: String,
    build_profile: String,
    uptime_secs: i64,
    pipelines: usize,
    pollers: usize,
    models: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

#[derive(Debug, Serialize)]
pub struct PipelinesResponse {
    pipelines: Vec<WorkerStatus>,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RecentEventsResponse {
    events: Vec<FallEventRecord>,
}

type ApiError = (StatusCode, Json<StatusResponse>);

fn api_error(code: StatusCode, message: impl Into<String>) -> ApiError {
    (
        code,
        Json(StatusResponse {
            status: message.into(),
        }),
    )
}

fn not_running(source_id: i64) -> ApiError {
    api_error(
        StatusCode::NOT_FOUND,
        format!("no pipeline running for source {}", source_id),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "fallguard-pd".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
        uptime_secs: ctx.state.uptime_secs(),
        pipelines: ctx.manager.active_sources().len(),
        pollers: ctx.manager.poller_count(),
        models: ctx.manager.models().loaded(),
    })
}

/// GET /pipelines - status of every running pipeline
pub async fn list_pipelines(State(ctx): State<AppContext>) -> Json<PipelinesResponse> {
    let pipelines = ctx
        .manager
        .active_sources()
        .into_iter()
        .filter_map(|id| ctx.manager.get(id))
        .map(|worker| worker.status())
        .collect();
    Json(PipelinesResponse { pipelines })
}

/// GET /pipelines/:source_id/latest - tracks and falls on the latest processed frame
pub async fn latest_snapshot(
    State(ctx): State<AppContext>,
    Path(source_id): Path<i64>,
) -> Result<Json<PipelineSnapshot>, ApiError> {
    let worker = ctx.manager.get(source_id).ok_or_else(|| not_running(source_id))?;
    Ok(Json(worker.latest().as_ref().clone()))
}

/// GET /pipelines/:source_id/frame.jpg - latest annotated frame
pub async fn latest_frame(
    State(ctx): State<AppContext>,
    Path(source_id): Path<i64>,
) -> Result<Response, ApiError> {
    let worker = ctx.manager.get(source_id).ok_or_else(|| not_running(source_id))?;
    let Some(frame) = worker.latest().frame.clone() else {
        return Err(api_error(StatusCode::NOT_FOUND, "no frame processed yet"));
    };

    let encoded = tokio::task::spawn_blocking(move || frame.encode_jpeg(FRAME_JPEG_QUALITY))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match encoded {
        Ok(jpeg) => Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response()),
        Err(e) => {
            error!("Failed to encode frame for source {}: {}", source_id, e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// GET /events/recent?limit=N - newest fall events first
pub async fn recent_events(
    State(ctx): State<AppContext>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<RecentEventsResponse>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .clamp(1, MAX_EVENT_LIMIT);

    match ctx.store.recent_events(limit).await {
        Ok(events) => Ok(Json(RecentEventsResponse { events })),
        Err(e) => {
            error!("Failed to load recent events: {}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
