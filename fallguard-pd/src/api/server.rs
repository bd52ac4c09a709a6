//! HTTP server setup and routing
//!
//! Read-only status surface: health, pipeline status, latest annotated frames, recent
//! events and an SSE stream of system events.

use crate::error::{Error, Result};
use crate::pipeline::PipelineManager;
use crate::state::SharedState;
use crate::store::EventStore;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub state: Arc<SharedState>,
    pub manager: Arc<PipelineManager>,
    pub store: Arc<dyn EventStore>,
}

/// Build the router with all routes
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(super::handlers::health))
        .route("/pipelines", get(super::handlers::list_pipelines))
        .route("/pipelines/:source_id/latest", get(super::handlers::latest_snapshot))
        .route("/pipelines/:source_id/frame.jpg", get(super::handlers::latest_frame))
        .route("/events/recent", get(super::handlers::recent_events))
        .route("/events/stream", get(super::sse::event_stream))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        // Enable CORS for local dashboards
        .layer(CorsLayer::permissive())
}

/// Run the HTTP server until `ctx.state.shutdown` is cancelled
pub async fn run(ctx: AppContext, port: u16) -> Result<()> {
    let shutdown = ctx.state.shutdown.clone();
    let app = build_router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    info!("HTTP server stopped");
    Ok(())
}
