//! HTTP API
//!
//! Thin layer over `OrchestratorContext`: start and cancel scans, read
//! session status, reopen a brand, retire competitors and stream scan
//! events.

pub mod handlers;
pub mod server;
pub mod sse;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::orchestrator::OrchestratorContext;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<OrchestratorContext>,
}

impl AppState {
    pub fn new(orchestrator: Arc<OrchestratorContext>) -> Self {
        Self { orchestrator }
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Scans
        .route("/brands/:brand_id/scans", post(handlers::start_scan))
        .route("/scans/:session_id", get(handlers::get_session))
        .route("/scans/:session_id/cancel", post(handlers::cancel_scan))
        // Brands
        .route("/brands/:brand_id", get(handlers::reopen_brand))
        .route("/brands/:brand_id/alerts", get(handlers::list_alerts))
        .route(
            "/brands/:brand_id/competitors/:competitor_id/retire",
            post(handlers::retire_competitor),
        )
        // SSE events
        .route("/events", get(sse::event_stream))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cache = state.orchestrator.cache();
    Json(json!({
        "status": "ok",
        "module": "rivalscan-engine",
        "version": env!("CARGO_PKG_VERSION"),
        "persistence": state.orchestrator.store().is_some(),
        "subscribers": state.orchestrator.events().subscriber_count(),
        "cache": {
            "snapshots": cache.snapshot_stats(),
            "claims": cache.claim_stats(),
        },
    }))
}
