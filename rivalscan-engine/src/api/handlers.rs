//! HTTP request handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::AppState;
use crate::db::BrandState;
use crate::error::{ApiError, ApiResult};
use crate::models::{Alert, BrandProfile, BrandSignals, Competitor, ScanPhase, ScanSession};

const DEFAULT_ALERT_LIMIT: u32 = 100;
const MAX_ALERT_LIMIT: u32 = 1000;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartScanRequest {
    pub name: String,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub signals: BrandSignals,
    #[serde(default)]
    pub seed_competitors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StartScanResponse {
    pub session_id: Uuid,
    pub brand_id: String,
    pub phase: ScanPhase,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub session_id: Uuid,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub brand_id: String,
    pub alerts: Vec<Alert>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /brands/:brand_id/scans
///
/// Cancels a running scan of the same brand before the new one starts.
pub async fn start_scan(
    State(state): State<AppState>,
    Path(brand_id): Path<String>,
    Json(request): Json<StartScanRequest>,
) -> ApiResult<(StatusCode, Json<StartScanResponse>)> {
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }

    let brand = BrandProfile {
        brand_id: brand_id.clone(),
        name: request.name,
        website: request.website,
        signals: request.signals,
        seed_competitors: request.seed_competitors,
    };

    let handle = state.orchestrator.start_scan(brand).await.map_err(|e| match e {
        rivalscan_common::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
        other => ApiError::Common(other),
    })?;
    info!(brand_id = %brand_id, session_id = %handle.session_id, "Scan started via API");

    Ok((
        StatusCode::ACCEPTED,
        Json(StartScanResponse {
            session_id: handle.session_id,
            brand_id,
            phase: ScanPhase::Discovering,
        }),
    ))
}

/// GET /scans/:session_id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<ScanSession>> {
    state
        .orchestrator
        .session(session_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("scan session {}", session_id)))
}

/// POST /scans/:session_id/cancel
pub async fn cancel_scan(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    if state.orchestrator.cancel_scan(session_id).await {
        return Ok(Json(CancelResponse {
            session_id,
            status: "cancelling".to_string(),
        }));
    }

    match state.orchestrator.session(session_id).await? {
        Some(session) => Err(ApiError::Conflict(format!(
            "scan session {} is not running (phase {})",
            session_id, session.phase
        ))),
        None => Err(ApiError::NotFound(format!("scan session {}", session_id))),
    }
}

/// GET /brands/:brand_id
///
/// Last completed session with its competitors and insights; never scans.
pub async fn reopen_brand(
    State(state): State<AppState>,
    Path(brand_id): Path<String>,
) -> ApiResult<Json<BrandState>> {
    state
        .orchestrator
        .reopen_brand(&brand_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no completed scan for brand {}", brand_id)))
}

/// GET /brands/:brand_id/alerts?limit=
pub async fn list_alerts(
    State(state): State<AppState>,
    Path(brand_id): Path<String>,
    Query(query): Query<AlertsQuery>,
) -> ApiResult<Json<AlertsResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_ALERT_LIMIT).clamp(1, MAX_ALERT_LIMIT);
    let alerts = state.orchestrator.alerts(&brand_id, limit).await?;
    Ok(Json(AlertsResponse { brand_id, alerts }))
}

/// POST /brands/:brand_id/competitors/:competitor_id/retire
///
/// Takes effect from the next scan of the brand.
pub async fn retire_competitor(
    State(state): State<AppState>,
    Path((brand_id, competitor_id)): Path<(String, Uuid)>,
) -> ApiResult<Json<Competitor>> {
    state
        .orchestrator
        .retire_competitor(&brand_id, competitor_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("competitor {} of brand {}", competitor_id, brand_id)))
}
