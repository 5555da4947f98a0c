//! HTTP API tests driven through the router with `tower::ServiceExt::oneshot`

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use helpers::*;
use rivalscan_common::db::init_memory_database;
use rivalscan_engine::api::{create_router, AppState};
use rivalscan_engine::db::ScanStore;

async fn setup(sources: &MockSources) -> axum::Router {
    let pool = init_memory_database().await.unwrap();
    let engine = engine(sources, Arc::new(ScriptedExtractor::confident(0.7)), Some(ScanStore::new(pool)));
    create_router(AppState::new(engine))
}

async fn request(app: &axum::Router, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(path);
    let request = match body {
        Some(json_body) => builder
            .header("content-type", "application/json")
            .body(Body::from(json_body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn wait_for_terminal(app: &axum::Router, session_id: &str) -> Value {
    for _ in 0..100 {
        let (status, session) = request(app, "GET", &format!("/scans/{}", session_id), None).await;
        assert_eq!(status, StatusCode::OK);
        let phase = session["phase"].as_str().unwrap_or_default().to_string();
        if ["complete", "partial_failure", "failed", "cancelled"].contains(&phase.as_str()) {
            return session;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session {} never finished", session_id);
}

#[tokio::test]
async fn test_health() {
    let app = setup(&MockSources::healthy()).await;
    let (status, body) = request(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "rivalscan-engine");
    assert_eq!(body["persistence"], true);
}

#[tokio::test]
async fn test_scan_lifecycle_over_http() {
    let app = setup(&MockSources::healthy()).await;

    let (status, _) = request(&app, "GET", "/brands/brand-h1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, started) = request(
        &app,
        "POST",
        "/brands/brand-h1/scans",
        Some(json!({
            "name": "Brandco",
            "signals": { "description": "Scheduling software for clinics", "audience_hints": ["b2b"] },
            "seed_competitors": ["Acme", "Globex"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["brand_id"], "brand-h1");
    let session_id = started["session_id"].as_str().unwrap().to_string();

    let session = wait_for_terminal(&app, &session_id).await;
    assert_eq!(session["phase"], "complete");
    assert_eq!(session["competitor_ids"].as_array().unwrap().len(), 2);

    let (status, state) = request(&app, "GET", "/brands/brand-h1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["session"]["id"], session_id.as_str());
    assert_eq!(state["insights"].as_array().unwrap().len(), 2);

    let (status, alerts) = request(&app, "GET", "/brands/brand-h1/alerts?limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(alerts["alerts"].as_array().unwrap().is_empty());

    // Finished sessions cannot be cancelled
    let (status, body) = request(&app, "POST", &format!("/scans/{}/cancel", session_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_retire_competitor_over_http() {
    let app = setup(&MockSources::healthy()).await;
    let scan = json!({ "name": "Brandco", "seed_competitors": ["Acme", "Globex"] });

    let (_, started) = request(&app, "POST", "/brands/brand-h4/scans", Some(scan.clone())).await;
    wait_for_terminal(&app, started["session_id"].as_str().unwrap()).await;

    let (_, state) = request(&app, "GET", "/brands/brand-h4", None).await;
    let acme = state["competitors"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["canonical_key"] == "acme")
        .map(|c| c["id"].as_str().unwrap().to_string())
        .unwrap();

    let path = format!("/brands/brand-h4/competitors/{}/retire", acme);
    let (status, body) = request(&app, "POST", &path, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["retired"], true);

    let (status, body) = request(&app, "POST", &format!("/brands/brand-h5/competitors/{}/retire", acme), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (_, started) = request(&app, "POST", "/brands/brand-h4/scans", Some(scan)).await;
    let session = wait_for_terminal(&app, started["session_id"].as_str().unwrap()).await;
    assert_eq!(session["phase"], "complete");
    let ids = session["competitor_ids"].as_array().unwrap();
    assert_eq!(ids.len(), 1);
    assert_ne!(ids[0], acme.as_str());
}

#[tokio::test]
async fn test_cancel_running_scan_over_http() {
    let app = setup(&MockSources::new(Behavior::Delay(Duration::from_millis(400)))).await;

    let (status, started) = request(
        &app,
        "POST",
        "/brands/brand-h2/scans",
        Some(json!({ "name": "Brandco", "seed_competitors": ["Acme"] })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let session_id = started["session_id"].as_str().unwrap().to_string();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let (status, body) = request(&app, "POST", &format!("/scans/{}/cancel", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelling");

    let session = wait_for_terminal(&app, &session_id).await;
    assert_eq!(session["phase"], "cancelled");
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let app = setup(&MockSources::healthy()).await;
    let id = uuid::Uuid::new_v4();

    let (status, body) = request(&app, "GET", &format!("/scans/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = request(&app, "POST", &format!("/scans/{}/cancel", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_start_scan_rejects_blank_name() {
    let app = setup(&MockSources::healthy()).await;
    let (status, body) = request(&app, "POST", "/brands/brand-h3/scans", Some(json!({ "name": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}
