//! Server-Sent Events endpoint

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use rivalscan_common::sse::create_scan_event_sse_stream;
use serde::Deserialize;
use std::convert::Infallible;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub brand_id: Option<String>,
}

/// GET /events?brand_id=
///
/// Without `brand_id` every brand's events are streamed.
pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let brand = query.brand_id.filter(|b| !b.trim().is_empty());
    create_scan_event_sse_stream(state.orchestrator.events(), brand)
}
