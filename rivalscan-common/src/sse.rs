//! Server-Sent Events (SSE) utilities

use crate::events::{EventBus, ScanEvent};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Convert a scan event into an SSE frame, `None` if it cannot be serialized
pub fn to_sse_event(event: &ScanEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.event_type()).data(json)),
        Err(e) => {
            warn!("SSE: Failed to serialize event {}: {}", event.event_type(), e);
            None
        }
    }
}

/// Stream scan events from the bus, optionally restricted to one brand
///
/// Sends an initial `ConnectionStatus` frame, then forwards events and a
/// heartbeat comment every 15 seconds. A subscriber that lags behind the bus
/// skips the dropped events and keeps streaming.
pub fn create_scan_event_sse_stream(
    event_bus: &EventBus,
    brand_filter: Option<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(brand = ?brand_filter, "New SSE client connected to scan events");

    let mut rx = event_bus.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        loop {
            tokio::select! {
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            let wanted = brand_filter
                                .as_deref()
                                .map_or(true, |brand| event.brand_id() == brand);
                            if wanted {
                                if let Some(frame) = to_sse_event(&event) {
                                    yield Ok(frame);
                                }
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "SSE: Subscriber lagged, events dropped");
                        }
                        Err(RecvError::Closed) => {
                            info!("SSE: Event bus closed, ending stream");
                            break;
                        }
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat"))
}
