//! Event types for the rivalscan event system
//!
//! Provides the shared scan event definitions and the EventBus used as the
//! subscriber registry for scan progress.

mod scan_types;

pub use scan_types::{
    AlertType, CompetitorScanStatus, CrossingDirection, ScanPhase, SourceStatus, SourceType,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Scan progress events
///
/// Every event carries the session and brand it belongs to so subscribers can
/// filter a shared stream. Events for one competitor are emitted in causal
/// order (status changes before insight-ready); no ordering holds across
/// competitors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ScanEvent {
    /// Session moved to a new phase
    PhaseChanged {
        session_id: Uuid,
        brand_id: String,
        old_phase: ScanPhase,
        new_phase: ScanPhase,
        timestamp: DateTime<Utc>,
    },

    /// A competitor was discovered and resolved to a canonical identity
    CompetitorFound {
        session_id: Uuid,
        brand_id: String,
        competitor_id: Uuid,
        display_name: String,
        canonical_key: String,
        timestamp: DateTime<Utc>,
    },

    /// A competitor's scan status changed
    ///
    /// Emitted once per settled source (with `source_type` and
    /// `source_status` set) and once when the competitor itself settles.
    CompetitorStatusChanged {
        session_id: Uuid,
        brand_id: String,
        competitor_id: Uuid,
        status: CompetitorScanStatus,
        source_type: Option<SourceType>,
        source_status: Option<SourceStatus>,
        timestamp: DateTime<Utc>,
    },

    /// A merged insight is available
    InsightReady {
        session_id: Uuid,
        brand_id: String,
        insight_id: Uuid,
        competitor_ids: Vec<Uuid>,
        title: String,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },

    /// A change alert was raised against the previous snapshot
    AlertCreated {
        session_id: Uuid,
        brand_id: String,
        alert_id: Uuid,
        competitor_id: Uuid,
        alert_type: AlertType,
        insight_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl ScanEvent {
    /// Wire name of the event, used as the SSE event field
    pub fn event_type(&self) -> &'static str {
        match self {
            ScanEvent::PhaseChanged { .. } => "phase-changed",
            ScanEvent::CompetitorFound { .. } => "competitor-found",
            ScanEvent::CompetitorStatusChanged { .. } => "competitor-status-changed",
            ScanEvent::InsightReady { .. } => "insight-ready",
            ScanEvent::AlertCreated { .. } => "alert-created",
        }
    }

    pub fn session_id(&self) -> Uuid {
        match self {
            ScanEvent::PhaseChanged { session_id, .. }
            | ScanEvent::CompetitorFound { session_id, .. }
            | ScanEvent::CompetitorStatusChanged { session_id, .. }
            | ScanEvent::InsightReady { session_id, .. }
            | ScanEvent::AlertCreated { session_id, .. } => *session_id,
        }
    }

    pub fn brand_id(&self) -> &str {
        match self {
            ScanEvent::PhaseChanged { brand_id, .. }
            | ScanEvent::CompetitorFound { brand_id, .. }
            | ScanEvent::CompetitorStatusChanged { brand_id, .. }
            | ScanEvent::InsightReady { brand_id, .. }
            | ScanEvent::AlertCreated { brand_id, .. } => brand_id,
        }
    }
}

/// Central event distribution bus
///
/// Backed by a tokio broadcast channel: emission never blocks, every
/// subscriber holding a receiver at send time gets the event, and a receiver
/// that falls more than `capacity` events behind observes `Lagged` instead of
/// slowing the producer down. Subscribing or dropping a receiver is safe while
/// emission is in progress.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScanEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// ```
    /// use rivalscan_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity: capacity.max(1) }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received. Dropping the
    /// receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ScanEvent,
    ) -> Result<usize, broadcast::error::SendError<ScanEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ScanEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
