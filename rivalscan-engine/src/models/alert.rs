//! Change alerts

use chrono::{DateTime, Utc};
use rivalscan_common::events::{AlertType, CrossingDirection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stable_id;

/// A change between two insight snapshots of the same competitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub brand_id: String,
    pub competitor_id: Uuid,
    pub alert_type: AlertType,
    /// Set for threshold crossings only
    pub direction: Option<CrossingDirection>,
    pub insight_id: Uuid,
    pub previous_insight_id: Option<Uuid>,
    pub evidence: String,
    pub created_at: DateTime<Utc>,
}

/// Deterministic alert id; replays of the same diff produce the same ids
pub fn alert_id(
    competitor_id: Uuid,
    alert_type: AlertType,
    insight_id: Uuid,
    previous_insight_id: Option<Uuid>,
) -> Uuid {
    let competitor = competitor_id.to_string();
    let insight = insight_id.to_string();
    let previous = previous_insight_id.map(|id| id.to_string()).unwrap_or_default();
    stable_id(&["alert", &competitor, alert_type.as_str(), &insight, &previous])
}
