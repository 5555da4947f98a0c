//! Data models for the scan pipeline

pub mod alert;
pub mod brand;
pub mod claim;
pub mod competitor;
pub mod insight;
pub mod session;
pub mod snapshot;

pub use alert::{alert_id, Alert};
pub use brand::{BrandProfile, BrandSignals, Category};
pub use claim::{Claim, ClaimArena, ClaimFacet, Provenance};
pub use competitor::{Competitor, DiscoveredCompetitor};
pub use insight::{insight_id, InsightIndex, MergedInsight};
pub use session::{InvalidTransition, PhaseTransition, ScanSession, ScanWarning, WarningCode};
pub use snapshot::{payload_ref, SourceQuery, SourceSnapshot};

pub use rivalscan_common::events::{
    AlertType, CompetitorScanStatus, CrossingDirection, ScanPhase, SourceStatus, SourceType,
};

use uuid::Uuid;

/// Namespace for content-derived ids
const ID_NAMESPACE: Uuid = Uuid::from_u128(0x3c9e_51a2_7d4b_4f08_9a61_c2e5_b7d0_1f34);

/// Name-based (v5) id over the unit-separator-joined parts
pub(crate) fn stable_id(parts: &[&str]) -> Uuid {
    Uuid::new_v5(&ID_NAMESPACE, parts.join("\u{1f}").as_bytes())
}
