//! Scan session state machine
//!
//! Discovering → Validating → Scanning → Extracting → Analyzing, then one of
//! Complete, PartialFailure, Failed or Cancelled. Non-terminal phases only
//! move forward; terminal phases never change.

use chrono::{DateTime, Utc};
use rivalscan_common::events::{ScanPhase, SourceType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::Category;

/// Phase transition record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub session_id: Uuid,
    pub old_phase: ScanPhase,
    pub new_phase: ScanPhase,
    pub transitioned_at: DateTime<Utc>,
}

/// Rejected phase transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal phase transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ScanPhase,
    pub to: ScanPhase,
}

/// Category of a session warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    SourceUnavailable,
    SourceTimeout,
    SourceMalformed,
    EntityAmbiguous,
    ExtractionRecovered,
    ExtractionFailed,
    DiscoveryFailed,
    NoCompetitors,
    CompetitorFailed,
    AllSourcesFailed,
    PersistenceFailed,
}

/// Itemized, non-fatal problem recorded on a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanWarning {
    pub code: WarningCode,
    pub competitor_id: Option<Uuid>,
    pub source_type: Option<SourceType>,
    pub message: String,
}

impl ScanWarning {
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        Self {
            code,
            competitor_id: None,
            source_type: None,
            message: message.into(),
        }
    }

    pub fn for_competitor(mut self, competitor_id: Uuid) -> Self {
        self.competitor_id = Some(competitor_id);
        self
    }

    pub fn for_source(mut self, source_type: SourceType) -> Self {
        self.source_type = Some(source_type);
        self
    }
}

/// One scan of one brand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSession {
    pub id: Uuid,
    pub brand_id: String,
    pub phase: ScanPhase,
    pub category: Option<Category>,
    pub competitor_ids: Vec<Uuid>,
    pub warnings: Vec<ScanWarning>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScanSession {
    pub fn new(brand_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            brand_id: brand_id.into(),
            phase: ScanPhase::Discovering,
            category: None,
            competitor_ids: Vec::new(),
            warnings: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Move to `new_phase`, stamping `completed_at` on terminal phases
    pub fn transition_to(&mut self, new_phase: ScanPhase) -> Result<PhaseTransition, InvalidTransition> {
        if !self.phase.can_transition_to(new_phase) {
            return Err(InvalidTransition {
                from: self.phase,
                to: new_phase,
            });
        }

        let now = Utc::now();
        let transition = PhaseTransition {
            session_id: self.id,
            old_phase: self.phase,
            new_phase,
            transitioned_at: now,
        };
        self.phase = new_phase;

        if new_phase.is_terminal() {
            self.completed_at = Some(now);
        }

        Ok(transition)
    }

    pub fn add_warning(&mut self, warning: ScanWarning) {
        self.warnings.push(warning);
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// True for sessions whose results are eligible for reopening
    pub fn is_completed(&self) -> bool {
        matches!(self.phase, ScanPhase::Complete | ScanPhase::PartialFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_starts_discovering() {
        let session = ScanSession::new("acme");
        assert_eq!(session.phase, ScanPhase::Discovering);
        assert!(session.completed_at.is_none());
        assert!(!session.is_terminal());
    }

    #[test]
    fn test_full_forward_path() {
        let mut session = ScanSession::new("acme");
        for phase in [
            ScanPhase::Validating,
            ScanPhase::Scanning,
            ScanPhase::Extracting,
            ScanPhase::Analyzing,
            ScanPhase::Complete,
        ] {
            let t = session.transition_to(phase).unwrap();
            assert_eq!(t.new_phase, phase);
        }
        assert!(session.is_completed());
        assert!(session.completed_at.is_some());
    }

    #[test]
    fn test_terminal_phase_never_changes() {
        let mut session = ScanSession::new("acme");
        session.transition_to(ScanPhase::Cancelled).unwrap();

        for next in [ScanPhase::Scanning, ScanPhase::Complete, ScanPhase::Failed, ScanPhase::Cancelled] {
            assert!(session.transition_to(next).is_err());
            assert_eq!(session.phase, ScanPhase::Cancelled);
        }
    }

    #[test]
    fn test_backward_transition_rejected() {
        let mut session = ScanSession::new("acme");
        session.transition_to(ScanPhase::Scanning).unwrap();
        let err = session.transition_to(ScanPhase::Validating).unwrap_err();
        assert_eq!(err.from, ScanPhase::Scanning);
        assert_eq!(session.phase, ScanPhase::Scanning);
    }
}
