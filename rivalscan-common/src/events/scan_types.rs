//! Scan-related supporting types shared by events and the engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scan session phase
///
/// Non-terminal phases advance strictly forward; any phase may move into a
/// terminal phase, and a terminal phase never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Discovering,
    Validating,
    Scanning,
    Extracting,
    Analyzing,
    Complete,
    PartialFailure,
    Failed,
    Cancelled,
}

impl ScanPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanPhase::Complete | ScanPhase::PartialFailure | ScanPhase::Failed | ScanPhase::Cancelled
        )
    }

    /// Position in the forward order; terminal phases share the last rank
    fn rank(self) -> u8 {
        match self {
            ScanPhase::Discovering => 0,
            ScanPhase::Validating => 1,
            ScanPhase::Scanning => 2,
            ScanPhase::Extracting => 3,
            ScanPhase::Analyzing => 4,
            _ => 5,
        }
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: ScanPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.is_terminal() || next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScanPhase::Discovering => "discovering",
            ScanPhase::Validating => "validating",
            ScanPhase::Scanning => "scanning",
            ScanPhase::Extracting => "extracting",
            ScanPhase::Analyzing => "analyzing",
            ScanPhase::Complete => "complete",
            ScanPhase::PartialFailure => "partial_failure",
            ScanPhase::Failed => "failed",
            ScanPhase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "discovering" => ScanPhase::Discovering,
            "validating" => ScanPhase::Validating,
            "scanning" => ScanPhase::Scanning,
            "extracting" => ScanPhase::Extracting,
            "analyzing" => ScanPhase::Analyzing,
            "complete" => ScanPhase::Complete,
            "partial_failure" => ScanPhase::PartialFailure,
            "failed" => ScanPhase::Failed,
            "cancelled" => ScanPhase::Cancelled,
            other => return Err(format!("unknown scan phase: {}", other)),
        })
    }
}

/// External source family a signal is pulled from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Website,
    Reviews,
    Ads,
    Research,
    Social,
    LocalListings,
}

impl SourceType {
    pub const ALL: [SourceType; 6] = [
        SourceType::Website,
        SourceType::Reviews,
        SourceType::Ads,
        SourceType::Research,
        SourceType::Social,
        SourceType::LocalListings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Website => "website",
            SourceType::Reviews => "reviews",
            SourceType::Ads => "ads",
            SourceType::Research => "research",
            SourceType::Social => "social",
            SourceType::LocalListings => "local_listings",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown source type: {}", s))
    }
}

/// Outcome of a single source fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    Timeout,
    Malformed,
    Unavailable,
}

impl SourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceStatus::Ok => "ok",
            SourceStatus::Timeout => "timeout",
            SourceStatus::Malformed => "malformed",
            SourceStatus::Unavailable => "unavailable",
        }
    }
}

impl FromStr for SourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ok" => SourceStatus::Ok,
            "timeout" => SourceStatus::Timeout,
            "malformed" => SourceStatus::Malformed,
            "unavailable" => SourceStatus::Unavailable,
            other => return Err(format!("unknown source status: {}", other)),
        })
    }
}

/// Per-competitor scan progress within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitorScanStatus {
    Pending,
    Scanning,
    /// Every source settled successfully
    Scanned,
    /// Some but not all sources failed
    Partial,
    /// Every source failed
    Failed,
}

/// Kind of change an alert reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    NewHighConfidenceInsight,
    MaterialClaimChange,
    ConfidenceCrossedThreshold,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::NewHighConfidenceInsight => "new_high_confidence_insight",
            AlertType::MaterialClaimChange => "material_claim_change",
            AlertType::ConfidenceCrossedThreshold => "confidence_crossed_threshold",
        }
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "new_high_confidence_insight" => AlertType::NewHighConfidenceInsight,
            "material_claim_change" => AlertType::MaterialClaimChange,
            "confidence_crossed_threshold" => AlertType::ConfidenceCrossedThreshold,
            other => return Err(format!("unknown alert type: {}", other)),
        })
    }
}

/// Direction of a threshold crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingDirection {
    Up,
    Down,
}

impl CrossingDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            CrossingDirection::Up => "up",
            CrossingDirection::Down => "down",
        }
    }
}

impl FromStr for CrossingDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(CrossingDirection::Up),
            "down" => Ok(CrossingDirection::Down),
            other => Err(format!("unknown crossing direction: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_phases_are_final() {
        for terminal in [
            ScanPhase::Complete,
            ScanPhase::PartialFailure,
            ScanPhase::Failed,
            ScanPhase::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(ScanPhase::Discovering));
            assert!(!terminal.can_transition_to(ScanPhase::Cancelled));
        }
    }

    #[test]
    fn test_forward_only() {
        assert!(ScanPhase::Discovering.can_transition_to(ScanPhase::Validating));
        assert!(ScanPhase::Discovering.can_transition_to(ScanPhase::Scanning));
        assert!(!ScanPhase::Scanning.can_transition_to(ScanPhase::Validating));
        assert!(!ScanPhase::Scanning.can_transition_to(ScanPhase::Scanning));
        assert!(ScanPhase::Scanning.can_transition_to(ScanPhase::Cancelled));
    }

    #[test]
    fn test_string_forms_match_serde() {
        for t in SourceType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
            assert_eq!(t.as_str().parse::<SourceType>().unwrap(), t);
        }
        let phase = serde_json::to_string(&ScanPhase::PartialFailure).unwrap();
        assert_eq!(phase, "\"partial_failure\"");
        assert_eq!("partial_failure".parse::<ScanPhase>().unwrap(), ScanPhase::PartialFailure);
    }
}
