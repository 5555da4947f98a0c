//! Competitor identity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::Category;

/// A resolved competitor of one brand
///
/// Canonical keys are unique per brand. Records are never deleted; a
/// competitor that should no longer be scanned is soft-retired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competitor {
    pub id: Uuid,
    pub brand_id: String,
    pub canonical_key: String,
    pub display_name: String,
    /// Every raw name this competitor was seen under
    pub aliases: BTreeSet<String>,
    pub category: Option<Category>,
    /// Confidence of the best observation behind `display_name`
    pub confidence: f64,
    pub retired: bool,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Competitor {
    pub fn new(
        brand_id: impl Into<String>,
        canonical_key: impl Into<String>,
        display_name: impl Into<String>,
        confidence: f64,
    ) -> Self {
        let display_name = display_name.into();
        let mut aliases = BTreeSet::new();
        aliases.insert(display_name.clone());
        Self {
            id: Uuid::new_v4(),
            brand_id: brand_id.into(),
            canonical_key: canonical_key.into(),
            display_name,
            aliases,
            category: None,
            confidence: confidence.clamp(0.0, 1.0),
            retired: false,
            last_scanned_at: None,
            created_at: Utc::now(),
        }
    }

    /// Fold another observation of the same competitor into this record
    ///
    /// The alias set grows; the display name only changes for a strictly
    /// more confident observation.
    pub fn absorb(&mut self, raw_name: &str, confidence: f64) {
        self.aliases.insert(raw_name.to_string());
        let confidence = confidence.clamp(0.0, 1.0);
        if confidence > self.confidence {
            self.display_name = raw_name.to_string();
            self.confidence = confidence;
        }
    }
}

/// A competitor as returned by the discovery collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredCompetitor {
    pub name: String,
    #[serde(default = "default_discovery_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub url: Option<String>,
}

fn default_discovery_confidence() -> f64 {
    0.5
}

impl DiscoveredCompetitor {
    pub fn new(name: impl Into<String>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            confidence,
            url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_keeps_more_confident_name() {
        let mut c = Competitor::new("brand", "rasa", "Rasa", 0.6);
        c.absorb("RASA AI", 0.4);
        assert_eq!(c.display_name, "Rasa");
        c.absorb("Rasa.ai", 0.9);
        assert_eq!(c.display_name, "Rasa.ai");
        assert_eq!(c.aliases.len(), 3);
    }

    #[test]
    fn test_absorb_tie_keeps_existing() {
        let mut c = Competitor::new("brand", "rasa", "Rasa", 0.6);
        c.absorb("RASA", 0.6);
        assert_eq!(c.display_name, "Rasa");
    }
}
