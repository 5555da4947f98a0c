//! Change/alert detection between insight snapshots
//!
//! `diff` is a pure function of its inputs: ids are content-derived and the
//! output is sorted by id, so replaying a diff yields the identical alert set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use crate::merger::{jaccard, tokens};
use crate::models::{alert_id, Alert, AlertType, CrossingDirection, InsightIndex, MergedInsight};

/// Alert thresholds (`[alerts]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// New insights at or above this confidence raise an alert
    pub high_confidence_threshold: f64,
    /// Confidence level whose crossing (either way) raises an alert
    pub crossing_threshold: f64,
    /// Confidence delta treated as a material change
    pub material_change_threshold: f64,
    /// Title similarity used to match insights whose id changed
    pub match_threshold: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            high_confidence_threshold: 0.75,
            crossing_threshold: 0.6,
            material_change_threshold: 0.15,
            match_threshold: 0.6,
        }
    }
}

/// Diffs two ordered insight snapshots of the same brand
#[derive(Debug, Clone, Default)]
pub struct AlertDetector {
    config: AlertConfig,
}

impl AlertDetector {
    pub fn new(config: AlertConfig) -> Self {
        Self { config }
    }

    /// Alerts for every competitor referenced by `current`
    pub fn diff(
        &self,
        brand_id: &str,
        previous: &[MergedInsight],
        current: &[MergedInsight],
        as_of: DateTime<Utc>,
    ) -> Vec<Alert> {
        let previous = InsightIndex::new(previous.iter().cloned());
        let mut alerts: BTreeMap<Uuid, Alert> = BTreeMap::new();

        for insight in current {
            for competitor_id in &insight.competitor_ids {
                let matched = self.find_previous(&previous, insight, competitor_id);
                for alert in self.compare(brand_id, *competitor_id, matched, insight, as_of) {
                    alerts.entry(alert.id).or_insert(alert);
                }
            }
        }

        debug!(brand_id, alerts = alerts.len(), "Diffed insight snapshots");
        alerts.into_values().collect()
    }

    /// Same id first, otherwise the most similar previous insight of the
    /// same competitor (ties by id)
    fn find_previous<'a>(
        &self,
        previous: &'a InsightIndex,
        insight: &MergedInsight,
        competitor_id: &Uuid,
    ) -> Option<&'a MergedInsight> {
        if let Some(same) = previous.get(&insight.id) {
            return Some(same);
        }

        let title_tokens = tokens(&insight.title);
        let mut best: Option<(&MergedInsight, f64)> = None;
        for candidate in previous.for_competitor(competitor_id) {
            let sim = jaccard(&title_tokens, &tokens(&candidate.title));
            if sim < self.config.match_threshold {
                continue;
            }
            best = match best {
                Some((current, s)) if s > sim || (s == sim && current.id < candidate.id) => {
                    Some((current, s))
                }
                _ => Some((candidate, sim)),
            };
        }
        best.map(|(insight, _)| insight)
    }

    fn compare(
        &self,
        brand_id: &str,
        competitor_id: Uuid,
        previous: Option<&MergedInsight>,
        current: &MergedInsight,
        as_of: DateTime<Utc>,
    ) -> Vec<Alert> {
        let mut out = Vec::new();
        let make = |alert_type: AlertType, direction: Option<CrossingDirection>, evidence: String| Alert {
            id: alert_id(competitor_id, alert_type, current.id, previous.map(|p| p.id)),
            brand_id: brand_id.to_string(),
            competitor_id,
            alert_type,
            direction,
            insight_id: current.id,
            previous_insight_id: previous.map(|p| p.id),
            evidence,
            created_at: as_of,
        };

        let Some(prev) = previous else {
            if current.confidence >= self.config.high_confidence_threshold {
                out.push(make(
                    AlertType::NewHighConfidenceInsight,
                    None,
                    format!(
                        "New insight '{}' at confidence {:.2} from {} source type(s)",
                        current.title,
                        current.confidence,
                        current.source_types.len()
                    ),
                ));
            }
            return out;
        };

        let threshold = self.config.crossing_threshold;
        let direction = if prev.confidence < threshold && current.confidence >= threshold {
            Some(CrossingDirection::Up)
        } else if prev.confidence >= threshold && current.confidence < threshold {
            Some(CrossingDirection::Down)
        } else {
            None
        };
        if let Some(direction) = direction {
            out.push(make(
                AlertType::ConfidenceCrossedThreshold,
                Some(direction),
                format!(
                    "Confidence of '{}' moved {:.2} -> {:.2} across {:.2}",
                    current.title, prev.confidence, current.confidence, threshold
                ),
            ));
        }

        let delta = (current.confidence - prev.confidence).abs();
        let content_changed = prev.void != current.void
            || prev.demand != current.demand
            || prev.angle != current.angle
            || prev.key != current.key;
        if content_changed || delta >= self.config.material_change_threshold {
            let mut reasons = Vec::new();
            if content_changed {
                reasons.push("content changed".to_string());
            }
            if delta >= self.config.material_change_threshold {
                reasons.push(format!("confidence changed by {:.2}", delta));
            }
            out.push(make(
                AlertType::MaterialClaimChange,
                None,
                format!("Insight '{}': {}", current.title, reasons.join(", ")),
            ));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{insight_id, SourceType};

    fn insight(competitor: Uuid, title: &str, confidence: f64) -> MergedInsight {
        let key = tokens(title).into_iter().collect::<Vec<_>>().join(" ");
        MergedInsight {
            id: insight_id(&[competitor], &key),
            key,
            competitor_ids: vec![competitor],
            title: title.to_string(),
            void: title.to_string(),
            demand: None,
            angle: None,
            confidence,
            source_types: vec![SourceType::Reviews],
            contributing_claim_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_new_high_confidence_insight() {
        let c = Uuid::new_v4();
        let detector = AlertDetector::default();
        let alerts = detector.diff("brand", &[], &[insight(c, "No offline mode", 0.8)], Utc::now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::NewHighConfidenceInsight);
        assert!(alerts[0].previous_insight_id.is_none());

        let quiet = detector.diff("brand", &[], &[insight(c, "No offline mode", 0.5)], Utc::now());
        assert!(quiet.is_empty());
    }

    #[test]
    fn test_crossing_up_and_down() {
        let c = Uuid::new_v4();
        let detector = AlertDetector::default();
        let low = insight(c, "Slow support", 0.55);
        let high = insight(c, "Slow support", 0.65);

        let up = detector.diff("brand", &[low.clone()], &[high.clone()], Utc::now());
        assert_eq!(up.len(), 1);
        assert_eq!(up[0].alert_type, AlertType::ConfidenceCrossedThreshold);
        assert_eq!(up[0].direction, Some(CrossingDirection::Up));

        let down = detector.diff("brand", &[high], &[low], Utc::now());
        assert_eq!(down[0].direction, Some(CrossingDirection::Down));
    }

    #[test]
    fn test_material_change_by_similarity_match() {
        let c = Uuid::new_v4();
        let detector = AlertDetector::default();
        let before = insight(c, "Pricing jumps at enterprise tier", 0.5);
        let after = insight(c, "Pricing jumps sharply at enterprise tier", 0.5);
        assert_ne!(before.id, after.id);

        let alerts = detector.diff("brand", &[before.clone()], &[after], Utc::now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::MaterialClaimChange);
        assert_eq!(alerts[0].previous_insight_id, Some(before.id));
    }

    #[test]
    fn test_unchanged_snapshot_is_quiet() {
        let c = Uuid::new_v4();
        let snapshot = vec![insight(c, "Slow support", 0.9), insight(c, "No API", 0.4)];
        let alerts = AlertDetector::default().diff("brand", &snapshot, &snapshot, Utc::now());
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_diff_is_idempotent() {
        let c = Uuid::new_v4();
        let d = Uuid::new_v4();
        let as_of = Utc::now();
        let previous = vec![insight(c, "Slow support", 0.5)];
        let current = vec![
            insight(c, "Slow support", 0.8),
            insight(d, "No Salesforce integration", 0.9),
            insight(c, "Confusing pricing page", 0.95),
        ];

        let detector = AlertDetector::default();
        let first = detector.diff("brand", &previous, &current, as_of);
        let second = detector.diff("brand", &previous, &current, as_of);
        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(first.len(), 4);
    }
}
