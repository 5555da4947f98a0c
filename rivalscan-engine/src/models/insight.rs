//! Merged insights ("gaps")

use chrono::{DateTime, Utc};
use rivalscan_common::events::SourceType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::stable_id;

/// A validated, confidence-scored gap built from clustered claims
///
/// May reference several competitors when the same gap shows up across the
/// market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedInsight {
    pub id: Uuid,
    /// Normalized token signature of the title
    pub key: String,
    /// Sorted ascending
    pub competitor_ids: Vec<Uuid>,
    pub title: String,
    pub void: String,
    pub demand: Option<String>,
    pub angle: Option<String>,
    pub confidence: f64,
    /// Sorted, deduplicated
    pub source_types: Vec<SourceType>,
    pub contributing_claim_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl MergedInsight {
    pub fn is_market_wide(&self) -> bool {
        self.competitor_ids.len() > 1
    }

    pub fn mentions(&self, competitor_id: &Uuid) -> bool {
        self.competitor_ids.binary_search(competitor_id).is_ok()
    }
}

/// Deterministic insight id over its competitors and title signature
pub fn insight_id(competitor_ids: &[Uuid], key: &str) -> Uuid {
    let mut ids: Vec<String> = competitor_ids.iter().map(Uuid::to_string).collect();
    ids.sort();
    let joined = ids.join(",");
    stable_id(&["insight", &joined, key])
}

/// Insights of one snapshot keyed by id, indexed by competitor
#[derive(Debug, Default, Clone)]
pub struct InsightIndex {
    by_id: BTreeMap<Uuid, MergedInsight>,
    by_competitor: HashMap<Uuid, Vec<Uuid>>,
}

impl InsightIndex {
    pub fn new(insights: impl IntoIterator<Item = MergedInsight>) -> Self {
        let mut index = Self::default();
        for insight in insights {
            for competitor in &insight.competitor_ids {
                index.by_competitor.entry(*competitor).or_default().push(insight.id);
            }
            index.by_id.insert(insight.id, insight);
        }
        index
    }

    pub fn get(&self, id: &Uuid) -> Option<&MergedInsight> {
        self.by_id.get(id)
    }

    pub fn for_competitor(&self, competitor_id: &Uuid) -> Vec<&MergedInsight> {
        self.by_competitor
            .get(competitor_id)
            .map(|ids| ids.iter().filter_map(|id| self.by_id.get(id)).collect())
            .unwrap_or_default()
    }

    /// All insights in id order
    pub fn iter(&self) -> impl Iterator<Item = &MergedInsight> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
