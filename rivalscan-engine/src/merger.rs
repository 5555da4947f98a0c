//! Confidence merging
//!
//! Clusters raw claims into insights and scores them.
//!
//! Clustering is greedy and deterministic: claims are visited in
//! `(captured_at, id)` order and join the most similar existing cluster
//! (token Jaccard against the cluster seed) at or above the similarity
//! threshold. Equal similarity goes to the cluster created first. Clusters of
//! different competitors whose seeds meet the market-wide threshold are joined
//! into one market-wide insight.
//!
//! Confidence combines independent sources:
//!
//! ```text
//! c_s   = max over claims of source s: claim.confidence * trust(s) * decay(age)
//! score = min(max_confidence, 1 - Π_s (1 - c_s))
//! ```
//!
//! so an additional corroborating source never lowers the score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use uuid::Uuid;

use crate::models::{insight_id, Claim, ClaimArena, ClaimFacet, MergedInsight, SourceType};

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "in",
    "is", "it", "its", "of", "on", "or", "that", "the", "their", "there", "they", "this", "to",
    "was", "were", "with", "no", "not", "very", "too", "so", "than", "then", "them", "our", "your",
];

const MAX_TITLE_CHARS: usize = 160;

/// Merger weights and thresholds (`[merger]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergerConfig {
    /// Minimum Jaccard similarity for a claim to join a cluster
    pub similarity_threshold: f64,
    /// Minimum seed similarity for clusters of different competitors to merge
    pub market_wide_threshold: f64,
    pub max_confidence: f64,
    /// Claims younger than this are not decayed
    pub fresh_window_days: f64,
    pub half_life_days: f64,
    /// Trust weight per source type name; missing entries use `default_trust_weight`
    pub trust_weights: BTreeMap<String, f64>,
    pub default_trust_weight: f64,
}

impl Default for MergerConfig {
    fn default() -> Self {
        let trust_weights = [
            (SourceType::Website, 0.7),
            (SourceType::Reviews, 0.85),
            (SourceType::Ads, 0.6),
            (SourceType::Research, 0.9),
            (SourceType::Social, 0.5),
            (SourceType::LocalListings, 0.75),
        ]
        .into_iter()
        .map(|(source, weight)| (source.as_str().to_string(), weight))
        .collect();

        Self {
            similarity_threshold: 0.5,
            market_wide_threshold: 0.7,
            max_confidence: 0.95,
            fresh_window_days: 14.0,
            half_life_days: 30.0,
            trust_weights,
            default_trust_weight: 0.5,
        }
    }
}

impl MergerConfig {
    pub fn trust_weight(&self, source_type: SourceType) -> f64 {
        self.trust_weights
            .get(source_type.as_str())
            .copied()
            .unwrap_or(self.default_trust_weight)
            .clamp(0.0, 1.0)
    }

    /// Multiplicative decay for a claim of the given age
    pub fn age_decay(&self, captured_at: DateTime<Utc>, as_of: DateTime<Utc>) -> f64 {
        let age_days = (as_of - captured_at).num_seconds().max(0) as f64 / 86_400.0;
        if age_days <= self.fresh_window_days || self.half_life_days <= 0.0 {
            return 1.0;
        }
        0.5_f64.powf((age_days - self.fresh_window_days) / self.half_life_days)
    }
}

/// Normalized, stop-word-filtered token set
pub fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.chars().count() >= 2 && !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Jaccard similarity of two token sets; 0 when both are empty
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[derive(Debug)]
struct Cluster<'a> {
    seed: &'a Claim,
    seed_tokens: BTreeSet<String>,
    claims: Vec<&'a Claim>,
}

/// Clusters claims into scored insights
#[derive(Debug, Clone, Default)]
pub struct ConfidenceMerger {
    config: MergerConfig,
}

impl ConfidenceMerger {
    pub fn new(config: MergerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MergerConfig {
        &self.config
    }

    /// Merge every claim in the arena into insights, sorted by id
    pub fn merge(&self, arena: &ClaimArena, as_of: DateTime<Utc>) -> Vec<MergedInsight> {
        let mut per_competitor: Vec<Cluster<'_>> = Vec::new();
        for competitor_id in arena.competitor_ids() {
            per_competitor.extend(self.cluster(arena.for_competitor(competitor_id)));
        }

        // Market-wide pass over cluster seeds in capture order
        per_competitor.sort_by(|a, b| {
            a.seed
                .captured_at
                .cmp(&b.seed.captured_at)
                .then(a.seed.id.cmp(&b.seed.id))
        });

        let mut groups: Vec<Vec<Cluster<'_>>> = Vec::new();
        for cluster in per_competitor {
            let mut best: Option<(usize, f64)> = None;
            for (idx, group) in groups.iter().enumerate() {
                let head = &group[0];
                if group.iter().any(|c| c.seed.competitor_id == cluster.seed.competitor_id) {
                    continue;
                }
                let sim = jaccard(&cluster.seed_tokens, &head.seed_tokens);
                if sim >= self.config.market_wide_threshold && best.map_or(true, |(_, s)| sim > s) {
                    best = Some((idx, sim));
                }
            }
            match best {
                Some((idx, _)) => groups[idx].push(cluster),
                None => groups.push(vec![cluster]),
            }
        }

        // Groups with the same identity (e.g. token-less titles) are folded
        // into one insight so none of their claims are lost
        let mut by_id: BTreeMap<Uuid, Vec<Cluster<'_>>> = BTreeMap::new();
        for group in groups {
            let (competitor_ids, _, key) = group_identity(&group);
            by_id
                .entry(insight_id(&competitor_ids, &key))
                .or_default()
                .extend(group);
        }

        let insights: Vec<MergedInsight> = by_id
            .values()
            .map(|group| self.build_insight(group, as_of))
            .collect();

        debug!(claims = arena.len(), insights = insights.len(), "Merged claims");
        insights
    }

    fn cluster<'a>(&self, mut claims: Vec<&'a Claim>) -> Vec<Cluster<'a>> {
        claims.sort_by(|a, b| a.captured_at.cmp(&b.captured_at).then(a.id.cmp(&b.id)));

        let mut clusters: Vec<Cluster<'a>> = Vec::new();
        for claim in claims {
            let claim_tokens = tokens(&claim.text);
            let mut best: Option<(usize, f64)> = None;
            for (idx, cluster) in clusters.iter().enumerate() {
                let sim = jaccard(&claim_tokens, &cluster.seed_tokens);
                if sim >= self.config.similarity_threshold && best.map_or(true, |(_, s)| sim > s) {
                    best = Some((idx, sim));
                }
            }
            match best {
                Some((idx, _)) => clusters[idx].claims.push(claim),
                None => clusters.push(Cluster {
                    seed: claim,
                    seed_tokens: claim_tokens,
                    claims: vec![claim],
                }),
            }
        }
        clusters
    }

    /// Combined confidence of a set of claims
    pub fn score(&self, claims: &[&Claim], as_of: DateTime<Utc>) -> f64 {
        let mut best_per_source: BTreeMap<SourceType, f64> = BTreeMap::new();
        for claim in claims {
            let c = claim.confidence.clamp(0.0, 1.0)
                * self.config.trust_weight(claim.source_type)
                * self.config.age_decay(claim.captured_at, as_of);
            let entry = best_per_source.entry(claim.source_type).or_insert(0.0);
            if c > *entry {
                *entry = c;
            }
        }

        let miss: f64 = best_per_source.values().map(|c| 1.0 - c).product();
        (1.0 - miss).clamp(0.0, self.config.max_confidence)
    }

    fn build_insight(&self, group: &[Cluster<'_>], as_of: DateTime<Utc>) -> MergedInsight {
        let claims: Vec<&Claim> = group.iter().flat_map(|c| c.claims.iter().copied()).collect();
        let (competitor_ids, title, key) = group_identity(group);

        let mut source_types: Vec<SourceType> = claims.iter().map(|c| c.source_type).collect();
        source_types.sort();
        source_types.dedup();

        let mut contributing_claim_ids: Vec<Uuid> = claims.iter().map(|c| c.id).collect();
        contributing_claim_ids.sort();
        contributing_claim_ids.dedup();

        let void = best_facet(&claims, ClaimFacet::Void)
            .map(facet_text)
            .unwrap_or_else(|| title.clone());
        let demand = best_facet(&claims, ClaimFacet::Demand).map(facet_text);
        let angle = best_facet(&claims, ClaimFacet::Angle).map(facet_text);

        MergedInsight {
            id: insight_id(&competitor_ids, &key),
            key,
            competitor_ids,
            title,
            void,
            demand,
            angle,
            confidence: self.score(&claims, as_of),
            source_types,
            contributing_claim_ids,
            created_at: as_of,
        }
    }
}

/// Sorted competitor ids, title and token key of a group of clusters
fn group_identity(group: &[Cluster<'_>]) -> (Vec<Uuid>, String, String) {
    let mut competitor_ids: Vec<Uuid> = group
        .iter()
        .flat_map(|c| c.claims.iter().map(|claim| claim.competitor_id))
        .collect();
    competitor_ids.sort();
    competitor_ids.dedup();

    let title = group
        .first()
        .map(|c| truncate(c.seed.text.trim(), MAX_TITLE_CHARS))
        .unwrap_or_default();
    let key = tokens(&title).into_iter().collect::<Vec<_>>().join(" ");
    (competitor_ids, title, key)
}

/// Most confident claim of a facet, earliest capture breaking ties
fn best_facet<'a>(claims: &[&'a Claim], facet: ClaimFacet) -> Option<&'a Claim> {
    claims
        .iter()
        .copied()
        .filter(|c| c.facet == facet)
        .min_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(a.captured_at.cmp(&b.captured_at))
                .then(a.id.cmp(&b.id))
        })
}

fn facet_text(claim: &Claim) -> String {
    claim.detail.clone().unwrap_or_else(|| claim.text.trim().to_string())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}
