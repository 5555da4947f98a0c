//! Raw claims extracted from source snapshots

use chrono::{DateTime, Utc};
use rivalscan_common::events::SourceType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::stable_id;

/// Which part of a market gap a claim speaks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimFacet {
    /// Something the market lacks
    Void,
    /// Evidence that customers want it
    Demand,
    /// How a brand could position into it
    Angle,
    /// Plain observation without a gap role
    Observation,
}

impl ClaimFacet {
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimFacet::Void => "void",
            ClaimFacet::Demand => "demand",
            ClaimFacet::Angle => "angle",
            ClaimFacet::Observation => "observation",
        }
    }
}

/// Where a claim was read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub quote: Option<String>,
    pub url: Option<String>,
}

/// One statement about one competitor from one source
///
/// `text` is the topic statement claims are clustered on; `detail`
/// carries the facet-specific wording when the extractor separated it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    pub text: String,
    pub facet: ClaimFacet,
    pub detail: Option<String>,
    pub source_type: SourceType,
    pub competitor_id: Uuid,
    pub confidence: f64,
    pub captured_at: DateTime<Utc>,
    pub provenance: Provenance,
}

impl Claim {
    /// Build a claim with an id derived from its content
    ///
    /// Re-extracting the same statement yields the same id.
    pub fn new(
        competitor_id: Uuid,
        source_type: SourceType,
        facet: ClaimFacet,
        text: impl Into<String>,
        confidence: f64,
        captured_at: DateTime<Utc>,
    ) -> Self {
        let text = text.into();
        let mut claim = Self {
            id: Uuid::nil(),
            text,
            facet,
            detail: None,
            source_type,
            competitor_id,
            confidence: if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 },
            captured_at,
            provenance: Provenance::default(),
        };
        claim.id = claim.content_id();
        claim
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self.id = self.content_id();
        self
    }

    pub fn with_provenance(mut self, quote: Option<String>, url: Option<String>) -> Self {
        self.provenance = Provenance { quote, url };
        self
    }

    fn content_id(&self) -> Uuid {
        let competitor = self.competitor_id.to_string();
        stable_id(&[
            "claim",
            &competitor,
            self.source_type.as_str(),
            self.facet.as_str(),
            self.text.trim(),
            self.detail.as_deref().unwrap_or(""),
        ])
    }
}

/// Flat store of claims keyed by id, indexed by competitor
#[derive(Debug, Default, Clone)]
pub struct ClaimArena {
    claims: HashMap<Uuid, Claim>,
    by_competitor: BTreeMap<Uuid, Vec<Uuid>>,
}

impl ClaimArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a claim; a claim with an id already present is ignored
    pub fn insert(&mut self, claim: Claim) -> bool {
        if self.claims.contains_key(&claim.id) {
            return false;
        }
        self.by_competitor
            .entry(claim.competitor_id)
            .or_default()
            .push(claim.id);
        self.claims.insert(claim.id, claim);
        true
    }

    pub fn extend(&mut self, claims: impl IntoIterator<Item = Claim>) {
        for claim in claims {
            self.insert(claim);
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<&Claim> {
        self.claims.get(id)
    }

    /// Claims of one competitor in insertion order
    pub fn for_competitor(&self, competitor_id: &Uuid) -> Vec<&Claim> {
        self.by_competitor
            .get(competitor_id)
            .map(|ids| ids.iter().filter_map(|id| self.claims.get(id)).collect())
            .unwrap_or_default()
    }

    /// Competitor ids in ascending order
    pub fn competitor_ids(&self) -> impl Iterator<Item = &Uuid> {
        self.by_competitor.keys()
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}
