//! Competitor identity resolution
//!
//! Raw names from discovery, seeds and sources are folded into canonical keys.
//! Names sharing a key are one competitor. Keys that are near-duplicates of an
//! existing key are attributed to the most confident candidate and reported as
//! ambiguous; the new key is indexed as an alias so later lookups agree.

use std::collections::HashMap;
use strsim::jaro_winkler;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SourceError;
use crate::models::{Category, Competitor};

const TLD_SUFFIXES: &[&str] = &[".ai", ".io", ".com", ".co", ".net", ".org", ".app"];
const LEGAL_SUFFIXES: &[&str] = &["inc", "llc", "ltd", "corp", "co", "gmbh", "ai"];

/// Default Jaro-Winkler similarity at which two keys are treated as the same entity
pub const DEFAULT_NEAR_DUPLICATE_THRESHOLD: f64 = 0.96;

/// Keys shorter than this are only ever matched exactly
pub const DEFAULT_MIN_FUZZY_LEN: usize = 6;

/// Fold a raw competitor name into its canonical key
///
/// ```
/// use rivalscan_engine::resolver::canonicalize;
///
/// assert_eq!(canonicalize("Rasa"), "rasa");
/// assert_eq!(canonicalize("Rasa.ai"), "rasa");
/// assert_eq!(canonicalize("RASA AI"), "rasa");
/// assert_eq!(canonicalize("https://www.Acme-Widgets.com/pricing"), "acmewidgets");
/// ```
pub fn canonicalize(raw: &str) -> String {
    let mut s = raw.trim().to_lowercase();

    for scheme in ["https://", "http://"] {
        if let Some(rest) = s.strip_prefix(scheme) {
            s = rest.to_string();
        }
    }
    let mut looks_like_url = raw.contains("://");
    if let Some(rest) = s.strip_prefix("www.") {
        s = rest.to_string();
        looks_like_url = true;
    }
    // Anything after the host part of a URL is not part of the name
    if looks_like_url {
        if let Some(idx) = s.find('/') {
            s.truncate(idx);
        }
    }

    let mut stripped = true;
    while stripped {
        stripped = false;
        for tld in TLD_SUFFIXES {
            if s.len() > tld.len() && s.ends_with(tld) {
                s.truncate(s.len() - tld.len());
                stripped = true;
            }
        }
    }

    let mut words: Vec<String> = s
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();

    while words.len() > 1 {
        match words.last() {
            Some(last) if LEGAL_SUFFIXES.contains(&last.as_str()) => {
                words.pop();
            }
            _ => break,
        }
    }

    words.concat()
}

/// Outcome of resolving one raw name
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// First sighting of this key
    Created(Uuid),
    /// Exact key match with an existing competitor
    Merged(Uuid),
    /// Near-duplicate of one or more competitors; attributed to the most
    /// confident candidate
    Ambiguous { competitor_id: Uuid, candidates: Vec<Uuid> },
    /// No usable identity (empty key)
    Rejected,
}

impl Resolution {
    pub fn competitor_id(&self) -> Option<Uuid> {
        match self {
            Resolution::Created(id) | Resolution::Merged(id) => Some(*id),
            Resolution::Ambiguous { competitor_id, .. } => Some(*competitor_id),
            Resolution::Rejected => None,
        }
    }

    /// Warning to record on the session, if any
    pub fn warning(&self, raw_name: &str) -> Option<SourceError> {
        match self {
            Resolution::Ambiguous { candidates, .. } => Some(SourceError::EntityAmbiguous {
                name: raw_name.to_string(),
                message: format!("near-duplicate of {} existing competitor(s)", candidates.len()),
            }),
            Resolution::Rejected => Some(SourceError::EntityAmbiguous {
                name: raw_name.to_string(),
                message: "name has no usable identity".to_string(),
            }),
            _ => None,
        }
    }
}

/// Per-brand arena of competitors with a key index
#[derive(Debug, Clone)]
pub struct EntityResolver {
    brand_id: String,
    competitors: HashMap<Uuid, Competitor>,
    /// Canonical and alias keys to competitor id
    by_key: HashMap<String, Uuid>,
    near_duplicate_threshold: f64,
    min_fuzzy_len: usize,
}

impl EntityResolver {
    pub fn new(brand_id: impl Into<String>) -> Self {
        Self {
            brand_id: brand_id.into(),
            competitors: HashMap::new(),
            by_key: HashMap::new(),
            near_duplicate_threshold: DEFAULT_NEAR_DUPLICATE_THRESHOLD,
            min_fuzzy_len: DEFAULT_MIN_FUZZY_LEN,
        }
    }

    pub fn with_threshold(mut self, threshold: f64, min_fuzzy_len: usize) -> Self {
        self.near_duplicate_threshold = threshold;
        self.min_fuzzy_len = min_fuzzy_len;
        self
    }

    /// Load previously persisted competitors of this brand
    ///
    /// Alias keys are re-derived from each record's aliases.
    pub fn seed(&mut self, competitors: impl IntoIterator<Item = Competitor>) {
        for competitor in competitors {
            if competitor.brand_id != self.brand_id {
                continue;
            }
            if self.by_key.contains_key(&competitor.canonical_key) {
                warn!(key = %competitor.canonical_key, "Duplicate canonical key while seeding, skipped");
                continue;
            }
            let id = competitor.id;
            self.by_key.insert(competitor.canonical_key.clone(), id);
            for alias in &competitor.aliases {
                let key = canonicalize(alias);
                if !key.is_empty() {
                    self.by_key.entry(key).or_insert(id);
                }
            }
            self.competitors.insert(id, competitor);
        }
    }

    /// Resolve a raw name to a competitor, creating one if needed
    pub fn resolve(&mut self, raw_name: &str, confidence: f64, category: Option<Category>) -> Resolution {
        let key = canonicalize(raw_name);
        if key.is_empty() {
            warn!(raw_name, "Competitor name has empty canonical key, rejected");
            return Resolution::Rejected;
        }

        if let Some(&id) = self.by_key.get(&key) {
            if let Some(existing) = self.competitors.get_mut(&id) {
                existing.absorb(raw_name.trim(), confidence);
            }
            debug!(raw_name, key = %key, "Merged into existing competitor");
            return Resolution::Merged(id);
        }

        let candidates = self.near_duplicates(&key);
        if let Some(&chosen) = candidates.first() {
            if let Some(existing) = self.competitors.get_mut(&chosen) {
                existing.absorb(raw_name.trim(), confidence);
            }
            self.by_key.insert(key.clone(), chosen);
            warn!(
                raw_name,
                key = %key,
                candidates = candidates.len(),
                "Ambiguous competitor identity, attributed to most confident candidate"
            );
            return Resolution::Ambiguous {
                competitor_id: chosen,
                candidates,
            };
        }

        let mut competitor = Competitor::new(self.brand_id.clone(), key.clone(), raw_name.trim(), confidence);
        competitor.category = category;
        let id = competitor.id;
        self.by_key.insert(key, id);
        self.competitors.insert(id, competitor);
        Resolution::Created(id)
    }

    /// Candidate competitors whose keys are near-duplicates of `key`,
    /// most confident first (ties by canonical key)
    fn near_duplicates(&self, key: &str) -> Vec<Uuid> {
        if key.chars().count() < self.min_fuzzy_len {
            return Vec::new();
        }

        let mut ids: Vec<Uuid> = self
            .by_key
            .iter()
            .filter(|(existing, _)| existing.chars().count() >= self.min_fuzzy_len)
            .filter(|(existing, _)| jaro_winkler(key, existing) >= self.near_duplicate_threshold)
            .map(|(_, id)| *id)
            .collect();
        ids.sort();
        ids.dedup();

        let mut ranked: Vec<&Competitor> = ids.iter().filter_map(|id| self.competitors.get(id)).collect();
        ranked.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.canonical_key.cmp(&b.canonical_key))
        });
        ranked.into_iter().map(|c| c.id).collect()
    }

    pub fn get(&self, id: &Uuid) -> Option<&Competitor> {
        self.competitors.get(id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut Competitor> {
        self.competitors.get_mut(id)
    }

    pub fn lookup(&self, raw_name: &str) -> Option<&Competitor> {
        self.by_key
            .get(&canonicalize(raw_name))
            .and_then(|id| self.competitors.get(id))
    }

    /// All competitors ordered by canonical key
    pub fn competitors(&self) -> Vec<&Competitor> {
        let mut all: Vec<&Competitor> = self.competitors.values().collect();
        all.sort_by(|a, b| a.canonical_key.cmp(&b.canonical_key));
        all
    }

    pub fn len(&self) -> usize {
        self.competitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.competitors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_canonicalize_variants() {
        assert_eq!(canonicalize("Rasa"), "rasa");
        assert_eq!(canonicalize("Rasa.ai"), "rasa");
        assert_eq!(canonicalize("RASA AI"), "rasa");
        assert_eq!(canonicalize("  Rasa Technologies, Inc. "), "rasatechnologies");
        assert_eq!(canonicalize("Acme Co LLC"), "acme");
        assert_eq!(canonicalize("http://www.acme.io"), "acme");
    }

    #[test]
    fn test_canonicalize_keeps_last_word() {
        // A name that is only a legal suffix keeps it
        assert_eq!(canonicalize("Inc"), "inc");
        assert_eq!(canonicalize("AI"), "ai");
    }

    #[test]
    fn test_canonicalize_empty() {
        assert_eq!(canonicalize(""), "");
        assert_eq!(canonicalize("  ---  "), "");
    }

    #[test]
    fn test_name_variants_resolve_to_one_competitor() {
        let mut resolver = EntityResolver::new("brand");
        let a = resolver.resolve("Rasa", 0.5, None);
        let b = resolver.resolve("Rasa.ai", 0.9, None);
        let c = resolver.resolve("RASA AI", 0.3, None);

        assert!(matches!(a, Resolution::Created(_)));
        assert_eq!(b, Resolution::Merged(a.competitor_id().unwrap()));
        assert_eq!(c, Resolution::Merged(a.competitor_id().unwrap()));
        assert_eq!(resolver.len(), 1);

        let competitor = resolver.get(&a.competitor_id().unwrap()).unwrap();
        assert_eq!(competitor.display_name, "Rasa.ai");
        assert_eq!(competitor.aliases.len(), 3);
    }

    #[test]
    fn test_near_duplicate_is_ambiguous_not_fatal() {
        let mut resolver = EntityResolver::new("brand");
        let hubspot = resolver.resolve("HubSpot", 0.8, None).competitor_id().unwrap();
        let typo = resolver.resolve("HubSpott", 0.4, None);

        match &typo {
            Resolution::Ambiguous { competitor_id, candidates } => {
                assert_eq!(*competitor_id, hubspot);
                assert_eq!(candidates, &vec![hubspot]);
            }
            other => panic!("expected ambiguous, got {:?}", other),
        }
        assert!(matches!(typo.warning("HubSpott"), Some(SourceError::EntityAmbiguous { .. })));

        // The alias key now resolves exactly
        assert_eq!(resolver.resolve("hubspott", 0.4, None), Resolution::Merged(hubspot));
        assert_eq!(resolver.len(), 1);
    }

    #[test]
    fn test_short_keys_never_fuzzy_match() {
        let mut resolver = EntityResolver::new("brand");
        resolver.resolve("Notion", 0.8, None);
        resolver.resolve("Motion", 0.8, None);
        resolver.resolve("Ada", 0.8, None);
        resolver.resolve("Adb", 0.8, None);
        assert_eq!(resolver.len(), 4);
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut resolver = EntityResolver::new("brand");
        let resolution = resolver.resolve("...", 0.9, None);
        assert_eq!(resolution, Resolution::Rejected);
        assert!(resolution.warning("...").is_some());
        assert!(resolver.is_empty());
    }

    #[test]
    fn test_keys_stay_unique() {
        let mut resolver = EntityResolver::new("brand");
        for name in ["Rasa", "rasa.io", "Drift", "Drift Inc", "Intercom", "Intercom.com", "Ada"] {
            resolver.resolve(name, 0.5, None);
        }
        let keys: HashSet<_> = resolver.competitors().iter().map(|c| c.canonical_key.clone()).collect();
        assert_eq!(keys.len(), resolver.len());
        assert_eq!(resolver.len(), 4);
    }

    #[test]
    fn test_seeded_retired_competitor_still_absorbs_sightings() {
        let mut first = EntityResolver::new("brand");
        let id = first.resolve("Rasa", 0.7, None).competitor_id().unwrap();
        let mut persisted: Vec<Competitor> = first.competitors().into_iter().cloned().collect();
        persisted[0].retired = true;

        let mut second = EntityResolver::new("brand");
        second.seed(persisted);
        assert_eq!(second.resolve("Rasa.ai", 0.2, None), Resolution::Merged(id));
        assert_eq!(second.resolve("RASA", 0.2, None), Resolution::Merged(id));
        assert_eq!(second.len(), 1);
        assert!(second.get(&id).unwrap().retired);
    }
}
