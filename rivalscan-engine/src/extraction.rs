//! Claim extraction results and parsers
//!
//! Structured output from the extraction collaborator is parsed into claims
//! without silent coercion: entries that only partly match the expected gap
//! shape are recovered and reported, and output that cannot be read at all
//! is a `Failed` result the orchestrator routes to the heuristic parser.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::collaborators::ClaimExtractor;
use crate::models::{BrandProfile, Claim, ClaimFacet, Competitor, SourceSnapshot, SourceType};

/// Confidence given to structured claims that do not state one
pub const DEFAULT_CLAIM_CONFIDENCE: f64 = 0.6;

/// Outcome of parsing extractor output
#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult {
    Ok(Vec<Claim>),
    PartiallyRecovered { claims: Vec<Claim>, warnings: Vec<String> },
    Failed { reason: String },
}

impl ParseResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, ParseResult::Failed { .. })
    }

    pub fn claims(&self) -> &[Claim] {
        match self {
            ParseResult::Ok(claims) | ParseResult::PartiallyRecovered { claims, .. } => claims,
            ParseResult::Failed { .. } => &[],
        }
    }

    /// Claims and warnings; a failure becomes a single warning
    pub fn into_parts(self) -> (Vec<Claim>, Vec<String>) {
        match self {
            ParseResult::Ok(claims) => (claims, Vec::new()),
            ParseResult::PartiallyRecovered { claims, warnings } => (claims, warnings),
            ParseResult::Failed { reason } => (Vec::new(), vec![reason]),
        }
    }
}

/// What claims parsed for one competitor may be attributed to
///
/// Claims are stamped with the fetch time of the snapshot they cite, not the
/// time of parsing, so cached evidence keeps its age.
#[derive(Debug, Clone, Copy)]
pub struct ClaimContext<'a> {
    pub competitor_id: Uuid,
    pub snapshots: &'a [SourceSnapshot],
}

impl<'a> ClaimContext<'a> {
    pub fn new(competitor_id: Uuid, snapshots: &'a [SourceSnapshot]) -> Self {
        Self {
            competitor_id,
            snapshots,
        }
    }

    fn snapshot_for(&self, source_type: SourceType) -> Option<&'a SourceSnapshot> {
        self.snapshots
            .iter()
            .find(|s| s.source_type == source_type && s.has_payload())
    }

    fn default_snapshot(&self) -> Option<&'a SourceSnapshot> {
        self.snapshots.iter().find(|s| s.has_payload())
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Parse JSON, tolerating prose around it and one level of stringification
fn parse_json(raw: &str) -> Option<Value> {
    let text = strip_code_fence(raw);
    let value = serde_json::from_str::<Value>(text).ok().or_else(|| {
        let start = text.find(['{', '['])?;
        let end = text.rfind(['}', ']'])?;
        (end > start)
            .then(|| serde_json::from_str::<Value>(&text[start..=end]).ok())
            .flatten()
    })?;

    match value {
        Value::String(inner) => serde_json::from_str::<Value>(strip_code_fence(&inner)).ok(),
        other => Some(other),
    }
}

fn str_field<'v>(obj: &'v Map<String, Value>, names: &[&str]) -> Option<&'v str> {
    names
        .iter()
        .filter_map(|n| obj.get(*n))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn confidence_field(obj: &Map<String, Value>) -> f64 {
    obj.get("confidence")
        .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
        .filter(|c| c.is_finite())
        .map(|c| if c > 1.0 && c <= 100.0 { c / 100.0 } else { c })
        .unwrap_or(DEFAULT_CLAIM_CONFIDENCE)
        .clamp(0.0, 1.0)
}

fn facet_field(obj: &Map<String, Value>) -> ClaimFacet {
    match str_field(obj, &["facet", "kind"]).map(str::to_lowercase).as_deref() {
        Some("void") | Some("gap") => ClaimFacet::Void,
        Some("demand") => ClaimFacet::Demand,
        Some("angle") | Some("positioning") => ClaimFacet::Angle,
        _ => ClaimFacet::Observation,
    }
}

/// Entries of the top-level value: `{gaps, claims}`, a bare array, or one
/// bare entry
fn entries(value: &Value) -> Option<Vec<&Value>> {
    match value {
        Value::Array(items) => Some(items.iter().collect()),
        Value::Object(obj) => {
            let mut out = Vec::new();
            let mut keyed = false;
            for key in ["gaps", "claims", "insights"] {
                if let Some(v) = obj.get(key) {
                    keyed = true;
                    match v {
                        Value::Array(items) => out.extend(items.iter()),
                        Value::Null => {}
                        other => out.push(other),
                    }
                }
            }
            if keyed {
                Some(out)
            } else {
                Some(vec![value])
            }
        }
        _ => None,
    }
}

struct EntryParser<'c, 'a> {
    ctx: &'c ClaimContext<'a>,
    claims: Vec<Claim>,
    warnings: Vec<String>,
    recognized: usize,
}

impl<'c, 'a> EntryParser<'c, 'a> {
    /// Resolve the snapshot an entry is attributed to; entries naming a
    /// source without data are refused rather than invented
    fn attribution(&mut self, obj: &Map<String, Value>, index: usize) -> Option<&'a SourceSnapshot> {
        match str_field(obj, &["source_type", "source"]) {
            Some(name) => match name.parse::<SourceType>() {
                Ok(source_type) => {
                    let found = self.ctx.snapshot_for(source_type);
                    if found.is_none() {
                        self.warnings.push(format!(
                            "entry {} cites {} which returned no data, dropped",
                            index, source_type
                        ));
                    }
                    found
                }
                // "source" often carries a URL or site name instead of a type
                Err(_) => self.ctx.default_snapshot(),
            },
            None => self.ctx.default_snapshot(),
        }
    }

    fn push(&mut self, snapshot: &SourceSnapshot, facet: ClaimFacet, text: &str, detail: Option<&str>, obj: &Map<String, Value>) {
        let quote = str_field(obj, &["quote", "evidence"]).map(str::to_string);
        let url = str_field(obj, &["url", "link"])
            .or_else(|| str_field(obj, &["source"]).filter(|s| s.starts_with("http")))
            .map(str::to_string)
            .or_else(|| snapshot.url.clone());

        let mut claim = Claim::new(
            self.ctx.competitor_id,
            snapshot.source_type,
            facet,
            text,
            confidence_field(obj),
            snapshot.fetched_at,
        );
        if let Some(detail) = detail {
            claim = claim.with_detail(detail);
        }
        self.claims.push(claim.with_provenance(quote, url));
    }

    fn entry(&mut self, index: usize, value: &Value) {
        let Some(obj) = value.as_object() else {
            self.warnings.push(format!("entry {} is not an object, skipped", index));
            return;
        };

        let title = str_field(obj, &["title", "gap", "topic"]);
        let void = str_field(obj, &["void"]);
        let demand = str_field(obj, &["demand"]);
        let angle = str_field(obj, &["angle", "positioning"]);
        let text = str_field(obj, &["text", "claim", "statement"]);
        let quote = str_field(obj, &["quote", "evidence"]);

        if title.is_some() || void.is_some() {
            self.recognized += 1;
            let Some(snapshot) = self.attribution(obj, index) else {
                return;
            };
            let topic = title.or(void).unwrap_or_default();
            self.push(snapshot, ClaimFacet::Void, topic, void, obj);
            if let Some(demand) = demand {
                self.push(snapshot, ClaimFacet::Demand, topic, Some(demand), obj);
            }
            if let Some(angle) = angle {
                self.push(snapshot, ClaimFacet::Angle, topic, Some(angle), obj);
            }
        } else if let Some(text) = text {
            self.recognized += 1;
            let Some(snapshot) = self.attribution(obj, index) else {
                return;
            };
            self.push(snapshot, facet_field(obj), text, None, obj);
        } else if let Some(quote) = quote {
            // Quote/source objects instead of gaps: keep the quote as an observation
            self.recognized += 1;
            self.warnings.push(format!(
                "entry {} had quote/source fields instead of a gap, recovered as observation",
                index
            ));
            let Some(snapshot) = self.attribution(obj, index) else {
                return;
            };
            self.push(snapshot, ClaimFacet::Observation, quote, None, obj);
        } else {
            self.warnings.push(format!("entry {} has no recognizable fields, skipped", index));
        }
    }
}

/// Parse extractor output into claims for one competitor
pub fn parse_structured_output(raw: &str, ctx: &ClaimContext<'_>) -> ParseResult {
    if raw.trim().is_empty() {
        return ParseResult::Failed {
            reason: "extractor returned empty output".to_string(),
        };
    }

    let Some(value) = parse_json(raw) else {
        return ParseResult::Failed {
            reason: "extractor output is not JSON".to_string(),
        };
    };

    let Some(items) = entries(&value) else {
        return ParseResult::Failed {
            reason: "extractor output has no entries".to_string(),
        };
    };

    let mut parser = EntryParser {
        ctx,
        claims: Vec::new(),
        warnings: Vec::new(),
        recognized: 0,
    };
    for (index, item) in items.iter().enumerate() {
        parser.entry(index, item);
    }

    debug!(
        entries = items.len(),
        claims = parser.claims.len(),
        warnings = parser.warnings.len(),
        "Parsed structured extractor output"
    );

    if !items.is_empty() && parser.recognized == 0 {
        return ParseResult::Failed {
            reason: format!("none of {} entries matched a known shape", items.len()),
        };
    }

    if parser.warnings.is_empty() {
        ParseResult::Ok(parser.claims)
    } else {
        ParseResult::PartiallyRecovered {
            claims: parser.claims,
            warnings: parser.warnings,
        }
    }
}

const DEMAND_CUES: &[&str] = &[
    " wish", " need ", " needs ", "looking for", "would love", " want ", " wants ", "asked for",
    "request",
];
const VOID_CUES: &[&str] = &[
    " lack", "missing", " no ", "doesn't", "does not", "can't", "cannot", "hard to", "difficult",
    "expensive", " slow", "confusing", " poor", "limited", "frustrat", "complain", "broken",
    "buggy", "unreliable",
];
const OBSERVATION_CUES: &[&str] = &[
    "pricing", " price", " plan", "support", "integration", "feature", "launch", "customers",
    " offers", " new ",
];

/// Keyword-and-sentence parser used when structured extraction fails
#[derive(Debug, Clone)]
pub struct HeuristicExtractor {
    pub confidence: f64,
    pub max_claims_per_snapshot: usize,
}

impl Default for HeuristicExtractor {
    fn default() -> Self {
        Self {
            confidence: 0.35,
            max_claims_per_snapshot: 8,
        }
    }
}

fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

impl HeuristicExtractor {
    /// Claims read from one snapshot's payload, captured when it was fetched
    pub fn extract_snapshot(&self, competitor_id: Uuid, snapshot: &SourceSnapshot) -> Vec<Claim> {
        if !snapshot.has_payload() {
            return Vec::new();
        }

        let text = strip_markup(&snapshot.payload);
        let mut claims = Vec::new();
        for sentence in text.split(['.', '!', '?', '\n']) {
            let sentence = sentence.split_whitespace().collect::<Vec<_>>().join(" ");
            let len = sentence.chars().count();
            if !(20..=280).contains(&len) {
                continue;
            }

            let padded = format!(" {} ", sentence.to_lowercase());
            let facet = if DEMAND_CUES.iter().any(|c| padded.contains(c)) {
                ClaimFacet::Demand
            } else if VOID_CUES.iter().any(|c| padded.contains(c)) {
                ClaimFacet::Void
            } else if OBSERVATION_CUES.iter().any(|c| padded.contains(c)) {
                ClaimFacet::Observation
            } else {
                continue;
            };

            claims.push(
                Claim::new(competitor_id, snapshot.source_type, facet, sentence.as_str(), self.confidence, snapshot.fetched_at)
                    .with_provenance(Some(sentence.clone()), snapshot.url.clone()),
            );
            if claims.len() >= self.max_claims_per_snapshot {
                break;
            }
        }
        claims
    }

    pub fn extract_all(&self, competitor_id: Uuid, snapshots: &[SourceSnapshot]) -> Vec<Claim> {
        snapshots
            .iter()
            .flat_map(|s| self.extract_snapshot(competitor_id, s))
            .collect()
    }
}

#[async_trait]
impl ClaimExtractor for HeuristicExtractor {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn extract(&self, competitor: &Competitor, snapshots: &[SourceSnapshot], _brand: &BrandProfile) -> ParseResult {
        if !snapshots.iter().any(SourceSnapshot::has_payload) {
            return ParseResult::Failed {
                reason: "no snapshot carried a payload".to_string(),
            };
        }
        ParseResult::Ok(self.extract_all(competitor.id, snapshots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceQuery;
    use chrono::{Duration as ChronoDuration, Utc};

    fn snapshot(source_type: SourceType, payload: &str) -> SourceSnapshot {
        let query = SourceQuery {
            source_type,
            competitor_id: Uuid::nil(),
            competitor_name: "Rasa".to_string(),
            canonical_key: "rasa".to_string(),
            url: Some(format!("https://example.com/{}", source_type)),
        };
        SourceSnapshot::ok(&query, payload)
    }

    fn ctx(snapshots: &[SourceSnapshot]) -> ClaimContext<'_> {
        ClaimContext::new(Uuid::nil(), snapshots)
    }

    #[test]
    fn test_expected_gap_shape() {
        let snaps = vec![snapshot(SourceType::Reviews, "reviews")];
        let raw = r#"{"gaps": [{"title": "Offline mode", "void": "Nobody syncs offline",
            "demand": "Reps ask for it", "angle": "Reliability first", "confidence": 0.8,
            "source_type": "reviews", "quote": "I lose notes on flights"}]}"#;

        let result = parse_structured_output(raw, &ctx(&snaps));
        let ParseResult::Ok(claims) = result else {
            panic!("expected Ok, got {:?}", result);
        };
        assert_eq!(claims.len(), 3);
        assert!(claims.iter().all(|c| c.text == "Offline mode"));
        assert!(claims.iter().all(|c| (c.confidence - 0.8).abs() < 1e-9));
        assert_eq!(claims[0].provenance.quote.as_deref(), Some("I lose notes on flights"));
        assert_eq!(claims[0].provenance.url.as_deref(), Some("https://example.com/reviews"));
    }

    #[test]
    fn test_quote_source_objects_are_partially_recovered() {
        let snaps = vec![snapshot(SourceType::Website, "site")];
        let raw = r#"[{"quote": "Setup took our team three weeks", "source": "https://g2.com/x"},
                      {"title": "Slow onboarding"}]"#;

        match parse_structured_output(raw, &ctx(&snaps)) {
            ParseResult::PartiallyRecovered { claims, warnings } => {
                assert_eq!(claims.len(), 2);
                assert_eq!(warnings.len(), 1);
                let recovered = claims.iter().find(|c| c.facet == ClaimFacet::Observation).unwrap();
                assert_eq!(recovered.text, "Setup took our team three weeks");
                assert_eq!(recovered.provenance.url.as_deref(), Some("https://g2.com/x"));
            }
            other => panic!("expected partial recovery, got {:?}", other),
        }
    }

    #[test]
    fn test_stringified_and_fenced_json() {
        let snaps = vec![snapshot(SourceType::Reviews, "reviews")];
        let inner = r#"{"claims":[{"text":"Support replies take days","facet":"void"}]}"#;
        let stringified = serde_json::to_string(inner).unwrap();
        let fenced = format!("```json\n{}\n```", inner);

        for raw in [stringified.as_str(), fenced.as_str()] {
            let result = parse_structured_output(raw, &ctx(&snaps));
            assert_eq!(result.claims().len(), 1, "input: {}", raw);
            assert_eq!(result.claims()[0].facet, ClaimFacet::Void);
        }
    }

    #[test]
    fn test_garbage_fails() {
        let snaps = vec![snapshot(SourceType::Reviews, "reviews")];
        assert!(parse_structured_output("I could not find anything", &ctx(&snaps)).is_failed());
        assert!(parse_structured_output("", &ctx(&snaps)).is_failed());
        assert!(parse_structured_output(r#"[{"foo": 1}, 42]"#, &ctx(&snaps)).is_failed());
    }

    #[test]
    fn test_claim_citing_failed_source_is_dropped() {
        // Only reviews returned data; ads failed
        let snaps = vec![snapshot(SourceType::Reviews, "reviews")];
        let raw = r#"{"gaps": [
            {"title": "No self-serve plan", "source_type": "ads"},
            {"title": "Steep pricing", "source_type": "reviews"}
        ]}"#;

        match parse_structured_output(raw, &ctx(&snaps)) {
            ParseResult::PartiallyRecovered { claims, warnings } => {
                assert_eq!(claims.len(), 1);
                assert_eq!(claims[0].source_type, SourceType::Reviews);
                assert!(warnings[0].contains("ads"));
            }
            other => panic!("expected partial recovery, got {:?}", other),
        }
    }

    #[test]
    fn test_percent_confidence_normalized() {
        let snaps = vec![snapshot(SourceType::Reviews, "reviews")];
        let raw = r#"[{"text": "Great API docs", "confidence": 85}]"#;
        let result = parse_structured_output(raw, &ctx(&snaps));
        assert!((result.claims()[0].confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_heuristic_extractor() {
        let snap = snapshot(
            SourceType::Reviews,
            "<p>Great tool overall.</p> I wish it had a proper Salesforce sync! \
             The mobile app is slow and crashes often. Ok.",
        );
        let claims = HeuristicExtractor::default().extract_snapshot(Uuid::nil(), &snap);
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].facet, ClaimFacet::Demand);
        assert_eq!(claims[1].facet, ClaimFacet::Void);
        assert!(claims.iter().all(|c| c.confidence < DEFAULT_CLAIM_CONFIDENCE));
    }

    #[test]
    fn test_heuristic_skips_failed_snapshots() {
        let mut snap = snapshot(SourceType::Ads, "We lack features nobody else has either");
        snap.status = crate::models::SourceStatus::Timeout;
        assert!(HeuristicExtractor::default()
            .extract_snapshot(Uuid::nil(), &snap)
            .is_empty());
    }

    #[test]
    fn test_claims_carry_fetch_time_of_their_snapshot() {
        let fetched_at = Utc::now() - ChronoDuration::days(20);
        let mut old = snapshot(SourceType::Reviews, "The reporting module is missing export to CSV entirely.");
        old.fetched_at = fetched_at;

        let heuristic = HeuristicExtractor::default().extract_all(Uuid::nil(), std::slice::from_ref(&old));
        assert!(!heuristic.is_empty());
        assert!(heuristic.iter().all(|c| c.captured_at == fetched_at));

        let snaps = vec![old];
        let raw = r#"[{"text": "No CSV export", "facet": "void", "source_type": "reviews"}]"#;
        let parsed = parse_structured_output(raw, &ctx(&snaps));
        assert_eq!(parsed.claims()[0].captured_at, fetched_at);
    }
}
