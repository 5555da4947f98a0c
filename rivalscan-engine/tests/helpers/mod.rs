//! Test helpers for rivalscan-engine integration tests
//!
//! Provides scripted collaborators and engine wiring:
//! - ScriptedFetcher: per-competitor fetch behaviour with call counting
//! - MockSources: one scripted fetcher per source type
//! - ScriptedExtractor: one claim per snapshot, or raw extractor output
//! - FailingDiscoverer: discovery that is always unavailable

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use rivalscan_common::events::{EventBus, ScanEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use rivalscan_engine::collaborators::{ClaimExtractor, CompetitorDiscoverer, SourceFetcher, StaticDiscoverer};
use rivalscan_engine::db::ScanStore;
use rivalscan_engine::error::SourceError;
use rivalscan_engine::extraction::{parse_structured_output, ClaimContext, ParseResult};
use rivalscan_engine::fetchers::{Collaborators, FetcherRegistry};
use rivalscan_engine::models::{
    BrandProfile, Category, Claim, ClaimFacet, Competitor, DiscoveredCompetitor, ScanPhase, SourceQuery,
    SourceSnapshot, SourceType,
};
use rivalscan_engine::{EngineConfig, OrchestratorContext};

/// What a scripted fetcher does for one competitor
#[derive(Debug, Clone)]
pub enum Behavior {
    Ok,
    /// Answers after the given delay
    Delay(Duration),
    /// Fails immediately with a timeout
    Timeout,
    Unavailable,
    /// Answers with a payload flagged malformed
    Malformed,
    /// Answers with a payload fetched the given number of days ago
    Aged(i64),
    /// Fails with a malformed-response error and no payload (e.g. a 4xx)
    Rejected,
    /// Never answers; the orchestrator's timeout has to fire
    Hang,
    /// Panics inside the fetch
    Crash,
}

pub struct ScriptedFetcher {
    source_type: SourceType,
    default: Behavior,
    overrides: Mutex<HashMap<String, Behavior>>,
    calls: AtomicUsize,
    calls_by_key: Mutex<HashMap<String, usize>>,
}

impl ScriptedFetcher {
    pub fn new(source_type: SourceType, default: Behavior) -> Self {
        Self {
            source_type,
            default,
            overrides: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            calls_by_key: Mutex::new(HashMap::new()),
        }
    }

    /// Script the behaviour for one canonical key
    pub fn set(&self, canonical_key: &str, behavior: Behavior) {
        self.overrides
            .lock()
            .unwrap()
            .insert(canonical_key.to_string(), behavior);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, canonical_key: &str) -> usize {
        self.calls_by_key
            .lock()
            .unwrap()
            .get(canonical_key)
            .copied()
            .unwrap_or(0)
    }

    fn behavior_for(&self, canonical_key: &str) -> Behavior {
        self.overrides
            .lock()
            .unwrap()
            .get(canonical_key)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Payload every healthy source returns for a competitor
pub fn payload_for(source_type: SourceType, canonical_key: &str) -> String {
    format!("{} notes about {}", source_type, canonical_key)
}

#[async_trait]
impl SourceFetcher for ScriptedFetcher {
    fn source_type(&self) -> SourceType {
        self.source_type
    }

    async fn fetch(&self, query: &SourceQuery, timeout: Duration) -> Result<SourceSnapshot, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls_by_key
            .lock()
            .unwrap()
            .entry(query.canonical_key.clone())
            .or_insert(0) += 1;

        let payload = payload_for(self.source_type, &query.canonical_key);
        match self.behavior_for(&query.canonical_key) {
            Behavior::Ok => Ok(SourceSnapshot::ok(query, payload)),
            Behavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(SourceSnapshot::ok(query, payload))
            }
            Behavior::Timeout => Err(SourceError::SourceTimeout {
                source_type: self.source_type,
                timeout_ms: timeout.as_millis() as u64,
            }),
            Behavior::Unavailable => Err(SourceError::SourceUnavailable {
                source_type: self.source_type,
                message: "scripted outage".to_string(),
            }),
            Behavior::Malformed => Ok(SourceSnapshot::malformed(
                query,
                format!(
                    "<div>Customers say {} is missing an offline mode for field teams.</div>",
                    query.competitor_name
                ),
            )),
            Behavior::Aged(days) => {
                let mut snapshot = SourceSnapshot::ok(query, payload);
                snapshot.fetched_at = Utc::now() - chrono::Duration::days(days);
                Ok(snapshot)
            }
            Behavior::Rejected => Err(SourceError::SourceMalformed {
                source_type: self.source_type,
                message: "scripted 404".to_string(),
            }),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Behavior::Crash => panic!("scripted crash in {} fetcher", self.source_type),
        }
    }
}

/// One scripted fetcher per source type
pub struct MockSources {
    fetchers: HashMap<SourceType, Arc<ScriptedFetcher>>,
}

impl MockSources {
    pub fn new(default: Behavior) -> Self {
        let fetchers = SourceType::ALL
            .into_iter()
            .map(|s| (s, Arc::new(ScriptedFetcher::new(s, default.clone()))))
            .collect();
        Self { fetchers }
    }

    pub fn healthy() -> Self {
        Self::new(Behavior::Ok)
    }

    pub fn get(&self, source_type: SourceType) -> &Arc<ScriptedFetcher> {
        &self.fetchers[&source_type]
    }

    /// Script one source of one competitor
    pub fn set(&self, source_type: SourceType, canonical_key: &str, behavior: Behavior) {
        self.get(source_type).set(canonical_key, behavior);
    }

    /// Script every source of one competitor
    pub fn set_all(&self, canonical_key: &str, behavior: Behavior) {
        for fetcher in self.fetchers.values() {
            fetcher.set(canonical_key, behavior.clone());
        }
    }

    pub fn total_calls(&self) -> usize {
        self.fetchers.values().map(|f| f.calls()).sum()
    }

    pub fn registry(&self) -> FetcherRegistry {
        self.fetchers
            .iter()
            .map(|(s, f)| (*s, f.clone() as Arc<dyn SourceFetcher>))
            .collect()
    }
}

/// Distinct vocabulary per competitor so insights never merge market-wide
pub fn topic_for(canonical_key: &str) -> String {
    let k = canonical_key;
    format!("{k}ware {k}cloud {k}hub {k}desk lacks onboarding")
}

/// What the scripted extractor answers
#[derive(Debug, Clone)]
pub enum ExtractorScript {
    /// One void claim per snapshot at the given confidence
    Claims(f64),
    /// Raw collaborator output, run through the structured-output parser
    Raw(String),
    Fail,
}

pub struct ScriptedExtractor {
    script: Mutex<ExtractorScript>,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new(script: ExtractorScript) -> Self {
        Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn confident(confidence: f64) -> Self {
        Self::new(ExtractorScript::Claims(confidence))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClaimExtractor for ScriptedExtractor {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn extract(&self, competitor: &Competitor, snapshots: &[SourceSnapshot], _brand: &BrandProfile) -> ParseResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap().clone();
        match script {
            ExtractorScript::Claims(confidence) => {
                let topic = topic_for(&competitor.canonical_key);
                ParseResult::Ok(
                    snapshots
                        .iter()
                        .filter(|s| s.has_payload())
                        .map(|s| {
                            Claim::new(competitor.id, s.source_type, ClaimFacet::Void, topic.clone(), confidence, s.fetched_at)
                                .with_provenance(Some(s.payload.clone()), s.url.clone())
                        })
                        .collect(),
                )
            }
            ExtractorScript::Raw(raw) => parse_structured_output(&raw, &ClaimContext::new(competitor.id, snapshots)),
            ExtractorScript::Fail => ParseResult::Failed {
                reason: "scripted extractor failure".to_string(),
            },
        }
    }
}

pub struct FailingDiscoverer;

#[async_trait]
impl CompetitorDiscoverer for FailingDiscoverer {
    async fn discover(
        &self,
        _brand: &BrandProfile,
        _category: Category,
    ) -> Result<Vec<DiscoveredCompetitor>, SourceError> {
        Err(SourceError::SourceUnavailable {
            source_type: SourceType::Website,
            message: "discovery down".to_string(),
        })
    }
}

/// Engine configuration with short timeouts and backoff
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.scan.fetch_timeout_ms = 200;
    config.scan.extraction_timeout_ms = 200;
    config.scan.retry_backoff_ms = 5;
    config.scan.max_backoff_ms = 20;
    config
}

pub fn collaborators(
    sources: &MockSources,
    discoverer: Arc<dyn CompetitorDiscoverer>,
    extractor: Arc<dyn ClaimExtractor>,
) -> Collaborators {
    Collaborators {
        fetchers: sources.registry(),
        discoverer,
        extractor,
    }
}

/// Engine wired with the mocks and seed-only discovery
pub fn engine(
    sources: &MockSources,
    extractor: Arc<ScriptedExtractor>,
    store: Option<ScanStore>,
) -> Arc<OrchestratorContext> {
    engine_with(test_config(), sources, Arc::new(StaticDiscoverer::default()), extractor, store)
}

pub fn engine_with(
    config: EngineConfig,
    sources: &MockSources,
    discoverer: Arc<dyn CompetitorDiscoverer>,
    extractor: Arc<ScriptedExtractor>,
    store: Option<ScanStore>,
) -> Arc<OrchestratorContext> {
    let events = EventBus::new(1024);
    Arc::new(OrchestratorContext::new(
        &config,
        collaborators(sources, discoverer, extractor),
        events,
        store,
    ))
}

pub const FIVE_COMPETITORS: [&str; 5] = ["Acme", "Globex", "Initech", "Umbrella", "Hooli"];

pub fn brand(brand_id: &str, seeds: &[&str]) -> BrandProfile {
    BrandProfile::new(brand_id, "Brandco").with_seeds(seeds.iter().copied())
}

/// Collect events until the session reaches a terminal phase
pub async fn collect_until_terminal(rx: &mut broadcast::Receiver<ScanEvent>) -> Vec<ScanEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for scan events")
            .expect("event bus closed");
        let terminal = matches!(&event, ScanEvent::PhaseChanged { new_phase, .. } if new_phase.is_terminal());
        events.push(event);
        if terminal {
            return events;
        }
    }
}

pub fn phases(events: &[ScanEvent]) -> Vec<ScanPhase> {
    events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::PhaseChanged { new_phase, .. } => Some(*new_phase),
            _ => None,
        })
        .collect()
}
