//! Scan orchestrator
//!
//! Drives one scan session per brand through
//! DISCOVERING → VALIDATING → SCANNING → EXTRACTING → ANALYZING and into a
//! terminal phase. Each phase lives in its own `phase_*` module as methods on
//! `ScanRun`, the per-session state. `OrchestratorContext` owns everything
//! shared between sessions: the cache, the event bus, the collaborators and
//! the per-brand registry of running sessions.

mod phase_analysis;
mod phase_discovery;
mod phase_extraction;
mod phase_scanning;

use rand::Rng;
use rivalscan_common::events::{EventBus, ScanEvent};
use rivalscan_common::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerts::AlertDetector;
use crate::cache::CacheLayer;
use crate::config::{EngineConfig, ScanConfig};
use crate::db::{BrandState, ScanStore};
use crate::error::SourceError;
use crate::extraction::HeuristicExtractor;
use crate::fetchers::Collaborators;
use crate::merger::ConfidenceMerger;
use crate::models::{
    Alert, BrandProfile, ClaimArena, Competitor, CompetitorScanStatus, MergedInsight, ScanPhase, ScanSession,
    ScanWarning, SourceSnapshot, SourceStatus, SourceType, WarningCode,
};
use crate::planner::{PlannedSource, SourcePlanner};
use crate::resolver::EntityResolver;

/// Outcome of one planned source for one competitor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    pub source_type: SourceType,
    pub status: SourceStatus,
    pub attempts: u32,
    pub error: Option<String>,
    /// Whether a payload came back; a failed fetch never has one, whatever
    /// its status
    pub has_payload: bool,
}

impl SourceReport {
    /// Whether the source produced a payload the extractors can read
    pub fn is_usable(&self) -> bool {
        self.has_payload
    }
}

/// Per-competitor result of the scanning phase
#[derive(Debug, Clone, Serialize)]
pub struct CompetitorReport {
    pub competitor: Competitor,
    pub status: CompetitorScanStatus,
    /// Share of planned source weight that produced data
    pub coverage: f64,
    pub sources: Vec<SourceReport>,
}

/// Everything a finished session produced
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub session: ScanSession,
    pub competitors: Vec<CompetitorReport>,
    pub insights: Vec<MergedInsight>,
    pub alerts: Vec<Alert>,
    /// Set when the session failed, e.g. `AllSourcesFailed`
    pub error: Option<SourceError>,
}

impl ScanOutcome {
    pub fn phase(&self) -> ScanPhase {
        self.session.phase
    }

    pub fn report_for(&self, competitor_id: &Uuid) -> Option<&CompetitorReport> {
        self.competitors.iter().find(|r| &r.competitor.id == competitor_id)
    }
}

/// Handle to a started session
#[derive(Debug)]
pub struct ScanHandle {
    pub session_id: Uuid,
    outcome: oneshot::Receiver<ScanOutcome>,
}

impl ScanHandle {
    /// Wait for the session to reach a terminal phase
    pub async fn outcome(self) -> Option<ScanOutcome> {
        self.outcome.await.ok()
    }
}

struct ActiveScan {
    session_id: Uuid,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// In-memory view of a brand for engines running without a store
#[derive(Default)]
struct BrandMemory {
    competitors: Vec<Competitor>,
    last_completed: Option<BrandState>,
    alerts: BTreeMap<Uuid, Alert>,
}

/// Shared state of all scans of one engine
pub struct OrchestratorContext {
    scan: ScanConfig,
    cache: CacheLayer,
    events: EventBus,
    collaborators: Collaborators,
    planner: SourcePlanner,
    merger: ConfidenceMerger,
    detector: AlertDetector,
    heuristic: HeuristicExtractor,
    store: Option<ScanStore>,
    /// Running session per brand
    active: tokio::sync::Mutex<HashMap<String, ActiveScan>>,
    /// Latest known state of every session by id
    sessions: Mutex<HashMap<Uuid, ScanSession>>,
    memory: Mutex<HashMap<String, BrandMemory>>,
}

impl OrchestratorContext {
    pub fn new(config: &EngineConfig, collaborators: Collaborators, events: EventBus, store: Option<ScanStore>) -> Self {
        Self {
            scan: config.scan.clone(),
            cache: CacheLayer::new(config.cache.clone()),
            events,
            collaborators,
            planner: SourcePlanner::new(config.planner.clone()),
            merger: ConfidenceMerger::new(config.merger.clone()),
            detector: AlertDetector::new(config.alerts.clone()),
            heuristic: HeuristicExtractor::default(),
            store,
            active: tokio::sync::Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            memory: Mutex::new(HashMap::new()),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn store(&self) -> Option<&ScanStore> {
        self.store.as_ref()
    }

    fn emit(&self, event: ScanEvent) {
        self.events.emit_lossy(event);
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<Uuid, ScanSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn memory(&self) -> MutexGuard<'_, HashMap<String, BrandMemory>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_session(&self, session: &ScanSession) {
        self.sessions().insert(session.id, session.clone());
    }

    fn published_session(&self, session_id: &Uuid) -> Option<ScanSession> {
        self.sessions().get(session_id).cloned()
    }

    fn remembered<T>(&self, brand_id: &str, read: impl FnOnce(&BrandMemory) -> T) -> Option<T> {
        self.memory().get(brand_id).map(read)
    }

    fn retire_remembered(&self, brand_id: &str, competitor_id: Uuid) -> Option<Competitor> {
        let mut memory = self.memory();
        let competitor = memory
            .get_mut(brand_id)?
            .competitors
            .iter_mut()
            .find(|c| c.id == competitor_id)?;
        competitor.retired = true;
        Some(competitor.clone())
    }

    /// Start a session for the brand
    ///
    /// A running session of the same brand is cancelled first, and this call
    /// waits until it has settled so the two never fetch concurrently.
    pub async fn start_scan(self: &Arc<Self>, brand: BrandProfile) -> Result<ScanHandle> {
        if brand.brand_id.trim().is_empty() {
            return Err(Error::InvalidInput("brand_id must not be empty".to_string()));
        }

        let mut active = self.active.lock().await;
        active.retain(|_, scan| !scan.handle.is_finished());

        if let Some(previous) = active.remove(&brand.brand_id) {
            info!(
                brand_id = %brand.brand_id,
                session_id = %previous.session_id,
                "Cancelling running scan before starting a new one"
            );
            previous.cancel.cancel();
            if let Err(e) = previous.handle.await {
                error!(session_id = %previous.session_id, "Cancelled scan task failed: {}", e);
            }
        }

        let session = ScanSession::new(brand.brand_id.clone());
        let session_id = session.id;
        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();

        self.publish_session(&session);
        let run = ScanRun::new(self.clone(), session, brand.clone(), cancel.clone());
        let handle = tokio::spawn(async move {
            let outcome = run.execute().await;
            let _ = tx.send(outcome);
        });

        active.insert(
            brand.brand_id.clone(),
            ActiveScan {
                session_id,
                cancel,
                handle,
            },
        );

        Ok(ScanHandle {
            session_id,
            outcome: rx,
        })
    }

    /// Start a session and wait for its outcome
    pub async fn run_scan(self: &Arc<Self>, brand: BrandProfile) -> Result<ScanOutcome> {
        let handle = self.start_scan(brand).await?;
        let session_id = handle.session_id;
        handle
            .outcome()
            .await
            .ok_or_else(|| Error::Internal(format!("scan task {} ended without an outcome", session_id)))
    }

    /// Request cooperative cancellation; false if the session is not running
    pub async fn cancel_scan(&self, session_id: Uuid) -> bool {
        if self.published_session(&session_id).map_or(true, |s| s.is_terminal()) {
            return false;
        }
        let active = self.active.lock().await;
        match active
            .values()
            .find(|scan| scan.session_id == session_id && !scan.handle.is_finished())
        {
            Some(scan) => {
                info!(session_id = %session_id, "Cancellation requested");
                scan.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running session and wait for them
    pub async fn shutdown(&self) {
        let mut active = self.active.lock().await;
        for (brand_id, scan) in active.drain() {
            scan.cancel.cancel();
            if let Err(e) = scan.handle.await {
                warn!(brand_id = %brand_id, "Scan task failed during shutdown: {}", e);
            }
        }
    }

    pub async fn session(&self, session_id: Uuid) -> Result<Option<ScanSession>> {
        if let Some(session) = self.published_session(&session_id) {
            return Ok(Some(session));
        }
        match &self.store {
            Some(store) => store.load_session(session_id).await,
            None => Ok(None),
        }
    }

    /// Last completed state of a brand without re-scanning
    pub async fn reopen_brand(&self, brand_id: &str) -> Result<Option<BrandState>> {
        match &self.store {
            Some(store) => store.reopen_brand(brand_id).await,
            None => Ok(self.remembered(brand_id, |m| m.last_completed.clone()).flatten()),
        }
    }

    /// Alerts of a brand, newest first
    pub async fn alerts(&self, brand_id: &str, limit: u32) -> Result<Vec<Alert>> {
        match &self.store {
            Some(store) => store.list_alerts(brand_id, limit).await,
            None => {
                let mut alerts: Vec<Alert> = self
                    .remembered(brand_id, |m| m.alerts.values().cloned().collect())
                    .unwrap_or_default();
                alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
                alerts.truncate(limit as usize);
                Ok(alerts)
            }
        }
    }

    /// Stop scanning a competitor from the next session on
    ///
    /// The competitor stays known, so later sightings still merge into it
    /// instead of creating a fresh entity. `None` if the brand has no such
    /// competitor.
    pub async fn retire_competitor(&self, brand_id: &str, competitor_id: Uuid) -> Result<Option<Competitor>> {
        let retired = match &self.store {
            Some(store) => {
                if !store.retire_competitor(brand_id, competitor_id).await? {
                    return Ok(None);
                }
                store
                    .list_competitors(brand_id)
                    .await?
                    .into_iter()
                    .find(|c| c.id == competitor_id)
            }
            None => self.retire_remembered(brand_id, competitor_id),
        };
        if let Some(competitor) = &retired {
            info!(brand_id = %brand_id, competitor_id = %competitor_id, key = %competitor.canonical_key, "Competitor retired");
        }
        Ok(retired)
    }

    async fn known_competitors(&self, brand_id: &str) -> Result<Vec<Competitor>> {
        match &self.store {
            Some(store) => store.list_competitors(brand_id).await,
            None => Ok(self
                .remembered(brand_id, |m| m.competitors.clone())
                .unwrap_or_default()),
        }
    }

    /// Insights of the last completed session; `None` before the first one
    async fn previous_insights(&self, brand_id: &str) -> Result<Option<Vec<MergedInsight>>> {
        Ok(self.reopen_brand(brand_id).await?.map(|state| state.insights))
    }
}

/// Per-competitor result of fetching every planned source
struct CompetitorScan {
    report: CompetitorReport,
    snapshots: Vec<SourceSnapshot>,
    warnings: Vec<ScanWarning>,
}

/// State of one running session
struct ScanRun {
    ctx: Arc<OrchestratorContext>,
    session: ScanSession,
    brand: BrandProfile,
    cancel: CancellationToken,
    resolver: EntityResolver,
    plan: Vec<PlannedSource>,
    /// Homepage URL per competitor, when discovery supplied one
    urls: HashMap<Uuid, String>,
    reports: Vec<CompetitorReport>,
    snapshots: Vec<SourceSnapshot>,
    arena: ClaimArena,
    insights: Vec<MergedInsight>,
    alerts: Vec<Alert>,
}

impl ScanRun {
    fn new(ctx: Arc<OrchestratorContext>, session: ScanSession, brand: BrandProfile, cancel: CancellationToken) -> Self {
        let resolver = EntityResolver::new(brand.brand_id.clone());
        Self {
            ctx,
            session,
            brand,
            cancel,
            resolver,
            plan: Vec::new(),
            urls: HashMap::new(),
            reports: Vec::new(),
            snapshots: Vec::new(),
            arena: ClaimArena::new(),
            insights: Vec::new(),
            alerts: Vec::new(),
        }
    }

    async fn execute(mut self) -> ScanOutcome {
        let started = std::time::Instant::now();
        info!(
            session_id = %self.session.id,
            brand_id = %self.session.brand_id,
            "Starting scan session"
        );
        self.persist_session().await;

        let (terminal, error) = match self.run_phases().await {
            Ok(phase) => (phase, None),
            Err(SourceError::SessionCancelled) => (ScanPhase::Cancelled, None),
            Err(err) => (ScanPhase::Failed, Some(err)),
        };

        if terminal == ScanPhase::Failed || terminal == ScanPhase::Cancelled {
            self.insights.clear();
            self.alerts.clear();
        }
        self.transition(terminal);
        self.persist_results().await;

        match &error {
            Some(SourceError::AllSourcesFailed) => error!(
                session_id = %self.session.id,
                brand_id = %self.session.brand_id,
                competitors = self.session.competitor_ids.len(),
                "Scan failed: every source failed for every competitor"
            ),
            Some(err) => error!(
                session_id = %self.session.id,
                brand_id = %self.session.brand_id,
                "Scan failed: {}", err
            ),
            None => info!(
                session_id = %self.session.id,
                brand_id = %self.session.brand_id,
                phase = %terminal,
                insights = self.insights.len(),
                alerts = self.alerts.len(),
                warnings = self.session.warnings.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Scan session finished"
            ),
        }

        self.into_outcome(error)
    }

    async fn run_phases(&mut self) -> std::result::Result<ScanPhase, SourceError> {
        let found = self.phase_discovery().await?;
        self.phase_validation(found).await?;

        if self.session.competitor_ids.is_empty() {
            self.warn(ScanWarning::new(
                WarningCode::NoCompetitors,
                "no competitors left to scan after validation",
            ));
            return Ok(ScanPhase::Complete);
        }

        self.phase_scanning().await?;
        self.phase_extraction().await?;
        self.phase_analysis().await?;

        if self.reports.iter().any(|r| r.status == CompetitorScanStatus::Failed) {
            Ok(ScanPhase::PartialFailure)
        } else {
            Ok(ScanPhase::Complete)
        }
    }

    fn checkpoint(&self) -> std::result::Result<(), SourceError> {
        if self.cancel.is_cancelled() {
            Err(SourceError::SessionCancelled)
        } else {
            Ok(())
        }
    }

    /// Move to a non-terminal phase, honouring cancellation
    async fn advance(&mut self, phase: ScanPhase) -> std::result::Result<(), SourceError> {
        self.checkpoint()?;
        self.transition(phase);
        self.persist_session().await;
        Ok(())
    }

    fn transition(&mut self, phase: ScanPhase) {
        match self.session.transition_to(phase) {
            Ok(t) => {
                debug!(session_id = %self.session.id, from = %t.old_phase, to = %t.new_phase, "Phase transition");
                self.ctx.emit(ScanEvent::PhaseChanged {
                    session_id: self.session.id,
                    brand_id: self.session.brand_id.clone(),
                    old_phase: t.old_phase,
                    new_phase: t.new_phase,
                    timestamp: t.transitioned_at,
                });
                self.ctx.publish_session(&self.session);
            }
            Err(e) => warn!(session_id = %self.session.id, "Ignoring {}", e),
        }
    }

    fn warn(&mut self, warning: ScanWarning) {
        warn!(
            session_id = %self.session.id,
            code = ?warning.code,
            competitor = ?warning.competitor_id,
            source = ?warning.source_type,
            "{}", warning.message
        );
        self.session.add_warning(warning);
    }

    /// Run a collaborator call with the retry policy: retryable failures are
    /// retried with exponential backoff plus jitter, everything races the
    /// cancellation token
    async fn with_retries<T, F, Fut>(&self, label: &str, mut op: F) -> (std::result::Result<T, SourceError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, SourceError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(SourceError::SessionCancelled),
                r = op() => r,
            };

            match result {
                Err(err) if err.is_retryable() && attempt <= self.ctx.scan.max_retries => {
                    let base = self.ctx.scan.backoff(attempt);
                    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 4);
                    let delay = base + Duration::from_millis(jitter_ms);
                    warn!(
                        session_id = %self.session.id,
                        call = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after {}", err
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return (Err(SourceError::SessionCancelled), attempt),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => return (other, attempt),
            }
        }
    }

    async fn persist_session(&mut self) {
        let Some(store) = self.ctx.store.clone() else {
            return;
        };
        if let Err(e) = store.save_session(&self.session).await {
            self.warn(ScanWarning::new(
                WarningCode::PersistenceFailed,
                format!("saving session failed: {}", e),
            ));
        }
    }

    /// Store what the session produced; the session row is written last so
    /// readers never see a completed session without its insights
    async fn persist_results(&mut self) {
        let competitors: Vec<Competitor> = self.resolver.competitors().into_iter().cloned().collect();
        let completed = self.session.is_completed();

        if let Some(store) = self.ctx.store.clone() {
            let mut failures = Vec::new();
            if let Err(e) = store.save_competitors(&competitors).await {
                failures.push(format!("saving competitors failed: {}", e));
            }
            if let Err(e) = store.record_snapshots(self.session.id, &self.snapshots).await {
                failures.push(format!("recording snapshots failed: {}", e));
            }
            if completed {
                if let Err(e) = store
                    .replace_insights(self.session.id, &self.session.brand_id, &self.insights)
                    .await
                {
                    failures.push(format!("saving insights failed: {}", e));
                }
                match store.insert_alerts(&self.alerts).await {
                    Ok(inserted) => debug!(session_id = %self.session.id, inserted, "Stored alerts"),
                    Err(e) => failures.push(format!("saving alerts failed: {}", e)),
                }
            }
            for message in failures {
                self.warn(ScanWarning::new(WarningCode::PersistenceFailed, message));
            }
            self.persist_session().await;
        }

        self.remember(competitors, completed);
        self.ctx.publish_session(&self.session);
    }

    fn remember(&self, competitors: Vec<Competitor>, completed: bool) {
        let mut memory = self.ctx.memory();
        let entry = memory.entry(self.session.brand_id.clone()).or_default();
        if completed {
            entry.last_completed = Some(BrandState {
                session: self.session.clone(),
                competitors: competitors
                    .iter()
                    .filter(|c| self.session.competitor_ids.contains(&c.id))
                    .cloned()
                    .collect(),
                insights: self.insights.clone(),
            });
            for alert in &self.alerts {
                entry.alerts.entry(alert.id).or_insert_with(|| alert.clone());
            }
        }
        let retired: HashSet<Uuid> = entry.competitors.iter().filter(|c| c.retired).map(|c| c.id).collect();
        entry.competitors = competitors
            .into_iter()
            .map(|mut c| {
                c.retired |= retired.contains(&c.id);
                c
            })
            .collect();
    }

    fn into_outcome(self, error: Option<SourceError>) -> ScanOutcome {
        let mut reports = self.reports;
        for id in &self.session.competitor_ids {
            if reports.iter().any(|r| &r.competitor.id == id) {
                continue;
            }
            if let Some(competitor) = self.resolver.get(id) {
                reports.push(CompetitorReport {
                    competitor: competitor.clone(),
                    status: CompetitorScanStatus::Pending,
                    coverage: 0.0,
                    sources: Vec::new(),
                });
            }
        }

        ScanOutcome {
            session: self.session,
            competitors: reports,
            insights: self.insights,
            alerts: self.alerts,
            error,
        }
    }
}
