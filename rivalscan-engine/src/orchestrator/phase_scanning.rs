//! SCANNING phase: bounded fan-out over competitors, settle-all over sources

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use rivalscan_common::events::ScanEvent;
use tracing::{debug, info, warn};

use super::{CompetitorReport, CompetitorScan, ScanRun, SourceReport};
use crate::cache::SnapshotKey;
use crate::error::SourceError;
use crate::models::{
    Competitor, CompetitorScanStatus, ScanPhase, ScanWarning, SourceQuery, SourceSnapshot, SourceStatus, SourceType,
    WarningCode,
};
use crate::planner::PlannedSource;

/// Settled outcome of one source
struct SourceFetch {
    snapshot: SourceSnapshot,
    report: SourceReport,
    warning: Option<ScanWarning>,
    weight: f64,
}

impl ScanRun {
    pub(super) async fn phase_scanning(&mut self) -> Result<(), SourceError> {
        self.advance(ScanPhase::Scanning).await?;

        let competitors: Vec<Competitor> = self
            .session
            .competitor_ids
            .iter()
            .filter_map(|id| self.resolver.get(id).cloned())
            .collect();
        let concurrency = self.ctx.scan.max_concurrent_competitors.max(1);

        // At most `concurrency` competitors in flight; the next one starts as
        // soon as any settles
        let mut scans: Vec<CompetitorScan> = Vec::with_capacity(competitors.len());
        {
            let this = &*self;
            let mut queue = competitors.into_iter();
            let mut running = FuturesUnordered::new();
            for competitor in queue.by_ref().take(concurrency) {
                running.push(this.scan_competitor(competitor));
            }
            while let Some(scan) = running.next().await {
                scans.push(scan);
                if let Some(competitor) = queue.next() {
                    running.push(this.scan_competitor(competitor));
                }
            }
        }
        self.checkpoint()?;

        let now = Utc::now();
        for scan in scans {
            if scan.report.sources.iter().any(SourceReport::is_usable) {
                if let Some(competitor) = self.resolver.get_mut(&scan.report.competitor.id) {
                    competitor.last_scanned_at = Some(now);
                }
            }
            for warning in scan.warnings {
                self.warn(warning);
            }
            self.snapshots.extend(scan.snapshots);
            self.reports.push(scan.report);
        }

        let order = &self.session.competitor_ids;
        self.reports
            .sort_by_key(|r| order.iter().position(|id| *id == r.competitor.id).unwrap_or(usize::MAX));

        let failed = self
            .reports
            .iter()
            .filter(|r| r.status == CompetitorScanStatus::Failed)
            .count();
        info!(
            session_id = %self.session.id,
            competitors = self.reports.len(),
            failed,
            snapshots = self.snapshots.len(),
            "Scanning finished"
        );

        if !self.reports.is_empty() && failed == self.reports.len() {
            self.warn(ScanWarning::new(
                WarningCode::AllSourcesFailed,
                "every source of every competitor failed; no insights were produced",
            ));
            return Err(SourceError::AllSourcesFailed);
        }

        for report in &self.reports {
            if report.status == CompetitorScanStatus::Failed {
                let message = format!("every source failed for {}", report.competitor.display_name);
                self.session.add_warning(
                    ScanWarning::new(WarningCode::CompetitorFailed, message).for_competitor(report.competitor.id),
                );
            }
        }
        Ok(())
    }

    fn emit_status(
        &self,
        competitor: &Competitor,
        status: CompetitorScanStatus,
        source: Option<(SourceType, SourceStatus)>,
    ) {
        self.ctx.emit(ScanEvent::CompetitorStatusChanged {
            session_id: self.session.id,
            brand_id: self.session.brand_id.clone(),
            competitor_id: competitor.id,
            status,
            source_type: source.map(|(t, _)| t),
            source_status: source.map(|(_, s)| s),
            timestamp: Utc::now(),
        });
    }

    /// Fetch every planned source of one competitor and wait for all of them
    ///
    /// Sources are launched in plan order (fast bucket first) and reported
    /// as they settle.
    async fn scan_competitor(&self, competitor: Competitor) -> CompetitorScan {
        let mut scan = CompetitorScan {
            report: CompetitorReport {
                competitor: competitor.clone(),
                status: CompetitorScanStatus::Pending,
                coverage: 0.0,
                sources: Vec::with_capacity(self.plan.len()),
            },
            snapshots: Vec::with_capacity(self.plan.len()),
            warnings: Vec::new(),
        };
        if self.cancel.is_cancelled() {
            return scan;
        }

        debug!(session_id = %self.session.id, competitor = %competitor.canonical_key, "Scanning competitor");
        self.emit_status(&competitor, CompetitorScanStatus::Scanning, None);

        let mut pending: FuturesUnordered<_> = self
            .plan
            .iter()
            .map(|planned| self.fetch_source(&competitor, *planned))
            .collect();

        let mut total_weight = 0.0;
        let mut usable_weight = 0.0;
        while let Some(fetch) = pending.next().await {
            total_weight += fetch.weight;
            if fetch.report.is_usable() {
                usable_weight += fetch.weight;
            }
            if !self.cancel.is_cancelled() {
                self.emit_status(
                    &competitor,
                    CompetitorScanStatus::Scanning,
                    Some((fetch.report.source_type, fetch.report.status)),
                );
            }
            scan.warnings.extend(fetch.warning);
            scan.snapshots.push(fetch.snapshot);
            scan.report.sources.push(fetch.report);
        }

        if self.cancel.is_cancelled() {
            return scan;
        }

        let usable = scan.report.sources.iter().filter(|s| s.is_usable()).count();
        scan.report.status = if usable == 0 {
            CompetitorScanStatus::Failed
        } else if usable < scan.report.sources.len() {
            CompetitorScanStatus::Partial
        } else {
            CompetitorScanStatus::Scanned
        };
        scan.report.coverage = if total_weight > 0.0 { usable_weight / total_weight } else { 0.0 };
        scan.report.sources.sort_by_key(|s| s.source_type);

        self.emit_status(&competitor, scan.report.status, None);
        scan
    }

    /// One source through the cache, with retries and a per-attempt timeout
    async fn fetch_source(&self, competitor: &Competitor, planned: PlannedSource) -> SourceFetch {
        let source_type = planned.source_type;
        let query = SourceQuery {
            source_type,
            competitor_id: competitor.id,
            competitor_name: competitor.display_name.clone(),
            canonical_key: competitor.canonical_key.clone(),
            url: self.urls.get(&competitor.id).cloned(),
        };

        let (result, attempts) = match self.ctx.collaborators.fetchers.get(&source_type).cloned() {
            Some(fetcher) => {
                let key = SnapshotKey {
                    source_type,
                    canonical_key: competitor.canonical_key.clone(),
                    query: query.url.clone().unwrap_or_default(),
                };
                let timeout = self.ctx.scan.fetch_timeout();
                let label = format!("{}/{}", competitor.canonical_key, source_type);

                self.with_retries(&label, || {
                    let fetcher = fetcher.clone();
                    let query = query.clone();
                    self.ctx.cache.snapshot(key.clone(), move || async move {
                        match tokio::time::timeout(timeout, fetcher.fetch(&query, timeout)).await {
                            Ok(result) => result,
                            Err(_) => Err(SourceError::SourceTimeout {
                                source_type,
                                timeout_ms: timeout.as_millis() as u64,
                            }),
                        }
                    })
                })
                .await
            }
            None => (
                Err(SourceError::SourceUnavailable {
                    source_type,
                    message: "no fetcher configured".to_string(),
                }),
                0,
            ),
        };

        match result {
            Ok(cached) => {
                // Public-layer snapshots are shared across brands; attribute to this competitor
                let mut snapshot = cached;
                snapshot.competitor_id = competitor.id;
                let warning = (snapshot.status == SourceStatus::Malformed).then(|| {
                    ScanWarning::new(
                        WarningCode::SourceMalformed,
                        format!("{} returned malformed data, routed to heuristic parser", source_type),
                    )
                    .for_competitor(competitor.id)
                    .for_source(source_type)
                });
                SourceFetch {
                    report: SourceReport {
                        source_type,
                        status: snapshot.status,
                        attempts,
                        error: None,
                        has_payload: snapshot.has_payload(),
                    },
                    snapshot,
                    warning,
                    weight: planned.weight,
                }
            }
            Err(err) => {
                if err != SourceError::SessionCancelled {
                    warn!(
                        session_id = %self.session.id,
                        competitor = %competitor.canonical_key,
                        source = %source_type,
                        attempts,
                        "Source failed: {}", err
                    );
                }
                let status = err.source_status();
                SourceFetch {
                    snapshot: SourceSnapshot::failed(&query, status),
                    report: SourceReport {
                        source_type,
                        status,
                        attempts,
                        error: Some(err.to_string()),
                        has_payload: false,
                    },
                    warning: (err != SourceError::SessionCancelled).then(|| {
                        ScanWarning::new(err.warning_code(), err.to_string())
                            .for_competitor(competitor.id)
                            .for_source(source_type)
                    }),
                    weight: planned.weight,
                }
            }
        }
    }
}
