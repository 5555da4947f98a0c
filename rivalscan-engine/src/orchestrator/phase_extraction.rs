//! EXTRACTING phase: snapshots → claims, through the tenant cache layer

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::ScanRun;
use crate::cache::{ClaimsKey, ExtractedClaims};
use crate::collaborators::ClaimExtractor;
use crate::error::SourceError;
use crate::extraction::{HeuristicExtractor, ParseResult};
use crate::models::{
    BrandProfile, Competitor, CompetitorScanStatus, ScanPhase, ScanWarning, SourceSnapshot, SourceStatus, SourceType,
    WarningCode,
};

/// Run the extraction collaborator over the clean snapshots and the
/// heuristic parser over malformed ones, falling back to the heuristic
/// when the collaborator fails or runs out of time
async fn extract_claims(
    extractor: Arc<dyn ClaimExtractor>,
    heuristic: HeuristicExtractor,
    competitor: Competitor,
    snapshots: Vec<SourceSnapshot>,
    brand: BrandProfile,
    timeout: Duration,
) -> Result<ExtractedClaims, SourceError> {
    let (clean, malformed): (Vec<SourceSnapshot>, Vec<SourceSnapshot>) = snapshots
        .into_iter()
        .filter(SourceSnapshot::has_payload)
        .partition(|s| s.status == SourceStatus::Ok);

    let mut extracted = ExtractedClaims::default();

    if !clean.is_empty() {
        let result = tokio::time::timeout(timeout, extractor.extract(&competitor, &clean, &brand)).await;
        let failure = match result {
            Ok(ParseResult::Ok(claims)) => {
                extracted.claims.extend(claims);
                None
            }
            Ok(ParseResult::PartiallyRecovered { claims, warnings }) => {
                extracted.claims.extend(claims);
                extracted.warnings.extend(warnings);
                None
            }
            Ok(ParseResult::Failed { reason }) => Some(reason),
            Err(_) => Some(format!("no answer within {} ms", timeout.as_millis())),
        };

        if let Some(reason) = failure {
            let fallback = heuristic.extract_all(competitor.id, &clean);
            extracted.warnings.push(format!(
                "{} extraction failed ({}); heuristic parser recovered {} claim(s)",
                extractor.name(),
                reason,
                fallback.len()
            ));
            extracted.claims.extend(fallback);
            extracted.used_fallback = true;
        }
    }

    if !malformed.is_empty() {
        extracted.claims.extend(heuristic.extract_all(competitor.id, &malformed));
        extracted.used_fallback = true;
    }

    Ok(extracted)
}

impl ScanRun {
    pub(super) async fn phase_extraction(&mut self) -> Result<(), SourceError> {
        self.advance(ScanPhase::Extracting).await?;

        let jobs: Vec<(Competitor, Vec<SourceSnapshot>)> = self
            .reports
            .iter()
            .filter(|r| r.status != CompetitorScanStatus::Failed)
            .map(|r| {
                let snapshots: Vec<SourceSnapshot> = self
                    .snapshots
                    .iter()
                    .filter(|s| s.competitor_id == r.competitor.id && s.has_payload())
                    .cloned()
                    .collect();
                (r.competitor.clone(), snapshots)
            })
            .filter(|(_, snapshots)| !snapshots.is_empty())
            .collect();
        let concurrency = self.ctx.scan.max_concurrent_competitors.max(1);

        let mut results = Vec::with_capacity(jobs.len());
        {
            let this = &*self;
            let mut queue = jobs.into_iter();
            let mut running = FuturesUnordered::new();
            for (competitor, snapshots) in queue.by_ref().take(concurrency) {
                running.push(this.extract_competitor(competitor, snapshots));
            }
            while let Some(result) = running.next().await {
                results.push(result);
                if let Some((competitor, snapshots)) = queue.next() {
                    running.push(this.extract_competitor(competitor, snapshots));
                }
            }
        }
        self.checkpoint()?;

        for (competitor_id, result) in results {
            match result {
                Ok(extracted) => {
                    let code = if extracted.claims.is_empty() {
                        WarningCode::ExtractionFailed
                    } else {
                        WarningCode::ExtractionRecovered
                    };
                    for message in extracted.warnings {
                        self.warn(ScanWarning::new(code, message).for_competitor(competitor_id));
                    }
                    self.arena.extend(extracted.claims);
                }
                Err(SourceError::SessionCancelled) => return Err(SourceError::SessionCancelled),
                Err(err) => self.warn(
                    ScanWarning::new(WarningCode::ExtractionFailed, err.to_string()).for_competitor(competitor_id),
                ),
            }
        }

        info!(session_id = %self.session.id, claims = self.arena.len(), "Extraction finished");
        Ok(())
    }

    async fn extract_competitor(
        &self,
        competitor: Competitor,
        snapshots: Vec<SourceSnapshot>,
    ) -> (Uuid, Result<ExtractedClaims, SourceError>) {
        let competitor_id = competitor.id;
        let sources: Vec<SourceType> = snapshots.iter().map(|s| s.source_type).collect();
        let key = ClaimsKey::new(self.session.brand_id.clone(), competitor_id, &snapshots);

        let extractor = self.ctx.collaborators.extractor.clone();
        let heuristic = self.ctx.heuristic.clone();
        let brand = self.brand.clone();
        let timeout = self.ctx.scan.extraction_timeout();

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SourceError::SessionCancelled),
            r = self.ctx.cache.claims(key, &sources, move || {
                extract_claims(extractor, heuristic, competitor, snapshots, brand, timeout)
            }) => r,
        };

        // Cached claims may predate this session's snapshots; keep only what
        // this competitor's usable sources can account for
        let result = result.map(|mut extracted| {
            let allowed: HashSet<SourceType> = sources.iter().copied().collect();
            extracted
                .claims
                .retain(|c| c.competitor_id == competitor_id && allowed.contains(&c.source_type));
            extracted
        });

        if let Ok(extracted) = &result {
            debug!(
                session_id = %self.session.id,
                competitor_id = %competitor_id,
                claims = extracted.claims.len(),
                fallback = extracted.used_fallback,
                "Extracted claims"
            );
        }
        (competitor_id, result)
    }
}
