//! DISCOVERING and VALIDATING phases

use chrono::Utc;
use rivalscan_common::events::ScanEvent;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ScanRun;
use crate::classifier::classify;
use crate::error::SourceError;
use crate::models::{Category, DiscoveredCompetitor, ScanPhase, ScanWarning, SourceType, WarningCode};
use crate::resolver::canonicalize;

/// Confidence given to competitors the caller named explicitly
const SEED_CONFIDENCE: f64 = 0.9;

impl ScanRun {
    /// Classify, plan, discover and resolve; returns resolved competitor ids
    /// in order of first sighting
    pub(super) async fn phase_discovery(&mut self) -> Result<Vec<Uuid>, SourceError> {
        let brand_id = self.session.brand_id.clone();

        let (category, confidence) = classify(&self.brand.signals);
        self.session.category = Some(category);
        self.plan = self.ctx.planner.plan(category);
        info!(
            session_id = %self.session.id,
            brand_id = %brand_id,
            category = %category,
            confidence,
            sources = self.plan.len(),
            "Classified brand"
        );

        match self.ctx.known_competitors(&brand_id).await {
            Ok(known) => {
                debug!(session_id = %self.session.id, known = known.len(), "Seeding resolver");
                self.resolver.seed(known);
            }
            Err(e) => self.warn(ScanWarning::new(
                WarningCode::PersistenceFailed,
                format!("loading known competitors failed: {}", e),
            )),
        }

        let seeds: Vec<DiscoveredCompetitor> = self
            .brand
            .seed_competitors
            .iter()
            .map(|name| DiscoveredCompetitor::new(name.clone(), SEED_CONFIDENCE))
            .collect();
        let discovered = self.discover(category, !seeds.is_empty()).await?;

        let mut found = Vec::new();
        for candidate in seeds.into_iter().chain(discovered) {
            self.checkpoint()?;
            let resolution = self.resolver.resolve(&candidate.name, candidate.confidence, Some(category));
            if let Some(err) = resolution.warning(&candidate.name) {
                self.warn(ScanWarning::new(err.warning_code(), err.to_string()));
            }
            let Some(id) = resolution.competitor_id() else {
                continue;
            };
            if let Some(url) = candidate.url {
                self.urls.entry(id).or_insert(url);
            }
            if !found.contains(&id) {
                found.push(id);
            }
        }

        for id in &found {
            if let Some(competitor) = self.resolver.get(id) {
                self.ctx.emit(ScanEvent::CompetitorFound {
                    session_id: self.session.id,
                    brand_id: brand_id.clone(),
                    competitor_id: competitor.id,
                    display_name: competitor.display_name.clone(),
                    canonical_key: competitor.canonical_key.clone(),
                    timestamp: Utc::now(),
                });
            }
        }

        info!(session_id = %self.session.id, competitors = found.len(), "Discovery finished");
        Ok(found)
    }

    /// Ask the discovery collaborator; a failure is fatal only when the
    /// caller supplied no seeds
    async fn discover(&mut self, category: Category, has_seeds: bool) -> Result<Vec<DiscoveredCompetitor>, SourceError> {
        let discoverer = self.ctx.collaborators.discoverer.clone();
        let timeout = self.ctx.scan.fetch_timeout();
        let brand = &self.brand;

        let (result, attempts) = self
            .with_retries("discovery", || async {
                match tokio::time::timeout(timeout, discoverer.discover(brand, category)).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::SourceTimeout {
                        source_type: SourceType::Website,
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                }
            })
            .await;

        match result {
            Ok(list) => Ok(list),
            Err(SourceError::SessionCancelled) => Err(SourceError::SessionCancelled),
            Err(err) => {
                self.warn(ScanWarning::new(
                    WarningCode::DiscoveryFailed,
                    format!("discovery failed after {} attempt(s): {}", attempts, err),
                ));
                if has_seeds {
                    Ok(Vec::new())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Drop the brand itself and retired competitors, then cap the list
    pub(super) async fn phase_validation(&mut self, found: Vec<Uuid>) -> Result<(), SourceError> {
        self.advance(ScanPhase::Validating).await?;

        let own_keys: HashSet<String> = [Some(self.brand.name.as_str()), self.brand.website.as_deref()]
            .into_iter()
            .flatten()
            .map(canonicalize)
            .filter(|k| !k.is_empty())
            .collect();

        let mut kept = Vec::new();
        for id in found {
            let Some(competitor) = self.resolver.get(&id) else {
                continue;
            };
            if own_keys.contains(&competitor.canonical_key) {
                debug!(session_id = %self.session.id, key = %competitor.canonical_key, "Dropping brand itself");
                continue;
            }
            if competitor.retired {
                debug!(session_id = %self.session.id, key = %competitor.canonical_key, "Dropping retired competitor");
                continue;
            }
            kept.push(id);
        }

        let max = self.ctx.scan.max_competitors;
        if kept.len() > max {
            warn!(
                session_id = %self.session.id,
                found = kept.len(),
                max,
                "Too many competitors, keeping the first {}", max
            );
            kept.truncate(max);
        }

        self.session.competitor_ids = kept;
        self.ctx.publish_session(&self.session);
        Ok(())
    }
}
