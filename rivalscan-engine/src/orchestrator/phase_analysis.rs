//! ANALYZING phase: merge claims into insights and diff against the last
//! completed snapshot of the brand

use chrono::Utc;
use rivalscan_common::events::ScanEvent;
use tracing::info;

use super::ScanRun;
use crate::error::SourceError;
use crate::models::{ScanPhase, ScanWarning, WarningCode};

impl ScanRun {
    pub(super) async fn phase_analysis(&mut self) -> Result<(), SourceError> {
        self.advance(ScanPhase::Analyzing).await?;

        let now = Utc::now();
        self.insights = self.ctx.merger.merge(&self.arena, now);
        for insight in &self.insights {
            self.ctx.emit(ScanEvent::InsightReady {
                session_id: self.session.id,
                brand_id: self.session.brand_id.clone(),
                insight_id: insight.id,
                competitor_ids: insight.competitor_ids.clone(),
                title: insight.title.clone(),
                confidence: insight.confidence,
                timestamp: now,
            });
        }

        let previous = match self.ctx.previous_insights(&self.session.brand_id).await {
            Ok(Some(previous)) => previous,
            Ok(None) => {
                info!(
                    session_id = %self.session.id,
                    insights = self.insights.len(),
                    "First completed snapshot of brand, no alerts"
                );
                return Ok(());
            }
            Err(e) => {
                self.warn(ScanWarning::new(
                    WarningCode::PersistenceFailed,
                    format!("loading previous insights failed, alerts skipped: {}", e),
                ));
                return Ok(());
            }
        };
        self.checkpoint()?;

        self.alerts = self
            .ctx
            .detector
            .diff(&self.session.brand_id, &previous, &self.insights, now);
        for alert in &self.alerts {
            self.ctx.emit(ScanEvent::AlertCreated {
                session_id: self.session.id,
                brand_id: self.session.brand_id.clone(),
                alert_id: alert.id,
                competitor_id: alert.competitor_id,
                alert_type: alert.alert_type,
                insight_id: alert.insight_id,
                timestamp: now,
            });
        }

        info!(
            session_id = %self.session.id,
            insights = self.insights.len(),
            previous = previous.len(),
            alerts = self.alerts.len(),
            "Analysis finished"
        );
        Ok(())
    }
}
