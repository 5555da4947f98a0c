//! SQLite persistence for competitors, sessions, snapshots, insights and alerts
//!
//! Repository modules take a pool; `ScanStore` bundles them for the
//! orchestrator and the HTTP layer. Sets and lists are stored as JSON text,
//! timestamps as RFC 3339.

pub mod alerts;
pub mod competitors;
pub mod insights;
pub mod sessions;
pub mod snapshots;

use chrono::{DateTime, Utc};
use rivalscan_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{Alert, Competitor, MergedInsight, ScanSession, SourceSnapshot};
use crate::utils::DEFAULT_MAX_LOCK_WAIT_MS;

pub(crate) fn parse_uuid(raw: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::Internal(format!("Invalid uuid in {}: {}", column, e)))
}

pub(crate) fn parse_time(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp in {}: {}", column, e)))
}

pub(crate) fn parse_enum<T: FromStr<Err = String>>(raw: &str, column: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|e| Error::Internal(format!("Invalid value in {}: {}", column, e)))
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Everything needed to show a brand without re-scanning
#[derive(Debug, Clone, Serialize)]
pub struct BrandState {
    pub session: ScanSession,
    pub competitors: Vec<Competitor>,
    pub insights: Vec<MergedInsight>,
}

/// Durable store used by scans
#[derive(Clone)]
pub struct ScanStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl ScanStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_max_lock_wait(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn save_competitors(&self, competitors: &[Competitor]) -> Result<()> {
        for competitor in competitors {
            competitors::upsert_competitor(&self.pool, competitor, self.max_lock_wait_ms).await?;
        }
        Ok(())
    }

    pub async fn retire_competitor(&self, brand_id: &str, competitor_id: Uuid) -> Result<bool> {
        competitors::retire_competitor(&self.pool, brand_id, competitor_id, self.max_lock_wait_ms).await
    }

    pub async fn list_competitors(&self, brand_id: &str) -> Result<Vec<Competitor>> {
        competitors::list_competitors(&self.pool, brand_id).await
    }

    pub async fn save_session(&self, session: &ScanSession) -> Result<()> {
        sessions::save_session(&self.pool, session, self.max_lock_wait_ms).await
    }

    pub async fn load_session(&self, session_id: Uuid) -> Result<Option<ScanSession>> {
        sessions::load_session(&self.pool, session_id).await
    }

    pub async fn latest_completed_session(&self, brand_id: &str) -> Result<Option<ScanSession>> {
        sessions::latest_completed_session(&self.pool, brand_id).await
    }

    pub async fn record_snapshots(&self, session_id: Uuid, snapshots: &[SourceSnapshot]) -> Result<()> {
        snapshots::record_snapshots(&self.pool, session_id, snapshots, self.max_lock_wait_ms).await
    }

    pub async fn list_snapshots(&self, session_id: Uuid) -> Result<Vec<SourceSnapshot>> {
        snapshots::list_snapshots(&self.pool, session_id).await
    }

    pub async fn replace_insights(&self, session_id: Uuid, brand_id: &str, insights: &[MergedInsight]) -> Result<()> {
        insights::replace_insights(&self.pool, session_id, brand_id, insights, self.max_lock_wait_ms).await
    }

    pub async fn list_insights(&self, session_id: Uuid) -> Result<Vec<MergedInsight>> {
        insights::list_insights(&self.pool, session_id).await
    }

    /// Returns how many alerts were new
    pub async fn insert_alerts(&self, alerts: &[Alert]) -> Result<usize> {
        alerts::insert_alerts(&self.pool, alerts, self.max_lock_wait_ms).await
    }

    pub async fn list_alerts(&self, brand_id: &str, limit: u32) -> Result<Vec<Alert>> {
        alerts::list_alerts(&self.pool, brand_id, limit).await
    }

    /// Last completed session of a brand with its competitors and insights
    pub async fn reopen_brand(&self, brand_id: &str) -> Result<Option<BrandState>> {
        let Some(session) = self.latest_completed_session(brand_id).await? else {
            return Ok(None);
        };

        let competitors = self
            .list_competitors(brand_id)
            .await?
            .into_iter()
            .filter(|c| session.competitor_ids.contains(&c.id))
            .collect();
        let insights = self.list_insights(session.id).await?;

        Ok(Some(BrandState {
            session,
            competitors,
            insights,
        }))
    }
}
