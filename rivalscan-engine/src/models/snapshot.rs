//! Source snapshots and fetch queries

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rivalscan_common::events::{SourceStatus, SourceType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

/// What a source fetcher is asked to fetch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceQuery {
    pub source_type: SourceType,
    pub competitor_id: Uuid,
    pub competitor_name: String,
    pub canonical_key: String,
    pub url: Option<String>,
}

/// Result of one fetch of one source for one competitor
///
/// Immutable once produced. Only the metadata is persisted; `payload`
/// travels in memory and is addressed by `payload_ref`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub source_type: SourceType,
    pub competitor_id: Uuid,
    pub fetched_at: DateTime<Utc>,
    pub ttl_expires_at: DateTime<Utc>,
    pub payload_ref: Option<String>,
    pub status: SourceStatus,
    /// Where the payload came from, used as claim provenance
    pub url: Option<String>,
    #[serde(skip)]
    pub payload: String,
}

impl SourceSnapshot {
    /// Snapshot of a successfully fetched payload
    pub fn ok(query: &SourceQuery, payload: impl Into<String>) -> Self {
        Self::with_status(query, SourceStatus::Ok, payload.into())
    }

    /// Snapshot of a payload that arrived but could not be understood
    pub fn malformed(query: &SourceQuery, payload: impl Into<String>) -> Self {
        Self::with_status(query, SourceStatus::Malformed, payload.into())
    }

    /// Metadata-only record of a source that returned nothing usable
    pub fn failed(query: &SourceQuery, status: SourceStatus) -> Self {
        Self::with_status(query, status, String::new())
    }

    fn with_status(query: &SourceQuery, status: SourceStatus, payload: String) -> Self {
        let fetched_at = Utc::now();
        Self {
            source_type: query.source_type,
            competitor_id: query.competitor_id,
            fetched_at,
            ttl_expires_at: fetched_at,
            payload_ref: (!payload.is_empty()).then(|| payload_ref(&payload)),
            status,
            url: query.url.clone(),
            payload,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Stamp the expiry from the cache policy that admitted this snapshot
    pub fn stamped(mut self, ttl: Duration) -> Self {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(36_500));
        self.ttl_expires_at = self
            .fetched_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self
    }

    /// Whether there is payload text a parser can work on
    pub fn has_payload(&self) -> bool {
        matches!(self.status, SourceStatus::Ok | SourceStatus::Malformed) && !self.payload.is_empty()
    }
}

/// Content address of a payload body: `sha256:<hex>`
pub fn payload_ref(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("sha256:{}", hex)
}
