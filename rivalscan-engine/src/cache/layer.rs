//! Two-layer cache used by scans
//!
//! The public layer holds source snapshots, facts about a competitor that are
//! the same for every tenant. The tenant layer holds claims extracted for one
//! brand, keyed by the payloads they were extracted from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use super::{CacheStatsSnapshot, TtlCache, TtlPolicy};
use crate::error::SourceError;
use crate::models::{Claim, SourceSnapshot, SourceType};

const SECS_PER_DAY: f64 = 86_400.0;

/// Longest TTL accepted from configuration
pub const MAX_TTL_DAYS: f64 = 3_650.0;

/// Largest stale grace window, as a multiple of the TTL
pub const MAX_STALE_GRACE_RATIO: f64 = 10.0;

/// Cache TTLs (`[cache]` and `[cache.ttl_days]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Stale grace window as a fraction of the TTL
    pub stale_grace_ratio: f64,
    /// TTL in days per source type name
    pub ttl_days: BTreeMap<String, f64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let ttl_days = SourceType::ALL
            .into_iter()
            .map(|source| (source.as_str().to_string(), default_ttl_days(source)))
            .collect();
        Self {
            stale_grace_ratio: 0.5,
            ttl_days,
        }
    }
}

fn default_ttl_days(source_type: SourceType) -> f64 {
    match source_type {
        SourceType::Website => 14.0,
        SourceType::Reviews => 3.0,
        SourceType::Ads => 7.0,
        SourceType::Research => 7.0,
        SourceType::Social => 3.0,
        SourceType::LocalListings => 7.0,
    }
}

impl CacheConfig {
    pub fn policy_for(&self, source_type: SourceType) -> TtlPolicy {
        let days = self
            .ttl_days
            .get(source_type.as_str())
            .copied()
            .filter(|d| d.is_finite() && *d > 0.0 && *d <= MAX_TTL_DAYS)
            .unwrap_or_else(|| default_ttl_days(source_type));
        let ratio = if self.stale_grace_ratio.is_finite() {
            self.stale_grace_ratio.clamp(0.0, MAX_STALE_GRACE_RATIO)
        } else {
            0.0
        };
        let ttl = Duration::try_from_secs_f64(days * SECS_PER_DAY)
            .unwrap_or_else(|_| Duration::from_secs(default_ttl_days(source_type) as u64 * SECS_PER_DAY as u64));
        let grace = Duration::try_from_secs_f64(ttl.as_secs_f64() * ratio).unwrap_or(Duration::ZERO);
        TtlPolicy::new(ttl, grace)
    }
}

/// Public-layer key: one source of one competitor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub source_type: SourceType,
    pub canonical_key: String,
    /// Extra query discriminator (e.g. the competitor URL); empty if none
    pub query: String,
}

/// Tenant-layer key: claims for one brand/competitor from a set of payloads
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClaimsKey {
    pub brand_id: String,
    pub competitor_id: Uuid,
    /// Sorted payload refs of the snapshots the claims came from
    pub payload_refs: Vec<String>,
}

impl ClaimsKey {
    pub fn new(brand_id: impl Into<String>, competitor_id: Uuid, snapshots: &[SourceSnapshot]) -> Self {
        let mut payload_refs: Vec<String> = snapshots
            .iter()
            .filter_map(|s| s.payload_ref.clone())
            .collect();
        payload_refs.sort();
        payload_refs.dedup();
        Self {
            brand_id: brand_id.into(),
            competitor_id,
            payload_refs,
        }
    }
}

/// Claims extracted for one competitor, with any extraction warnings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedClaims {
    pub claims: Vec<Claim>,
    pub warnings: Vec<String>,
    /// True when the heuristic parser produced some or all claims
    pub used_fallback: bool,
}

/// Cache shared by every scan of an engine
#[derive(Clone, Default)]
pub struct CacheLayer {
    snapshots: TtlCache<SnapshotKey, SourceSnapshot>,
    claims: TtlCache<ClaimsKey, ExtractedClaims>,
    config: CacheConfig,
}

impl CacheLayer {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            snapshots: TtlCache::new(),
            claims: TtlCache::new(),
            config,
        }
    }

    pub fn policy_for(&self, source_type: SourceType) -> TtlPolicy {
        self.config.policy_for(source_type)
    }

    /// Get-or-fetch a source snapshot; fetched snapshots are stamped with
    /// the TTL of their source type
    pub async fn snapshot<F, Fut>(&self, key: SnapshotKey, fetch: F) -> Result<SourceSnapshot, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SourceSnapshot, SourceError>> + Send + 'static,
    {
        let policy = self.policy_for(key.source_type);
        self.snapshots
            .get_or_fetch(key, policy, move || {
                let pending = fetch();
                async move { pending.await.map(|snapshot| snapshot.stamped(policy.ttl)) }
            })
            .await
    }

    /// Get-or-extract the claims for a set of snapshots
    ///
    /// The entry lives as long as the shortest-lived contributing source.
    pub async fn claims<F, Fut>(
        &self,
        key: ClaimsKey,
        sources: &[SourceType],
        extract: F,
    ) -> Result<ExtractedClaims, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ExtractedClaims, SourceError>> + Send + 'static,
    {
        let policy = sources
            .iter()
            .map(|s| self.policy_for(*s))
            .min_by_key(|p| p.ttl)
            .unwrap_or_else(|| self.policy_for(SourceType::Reviews));
        self.claims.get_or_fetch(key, policy, extract).await
    }

    pub fn snapshot_stats(&self) -> CacheStatsSnapshot {
        self.snapshots.stats()
    }

    pub fn claim_stats(&self) -> CacheStatsSnapshot {
        self.claims.stats()
    }

    pub fn purge_expired(&self) -> usize {
        self.snapshots.purge_expired() + self.claims.purge_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceQuery;

    #[test]
    fn test_default_ttls() {
        let config = CacheConfig::default();
        let day = Duration::from_secs(86_400);
        assert_eq!(config.policy_for(SourceType::Website).ttl, day * 14);
        assert_eq!(config.policy_for(SourceType::Reviews).ttl, day * 3);
        assert_eq!(config.policy_for(SourceType::Social).stale_grace, day * 3 / 2);
    }

    #[test]
    fn test_invalid_ttl_falls_back_to_default() {
        let mut config = CacheConfig::default();
        config.ttl_days.insert("ads".to_string(), -1.0);
        assert_eq!(config.policy_for(SourceType::Ads).ttl, Duration::from_secs(86_400 * 7));
    }

    #[test]
    fn test_non_finite_settings_do_not_overflow() {
        let mut config = CacheConfig::default();
        config.stale_grace_ratio = f64::NAN;
        config.ttl_days.insert("website".to_string(), 1e300);
        config.ttl_days.insert("reviews".to_string(), f64::INFINITY);
        let website = config.policy_for(SourceType::Website);
        assert_eq!(website.ttl, Duration::from_secs(86_400 * 14));
        assert_eq!(website.stale_grace, Duration::ZERO);
        assert_eq!(config.policy_for(SourceType::Reviews).ttl, Duration::from_secs(86_400 * 3));

        config.stale_grace_ratio = f64::MAX;
        config.ttl_days.insert("social".to_string(), MAX_TTL_DAYS);
        let social = config.policy_for(SourceType::Social);
        assert_eq!(social.stale_grace, social.ttl * MAX_STALE_GRACE_RATIO as u32);
    }

    #[tokio::test]
    async fn test_snapshot_is_stamped_and_cached() {
        let cache = CacheLayer::default();
        let query = SourceQuery {
            source_type: SourceType::Reviews,
            competitor_id: Uuid::new_v4(),
            competitor_name: "Rasa".to_string(),
            canonical_key: "rasa".to_string(),
            url: None,
        };
        let key = SnapshotKey {
            source_type: SourceType::Reviews,
            canonical_key: "rasa".to_string(),
            query: String::new(),
        };

        let q = query.clone();
        let first = cache
            .snapshot(key.clone(), move || async move { Ok(SourceSnapshot::ok(&q, "great bot")) })
            .await
            .unwrap();
        assert_eq!((first.ttl_expires_at - first.fetched_at).num_days(), 3);

        let second = cache
            .snapshot(key, move || async move { Ok(SourceSnapshot::ok(&query, "changed")) })
            .await
            .unwrap();
        assert_eq!(second.payload, "great bot");
        assert_eq!(cache.snapshot_stats().hits, 1);
    }
}
