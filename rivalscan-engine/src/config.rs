//! Engine configuration (`rivalscan.toml`)
//!
//! Every section is optional; a missing file means built-in defaults.
//! Environment overrides are applied after the file and before validation.

use rivalscan_common::config::{load_toml, locate_config_file, resolve_root_folder};
use rivalscan_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::alerts::AlertConfig;
use crate::cache::layer::{MAX_STALE_GRACE_RATIO, MAX_TTL_DAYS};
use crate::cache::CacheConfig;
use crate::merger::MergerConfig;
use crate::models::SourceType;
use crate::planner::PlannerConfig;

pub const CONFIG_ENV_VAR: &str = "RIVALSCAN_CONFIG";
pub const ROOT_FOLDER_ENV_VAR: &str = "RIVALSCAN_ROOT_FOLDER";
pub const PORT_ENV_VAR: &str = "RIVALSCAN_PORT";
pub const MAX_CONCURRENT_ENV_VAR: &str = "RIVALSCAN_MAX_CONCURRENT";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5760,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Scan fan-out, timeout and retry settings (`[scan]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub max_concurrent_competitors: usize,
    pub max_competitors: usize,
    pub fetch_timeout_ms: u64,
    pub extraction_timeout_ms: u64,
    /// Retries after the first attempt, for retryable failures only
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub event_capacity: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrent_competitors: 4,
            max_competitors: 10,
            fetch_timeout_ms: 15_000,
            extraction_timeout_ms: 30_000,
            max_retries: 2,
            retry_backoff_ms: 500,
            max_backoff_ms: 8_000,
            event_capacity: 256,
        }
    }
}

impl ScanConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.extraction_timeout_ms)
    }

    /// Backoff before retry number `attempt` (1-based), without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms))
    }
}

/// One URL-template source fetcher (`[sources.<source_type>]`)
///
/// `url_template` may use `{name}`, `{key}` and `{url}` placeholders, which
/// are URL-encoded on substitution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEndpointConfig {
    pub url_template: String,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

fn default_requests_per_second() -> u32 {
    2
}

/// Discovery or extraction endpoint (`[discovery]`, `[extraction]`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub root_folder: Option<String>,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub scan: ScanConfig,
    pub cache: CacheConfig,
    pub merger: MergerConfig,
    pub alerts: AlertConfig,
    pub planner: PlannerConfig,
    pub sources: BTreeMap<String, SourceEndpointConfig>,
    pub discovery: EndpointConfig,
    pub extraction: EndpointConfig,
}

impl EngineConfig {
    /// Locate, parse, override and validate the configuration
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match locate_config_file(cli_path, CONFIG_ENV_VAR)? {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                load_toml::<EngineConfig>(&path)?
            }
            None => {
                info!("No configuration file found, using defaults");
                EngineConfig::default()
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(port) = env_override::<u16>(PORT_ENV_VAR)? {
            self.server.port = port;
        }
        if let Some(max) = env_override::<usize>(MAX_CONCURRENT_ENV_VAR)? {
            self.scan.max_concurrent_competitors = max;
        }
        Ok(())
    }

    /// Reject settings the engine cannot run with, naming the key
    pub fn validate(&self) -> Result<()> {
        let fail = |key: &str, why: &str| Err(Error::Config(format!("{}: {}", key, why)));

        if self.scan.max_concurrent_competitors == 0 {
            return fail("scan.max_concurrent_competitors", "must be at least 1");
        }
        if self.scan.max_competitors == 0 {
            return fail("scan.max_competitors", "must be at least 1");
        }
        if self.scan.fetch_timeout_ms == 0 {
            return fail("scan.fetch_timeout_ms", "must be positive");
        }
        if self.scan.extraction_timeout_ms == 0 {
            return fail("scan.extraction_timeout_ms", "must be positive");
        }
        if !(0.0..=1.0).contains(&self.merger.similarity_threshold) {
            return fail("merger.similarity_threshold", "must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.merger.market_wide_threshold) {
            return fail("merger.market_wide_threshold", "must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.merger.max_confidence) {
            return fail("merger.max_confidence", "must be within [0, 1]");
        }
        if !(self.merger.half_life_days.is_finite() && self.merger.half_life_days > 0.0) {
            return fail("merger.half_life_days", "must be positive");
        }
        if !(self.merger.fresh_window_days.is_finite() && self.merger.fresh_window_days >= 0.0) {
            return fail("merger.fresh_window_days", "must not be negative");
        }
        for (name, weight) in &self.merger.trust_weights {
            if name.parse::<SourceType>().is_err() {
                return fail(&format!("merger.trust_weights.{}", name), "unknown source type");
            }
            if !(0.0..=1.0).contains(weight) {
                return fail(&format!("merger.trust_weights.{}", name), "must be within [0, 1]");
            }
        }
        if !(0.0..=MAX_STALE_GRACE_RATIO).contains(&self.cache.stale_grace_ratio) {
            return fail("cache.stale_grace_ratio", "must be within [0, 10]");
        }
        for (name, days) in &self.cache.ttl_days {
            if name.parse::<SourceType>().is_err() {
                return fail(&format!("cache.ttl_days.{}", name), "unknown source type");
            }
            if !(*days > 0.0 && *days <= MAX_TTL_DAYS) {
                return fail(&format!("cache.ttl_days.{}", name), "must be within (0, 3650]");
            }
        }
        if let Some(key) = self.planner.unknown_keys().first() {
            return fail(&format!("planner.overrides.{}", key), "unknown category");
        }
        for (name, source) in &self.sources {
            if name.parse::<SourceType>().is_err() {
                return fail(&format!("sources.{}", name), "unknown source type");
            }
            if source.requests_per_second == 0 {
                return fail(&format!("sources.{}.requests_per_second", name), "must be at least 1");
            }
            if !source.url_template.starts_with("http://") && !source.url_template.starts_with("https://") {
                return fail(&format!("sources.{}.url_template", name), "must be an http(s) URL");
            }
        }
        Ok(())
    }

    pub fn root_folder(&self, cli_arg: Option<&str>) -> PathBuf {
        resolve_root_folder(cli_arg, ROOT_FOLDER_ENV_VAR, self.root_folder.as_deref())
    }

    /// Source endpoints keyed by parsed source type
    pub fn source_endpoints(&self) -> Vec<(SourceType, &SourceEndpointConfig)> {
        self.sources
            .iter()
            .filter_map(|(name, cfg)| name.parse::<SourceType>().ok().map(|s| (s, cfg)))
            .collect()
    }
}

fn env_override<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{}: cannot parse '{}'", name, raw))),
        Ok(_) => Ok(None),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => {
            warn!("Ignoring {}: {}", name, e);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivalscan_common::config::parse_toml;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scan.max_concurrent_competitors, 4);
        assert_eq!(config.scan.fetch_timeout(), Duration::from_secs(15));
        assert_eq!(config.scan.extraction_timeout(), Duration::from_secs(30));
        assert_eq!(config.scan.max_retries, 2);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: EngineConfig = parse_toml(
            r#"
            [scan]
            max_concurrent_competitors = 8

            [cache.ttl_days]
            reviews = 1

            [merger.trust_weights]
            social = 0.3

            [sources.reviews]
            url_template = "https://reviews.example.com/search?q={name}"
            "#,
        )
        .unwrap();

        assert_eq!(config.scan.max_concurrent_competitors, 8);
        assert_eq!(config.scan.max_competitors, 10);
        assert_eq!(config.cache.ttl_days.get("reviews"), Some(&1.0));
        assert_eq!(config.merger.trust_weight(SourceType::Social), 0.3);
        assert_eq!(config.sources["reviews"].requests_per_second, 2);
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_names_the_key() {
        let mut config = EngineConfig::default();
        config.scan.max_concurrent_competitors = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("scan.max_concurrent_competitors"), "{}", err);

        let mut config = EngineConfig::default();
        config.merger.trust_weights.insert("telegraph".to_string(), 0.5);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("merger.trust_weights.telegraph"), "{}", err);
    }

    #[test]
    fn test_cache_numbers_out_of_range_are_rejected() {
        for (toml, key) in [
            ("[cache]\nstale_grace_ratio = nan", "cache.stale_grace_ratio"),
            ("[cache]\nstale_grace_ratio = -0.5", "cache.stale_grace_ratio"),
            ("[cache.ttl_days]\nwebsite = 1e300", "cache.ttl_days.website"),
            ("[cache.ttl_days]\nads = inf", "cache.ttl_days.ads"),
            ("[cache.ttl_days]\nsocial = 0", "cache.ttl_days.social"),
            ("[merger]\nhalf_life_days = nan", "merger.half_life_days"),
        ] {
            let config: EngineConfig = parse_toml(toml).unwrap();
            let err = config.validate().unwrap_err().to_string();
            assert!(err.contains(key), "{}: {}", toml, err);
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let scan = ScanConfig::default();
        assert_eq!(scan.backoff(1), Duration::from_millis(500));
        assert_eq!(scan.backoff(2), Duration::from_millis(1000));
        assert_eq!(scan.backoff(3), Duration::from_millis(2000));
        assert_eq!(scan.backoff(30), Duration::from_millis(8000));
    }

    #[test]
    #[serial]
    fn test_load_applies_env_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rivalscan.toml");
        fs::write(&path, "[server]\nport = 7000\n").unwrap();

        std::env::set_var(PORT_ENV_VAR, "7100");
        std::env::set_var(MAX_CONCURRENT_ENV_VAR, "2");
        let config = EngineConfig::load(Some(&path));
        std::env::remove_var(PORT_ENV_VAR);
        std::env::remove_var(MAX_CONCURRENT_ENV_VAR);

        let config = config.unwrap();
        assert_eq!(config.server.port, 7100);
        assert_eq!(config.scan.max_concurrent_competitors, 2);
    }

    #[test]
    #[serial]
    fn test_bad_env_override_is_config_error() {
        std::env::set_var(PORT_ENV_VAR, "not-a-port");
        let mut config = EngineConfig::default();
        let result = config.apply_env_overrides();
        std::env::remove_var(PORT_ENV_VAR);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
