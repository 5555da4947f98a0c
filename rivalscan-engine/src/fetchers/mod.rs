//! Built-in collaborators and their construction from configuration

pub mod http;

pub use http::{HttpClaimExtractor, HttpDiscoverer, HttpSourceFetcher};

use rivalscan_common::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::collaborators::{ClaimExtractor, CompetitorDiscoverer, SourceFetcher, StaticDiscoverer};
use crate::config::EngineConfig;
use crate::extraction::HeuristicExtractor;
use crate::models::SourceType;

/// Fetchers by source type; a planned source without a fetcher is reported
/// unavailable
pub type FetcherRegistry = HashMap<SourceType, Arc<dyn SourceFetcher>>;

/// Collaborators an engine is wired with
#[derive(Clone)]
pub struct Collaborators {
    pub fetchers: FetcherRegistry,
    pub discoverer: Arc<dyn CompetitorDiscoverer>,
    pub extractor: Arc<dyn ClaimExtractor>,
}

impl Collaborators {
    /// Configured HTTP collaborators, falling back to seed-only discovery and
    /// the heuristic extractor when no endpoint is set
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let client_error = |what: &str, e: reqwest::Error| Error::Internal(format!("{} client: {}", what, e));

        let mut fetchers: FetcherRegistry = HashMap::new();
        for (source_type, endpoint) in config.source_endpoints() {
            let fetcher = HttpSourceFetcher::new(source_type, endpoint).map_err(|e| client_error(source_type.as_str(), e))?;
            fetchers.insert(source_type, Arc::new(fetcher));
        }
        info!("Configured {} source fetcher(s)", fetchers.len());

        let discoverer: Arc<dyn CompetitorDiscoverer> = match &config.discovery.endpoint {
            Some(endpoint) => Arc::new(
                HttpDiscoverer::new(endpoint.clone(), config.scan.fetch_timeout())
                    .map_err(|e| client_error("discovery", e))?,
            ),
            None => {
                info!("No discovery endpoint configured, scans use caller seeds only");
                Arc::new(StaticDiscoverer::default())
            }
        };

        let extractor: Arc<dyn ClaimExtractor> = match &config.extraction.endpoint {
            Some(endpoint) => Arc::new(
                HttpClaimExtractor::new(endpoint.clone(), config.scan.extraction_timeout())
                    .map_err(|e| client_error("extraction", e))?,
            ),
            None => {
                info!("No extraction endpoint configured, using heuristic extractor");
                Arc::new(HeuristicExtractor::default())
            }
        };

        Ok(Self {
            fetchers,
            discoverer,
            extractor,
        })
    }
}
