//! HTTP implementations of the collaborator traits
//!
//! These clients only move bytes: fetchers never retry (the orchestrator
//! owns retry policy) and the extraction client hands the response body to
//! the structured-output parser untouched.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, warn};

use crate::collaborators::{ClaimExtractor, CompetitorDiscoverer, SourceFetcher};
use crate::config::SourceEndpointConfig;
use crate::error::SourceError;
use crate::extraction::{parse_structured_output, ClaimContext, ParseResult};
use crate::models::{BrandProfile, Category, Competitor, DiscoveredCompetitor, SourceQuery, SourceSnapshot, SourceType};

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

fn user_agent() -> String {
    format!("rivalscan/{}", env!("CARGO_PKG_VERSION"))
}

pub(crate) fn build_client(timeout: Option<Duration>) -> reqwest::Result<Client> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .user_agent(user_agent());
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Map a transport error onto the source failure taxonomy
fn transport_error(source_type: SourceType, timeout: Duration, err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::SourceTimeout {
            source_type,
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        SourceError::SourceUnavailable {
            source_type,
            message: err.to_string(),
        }
    }
}

/// Map a non-success status: throttling and server errors are retryable,
/// other rejections are not
fn status_error(source_type: SourceType, status: StatusCode) -> SourceError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SourceError::SourceUnavailable {
            source_type,
            message: format!("upstream returned {}", status),
        }
    } else {
        SourceError::SourceMalformed {
            source_type,
            message: format!("upstream rejected query with {}", status),
        }
    }
}

/// Source fetcher driven by a URL template (`[sources.<source_type>]`)
pub struct HttpSourceFetcher {
    source_type: SourceType,
    client: Client,
    url_template: String,
    rate_limiter: DirectRateLimiter,
}

impl HttpSourceFetcher {
    pub fn new(source_type: SourceType, config: &SourceEndpointConfig) -> reqwest::Result<Self> {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            source_type,
            client: build_client(None)?,
            url_template: config.url_template.clone(),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    /// Substitute `{name}`, `{key}` and `{url}` in the template
    pub fn render_url(&self, query: &SourceQuery) -> String {
        self.url_template
            .replace("{name}", &encode(&query.competitor_name))
            .replace("{key}", &encode(&query.canonical_key))
            .replace("{url}", &encode(query.url.as_deref().unwrap_or_default()))
    }

    async fn fetch_inner(&self, query: &SourceQuery, timeout: Duration) -> Result<SourceSnapshot, SourceError> {
        self.rate_limiter.until_ready().await;

        let url = self.render_url(query);
        debug!(source = %self.source_type, url = %url, "Fetching source");

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(self.source_type, timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(self.source_type, status));
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("json"));
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(self.source_type, timeout, e))?;

        if body.trim().is_empty() {
            return Err(SourceError::SourceMalformed {
                source_type: self.source_type,
                message: "empty response body".to_string(),
            });
        }

        // A JSON source that does not parse still carries text for the fallback parser
        if is_json && serde_json::from_str::<serde_json::Value>(&body).is_err() {
            warn!(source = %self.source_type, url = %url, "Source returned unparseable JSON");
            return Ok(SourceSnapshot::malformed(query, body).with_url(url));
        }

        Ok(SourceSnapshot::ok(query, body).with_url(url))
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    fn source_type(&self) -> SourceType {
        self.source_type
    }

    async fn fetch(&self, query: &SourceQuery, timeout: Duration) -> Result<SourceSnapshot, SourceError> {
        // The budget covers waiting for a rate-limit permit as well
        match tokio::time::timeout(timeout, self.fetch_inner(query, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::SourceTimeout {
                source_type: self.source_type,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DiscoveryResponse {
    List(Vec<DiscoveredCompetitor>),
    Wrapped { competitors: Vec<DiscoveredCompetitor> },
}

/// Discoverer backed by a JSON endpoint (`[discovery] endpoint`)
pub struct HttpDiscoverer {
    client: Client,
    endpoint: String,
}

impl HttpDiscoverer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: build_client(Some(timeout))?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl CompetitorDiscoverer for HttpDiscoverer {
    async fn discover(
        &self,
        brand: &BrandProfile,
        category: Category,
    ) -> Result<Vec<DiscoveredCompetitor>, SourceError> {
        // Discovery reads the web at large; failures are reported against the website source
        let source_type = SourceType::Website;
        let body = json!({
            "brand_id": brand.brand_id,
            "name": brand.name,
            "website": brand.website,
            "category": category,
            "signals": brand.signals,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(source_type, Duration::ZERO, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(source_type, status));
        }

        let parsed: DiscoveryResponse = response.json().await.map_err(|e| SourceError::SourceMalformed {
            source_type,
            message: format!("discovery response: {}", e),
        })?;

        Ok(match parsed {
            DiscoveryResponse::List(list) => list,
            DiscoveryResponse::Wrapped { competitors } => competitors,
        })
    }
}

/// Extraction collaborator reached over HTTP (`[extraction] endpoint`)
///
/// The response body is expected to hold gap objects; whatever comes back
/// goes through the structured-output parser.
pub struct HttpClaimExtractor {
    client: Client,
    endpoint: String,
}

impl HttpClaimExtractor {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: build_client(Some(timeout))?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl ClaimExtractor for HttpClaimExtractor {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn extract(&self, competitor: &Competitor, snapshots: &[SourceSnapshot], brand: &BrandProfile) -> ParseResult {
        let sources: Vec<_> = snapshots
            .iter()
            .filter(|s| s.has_payload())
            .map(|s| {
                json!({
                    "source_type": s.source_type,
                    "url": s.url,
                    "status": s.status,
                    "payload": s.payload,
                })
            })
            .collect();

        let body = json!({
            "brand": { "id": brand.brand_id, "name": brand.name, "website": brand.website },
            "competitor": {
                "id": competitor.id,
                "name": competitor.display_name,
                "key": competitor.canonical_key,
            },
            "snapshots": sources,
        });

        let response = match self.client.post(&self.endpoint).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                return ParseResult::Failed {
                    reason: format!("extraction request failed: {}", e),
                }
            }
        };
        if !response.status().is_success() {
            return ParseResult::Failed {
                reason: format!("extraction endpoint returned {}", response.status()),
            };
        }

        match response.text().await {
            Ok(text) => parse_structured_output(&text, &ClaimContext::new(competitor.id, snapshots)),
            Err(e) => ParseResult::Failed {
                reason: format!("extraction response unreadable: {}", e),
            },
        }
    }
}
