//! External collaborator seams
//!
//! The engine never scrapes or prompts by itself; it drives these traits.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::SourceError;
use crate::extraction::ParseResult;
use crate::models::{BrandProfile, Category, Competitor, DiscoveredCompetitor, SourceQuery, SourceSnapshot, SourceType};

/// Fetches one source type
///
/// Implementations must respect `timeout` and must not retry; the
/// orchestrator owns retry policy.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn source_type(&self) -> SourceType;

    async fn fetch(&self, query: &SourceQuery, timeout: Duration) -> Result<SourceSnapshot, SourceError>;
}

/// Proposes competitors for a brand
#[async_trait]
pub trait CompetitorDiscoverer: Send + Sync {
    async fn discover(
        &self,
        brand: &BrandProfile,
        category: Category,
    ) -> Result<Vec<DiscoveredCompetitor>, SourceError>;
}

/// Turns snapshots of one competitor into claims
#[async_trait]
pub trait ClaimExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(
        &self,
        competitor: &Competitor,
        snapshots: &[SourceSnapshot],
        brand: &BrandProfile,
    ) -> ParseResult;
}

/// Discoverer that returns a fixed list
///
/// Used when no discovery endpoint is configured; caller seeds still apply.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscoverer {
    competitors: Vec<DiscoveredCompetitor>,
}

impl StaticDiscoverer {
    pub fn new(competitors: Vec<DiscoveredCompetitor>) -> Self {
        Self { competitors }
    }
}

#[async_trait]
impl CompetitorDiscoverer for StaticDiscoverer {
    async fn discover(
        &self,
        _brand: &BrandProfile,
        _category: Category,
    ) -> Result<Vec<DiscoveredCompetitor>, SourceError> {
        Ok(self.competitors.clone())
    }
}
