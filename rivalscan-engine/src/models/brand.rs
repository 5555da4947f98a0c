//! Brand profile and business-segment categories

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of business-segment categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    LocalServiceB2b,
    LocalServiceB2c,
    RegionalAgencyB2b,
    RegionalRetailB2c,
    NationalSaasB2b,
    NationalProductB2c,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::LocalServiceB2b,
        Category::LocalServiceB2c,
        Category::RegionalAgencyB2b,
        Category::RegionalRetailB2c,
        Category::NationalSaasB2b,
        Category::NationalProductB2c,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::LocalServiceB2b => "local_service_b2b",
            Category::LocalServiceB2c => "local_service_b2c",
            Category::RegionalAgencyB2b => "regional_agency_b2b",
            Category::RegionalRetailB2c => "regional_retail_b2c",
            Category::NationalSaasB2b => "national_saas_b2b",
            Category::NationalProductB2c => "national_product_b2c",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}

/// Signals describing a brand, input to classification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrandSignals {
    /// Free-text description of the business
    pub description: String,
    pub keywords: Vec<String>,
    /// Number of physical locations, if known
    pub location_count: Option<u32>,
    /// Service radius in kilometres, if the business serves an area
    pub service_radius_km: Option<f64>,
    /// Declared audience hints such as "b2b", "consumers", "enterprise"
    pub audience_hints: Vec<String>,
}

/// The brand a scan is run for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandProfile {
    pub brand_id: String,
    pub name: String,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub signals: BrandSignals,
    /// Competitor names supplied by the caller, unioned with discovery
    #[serde(default)]
    pub seed_competitors: Vec<String>,
}

impl BrandProfile {
    pub fn new(brand_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            brand_id: brand_id.into(),
            name: name.into(),
            website: None,
            signals: BrandSignals::default(),
            seed_competitors: Vec::new(),
        }
    }

    pub fn with_signals(mut self, signals: BrandSignals) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_seeds<I, S>(mut self, seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seed_competitors = seeds.into_iter().map(Into::into).collect();
        self
    }
}
