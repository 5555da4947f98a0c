//! Source planning: which sources to pull for a category, in what order

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{Category, SourceType};

/// Latency class of a source; fast sources are launched and surfaced first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Fast,
    Medium,
    Slow,
}

/// One entry of a source plan
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlannedSource {
    pub source_type: SourceType,
    pub bucket: Bucket,
    pub weight: f64,
}

impl PlannedSource {
    pub const fn new(source_type: SourceType, bucket: Bucket, weight: f64) -> Self {
        Self {
            source_type,
            bucket,
            weight,
        }
    }
}

/// Per-category overrides of the built-in plan table (`[planner.overrides]`)
///
/// Keys are category names such as `national_saas_b2b`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub overrides: HashMap<String, Vec<PlannedSource>>,
}

impl PlannerConfig {
    /// Override keys that do not name a category
    pub fn unknown_keys(&self) -> Vec<String> {
        self.overrides
            .keys()
            .filter(|k| k.parse::<Category>().is_err())
            .cloned()
            .collect()
    }
}

use Bucket::{Fast, Medium, Slow};
use SourceType::{Ads, LocalListings, Research, Reviews, Social, Website};

fn default_plan(category: Category) -> Vec<PlannedSource> {
    let table: &[(SourceType, Bucket, f64)] = match category {
        Category::LocalServiceB2b => &[
            (LocalListings, Fast, 1.0),
            (Reviews, Fast, 0.9),
            (Website, Medium, 0.8),
            (Ads, Medium, 0.5),
            (Social, Slow, 0.3),
        ],
        Category::LocalServiceB2c => &[
            (Reviews, Fast, 1.0),
            (LocalListings, Fast, 0.95),
            (Social, Medium, 0.7),
            (Website, Medium, 0.6),
            (Ads, Slow, 0.5),
        ],
        Category::RegionalAgencyB2b => &[
            (Website, Fast, 1.0),
            (Reviews, Medium, 0.7),
            (Social, Medium, 0.6),
            (Ads, Medium, 0.5),
            (Research, Slow, 0.6),
        ],
        Category::RegionalRetailB2c => &[
            (Reviews, Fast, 0.9),
            (LocalListings, Fast, 0.8),
            (Social, Medium, 0.8),
            (Ads, Medium, 0.7),
            (Website, Medium, 0.6),
        ],
        Category::NationalSaasB2b => &[
            (Website, Fast, 1.0),
            (Reviews, Medium, 0.9),
            (Ads, Medium, 0.6),
            (Research, Slow, 0.8),
            (Social, Slow, 0.4),
        ],
        Category::NationalProductB2c => &[
            (Reviews, Fast, 1.0),
            (Social, Fast, 0.9),
            (Ads, Medium, 0.8),
            (Website, Medium, 0.7),
            (Research, Slow, 0.5),
        ],
    };

    table
        .iter()
        .map(|&(source_type, bucket, weight)| PlannedSource::new(source_type, bucket, weight))
        .collect()
}

/// Maps categories to ordered source plans
#[derive(Debug, Clone, Default)]
pub struct SourcePlanner {
    config: PlannerConfig,
}

impl SourcePlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Ordered plan: bucket (fast first), then weight descending, then
    /// source type. A source type appears at most once.
    pub fn plan(&self, category: Category) -> Vec<PlannedSource> {
        let mut plan = self
            .config
            .overrides
            .get(category.as_str())
            .filter(|entries| !entries.is_empty())
            .cloned()
            .unwrap_or_else(|| default_plan(category));

        plan.retain(|p| p.weight.is_finite() && p.weight > 0.0);
        plan.sort_by(|a, b| {
            a.bucket
                .cmp(&b.bucket)
                .then(b.weight.total_cmp(&a.weight))
                .then(a.source_type.cmp(&b.source_type))
        });

        let mut seen = Vec::with_capacity(plan.len());
        plan.retain(|p| {
            if seen.contains(&p.source_type) {
                false
            } else {
                seen.push(p.source_type);
                true
            }
        });
        plan
    }
}
