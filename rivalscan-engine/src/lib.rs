//! # Rivalscan Engine
//!
//! Competitive intelligence aggregation: discovers a brand's competitors,
//! pulls public sources about each of them, turns what it reads into claims
//! and merges those into confidence-scored gap insights. Successive scans of
//! the same brand are diffed into change alerts.
//!
//! **Architecture:** one `OrchestratorContext` per engine owns the shared
//! cache and event bus; each scan session runs as its own task through
//! DISCOVERING → VALIDATING → SCANNING → EXTRACTING → ANALYZING. Fetching,
//! discovery and extraction are external collaborators behind traits.

pub mod alerts;
pub mod api;
pub mod cache;
pub mod classifier;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod fetchers;
pub mod merger;
pub mod models;
pub mod orchestrator;
pub mod planner;
pub mod resolver;
pub mod utils;

pub use config::EngineConfig;
pub use error::{ApiError, SourceError};
pub use fetchers::Collaborators;
pub use orchestrator::{OrchestratorContext, ScanHandle, ScanOutcome};
