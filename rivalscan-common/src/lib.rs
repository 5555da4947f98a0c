//! # Rivalscan Common Library
//!
//! Shared code for the rivalscan services:
//! - Error type
//! - Scan event types and the broadcast EventBus
//! - Configuration file discovery and root folder resolution
//! - SQLite pool and schema initialization
//! - SSE helpers

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
