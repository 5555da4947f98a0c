//! Database initialization
//!
//! Creates the database file on first run and applies the schema. All table
//! creation is idempotent so it runs on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the on-disk database and apply the schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers with one writer
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database with the schema applied
///
/// Limited to a single connection that is never recycled: every SQLite
/// memory connection is its own database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Apply all table definitions
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_competitors_table(pool).await?;
    create_scan_sessions_table(pool).await?;
    create_source_snapshots_table(pool).await?;
    create_merged_insights_table(pool).await?;
    create_alerts_table(pool).await?;
    Ok(())
}

async fn create_competitors_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS competitors (
            id TEXT PRIMARY KEY,
            brand_id TEXT NOT NULL,
            canonical_key TEXT NOT NULL,
            display_name TEXT NOT NULL,
            aliases TEXT NOT NULL DEFAULT '[]',
            category TEXT,
            confidence REAL NOT NULL DEFAULT 0.0,
            retired INTEGER NOT NULL DEFAULT 0,
            last_scanned_at TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (brand_id, canonical_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_scan_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_sessions (
            id TEXT PRIMARY KEY,
            brand_id TEXT NOT NULL,
            phase TEXT NOT NULL,
            category TEXT,
            competitor_ids TEXT NOT NULL DEFAULT '[]',
            warnings TEXT NOT NULL DEFAULT '[]',
            started_at TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_scan_sessions_brand ON scan_sessions (brand_id, started_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_source_snapshots_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_snapshots (
            session_id TEXT NOT NULL,
            competitor_id TEXT NOT NULL,
            source_type TEXT NOT NULL,
            fetched_at TEXT NOT NULL,
            ttl_expires_at TEXT NOT NULL,
            payload_ref TEXT,
            status TEXT NOT NULL,
            PRIMARY KEY (session_id, competitor_id, source_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_merged_insights_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS merged_insights (
            id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            brand_id TEXT NOT NULL,
            insight_key TEXT NOT NULL,
            competitor_ids TEXT NOT NULL,
            title TEXT NOT NULL,
            void TEXT NOT NULL,
            demand TEXT,
            angle TEXT,
            confidence REAL NOT NULL,
            source_types TEXT NOT NULL,
            contributing_claim_ids TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (session_id, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_alerts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            brand_id TEXT NOT NULL,
            competitor_id TEXT NOT NULL,
            alert_type TEXT NOT NULL,
            direction TEXT,
            insight_id TEXT NOT NULL,
            previous_insight_id TEXT,
            evidence TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
