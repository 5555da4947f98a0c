//! Scan session persistence

use rivalscan_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::{parse_enum, parse_time, parse_uuid, to_json};
use crate::models::{Category, ScanPhase, ScanSession};
use crate::utils::retry_on_lock;

const SELECT_SESSION: &str = r#"
    SELECT id, brand_id, phase, category, competitor_ids, warnings, started_at, completed_at
    FROM scan_sessions
"#;

pub async fn save_session(pool: &SqlitePool, session: &ScanSession, max_wait_ms: u64) -> Result<()> {
    let id = session.id.to_string();
    let category = session.category.map(|c| c.as_str());
    let competitor_ids = to_json(&session.competitor_ids)?;
    let warnings = to_json(&session.warnings)?;
    let started_at = session.started_at.to_rfc3339();
    let completed_at = session.completed_at.map(|t| t.to_rfc3339());

    retry_on_lock("save_session", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO scan_sessions (
                id, brand_id, phase, category, competitor_ids, warnings, started_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                phase = excluded.phase,
                category = excluded.category,
                competitor_ids = excluded.competitor_ids,
                warnings = excluded.warnings,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(&id)
        .bind(&session.brand_id)
        .bind(session.phase.as_str())
        .bind(category)
        .bind(&competitor_ids)
        .bind(&warnings)
        .bind(&started_at)
        .bind(&completed_at)
        .execute(pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    })
    .await
}

pub async fn load_session(pool: &SqlitePool, session_id: Uuid) -> Result<Option<ScanSession>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_SESSION))
        .bind(session_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(session_from_row).transpose()
}

/// Most recent session of a brand that ended `complete` or `partial_failure`
pub async fn latest_completed_session(pool: &SqlitePool, brand_id: &str) -> Result<Option<ScanSession>> {
    let row = sqlx::query(&format!(
        "{} WHERE brand_id = ? AND phase IN ('complete', 'partial_failure') \
         ORDER BY completed_at DESC, started_at DESC LIMIT 1",
        SELECT_SESSION
    ))
    .bind(brand_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(session_from_row).transpose()
}

fn session_from_row(row: &SqliteRow) -> Result<ScanSession> {
    let category: Option<String> = row.get("category");
    let competitor_ids: String = row.get("competitor_ids");
    let warnings: String = row.get("warnings");
    let completed_at: Option<String> = row.get("completed_at");

    Ok(ScanSession {
        id: parse_uuid(row.get("id"), "scan_sessions.id")?,
        brand_id: row.get("brand_id"),
        phase: parse_enum::<ScanPhase>(row.get("phase"), "scan_sessions.phase")?,
        category: category
            .as_deref()
            .map(|c| parse_enum::<Category>(c, "scan_sessions.category"))
            .transpose()?,
        competitor_ids: serde_json::from_str(&competitor_ids)?,
        warnings: serde_json::from_str(&warnings)?,
        started_at: parse_time(row.get("started_at"), "scan_sessions.started_at")?,
        completed_at: completed_at
            .as_deref()
            .map(|t| parse_time(t, "scan_sessions.completed_at"))
            .transpose()?,
    })
}
