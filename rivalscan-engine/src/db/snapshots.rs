//! Source snapshot metadata
//!
//! Only metadata and the payload's content address are stored; payload
//! bodies live in the cache.

use rivalscan_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_enum, parse_time, parse_uuid};
use crate::models::{SourceSnapshot, SourceStatus, SourceType};
use crate::utils::retry_on_lock;

/// Record the snapshots a session used; rewriting the same key is a no-op
/// since snapshots are immutable
pub async fn record_snapshots(
    pool: &SqlitePool,
    session_id: Uuid,
    snapshots: &[SourceSnapshot],
    max_wait_ms: u64,
) -> Result<()> {
    if snapshots.is_empty() {
        return Ok(());
    }
    let session_id = session_id.to_string();

    retry_on_lock("record_snapshots", max_wait_ms, || async {
        let mut tx = pool.begin().await.map_err(Error::Database)?;
        for snapshot in snapshots {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO source_snapshots (
                    session_id, competitor_id, source_type, fetched_at,
                    ttl_expires_at, payload_ref, status
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&session_id)
            .bind(snapshot.competitor_id.to_string())
            .bind(snapshot.source_type.as_str())
            .bind(snapshot.fetched_at.to_rfc3339())
            .bind(snapshot.ttl_expires_at.to_rfc3339())
            .bind(&snapshot.payload_ref)
            .bind(snapshot.status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    })
    .await
}

/// Snapshot metadata of a session; payloads come back empty
pub async fn list_snapshots(pool: &SqlitePool, session_id: Uuid) -> Result<Vec<SourceSnapshot>> {
    let rows = sqlx::query(
        r#"
        SELECT competitor_id, source_type, fetched_at, ttl_expires_at, payload_ref, status
        FROM source_snapshots
        WHERE session_id = ?
        ORDER BY competitor_id, source_type
        "#,
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(SourceSnapshot {
                source_type: parse_enum::<SourceType>(row.get("source_type"), "source_snapshots.source_type")?,
                competitor_id: parse_uuid(row.get("competitor_id"), "source_snapshots.competitor_id")?,
                fetched_at: parse_time(row.get("fetched_at"), "source_snapshots.fetched_at")?,
                ttl_expires_at: parse_time(row.get("ttl_expires_at"), "source_snapshots.ttl_expires_at")?,
                payload_ref: row.get("payload_ref"),
                status: parse_enum::<SourceStatus>(row.get("status"), "source_snapshots.status")?,
                url: None,
                payload: String::new(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceQuery;
    use rivalscan_common::db::init_memory_database;
    use std::time::Duration;

    #[tokio::test]
    async fn test_record_is_insert_once() {
        let pool = init_memory_database().await.unwrap();
        let session_id = Uuid::new_v4();
        let query = SourceQuery {
            source_type: SourceType::Reviews,
            competitor_id: Uuid::new_v4(),
            competitor_name: "Rasa".to_string(),
            canonical_key: "rasa".to_string(),
            url: None,
        };
        let ok = SourceSnapshot::ok(&query, "four stars").stamped(Duration::from_secs(3600));
        let timeout = SourceSnapshot::failed(
            &SourceQuery {
                source_type: SourceType::Ads,
                ..query.clone()
            },
            SourceStatus::Timeout,
        );

        record_snapshots(&pool, session_id, &[ok.clone(), timeout], 1_000).await.unwrap();
        record_snapshots(&pool, session_id, &[ok.clone()], 1_000).await.unwrap();

        let listed = list_snapshots(&pool, session_id).await.unwrap();
        assert_eq!(listed.len(), 2);
        let reviews = listed.iter().find(|s| s.source_type == SourceType::Reviews).unwrap();
        assert_eq!(reviews.payload_ref, ok.payload_ref);
        assert!(reviews.payload.is_empty());
        let ads = listed.iter().find(|s| s.source_type == SourceType::Ads).unwrap();
        assert_eq!(ads.status, SourceStatus::Timeout);
        assert!(ads.payload_ref.is_none());
    }
}
