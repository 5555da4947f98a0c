//! Competitor persistence
//!
//! Competitors are never deleted; retirement is a flag. Once set it
//! survives upserts, so a scan that loaded the competitor earlier cannot
//! bring it back.

use rivalscan_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::{parse_enum, parse_time, parse_uuid, to_json};
use crate::models::{Category, Competitor};
use crate::utils::retry_on_lock;

/// Insert or update by id; the (brand, canonical key) pair stays unique
pub async fn upsert_competitor(pool: &SqlitePool, competitor: &Competitor, max_wait_ms: u64) -> Result<()> {
    let id = competitor.id.to_string();
    let aliases = to_json(&competitor.aliases)?;
    let category = competitor.category.map(|c| c.as_str());
    let last_scanned_at = competitor.last_scanned_at.map(|t| t.to_rfc3339());
    let created_at = competitor.created_at.to_rfc3339();

    retry_on_lock("upsert_competitor", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO competitors (
                id, brand_id, canonical_key, display_name, aliases,
                category, confidence, retired, last_scanned_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                aliases = excluded.aliases,
                category = excluded.category,
                confidence = excluded.confidence,
                retired = MAX(competitors.retired, excluded.retired),
                last_scanned_at = COALESCE(excluded.last_scanned_at, competitors.last_scanned_at)
            "#,
        )
        .bind(&id)
        .bind(&competitor.brand_id)
        .bind(&competitor.canonical_key)
        .bind(&competitor.display_name)
        .bind(&aliases)
        .bind(category)
        .bind(competitor.confidence)
        .bind(competitor.retired)
        .bind(&last_scanned_at)
        .bind(&created_at)
        .execute(pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    })
    .await
}

/// Mark a competitor of the brand as retired; false if it is unknown
pub async fn retire_competitor(pool: &SqlitePool, brand_id: &str, competitor_id: Uuid, max_wait_ms: u64) -> Result<bool> {
    let id = competitor_id.to_string();
    retry_on_lock("retire_competitor", max_wait_ms, || async {
        let result = sqlx::query("UPDATE competitors SET retired = 1 WHERE id = ? AND brand_id = ?")
            .bind(&id)
            .bind(brand_id)
            .execute(pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    })
    .await
}

/// Every competitor of a brand, retired included, ordered by canonical key
pub async fn list_competitors(pool: &SqlitePool, brand_id: &str) -> Result<Vec<Competitor>> {
    let rows = sqlx::query(
        r#"
        SELECT id, brand_id, canonical_key, display_name, aliases,
               category, confidence, retired, last_scanned_at, created_at
        FROM competitors
        WHERE brand_id = ?
        ORDER BY canonical_key
        "#,
    )
    .bind(brand_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(competitor_from_row).collect()
}

fn competitor_from_row(row: &SqliteRow) -> Result<Competitor> {
    let aliases: String = row.get("aliases");
    let aliases: BTreeSet<String> = serde_json::from_str(&aliases)?;
    let category: Option<String> = row.get("category");
    let last_scanned_at: Option<String> = row.get("last_scanned_at");

    Ok(Competitor {
        id: parse_uuid(row.get("id"), "competitors.id")?,
        brand_id: row.get("brand_id"),
        canonical_key: row.get("canonical_key"),
        display_name: row.get("display_name"),
        aliases,
        category: category
            .as_deref()
            .map(|c| parse_enum::<Category>(c, "competitors.category"))
            .transpose()?,
        confidence: row.get("confidence"),
        retired: row.get("retired"),
        last_scanned_at: last_scanned_at
            .as_deref()
            .map(|t| parse_time(t, "competitors.last_scanned_at"))
            .transpose()?,
        created_at: parse_time(row.get("created_at"), "competitors.created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rivalscan_common::db::init_memory_database;

    #[tokio::test]
    async fn test_upsert_and_list() {
        let pool = init_memory_database().await.unwrap();
        let mut rasa = Competitor::new("brand-1", "rasa", "Rasa", 0.6);
        rasa.category = Some(Category::NationalSaasB2b);
        upsert_competitor(&pool, &rasa, 1_000).await.unwrap();

        rasa.absorb("RASA AI", 0.9);
        rasa.last_scanned_at = Some(Utc::now());
        upsert_competitor(&pool, &rasa, 1_000).await.unwrap();

        let other_brand = Competitor::new("brand-2", "rasa", "Rasa", 0.5);
        upsert_competitor(&pool, &other_brand, 1_000).await.unwrap();

        let listed = list_competitors(&pool, "brand-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, rasa.id);
        assert_eq!(listed[0].display_name, "RASA AI");
        assert!(listed[0].aliases.contains("RASA AI"));
        assert_eq!(listed[0].category, Some(Category::NationalSaasB2b));
        assert!(listed[0].last_scanned_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let pool = init_memory_database().await.unwrap();
        upsert_competitor(&pool, &Competitor::new("b", "rasa", "Rasa", 0.5), 1_000)
            .await
            .unwrap();

        // Same brand and key under a different id violates uniqueness
        let result = upsert_competitor(&pool, &Competitor::new("b", "rasa", "Rasa Inc", 0.5), 1_000).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_retirement_survives_later_upserts() {
        let pool = init_memory_database().await.unwrap();
        let rasa = Competitor::new("b", "rasa", "Rasa", 0.5);
        upsert_competitor(&pool, &rasa, 1_000).await.unwrap();

        assert!(retire_competitor(&pool, "b", rasa.id, 1_000).await.unwrap());
        assert!(!retire_competitor(&pool, "other", rasa.id, 1_000).await.unwrap());
        assert!(!retire_competitor(&pool, "b", Uuid::new_v4(), 1_000).await.unwrap());

        // A scan that loaded the competitor before retirement writes it back
        upsert_competitor(&pool, &rasa, 1_000).await.unwrap();
        let listed = list_competitors(&pool, "b").await.unwrap();
        assert!(listed[0].retired);
    }
}
