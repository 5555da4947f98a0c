//! Merged insight persistence, one set per session

use rivalscan_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::{parse_time, parse_uuid, to_json};
use crate::models::MergedInsight;
use crate::utils::retry_on_lock;

struct InsightRow {
    id: String,
    key: String,
    competitor_ids: String,
    source_types: String,
    contributing_claim_ids: String,
    created_at: String,
}

/// Replace the insight set of a session atomically
pub async fn replace_insights(
    pool: &SqlitePool,
    session_id: Uuid,
    brand_id: &str,
    insights: &[MergedInsight],
    max_wait_ms: u64,
) -> Result<()> {
    let session_id = session_id.to_string();
    let encoded = insights
        .iter()
        .map(|i| {
            Ok(InsightRow {
                id: i.id.to_string(),
                key: i.key.clone(),
                competitor_ids: to_json(&i.competitor_ids)?,
                source_types: to_json(&i.source_types)?,
                contributing_claim_ids: to_json(&i.contributing_claim_ids)?,
                created_at: i.created_at.to_rfc3339(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    retry_on_lock("replace_insights", max_wait_ms, || async {
        let mut tx = pool.begin().await.map_err(Error::Database)?;
        sqlx::query("DELETE FROM merged_insights WHERE session_id = ?")
            .bind(&session_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        for (insight, row) in insights.iter().zip(&encoded) {
            sqlx::query(
                r#"
                INSERT INTO merged_insights (
                    id, session_id, brand_id, insight_key, competitor_ids, title,
                    void, demand, angle, confidence, source_types,
                    contributing_claim_ids, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.id)
            .bind(&session_id)
            .bind(brand_id)
            .bind(&row.key)
            .bind(&row.competitor_ids)
            .bind(&insight.title)
            .bind(&insight.void)
            .bind(&insight.demand)
            .bind(&insight.angle)
            .bind(insight.confidence)
            .bind(&row.source_types)
            .bind(&row.contributing_claim_ids)
            .bind(&row.created_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    })
    .await
}

/// Insights of a session ordered by id
pub async fn list_insights(pool: &SqlitePool, session_id: Uuid) -> Result<Vec<MergedInsight>> {
    let rows = sqlx::query(
        r#"
        SELECT id, insight_key, competitor_ids, title, void, demand, angle,
               confidence, source_types, contributing_claim_ids, created_at
        FROM merged_insights
        WHERE session_id = ?
        ORDER BY id
        "#,
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(insight_from_row).collect()
}

fn insight_from_row(row: &SqliteRow) -> Result<MergedInsight> {
    let competitor_ids: String = row.get("competitor_ids");
    let source_types: String = row.get("source_types");
    let contributing: String = row.get("contributing_claim_ids");

    Ok(MergedInsight {
        id: parse_uuid(row.get("id"), "merged_insights.id")?,
        key: row.get("insight_key"),
        competitor_ids: serde_json::from_str(&competitor_ids)?,
        title: row.get("title"),
        void: row.get("void"),
        demand: row.get("demand"),
        angle: row.get("angle"),
        confidence: row.get("confidence"),
        source_types: serde_json::from_str(&source_types)?,
        contributing_claim_ids: serde_json::from_str(&contributing)?,
        created_at: parse_time(row.get("created_at"), "merged_insights.created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{insight_id, SourceType};
    use chrono::Utc;
    use rivalscan_common::db::init_memory_database;

    fn insight(title: &str, confidence: f64) -> MergedInsight {
        let competitor = Uuid::new_v4();
        MergedInsight {
            id: insight_id(&[competitor], title),
            key: title.to_lowercase(),
            competitor_ids: vec![competitor],
            title: title.to_string(),
            void: format!("{} is missing", title),
            demand: Some("buyers ask for it".to_string()),
            angle: None,
            confidence,
            source_types: vec![SourceType::Reviews, SourceType::Website],
            contributing_claim_ids: vec![Uuid::new_v4()],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_replace_overwrites_previous_set() {
        let pool = init_memory_database().await.unwrap();
        let session = Uuid::new_v4();

        replace_insights(&pool, session, "b", &[insight("Offline mode", 0.7), insight("SSO", 0.4)], 1_000)
            .await
            .unwrap();
        let latest = insight("Audit log", 0.8);
        replace_insights(&pool, session, "b", &[latest.clone()], 1_000).await.unwrap();

        let listed = list_insights(&pool, session).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, latest.id);
        assert_eq!(listed[0].demand, latest.demand);
        assert_eq!(listed[0].source_types, latest.source_types);
        assert_eq!(listed[0].contributing_claim_ids, latest.contributing_claim_ids);
    }
}
