//! Alert persistence
//!
//! Alert ids are content-derived, so insert-or-ignore makes replays of the
//! same diff harmless.

use rivalscan_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use super::{parse_enum, parse_time, parse_uuid};
use crate::models::{Alert, AlertType, CrossingDirection};
use crate::utils::retry_on_lock;

/// Insert alerts not yet stored; returns the number inserted
pub async fn insert_alerts(pool: &SqlitePool, alerts: &[Alert], max_wait_ms: u64) -> Result<usize> {
    if alerts.is_empty() {
        return Ok(0);
    }

    retry_on_lock("insert_alerts", max_wait_ms, || async {
        let mut tx = pool.begin().await.map_err(Error::Database)?;
        let mut inserted = 0usize;
        for alert in alerts {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO alerts (
                    id, brand_id, competitor_id, alert_type, direction,
                    insight_id, previous_insight_id, evidence, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(alert.id.to_string())
            .bind(&alert.brand_id)
            .bind(alert.competitor_id.to_string())
            .bind(alert.alert_type.as_str())
            .bind(alert.direction.map(|d| d.as_str()))
            .bind(alert.insight_id.to_string())
            .bind(alert.previous_insight_id.map(|id| id.to_string()))
            .bind(&alert.evidence)
            .bind(alert.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await.map_err(Error::Database)?;
        Ok(inserted)
    })
    .await
}

/// Newest alerts of a brand first
pub async fn list_alerts(pool: &SqlitePool, brand_id: &str, limit: u32) -> Result<Vec<Alert>> {
    let rows = sqlx::query(
        r#"
        SELECT id, brand_id, competitor_id, alert_type, direction,
               insight_id, previous_insight_id, evidence, created_at
        FROM alerts
        WHERE brand_id = ?
        ORDER BY created_at DESC, id
        LIMIT ?
        "#,
    )
    .bind(brand_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.iter().map(alert_from_row).collect()
}

fn alert_from_row(row: &SqliteRow) -> Result<Alert> {
    let direction: Option<String> = row.get("direction");
    let previous: Option<String> = row.get("previous_insight_id");

    Ok(Alert {
        id: parse_uuid(row.get("id"), "alerts.id")?,
        brand_id: row.get("brand_id"),
        competitor_id: parse_uuid(row.get("competitor_id"), "alerts.competitor_id")?,
        alert_type: parse_enum::<AlertType>(row.get("alert_type"), "alerts.alert_type")?,
        direction: direction
            .as_deref()
            .map(|d| parse_enum::<CrossingDirection>(d, "alerts.direction"))
            .transpose()?,
        insight_id: parse_uuid(row.get("insight_id"), "alerts.insight_id")?,
        previous_insight_id: previous
            .as_deref()
            .map(|id| parse_uuid(id, "alerts.previous_insight_id"))
            .transpose()?,
        evidence: row.get("evidence"),
        created_at: parse_time(row.get("created_at"), "alerts.created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::alert_id;
    use chrono::Utc;
    use rivalscan_common::db::init_memory_database;
    use uuid::Uuid;

    fn alert(brand: &str) -> Alert {
        let competitor_id = Uuid::new_v4();
        let insight_id = Uuid::new_v4();
        let previous = Uuid::new_v4();
        Alert {
            id: alert_id(competitor_id, AlertType::ConfidenceCrossedThreshold, insight_id, Some(previous)),
            brand_id: brand.to_string(),
            competitor_id,
            alert_type: AlertType::ConfidenceCrossedThreshold,
            direction: Some(CrossingDirection::Down),
            insight_id,
            previous_insight_id: Some(previous),
            evidence: "0.65 -> 0.55".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_replayed_alerts_are_ignored() {
        let pool = init_memory_database().await.unwrap();
        let alerts = vec![alert("b"), alert("b")];

        assert_eq!(insert_alerts(&pool, &alerts, 1_000).await.unwrap(), 2);
        assert_eq!(insert_alerts(&pool, &alerts, 1_000).await.unwrap(), 0);

        let listed = list_alerts(&pool, "b", 50).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|a| a.direction == Some(CrossingDirection::Down)));
        assert!(list_alerts(&pool, "other", 50).await.unwrap().is_empty());
    }
}
