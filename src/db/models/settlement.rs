//! Teacher payout settlements.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::now_rfc3339;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Settlement {
    pub id: String,
    pub teacher_id: String,
    pub period_start: String,
    pub period_end: String,
    pub classes_count: i64,
    pub credits_delivered: f64,
    pub rate_per_credit: f64,
    pub total_amount: f64,
    pub currency: String,
    pub status: String,
    pub paid_at: Option<String>,
    pub created_at: String,
}

impl Settlement {
    pub async fn find(db: &SqlitePool, id: &str) -> Result<Option<Settlement>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM settlements WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn list(db: &SqlitePool, teacher_id: Option<&str>) -> Result<Vec<Settlement>, sqlx::Error> {
        match teacher_id {
            Some(teacher_id) => {
                sqlx::query_as(
                    "SELECT * FROM settlements WHERE teacher_id = ? ORDER BY period_start DESC",
                )
                .bind(teacher_id)
                .fetch_all(db)
                .await
            }
            None => {
                sqlx::query_as("SELECT * FROM settlements ORDER BY period_start DESC")
                    .fetch_all(db)
                    .await
            }
        }
    }

    pub async fn insert(db: &SqlitePool, settlement: &Settlement) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO settlements
                (id, teacher_id, period_start, period_end, classes_count, credits_delivered, rate_per_credit, total_amount, currency, status, paid_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&settlement.id)
        .bind(&settlement.teacher_id)
        .bind(&settlement.period_start)
        .bind(&settlement.period_end)
        .bind(settlement.classes_count)
        .bind(settlement.credits_delivered)
        .bind(settlement.rate_per_credit)
        .bind(settlement.total_amount)
        .bind(&settlement.currency)
        .bind(&settlement.status)
        .bind(&settlement.paid_at)
        .bind(&settlement.created_at)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Mark a pending settlement as paid
    pub async fn mark_paid(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE settlements SET status = 'paid', paid_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(now_rfc3339())
        .bind(id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSettlementRequest {
    pub teacher_id: String,
    /// Inclusive first day, `YYYY-MM-DD`
    pub period_start: String,
    /// Inclusive last day, `YYYY-MM-DD`
    pub period_end: String,
    pub rate_per_credit: Option<f64>,
}
