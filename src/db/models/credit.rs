//! Credit balance and ledger rows.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditKind {
    Add,
    Deduct,
}

impl CreditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditKind::Add => "add",
            CreditKind::Deduct => "deduct",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditTransaction {
    pub id: String,
    pub student_id: String,
    pub teacher_id: Option<String>,
    pub kind: String,
    pub amount: f64,
    pub balance_after: f64,
    pub reason: String,
    pub class_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: String,
}

impl CreditTransaction {
    /// Newest first
    pub async fn list_for_student(
        db: &SqlitePool,
        student_id: &str,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM credit_transactions
            WHERE student_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(student_id)
        .bind(limit)
        .fetch_all(db)
        .await
    }

    pub async fn find_by_idempotency_key(
        db: &SqlitePool,
        key: &str,
    ) -> Result<Option<CreditTransaction>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM credit_transactions WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(db)
            .await
    }

    /// Credits consumed by a teacher's classes within `[from, to)` (RFC 3339 bounds)
    pub async fn consumed_for_teacher(
        db: &SqlitePool,
        teacher_id: &str,
        from: &str,
        to: &str,
    ) -> Result<(i64, f64), sqlx::Error> {
        let (count, total): (i64, Option<f64>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), SUM(amount) FROM credit_transactions
            WHERE teacher_id = ? AND kind = 'deduct' AND class_id IS NOT NULL
              AND created_at >= ? AND created_at < ?
            "#,
        )
        .bind(teacher_id)
        .bind(from)
        .bind(to)
        .fetch_one(db)
        .await?;
        Ok((count, total.unwrap_or(0.0)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditBalance {
    pub student_id: String,
    pub balance: f64,
    pub updated_at: String,
}

impl CreditBalance {
    /// Balance for a student; students without a row have zero credits
    pub async fn get(db: &SqlitePool, student_id: &str) -> Result<f64, sqlx::Error> {
        let row: Option<(f64,)> =
            sqlx::query_as("SELECT balance FROM credit_balances WHERE student_id = ?")
                .bind(student_id)
                .fetch_optional(db)
                .await?;
        Ok(row.map(|(b,)| b).unwrap_or(0.0))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreditChangeRequest {
    pub amount: f64,
    pub reason: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreditSummaryResponse {
    pub student_id: String,
    pub balance: f64,
    pub recent: Vec<CreditTransaction>,
}
