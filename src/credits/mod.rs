//! Class-credit bookkeeping.
//!
//! Every change to a student's balance goes through [`apply_in`], inside a
//! single database transaction:
//!
//! 1. a repeated idempotency key returns the transaction recorded the first time;
//! 2. deductions use a conditional `UPDATE ... WHERE balance >= amount`, so a
//!    balance can never go below zero even with concurrent requests;
//! 3. the ledger row records the balance after the change.

use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tracing::{debug, info};

use crate::db::{now_rfc3339, CreditKind, CreditTransaction};

/// Granularity of credit amounts
pub const CREDIT_STEP: f64 = 0.5;

#[derive(Error, Debug)]
pub enum CreditError {
    #[error("Credit amount must be a positive number")]
    NotPositive,

    #[error("Credit amount must be a multiple of 0.5")]
    NotHalfStep,

    #[error("Credit amount cannot exceed {0}")]
    ExceedsMax(f64),

    #[error("Insufficient credits: balance {balance}, requested {requested}")]
    InsufficientBalance { balance: f64, requested: f64 },

    #[error("Student not found")]
    StudentNotFound,

    #[error("Profile is not a student")]
    NotAStudent,

    #[error("Idempotency key was already used for a different operation")]
    IdempotencyConflict,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A validated credit amount: positive, a multiple of 0.5, at most `max`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreditAmount(f64);

impl CreditAmount {
    pub fn parse(value: f64, max: f64) -> Result<Self, CreditError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(CreditError::NotPositive);
        }
        if (value / CREDIT_STEP).fract() != 0.0 {
            return Err(CreditError::NotHalfStep);
        }
        if value > max {
            return Err(CreditError::ExceedsMax(max));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// One requested change to a student's balance
#[derive(Debug, Clone)]
pub struct CreditChange {
    pub student_id: String,
    pub teacher_id: Option<String>,
    pub amount: f64,
    pub reason: String,
    pub class_id: Option<String>,
    pub idempotency_key: Option<String>,
}

impl CreditChange {
    pub fn new(student_id: impl Into<String>, amount: f64, reason: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            teacher_id: None,
            amount,
            reason: reason.into(),
            class_id: None,
            idempotency_key: None,
        }
    }

    pub fn teacher(mut self, teacher_id: impl Into<String>) -> Self {
        self.teacher_id = Some(teacher_id.into());
        self
    }

    pub fn class(mut self, class_id: impl Into<String>) -> Self {
        self.class_id = Some(class_id.into());
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

pub async fn add_credits(
    db: &SqlitePool,
    change: CreditChange,
    max_amount: f64,
) -> Result<CreditTransaction, CreditError> {
    apply(db, CreditKind::Add, change, max_amount).await
}

pub async fn deduct_credits(
    db: &SqlitePool,
    change: CreditChange,
    max_amount: f64,
) -> Result<CreditTransaction, CreditError> {
    apply(db, CreditKind::Deduct, change, max_amount).await
}

async fn apply(
    db: &SqlitePool,
    kind: CreditKind,
    change: CreditChange,
    max_amount: f64,
) -> Result<CreditTransaction, CreditError> {
    let mut tx = db.begin().await?;
    let transaction = apply_in(&mut tx, kind, change, max_amount).await?;
    tx.commit().await?;

    info!(
        student_id = %transaction.student_id,
        kind = %transaction.kind,
        amount = transaction.amount,
        balance_after = transaction.balance_after,
        "Credit balance changed"
    );
    Ok(transaction)
}

/// Apply a change on a connection that already has a transaction open, so
/// callers can bundle it with their own writes. Nothing is committed here.
pub async fn apply_in(
    tx: &mut SqliteConnection,
    kind: CreditKind,
    change: CreditChange,
    max_amount: f64,
) -> Result<CreditTransaction, CreditError> {
    let amount = CreditAmount::parse(change.amount, max_amount)?.value();

    if let Some(key) = &change.idempotency_key {
        let existing: Option<CreditTransaction> =
            sqlx::query_as("SELECT * FROM credit_transactions WHERE idempotency_key = ?")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some(existing) = existing {
            if existing.student_id != change.student_id || existing.kind != kind.as_str() {
                return Err(CreditError::IdempotencyConflict);
            }
            debug!(key = %key, transaction_id = %existing.id, "Replayed credit change");
            return Ok(existing);
        }
    }

    let role: Option<(String,)> = sqlx::query_as("SELECT role FROM profiles WHERE id = ?")
        .bind(&change.student_id)
        .fetch_optional(&mut *tx)
        .await?;
    match role {
        None => return Err(CreditError::StudentNotFound),
        Some((role,)) if role != "student" => return Err(CreditError::NotAStudent),
        Some(_) => {}
    }

    let now = now_rfc3339();

    sqlx::query(
        "INSERT OR IGNORE INTO credit_balances (student_id, balance, updated_at) VALUES (?, 0, ?)",
    )
    .bind(&change.student_id)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    let updated = match kind {
        CreditKind::Add => {
            sqlx::query(
                "UPDATE credit_balances SET balance = balance + ?, updated_at = ? WHERE student_id = ?",
            )
            .bind(amount)
            .bind(&now)
            .bind(&change.student_id)
            .execute(&mut *tx)
            .await?
        }
        CreditKind::Deduct => {
            sqlx::query(
                r#"
                UPDATE credit_balances SET balance = balance - ?, updated_at = ?
                WHERE student_id = ? AND balance >= ?
                "#,
            )
            .bind(amount)
            .bind(&now)
            .bind(&change.student_id)
            .bind(amount)
            .execute(&mut *tx)
            .await?
        }
    };

    let (balance_after,): (f64,) =
        sqlx::query_as("SELECT balance FROM credit_balances WHERE student_id = ?")
            .bind(&change.student_id)
            .fetch_one(&mut *tx)
            .await?;

    if updated.rows_affected() == 0 {
        // Dropping the transaction rolls back the placeholder balance row
        return Err(CreditError::InsufficientBalance {
            balance: balance_after,
            requested: amount,
        });
    }

    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO credit_transactions
            (id, student_id, teacher_id, kind, amount, balance_after, reason, class_id, idempotency_key, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&change.student_id)
    .bind(&change.teacher_id)
    .bind(kind.as_str())
    .bind(amount)
    .bind(balance_after)
    .bind(&change.reason)
    .bind(&change.class_id)
    .bind(&change.idempotency_key)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    let transaction: CreditTransaction =
        sqlx::query_as("SELECT * FROM credit_transactions WHERE id = ?")
            .bind(&id)
            .fetch_one(&mut *tx)
            .await?;

    Ok(transaction)
}
