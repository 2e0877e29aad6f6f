//! Discount coupons.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::now_rfc3339;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Coupon {
    pub id: String,
    pub code: String,
    pub discount_percent: Option<f64>,
    pub discount_amount: Option<f64>,
    pub max_uses: Option<i64>,
    pub used_count: i64,
    pub expires_at: Option<String>,
    pub active: i64,
    pub created_at: String,
}

/// Why a coupon cannot be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouponRejection {
    Inactive,
    Expired,
    Exhausted,
}

impl Coupon {
    /// Coupon codes are matched case-insensitively and stored upper-case
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn check_usable(&self, now: DateTime<Utc>) -> Result<(), CouponRejection> {
        if self.active == 0 {
            return Err(CouponRejection::Inactive);
        }
        if let Some(expires_at) = &self.expires_at {
            match DateTime::parse_from_rfc3339(expires_at) {
                Ok(expires) if expires.with_timezone(&Utc) <= now => {
                    return Err(CouponRejection::Expired)
                }
                Err(_) => return Err(CouponRejection::Expired),
                Ok(_) => {}
            }
        }
        if let Some(max_uses) = self.max_uses {
            if self.used_count >= max_uses {
                return Err(CouponRejection::Exhausted);
            }
        }
        Ok(())
    }

    /// Discount for a subtotal, never more than the subtotal itself
    pub fn discount_for(&self, subtotal: f64) -> f64 {
        let discount = match (self.discount_percent, self.discount_amount) {
            (Some(percent), _) => subtotal * percent.clamp(0.0, 100.0) / 100.0,
            (None, Some(amount)) => amount.max(0.0),
            (None, None) => 0.0,
        };
        round_money(discount.min(subtotal))
    }

    pub async fn find_by_code(db: &SqlitePool, code: &str) -> Result<Option<Coupon>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM coupons WHERE code = ?")
            .bind(Self::normalize_code(code))
            .fetch_optional(db)
            .await
    }

    pub async fn list(db: &SqlitePool) -> Result<Vec<Coupon>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM coupons ORDER BY created_at DESC")
            .fetch_all(db)
            .await
    }

    pub async fn create(db: &SqlitePool, req: &CreateCouponRequest) -> Result<Coupon, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let code = Self::normalize_code(&req.code);

        sqlx::query(
            r#"
            INSERT INTO coupons (id, code, discount_percent, discount_amount, max_uses, used_count, expires_at, active, created_at)
            VALUES (?, ?, ?, ?, ?, 0, ?, 1, ?)
            "#,
        )
        .bind(&id)
        .bind(&code)
        .bind(req.discount_percent)
        .bind(req.discount_amount)
        .bind(req.max_uses)
        .bind(&req.expires_at)
        .bind(now_rfc3339())
        .execute(db)
        .await?;

        sqlx::query_as("SELECT * FROM coupons WHERE id = ?")
            .bind(&id)
            .fetch_one(db)
            .await
    }

    pub async fn deactivate(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE coupons SET active = 0 WHERE id = ?")
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Round to two decimal places
pub fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCouponRequest {
    pub code: String,
    pub discount_percent: Option<f64>,
    pub discount_amount: Option<f64>,
    pub max_uses: Option<i64>,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateCouponRequest {
    pub code: String,
    pub package_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponQuote {
    pub code: String,
    pub subtotal: f64,
    pub discount: f64,
    pub total: f64,
    pub currency: String,
}
