//! Invoices, invoice items and payments.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: String,
    pub student_id: String,
    pub subtotal: f64,
    pub discount: f64,
    pub total: f64,
    pub currency: String,
    pub status: String,
    pub coupon_code: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub id: String,
    pub invoice_id: String,
    pub package_id: Option<String>,
    pub description: String,
    pub quantity: i64,
    pub unit_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: String,
    pub invoice_id: String,
    pub student_id: String,
    pub amount: f64,
    pub currency: String,
    pub method: String,
    pub provider_ref: Option<String>,
    pub status: String,
    pub idempotency_key: Option<String>,
    pub created_at: String,
}

impl Invoice {
    pub async fn find(db: &SqlitePool, id: &str) -> Result<Option<Invoice>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM invoices WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn list(db: &SqlitePool, student_id: Option<&str>) -> Result<Vec<Invoice>, sqlx::Error> {
        match student_id {
            Some(student_id) => {
                sqlx::query_as("SELECT * FROM invoices WHERE student_id = ? ORDER BY created_at DESC")
                    .bind(student_id)
                    .fetch_all(db)
                    .await
            }
            None => {
                sqlx::query_as("SELECT * FROM invoices ORDER BY created_at DESC")
                    .fetch_all(db)
                    .await
            }
        }
    }

    pub async fn items(db: &SqlitePool, invoice_id: &str) -> Result<Vec<InvoiceItem>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM invoice_items WHERE invoice_id = ?")
            .bind(invoice_id)
            .fetch_all(db)
            .await
    }
}

impl Payment {
    pub async fn find_by_idempotency_key(
        db: &SqlitePool,
        key: &str,
    ) -> Result<Option<Payment>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM payments WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(db)
            .await
    }

    pub async fn list(db: &SqlitePool, student_id: Option<&str>) -> Result<Vec<Payment>, sqlx::Error> {
        match student_id {
            Some(student_id) => {
                sqlx::query_as("SELECT * FROM payments WHERE student_id = ? ORDER BY created_at DESC")
                    .bind(student_id)
                    .fetch_all(db)
                    .await
            }
            None => {
                sqlx::query_as("SELECT * FROM payments ORDER BY created_at DESC")
                    .fetch_all(db)
                    .await
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceResponse {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseRequest {
    pub package_id: String,
    pub coupon_code: Option<String>,
    pub payment_method: String,
    pub provider_ref: Option<String>,
    /// Client-generated key; retries with the same key do not charge twice
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseResponse {
    pub invoice: Invoice,
    pub payment: Payment,
    pub credits_added: f64,
    pub balance: f64,
}
