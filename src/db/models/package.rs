//! Credit packages offered for purchase.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::now_rfc3339;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Package {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub credits: f64,
    pub price: f64,
    pub currency: String,
    pub active: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Package {
    pub fn is_active(&self) -> bool {
        self.active != 0
    }

    pub async fn find(db: &SqlitePool, id: &str) -> Result<Option<Package>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM packages WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn list(db: &SqlitePool, active_only: bool) -> Result<Vec<Package>, sqlx::Error> {
        if active_only {
            sqlx::query_as("SELECT * FROM packages WHERE active = 1 ORDER BY price ASC")
                .fetch_all(db)
                .await
        } else {
            sqlx::query_as("SELECT * FROM packages ORDER BY price ASC")
                .fetch_all(db)
                .await
        }
    }

    pub async fn create(
        db: &SqlitePool,
        req: &CreatePackageRequest,
        currency: &str,
    ) -> Result<Package, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO packages (id, name, description, credits, price, currency, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&req.name)
        .bind(&req.description)
        .bind(req.credits)
        .bind(req.price)
        .bind(req.currency.as_deref().unwrap_or(currency))
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await?;

        sqlx::query_as("SELECT * FROM packages WHERE id = ?")
            .bind(&id)
            .fetch_one(db)
            .await
    }

    pub async fn update(
        db: &SqlitePool,
        id: &str,
        req: &UpdatePackageRequest,
    ) -> Result<Option<Package>, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE packages SET
                name = COALESCE(?, name),
                description = COALESCE(?, description),
                price = COALESCE(?, price),
                active = COALESCE(?, active),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&req.name)
        .bind(&req.description)
        .bind(req.price)
        .bind(req.active.map(|b| if b { 1 } else { 0 }))
        .bind(now_rfc3339())
        .bind(id)
        .execute(db)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Self::find(db, id).await
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePackageRequest {
    pub name: String,
    pub description: Option<String>,
    pub credits: f64,
    pub price: f64,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePackageRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub active: Option<bool>,
}
