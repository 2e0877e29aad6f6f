//! Single-use password reset tokens (stored hashed).

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::now_rfc3339;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PasswordReset {
    pub id: String,
    pub profile_id: String,
    pub token_hash: String,
    pub expires_at: String,
    pub used_at: Option<String>,
    pub created_at: String,
}

impl PasswordReset {
    pub async fn create(
        db: &SqlitePool,
        profile_id: &str,
        token_hash: &str,
        expires_at: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO password_resets (id, profile_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(profile_id)
        .bind(token_hash)
        .bind(expires_at)
        .bind(now_rfc3339())
        .execute(db)
        .await?;
        Ok(())
    }

    /// Atomically consume an unused, unexpired token. Returns the profile id.
    pub async fn consume(
        db: &SqlitePool,
        token_hash: &str,
        now: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        let reset: Option<PasswordReset> = sqlx::query_as(
            "SELECT * FROM password_resets WHERE token_hash = ? AND used_at IS NULL AND expires_at > ?",
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(db)
        .await?;

        let Some(reset) = reset else {
            return Ok(None);
        };

        let result = sqlx::query("UPDATE password_resets SET used_at = ? WHERE id = ? AND used_at IS NULL")
            .bind(now)
            .bind(&reset.id)
            .execute(db)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(reset.profile_id))
    }
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetConfirm {
    pub token: String,
    pub password: String,
}
