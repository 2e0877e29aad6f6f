//! In-app notifications shown on the dashboards.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::now_rfc3339;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub read_at: Option<String>,
    pub created_at: String,
}

impl Notification {
    pub async fn create(
        db: &SqlitePool,
        user_id: &str,
        kind: &str,
        title: &str,
        body: &str,
    ) -> Result<Notification, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO notifications (id, user_id, kind, title, body, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(kind)
        .bind(title)
        .bind(body)
        .bind(now_rfc3339())
        .execute(db)
        .await?;

        sqlx::query_as("SELECT * FROM notifications WHERE id = ?")
            .bind(&id)
            .fetch_one(db)
            .await
    }

    pub async fn list_for_user(
        db: &SqlitePool,
        user_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>, sqlx::Error> {
        let query = if unread_only {
            "SELECT * FROM notifications WHERE user_id = ? AND read_at IS NULL ORDER BY created_at DESC LIMIT 100"
        } else {
            "SELECT * FROM notifications WHERE user_id = ? ORDER BY created_at DESC LIMIT 100"
        };
        sqlx::query_as(query).bind(user_id).fetch_all(db).await
    }

    pub async fn mark_read(db: &SqlitePool, id: &str, user_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notifications SET read_at = COALESCE(read_at, ?) WHERE id = ? AND user_id = ?",
        )
        .bind(now_rfc3339())
        .bind(id)
        .bind(user_id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_all_read(db: &SqlitePool, user_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notifications SET read_at = ? WHERE user_id = ? AND read_at IS NULL",
        )
        .bind(now_rfc3339())
        .bind(user_id)
        .execute(db)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::profile::fixtures::profile;
    use crate::db::{init_memory, Role};

    #[tokio::test]
    async fn test_mark_read_scoped_to_owner() {
        let db = init_memory().await.unwrap();
        let owner = profile(&db, "a@example.com", Role::Student).await;
        let other = profile(&db, "b@example.com", Role::Student).await;

        let n = Notification::create(&db, &owner.id, "class_reminder", "تذكير", "body")
            .await
            .unwrap();
        Notification::create(&db, &owner.id, "credits_added", "رصيد", "body")
            .await
            .unwrap();

        assert!(!Notification::mark_read(&db, &n.id, &other.id).await.unwrap());
        assert!(Notification::mark_read(&db, &n.id, &owner.id).await.unwrap());

        let unread = Notification::list_for_user(&db, &owner.id, true).await.unwrap();
        assert_eq!(unread.len(), 1);

        assert_eq!(Notification::mark_all_read(&db, &owner.id).await.unwrap(), 1);
        assert!(Notification::list_for_user(&db, &owner.id, true).await.unwrap().is_empty());
    }
}
