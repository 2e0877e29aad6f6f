//! Class reviews left by students.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::now_rfc3339;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Review {
    pub id: String,
    pub class_id: String,
    pub student_id: String,
    pub teacher_id: String,
    pub rating: i64,
    pub comment: Option<String>,
    pub created_at: String,
}

impl Review {
    pub async fn create(
        db: &SqlitePool,
        class_id: &str,
        student_id: &str,
        teacher_id: &str,
        rating: i64,
        comment: Option<&str>,
    ) -> Result<Review, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO reviews (id, class_id, student_id, teacher_id, rating, comment, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(class_id)
        .bind(student_id)
        .bind(teacher_id)
        .bind(rating)
        .bind(comment)
        .bind(now_rfc3339())
        .execute(db)
        .await?;

        sqlx::query_as("SELECT * FROM reviews WHERE id = ?")
            .bind(&id)
            .fetch_one(db)
            .await
    }

    pub async fn list_for_teacher(db: &SqlitePool, teacher_id: &str) -> Result<Vec<Review>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM reviews WHERE teacher_id = ? ORDER BY created_at DESC")
            .bind(teacher_id)
            .fetch_all(db)
            .await
    }

    /// Average rating and review count for a teacher
    pub async fn summary(db: &SqlitePool, teacher_id: &str) -> Result<(Option<f64>, i64), sqlx::Error> {
        sqlx::query_as("SELECT AVG(rating), COUNT(*) FROM reviews WHERE teacher_id = ?")
            .bind(teacher_id)
            .fetch_one(db)
            .await
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateReviewRequest {
    pub class_id: String,
    pub rating: i64,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewQuery {
    pub teacher_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeacherReviewsResponse {
    pub teacher_id: String,
    pub average_rating: Option<f64>,
    pub count: i64,
    pub reviews: Vec<Review>,
}
