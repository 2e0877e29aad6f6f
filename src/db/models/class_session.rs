//! Class session models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use super::{now_rfc3339, Role};
use crate::scheduling::{self, ClassStatus, ScheduleError};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClassSession {
    pub id: String,
    pub student_id: String,
    pub teacher_id: String,
    pub title: String,
    pub class_date: String,
    pub start_time: String,
    pub duration_minutes: i64,
    pub status: String,
    pub meeting_link: Option<String>,
    pub notes: Option<String>,
    pub reminder_sent: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl ClassSession {
    pub fn starts_at(&self) -> Result<DateTime<Utc>, ScheduleError> {
        scheduling::parse_start(&self.class_date, &self.start_time)
    }

    pub fn stored_status(&self) -> ClassStatus {
        ClassStatus::from_str(&self.status).unwrap_or(ClassStatus::Scheduled)
    }

    /// Status as seen at `now`; unparseable times fall back to the stored status
    pub fn effective_status(&self, now: DateTime<Utc>) -> ClassStatus {
        match self.starts_at() {
            Ok(start) => {
                scheduling::effective_status(self.stored_status(), start, self.duration_minutes, now)
            }
            Err(_) => self.stored_status(),
        }
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.student_id == user_id || self.teacher_id == user_id
    }

    pub async fn find(db: &SqlitePool, id: &str) -> Result<Option<ClassSession>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM class_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Classes visible to a user: admins see everything, others see their own
    pub async fn list_for(
        db: &SqlitePool,
        user_id: &str,
        role: Role,
    ) -> Result<Vec<ClassSession>, sqlx::Error> {
        let query = match role {
            Role::Admin => {
                return sqlx::query_as(
                    "SELECT * FROM class_sessions ORDER BY class_date DESC, start_time DESC",
                )
                .fetch_all(db)
                .await;
            }
            Role::Teacher => {
                "SELECT * FROM class_sessions WHERE teacher_id = ? ORDER BY class_date DESC, start_time DESC"
            }
            Role::Student => {
                "SELECT * FROM class_sessions WHERE student_id = ? ORDER BY class_date DESC, start_time DESC"
            }
        };
        sqlx::query_as(query).bind(user_id).fetch_all(db).await
    }

    /// Non-cancelled classes of either participant on the given date, used
    /// for overlap checks
    pub async fn active_on_date(
        db: &SqlitePool,
        class_date: &str,
        teacher_id: &str,
        student_id: &str,
    ) -> Result<Vec<ClassSession>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM class_sessions
            WHERE class_date = ?
              AND (teacher_id = ? OR student_id = ?)
              AND status NOT IN ('cancelled', 'no_show')
            "#,
        )
        .bind(class_date)
        .bind(teacher_id)
        .bind(student_id)
        .fetch_all(db)
        .await
    }

    pub async fn create(db: &SqlitePool, req: &CreateClassRequest) -> Result<ClassSession, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO class_sessions
                (id, student_id, teacher_id, title, class_date, start_time, duration_minutes, status, meeting_link, notes, reminder_sent, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'scheduled', ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&req.student_id)
        .bind(&req.teacher_id)
        .bind(&req.title)
        .bind(&req.class_date)
        .bind(&req.start_time)
        .bind(req.duration_minutes)
        .bind(&req.meeting_link)
        .bind(&req.notes)
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await?;

        sqlx::query_as("SELECT * FROM class_sessions WHERE id = ?")
            .bind(&id)
            .fetch_one(db)
            .await
    }

    /// Move a class to a new slot and re-arm its reminder
    pub async fn reschedule(
        db: &SqlitePool,
        id: &str,
        class_date: &str,
        start_time: &str,
        duration_minutes: i64,
    ) -> Result<ClassSession, sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE class_sessions SET
                class_date = ?, start_time = ?, duration_minutes = ?,
                reminder_sent = 0, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(class_date)
        .bind(start_time)
        .bind(duration_minutes)
        .bind(now_rfc3339())
        .bind(id)
        .execute(db)
        .await?;

        sqlx::query_as("SELECT * FROM class_sessions WHERE id = ?")
            .bind(id)
            .fetch_one(db)
            .await
    }

    /// Record an explicit outcome. Only classes still marked scheduled change.
    pub async fn set_outcome(
        db: &SqlitePool,
        id: &str,
        status: ClassStatus,
    ) -> Result<bool, sqlx::Error> {
        let mut conn = db.acquire().await?;
        Self::set_outcome_in(&mut conn, id, status).await
    }

    pub async fn set_outcome_in(
        conn: &mut SqliteConnection,
        id: &str,
        status: ClassStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE class_sessions SET status = ?, updated_at = ? WHERE id = ? AND status = 'scheduled'",
        )
        .bind(status.as_str())
        .bind(now_rfc3339())
        .bind(id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Scheduled classes on the given dates that have not been reminded yet
    pub async fn pending_reminders(
        db: &SqlitePool,
        dates: &[String],
    ) -> Result<Vec<ClassSession>, sqlx::Error> {
        let mut found = Vec::new();
        for date in dates {
            let rows: Vec<ClassSession> = sqlx::query_as(
                r#"
                SELECT * FROM class_sessions
                WHERE class_date = ? AND status = 'scheduled' AND reminder_sent = 0
                "#,
            )
            .bind(date)
            .fetch_all(db)
            .await?;
            found.extend(rows);
        }
        Ok(found)
    }

    pub async fn mark_reminded(db: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE class_sessions SET reminder_sent = 1 WHERE id = ?")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateClassRequest {
    pub student_id: String,
    pub teacher_id: String,
    pub title: String,
    pub class_date: String,
    pub start_time: String,
    pub duration_minutes: i64,
    pub meeting_link: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleRequest {
    pub class_date: String,
    pub start_time: String,
    pub duration_minutes: Option<i64>,
}

/// Class with its status computed at response time
#[derive(Debug, Clone, Serialize)]
pub struct ClassResponse {
    pub id: String,
    pub student_id: String,
    pub teacher_id: String,
    pub title: String,
    pub class_date: String,
    pub start_time: String,
    pub duration_minutes: i64,
    pub status: ClassStatus,
    pub meeting_link: Option<String>,
    pub notes: Option<String>,
    pub credit_cost: f64,
}

impl ClassResponse {
    pub fn at(class: ClassSession, now: DateTime<Utc>) -> Self {
        let status = class.effective_status(now);
        Self {
            credit_cost: scheduling::credit_cost(class.duration_minutes),
            id: class.id,
            student_id: class.student_id,
            teacher_id: class.teacher_id,
            title: class.title,
            class_date: class.class_date,
            start_time: class.start_time,
            duration_minutes: class.duration_minutes,
            status,
            meeting_link: class.meeting_link,
            notes: class.notes,
        }
    }
}
