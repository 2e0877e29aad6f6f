//! Profile models: students, teachers and admins.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::now_rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Enrollment state of a student profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
    Trial,
    Regular,
    Denied,
}

impl StudentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudentStatus::Trial => "trial",
            StudentStatus::Regular => "regular",
            StudentStatus::Denied => "denied",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub student_status: Option<String>,
    pub locale: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Profile {
    pub fn role(&self) -> Role {
        Role::from_str(&self.role).unwrap_or(Role::Student)
    }

    pub async fn find(db: &SqlitePool, id: &str) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_email(db: &SqlitePool, email: &str) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM profiles WHERE email = ?")
            .bind(email)
            .fetch_optional(db)
            .await
    }

    pub async fn list(db: &SqlitePool, role: Option<Role>) -> Result<Vec<Profile>, sqlx::Error> {
        match role {
            Some(role) => {
                sqlx::query_as("SELECT * FROM profiles WHERE role = ? ORDER BY created_at DESC")
                    .bind(role.as_str())
                    .fetch_all(db)
                    .await
            }
            None => {
                sqlx::query_as("SELECT * FROM profiles ORDER BY created_at DESC")
                    .fetch_all(db)
                    .await
            }
        }
    }

    pub async fn create(db: &SqlitePool, new: NewProfile) -> Result<Profile, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        // New students start as trial students until a teacher decides
        let student_status = match new.role {
            Role::Student => Some(StudentStatus::Trial.as_str()),
            _ => None,
        };

        sqlx::query(
            r#"
            INSERT INTO profiles (id, email, password_hash, full_name, phone, role, student_status, locale, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.full_name)
        .bind(&new.phone)
        .bind(new.role.as_str())
        .bind(student_status)
        .bind(&new.locale)
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await?;

        sqlx::query_as("SELECT * FROM profiles WHERE id = ?")
            .bind(&id)
            .fetch_one(db)
            .await
    }

    pub async fn update(
        db: &SqlitePool,
        id: &str,
        req: &UpdateProfileRequest,
    ) -> Result<Option<Profile>, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE profiles SET
                full_name = COALESCE(?, full_name),
                phone = COALESCE(?, phone),
                locale = COALESCE(?, locale),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&req.full_name)
        .bind(&req.phone)
        .bind(&req.locale)
        .bind(now_rfc3339())
        .bind(id)
        .execute(db)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Self::find(db, id).await
    }

    pub async fn set_password_hash(
        db: &SqlitePool,
        id: &str,
        password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE profiles SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(now_rfc3339())
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Move a trial student to `status`. Returns false when the profile is not
    /// a student currently in trial.
    pub async fn decide_trial(
        db: &SqlitePool,
        id: &str,
        status: StudentStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE profiles SET student_status = ?, updated_at = ?
            WHERE id = ? AND role = 'student' AND student_status = 'trial'
            "#,
        )
        .bind(status.as_str())
        .bind(now_rfc3339())
        .bind(id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a profile. Dependent rows go with it through ON DELETE CASCADE.
    pub async fn delete(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM profiles WHERE id = ?")
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count(db: &SqlitePool) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM profiles")
            .fetch_one(db)
            .await?;
        Ok(count)
    }
}

/// Insert payload, already validated and hashed
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub locale: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub locale: Option<String>,
}

/// Public view of a profile (never exposes the password hash)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub student_status: Option<String>,
    pub locale: String,
    pub created_at: String,
}

impl From<Profile> for ProfileResponse {
    fn from(profile: Profile) -> Self {
        Self {
            id: profile.id,
            email: profile.email,
            full_name: profile.full_name,
            phone: profile.phone,
            role: profile.role,
            student_status: profile.student_status,
            locale: profile.locale,
            created_at: profile.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub locale: Option<String>,
}

/// Admin-created account (teachers and other admins cannot self-register)
#[derive(Debug, Deserialize)]
pub struct CreateProfileRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub locale: Option<String>,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct TrialDecisionRequest {
    pub decision: TrialDecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialDecision {
    Approve,
    Deny,
}

impl TrialDecision {
    pub fn resulting_status(&self) -> StudentStatus {
        match self {
            TrialDecision::Approve => StudentStatus::Regular,
            TrialDecision::Deny => StudentStatus::Denied,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: String,
    pub user: ProfileResponse,
}


#[cfg(test)]
mod tests {
    use super::fixtures::profile;
    use super::*;
    use crate::db::init_memory;

    #[tokio::test]
    async fn test_new_student_starts_in_trial() {
        let db = init_memory().await.unwrap();
        let student = profile(&db, "s@example.com", Role::Student).await;
        let teacher = profile(&db, "t@example.com", Role::Teacher).await;

        assert_eq!(student.student_status.as_deref(), Some("trial"));
        assert_eq!(teacher.student_status, None);
        assert_eq!(teacher.role(), Role::Teacher);
    }

    #[tokio::test]
    async fn test_decide_trial_only_once() {
        let db = init_memory().await.unwrap();
        let student = profile(&db, "s@example.com", Role::Student).await;

        assert!(Profile::decide_trial(&db, &student.id, StudentStatus::Regular).await.unwrap());
        // Already regular, nothing left to decide
        assert!(!Profile::decide_trial(&db, &student.id, StudentStatus::Denied).await.unwrap());

        let reloaded = Profile::find(&db, &student.id).await.unwrap().unwrap();
        assert_eq!(reloaded.student_status.as_deref(), Some("regular"));
    }

    #[tokio::test]
    async fn test_decide_trial_ignores_teachers() {
        let db = init_memory().await.unwrap();
        let teacher = profile(&db, "t@example.com", Role::Teacher).await;
        assert!(!Profile::decide_trial(&db, &teacher.id, StudentStatus::Regular).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_keeps_missing_fields() {
        let db = init_memory().await.unwrap();
        let student = profile(&db, "s@example.com", Role::Student).await;

        let updated = Profile::update(
            &db,
            &student.id,
            &UpdateProfileRequest {
                phone: Some("+966500000000".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(updated.full_name, student.full_name);
        assert_eq!(updated.phone.as_deref(), Some("+966500000000"));
        assert!(Profile::update(&db, "missing", &UpdateProfileRequest::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let db = init_memory().await.unwrap();
        profile(&db, "dup@example.com", Role::Student).await;
        let err = Profile::create(
            &db,
            NewProfile {
                email: "dup@example.com".to_string(),
                password_hash: "x".to_string(),
                full_name: "Other".to_string(),
                phone: None,
                role: Role::Student,
                locale: "ar".to_string(),
            },
        )
        .await;
        assert!(err.is_err());
    }
}
