//! Class session endpoints: booking, listing, join status and outcomes.
//!
//! Status is derived from the clock at response time; only explicit
//! outcomes (cancelled, no-show, completed) are written back.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{sanitize_optional, sanitize_text, validate_meeting_link, validate_uuid};
use crate::credits::{self, CreditChange};
use crate::db::{
    ClassResponse, ClassSession, CreateClassRequest, CreditKind, Notification, Profile,
    RescheduleRequest, Role, StudentStatus,
};
use crate::events::{ChangeAction, ChangeEvent};
use crate::scheduling::{self, ClassStatus, JoinState};
use crate::AppState;

/// Load a class the caller takes part in (admins may load any)
async fn load_class(state: &AppState, user: &AuthUser, id: &str) -> Result<ClassSession, ApiError> {
    let class = ClassSession::find(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Class not found"))?;

    if !user.is_admin() && !class.involves(&user.id) {
        // Do not reveal classes the caller has no part in
        return Err(ApiError::not_found("Class not found"));
    }
    Ok(class)
}

/// Only the class teacher or an admin may manage a class
fn require_class_teacher(user: &AuthUser, class: &ClassSession) -> Result<(), ApiError> {
    if user.is_admin() || (user.role == Role::Teacher && class.teacher_id == user.id) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Only the class teacher can do this"))
    }
}

/// Reject a slot that overlaps another active class of the same teacher or
/// student. Classes are checked on the same and the previous day so late
/// classes that run past midnight are caught.
async fn ensure_no_overlap(
    state: &AppState,
    teacher_id: &str,
    student_id: &str,
    start: DateTime<Utc>,
    duration_minutes: i64,
    ignore_id: Option<&str>,
) -> Result<(), ApiError> {
    let days = [start.date_naive(), start.date_naive() - Duration::days(1)];

    for day in days {
        let date = day.format("%Y-%m-%d").to_string();
        for other in ClassSession::active_on_date(&state.db, &date, teacher_id, student_id).await? {
            if Some(other.id.as_str()) == ignore_id {
                continue;
            }
            let Ok(other_start) = other.starts_at() else {
                continue;
            };
            if scheduling::overlaps(start, duration_minutes, other_start, other.duration_minutes) {
                return Err(ApiError::conflict(format!(
                    "Time slot overlaps class {} on {} at {}",
                    other.id, other.class_date, other.start_time
                )));
            }
        }
    }
    Ok(())
}

fn publish_class_event(state: &AppState, class: &ClassSession, action: ChangeAction) {
    state.events.publish(
        ChangeEvent::new("class_sessions", action, &class.id).to([&class.student_id, &class.teacher_id]),
    );
}

async fn notify(state: &AppState, user_id: &str, kind: &str, title: &str, body: &str) -> Result<(), ApiError> {
    let notification = Notification::create(&state.db, user_id, kind, title, body).await?;
    state.events.publish(
        ChangeEvent::new("notifications", ChangeAction::Insert, &notification.id).to([user_id]),
    );
    Ok(())
}

pub async fn create_class(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<CreateClassRequest>,
) -> Result<(StatusCode, Json<ClassResponse>), ApiError> {
    user.require_role(&[Role::Teacher, Role::Admin])?;
    if user.role == Role::Teacher && request.teacher_id != user.id {
        return Err(ApiError::forbidden("Teachers can only schedule their own classes"));
    }

    let request = CreateClassRequest {
        title: sanitize_text(&request.title),
        notes: sanitize_optional(request.notes.as_deref()),
        meeting_link: request.meeting_link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()),
        ..request
    };

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("student_id", validate_uuid(&request.student_id, "student_id"))
        .check("teacher_id", validate_uuid(&request.teacher_id, "teacher_id"))
        .check("meeting_link", validate_meeting_link(&request.meeting_link));
    if request.title.is_empty() {
        errors.add("title", "Title is required");
    }
    errors.finish()?;

    let start = scheduling::parse_start(&request.class_date, &request.start_time)?;
    scheduling::validate_duration(request.duration_minutes)?;
    if start <= Utc::now() {
        return Err(ApiError::validation_field("start_time", "Class must start in the future"));
    }

    let student = Profile::find(&state.db, &request.student_id)
        .await?
        .filter(|p| p.role() == Role::Student)
        .ok_or_else(|| ApiError::validation_field("student_id", "Student not found"))?;
    Profile::find(&state.db, &request.teacher_id)
        .await?
        .filter(|p| p.role() == Role::Teacher)
        .ok_or_else(|| ApiError::validation_field("teacher_id", "Teacher not found"))?;

    if student.student_status.as_deref() == Some(StudentStatus::Denied.as_str()) {
        return Err(ApiError::conflict("Student was not accepted after the trial period"));
    }

    ensure_no_overlap(
        &state,
        &request.teacher_id,
        &request.student_id,
        start,
        request.duration_minutes,
        None,
    )
    .await?;

    let class = ClassSession::create(&state.db, &request).await?;

    tracing::info!(
        class_id = %class.id,
        teacher_id = %class.teacher_id,
        student_id = %class.student_id,
        starts_at = %start,
        "Class scheduled"
    );
    publish_class_event(&state, &class, ChangeAction::Insert);
    notify(
        &state,
        &class.student_id,
        "class_scheduled",
        "حصة جديدة",
        &format!("تمت جدولة حصة \"{}\" في {} الساعة {} (UTC)", class.title, class.class_date, class.start_time),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(ClassResponse::at(class, Utc::now()))))
}

pub async fn list_classes(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<ClassResponse>>, ApiError> {
    let now = Utc::now();
    let classes = ClassSession::list_for(&state.db, &user.id, user.role).await?;
    Ok(Json(classes.into_iter().map(|c| ClassResponse::at(c, now)).collect()))
}

pub async fn get_class(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ClassResponse>, ApiError> {
    let class = load_class(&state, &user, &id).await?;
    Ok(Json(ClassResponse::at(class, Utc::now())))
}

#[derive(Debug, Serialize)]
pub struct JoinStatusResponse {
    pub class_id: String,
    pub status: ClassStatus,
    #[serde(flatten)]
    pub join: JoinState,
    /// Present only while joining is allowed
    pub meeting_link: Option<String>,
    pub server_time: String,
    pub poll_after_seconds: u64,
}

/// Server-side join window check
pub async fn join_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<JoinStatusResponse>, ApiError> {
    let class = load_class(&state, &user, &id).await?;
    let now = Utc::now();
    let start = class.starts_at()?;
    let status = class.effective_status(now);

    // Recorded outcomes are final whatever the clock says
    let join = match status {
        ClassStatus::Cancelled | ClassStatus::NoShow | ClassStatus::Completed => JoinState::Ended,
        _ => scheduling::join_state(
            now,
            start,
            class.duration_minutes,
            state.config.scheduling.join_window_minutes,
        ),
    };

    let meeting_link = match join {
        JoinState::Joinable => class.meeting_link.clone(),
        _ => None,
    };

    Ok(Json(JoinStatusResponse {
        class_id: class.id,
        status,
        join,
        meeting_link,
        server_time: now.to_rfc3339(),
        poll_after_seconds: state.config.scheduling.status_poll_seconds,
    }))
}

pub async fn reschedule_class(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(request): Json<RescheduleRequest>,
) -> Result<Json<ClassResponse>, ApiError> {
    let class = load_class(&state, &user, &id).await?;
    require_class_teacher(&user, &class)?;

    let now = Utc::now();
    if class.effective_status(now) != ClassStatus::Scheduled {
        return Err(ApiError::conflict("Only classes that have not started can be rescheduled"));
    }

    let duration = request.duration_minutes.unwrap_or(class.duration_minutes);
    let start = scheduling::parse_start(&request.class_date, &request.start_time)?;
    scheduling::validate_duration(duration)?;
    if start <= now {
        return Err(ApiError::validation_field("start_time", "Class must start in the future"));
    }

    ensure_no_overlap(&state, &class.teacher_id, &class.student_id, start, duration, Some(&class.id)).await?;

    let moved = ClassSession::reschedule(&state.db, &id, &request.class_date, &request.start_time, duration).await?;

    tracing::info!(
        class_id = %id,
        from = %format!("{} {}", class.class_date, class.start_time),
        to = %start,
        "Class rescheduled"
    );
    publish_class_event(&state, &moved, ChangeAction::Update);
    notify(
        &state,
        &moved.student_id,
        "class_rescheduled",
        "تغيير موعد الحصة",
        &format!("تم نقل حصة \"{}\" إلى {} الساعة {} (UTC)", moved.title, moved.class_date, moved.start_time),
    )
    .await?;

    Ok(Json(ClassResponse::at(moved, now)))
}

/// Apply a cancelled / no-show outcome after checking timing
async fn record_outcome(
    state: &AppState,
    class: &ClassSession,
    outcome: ClassStatus,
) -> Result<ClassSession, ApiError> {
    if !ClassSession::set_outcome(&state.db, &class.id, outcome).await? {
        return Err(ApiError::conflict(format!(
            "Class already has a final status: {}",
            class.status
        )));
    }

    let updated = ClassSession::find(&state.db, &class.id)
        .await?
        .ok_or_else(|| ApiError::not_found("Class not found"))?;
    tracing::info!(class_id = %class.id, outcome = outcome.as_str(), "Class outcome recorded");
    publish_class_event(state, &updated, ChangeAction::Update);
    Ok(updated)
}

/// Cancel a class before it starts. Either participant may cancel.
pub async fn cancel_class(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ClassResponse>, ApiError> {
    let class = load_class(&state, &user, &id).await?;
    let now = Utc::now();
    if class.starts_at()? <= now {
        return Err(ApiError::conflict("Classes can only be cancelled before they start"));
    }

    let updated = record_outcome(&state, &class, ClassStatus::Cancelled).await?;

    let other = if user.id == class.student_id {
        &class.teacher_id
    } else {
        &class.student_id
    };
    notify(
        &state,
        other,
        "class_cancelled",
        "إلغاء حصة",
        &format!("تم إلغاء حصة \"{}\" المقررة في {} الساعة {} (UTC)", class.title, class.class_date, class.start_time),
    )
    .await?;

    Ok(Json(ClassResponse::at(updated, now)))
}

/// Mark that the student did not attend. No credits are consumed.
pub async fn mark_no_show(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ClassResponse>, ApiError> {
    let class = load_class(&state, &user, &id).await?;
    require_class_teacher(&user, &class)?;

    let now = Utc::now();
    if class.starts_at()? > now {
        return Err(ApiError::conflict("A class cannot be marked as no-show before it starts"));
    }

    let updated = record_outcome(&state, &class, ClassStatus::NoShow).await?;
    Ok(Json(ClassResponse::at(updated, now)))
}

#[derive(Debug, Serialize)]
pub struct CompleteClassResponse {
    pub class: ClassResponse,
    pub credits_deducted: f64,
    pub balance: Option<f64>,
}

/// Mark a class completed and consume its credit cost in one transaction.
/// Trial students are not charged.
pub async fn complete_class(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<CompleteClassResponse>, ApiError> {
    let class = load_class(&state, &user, &id).await?;
    require_class_teacher(&user, &class)?;

    let now = Utc::now();
    if class.starts_at()? > now {
        return Err(ApiError::conflict("A class cannot be completed before it starts"));
    }

    let student = Profile::find(&state.db, &class.student_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))?;
    let is_trial = student.student_status.as_deref() == Some(StudentStatus::Trial.as_str());
    let cost = scheduling::credit_cost(class.duration_minutes);

    let mut tx = state.db.begin().await?;

    if !ClassSession::set_outcome_in(&mut tx, &class.id, ClassStatus::Completed).await? {
        return Err(ApiError::conflict(format!(
            "Class already has a final status: {}",
            class.status
        )));
    }

    let deduction = if is_trial {
        None
    } else {
        let change = CreditChange::new(&class.student_id, cost, format!("Class: {}", class.title))
            .teacher(&class.teacher_id)
            .class(&class.id)
            .idempotency_key(format!("class:{}", class.id));
        Some(credits::apply_in(&mut tx, CreditKind::Deduct, change, state.config.credits.max_amount).await?)
    };

    tx.commit().await?;

    tracing::info!(
        class_id = %class.id,
        student_id = %class.student_id,
        credits = deduction.as_ref().map(|t| t.amount).unwrap_or(0.0),
        trial = is_trial,
        "Class completed"
    );

    let updated = ClassSession::find(&state.db, &class.id)
        .await?
        .ok_or_else(|| ApiError::not_found("Class not found"))?;
    publish_class_event(&state, &updated, ChangeAction::Update);
    if let Some(transaction) = &deduction {
        state.events.publish(
            ChangeEvent::new("credit_transactions", ChangeAction::Insert, &transaction.id)
                .to([&class.student_id]),
        );
    }

    Ok(Json(CompleteClassResponse {
        class: ClassResponse::at(updated, now),
        credits_deducted: deduction.as_ref().map(|t| t.amount).unwrap_or(0.0),
        balance: deduction.map(|t| t.balance_after),
    }))
}
