use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::ApiError;
use super::validation::{sanitize_optional, validate_rating};
use crate::db::{
    ClassSession, CreateReviewRequest, Notification, Profile, Review, ReviewQuery, Role,
    TeacherReviewsResponse,
};
use crate::events::{ChangeAction, ChangeEvent};
use crate::scheduling::ClassStatus;
use crate::AppState;

const MAX_COMMENT_CHARS: usize = 1000;

/// A student reviews one of their completed classes, once
pub async fn create_review(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<Review>), ApiError> {
    user.require_role(&[Role::Student])?;
    validate_rating(request.rating).map_err(|e| ApiError::validation_field("rating", e))?;

    let comment = sanitize_optional(request.comment.as_deref());
    if comment.as_ref().is_some_and(|c| c.chars().count() > MAX_COMMENT_CHARS) {
        return Err(ApiError::validation_field(
            "comment",
            format!("Comment must be at most {} characters", MAX_COMMENT_CHARS),
        ));
    }

    let class = ClassSession::find(&state.db, &request.class_id)
        .await?
        .filter(|c| c.student_id == user.id)
        .ok_or_else(|| ApiError::not_found("Class not found"))?;

    if class.effective_status(Utc::now()) != ClassStatus::Completed {
        return Err(ApiError::conflict("Only completed classes can be reviewed"));
    }

    // class_id is unique, so a second review is a conflict
    let review = Review::create(
        &state.db,
        &class.id,
        &user.id,
        &class.teacher_id,
        request.rating,
        comment.as_deref(),
    )
    .await?;

    let notification = Notification::create(
        &state.db,
        &class.teacher_id,
        "review_received",
        "تقييم جديد",
        &format!("قيّم طالبك حصة \"{}\" بـ {} من 5.", class.title, review.rating),
    )
    .await?;

    tracing::info!(review_id = %review.id, class_id = %class.id, rating = review.rating, "Review submitted");
    state.events.publish(
        ChangeEvent::new("reviews", ChangeAction::Insert, &review.id)
            .to([&class.teacher_id, &user.id]),
    );
    state.events.publish(
        ChangeEvent::new("notifications", ChangeAction::Insert, &notification.id)
            .to([&class.teacher_id]),
    );

    Ok((StatusCode::CREATED, Json(review)))
}

/// Reviews and rating summary for a teacher
pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Query(query): Query<ReviewQuery>,
) -> Result<Json<TeacherReviewsResponse>, ApiError> {
    Profile::find(&state.db, &query.teacher_id)
        .await?
        .filter(|p| p.role() == Role::Teacher)
        .ok_or_else(|| ApiError::not_found("Teacher not found"))?;

    let (average, count) = Review::summary(&state.db, &query.teacher_id).await?;
    let reviews = Review::list_for_teacher(&state.db, &query.teacher_id).await?;

    Ok(Json(TeacherReviewsResponse {
        teacher_id: query.teacher_id,
        average_rating: average.map(|a| (a * 10.0).round() / 10.0),
        count,
        reviews,
    }))
}
