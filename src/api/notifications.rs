//! In-app notification endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::ApiError;
use crate::db::{Notification, NotificationQuery};
use crate::events::{ChangeAction, ChangeEvent};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct MarkAllReadResponse {
    pub updated: u64,
}

/// List the caller's notifications, newest first
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let notifications = Notification::list_for_user(&state.db, &user.id, query.unread).await?;
    Ok(Json(notifications))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    // Other users' notifications look the same as missing ones
    if !Notification::mark_read(&state.db, &id, &user.id).await? {
        return Err(ApiError::not_found("Notification not found"));
    }

    state
        .events
        .publish(ChangeEvent::new("notifications", ChangeAction::Update, &id).to([&user.id]));
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<MarkAllReadResponse>, ApiError> {
    let updated = Notification::mark_all_read(&state.db, &user.id).await?;
    if updated > 0 {
        state
            .events
            .publish(ChangeEvent::new("notifications", ChangeAction::Update, &user.id).to([&user.id]));
    }
    Ok(Json(MarkAllReadResponse { updated }))
}
