//! Admin pass-through to the external LMS.

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::ApiError;
use crate::db::Role;
use crate::lms::{LmsClient, LmsCourse, LmsError, LmsPayment, LmsUser};
use crate::AppState;

fn client(state: &AppState, user: &AuthUser) -> Result<LmsClient, ApiError> {
    user.require_role(&[Role::Admin])?;
    state.lms.clone().ok_or_else(|| LmsError::NotConfigured.into())
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<LmsUser>>, ApiError> {
    Ok(Json(client(&state, &user)?.list_users().await?))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<LmsUser>, ApiError> {
    Ok(Json(client(&state, &user)?.get_user(id).await?))
}

pub async fn list_courses(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<LmsCourse>>, ApiError> {
    Ok(Json(client(&state, &user)?.list_courses().await?))
}

pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<LmsPayment>>, ApiError> {
    Ok(Json(client(&state, &user)?.list_payments().await?))
}
