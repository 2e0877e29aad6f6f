use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    normalize_email, sanitize_optional, sanitize_text, validate_email, validate_full_name,
    validate_locale, validate_password, validate_phone,
};
use crate::crypto::hash_password;
use crate::db::{
    CreateProfileRequest, NewProfile, Notification, Profile, ProfileResponse, Role, TrialDecision,
    TrialDecisionRequest, UpdateProfileRequest,
};
use crate::events::{ChangeAction, ChangeEvent};
use crate::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct ProfileListQuery {
    pub role: Option<Role>,
}

/// List profiles. Admins see everyone; teachers see students only.
pub async fn list_profiles(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<ProfileListQuery>,
) -> Result<Json<Vec<ProfileResponse>>, ApiError> {
    user.require_role(&[Role::Teacher, Role::Admin])?;

    let role = match user.role {
        Role::Admin => query.role,
        _ => Some(Role::Student),
    };

    let profiles = Profile::list(&state.db, role).await?;
    Ok(Json(profiles.into_iter().map(ProfileResponse::from).collect()))
}

/// Admin-only account creation (teachers, admins, or students on their behalf)
pub async fn create_profile(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<CreateProfileRequest>,
) -> Result<(StatusCode, Json<ProfileResponse>), ApiError> {
    user.require_role(&[Role::Admin])?;

    let email = normalize_email(&request.email);
    let full_name = sanitize_text(&request.full_name);
    let phone = sanitize_optional(request.phone.as_deref());
    let locale = request.locale.unwrap_or_else(|| "ar".to_string());

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("email", validate_email(&email))
        .check("password", validate_password(&request.password))
        .check("full_name", validate_full_name(&full_name))
        .check("phone", validate_phone(&phone))
        .check("locale", validate_locale(&locale));
    errors.finish()?;

    if Profile::find_by_email(&state.db, &email).await?.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let password_hash = hash_password(&request.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;

    let profile = Profile::create(
        &state.db,
        NewProfile {
            email,
            password_hash,
            full_name,
            phone,
            role: request.role,
            locale,
        },
    )
    .await?;

    tracing::info!(profile_id = %profile.id, role = %profile.role, created_by = %user.id, "Profile created");
    state
        .events
        .publish(ChangeEvent::new("profiles", ChangeAction::Insert, &profile.id).to([&profile.id]));

    Ok((StatusCode::CREATED, Json(ProfileResponse::from(profile))))
}

pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let profile = Profile::find(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;

    // Teachers may look at students; everyone else only at themselves
    let teacher_viewing_student = user.role == Role::Teacher && profile.role() == Role::Student;
    if !teacher_viewing_student {
        user.require_self_or_admin(&id)?;
    }

    Ok(Json(ProfileResponse::from(profile)))
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    user.require_self_or_admin(&id)?;

    let request = UpdateProfileRequest {
        full_name: request.full_name.as_deref().map(sanitize_text),
        phone: request.phone.as_deref().map(sanitize_text),
        locale: request.locale,
    };

    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &request.full_name {
        errors.check("full_name", validate_full_name(name));
    }
    errors.check("phone", validate_phone(&request.phone));
    if let Some(locale) = &request.locale {
        errors.check("locale", validate_locale(locale));
    }
    errors.finish()?;

    let profile = Profile::update(&state.db, &id, &request)
        .await?
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;

    state
        .events
        .publish(ChangeEvent::new("profiles", ChangeAction::Update, &id).to([&id]));

    Ok(Json(ProfileResponse::from(profile)))
}

/// Delete a profile and, through the schema's cascades, everything it owns
pub async fn delete_profile(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    user.require_role(&[Role::Admin])?;
    if user.id == id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }

    if !Profile::delete(&state.db, &id).await? {
        return Err(ApiError::not_found("Profile not found"));
    }

    tracing::info!(profile_id = %id, deleted_by = %user.id, "Profile deleted");
    state
        .events
        .publish(ChangeEvent::new("profiles", ChangeAction::Delete, &id).to([&id]));

    Ok(StatusCode::NO_CONTENT)
}

/// Approve or deny a trial student
pub async fn decide_trial(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(request): Json<TrialDecisionRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    user.require_role(&[Role::Teacher, Role::Admin])?;

    let status = request.decision.resulting_status();
    if !Profile::decide_trial(&state.db, &id, status).await? {
        return match Profile::find(&state.db, &id).await? {
            None => Err(ApiError::not_found("Profile not found")),
            Some(_) => Err(ApiError::conflict("Profile is not a student in trial")),
        };
    }

    let (title, body) = match request.decision {
        TrialDecision::Approve => (
            "تم قبولك طالباً منتظماً",
            "انتهت الفترة التجريبية ويمكنك الآن حجز الحصص بشكل منتظم.",
        ),
        TrialDecision::Deny => (
            "نتيجة الفترة التجريبية",
            "نعتذر، لم يتم قبول طلبك بعد الفترة التجريبية.",
        ),
    };
    let notification = Notification::create(&state.db, &id, "trial_decision", title, body).await?;

    tracing::info!(
        profile_id = %id,
        decided_by = %user.id,
        status = status.as_str(),
        "Trial decision recorded"
    );
    state
        .events
        .publish(ChangeEvent::new("profiles", ChangeAction::Update, &id).to([&id]));
    state.events.publish(
        ChangeEvent::new("notifications", ChangeAction::Insert, &notification.id).to([&id]),
    );

    let profile = Profile::find(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;

    Ok(Json(ProfileResponse::from(profile)))
}
