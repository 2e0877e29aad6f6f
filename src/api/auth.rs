use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    normalize_email, sanitize_optional, sanitize_text, validate_email, validate_full_name,
    validate_locale, validate_password, validate_phone,
};
use crate::config::Config;
use crate::crypto::{generate_token, hash_password, hash_token, verify_password};
use crate::db::{
    now_rfc3339, LoginRequest, LoginResponse, NewProfile, PasswordReset, PasswordResetConfirm,
    PasswordResetRequest, Profile, ProfileResponse, Role, SignupRequest,
};
use crate::events::{ChangeAction, ChangeEvent};
use crate::{AppState, DbPool};

/// The caller resolved from a verified session token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Fail with 403 unless the caller has one of `roles`
    pub fn require_role(&self, roles: &[Role]) -> Result<(), ApiError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "This action requires one of the roles: {}",
                roles.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", ")
            )))
        }
    }

    /// Admins may act on anyone; everyone else only on themselves
    pub fn require_self_or_admin(&self, profile_id: &str) -> Result<(), ApiError> {
        if self.is_admin() || self.id == profile_id {
            Ok(())
        } else {
            Err(ApiError::forbidden("You can only access your own data"))
        }
    }
}

/// Extractor for the authenticated caller; `auth_middleware` must run first
#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// Verify a token and make sure its profile still exists
pub async fn authenticate(state: &AppState, token: &str) -> Result<AuthUser, ApiError> {
    let claims = state.tokens.verify(token)?;

    let profile = Profile::find(&state.db, &claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Account no longer exists"))?;

    Ok(AuthUser {
        id: profile.id.clone(),
        role: profile.role(),
    })
}

fn bearer_token(request: &Request<Body>) -> Option<String> {
    request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Auth middleware: verifies the bearer token and attaches `AuthUser`
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request).ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;
    let user = authenticate(&state, &token).await?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

fn issue_login(state: &AppState, profile: Profile) -> Result<LoginResponse, ApiError> {
    let (token, expires_at) = state.tokens.issue(&profile.id, profile.role())?;
    Ok(LoginResponse {
        token,
        expires_at: expires_at.to_rfc3339(),
        user: ProfileResponse::from(profile),
    })
}

/// Public signup. New accounts are students and start in trial.
pub async fn signup(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
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
            role: Role::Student,
            locale,
        },
    )
    .await?;

    tracing::info!(profile_id = %profile.id, "Student signed up");
    state
        .events
        .publish(ChangeEvent::new("profiles", ChangeAction::Insert, &profile.id).to([&profile.id]));

    let response = issue_login(&state, profile)?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let email = normalize_email(&request.email);
    let profile = Profile::find_by_email(&state.db, &email).await?;

    // Same answer for unknown email and wrong password
    let profile = match profile {
        Some(p) if verify_password(&request.password, &p.password_hash) => p,
        _ => {
            tracing::warn!(email = %email, "Failed login attempt");
            return Err(ApiError::unauthorized("Invalid credentials"));
        }
    };

    tracing::info!(profile_id = %profile.id, role = %profile.role, "Login");
    Ok(Json(issue_login(&state, profile)?))
}

/// Current caller's profile
pub async fn me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<ProfileResponse>, ApiError> {
    let profile = Profile::find(&state.db, &user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;
    Ok(Json(ProfileResponse::from(profile)))
}

/// Start a password reset. Always 202 so the endpoint does not reveal
/// which addresses have accounts.
pub async fn request_password_reset(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<StatusCode, ApiError> {
    let email = normalize_email(&request.email);
    if validate_email(&email).is_err() {
        return Ok(StatusCode::ACCEPTED);
    }

    let Some(profile) = Profile::find_by_email(&state.db, &email).await? else {
        tracing::debug!("Password reset requested for unknown email");
        return Ok(StatusCode::ACCEPTED);
    };

    let ttl = state.config.auth.reset_token_ttl_minutes;
    let token = generate_token();
    let expires_at = (chrono::Utc::now() + chrono::Duration::minutes(ttl)).to_rfc3339();
    PasswordReset::create(&state.db, &profile.id, &hash_token(&token), &expires_at).await?;

    let reset_url = format!(
        "{}/reset-password?token={}",
        state.config.server.public_url.trim_end_matches('/'),
        token
    );

    if let Err(e) = state
        .mailer
        .send_password_reset(&profile.email, &profile.full_name, &reset_url, ttl)
        .await
    {
        tracing::error!(profile_id = %profile.id, "Failed to send password reset email: {}", e);
    }

    Ok(StatusCode::ACCEPTED)
}

/// Finish a password reset with the emailed token
pub async fn confirm_password_reset(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PasswordResetConfirm>,
) -> Result<StatusCode, ApiError> {
    validate_password(&request.password).map_err(|e| ApiError::validation_field("password", e))?;

    let profile_id = PasswordReset::consume(&state.db, &hash_token(request.token.trim()), &now_rfc3339())
        .await?
        .ok_or_else(|| ApiError::bad_request("Reset link is invalid or has expired"))?;

    let password_hash = hash_password(&request.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;
    Profile::set_password_hash(&state.db, &profile_id, &password_hash).await?;

    tracing::info!(profile_id = %profile_id, "Password reset completed");
    Ok(StatusCode::NO_CONTENT)
}

/// Create the bootstrap admin from config when it does not exist yet
pub async fn ensure_admin_user(db: &DbPool, config: &Config) -> anyhow::Result<()> {
    let (Some(email), Some(password)) = (&config.auth.admin_email, &config.auth.admin_password) else {
        return Ok(());
    };

    let email = normalize_email(email);
    if Profile::find_by_email(db, &email).await?.is_some() {
        return Ok(());
    }

    let password_hash =
        hash_password(password).map_err(|e| anyhow::anyhow!("Failed to hash admin password: {}", e))?;

    Profile::create(
        db,
        NewProfile {
            email: email.clone(),
            password_hash,
            full_name: "Administrator".to_string(),
            phone: None,
            role: Role::Admin,
            locale: "ar".to_string(),
        },
    )
    .await?;

    tracing::info!(email = %email, "Created bootstrap admin account");
    Ok(())
}
