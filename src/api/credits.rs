use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::ApiError;
use super::validation::sanitize_optional;
use crate::credits::{self, CreditChange};
use crate::db::{
    CreditBalance, CreditChangeRequest, CreditSummaryResponse, CreditTransaction, Notification,
    Profile, Role,
};
use crate::events::{ChangeAction, ChangeEvent};
use crate::AppState;

const RECENT_TRANSACTIONS: i64 = 10;
const MAX_HISTORY: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

/// Students see their own balance; teachers and admins see any student's
async fn authorize_view(state: &AppState, user: &AuthUser, student_id: &str) -> Result<(), ApiError> {
    if user.role == Role::Student {
        user.require_self_or_admin(student_id)?;
    }
    Profile::find(&state.db, student_id)
        .await?
        .filter(|p| p.role() == Role::Student)
        .ok_or_else(|| ApiError::not_found("Student not found"))?;
    Ok(())
}

pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(student_id): Path<String>,
) -> Result<Json<CreditSummaryResponse>, ApiError> {
    authorize_view(&state, &user, &student_id).await?;

    let balance = CreditBalance::get(&state.db, &student_id).await?;
    let recent = CreditTransaction::list_for_student(&state.db, &student_id, RECENT_TRANSACTIONS).await?;

    Ok(Json(CreditSummaryResponse {
        student_id,
        balance,
        recent,
    }))
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(student_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<CreditTransaction>>, ApiError> {
    authorize_view(&state, &user, &student_id).await?;

    let limit = query.limit.clamp(1, MAX_HISTORY);
    let history = CreditTransaction::list_for_student(&state.db, &student_id, limit).await?;
    Ok(Json(history))
}

fn build_change(user: &AuthUser, student_id: &str, request: CreditChangeRequest, default_reason: &str) -> CreditChange {
    let reason = sanitize_optional(request.reason.as_deref()).unwrap_or_else(|| default_reason.to_string());
    let mut change = CreditChange::new(student_id, request.amount, reason);
    if user.role == Role::Teacher {
        change = change.teacher(&user.id);
    }
    if let Some(key) = request.idempotency_key.filter(|k| !k.trim().is_empty()) {
        // Client keys live in their own namespace next to class:/payment: keys
        change = change.idempotency_key(format!("client:{}", key.trim()));
    }
    change
}

async fn announce(state: &AppState, transaction: &CreditTransaction) -> Result<(), ApiError> {
    let (title, body) = if transaction.kind == "add" {
        (
            "تمت إضافة رصيد",
            format!("تمت إضافة {} رصيد إلى حسابك. الرصيد الحالي: {}", transaction.amount, transaction.balance_after),
        )
    } else {
        (
            "تم خصم رصيد",
            format!("تم خصم {} رصيد من حسابك. الرصيد الحالي: {}", transaction.amount, transaction.balance_after),
        )
    };
    let notification =
        Notification::create(&state.db, &transaction.student_id, "credits_changed", title, &body).await?;

    state.events.publish(
        ChangeEvent::new("credit_transactions", ChangeAction::Insert, &transaction.id)
            .to([&transaction.student_id]),
    );
    state.events.publish(
        ChangeEvent::new("notifications", ChangeAction::Insert, &notification.id)
            .to([&transaction.student_id]),
    );
    Ok(())
}

async fn already_applied(state: &AppState, change: &CreditChange) -> Result<bool, ApiError> {
    match &change.idempotency_key {
        Some(key) => Ok(CreditTransaction::find_by_idempotency_key(&state.db, key)
            .await?
            .is_some()),
        None => Ok(false),
    }
}

/// Grant credits. Teachers and admins only.
pub async fn add_credits(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(student_id): Path<String>,
    Json(request): Json<CreditChangeRequest>,
) -> Result<(StatusCode, Json<CreditTransaction>), ApiError> {
    user.require_role(&[Role::Teacher, Role::Admin])?;

    let change = build_change(&user, &student_id, request, "Manual credit grant");
    let replay = already_applied(&state, &change).await?;
    let transaction = credits::add_credits(&state.db, change, state.config.credits.max_amount).await?;

    if replay {
        return Ok((StatusCode::OK, Json(transaction)));
    }
    announce(&state, &transaction).await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

/// Remove credits by hand (corrections). Admins only.
pub async fn deduct_credits(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(student_id): Path<String>,
    Json(request): Json<CreditChangeRequest>,
) -> Result<(StatusCode, Json<CreditTransaction>), ApiError> {
    user.require_role(&[Role::Admin])?;

    let change = build_change(&user, &student_id, request, "Manual correction");
    let replay = already_applied(&state, &change).await?;
    let transaction = credits::deduct_credits(&state.db, change, state.config.credits.max_amount).await?;

    if replay {
        return Ok((StatusCode::OK, Json(transaction)));
    }
    announce(&state, &transaction).await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}
