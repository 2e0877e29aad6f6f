//! Packages, coupons, purchases, invoices and teacher settlements.

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
    sanitize_optional, sanitize_text, validate_coupon_code, validate_date, validate_price,
    validate_uuid,
};
use crate::commerce;
use crate::credits::CreditAmount;
use crate::db::{
    Coupon, CouponQuote, CreateCouponRequest, CreatePackageRequest, CreateSettlementRequest,
    Invoice, InvoiceResponse, Notification, Package, Payment, PurchaseRequest,
    PurchaseResponse, Role, Settlement, UpdatePackageRequest, ValidateCouponRequest,
};
use crate::events::{ChangeAction, ChangeEvent};
use crate::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct PackageListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

/// Filter for admin listings; ignored for everyone else
#[derive(Debug, Deserialize, Default)]
pub struct OwnerQuery {
    pub student_id: Option<String>,
    pub teacher_id: Option<String>,
}

fn validate_package_name(name: &str) -> Result<(), String> {
    let len = name.chars().count();
    if !(2..=100).contains(&len) {
        return Err("Package name must be 2-100 characters".to_string());
    }
    Ok(())
}

pub async fn list_packages(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<PackageListQuery>,
) -> Result<Json<Vec<Package>>, ApiError> {
    let active_only = !(user.is_admin() && query.include_inactive);
    Ok(Json(Package::list(&state.db, active_only).await?))
}

pub async fn create_package(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<CreatePackageRequest>,
) -> Result<(StatusCode, Json<Package>), ApiError> {
    user.require_role(&[Role::Admin])?;

    let request = CreatePackageRequest {
        name: sanitize_text(&request.name),
        description: sanitize_optional(request.description.as_deref()),
        currency: request.currency.map(|c| c.trim().to_uppercase()),
        ..request
    };

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("name", validate_package_name(&request.name))
        .check("price", validate_price(request.price))
        .check(
            "credits",
            CreditAmount::parse(request.credits, f64::MAX)
                .map(|_| ())
                .map_err(|e| e.to_string()),
        );
    if let Some(currency) = &request.currency {
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            errors.add("currency", "Currency must be a 3-letter ISO code");
        }
    }
    errors.finish()?;

    let package = Package::create(&state.db, &request, &state.config.credits.currency).await?;
    tracing::info!(package_id = %package.id, credits = package.credits, price = package.price, "Package created");
    state
        .events
        .publish(ChangeEvent::new("packages", ChangeAction::Insert, &package.id));

    Ok((StatusCode::CREATED, Json(package)))
}

pub async fn update_package(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(request): Json<UpdatePackageRequest>,
) -> Result<Json<Package>, ApiError> {
    user.require_role(&[Role::Admin])?;

    let request = UpdatePackageRequest {
        name: request.name.as_deref().map(sanitize_text),
        description: sanitize_optional(request.description.as_deref()),
        ..request
    };

    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &request.name {
        errors.check("name", validate_package_name(name));
    }
    if let Some(price) = request.price {
        errors.check("price", validate_price(price));
    }
    errors.finish()?;

    let package = Package::update(&state.db, &id, &request)
        .await?
        .ok_or_else(|| ApiError::not_found("Package not found"))?;

    state
        .events
        .publish(ChangeEvent::new("packages", ChangeAction::Update, &id));
    Ok(Json(package))
}

pub async fn list_coupons(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<Coupon>>, ApiError> {
    user.require_role(&[Role::Admin])?;
    Ok(Json(Coupon::list(&state.db).await?))
}

pub async fn create_coupon(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<CreateCouponRequest>,
) -> Result<(StatusCode, Json<Coupon>), ApiError> {
    user.require_role(&[Role::Admin])?;

    let code = Coupon::normalize_code(&request.code);
    let mut errors = ValidationErrorBuilder::new();
    errors.check("code", validate_coupon_code(&code));

    match (request.discount_percent, request.discount_amount) {
        (Some(percent), None) if percent > 0.0 && percent <= 100.0 => {}
        (Some(_), None) => {
            errors.add("discount_percent", "Percentage must be above 0 and at most 100");
        }
        (None, Some(amount)) if amount.is_finite() && amount > 0.0 => {}
        (None, Some(_)) => {
            errors.add("discount_amount", "Amount must be greater than zero");
        }
        _ => {
            errors.add("discount", "Set exactly one of discount_percent or discount_amount");
        }
    }
    if matches!(request.max_uses, Some(n) if n < 1) {
        errors.add("max_uses", "max_uses must be at least 1");
    }
    if let Some(expires_at) = &request.expires_at {
        if chrono::DateTime::parse_from_rfc3339(expires_at).is_err() {
            errors.add("expires_at", "expires_at must be an RFC 3339 timestamp");
        }
    }
    errors.finish()?;

    if Coupon::find_by_code(&state.db, &code).await?.is_some() {
        return Err(ApiError::conflict("A coupon with this code already exists"));
    }

    let coupon = Coupon::create(&state.db, &request).await?;
    tracing::info!(coupon_id = %coupon.id, code = %coupon.code, "Coupon created");
    Ok((StatusCode::CREATED, Json(coupon)))
}

pub async fn deactivate_coupon(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    user.require_role(&[Role::Admin])?;
    if !Coupon::deactivate(&state.db, &id).await? {
        return Err(ApiError::not_found("Coupon not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Price a package with a coupon without using it
pub async fn validate_coupon(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Json(request): Json<ValidateCouponRequest>,
) -> Result<Json<CouponQuote>, ApiError> {
    let package = commerce::active_package(&state.db, &request.package_id).await?;
    let (subtotal, discount, coupon) =
        commerce::quote(&state.db, &package, Some(&request.code)).await?;

    Ok(Json(CouponQuote {
        code: coupon.map(|c| c.code).unwrap_or_default(),
        subtotal,
        discount,
        total: crate::db::round_money(subtotal - discount),
        currency: package.currency,
    }))
}

/// Buy a package. Students only, for themselves.
pub async fn purchase(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<PurchaseResponse>), ApiError> {
    user.require_role(&[Role::Student])?;
    validate_uuid(&request.package_id, "package_id")
        .map_err(|e| ApiError::validation_field("package_id", e))?;

    let replay = match request.idempotency_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => Payment::find_by_idempotency_key(&state.db, key)
            .await?
            .is_some(),
        _ => false,
    };

    let response = commerce::purchase(&state.db, &user.id, &request).await?;
    if replay {
        return Ok((StatusCode::OK, Json(response)));
    }

    let body = format!(
        "تم استلام دفعتك بقيمة {} {}. أضيف {} رصيد إلى حسابك.",
        response.payment.amount, response.payment.currency, response.credits_added
    );
    let notification =
        Notification::create(&state.db, &user.id, "purchase_completed", "تمت عملية الشراء", &body)
            .await?;

    for (table, id) in [
        ("invoices", &response.invoice.id),
        ("payments", &response.payment.id),
        ("notifications", &notification.id),
    ] {
        state
            .events
            .publish(ChangeEvent::new(table, ChangeAction::Insert, id).to([&user.id]));
    }
    state.events.publish(
        ChangeEvent::new("credit_balances", ChangeAction::Update, &user.id).to([&user.id]),
    );

    Ok((StatusCode::CREATED, Json(response)))
}

/// Students see their own invoices; admins see all, optionally per student
pub async fn list_invoices(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Vec<Invoice>>, ApiError> {
    user.require_role(&[Role::Student, Role::Admin])?;
    let student_id = if user.is_admin() {
        query.student_id
    } else {
        Some(user.id.clone())
    };
    Ok(Json(Invoice::list(&state.db, student_id.as_deref()).await?))
}

pub async fn get_invoice(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    let invoice = Invoice::find(&state.db, &id)
        .await?
        .filter(|i| user.is_admin() || i.student_id == user.id)
        .ok_or_else(|| ApiError::not_found("Invoice not found"))?;
    let items = Invoice::items(&state.db, &invoice.id).await?;
    Ok(Json(InvoiceResponse { invoice, items }))
}

pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Vec<Payment>>, ApiError> {
    user.require_role(&[Role::Student, Role::Admin])?;
    let student_id = if user.is_admin() {
        query.student_id
    } else {
        Some(user.id.clone())
    };
    Ok(Json(Payment::list(&state.db, student_id.as_deref()).await?))
}

pub async fn generate_settlement(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<CreateSettlementRequest>,
) -> Result<(StatusCode, Json<Settlement>), ApiError> {
    user.require_role(&[Role::Admin])?;

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("teacher_id", validate_uuid(&request.teacher_id, "teacher_id"))
        .check("period_start", validate_date(&request.period_start, "period_start"))
        .check("period_end", validate_date(&request.period_end, "period_end"));
    if let Some(rate) = request.rate_per_credit {
        errors.check("rate_per_credit", validate_price(rate));
    }
    errors.finish()?;

    let settlement = commerce::generate_settlement(&state.db, &request, &state.config.credits).await?;

    let body = format!(
        "تم إعداد تسوية الفترة من {} إلى {} بقيمة {} {}.",
        settlement.period_start, settlement.period_end, settlement.total_amount, settlement.currency
    );
    let notification = Notification::create(
        &state.db,
        &settlement.teacher_id,
        "settlement_created",
        "تسوية جديدة",
        &body,
    )
    .await?;

    state.events.publish(
        ChangeEvent::new("settlements", ChangeAction::Insert, &settlement.id)
            .to([&settlement.teacher_id]),
    );
    state.events.publish(
        ChangeEvent::new("notifications", ChangeAction::Insert, &notification.id)
            .to([&settlement.teacher_id]),
    );

    Ok((StatusCode::CREATED, Json(settlement)))
}

/// Teachers see their own settlements; admins see all, optionally per teacher
pub async fn list_settlements(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Vec<Settlement>>, ApiError> {
    user.require_role(&[Role::Teacher, Role::Admin])?;
    let teacher_id = if user.is_admin() {
        query.teacher_id
    } else {
        Some(user.id.clone())
    };
    Ok(Json(Settlement::list(&state.db, teacher_id.as_deref()).await?))
}

pub async fn mark_settlement_paid(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Settlement>, ApiError> {
    user.require_role(&[Role::Admin])?;

    let settlement = Settlement::find(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Settlement not found"))?;
    if !Settlement::mark_paid(&state.db, &id).await? {
        return Err(ApiError::conflict("Settlement is already paid"));
    }

    state.events.publish(
        ChangeEvent::new("settlements", ChangeAction::Update, &id).to([&settlement.teacher_id]),
    );

    tracing::info!(settlement_id = %id, paid_by = %user.id, "Settlement marked paid");
    let settlement = Settlement::find(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Settlement not found"))?;
    Ok(Json(settlement))
}
