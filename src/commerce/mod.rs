//! Purchases and teacher settlements.
//!
//! A purchase writes the invoice, its item, the payment, the coupon use and
//! the credit grant in one transaction. The credit grant is keyed by
//! `payment:<payment id>` and the payment by the client's idempotency key, so
//! a retried purchase returns the first result without charging twice.

use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

use crate::config::CreditsConfig;
use crate::credits::{self, CreditChange, CreditError};
use crate::db::{
    now_rfc3339, round_money, Coupon, CouponRejection, CreateSettlementRequest, CreditBalance,
    CreditKind, CreditTransaction, Invoice, Package, Payment, Profile, PurchaseRequest,
    PurchaseResponse, Role, Settlement,
};

/// Payment methods recorded on a purchase
pub const PAYMENT_METHODS: [&str; 4] = ["card", "bank_transfer", "cash", "wallet"];

#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("Package not found")]
    PackageNotFound,

    #[error("Package is no longer offered")]
    PackageInactive,

    #[error("Coupon not found")]
    CouponNotFound,

    #[error("Coupon cannot be used: {0}")]
    CouponRejected(&'static str),

    #[error("Unsupported payment method '{0}'")]
    InvalidPaymentMethod(String),

    #[error("Idempotency key was already used for a different purchase")]
    IdempotencyConflict,

    #[error("Teacher not found")]
    TeacherNotFound,

    #[error("Invalid settlement period: {0}")]
    InvalidPeriod(String),

    #[error(transparent)]
    Credit(#[from] CreditError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<CouponRejection> for CommerceError {
    fn from(rejection: CouponRejection) -> Self {
        CommerceError::CouponRejected(match rejection {
            CouponRejection::Inactive => "inactive",
            CouponRejection::Expired => "expired",
            CouponRejection::Exhausted => "usage limit reached",
        })
    }
}

/// Price a package with an optional coupon: (subtotal, discount, coupon)
pub async fn quote(
    db: &SqlitePool,
    package: &Package,
    coupon_code: Option<&str>,
) -> Result<(f64, f64, Option<Coupon>), CommerceError> {
    let subtotal = round_money(package.price);

    let Some(code) = coupon_code.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok((subtotal, 0.0, None));
    };

    let coupon = Coupon::find_by_code(db, code)
        .await?
        .ok_or(CommerceError::CouponNotFound)?;
    coupon.check_usable(Utc::now())?;

    let discount = coupon.discount_for(subtotal);
    Ok((subtotal, discount, Some(coupon)))
}

pub async fn active_package(db: &SqlitePool, package_id: &str) -> Result<Package, CommerceError> {
    let package = Package::find(db, package_id)
        .await?
        .ok_or(CommerceError::PackageNotFound)?;
    if !package.is_active() {
        return Err(CommerceError::PackageInactive);
    }
    Ok(package)
}

/// Rebuild the response of a purchase that already went through
async fn replay(db: &SqlitePool, student_id: &str, payment: Payment) -> Result<PurchaseResponse, CommerceError> {
    if payment.student_id != student_id {
        return Err(CommerceError::IdempotencyConflict);
    }

    let invoice = Invoice::find(db, &payment.invoice_id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    let grant = CreditTransaction::find_by_idempotency_key(db, &format!("payment:{}", payment.id)).await?;
    let balance = CreditBalance::get(db, student_id).await?;

    info!(payment_id = %payment.id, "Replayed purchase");
    Ok(PurchaseResponse {
        invoice,
        payment,
        credits_added: grant.map(|t| t.amount).unwrap_or(0.0),
        balance,
    })
}

/// Buy a credit package for `student_id`
pub async fn purchase(
    db: &SqlitePool,
    student_id: &str,
    request: &PurchaseRequest,
) -> Result<PurchaseResponse, CommerceError> {
    let idempotency_key = request
        .idempotency_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());

    if let Some(key) = idempotency_key {
        if let Some(payment) = Payment::find_by_idempotency_key(db, key).await? {
            return replay(db, student_id, payment).await;
        }
    }

    let method = request.payment_method.trim().to_lowercase();
    if !PAYMENT_METHODS.contains(&method.as_str()) {
        return Err(CommerceError::InvalidPaymentMethod(request.payment_method.clone()));
    }

    let package = active_package(db, &request.package_id).await?;
    let (subtotal, discount, coupon) = quote(db, &package, request.coupon_code.as_deref()).await?;
    let total = round_money(subtotal - discount);

    let now = now_rfc3339();
    let invoice_id = uuid::Uuid::new_v4().to_string();
    let payment_id = uuid::Uuid::new_v4().to_string();

    let mut tx = db.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO invoices (id, student_id, subtotal, discount, total, currency, status, coupon_code, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 'paid', ?, ?, ?)
        "#,
    )
    .bind(&invoice_id)
    .bind(student_id)
    .bind(subtotal)
    .bind(discount)
    .bind(total)
    .bind(&package.currency)
    .bind(coupon.as_ref().map(|c| c.code.as_str()))
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO invoice_items (id, invoice_id, package_id, description, quantity, unit_price)
        VALUES (?, ?, ?, ?, 1, ?)
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&invoice_id)
    .bind(&package.id)
    .bind(format!("{} ({} credits)", package.name, package.credits))
    .bind(subtotal)
    .execute(&mut *tx)
    .await?;

    if let Some(coupon) = &coupon {
        // Counted under the same limit check so concurrent buyers cannot overshoot
        let used = sqlx::query(
            r#"
            UPDATE coupons SET used_count = used_count + 1
            WHERE id = ? AND active = 1 AND (max_uses IS NULL OR used_count < max_uses)
            "#,
        )
        .bind(&coupon.id)
        .execute(&mut *tx)
        .await?;
        if used.rows_affected() == 0 {
            return Err(CouponRejection::Exhausted.into());
        }
    }

    sqlx::query(
        r#"
        INSERT INTO payments (id, invoice_id, student_id, amount, currency, method, provider_ref, status, idempotency_key, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'succeeded', ?, ?)
        "#,
    )
    .bind(&payment_id)
    .bind(&invoice_id)
    .bind(student_id)
    .bind(total)
    .bind(&package.currency)
    .bind(&method)
    .bind(&request.provider_ref)
    .bind(idempotency_key)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    // Package sizes are admin-defined, so the per-change cap does not apply
    let change = CreditChange::new(student_id, package.credits, format!("Purchase: {}", package.name))
        .idempotency_key(format!("payment:{}", payment_id));
    let grant = credits::apply_in(&mut tx, CreditKind::Add, change, f64::MAX).await?;

    let invoice: Invoice = sqlx::query_as("SELECT * FROM invoices WHERE id = ?")
        .bind(&invoice_id)
        .fetch_one(&mut *tx)
        .await?;
    let payment: Payment = sqlx::query_as("SELECT * FROM payments WHERE id = ?")
        .bind(&payment_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(
        student_id = %student_id,
        package_id = %package.id,
        payment_id = %payment_id,
        total,
        currency = %package.currency,
        credits = grant.amount,
        "Package purchased"
    );

    Ok(PurchaseResponse {
        invoice,
        payment,
        credits_added: grant.amount,
        balance: grant.balance_after,
    })
}

fn parse_day(value: &str, field: &str) -> Result<NaiveDate, CommerceError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| CommerceError::InvalidPeriod(format!("{} must be YYYY-MM-DD", field)))
}

/// Build and store a settlement covering the inclusive day range
pub async fn generate_settlement(
    db: &SqlitePool,
    request: &CreateSettlementRequest,
    credits_config: &CreditsConfig,
) -> Result<Settlement, CommerceError> {
    let start = parse_day(&request.period_start, "period_start")?;
    let end = parse_day(&request.period_end, "period_end")?;
    if end < start {
        return Err(CommerceError::InvalidPeriod(
            "period_end is before period_start".to_string(),
        ));
    }

    let rate = request.rate_per_credit.unwrap_or(credits_config.teacher_rate_per_credit);
    if !rate.is_finite() || rate < 0.0 {
        return Err(CommerceError::InvalidPeriod("rate_per_credit must be zero or more".to_string()));
    }

    Profile::find(db, &request.teacher_id)
        .await?
        .filter(|p| p.role() == Role::Teacher)
        .ok_or(CommerceError::TeacherNotFound)?;

    let from = start.and_time(NaiveTime::MIN).and_utc().to_rfc3339();
    let to = (end + Duration::days(1)).and_time(NaiveTime::MIN).and_utc().to_rfc3339();

    let (classes_count, credits_delivered) =
        CreditTransaction::consumed_for_teacher(db, &request.teacher_id, &from, &to).await?;

    let settlement = Settlement {
        id: uuid::Uuid::new_v4().to_string(),
        teacher_id: request.teacher_id.clone(),
        period_start: request.period_start.clone(),
        period_end: request.period_end.clone(),
        classes_count,
        credits_delivered,
        rate_per_credit: rate,
        total_amount: round_money(credits_delivered * rate),
        currency: credits_config.currency.clone(),
        status: "pending".to_string(),
        paid_at: None,
        created_at: now_rfc3339(),
    };
    Settlement::insert(db, &settlement).await?;

    info!(
        settlement_id = %settlement.id,
        teacher_id = %settlement.teacher_id,
        classes = classes_count,
        credits = credits_delivered,
        total = settlement.total_amount,
        "Settlement generated"
    );
    Ok(settlement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::profile::fixtures::profile;
    use crate::db::{
        init_memory, ClassSession, CreateClassRequest, CreateCouponRequest, CreatePackageRequest, DbPool,
    };

    async fn package(db: &DbPool) -> Package {
        Package::create(
            db,
            &CreatePackageRequest {
                name: "Starter".to_string(),
                description: None,
                credits: 8.0,
                price: 400.0,
                currency: None,
            },
            "SAR",
        )
        .await
        .unwrap()
    }

    fn purchase_request(package_id: &str, coupon: Option<&str>, key: Option<&str>) -> PurchaseRequest {
        PurchaseRequest {
            package_id: package_id.to_string(),
            coupon_code: coupon.map(str::to_string),
            payment_method: "card".to_string(),
            provider_ref: Some("ch_123".to_string()),
            idempotency_key: key.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_purchase_with_coupon_adds_credits() {
        let db = init_memory().await.unwrap();
        let student = profile(&db, "s@example.com", Role::Student).await;
        let pkg = package(&db).await;
        Coupon::create(
            &db,
            &CreateCouponRequest {
                code: "eid25".to_string(),
                discount_percent: Some(25.0),
                discount_amount: None,
                max_uses: Some(1),
                expires_at: None,
            },
        )
        .await
        .unwrap();

        let result = purchase(&db, &student.id, &purchase_request(&pkg.id, Some("EID25"), None))
            .await
            .unwrap();

        assert_eq!(result.invoice.subtotal, 400.0);
        assert_eq!(result.invoice.discount, 100.0);
        assert_eq!(result.invoice.total, 300.0);
        assert_eq!(result.payment.amount, 300.0);
        assert_eq!(result.credits_added, 8.0);
        assert_eq!(CreditBalance::get(&db, &student.id).await.unwrap(), 8.0);
        assert_eq!(Invoice::items(&db, &result.invoice.id).await.unwrap().len(), 1);

        // Single-use coupon is now exhausted
        let again = purchase(&db, &student.id, &purchase_request(&pkg.id, Some("eid25"), None)).await;
        assert!(matches!(again, Err(CommerceError::CouponRejected(_))));
    }

    #[tokio::test]
    async fn test_purchase_retry_charges_once() {
        let db = init_memory().await.unwrap();
        let student = profile(&db, "s@example.com", Role::Student).await;
        let other = profile(&db, "o@example.com", Role::Student).await;
        let pkg = package(&db).await;
        let request = purchase_request(&pkg.id, None, Some("checkout-1"));

        let first = purchase(&db, &student.id, &request).await.unwrap();
        let second = purchase(&db, &student.id, &request).await.unwrap();

        assert_eq!(first.payment.id, second.payment.id);
        assert_eq!(second.credits_added, 8.0);
        assert_eq!(CreditBalance::get(&db, &student.id).await.unwrap(), 8.0);
        assert_eq!(Payment::list(&db, Some(&student.id)).await.unwrap().len(), 1);

        let stolen = purchase(&db, &other.id, &request).await;
        assert!(matches!(stolen, Err(CommerceError::IdempotencyConflict)));
    }

    #[tokio::test]
    async fn test_purchase_rejects_unknown_method() {
        let db = init_memory().await.unwrap();
        let student = profile(&db, "s@example.com", Role::Student).await;
        let pkg = package(&db).await;
        let mut request = purchase_request(&pkg.id, None, None);
        request.payment_method = "barter".to_string();

        let result = purchase(&db, &student.id, &request).await;
        assert!(matches!(result, Err(CommerceError::InvalidPaymentMethod(_))));
        assert!(Invoice::list(&db, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settlement_counts_consumed_credits() {
        let db = init_memory().await.unwrap();
        let student = profile(&db, "s@example.com", Role::Student).await;
        let teacher = profile(&db, "t@example.com", Role::Teacher).await;
        let config = CreditsConfig::default();

        credits::add_credits(&db, CreditChange::new(&student.id, 10.0, "grant"), 100.0)
            .await
            .unwrap();
        for amount in [1.0, 1.5] {
            let class = ClassSession::create(
                &db,
                &CreateClassRequest {
                    student_id: student.id.clone(),
                    teacher_id: teacher.id.clone(),
                    title: "Nahw".to_string(),
                    class_date: "2025-03-10".to_string(),
                    start_time: "16:00".to_string(),
                    duration_minutes: 60,
                    meeting_link: None,
                    notes: None,
                },
            )
            .await
            .unwrap();
            credits::deduct_credits(
                &db,
                CreditChange::new(&student.id, amount, "class")
                    .teacher(&teacher.id)
                    .class(&class.id),
                100.0,
            )
            .await
            .unwrap();
        }

        let today = Utc::now().date_naive();
        let request = CreateSettlementRequest {
            teacher_id: teacher.id.clone(),
            period_start: (today - Duration::days(1)).format("%Y-%m-%d").to_string(),
            period_end: today.format("%Y-%m-%d").to_string(),
            rate_per_credit: Some(40.0),
        };

        let settlement = generate_settlement(&db, &request, &config).await.unwrap();
        assert_eq!(settlement.classes_count, 2);
        assert_eq!(settlement.credits_delivered, 2.5);
        assert_eq!(settlement.total_amount, 100.0);
        assert_eq!(settlement.status, "pending");

        // Same period twice violates the unique constraint
        assert!(matches!(
            generate_settlement(&db, &request, &config).await,
            Err(CommerceError::Database(_))
        ));

        assert!(Settlement::mark_paid(&db, &settlement.id).await.unwrap());
        assert!(!Settlement::mark_paid(&db, &settlement.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_settlement_rejects_reversed_period() {
        let db = init_memory().await.unwrap();
        let teacher = profile(&db, "t@example.com", Role::Teacher).await;
        let request = CreateSettlementRequest {
            teacher_id: teacher.id,
            period_start: "2025-03-10".to_string(),
            period_end: "2025-03-01".to_string(),
            rate_per_credit: None,
        };
        assert!(matches!(
            generate_settlement(&db, &request, &CreditsConfig::default()).await,
            Err(CommerceError::InvalidPeriod(_))
        ));
    }
}
