mod classes;
mod commerce;
mod credits;
mod lms;
mod notifications;
mod profiles;
mod public;
mod realtime;
mod reviews;

pub mod auth;
pub mod error;
pub mod rate_limit;
pub mod validation;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public, stricter rate limit)
    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/password-reset", post(auth::request_password_reset))
        .route("/password-reset/confirm", post(auth::confirm_password_reset))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    // Protected API routes
    let api_routes = Router::new()
        .route("/auth/me", get(auth::me))
        // Profiles
        .route("/profiles", get(profiles::list_profiles).post(profiles::create_profile))
        .route(
            "/profiles/:id",
            get(profiles::get_profile)
                .put(profiles::update_profile)
                .delete(profiles::delete_profile),
        )
        .route("/profiles/:id/trial", post(profiles::decide_trial))
        // Classes
        .route("/classes", get(classes::list_classes).post(classes::create_class))
        .route("/classes/:id", get(classes::get_class))
        .route("/classes/:id/join-status", get(classes::join_status))
        .route("/classes/:id/reschedule", post(classes::reschedule_class))
        .route("/classes/:id/cancel", post(classes::cancel_class))
        .route("/classes/:id/no-show", post(classes::mark_no_show))
        .route("/classes/:id/complete", post(classes::complete_class))
        // Credits
        .route("/credits/:student_id", get(credits::get_summary))
        .route("/credits/:student_id/history", get(credits::get_history))
        .route("/credits/:student_id/add", post(credits::add_credits))
        .route("/credits/:student_id/deduct", post(credits::deduct_credits))
        // Billing
        .route("/packages", get(commerce::list_packages).post(commerce::create_package))
        .route("/packages/:id", put(commerce::update_package))
        .route("/coupons", get(commerce::list_coupons).post(commerce::create_coupon))
        .route("/coupons/validate", post(commerce::validate_coupon))
        .route("/coupons/:id", delete(commerce::deactivate_coupon))
        .route("/purchases", post(commerce::purchase))
        .route("/invoices", get(commerce::list_invoices))
        .route("/invoices/:id", get(commerce::get_invoice))
        .route("/payments", get(commerce::list_payments))
        .route(
            "/settlements",
            get(commerce::list_settlements).post(commerce::generate_settlement),
        )
        .route("/settlements/:id/pay", post(commerce::mark_settlement_paid))
        // Notifications
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/:id/read", post(notifications::mark_read))
        // Reviews
        .route("/reviews", get(reviews::list_reviews).post(reviews::create_review))
        // LMS pass-through
        .route("/lms/users", get(lms::list_users))
        .route("/lms/users/:id", get(lms::get_user))
        .route("/lms/courses", get(lms::list_courses))
        .route("/lms/payments", get(lms::list_payments))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        // Realtime handles its own auth via query param
        .route("/realtime", get(realtime::realtime_ws))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    let public_routes = Router::new()
        .route("/structured-data", get(public::structured_data))
        .route("/packages", get(public::list_packages));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .nest("/public", public_routes)
        .layer(cors_layer(&state.config.server.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for the dashboard; an empty origin list allows any origin
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Liveness plus a database ping; 503 when the database is unreachable
async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database = crate::startup::check_database_connectivity(&state.db).await;
    let (status, label) = if database.passed {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(json!({
            "status": label,
            "database": database.passed,
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::profile::fixtures::profile;
    use crate::db::{init_memory, ClassSession, CreateClassRequest, Profile, Role, StudentStatus};
    use axum::{body::Body, http::Request};
    use chrono::{DateTime, Duration, Utc};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn test_state() -> Arc<AppState> {
        let db = init_memory().await.unwrap();
        let mut config = Config::default();
        config.rate_limit.enabled = false;
        Arc::new(AppState::new(config, db).unwrap())
    }

    async fn send(
        router: Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    fn token_for(state: &AppState, id: &str, role: Role) -> String {
        state.tokens.issue(id, role).unwrap().0
    }

    const MEETING_LINK: &str = "https://meet.example.com/a";

    /// `hour:minute` UTC, `days_ahead` days from today
    fn slot(days_ahead: i64, hour: u32, minute: u32) -> DateTime<Utc> {
        (Utc::now() + Duration::days(days_ahead))
            .date_naive()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
            .and_utc()
    }

    fn class_body(student_id: &str, teacher_id: &str, start: DateTime<Utc>, minutes: i64) -> Value {
        json!({
            "student_id": student_id,
            "teacher_id": teacher_id,
            "title": "قراءة",
            "class_date": start.format("%Y-%m-%d").to_string(),
            "start_time": start.format("%H:%M").to_string(),
            "duration_minutes": minutes,
            "meeting_link": MEETING_LINK,
        })
    }

    /// Insert a class directly, bypassing the future-start rule of the API
    async fn insert_class(
        state: &AppState,
        student_id: &str,
        teacher_id: &str,
        start: DateTime<Utc>,
        minutes: i64,
    ) -> ClassSession {
        ClassSession::create(
            &state.db,
            &CreateClassRequest {
                student_id: student_id.to_string(),
                teacher_id: teacher_id.to_string(),
                title: "Tajweed".to_string(),
                class_date: start.format("%Y-%m-%d").to_string(),
                start_time: start.format("%H:%M").to_string(),
                duration_minutes: minutes,
                meeting_link: Some(MEETING_LINK.to_string()),
                notes: None,
            },
        )
        .await
        .unwrap()
    }

    async fn started_class(state: &AppState, student_id: &str, teacher_id: &str, minutes_ago: i64, minutes: i64) -> ClassSession {
        insert_class(state, student_id, teacher_id, Utc::now() - Duration::minutes(minutes_ago), minutes).await
    }

    #[tokio::test]
    async fn test_health() {
        let state = test_state().await;
        let (status, body) = send(create_router(state), "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_protected_route_requires_token() {
        let state = test_state().await;
        let (status, body) = send(create_router(state), "GET", "/api/classes", None, None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "unauthorized");
        assert_eq!(body["error"]["category"], "auth");
        // User-facing message is Arabic, detail stays English
        assert!(body["error"]["message"].as_str().unwrap().contains("تسجيل الدخول"));
    }

    #[tokio::test]
    async fn test_signup_then_me() {
        let state = test_state().await;
        let router = create_router(state);

        let (status, body) = send(
            router.clone(),
            "POST",
            "/api/auth/signup",
            None,
            Some(json!({
                "email": "Student@Example.com",
                "password": "secret123",
                "full_name": "<b>ليلى</b> حسن",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["role"], "student");
        assert_eq!(body["user"]["student_status"], "trial");
        assert_eq!(body["user"]["full_name"], "ليلى حسن");

        let token = body["token"].as_str().unwrap().to_string();
        let (status, me) = send(router.clone(), "GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["email"], "student@example.com");

        let (status, _) = send(
            router,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": "student@example.com", "password": "wrong-pass1" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_signup_validation_errors() {
        let state = test_state().await;
        let (status, body) = send(
            create_router(state),
            "POST",
            "/api/auth/signup",
            None,
            Some(json!({ "email": "nope", "password": "short", "full_name": "x" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["category"], "validation");
    }

    #[tokio::test]
    async fn test_student_cannot_create_package() {
        let state = test_state().await;
        let student = crate::db::profile::fixtures::profile(&state.db, "s@example.com", Role::Student).await;
        let token = token_for(&state, &student.id, Role::Student);

        let (status, body) = send(
            create_router(state),
            "POST",
            "/api/packages",
            Some(&token),
            Some(json!({ "name": "Basic", "credits": 4.0, "price": 200.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["category"], "auth");
    }

    #[tokio::test]
    async fn test_purchase_flow_over_http() {
        let state = test_state().await;
        let admin = crate::db::profile::fixtures::profile(&state.db, "a@example.com", Role::Admin).await;
        let student = crate::db::profile::fixtures::profile(&state.db, "s@example.com", Role::Student).await;
        let admin_token = token_for(&state, &admin.id, Role::Admin);
        let student_token = token_for(&state, &student.id, Role::Student);
        let router = create_router(state);

        let (status, package) = send(
            router.clone(),
            "POST",
            "/api/packages",
            Some(&admin_token),
            Some(json!({ "name": "Basic", "credits": 4.0, "price": 200.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let purchase = json!({
            "package_id": package["id"],
            "payment_method": "card",
            "idempotency_key": "order-77",
        });
        let (status, first) =
            send(router.clone(), "POST", "/api/purchases", Some(&student_token), Some(purchase.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["balance"], 4.0);

        let (status, second) =
            send(router.clone(), "POST", "/api/purchases", Some(&student_token), Some(purchase)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["payment"]["id"], first["payment"]["id"]);

        let uri = format!("/api/credits/{}", student.id);
        let (status, summary) = send(router.clone(), "GET", &uri, Some(&student_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["balance"], 4.0);

        let (status, invoices) = send(router, "GET", "/api/invoices", Some(&student_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(invoices.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_bookings_are_rejected() {
        let state = test_state().await;
        let teacher = profile(&state.db, "t@example.com", Role::Teacher).await;
        let other_teacher = profile(&state.db, "t2@example.com", Role::Teacher).await;
        let first = profile(&state.db, "s1@example.com", Role::Student).await;
        let second = profile(&state.db, "s2@example.com", Role::Student).await;
        let token = token_for(&state, &teacher.id, Role::Teacher);
        let other_token = token_for(&state, &other_teacher.id, Role::Teacher);
        let router = create_router(state);

        let book = |token: String, body: Value| {
            let router = router.clone();
            async move { send(router, "POST", "/api/classes", Some(&token), Some(body)).await }
        };

        let (status, class) = book(token.clone(), class_body(&first.id, &teacher.id, slot(2, 16, 0), 60)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(class["status"], "scheduled");
        assert_eq!(class["credit_cost"], 1.0);

        // Same teacher
        let (status, body) = book(token.clone(), class_body(&second.id, &teacher.id, slot(2, 16, 30), 30)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["category"], "conflict");

        // Same student
        let (status, _) =
            book(other_token.clone(), class_body(&first.id, &other_teacher.id, slot(2, 16, 30), 30)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        // Back-to-back is fine
        let (status, _) = book(token.clone(), class_body(&second.id, &teacher.id, slot(2, 17, 0), 60)).await;
        assert_eq!(status, StatusCode::CREATED);

        // 23:30 for 90 minutes runs into the next day
        let (status, _) = book(token.clone(), class_body(&first.id, &teacher.id, slot(2, 23, 30), 90)).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = book(token.clone(), class_body(&second.id, &teacher.id, slot(3, 0, 30), 30)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = book(token, class_body(&second.id, &teacher.id, slot(3, 1, 0), 30)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_reschedule_cancel_and_outcome_timing() {
        let state = test_state().await;
        let teacher = profile(&state.db, "t@example.com", Role::Teacher).await;
        let student = profile(&state.db, "s@example.com", Role::Student).await;
        let teacher_token = token_for(&state, &teacher.id, Role::Teacher);
        let student_token = token_for(&state, &student.id, Role::Student);
        let started = started_class(&state, &student.id, &teacher.id, 5, 60).await;
        let router = create_router(state);

        let (status, class) = send(
            router.clone(),
            "POST",
            "/api/classes",
            Some(&teacher_token),
            Some(class_body(&student.id, &teacher.id, slot(2, 10, 0), 60)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = class["id"].as_str().unwrap().to_string();

        let new_slot = slot(2, 12, 0);
        let moved = json!({
            "class_date": new_slot.format("%Y-%m-%d").to_string(),
            "start_time": "12:00",
        });
        let uri = format!("/api/classes/{}/reschedule", id);
        let (status, _) = send(router.clone(), "POST", &uri, Some(&student_token), Some(moved.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = send(router.clone(), "POST", &uri, Some(&teacher_token), Some(moved)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["start_time"], "12:00");

        // Outcomes that need the class to have started
        for action in ["no-show", "complete"] {
            let uri = format!("/api/classes/{}/{}", id, action);
            let (status, _) = send(router.clone(), "POST", &uri, Some(&teacher_token), None).await;
            assert_eq!(status, StatusCode::CONFLICT, "{} before start", action);
        }

        let uri = format!("/api/classes/{}/cancel", id);
        let (status, body) = send(router.clone(), "POST", &uri, Some(&student_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "cancelled");
        let (status, _) = send(router.clone(), "POST", &uri, Some(&student_token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        // The started class can no longer be cancelled or moved
        let uri = format!("/api/classes/{}/cancel", started.id);
        let (status, _) = send(router.clone(), "POST", &uri, Some(&student_token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let uri = format!("/api/classes/{}/no-show", started.id);
        let (status, _) = send(router.clone(), "POST", &uri, Some(&student_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = send(router, "POST", &uri, Some(&teacher_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "no_show");
    }

    #[tokio::test]
    async fn test_join_status_gates_meeting_link() {
        let state = test_state().await;
        let teacher = profile(&state.db, "t@example.com", Role::Teacher).await;
        let student = profile(&state.db, "s@example.com", Role::Student).await;
        let outsider = profile(&state.db, "o@example.com", Role::Student).await;
        let teacher_token = token_for(&state, &teacher.id, Role::Teacher);
        let student_token = token_for(&state, &student.id, Role::Student);
        let outsider_token = token_for(&state, &outsider.id, Role::Student);
        let upcoming = insert_class(&state, &student.id, &teacher.id, slot(1, 10, 0), 60).await;
        let started = started_class(&state, &student.id, &teacher.id, 5, 60).await;
        let router = create_router(state);

        let uri = format!("/api/classes/{}/join-status", upcoming.id);
        let (status, body) = send(router.clone(), "GET", &uri, Some(&student_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "too_early");
        assert!(body["meeting_link"].is_null());
        assert_eq!(body["poll_after_seconds"], 10);

        let uri = format!("/api/classes/{}/join-status", started.id);
        let (_, body) = send(router.clone(), "GET", &uri, Some(&student_token), None).await;
        assert_eq!(body["status"], "in_progress");
        assert_eq!(body["state"], "joinable");
        assert_eq!(body["meeting_link"], MEETING_LINK);

        let (status, _) = send(router.clone(), "GET", &uri, Some(&outsider_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Completed early: the class is over even though the clock says otherwise
        let complete = format!("/api/classes/{}/complete", started.id);
        let (status, _) = send(router.clone(), "POST", &complete, Some(&teacher_token), None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(router, "GET", &uri, Some(&student_token), None).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["state"], "ended");
        assert!(body["meeting_link"].is_null());
    }

    #[tokio::test]
    async fn test_completion_charges_class_once() {
        let state = test_state().await;
        let teacher = profile(&state.db, "t@example.com", Role::Teacher).await;
        let student = profile(&state.db, "s@example.com", Role::Student).await;
        assert!(Profile::decide_trial(&state.db, &student.id, StudentStatus::Regular).await.unwrap());
        let teacher_token = token_for(&state, &teacher.id, Role::Teacher);
        let student_token = token_for(&state, &student.id, Role::Student);
        let finished = started_class(&state, &student.id, &teacher.id, 100, 90).await;
        let running = started_class(&state, &student.id, &teacher.id, 10, 60).await;
        let router = create_router(state);

        let uri = format!("/api/credits/{}/add", student.id);
        let (status, _) = send(router.clone(), "POST", &uri, Some(&teacher_token), Some(json!({ "amount": 2.0 }))).await;
        assert_eq!(status, StatusCode::CREATED);

        let complete = format!("/api/classes/{}/complete", finished.id);
        let (status, body) = send(router.clone(), "POST", &complete, Some(&teacher_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["credits_deducted"], 1.5);
        assert_eq!(body["balance"], 0.5);
        assert_eq!(body["class"]["status"], "completed");

        let (status, _) = send(router.clone(), "POST", &complete, Some(&teacher_token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let history = format!("/api/credits/{}/history", student.id);
        let (_, body) = send(router.clone(), "GET", &history, Some(&student_token), None).await;
        let deductions: Vec<&Value> = body
            .as_array()
            .unwrap()
            .iter()
            .filter(|t| t["kind"] == "deduct")
            .collect();
        assert_eq!(deductions.len(), 1);
        assert_eq!(deductions[0]["idempotency_key"], format!("class:{}", finished.id));

        // 1 credit needed, 0.5 left: nothing changes
        let complete = format!("/api/classes/{}/complete", running.id);
        let (status, body) = send(router.clone(), "POST", &complete, Some(&teacher_token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "insufficient_credits");

        let uri = format!("/api/classes/{}", running.id);
        let (_, body) = send(router.clone(), "GET", &uri, Some(&student_token), None).await;
        assert_eq!(body["status"], "in_progress");

        let uri = format!("/api/credits/{}", student.id);
        let (_, body) = send(router, "GET", &uri, Some(&student_token), None).await;
        assert_eq!(body["balance"], 0.5);
    }

    #[tokio::test]
    async fn test_trial_student_is_not_charged() {
        let state = test_state().await;
        let teacher = profile(&state.db, "t@example.com", Role::Teacher).await;
        let student = profile(&state.db, "s@example.com", Role::Student).await;
        let teacher_token = token_for(&state, &teacher.id, Role::Teacher);
        let class = started_class(&state, &student.id, &teacher.id, 70, 60).await;
        let router = create_router(state);

        let uri = format!("/api/classes/{}/complete", class.id);
        let (status, body) = send(router.clone(), "POST", &uri, Some(&teacher_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["credits_deducted"], 0.0);
        assert!(body["balance"].is_null());

        let uri = format!("/api/credits/{}/history", student.id);
        let (_, body) = send(router, "GET", &uri, Some(&teacher_token), None).await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manual_credit_changes() {
        let state = test_state().await;
        let admin = profile(&state.db, "a@example.com", Role::Admin).await;
        let teacher = profile(&state.db, "t@example.com", Role::Teacher).await;
        let student = profile(&state.db, "s@example.com", Role::Student).await;
        let admin_token = token_for(&state, &admin.id, Role::Admin);
        let teacher_token = token_for(&state, &teacher.id, Role::Teacher);
        let student_token = token_for(&state, &student.id, Role::Student);
        let router = create_router(state);

        let add = format!("/api/credits/{}/add", student.id);
        let grant = json!({ "amount": 2.5, "idempotency_key": "grant-1" });
        let (status, first) = send(router.clone(), "POST", &add, Some(&teacher_token), Some(grant.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["teacher_id"], teacher.id.as_str());

        let (status, again) = send(router.clone(), "POST", &add, Some(&teacher_token), Some(grant)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["id"], first["id"]);

        let (status, body) =
            send(router.clone(), "POST", &add, Some(&teacher_token), Some(json!({ "amount": 0.3 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["category"], "validation");

        let (status, _) = send(router.clone(), "POST", &add, Some(&student_token), Some(json!({ "amount": 1.0 }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let deduct = format!("/api/credits/{}/deduct", student.id);
        let (status, _) =
            send(router.clone(), "POST", &deduct, Some(&teacher_token), Some(json!({ "amount": 1.0 }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) =
            send(router.clone(), "POST", &deduct, Some(&admin_token), Some(json!({ "amount": 1.0 }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["balance_after"], 1.5);

        let (status, body) =
            send(router.clone(), "POST", &deduct, Some(&admin_token), Some(json!({ "amount": 2.0 }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "insufficient_credits");

        let summary = format!("/api/credits/{}", student.id);
        let (_, body) = send(router, "GET", &summary, Some(&student_token), None).await;
        assert_eq!(body["balance"], 1.5);
    }

    #[tokio::test]
    async fn test_trial_decision_is_final() {
        let state = test_state().await;
        let teacher = profile(&state.db, "t@example.com", Role::Teacher).await;
        let student = profile(&state.db, "s@example.com", Role::Student).await;
        let teacher_token = token_for(&state, &teacher.id, Role::Teacher);
        let student_token = token_for(&state, &student.id, Role::Student);
        let router = create_router(state);

        let uri = format!("/api/profiles/{}/trial", student.id);
        let (status, _) = send(
            router.clone(),
            "POST",
            &uri,
            Some(&student_token),
            Some(json!({ "decision": "approve" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            router.clone(),
            "POST",
            &uri,
            Some(&teacher_token),
            Some(json!({ "decision": "approve" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["student_status"], "regular");

        let (status, body) =
            send(router.clone(), "POST", &uri, Some(&teacher_token), Some(json!({ "decision": "deny" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["category"], "conflict");

        let uri = format!("/api/profiles/{}/trial", teacher.id);
        let (status, _) =
            send(router.clone(), "POST", &uri, Some(&teacher_token), Some(json!({ "decision": "deny" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let uri = format!("/api/profiles/{}/trial", uuid::Uuid::new_v4());
        let (status, _) =
            send(router.clone(), "POST", &uri, Some(&teacher_token), Some(json!({ "decision": "deny" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, notes) = send(router, "GET", "/api/notifications", Some(&student_token), None).await;
        let notes = notes.as_array().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0]["kind"], "trial_decision");
    }

    #[tokio::test]
    async fn test_one_review_per_completed_class() {
        let state = test_state().await;
        let teacher = profile(&state.db, "t@example.com", Role::Teacher).await;
        let student = profile(&state.db, "s@example.com", Role::Student).await;
        let teacher_token = token_for(&state, &teacher.id, Role::Teacher);
        let student_token = token_for(&state, &student.id, Role::Student);
        let upcoming = insert_class(&state, &student.id, &teacher.id, slot(1, 10, 0), 60).await;
        let done = started_class(&state, &student.id, &teacher.id, 30, 60).await;
        let router = create_router(state);

        let uri = format!("/api/classes/{}/complete", done.id);
        let (status, _) = send(router.clone(), "POST", &uri, Some(&teacher_token), None).await;
        assert_eq!(status, StatusCode::OK);

        let review = |class_id: &str, rating: i64| {
            json!({ "class_id": class_id, "rating": rating, "comment": "<i>ممتاز</i> جداً" })
        };

        let (status, _) = send(router.clone(), "POST", "/api/reviews", Some(&student_token), Some(review(&done.id, 6))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            send(router.clone(), "POST", "/api/reviews", Some(&student_token), Some(review(&upcoming.id, 5))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) =
            send(router.clone(), "POST", "/api/reviews", Some(&teacher_token), Some(review(&done.id, 5))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) =
            send(router.clone(), "POST", "/api/reviews", Some(&student_token), Some(review(&done.id, 5))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["comment"], "ممتاز جداً");

        let (status, _) =
            send(router.clone(), "POST", "/api/reviews", Some(&student_token), Some(review(&done.id, 4))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let uri = format!("/api/reviews?teacher_id={}", teacher.id);
        let (status, body) = send(router, "GET", &uri, Some(&student_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["average_rating"], 5.0);
    }

    #[tokio::test]
    async fn test_notifications_read_flow() {
        let state = test_state().await;
        let teacher = profile(&state.db, "t@example.com", Role::Teacher).await;
        let student = profile(&state.db, "s@example.com", Role::Student).await;
        let teacher_token = token_for(&state, &teacher.id, Role::Teacher);
        let student_token = token_for(&state, &student.id, Role::Student);
        let router = create_router(state);

        for hour in [10, 12] {
            let (status, _) = send(
                router.clone(),
                "POST",
                "/api/classes",
                Some(&teacher_token),
                Some(class_body(&student.id, &teacher.id, slot(2, hour, 0), 60)),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (_, unread) = send(router.clone(), "GET", "/api/notifications?unread=true", Some(&student_token), None).await;
        let unread = unread.as_array().unwrap().clone();
        assert_eq!(unread.len(), 2);
        assert_eq!(unread[0]["kind"], "class_scheduled");

        // Someone else's notification looks missing
        let uri = format!("/api/notifications/{}/read", unread[0]["id"].as_str().unwrap());
        let (status, _) = send(router.clone(), "POST", &uri, Some(&teacher_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(router.clone(), "POST", &uri, Some(&student_token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = send(router.clone(), "POST", "/api/notifications/read-all", Some(&student_token), None).await;
        assert_eq!(body["updated"], 1);

        let (_, unread) = send(router, "GET", "/api/notifications?unread=true", Some(&student_token), None).await;
        assert!(unread.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lms_not_configured() {
        let state = test_state().await;
        let admin = crate::db::profile::fixtures::profile(&state.db, "a@example.com", Role::Admin).await;
        let token = token_for(&state, &admin.id, Role::Admin);

        let (status, body) = send(create_router(state), "GET", "/api/lms/courses", Some(&token), None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "service_unavailable");
    }

    #[tokio::test]
    async fn test_public_structured_data() {
        let state = test_state().await;
        let (status, body) = send(create_router(state), "GET", "/public/structured-data", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["@type"], "EducationalOrganization");
    }

    #[tokio::test]
    async fn test_cors_allows_configured_origin() {
        let db = init_memory().await.unwrap();
        let mut config = Config::default();
        config.server.cors_origins = vec!["https://app.example.com".to_string(), "bad\norigin".to_string()];
        let router = create_router(Arc::new(AppState::new(config, db).unwrap()));

        let request = Request::builder()
            .method("OPTIONS")
            .uri("/api/classes")
            .header("Origin", "https://app.example.com")
            .header("Access-Control-Request-Method", "GET")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "https://app.example.com"
        );
    }
}
