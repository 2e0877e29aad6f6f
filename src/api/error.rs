//! Unified API error handling.
//!
//! Every error leaves the server as the same JSON envelope. The `message`
//! shown to users comes from a small fixed table of Arabic messages keyed by
//! error category; the English `detail` and per-field `details` are for the
//! dashboard and logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::commerce::CommerceError;
use crate::credits::CreditError;
use crate::crypto::TokenError;
use crate::lms::LmsError;
use crate::scheduling::ScheduleError;

/// Error codes for API responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Client errors (4xx)
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    UnprocessableEntity,
    TooManyRequests,
    ValidationError,
    InsufficientCredits,

    // Server errors (5xx)
    InternalError,
    ServiceUnavailable,
    DatabaseError,
    ExternalServiceError,
}

impl ErrorCode {
    /// Get the default HTTP status code for this error code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::UnprocessableEntity => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::InsufficientCredits => StatusCode::CONFLICT,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ExternalServiceError => StatusCode::BAD_GATEWAY,
        }
    }

    /// Get the string representation of the error code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::UnprocessableEntity => "unprocessable_entity",
            ErrorCode::TooManyRequests => "too_many_requests",
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::InsufficientCredits => "insufficient_credits",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::ServiceUnavailable => "service_unavailable",
            ErrorCode::DatabaseError => "database_error",
            ErrorCode::ExternalServiceError => "external_service_error",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::Unauthorized | ErrorCode::Forbidden => ErrorCategory::Auth,
            ErrorCode::BadRequest | ErrorCode::ValidationError | ErrorCode::UnprocessableEntity => {
                ErrorCategory::Validation
            }
            ErrorCode::Conflict | ErrorCode::InsufficientCredits => ErrorCategory::Conflict,
            ErrorCode::ServiceUnavailable | ErrorCode::ExternalServiceError => ErrorCategory::Network,
            ErrorCode::InternalError | ErrorCode::DatabaseError => ErrorCategory::Server,
            ErrorCode::NotFound | ErrorCode::TooManyRequests => ErrorCategory::Unknown,
        }
    }
}

/// The fixed set of user-facing error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Auth,
    Validation,
    Conflict,
    Server,
    Unknown,
}

impl ErrorCategory {
    /// Arabic message shown to the user
    pub fn message_ar(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "تعذر الاتصال بالخادم. يرجى التحقق من اتصالك بالإنترنت والمحاولة مرة أخرى.",
            ErrorCategory::Auth => "انتهت صلاحية الجلسة أو ليس لديك صلاحية. يرجى تسجيل الدخول مرة أخرى.",
            ErrorCategory::Validation => "البيانات المدخلة غير صحيحة. يرجى مراجعتها والمحاولة مرة أخرى.",
            ErrorCategory::Conflict => "تعذر إتمام العملية بسبب تعارض مع بيانات موجودة.",
            ErrorCategory::Server => "حدث خطأ في الخادم. يرجى المحاولة لاحقاً.",
            ErrorCategory::Unknown => "حدث خطأ غير متوقع. يرجى المحاولة مرة أخرى.",
        }
    }
}

/// The inner error object in the response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: String,
    pub category: ErrorCategory,
    /// User-facing Arabic message
    pub message: String,
    /// English description for developers
    pub detail: String,
    /// Optional additional details (e.g., validation errors per field)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

/// Additional error details
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetails {
    /// Field-level validation errors
    ValidationErrors(HashMap<String, Vec<String>>),
    /// Generic key-value details
    Generic(HashMap<String, serde_json::Value>),
}

/// The full error response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Unified API error type
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    status: StatusCode,
    message: String,
    details: Option<ErrorDetails>,
}

impl ApiError {
    /// Create a new API error with a specific code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code(),
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Add details to the error
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// Add validation errors as details
    pub fn with_validation_errors(mut self, errors: HashMap<String, Vec<String>>) -> Self {
        self.details = Some(ErrorDetails::ValidationErrors(errors));
        self
    }

    /// Bad request error (400)
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// Unauthorized error (401) - authentication required
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Forbidden error (403) - authenticated but not allowed
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    /// Not found error (404)
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Conflict error (409) - resource already exists or state conflict
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    /// Validation error (400) with field-level details
    pub fn validation(errors: HashMap<String, Vec<String>>) -> Self {
        let message = if errors.len() == 1 {
            errors
                .values()
                .next()
                .and_then(|v| v.first())
                .cloned()
                .unwrap_or_else(|| "Validation failed".to_string())
        } else {
            format!("Validation failed for {} fields", errors.len())
        };

        Self::new(ErrorCode::ValidationError, message).with_validation_errors(errors)
    }

    /// Single field validation error
    pub fn validation_field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.to_string(), vec![message.into()]);
        Self::validation(errors)
    }

    /// Internal server error (500)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Database error (500)
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Upstream service failure (502)
    pub fn external(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExternalServiceError, message)
    }

    /// Service unavailable error (503)
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    /// Too many requests error (429)
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TooManyRequests, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let category = self.code.category();
        let response = ErrorResponse {
            error: ErrorBody {
                code: self.code.as_str().to_string(),
                category,
                message: category.message_ar().to_string(),
                detail: self.message,
                details: self.details,
            },
        };

        (self.status, Json(response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ApiError {}

// -------------------------------------------------------------------------
// Conversion implementations for common error types
// -------------------------------------------------------------------------

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {}", err);

        match &err {
            sqlx::Error::RowNotFound => ApiError::not_found("Resource not found"),
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                if msg.contains("UNIQUE constraint failed") {
                    ApiError::conflict("A resource with this identifier already exists")
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    ApiError::bad_request("Referenced resource does not exist")
                } else if msg.contains("CHECK constraint failed") {
                    ApiError::bad_request("Value violates a data constraint")
                } else {
                    ApiError::database("A database error occurred")
                }
            }
            _ => ApiError::database("A database error occurred"),
        }
    }
}

impl From<CreditError> for ApiError {
    fn from(err: CreditError) -> Self {
        match err {
            CreditError::NotPositive | CreditError::NotHalfStep | CreditError::ExceedsMax(_) => {
                ApiError::validation_field("amount", err.to_string())
            }
            CreditError::InsufficientBalance { balance, requested } => {
                let mut details = HashMap::new();
                details.insert("balance".to_string(), serde_json::json!(balance));
                details.insert("requested".to_string(), serde_json::json!(requested));
                ApiError::new(ErrorCode::InsufficientCredits, err.to_string())
                    .with_details(ErrorDetails::Generic(details))
            }
            CreditError::StudentNotFound => ApiError::not_found(err.to_string()),
            CreditError::NotAStudent => ApiError::bad_request(err.to_string()),
            CreditError::IdempotencyConflict => ApiError::conflict(err.to_string()),
            CreditError::Database(e) => ApiError::from(e),
        }
    }
}

impl From<CommerceError> for ApiError {
    fn from(err: CommerceError) -> Self {
        match err {
            CommerceError::PackageNotFound
            | CommerceError::CouponNotFound
            | CommerceError::TeacherNotFound => ApiError::not_found(err.to_string()),
            CommerceError::PackageInactive | CommerceError::IdempotencyConflict => {
                ApiError::conflict(err.to_string())
            }
            CommerceError::CouponRejected(_) => ApiError::validation_field("coupon_code", err.to_string()),
            CommerceError::InvalidPaymentMethod(_) => {
                ApiError::validation_field("payment_method", err.to_string())
            }
            CommerceError::InvalidPeriod(_) => ApiError::validation_field("period", err.to_string()),
            CommerceError::Credit(e) => ApiError::from(e),
            CommerceError::Database(e) => ApiError::from(e),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired | TokenError::Invalid => ApiError::unauthorized(err.to_string()),
            TokenError::Signing(_) => {
                tracing::error!("Token signing failed: {}", err);
                ApiError::internal("Failed to issue session token")
            }
        }
    }
}

impl From<ScheduleError> for ApiError {
    fn from(err: ScheduleError) -> Self {
        let field = match err {
            ScheduleError::InvalidDate(_) => "class_date",
            ScheduleError::InvalidTime(_) => "start_time",
            ScheduleError::InvalidDuration(_) => "duration_minutes",
        };
        ApiError::validation_field(field, err.to_string())
    }
}

impl From<LmsError> for ApiError {
    fn from(err: LmsError) -> Self {
        tracing::warn!("LMS request failed: {}", err);
        match err {
            LmsError::NotConfigured => ApiError::service_unavailable(err.to_string()),
            LmsError::NotFound(_) => ApiError::not_found(err.to_string()),
            LmsError::Unauthorized | LmsError::Status { .. } | LmsError::Transport(_) | LmsError::Decode(_) => {
                ApiError::external(err.to_string())
            }
        }
    }
}

// -------------------------------------------------------------------------
// Builder for validation errors (integrates with the validation module)
// -------------------------------------------------------------------------

/// Builder for collecting multiple validation errors
#[derive(Debug, Default)]
pub struct ValidationErrorBuilder {
    errors: HashMap<String, Vec<String>>,
}

impl ValidationErrorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validation error for a field
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    /// Record the error of a `validate_*` result, if any
    pub fn check(&mut self, field: &str, result: Result<(), String>) -> &mut Self {
        if let Err(message) = result {
            self.add(field, message);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Build the ApiError if there are any errors
    pub fn build(self) -> Option<ApiError> {
        if self.errors.is_empty() {
            None
        } else {
            Some(ApiError::validation(self.errors))
        }
    }

    /// Return Ok(()) if no errors, or Err(ApiError) if there are errors
    pub fn finish(self) -> Result<(), ApiError> {
        match self.build() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_codes() {
        assert_eq!(ErrorCode::BadRequest.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::Conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::InsufficientCredits.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::ExternalServiceError.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_every_code_maps_to_a_category() {
        assert_eq!(ErrorCode::Unauthorized.category(), ErrorCategory::Auth);
        assert_eq!(ErrorCode::ValidationError.category(), ErrorCategory::Validation);
        assert_eq!(ErrorCode::InsufficientCredits.category(), ErrorCategory::Conflict);
        assert_eq!(ErrorCode::ExternalServiceError.category(), ErrorCategory::Network);
        assert_eq!(ErrorCode::DatabaseError.category(), ErrorCategory::Server);
        assert_eq!(ErrorCode::NotFound.category(), ErrorCategory::Unknown);
    }

    #[test]
    fn test_validation_error_single_field() {
        let err = ApiError::validation_field("email", "Invalid email format");
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert!(err.message.contains("Invalid email format"));
    }

    #[test]
    fn test_validation_error_builder() {
        let mut builder = ValidationErrorBuilder::new();
        builder.add("full_name", "Name is required");
        builder.check("email", Err("Invalid email format".to_string()));
        builder.check("phone", Ok(()));
        builder.add("full_name", "Name is too short");

        let err = builder.build().unwrap();
        assert_eq!(err.code, ErrorCode::ValidationError);

        if let Some(ErrorDetails::ValidationErrors(errors)) = &err.details {
            assert_eq!(errors.get("full_name").unwrap().len(), 2);
            assert_eq!(errors.get("email").unwrap().len(), 1);
            assert!(!errors.contains_key("phone"));
        } else {
            panic!("Expected ValidationErrors details");
        }
    }

    #[test]
    fn test_insufficient_credits_mapping() {
        let err = ApiError::from(CreditError::InsufficientBalance {
            balance: 0.5,
            requested: 1.0,
        });
        assert_eq!(err.code, ErrorCode::InsufficientCredits);
        assert!(matches!(err.details, Some(ErrorDetails::Generic(_))));
    }

    #[tokio::test]
    async fn test_response_carries_arabic_message() {
        use http_body_util::BodyExt;

        let response = ApiError::conflict("Class overlaps").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error.code, "conflict");
        assert_eq!(body.error.category, ErrorCategory::Conflict);
        assert_eq!(body.error.message, ErrorCategory::Conflict.message_ar());
        assert_eq!(body.error.detail, "Class overlaps");
    }
}
