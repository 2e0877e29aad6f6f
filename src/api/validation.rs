//! Input validation and sanitization for API requests.
//!
//! Validators return `Result<(), String>` so they compose with
//! `ValidationErrorBuilder::check` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Pragmatic email check: local part, one @, dotted domain
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?)+$"
    ).unwrap();

    /// International phone numbers: optional +, digits with spaces or dashes
    static ref PHONE_REGEX: Regex = Regex::new(r"^\+?[0-9][0-9 \-]{6,18}[0-9]$").unwrap();

    /// Meeting links must be https URLs
    static ref MEETING_LINK_REGEX: Regex = Regex::new(
        r"^https://[a-zA-Z0-9][-a-zA-Z0-9]*(\.[a-zA-Z0-9][-a-zA-Z0-9]*)+(:\d+)?(/[^\s<>]*)?$"
    ).unwrap();

    static ref HTML_TAG_REGEX: Regex = Regex::new(r"<[^>]*>").unwrap();

    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();

    static ref DATE_REGEX: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();

    /// Coupon codes: letters, digits, dash and underscore
    static ref COUPON_CODE_REGEX: Regex = Regex::new(r"^[A-Z0-9_-]{3,32}$").unwrap();
}

/// Supported interface languages
const VALID_LOCALES: [&str; 2] = ["ar", "en"];

/// Strip HTML tags, collapse runs of whitespace and trim
pub fn sanitize_text(input: &str) -> String {
    let stripped = HTML_TAG_REGEX.replace_all(input, " ");
    WHITESPACE_REGEX.replace_all(&stripped, " ").trim().to_string()
}

/// Sanitize an optional field, mapping empty results to None
pub fn sanitize_optional(input: Option<&str>) -> Option<String> {
    input.map(sanitize_text).filter(|s| !s.is_empty())
}

/// Normalize an email address for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Passwords need 8+ characters with at least one letter and one digit
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < 8 {
        return Err("Password must be at least 8 characters".to_string());
    }

    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }

    if !password.chars().any(|c| c.is_alphabetic()) || !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain letters and digits".to_string());
    }

    Ok(())
}

/// Validate an already-sanitized display name
pub fn validate_full_name(name: &str) -> Result<(), String> {
    let len = name.chars().count();
    if len == 0 {
        return Err("Full name is required".to_string());
    }

    if len < 2 {
        return Err("Full name is too short (min 2 characters)".to_string());
    }

    if len > 100 {
        return Err("Full name is too long (max 100 characters)".to_string());
    }

    Ok(())
}

/// Validate a phone number (optional field)
pub fn validate_phone(phone: &Option<String>) -> Result<(), String> {
    if let Some(p) = phone {
        if p.is_empty() {
            return Ok(());
        }

        if !PHONE_REGEX.is_match(p) {
            return Err("Invalid phone number format".to_string());
        }
    }

    Ok(())
}

pub fn validate_locale(locale: &str) -> Result<(), String> {
    if !VALID_LOCALES.contains(&locale) {
        return Err(format!(
            "Invalid locale. Must be one of: {}",
            VALID_LOCALES.join(", ")
        ));
    }
    Ok(())
}

/// Validate a meeting link (optional field)
pub fn validate_meeting_link(link: &Option<String>) -> Result<(), String> {
    if let Some(l) = link {
        if l.is_empty() {
            return Ok(());
        }

        if l.len() > 2048 {
            return Err("Meeting link is too long (max 2048 characters)".to_string());
        }

        if !MEETING_LINK_REGEX.is_match(l) {
            return Err("Meeting link must be an https URL".to_string());
        }
    }

    Ok(())
}

pub fn validate_rating(rating: i64) -> Result<(), String> {
    if !(1..=5).contains(&rating) {
        return Err("Rating must be between 1 and 5".to_string());
    }
    Ok(())
}

/// Validate a `YYYY-MM-DD` calendar date
pub fn validate_date(date: &str, field_name: &str) -> Result<(), String> {
    if !DATE_REGEX.is_match(date) || chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
        return Err(format!("Invalid {}, expected YYYY-MM-DD", field_name));
    }
    Ok(())
}

/// Validate an already-normalized (upper-case) coupon code
pub fn validate_coupon_code(code: &str) -> Result<(), String> {
    if !COUPON_CODE_REGEX.is_match(code) {
        return Err("Coupon code must be 3-32 letters, digits, '-' or '_'".to_string());
    }
    Ok(())
}

/// Prices may be zero (free packages) but never negative
pub fn validate_price(price: f64) -> Result<(), String> {
    if !price.is_finite() || price < 0.0 {
        return Err("Price must be zero or more".to_string());
    }
    Ok(())
}

/// Validate a UUID string
pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} is required", field_name));
    }

    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("Invalid {} format", field_name));
    }

    Ok(())
}
