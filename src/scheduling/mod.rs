//! Class time arithmetic: start/end computation, time-derived status and the
//! join window.
//!
//! A class stores its date (`YYYY-MM-DD`), start time (`HH:MM`, UTC) and a
//! duration. Nothing here touches the database; callers pass `now` in so the
//! rules stay deterministic under test.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shortest bookable class
pub const MIN_DURATION_MINUTES: i64 = 15;

/// Longest bookable class
pub const MAX_DURATION_MINUTES: i64 = 240;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid class date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Invalid start time '{0}', expected HH:MM")]
    InvalidTime(String),

    #[error("Duration must be between 15 and 240 minutes, got {0}")]
    InvalidDuration(i64),
}

/// Parse a stored date and time into the UTC start instant
pub fn parse_start(date: &str, time: &str) -> Result<DateTime<Utc>, ScheduleError> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| ScheduleError::InvalidDate(date.to_string()))?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(time.trim(), "%H:%M:%S"))
        .map_err(|_| ScheduleError::InvalidTime(time.to_string()))?;
    Ok(NaiveDateTime::new(date, time).and_utc())
}

pub fn validate_duration(minutes: i64) -> Result<(), ScheduleError> {
    if (MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&minutes) {
        Ok(())
    } else {
        Err(ScheduleError::InvalidDuration(minutes))
    }
}

pub fn end_of(start: DateTime<Utc>, duration_minutes: i64) -> DateTime<Utc> {
    start + Duration::minutes(duration_minutes)
}

/// True when the two half-open intervals `[start, start + duration)` intersect
pub fn overlaps(
    a_start: DateTime<Utc>,
    a_minutes: i64,
    b_start: DateTime<Utc>,
    b_minutes: i64,
) -> bool {
    a_start < end_of(b_start, b_minutes) && b_start < end_of(a_start, a_minutes)
}

/// Credits consumed by a class: its length in hours, rounded up to the next
/// half credit.
pub fn credit_cost(duration_minutes: i64) -> f64 {
    let half_hours = (duration_minutes.max(0) + 29) / 30;
    half_hours as f64 / 2.0
}

/// Stored status of a class. Only explicit outcomes are persisted; the
/// in-progress state is always computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl ClassStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassStatus::Scheduled => "scheduled",
            ClassStatus::InProgress => "in_progress",
            ClassStatus::Completed => "completed",
            ClassStatus::Cancelled => "cancelled",
            ClassStatus::NoShow => "no_show",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(ClassStatus::Scheduled),
            "in_progress" => Some(ClassStatus::InProgress),
            "completed" => Some(ClassStatus::Completed),
            "cancelled" => Some(ClassStatus::Cancelled),
            "no_show" => Some(ClassStatus::NoShow),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClassStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status as seen at `now`. Cancelled, no-show and completed are final;
/// anything else follows the clock.
pub fn effective_status(
    stored: ClassStatus,
    start: DateTime<Utc>,
    duration_minutes: i64,
    now: DateTime<Utc>,
) -> ClassStatus {
    match stored {
        ClassStatus::Cancelled | ClassStatus::NoShow | ClassStatus::Completed => stored,
        ClassStatus::Scheduled | ClassStatus::InProgress => {
            if now < start {
                ClassStatus::Scheduled
            } else if now < end_of(start, duration_minutes) {
                ClassStatus::InProgress
            } else {
                ClassStatus::Completed
            }
        }
    }
}

/// Whether the join action is available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JoinState {
    TooEarly { opens_in_seconds: i64 },
    Joinable,
    Ended,
}

/// Join is open from `window_minutes` before the start until the class ends
pub fn join_state(
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    duration_minutes: i64,
    window_minutes: i64,
) -> JoinState {
    let opens_at = start - Duration::minutes(window_minutes);
    if now < opens_at {
        JoinState::TooEarly {
            opens_in_seconds: (opens_at - now).num_seconds().max(1),
        }
    } else if now < end_of(start, duration_minutes) {
        JoinState::Joinable
    } else {
        JoinState::Ended
    }
}

/// True only within `[start - window_minutes, start]`
pub fn is_within_join_window(now: DateTime<Utc>, start: DateTime<Utc>, window_minutes: i64) -> bool {
    now >= start - Duration::minutes(window_minutes) && now <= start
}
