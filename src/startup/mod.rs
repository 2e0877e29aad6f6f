//! Startup self-checks
//!
//! Run before the server starts accepting requests:
//! - Database connectivity and schema
//! - Data directory is writable
//! - Configuration problems (secrets, paired settings)
//! - Optional integrations (SMTP, LMS) are reported but never block startup

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::DbPool;

/// Tables the API cannot work without
const ESSENTIAL_TABLES: [&str; 7] = [
    "profiles",
    "class_sessions",
    "credit_balances",
    "credit_transactions",
    "packages",
    "payments",
    "notifications",
];

/// Result of a single startup check
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    /// Failure should abort startup
    pub critical: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            critical: false,
            message: message.into(),
            details: None,
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>, critical: bool) -> Self {
        Self {
            name: name.into(),
            passed: false,
            critical,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Aggregated startup check results
#[derive(Debug, Clone, Serialize)]
pub struct StartupCheckReport {
    pub checks: Vec<CheckResult>,
    pub all_critical_passed: bool,
    pub all_passed: bool,
    pub summary: String,
}

impl StartupCheckReport {
    pub fn new(checks: Vec<CheckResult>) -> Self {
        let all_critical_passed = checks.iter().filter(|c| c.critical).all(|c| c.passed);
        let all_passed = checks.iter().all(|c| c.passed);

        let failed = |critical: bool| {
            checks
                .iter()
                .filter(|c| c.critical == critical && !c.passed)
                .count()
        };
        let total = checks.len();
        let passed = checks.iter().filter(|c| c.passed).count();

        let summary = if all_passed {
            format!("All {} startup checks passed", total)
        } else if all_critical_passed {
            format!("{}/{} checks passed ({} warnings)", passed, total, failed(false))
        } else {
            format!("{}/{} checks passed ({} critical failures)", passed, total, failed(true))
        };

        Self {
            checks,
            all_critical_passed,
            all_passed,
            summary,
        }
    }
}

/// Run all startup self-checks and log each result
pub async fn run_startup_checks(config: &Config, db: &DbPool) -> StartupCheckReport {
    info!("Running startup self-checks...");

    let checks = vec![
        check_database_connectivity(db).await,
        check_database_schema(db).await,
        check_directory_writability(config),
        check_configuration(config),
        check_email(config),
        check_lms(config),
    ];

    let report = StartupCheckReport::new(checks);

    for check in &report.checks {
        if check.passed {
            info!(check = %check.name, message = %check.message, "Startup check PASSED");
        } else if check.critical {
            error!(
                check = %check.name,
                message = %check.message,
                details = ?check.details,
                "Startup check FAILED (CRITICAL)"
            );
        } else {
            warn!(
                check = %check.name,
                message = %check.message,
                details = ?check.details,
                "Startup check FAILED (non-critical)"
            );
        }
    }

    info!(
        summary = %report.summary,
        all_passed = report.all_passed,
        all_critical_passed = report.all_critical_passed,
        "Startup checks completed"
    );

    report
}

pub async fn check_database_connectivity(db: &DbPool) -> CheckResult {
    match sqlx::query("SELECT 1").fetch_one(db).await {
        Ok(_) => CheckResult::pass("database_connectivity", "Database connection successful"),
        Err(e) => CheckResult::fail("database_connectivity", "Failed to connect to database", true)
            .with_details(e.to_string()),
    }
}

async fn check_database_schema(db: &DbPool) -> CheckResult {
    let result: Result<Vec<(String,)>, _> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(db)
    .await;

    match result {
        Ok(tables) => {
            let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
            let missing: Vec<&str> = ESSENTIAL_TABLES
                .iter()
                .filter(|t| !names.contains(*t))
                .copied()
                .collect();

            if missing.is_empty() {
                CheckResult::pass(
                    "database_schema",
                    format!("Database schema valid ({} tables)", tables.len()),
                )
            } else {
                CheckResult::fail("database_schema", "Missing essential database tables", true)
                    .with_details(format!("Missing: {}", missing.join(", ")))
            }
        }
        Err(e) => CheckResult::fail("database_schema", "Failed to query database schema", true)
            .with_details(e.to_string()),
    }
}

fn check_directory_writability(config: &Config) -> CheckResult {
    let data_dir = &config.server.data_dir;
    let test_file = data_dir.join(".tutorhub_write_test");

    match std::fs::write(&test_file, "test") {
        Ok(_) => {
            let _ = std::fs::remove_file(&test_file);
            CheckResult::pass("directory_writability", "Data directory is writable")
                .with_details(format!("Path: {}", data_dir.display()))
        }
        Err(e) => CheckResult::fail("directory_writability", "Data directory is not writable", true)
            .with_details(format!("{}: {}", data_dir.display(), e)),
    }
}

fn check_configuration(config: &Config) -> CheckResult {
    let problems = config.validate();
    if problems.is_empty() {
        CheckResult::pass("configuration", "Configuration is valid")
    } else {
        CheckResult::fail(
            "configuration",
            format!("{} configuration problem(s)", problems.len()),
            true,
        )
        .with_details(problems.join("; "))
    }
}

fn check_email(config: &Config) -> CheckResult {
    if config.email.is_configured() {
        CheckResult::pass("email", "SMTP configured")
            .with_details(config.email.smtp_host.clone().unwrap_or_default())
    } else {
        CheckResult::fail("email", "SMTP not configured", false)
            .with_details("Password reset and reminder emails will be skipped")
    }
}

fn check_lms(config: &Config) -> CheckResult {
    match &config.lms.base_url {
        Some(url) => CheckResult::pass("lms", "LMS integration configured").with_details(url.clone()),
        None => CheckResult::fail("lms", "LMS integration not configured", false)
            .with_details("LMS endpoints will answer 503"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    #[test]
    fn test_check_result_pass() {
        let result = CheckResult::pass("test", "Test passed");
        assert!(result.passed);
        assert!(!result.critical);
        assert_eq!(result.name, "test");
    }

    #[test]
    fn test_report_critical_failure() {
        let report = StartupCheckReport::new(vec![
            CheckResult::pass("check1", "ok"),
            CheckResult::fail("check2", "fail", true),
        ]);
        assert!(!report.all_passed);
        assert!(!report.all_critical_passed);
        assert!(report.summary.contains("critical"));
    }

    #[test]
    fn test_report_non_critical_failure() {
        let report = StartupCheckReport::new(vec![
            CheckResult::pass("check1", "ok"),
            CheckResult::fail("check2", "warn", false),
        ]);
        assert!(!report.all_passed);
        assert!(report.all_critical_passed);
    }

    #[tokio::test]
    async fn test_schema_check_on_fresh_database() {
        let db = init_memory().await.unwrap();
        assert!(check_database_connectivity(&db).await.passed);
        assert!(check_database_schema(&db).await.passed);
    }

    #[test]
    fn test_optional_integrations_do_not_block() {
        let config = Config::default();
        let email = check_email(&config);
        let lms = check_lms(&config);
        assert!(!email.passed && !email.critical);
        assert!(!lms.passed && !lms.critical);
    }
}
