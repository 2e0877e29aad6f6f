use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub lms: LmsConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub credits: CreditsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Base URL of the web frontend, used for links in emails and structured data
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Allowed CORS origins (empty means any origin)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            public_url: default_public_url(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret used to sign session tokens
    #[serde(default = "default_token_secret")]
    pub token_secret: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    #[serde(default = "default_reset_token_ttl_minutes")]
    pub reset_token_ttl_minutes: i64,
    /// Bootstrap admin account created on first start
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: default_token_secret(),
            token_ttl_hours: default_token_ttl_hours(),
            reset_token_ttl_minutes: default_reset_token_ttl_minutes(),
            admin_email: None,
            admin_password: None,
        }
    }
}

fn default_token_secret() -> String {
    // Random per process if not provided; tokens will not survive a restart
    format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
}

fn default_token_ttl_hours() -> i64 {
    24 * 7
}

fn default_reset_token_ttl_minutes() -> i64 {
    60
}

/// SMTP settings for transactional email
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default = "default_smtp_tls")]
    pub smtp_tls: bool,
    pub from_address: Option<String>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            smtp_tls: default_smtp_tls(),
            from_address: None,
            from_name: default_from_name(),
        }
    }
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        self.smtp_host.is_some() && self.from_address.is_some()
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_tls() -> bool {
    true
}

fn default_from_name() -> String {
    "TutorHub".to_string()
}

/// Auxiliary Laravel LMS REST API
#[derive(Debug, Clone, Deserialize)]
pub struct LmsConfig {
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    #[serde(default = "default_lms_timeout")]
    pub timeout_seconds: u64,
}

impl Default for LmsConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            timeout_seconds: default_lms_timeout(),
        }
    }
}

fn default_lms_timeout() -> u64 {
    15
}

/// Upper bound for scheduling windows; reminders only look one day ahead
const MAX_SCHEDULING_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulingConfig {
    /// Minutes before the start during which joining is allowed
    #[serde(default = "default_join_window_minutes")]
    pub join_window_minutes: i64,
    /// Classes starting within this many minutes get a reminder
    #[serde(default = "default_reminder_lead_minutes")]
    pub reminder_lead_minutes: i64,
    #[serde(default = "default_reminder_interval_seconds")]
    pub reminder_interval_seconds: u64,
    /// Suggested client polling interval for join status
    #[serde(default = "default_status_poll_seconds")]
    pub status_poll_seconds: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            join_window_minutes: default_join_window_minutes(),
            reminder_lead_minutes: default_reminder_lead_minutes(),
            reminder_interval_seconds: default_reminder_interval_seconds(),
            status_poll_seconds: default_status_poll_seconds(),
        }
    }
}

fn default_join_window_minutes() -> i64 {
    10
}

fn default_reminder_lead_minutes() -> i64 {
    60
}

fn default_reminder_interval_seconds() -> u64 {
    60
}

fn default_status_poll_seconds() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreditsConfig {
    /// Largest amount accepted in a single add/deduct
    #[serde(default = "default_max_credit_amount")]
    pub max_amount: f64,
    /// Payout per credit consumed, used by settlements
    #[serde(default = "default_teacher_rate_per_credit")]
    pub teacher_rate_per_credit: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            max_amount: default_max_credit_amount(),
            teacher_rate_per_credit: default_teacher_rate_per_credit(),
            currency: default_currency(),
        }
    }
}

fn default_max_credit_amount() -> f64 {
    100.0
}

fn default_teacher_rate_per_credit() -> f64 {
    50.0
}

fn default_currency() -> String {
    "SAR".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_requests_per_window")]
    pub api_requests_per_window: u32,
    #[serde(default = "default_auth_requests_per_window")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            api_requests_per_window: default_api_requests_per_window(),
            auth_requests_per_window: default_auth_requests_per_window(),
            window_seconds: default_window_seconds(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_api_requests_per_window() -> u32 {
    120
}

fn default_auth_requests_per_window() -> u32 {
    20
}

fn default_window_seconds() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    /// Secrets may come from the environment instead of the config file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("TUTORHUB_TOKEN_SECRET") {
            self.auth.token_secret = secret;
        }
        if let Ok(password) = std::env::var("TUTORHUB_SMTP_PASSWORD") {
            self.email.smtp_password = Some(password);
        }
        if let Ok(token) = std::env::var("TUTORHUB_LMS_TOKEN") {
            self.lms.api_token = Some(token);
        }
        if let Ok(dir) = std::env::var("TUTORHUB_DATA_DIR") {
            self.server.data_dir = PathBuf::from(dir);
        }
    }

    /// Collect human-readable configuration problems
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.auth.token_secret.len() < 32 {
            problems.push("auth.token_secret must be at least 32 characters".to_string());
        }
        if self.auth.token_ttl_hours <= 0 {
            problems.push("auth.token_ttl_hours must be positive".to_string());
        }
        if self.auth.admin_email.is_some() != self.auth.admin_password.is_some() {
            problems.push("auth.admin_email and auth.admin_password must be set together".to_string());
        }
        if self.email.smtp_host.is_some() && self.email.from_address.is_none() {
            problems.push("email.from_address is required when email.smtp_host is set".to_string());
        }
        if self.email.smtp_username.is_some() != self.email.smtp_password.is_some() {
            problems.push("email.smtp_username and email.smtp_password must be set together".to_string());
        }
        if self.lms.base_url.is_some() && self.lms.api_token.is_none() {
            problems.push("lms.api_token is required when lms.base_url is set".to_string());
        }
        if !(0..=MAX_SCHEDULING_MINUTES).contains(&self.scheduling.join_window_minutes) {
            problems.push(format!(
                "scheduling.join_window_minutes must be between 0 and {}",
                MAX_SCHEDULING_MINUTES
            ));
        }
        if !(0..=MAX_SCHEDULING_MINUTES).contains(&self.scheduling.reminder_lead_minutes) {
            problems.push(format!(
                "scheduling.reminder_lead_minutes must be between 0 and {}",
                MAX_SCHEDULING_MINUTES
            ));
        }
        if self.credits.max_amount <= 0.0 {
            problems.push("credits.max_amount must be positive".to_string());
        }

        problems
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            email: EmailConfig::default(),
            lms: LmsConfig::default(),
            scheduling: SchedulingConfig::default(),
            credits: CreditsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
