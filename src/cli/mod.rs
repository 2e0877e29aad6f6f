//! Command-line interface.
//!
//! With no subcommand the binary starts the server. Subcommands:
//! - `status` - Query a running server's health endpoint
//! - `config check` - Validate the configuration file
//! - `db migrate` - Apply the schema without starting the server
//! - `reminders send` - Run one reminder pass immediately

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::events::EventBus;
use crate::notifications::{Mailer, ReminderService};

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "tutorhub")]
#[command(author, version, about = "Backend for a bilingual tutoring platform", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "tutorhub.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Skip startup self-checks (for development only)
    #[arg(long)]
    pub skip_checks: bool,

    /// Server URL used by `status`
    #[arg(long, env = "TUTORHUB_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show health and version of a running server
    Status,

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Class reminder commands
    #[command(subcommand)]
    Reminders(ReminderCommands),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

#[derive(Subcommand, Debug)]
pub enum DbCommands {
    /// Create or upgrade the database schema
    Migrate,
}

#[derive(Subcommand, Debug)]
pub enum ReminderCommands {
    /// Send reminders that are due right now
    Send,
}

/// Body of `GET /health`
#[derive(Debug, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

/// Run a CLI command
pub async fn run_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Some(Commands::Status) => cmd_status(cli).await,
        Some(Commands::Config(ConfigCommands::Check)) => cmd_config_check(cli),
        Some(Commands::Db(DbCommands::Migrate)) => cmd_db_migrate(cli).await,
        Some(Commands::Reminders(ReminderCommands::Send)) => cmd_reminders_send(cli).await,
        None => {
            // No subcommand means start the server - this is handled in main.rs
            Ok(())
        }
    }
}

async fn cmd_status(cli: &Cli) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to create HTTP client")?;

    let url = format!("{}/health", cli.api_url.trim_end_matches('/'));
    println!("Connecting to {}...", cli.api_url);

    let response = client
        .get(&url)
        .send()
        .await
        .context("Failed to connect to server. Is it running?")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Server returned error {}: {}", status, body);
    }

    let health: HealthStatus = response
        .json()
        .await
        .context("Failed to parse health response")?;

    let icon = if health.status == "ok" { "[OK]" } else { "[!!]" };
    println!();
    println!("Version:    v{}", health.version);
    println!("Status:     {} {}", icon, health.status);
    Ok(())
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "Enabled"
    } else {
        "Disabled"
    }
}

fn cmd_config_check(cli: &Cli) -> Result<()> {
    let config_path = &cli.config;

    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!("[!!] Configuration file not found: {}", config_path.display());
        println!();
        println!("Defaults plus TUTORHUB_* environment overrides will be used.");
    }

    let config = Config::load(config_path)?;
    let problems = config.validate();

    println!("=== Configuration Summary ===");
    println!();
    println!("Server:");
    println!("  Listen:        {}:{}", config.server.host, config.server.port);
    println!("  Public URL:    {}", config.server.public_url);
    println!("  Data Dir:      {}", config.server.data_dir.display());
    println!("  CORS Origins:  {}", config.server.cors_origins.len());
    println!();
    println!("Integrations:");
    println!("  Email (SMTP):  {}", enabled(config.email.is_configured()));
    println!("  LMS:           {}", enabled(config.lms.base_url.is_some()));
    println!();
    println!("Classes:");
    println!("  Join window:   {} min before start", config.scheduling.join_window_minutes);
    println!("  Reminder lead: {} min", config.scheduling.reminder_lead_minutes);
    println!();
    println!("Security:");
    println!("  Rate Limiting: {}", enabled(config.rate_limit.enabled));
    println!("  Session TTL:   {} h", config.auth.token_ttl_hours);
    println!();

    if problems.is_empty() {
        println!("[OK] Configuration is valid");
        Ok(())
    } else {
        for problem in &problems {
            println!("[!!] {}", problem);
        }
        anyhow::bail!("{} configuration problem(s) found", problems.len())
    }
}

async fn cmd_db_migrate(cli: &Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!("Failed to create data directory {}", config.server.data_dir.display())
    })?;

    crate::db::init(&config.server.data_dir).await?;
    println!("[OK] Database schema is up to date");
    Ok(())
}

async fn cmd_reminders_send(cli: &Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    let db = crate::db::init(&config.server.data_dir).await?;

    let service = ReminderService::new(
        db,
        Arc::new(Mailer::new(config.email.clone())),
        EventBus::new(),
        &config.scheduling,
        &config.server.public_url,
    );
    let sent = service.tick(chrono::Utc::now()).await?;
    println!("[OK] {} reminder(s) sent", sent);
    Ok(())
}
