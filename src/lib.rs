pub mod api;
pub mod cli;
pub mod commerce;
pub mod config;
pub mod credits;
pub mod crypto;
pub mod db;
pub mod events;
pub mod lms;
pub mod notifications;
pub mod scheduling;
pub mod seo;
pub mod startup;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::crypto::TokenSigner;
use crate::events::EventBus;
use crate::lms::LmsClient;
use crate::notifications::Mailer;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub tokens: TokenSigner,
    pub mailer: Arc<Mailer>,
    pub events: EventBus,
    pub rate_limiter: Arc<RateLimiter>,
    /// None when the LMS integration is not configured
    pub lms: Option<LmsClient>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> anyhow::Result<Self> {
        let tokens = TokenSigner::new(&config.auth.token_secret, config.auth.token_ttl_hours);
        let mailer = Arc::new(Mailer::new(config.email.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let lms = LmsClient::from_config(&config.lms)?;

        Ok(Self {
            config,
            db,
            tokens,
            mailer,
            events: EventBus::new(),
            rate_limiter,
            lms,
        })
    }
}
