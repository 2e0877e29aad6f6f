//! REST client for the auxiliary Laravel LMS.
//!
//! The LMS exposes users, courses and payments as paginated Laravel
//! resources (`{ "data": [...], "meta": { "current_page", "last_page" } }`).
//! Requests carry a bearer token; there are no retries beyond reqwest's own.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::LmsConfig;

/// Upper bound on pages fetched by the `*_all` helpers
const MAX_PAGES: u32 = 50;

#[derive(Error, Debug)]
pub enum LmsError {
    #[error("LMS integration is not configured")]
    NotConfigured,

    #[error("LMS resource not found: {0}")]
    NotFound(String),

    #[error("LMS rejected the API token")]
    Unauthorized,

    #[error("LMS returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("LMS request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected LMS response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmsUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmsCourse {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub teacher_id: Option<i64>,
    #[serde(default)]
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmsPayment {
    pub id: i64,
    pub user_id: i64,
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub paid_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PageMeta {
    current_page: Option<u32>,
    last_page: Option<u32>,
}

/// Laravel resource collection envelope
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    current_page: Option<u32>,
    #[serde(default)]
    last_page: Option<u32>,
    #[serde(default)]
    meta: Option<PageMeta>,
}

impl<T> Page<T> {
    /// Whether another page follows; unpaginated responses have none
    pub fn has_more(&self) -> bool {
        let meta = self.meta.clone().unwrap_or_default();
        let current = self.current_page.or(meta.current_page);
        let last = self.last_page.or(meta.last_page);
        matches!((current, last), (Some(c), Some(l)) if c < l)
    }
}

#[derive(Debug, Clone)]
pub struct LmsClient {
    base_url: String,
    api_token: String,
    client: reqwest::Client,
}

impl LmsClient {
    pub fn new(base_url: &str, api_token: &str, timeout: Duration) -> Result<Self, LmsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tutorhub/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            client,
        })
    }

    /// Build a client when both the URL and the token are configured
    pub fn from_config(config: &LmsConfig) -> Result<Option<Self>, LmsError> {
        match (&config.base_url, &config.api_token) {
            (Some(url), Some(token)) if !url.is_empty() && !token.is_empty() => {
                Self::new(url, token, Duration::from_secs(config.timeout_seconds)).map(Some)
            }
            _ => Ok(None),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, LmsError> {
        let url = format!("{}/api/{}", self.base_url, path.trim_start_matches('/'));

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LmsError::NotFound(path.to_string()));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LmsError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LmsError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| LmsError::Decode(e.to_string()))
    }

    async fn get_page<T: DeserializeOwned>(&self, path: &str, page: u32) -> Result<Page<T>, LmsError> {
        self.get(path, &[("page", page.to_string())]).await
    }

    async fn get_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, LmsError> {
        let mut all = Vec::new();
        let mut page = 1;

        loop {
            let current: Page<T> = self.get_page(path, page).await?;
            let has_more = current.has_more();
            all.extend(current.data);

            if !has_more {
                break;
            }
            if page >= MAX_PAGES {
                tracing::warn!(path = %path, pages = page, "LMS pagination truncated");
                break;
            }
            page += 1;
        }

        tracing::debug!(path = %path, count = all.len(), "Fetched LMS collection");
        Ok(all)
    }

    pub async fn list_users(&self) -> Result<Vec<LmsUser>, LmsError> {
        self.get_all("users").await
    }

    pub async fn get_user(&self, id: i64) -> Result<LmsUser, LmsError> {
        #[derive(Deserialize)]
        struct Envelope {
            data: LmsUser,
        }
        let envelope: Envelope = self.get(&format!("users/{}", id), &[]).await?;
        Ok(envelope.data)
    }

    pub async fn list_courses(&self) -> Result<Vec<LmsCourse>, LmsError> {
        self.get_all("courses").await
    }

    pub async fn list_payments(&self) -> Result<Vec<LmsPayment>, LmsError> {
        self.get_all("payments").await
    }
}
