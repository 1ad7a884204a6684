//! Developer API key resolution.
//!
//! The key is scraped from the developer-key page and registered on the
//! fly when the account has none. Limited accounts can never hold a key
//! and permanently resolve to an empty one. The resolved key is wrapped
//! in a [`Cacheable`](crate::cache::Cacheable) owned by the web client.

use anyhow::{anyhow, Result};
use tracing::{debug, info, warn};

use super::client::{HostKind, SessionField, WebClient};
use crate::cache::CacheFallback;

/// Outcome of scraping the developer-key page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiKeyState {
    Error,
    Timeout,
    Registered(String),
    NotRegisteredYet,
    AccessDenied,
}

/// Decode the developer-key page into a state.
pub(crate) fn parse_api_key_page(html: &str) -> ApiKeyState {
    if html.contains("<h2>Access Denied</h2>") || html.contains("Access Denied") {
        return ApiKeyState::AccessDenied;
    }

    if let Some(start) = html.find("<p>Key: ") {
        let rest = &html[start + "<p>Key: ".len()..];
        if let Some(end) = rest.find("</p>") {
            let key = rest[..end].trim();
            if !key.is_empty() {
                return ApiKeyState::Registered(key.to_string());
            }
        }
        return ApiKeyState::Error;
    }

    if html.contains("Register for a new Web API Key") || html.contains("registerkey") {
        return ApiKeyState::NotRegisteredYet;
    }

    ApiKeyState::Error
}

impl WebClient {
    /// The cached API key. `(true, Some(key))` once resolved; an empty key
    /// means the account cannot hold one.
    pub async fn api_key(&self) -> (bool, Option<String>) {
        match self.api_key.get() {
            Some(cacheable) => cacheable.get(CacheFallback::SuccessPreviously).await,
            None => (false, None),
        }
    }

    /// Resolver behind the cacheable: scrape, registering a key if needed.
    pub(crate) async fn resolve_api_key(&self) -> Result<String> {
        if let Some(account) = self.account.upgrade() {
            if account.is_limited() {
                debug!("Limited account — no API key available");
                return Ok(String::new());
            }
        }

        match self.fetch_api_key_state().await? {
            ApiKeyState::Registered(key) => Ok(key),
            ApiKeyState::AccessDenied => {
                info!("API key access denied — resolving to empty key");
                Ok(String::new())
            }
            ApiKeyState::NotRegisteredYet => {
                info!("No API key registered yet, registering one");
                self.register_api_key().await?;
                match self.fetch_api_key_state().await? {
                    ApiKeyState::Registered(key) => Ok(key),
                    other => Err(anyhow!("API key registration did not take: {other:?}")),
                }
            }
            ApiKeyState::Timeout => Err(anyhow!("API key page timed out")),
            ApiKeyState::Error => Err(anyhow!("API key page could not be parsed")),
        }
    }

    async fn fetch_api_key_state(&self) -> Result<ApiKeyState> {
        match self
            .get_html(HostKind::Community, "/dev/apikey?l=english", SessionField::Lowercase)
            .await
        {
            Ok(html) => Ok(parse_api_key_page(&html)),
            Err(e) => {
                let timeout = e
                    .downcast_ref::<reqwest::Error>()
                    .is_some_and(reqwest::Error::is_timeout);
                warn!(error = %e, timeout, "Developer-key page fetch failed");
                Ok(if timeout {
                    ApiKeyState::Timeout
                } else {
                    ApiKeyState::Error
                })
            }
        }
    }

    async fn register_api_key(&self) -> Result<()> {
        let form = vec![
            ("domain".to_string(), "localhost".to_string()),
            ("agreeToTerms".to_string(), "agreed".to_string()),
            ("Submit".to_string(), "Register".to_string()),
        ];
        self.post_form_html(
            HostKind::Community,
            "/dev/registerkey",
            &form,
            SessionField::Lowercase,
        )
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
