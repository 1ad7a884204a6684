//! Matching directory server client.
//!
//! The directory keeps the public listing of accounts willing to swap
//! duplicates. Three endpoints: announce (register/update our listing),
//! heartbeat (still-alive ping), and the bot listing used by the active
//! matcher. Malformed listing entries are logged and skipped, never fatal.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::{host_of, SharedContext};
use crate::types::{AssetType, ListedUser, SteamId};

/// Outcome of a directory POST. The directory treats anything that is not
/// a client error as accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryStatus {
    Success,
    ClientError(u16),
}

impl DirectoryStatus {
    pub fn is_success(self) -> bool {
        matches!(self, DirectoryStatus::Success)
    }
}

/// Everything the directory needs to list an account.
#[derive(Debug, Clone)]
pub struct Announcement {
    pub steam_id: SteamId,
    pub guid: String,
    pub nickname: String,
    pub avatar_hash: String,
    pub items_count: usize,
    pub games_count: usize,
    pub matchable_types: Vec<AssetType>,
    pub match_everything: bool,
    pub trade_token: String,
}

/// The directory seam, mockable for tests.
#[async_trait]
pub trait MatchingDirectory: Send + Sync {
    async fn announce(&self, announcement: &Announcement) -> Result<DirectoryStatus>;
    async fn heart_beat(&self, guid: &str, steam_id: SteamId) -> Result<DirectoryStatus>;
    async fn list_bots(&self) -> Result<Vec<ListedUser>>;
}

/// Build the announce form body with the exact wire field names.
pub(crate) fn announce_form(announcement: &Announcement) -> Vec<(String, String)> {
    let type_ids: Vec<u8> = announcement
        .matchable_types
        .iter()
        .map(|t| t.wire_id())
        .collect();

    vec![
        ("AvatarHash".to_string(), announcement.avatar_hash.clone()),
        ("GamesCount".to_string(), announcement.games_count.to_string()),
        ("Guid".to_string(), announcement.guid.clone()),
        ("ItemsCount".to_string(), announcement.items_count.to_string()),
        (
            "MatchableTypes".to_string(),
            serde_json::to_string(&type_ids).unwrap_or_else(|_| "[]".to_string()),
        ),
        (
            "MatchEverything".to_string(),
            if announcement.match_everything { "1" } else { "0" }.to_string(),
        ),
        ("Nickname".to_string(), announcement.nickname.clone()),
        ("SteamID".to_string(), announcement.steam_id.to_string()),
        ("TradeToken".to_string(), announcement.trade_token.clone()),
    ]
}

/// Parse the bot listing leniently: bad entries are skipped with a log.
pub(crate) fn parse_listed_users(values: Vec<Value>) -> Vec<ListedUser> {
    let mut users = Vec::with_capacity(values.len());
    for value in values {
        match serde_json::from_value::<ListedUser>(value.clone()) {
            Ok(user) => users.push(user),
            Err(e) => {
                warn!(error = %e, entry = %value, "Skipping malformed directory entry");
            }
        }
    }
    users
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct DirectoryClient {
    http: reqwest::Client,
    base_url: String,
    context: Arc<SharedContext>,
}

impl DirectoryClient {
    pub fn new(context: Arc<SharedContext>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(context.config.connection_timeout())
            .user_agent("swapfarm/0.1.0")
            .build()
            .context("Failed to build HTTP client for the directory")?;

        Ok(Self {
            http,
            base_url: context.config.statistics_url(),
            context,
        })
    }

    async fn post_form(&self, path: &str, form: &[(String, String)]) -> Result<DirectoryStatus> {
        let _permit = self.context.limiters.acquire(&host_of(&self.base_url)).await;

        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .form(form)
            .send()
            .await
            .with_context(|| format!("Directory POST {path} failed"))?;

        let status = resp.status();
        debug!(path, status = status.as_u16(), "Directory POST complete");

        if status.is_client_error() {
            Ok(DirectoryStatus::ClientError(status.as_u16()))
        } else {
            Ok(DirectoryStatus::Success)
        }
    }
}

#[async_trait]
impl MatchingDirectory for DirectoryClient {
    async fn announce(&self, announcement: &Announcement) -> Result<DirectoryStatus> {
        self.post_form("/Api/Announce", &announce_form(announcement))
            .await
    }

    async fn heart_beat(&self, guid: &str, steam_id: SteamId) -> Result<DirectoryStatus> {
        let form = vec![
            ("Guid".to_string(), guid.to_string()),
            ("SteamID".to_string(), steam_id.to_string()),
        ];
        self.post_form("/Api/HeartBeat", &form).await
    }

    async fn list_bots(&self) -> Result<Vec<ListedUser>> {
        let _permit = self.context.limiters.acquire(&host_of(&self.base_url)).await;

        let url = format!("{}/Api/Bots?matchEverything=1", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Directory bot listing failed")?;
        let resp = resp
            .error_for_status()
            .context("Directory bot listing returned error status")?;

        let values: Vec<Value> = resp
            .json()
            .await
            .context("Failed to decode directory bot listing")?;

        let users = parse_listed_users(values);
        debug!(count = users.len(), "Directory bot listing fetched");
        Ok(users)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
