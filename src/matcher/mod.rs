//! Inventory matching: directory announcements, heartbeats, and the
//! active duplicate-swapping engine.
//!
//! Engines talk to the platform through [`PlatformBackend`] — implemented
//! by the session-aware [`WebClient`](crate::web::WebClient) in production
//! and by in-memory mocks in tests — and to the listing server through
//! [`MatchingDirectory`](directory::MatchingDirectory).

pub mod active;
pub mod announcer;
pub mod directory;
pub mod swaps;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::account::AccountHandle;
use crate::types::{
    accepted_matchable_types, Asset, SteamId, COMMUNITY_APP_ID, COMMUNITY_CONTEXT_ID,
};
use crate::web::inventory::InventoryFilter;
use crate::web::trades::TradeOfferResult;
use crate::web::WebClient;

/// Platform capabilities the matching engines consume.
#[async_trait]
pub trait PlatformBackend: Send + Sync {
    /// The cached developer API key: `(resolved, key)`.
    async fn api_key(&self) -> (bool, Option<String>);

    /// Whether a profile's inventory is publicly visible.
    async fn has_public_inventory(&self, steam_id: SteamId) -> Result<bool>;

    /// Fetch a community inventory, filtered.
    async fn fetch_inventory(
        &self,
        steam_id: SteamId,
        filter: &InventoryFilter,
    ) -> Result<Vec<Asset>>;

    /// Submit an item-for-item trade offer.
    async fn send_trade_offer(
        &self,
        partner: SteamId,
        items_to_give: &[Asset],
        items_to_receive: &[Asset],
        trade_token: Option<&str>,
    ) -> Result<TradeOfferResult>;

    /// Join a community group.
    async fn join_group(&self, group_id: u64) -> Result<()>;
}

#[async_trait]
impl PlatformBackend for WebClient {
    async fn api_key(&self) -> (bool, Option<String>) {
        WebClient::api_key(self).await
    }

    async fn has_public_inventory(&self, steam_id: SteamId) -> Result<bool> {
        WebClient::has_public_inventory(self, steam_id).await
    }

    async fn fetch_inventory(
        &self,
        steam_id: SteamId,
        filter: &InventoryFilter,
    ) -> Result<Vec<Asset>> {
        WebClient::fetch_inventory(self, steam_id, COMMUNITY_APP_ID, COMMUNITY_CONTEXT_ID, filter)
            .await
    }

    async fn send_trade_offer(
        &self,
        partner: SteamId,
        items_to_give: &[Asset],
        items_to_receive: &[Asset],
        trade_token: Option<&str>,
    ) -> Result<TradeOfferResult> {
        WebClient::send_trade_offer(self, partner, items_to_give, items_to_receive, trade_token, false)
            .await
    }

    async fn join_group(&self, group_id: u64) -> Result<()> {
        WebClient::join_group(self, group_id).await
    }
}

/// Whether the account qualifies for directory matching.
///
/// `Some(true)` / `Some(false)` are definite answers; `None` means a
/// network failure prevented the check — callers stop heartbeats without
/// recording the attempt.
pub async fn eligibility(
    account: &dyn AccountHandle,
    backend: &dyn PlatformBackend,
) -> Option<bool> {
    if !account.has_mobile_authenticator() {
        debug!("Ineligible: no mobile authenticator");
        return Some(false);
    }

    if !account.trading_preferences().steam_trade_matcher {
        debug!("Ineligible: trade matching not enabled in preferences");
        return Some(false);
    }

    if accepted_matchable_types(&account.matchable_types()).is_empty() {
        debug!("Ineligible: no accepted matchable types configured");
        return Some(false);
    }

    let (resolved, key) = backend.api_key().await;
    if !resolved {
        return None;
    }
    if key.as_deref().map_or(true, str::is_empty) {
        debug!("Ineligible: no valid API key");
        return Some(false);
    }

    match backend.has_public_inventory(account.steam_id()).await {
        Ok(true) => Some(true),
        Ok(false) => {
            debug!("Ineligible: inventory is private");
            Some(false)
        }
        Err(_) => None,
    }
}
