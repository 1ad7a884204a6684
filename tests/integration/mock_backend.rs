//! Mock collaborators for integration testing.
//!
//! Deterministic in-memory implementations of the account handle, the
//! platform backend, the matching directory, and the confirmation handler.
//! All state is controllable and inspectable from test code.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use swapfarm::account::{AccountHandle, Confirmer};
use swapfarm::matcher::directory::{Announcement, DirectoryStatus, MatchingDirectory};
use swapfarm::matcher::PlatformBackend;
use swapfarm::types::{
    Asset, AssetRarity, AssetType, ListedUser, SteamId, TradingPreferences, COMMUNITY_APP_ID,
    COMMUNITY_CONTEXT_ID,
};
use swapfarm::web::inventory::InventoryFilter;
use swapfarm::web::trades::TradeOfferResult;

pub const OUR_ID: SteamId = 76_561_198_000_000_042;

// ---------------------------------------------------------------------------
// Asset helpers
// ---------------------------------------------------------------------------

pub fn card(asset_id: u64, class_id: u64, real_app_id: u32) -> Asset {
    Asset {
        asset_id,
        class_id,
        app_id: COMMUNITY_APP_ID,
        context_id: COMMUNITY_CONTEXT_ID,
        amount: 1,
        real_app_id,
        asset_type: AssetType::TradingCard,
        rarity: AssetRarity::Common,
        marketable: true,
        tradable: true,
    }
}

pub fn emoticon(asset_id: u64, class_id: u64, real_app_id: u32) -> Asset {
    Asset {
        asset_type: AssetType::Emoticon,
        ..card(asset_id, class_id, real_app_id)
    }
}

pub fn listed_user(steam_id: SteamId, games: u16, items: u16) -> ListedUser {
    ListedUser {
        steam_id,
        trade_token: "token".to_string(),
        games_count: games,
        items_count: items,
        matchable_backgrounds: true,
        matchable_cards: true,
        matchable_emoticons: true,
        matchable_foil_cards: true,
        match_everything: true,
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

pub struct MockAccount {
    pub steam_id: SteamId,
    pub connected: bool,
    pub mobile_authenticator: bool,
    pub limited: bool,
    pub preferences: TradingPreferences,
    pub matchable_types: HashSet<AssetType>,
    pub blacklist: HashSet<SteamId>,
    pub trade_token: Option<String>,
    pub persona_requests: AtomicU32,
}

impl MockAccount {
    /// An account that passes every eligibility gate.
    pub fn eligible() -> Self {
        Self {
            steam_id: OUR_ID,
            connected: true,
            mobile_authenticator: true,
            limited: false,
            preferences: TradingPreferences {
                steam_trade_matcher: true,
                match_actively: true,
                match_everything: false,
            },
            matchable_types: [AssetType::TradingCard, AssetType::Emoticon]
                .into_iter()
                .collect(),
            blacklist: HashSet::new(),
            trade_token: Some("ourtoken".to_string()),
            persona_requests: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl AccountHandle for MockAccount {
    fn steam_id(&self) -> SteamId {
        self.steam_id
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn has_mobile_authenticator(&self) -> bool {
        self.mobile_authenticator
    }

    fn is_limited(&self) -> bool {
        self.limited
    }

    fn trading_preferences(&self) -> TradingPreferences {
        self.preferences
    }

    fn matchable_types(&self) -> HashSet<AssetType> {
        self.matchable_types.clone()
    }

    fn is_blacklisted(&self, steam_id: SteamId) -> bool {
        self.blacklist.contains(&steam_id)
    }

    async fn renegotiate_session(&self) -> Result<bool> {
        Ok(true)
    }

    async fn trade_token(&self) -> Result<Option<String>> {
        Ok(self.trade_token.clone())
    }

    async fn request_persona_state(&self) -> Result<()> {
        self.persona_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Platform backend
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RecordedTrade {
    pub partner: SteamId,
    pub give: Vec<Asset>,
    pub receive: Vec<Asset>,
    pub trade_token: Option<String>,
}

pub struct MockBackend {
    pub inventories: Mutex<HashMap<SteamId, Vec<Asset>>>,
    pub api_key: Mutex<(bool, Option<String>)>,
    pub private_profiles: Mutex<HashSet<SteamId>>,
    /// If set, all profile checks return this error.
    pub profile_error: Mutex<bool>,
    /// If set, all inventory fetches return an error.
    pub inventory_error: Mutex<bool>,
    /// If set, trade submissions fail.
    pub trade_error: Mutex<bool>,
    /// Whether dispatched trades actually move items between inventories.
    pub apply_trades: bool,
    pub needs_confirmation: bool,
    pub trades: Mutex<Vec<RecordedTrade>>,
    next_offer_id: AtomicU64,
}

impl MockBackend {
    pub fn new(apply_trades: bool) -> Self {
        Self {
            inventories: Mutex::new(HashMap::new()),
            api_key: Mutex::new((true, Some("APIKEY1234".to_string()))),
            private_profiles: Mutex::new(HashSet::new()),
            profile_error: Mutex::new(false),
            inventory_error: Mutex::new(false),
            trade_error: Mutex::new(false),
            apply_trades,
            needs_confirmation: false,
            trades: Mutex::new(Vec::new()),
            next_offer_id: AtomicU64::new(9_000_000_001),
        }
    }

    pub fn set_inventory(&self, steam_id: SteamId, assets: Vec<Asset>) {
        self.inventories.lock().unwrap().insert(steam_id, assets);
    }

    pub fn trades(&self) -> Vec<RecordedTrade> {
        self.trades.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformBackend for MockBackend {
    async fn api_key(&self) -> (bool, Option<String>) {
        self.api_key.lock().unwrap().clone()
    }

    async fn has_public_inventory(&self, steam_id: SteamId) -> Result<bool> {
        if *self.profile_error.lock().unwrap() {
            return Err(anyhow!("profile check transport failure"));
        }
        Ok(!self.private_profiles.lock().unwrap().contains(&steam_id))
    }

    async fn fetch_inventory(
        &self,
        steam_id: SteamId,
        filter: &InventoryFilter,
    ) -> Result<Vec<Asset>> {
        if *self.inventory_error.lock().unwrap() {
            return Err(anyhow!("inventory transport failure"));
        }
        let inventories = self.inventories.lock().unwrap();
        let assets = inventories.get(&steam_id).cloned().unwrap_or_default();
        Ok(assets.into_iter().filter(|a| filter.accepts(a)).collect())
    }

    async fn send_trade_offer(
        &self,
        partner: SteamId,
        items_to_give: &[Asset],
        items_to_receive: &[Asset],
        trade_token: Option<&str>,
    ) -> Result<TradeOfferResult> {
        if *self.trade_error.lock().unwrap() {
            return Err(anyhow!("trade submission failure"));
        }

        self.trades.lock().unwrap().push(RecordedTrade {
            partner,
            give: items_to_give.to_vec(),
            receive: items_to_receive.to_vec(),
            trade_token: trade_token.map(str::to_string),
        });

        if self.apply_trades {
            let mut inventories = self.inventories.lock().unwrap();
            let give_ids: HashSet<u64> =
                items_to_give.iter().map(|a| a.asset_id).collect();
            let receive_ids: HashSet<u64> =
                items_to_receive.iter().map(|a| a.asset_id).collect();

            let mut moved_out = Vec::new();
            if let Some(ours) = inventories.get_mut(&OUR_ID) {
                ours.retain(|a| {
                    if give_ids.contains(&a.asset_id) {
                        moved_out.push(a.clone());
                        false
                    } else {
                        true
                    }
                });
            }
            let mut moved_in = Vec::new();
            if let Some(theirs) = inventories.get_mut(&partner) {
                theirs.retain(|a| {
                    if receive_ids.contains(&a.asset_id) {
                        moved_in.push(a.clone());
                        false
                    } else {
                        true
                    }
                });
                theirs.extend(moved_out);
            }
            inventories.entry(OUR_ID).or_default().extend(moved_in);
        }

        Ok(TradeOfferResult {
            requires_mobile_confirmation: self.needs_confirmation,
            trade_offer_ids: vec![self.next_offer_id.fetch_add(1, Ordering::SeqCst)],
        })
    }

    async fn join_group(&self, _group_id: u64) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedOutcome {
    Success,
    ClientError(u16),
    NetworkError,
}

pub struct MockDirectory {
    pub listing: Mutex<Vec<ListedUser>>,
    pub announce_outcome: Mutex<ForcedOutcome>,
    pub heartbeat_outcome: Mutex<ForcedOutcome>,
    pub announcements: Mutex<Vec<Announcement>>,
    pub heartbeats: AtomicU32,
    pub listings_served: AtomicU32,
    /// Artificial latency for the bot listing, for concurrency tests.
    pub list_delay: Mutex<Option<std::time::Duration>>,
}

impl MockDirectory {
    pub fn new(listing: Vec<ListedUser>) -> Self {
        Self {
            listing: Mutex::new(listing),
            announce_outcome: Mutex::new(ForcedOutcome::Success),
            heartbeat_outcome: Mutex::new(ForcedOutcome::Success),
            announcements: Mutex::new(Vec::new()),
            heartbeats: AtomicU32::new(0),
            listings_served: AtomicU32::new(0),
            list_delay: Mutex::new(None),
        }
    }

    fn resolve(outcome: ForcedOutcome) -> Result<DirectoryStatus> {
        match outcome {
            ForcedOutcome::Success => Ok(DirectoryStatus::Success),
            ForcedOutcome::ClientError(status) => Ok(DirectoryStatus::ClientError(status)),
            ForcedOutcome::NetworkError => Err(anyhow!("directory unreachable")),
        }
    }
}

#[async_trait]
impl MatchingDirectory for MockDirectory {
    async fn announce(&self, announcement: &Announcement) -> Result<DirectoryStatus> {
        let outcome = *self.announce_outcome.lock().unwrap();
        if outcome != ForcedOutcome::NetworkError {
            self.announcements.lock().unwrap().push(announcement.clone());
        }
        Self::resolve(outcome)
    }

    async fn heart_beat(&self, _guid: &str, _steam_id: SteamId) -> Result<DirectoryStatus> {
        let outcome = *self.heartbeat_outcome.lock().unwrap();
        if outcome != ForcedOutcome::NetworkError {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
        }
        Self::resolve(outcome)
    }

    async fn list_bots(&self) -> Result<Vec<ListedUser>> {
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.listings_served.fetch_add(1, Ordering::SeqCst);
        Ok(self.listing.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Confirmer
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockConfirmer {
    pub confirmed: Mutex<Vec<u64>>,
}

#[async_trait]
impl Confirmer for MockConfirmer {
    async fn accept_confirmations(&self, trade_offer_ids: &[u64]) -> Result<()> {
        self.confirmed.lock().unwrap().extend_from_slice(trade_offer_ids);
        Ok(())
    }
}
