//! Seams to the outer account lifecycle manager.
//!
//! The account manager, the mobile confirmation handler, and persona
//! tracking live in the embedding application. The engines in this crate
//! reference them by capability only, through these traits.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

use crate::types::{AssetType, SteamId, TradingPreferences};

/// Capabilities the web client and matching engines need from an account.
///
/// The web client holds this as a non-owning back-reference: the account
/// owns the web client, never the other way around.
#[async_trait]
pub trait AccountHandle: Send + Sync {
    /// The account's 64-bit identifier.
    fn steam_id(&self) -> SteamId;

    /// Whether the account is currently connected and logged on.
    fn is_connected(&self) -> bool;

    /// Whether the account has a mobile two-factor authenticator.
    fn has_mobile_authenticator(&self) -> bool;

    /// Whether the account is limited (cannot register an API key).
    fn is_limited(&self) -> bool;

    /// The account's configured trading preferences.
    fn trading_preferences(&self) -> TradingPreferences;

    /// The item types this account is willing to match.
    fn matchable_types(&self) -> HashSet<AssetType>;

    /// Whether trades with the given partner are administratively blocked.
    fn is_blacklisted(&self, steam_id: SteamId) -> bool;

    /// Renegotiate web session tokens with the platform. The manager is
    /// expected to re-run session init on the web client; returns whether
    /// a valid session is in place afterwards.
    async fn renegotiate_session(&self) -> Result<bool>;

    /// The account's trade token, if one is set.
    async fn trade_token(&self) -> Result<Option<String>>;

    /// Ask the platform for a fresh persona snapshot. The resulting state
    /// arrives through the persona callback clock.
    async fn request_persona_state(&self) -> Result<()>;
}

/// The mobile two-factor confirmation handler.
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// Accept the pending confirmations for the given trade offers.
    async fn accept_confirmations(&self, trade_offer_ids: &[u64]) -> Result<()>;
}
