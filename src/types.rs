//! Shared types for the swapfarm client.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that the web, directory, and
//! matcher modules can depend on them without circular references.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// 64-bit platform account identifier.
pub type SteamId = u64;
/// Per-account unique item instance identifier.
pub type AssetId = u64;
/// Item class identifier — equal classes are interchangeable for matching.
pub type ClassId = u64;
/// Application (game) identifier.
pub type AppId = u32;
/// Inventory context identifier.
pub type ContextId = u64;

/// The inventory app holding trading cards, backgrounds and emoticons.
pub const COMMUNITY_APP_ID: AppId = 753;
/// The community inventory context.
pub const COMMUNITY_CONTEXT_ID: ContextId = 6;

// ---------------------------------------------------------------------------
// Asset type & rarity
// ---------------------------------------------------------------------------

/// Inventory item type, as decoded from description tags.
///
/// Discriminants are the wire type ids used in directory announcements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum AssetType {
    Unknown = 0,
    BoosterPack = 1,
    Emoticon = 2,
    FoilTradingCard = 3,
    ProfileBackground = 4,
    TradingCard = 5,
    SteamGems = 6,
    SaleItem = 7,
    Consumable = 8,
    ProfileModifier = 9,
}

impl AssetType {
    /// The types the matching directory accepts for item-for-item swaps.
    pub const ACCEPTED_FOR_MATCHING: &'static [AssetType] = &[
        AssetType::Emoticon,
        AssetType::FoilTradingCard,
        AssetType::ProfileBackground,
        AssetType::TradingCard,
    ];

    /// Whether this type is in the accepted matching set.
    pub fn is_matchable(self) -> bool {
        Self::ACCEPTED_FOR_MATCHING.contains(&self)
    }

    /// Wire type id used in `MatchableTypes` announcements.
    pub fn wire_id(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetType::Unknown => "Unknown",
            AssetType::BoosterPack => "BoosterPack",
            AssetType::Emoticon => "Emoticon",
            AssetType::FoilTradingCard => "FoilTradingCard",
            AssetType::ProfileBackground => "ProfileBackground",
            AssetType::TradingCard => "TradingCard",
            AssetType::SteamGems => "SteamGems",
            AssetType::SaleItem => "SaleItem",
            AssetType::Consumable => "Consumable",
            AssetType::ProfileModifier => "ProfileModifier",
        };
        write!(f, "{name}")
    }
}

/// Item rarity, decoded from `droprate` description tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum AssetRarity {
    Unknown = 0,
    Common = 1,
    Uncommon = 2,
    Rare = 3,
}

impl fmt::Display for AssetRarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetRarity::Unknown => "Unknown",
            AssetRarity::Common => "Common",
            AssetRarity::Uncommon => "Uncommon",
            AssetRarity::Rare => "Rare",
        };
        write!(f, "{name}")
    }
}

// ---------------------------------------------------------------------------
// Asset
// ---------------------------------------------------------------------------

/// A platform inventory item, decorated from its description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub asset_id: AssetId,
    pub class_id: ClassId,
    /// The inventory app the item lives in (not the game it belongs to).
    pub app_id: AppId,
    pub context_id: ContextId,
    /// Stack size, always ≥ 1.
    pub amount: u32,
    /// The game this item belongs to (not the inventory app).
    pub real_app_id: AppId,
    pub asset_type: AssetType,
    pub rarity: AssetRarity,
    pub marketable: bool,
    pub tradable: bool,
}

impl Asset {
    /// The set this asset is matched within.
    pub fn set_key(&self) -> SetKey {
        SetKey {
            real_app_id: self.real_app_id,
            asset_type: self.asset_type,
            rarity: self.rarity,
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({} {} app {}{}{})",
            self.asset_id,
            self.class_id,
            self.rarity,
            self.asset_type,
            self.real_app_id,
            if self.tradable { ", tradable" } else { "" },
            if self.marketable { ", marketable" } else { "" },
        )
    }
}

// ---------------------------------------------------------------------------
// Set key & inventory state
// ---------------------------------------------------------------------------

/// `(realAppID, type, rarity)` — all matching decisions are made within a
/// single set key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SetKey {
    pub real_app_id: AppId,
    pub asset_type: AssetType,
    pub rarity: AssetRarity,
}

impl fmt::Display for SetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.real_app_id, self.asset_type, self.rarity)
    }
}

/// Copies owned per class within one set.
pub type ClassCounts = HashMap<ClassId, u32>;

/// Mapping from set key to per-class counts.
pub type SetState = HashMap<SetKey, ClassCounts>;

/// Build `(full, tradable)` states from a flat asset list.
///
/// Invariant on the result: `tradable[s][c] ≤ full[s][c]` for every pair.
pub fn partition_by_set<'a, I>(assets: I) -> (SetState, SetState)
where
    I: IntoIterator<Item = &'a Asset>,
{
    let mut full: SetState = HashMap::new();
    let mut tradable: SetState = HashMap::new();

    for asset in assets {
        let key = asset.set_key();
        *full.entry(key).or_default().entry(asset.class_id).or_insert(0) += asset.amount;
        if asset.tradable {
            *tradable.entry(key).or_default().entry(asset.class_id).or_insert(0) +=
                asset.amount;
        }
    }

    (full, tradable)
}

/// Whether any class in any set has two or more copies.
pub fn has_duplicates(state: &SetState) -> bool {
    state
        .values()
        .any(|classes| classes.values().any(|&count| count > 1))
}

// ---------------------------------------------------------------------------
// Directory listings
// ---------------------------------------------------------------------------

/// A user record fetched from the matching directory.
///
/// Field names mirror the directory wire format exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListedUser {
    pub steam_id: SteamId,
    #[serde(default)]
    pub trade_token: String,
    pub games_count: u16,
    pub items_count: u16,
    #[serde(default, deserialize_with = "bool_from_int")]
    pub matchable_backgrounds: bool,
    #[serde(default, deserialize_with = "bool_from_int")]
    pub matchable_cards: bool,
    #[serde(default, deserialize_with = "bool_from_int")]
    pub matchable_emoticons: bool,
    #[serde(default, deserialize_with = "bool_from_int")]
    pub matchable_foil_cards: bool,
    #[serde(default, deserialize_with = "bool_from_int")]
    pub match_everything: bool,
}

impl ListedUser {
    /// `games / items` — used only for ranking candidates.
    pub fn score(&self) -> f64 {
        if self.items_count == 0 {
            0.0
        } else {
            f64::from(self.games_count) / f64::from(self.items_count)
        }
    }

    /// Whether this user accepts swaps of the given type.
    pub fn accepts(&self, asset_type: AssetType) -> bool {
        match asset_type {
            AssetType::ProfileBackground => self.matchable_backgrounds,
            AssetType::TradingCard => self.matchable_cards,
            AssetType::Emoticon => self.matchable_emoticons,
            AssetType::FoilTradingCard => self.matchable_foil_cards,
            _ => false,
        }
    }

    /// The matchable types this user has flagged, in stable order.
    pub fn matchable_types(&self) -> Vec<AssetType> {
        AssetType::ACCEPTED_FOR_MATCHING
            .iter()
            .copied()
            .filter(|&t| self.accepts(t))
            .collect()
    }
}

impl fmt::Display for ListedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (games={} items={} score={:.3}{})",
            self.steam_id,
            self.games_count,
            self.items_count,
            self.score(),
            if self.match_everything { ", everything" } else { "" },
        )
    }
}

/// Accept `0`/`1`, booleans, or absent values for directory flags.
fn bool_from_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrBool {
        Int(u8),
        Bool(bool),
    }

    Ok(match IntOrBool::deserialize(deserializer)? {
        IntOrBool::Int(value) => value != 0,
        IntOrBool::Bool(value) => value,
    })
}

// ---------------------------------------------------------------------------
// Per-partner bookkeeping
// ---------------------------------------------------------------------------

/// Sentinel: do not retry this partner for the remainder of the current
/// matching pass.
pub const TRIES_EXHAUSTED: u8 = u8::MAX;

/// Per-pass bookkeeping of attempts against one partner.
///
/// Created lazily on first attempt, destroyed at the end of the pass.
#[derive(Debug, Clone, Default)]
pub struct TriedPartner {
    pub tries: u8,
    pub given_asset_ids: HashSet<AssetId>,
    pub received_asset_ids: HashSet<AssetId>,
}

impl TriedPartner {
    /// Whether a proposed give/receive pair was already offered verbatim.
    pub fn already_offered(&self, give: &[Asset], receive: &[Asset]) -> bool {
        if self.given_asset_ids.is_empty() && self.received_asset_ids.is_empty() {
            return false;
        }
        give.iter().all(|a| self.given_asset_ids.contains(&a.asset_id))
            && receive
                .iter()
                .all(|a| self.received_asset_ids.contains(&a.asset_id))
    }

    /// Record a dispatched attempt.
    pub fn record(&mut self, give: &[Asset], receive: &[Asset]) {
        self.given_asset_ids.extend(give.iter().map(|a| a.asset_id));
        self.received_asset_ids
            .extend(receive.iter().map(|a| a.asset_id));
        self.tries = self.tries.saturating_add(1);
    }
}

// ---------------------------------------------------------------------------
// Trading preferences
// ---------------------------------------------------------------------------

/// Per-account trading preferences, set by the outer account manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPreferences {
    /// Announce to the matching directory and accept directory swaps.
    pub steam_trade_matcher: bool,
    /// Periodically initiate swaps against listed partners.
    pub match_actively: bool,
    /// Accept any fair swap regardless of our own set progress.
    pub match_everything: bool,
}

// ---------------------------------------------------------------------------
// Matchable type sets
// ---------------------------------------------------------------------------

/// The configured matchable types of an account, restricted to the accepted
/// set, in stable (sorted) order.
pub fn accepted_matchable_types(configured: &HashSet<AssetType>) -> Vec<AssetType> {
    let sorted: BTreeMap<AssetType, ()> = configured
        .iter()
        .filter(|t| t.is_matchable())
        .map(|&t| (t, ()))
        .collect();
    sorted.into_keys().collect()
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for swapfarm.
#[derive(Debug, thiserror::Error)]
pub enum SwapfarmError {
    #[error("Input validation failed ({0}) — please report this")]
    InvalidInput(String),

    #[error("Session could not be refreshed: {0}")]
    SessionRefresh(String),

    #[error("All {0} request attempts exhausted")]
    TriesExhausted(u8),

    #[error("Trade violates the fair-exchange invariant")]
    UnfairTrade,

    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("Inventory fetch reported more pages with a zero continuation id")]
    BrokenPagination,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
