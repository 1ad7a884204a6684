//! Paginated inventory fetching.
//!
//! Inventory pages arrive as parallel `assets` and `descriptions` arrays;
//! descriptions are keyed by class id and used to decorate each asset with
//! its type, rarity, real app and flags before it is admitted. A process-
//! wide semaphore serialises inventory reads across accounts; it is
//! released in the background after the configured limiter delay.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use super::client::{HostKind, SessionField, WebClient};
use crate::types::{
    AppId, Asset, AssetRarity, AssetType, ClassId, ContextId, SetKey, SteamId, SwapfarmError,
};

/// Page size for inventory requests.
pub const MAX_ITEMS_IN_SINGLE_INVENTORY_REQUEST: u32 = 5000;

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Caller-side restriction of an inventory fetch.
#[derive(Debug, Clone, Default)]
pub struct InventoryFilter {
    pub marketable_only: bool,
    pub tradable_only: bool,
    pub real_app_id: Option<AppId>,
    pub types: Option<HashSet<AssetType>>,
    pub sets: Option<HashSet<SetKey>>,
}

impl InventoryFilter {
    /// Restrict to tradable items of the given types.
    pub fn tradable_of_types(types: impl IntoIterator<Item = AssetType>) -> Self {
        Self {
            tradable_only: true,
            types: Some(types.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Restrict to tradable items within the given sets.
    pub fn tradable_of_sets(sets: impl IntoIterator<Item = SetKey>) -> Self {
        Self {
            tradable_only: true,
            sets: Some(sets.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn accepts(&self, asset: &Asset) -> bool {
        if self.marketable_only && !asset.marketable {
            return false;
        }
        if self.tradable_only && !asset.tradable {
            return false;
        }
        if let Some(app) = self.real_app_id {
            if asset.real_app_id != app {
                return false;
            }
        }
        if let Some(types) = &self.types {
            if !types.contains(&asset.asset_type) {
                return false;
            }
        }
        if let Some(sets) = &self.sets {
            if !sets.contains(&asset.set_key()) {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

pub(crate) fn u64_from_any<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u64),
        Str(String),
    }

    match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn flag_from_any<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(u64_from_any(deserializer).unwrap_or(0) != 0)
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawAsset {
    #[serde(default, deserialize_with = "u64_from_any")]
    pub appid: u64,
    #[serde(deserialize_with = "u64_from_any")]
    pub assetid: u64,
    #[serde(deserialize_with = "u64_from_any")]
    pub classid: u64,
    #[serde(deserialize_with = "u64_from_any")]
    pub contextid: u64,
    #[serde(default = "one", deserialize_with = "u64_from_any")]
    pub amount: u64,
}

fn one() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawTag {
    pub category: String,
    pub internal_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawDescription {
    #[serde(deserialize_with = "u64_from_any")]
    pub classid: u64,
    #[serde(default, deserialize_with = "flag_from_any")]
    pub marketable: bool,
    #[serde(default, deserialize_with = "flag_from_any")]
    pub tradable: bool,
    #[serde(default)]
    pub market_fee_app: Option<AppId>,
    #[serde(default)]
    pub tags: Vec<RawTag>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InventoryPage {
    #[serde(default)]
    pub assets: Vec<RawAsset>,
    #[serde(default)]
    pub descriptions: Vec<RawDescription>,
    #[serde(default, deserialize_with = "flag_from_any")]
    pub more_items: bool,
    #[serde(default)]
    pub last_assetid: Option<String>,
    #[serde(default)]
    pub total_inventory_count: u64,
}

// ---------------------------------------------------------------------------
// Description decoding
// ---------------------------------------------------------------------------

impl RawDescription {
    /// Decode `(type, rarity, real app)` from description tags.
    ///
    /// `item_class_2` marks a trading card (foil when `cardborder_1`),
    /// `item_class_3` a profile background, `item_class_4` an emoticon.
    /// Rarity comes from the `droprate` tag; the owning game from
    /// `market_fee_app`, falling back to the `Game` tag.
    pub(crate) fn decode(&self) -> (AssetType, AssetRarity, AppId) {
        let mut asset_type = AssetType::Unknown;
        let mut rarity = AssetRarity::Unknown;
        let mut foil = false;
        let mut tag_app: Option<AppId> = None;

        for tag in &self.tags {
            match tag.category.as_str() {
                "item_class" => {
                    asset_type = match tag.internal_name.as_str() {
                        "item_class_2" => AssetType::TradingCard,
                        "item_class_3" => AssetType::ProfileBackground,
                        "item_class_4" => AssetType::Emoticon,
                        "item_class_5" => AssetType::BoosterPack,
                        "item_class_6" => AssetType::Consumable,
                        "item_class_7" => AssetType::SteamGems,
                        "item_class_8" => AssetType::ProfileModifier,
                        "item_class_10" => AssetType::SaleItem,
                        _ => AssetType::Unknown,
                    };
                }
                "cardborder" => {
                    foil = tag.internal_name == "cardborder_1";
                }
                "droprate" => {
                    rarity = match tag.internal_name.as_str() {
                        "droprate_0" => AssetRarity::Common,
                        "droprate_1" => AssetRarity::Uncommon,
                        "droprate_2" => AssetRarity::Rare,
                        _ => AssetRarity::Unknown,
                    };
                }
                "Game" => {
                    tag_app = tag
                        .internal_name
                        .strip_prefix("app_")
                        .and_then(|s| s.parse().ok());
                }
                _ => {}
            }
        }

        if asset_type == AssetType::TradingCard && foil {
            asset_type = AssetType::FoilTradingCard;
        }

        let real_app_id = self.market_fee_app.or(tag_app).unwrap_or(0);
        (asset_type, rarity, real_app_id)
    }
}

/// Decorate raw assets from their descriptions, dropping entries that
/// cannot be decoded.
pub(crate) fn decorate_assets(page: &InventoryPage) -> Vec<Asset> {
    let descriptions: HashMap<ClassId, &RawDescription> =
        page.descriptions.iter().map(|d| (d.classid, d)).collect();

    let mut out = Vec::with_capacity(page.assets.len());
    for raw in &page.assets {
        if raw.assetid == 0 || raw.classid == 0 || raw.amount == 0 {
            warn!(
                assetid = raw.assetid,
                classid = raw.classid,
                "Malformed inventory asset — please report this"
            );
            continue;
        }

        let Some(description) = descriptions.get(&raw.classid) else {
            warn!(
                classid = raw.classid,
                "Asset without description — please report this"
            );
            continue;
        };

        let (asset_type, rarity, real_app_id) = description.decode();
        if real_app_id == 0 {
            warn!(
                classid = raw.classid,
                "Description without real app id — please report this"
            );
            continue;
        }

        out.push(Asset {
            asset_id: raw.assetid,
            class_id: raw.classid,
            app_id: raw.appid.min(u64::from(u32::MAX)) as u32,
            context_id: raw.contextid,
            amount: raw.amount.min(u64::from(u32::MAX)) as u32,
            real_app_id,
            asset_type,
            rarity,
            marketable: description.marketable,
            tradable: description.tradable,
        });
    }
    out
}

/// Where the next page starts, if any. A page that claims more items but
/// carries no continuation id is broken and aborts the fetch.
pub(crate) fn next_page_start(page: &InventoryPage) -> Result<Option<u64>> {
    if !page.more_items {
        return Ok(None);
    }
    match page
        .last_assetid
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
    {
        Some(id) if id != 0 => Ok(Some(id)),
        _ => Err(SwapfarmError::BrokenPagination.into()),
    }
}

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

impl WebClient {
    /// Fetch a full inventory, filtered, paginating until exhausted.
    ///
    /// All inventory reads in the process are serialised through one
    /// semaphore, released `InventoryLimiterDelay` seconds after the fetch
    /// in the background.
    pub async fn fetch_inventory(
        &self,
        steam_id: SteamId,
        app_id: AppId,
        context_id: ContextId,
        filter: &InventoryFilter,
    ) -> Result<Vec<Asset>> {
        if steam_id == 0 {
            return Err(SwapfarmError::InvalidInput("steamID is zero".into()).into());
        }

        let permit = self
            .context
            .inventory_semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Inventory semaphore closed")?;

        let result = self
            .fetch_inventory_pages(steam_id, app_id, context_id, filter)
            .await;

        let delay = self.context.config.inventory_limiter_delay();
        if delay.is_zero() {
            drop(permit);
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                drop(permit);
            });
        }

        result
    }

    async fn fetch_inventory_pages(
        &self,
        steam_id: SteamId,
        app_id: AppId,
        context_id: ContextId,
        filter: &InventoryFilter,
    ) -> Result<Vec<Asset>> {
        let mut assets = Vec::new();
        let mut start_asset_id: Option<u64> = None;

        loop {
            let mut path = format!(
                "/inventory/{steam_id}/{app_id}/{context_id}?count={MAX_ITEMS_IN_SINGLE_INVENTORY_REQUEST}&l=english"
            );
            if let Some(start) = start_asset_id {
                path.push_str(&format!("&start_assetid={start}"));
            }

            let page: InventoryPage = self
                .get_json(HostKind::Community, &path, SessionField::Lowercase)
                .await
                .context("Inventory page fetch failed")?;

            debug!(
                steam_id,
                page_assets = page.assets.len(),
                total = page.total_inventory_count,
                "Inventory page fetched"
            );

            let decorated = decorate_assets(&page);
            assets.extend(decorated.into_iter().filter(|a| filter.accepts(a)));

            match next_page_start(&page)? {
                Some(start) => start_asset_id = Some(start),
                None => break,
            }
        }

        debug!(
            steam_id,
            count = assets.len(),
            "Inventory fetch complete"
        );
        Ok(assets)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
