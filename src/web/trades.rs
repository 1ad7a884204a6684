//! Trade offer submission and related account endpoints.
//!
//! Trades above the per-trade item cap are split into additional offers, up
//! to the per-account cap; each sub-trade posts a `json_tradeoffer` body and
//! the results (offer ids, mobile confirmation requirements) are aggregated.
//! Wallet code redemption, digital gift cards, and the mobile confirmation
//! endpoints used by the external confirmation handler also live here.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::client::{HostKind, SessionField, WebClient};
use crate::types::{Asset, SteamId, SwapfarmError};

/// Maximum items (both sides combined) in a single trade offer.
pub const MAX_ITEMS_PER_TRADE: usize = 255;
/// Maximum simultaneous trade offers against one account.
pub const MAX_TRADES_PER_ACCOUNT: usize = 5;

/// Aggregated outcome of a (possibly split) trade submission.
#[derive(Debug, Clone, Default)]
pub struct TradeOfferResult {
    pub requires_mobile_confirmation: bool,
    pub trade_offer_ids: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct TradeOfferSendResponse {
    #[serde(default)]
    tradeofferid: Option<String>,
    #[serde(default)]
    needs_mobile_confirmation: bool,
}

/// Split a trade into per-offer chunks.
///
/// Give and receive sides are chunked in lockstep so each offer stays
/// under the item cap; at most [`MAX_TRADES_PER_ACCOUNT`] offers are
/// produced and the remainder is dropped with a warning.
pub(crate) fn split_trade(
    items_to_give: &[Asset],
    items_to_receive: &[Asset],
    force_single_offer: bool,
) -> Vec<(Vec<Asset>, Vec<Asset>)> {
    let total = items_to_give.len() + items_to_receive.len();
    if force_single_offer || total <= MAX_ITEMS_PER_TRADE {
        return vec![(items_to_give.to_vec(), items_to_receive.to_vec())];
    }

    let offers: Vec<(Vec<Asset>, Vec<Asset>)> = if items_to_give.is_empty() {
        items_to_receive
            .chunks(MAX_ITEMS_PER_TRADE)
            .map(|chunk| (Vec::new(), chunk.to_vec()))
            .take(MAX_TRADES_PER_ACCOUNT)
            .collect()
    } else if items_to_receive.is_empty() {
        items_to_give
            .chunks(MAX_ITEMS_PER_TRADE)
            .map(|chunk| (chunk.to_vec(), Vec::new()))
            .take(MAX_TRADES_PER_ACCOUNT)
            .collect()
    } else {
        // Equal halves keep |give| close to |receive| within each offer.
        let per_side = MAX_ITEMS_PER_TRADE / 2;
        items_to_give
            .chunks(per_side)
            .map(<[Asset]>::to_vec)
            .zip(items_to_receive.chunks(per_side).map(<[Asset]>::to_vec))
            .take(MAX_TRADES_PER_ACCOUNT)
            .collect()
    };
    let sent_items: usize = offers.iter().map(|(g, r)| g.len() + r.len()).sum();
    if sent_items < total {
        warn!(
            total,
            sent = sent_items,
            "Trade exceeds per-account limits; surplus items not offered"
        );
    }
    offers
}

/// The `json_tradeoffer` body for one offer.
pub(crate) fn trade_offer_body(give: &[Asset], receive: &[Asset]) -> serde_json::Value {
    let wire = |assets: &[Asset]| -> Vec<serde_json::Value> {
        assets
            .iter()
            .map(|a| {
                json!({
                    "appid": a.app_id,
                    "contextid": a.context_id.to_string(),
                    "amount": a.amount,
                    "assetid": a.asset_id.to_string(),
                })
            })
            .collect()
    };

    json!({
        "newversion": true,
        "version": 2,
        "me": { "assets": wire(give), "currency": [], "ready": false },
        "them": { "assets": wire(receive), "currency": [], "ready": false },
    })
}

impl WebClient {
    /// Send an item-for-item trade offer, splitting when needed.
    pub async fn send_trade_offer(
        &self,
        partner: SteamId,
        items_to_give: &[Asset],
        items_to_receive: &[Asset],
        trade_token: Option<&str>,
        force_single_offer: bool,
    ) -> Result<TradeOfferResult> {
        if partner == 0 {
            return Err(SwapfarmError::InvalidInput("partner steamID is zero".into()).into());
        }
        if items_to_give.is_empty() && items_to_receive.is_empty() {
            return Err(SwapfarmError::InvalidInput("trade with no items".into()).into());
        }

        let mut result = TradeOfferResult::default();

        for (give, receive) in split_trade(items_to_give, items_to_receive, force_single_offer)
        {
            let mut form = vec![
                ("serverid".to_string(), "1".to_string()),
                ("partner".to_string(), partner.to_string()),
                ("tradeoffermessage".to_string(), String::new()),
                (
                    "json_tradeoffer".to_string(),
                    trade_offer_body(&give, &receive).to_string(),
                ),
            ];
            if let Some(token) = trade_token.filter(|t| !t.is_empty()) {
                form.push((
                    "trade_offer_create_params".to_string(),
                    json!({ "trade_offer_access_token": token }).to_string(),
                ));
            }

            let resp: TradeOfferSendResponse = self
                .post_form_json(
                    HostKind::Community,
                    "/tradeoffer/new/send",
                    &form,
                    SessionField::Lowercase,
                )
                .await
                .context("Trade offer submission failed")?;

            let offer_id = resp
                .tradeofferid
                .as_deref()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| {
                    SwapfarmError::MalformedResponse("missing tradeofferid".into())
                })?;

            info!(
                partner,
                offer_id,
                give = give.len(),
                receive = receive.len(),
                confirmation = resp.needs_mobile_confirmation,
                "Trade offer sent"
            );

            result.trade_offer_ids.push(offer_id);
            result.requires_mobile_confirmation |= resp.needs_mobile_confirmation;
        }

        Ok(result)
    }

    // -- Wallet & gifts ----------------------------------------------------

    /// Redeem a wallet code on the store.
    pub async fn redeem_wallet_key(&self, key: &str) -> Result<bool> {
        if key.is_empty() {
            return Err(SwapfarmError::InvalidInput("wallet key is empty".into()).into());
        }

        #[derive(Deserialize)]
        struct RedeemResponse {
            success: i64,
        }

        let form = vec![("wallet_code".to_string(), key.to_string())];
        let resp: RedeemResponse = self
            .post_form_json(
                HostKind::Store,
                "/account/ajaxredeemwalletcode",
                &form,
                SessionField::Lowercase,
            )
            .await
            .context("Wallet redeem failed")?;

        Ok(resp.success == 1)
    }

    /// Accept a pending digital gift card.
    pub async fn accept_gift_card(&self, gift_card_id: u64) -> Result<bool> {
        if gift_card_id == 0 {
            return Err(SwapfarmError::InvalidInput("giftCardID is zero".into()).into());
        }

        #[derive(Deserialize)]
        struct ResolveResponse {
            success: i64,
        }

        let form = vec![
            ("accept".to_string(), "1".to_string()),
            ("giftcardid".to_string(), gift_card_id.to_string()),
        ];
        let resp: ResolveResponse = self
            .post_form_json(
                HostKind::Store,
                "/gifts/0/resolvegiftcard",
                &form,
                SessionField::Lowercase,
            )
            .await
            .context("Gift card acceptance failed")?;

        Ok(resp.success == 1)
    }

    // -- Mobile confirmations ----------------------------------------------

    /// List pending mobile confirmations. Credentials are computed by the
    /// external confirmation handler; this only speaks the endpoint.
    pub async fn get_confirmations(
        &self,
        device_id: &str,
        confirmation_hash: &str,
        time: u64,
    ) -> Result<Vec<Confirmation>> {
        let account = self
            .account
            .upgrade()
            .ok_or_else(|| SwapfarmError::SessionRefresh("account handle gone".into()))?;

        #[derive(Deserialize)]
        struct ConfirmationsResponse {
            #[serde(default)]
            success: bool,
            #[serde(default)]
            conf: Vec<Confirmation>,
        }

        let path = format!(
            "/mobileconf/getlist?p={device_id}&a={}&k={}&t={time}&m=react&tag=conf",
            account.steam_id(),
            urlencode(confirmation_hash),
        );
        let resp: ConfirmationsResponse = self
            .get_json(HostKind::Community, &path, SessionField::None)
            .await
            .context("Confirmations fetch failed")?;

        if !resp.success {
            return Err(
                SwapfarmError::MalformedResponse("confirmations listing failed".into()).into(),
            );
        }
        Ok(resp.conf)
    }

    /// Accept or cancel one confirmation.
    pub async fn respond_confirmation(
        &self,
        device_id: &str,
        confirmation_hash: &str,
        time: u64,
        confirmation: &Confirmation,
        accept: bool,
    ) -> Result<bool> {
        let account = self
            .account
            .upgrade()
            .ok_or_else(|| SwapfarmError::SessionRefresh("account handle gone".into()))?;

        #[derive(Deserialize)]
        struct OpResponse {
            #[serde(default)]
            success: bool,
        }

        let op = if accept { "allow" } else { "cancel" };
        let path = format!(
            "/mobileconf/ajaxop?op={op}&p={device_id}&a={}&k={}&t={time}&m=react&tag=conf&cid={}&ck={}",
            account.steam_id(),
            urlencode(confirmation_hash),
            confirmation.id,
            confirmation.nonce,
        );
        let resp: OpResponse = self
            .get_json(HostKind::Community, &path, SessionField::None)
            .await
            .context("Confirmation response failed")?;
        Ok(resp.success)
    }
}

/// A pending mobile confirmation entry.
#[derive(Debug, Clone, Deserialize)]
pub struct Confirmation {
    #[serde(deserialize_with = "super::inventory::u64_from_any")]
    pub id: u64,
    #[serde(deserialize_with = "super::inventory::u64_from_any")]
    pub nonce: u64,
    #[serde(default)]
    pub creator_id: Option<String>,
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
