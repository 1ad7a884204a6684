//! Active matching engine.
//!
//! A periodic pass over the directory listing: rank partners, plan fair
//! duplicate swaps per set against their tradable inventories, dispatch the
//! trades, and keep our local inventory view consistent after each one.
//! Everything is planned against stale views, so each round re-fetches and
//! the per-partner bookkeeping writes off partners that stop yielding
//! progress.

use anyhow::Result;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::directory::MatchingDirectory;
use super::swaps::{is_fair_exchange, pick_assets, plan_set_swaps};
use super::{eligibility, PlatformBackend};
use crate::account::{AccountHandle, Confirmer};
use crate::context::SharedContext;
use crate::types::{
    accepted_matchable_types, has_duplicates, partition_by_set, AssetId, AssetType,
    ClassCounts, ListedUser, SetKey, SteamId, SwapfarmError, TriedPartner, TRIES_EXHAUSTED,
};
use crate::web::inventory::InventoryFilter;
use crate::web::trades::{MAX_ITEMS_PER_TRADE, MAX_TRADES_PER_ACCOUNT};

/// Interval between active matching passes.
pub const ACTIVE_MATCH_PERIOD: Duration = Duration::from_secs(8 * 60 * 60);
/// Base delay before the first pass after logon.
const INITIAL_DELAY: Duration = Duration::from_secs(60 * 60);
/// Pause between rounds, giving partners time to react.
const MATCH_ROUND_DELAY: Duration = Duration::from_secs(5 * 60);
/// Upper bound on rounds per pass.
pub const MAX_MATCHING_ROUNDS: usize = 10;
/// Hard cap on candidates considered per round.
pub const MAX_MATCHED_BOTS_HARD: usize = 40;
/// Soft cap: give up after this many consecutive empty candidates.
pub const MAX_MATCHED_BOTS_SOFT: usize = 20;

pub struct ActiveMatcher {
    account: Arc<dyn AccountHandle>,
    backend: Arc<dyn PlatformBackend>,
    directory: Arc<dyn MatchingDirectory>,
    confirmer: Arc<dyn Confirmer>,
    context: Arc<SharedContext>,
    /// Non-blocking guard: ticks arriving during a pass are dropped.
    match_guard: Semaphore,
    /// Held for the duration of each round; mutually exclusive with other
    /// per-account operations that mutate inventory.
    trading_lock: Mutex<()>,
}

impl ActiveMatcher {
    pub fn new(
        account: Arc<dyn AccountHandle>,
        backend: Arc<dyn PlatformBackend>,
        directory: Arc<dyn MatchingDirectory>,
        confirmer: Arc<dyn Confirmer>,
        context: Arc<SharedContext>,
    ) -> Self {
        Self {
            account,
            backend,
            directory,
            confirmer,
            context,
            match_guard: Semaphore::new(1),
            trading_lock: Mutex::new(()),
        }
    }

    /// Start the periodic matching timer. The initial delay spreads
    /// accounts out by the configured load-balancing step; the returned
    /// handle cancels the timer when aborted.
    pub fn spawn(self: Arc<Self>, account_count: usize) -> JoinHandle<()> {
        let initial = INITIAL_DELAY
            + Duration::from_secs(
                self.context.config.load_balancing_delay * account_count as u64,
            );

        tokio::spawn(async move {
            tokio::time::sleep(initial).await;
            loop {
                if let Err(e) = self.match_actively().await {
                    warn!(error = %e, "Active matching pass failed");
                }
                tokio::time::sleep(ACTIVE_MATCH_PERIOD).await;
            }
        })
    }

    /// One full matching pass: up to [`MAX_MATCHING_ROUNDS`] rounds with
    /// re-checked eligibility in between. Returns whether any round made
    /// progress. Concurrent invocations are dropped, not queued.
    pub async fn match_actively(&self) -> Result<bool> {
        let Ok(_permit) = self.match_guard.try_acquire() else {
            debug!("Active matching already in flight, dropping tick");
            return Ok(false);
        };

        if !self.account.is_connected() {
            return Ok(false);
        }
        let prefs = self.account.trading_preferences();
        if !prefs.match_actively || prefs.match_everything {
            return Ok(false);
        }
        if eligibility(self.account.as_ref(), self.backend.as_ref()).await != Some(true) {
            debug!("Not eligible for active matching");
            return Ok(false);
        }

        let mut tried: HashMap<SteamId, TriedPartner> = HashMap::new();
        let mut any_progress = false;

        for round in 0..MAX_MATCHING_ROUNDS {
            if round > 0 {
                tokio::time::sleep(MATCH_ROUND_DELAY).await;
                if eligibility(self.account.as_ref(), self.backend.as_ref()).await
                    != Some(true)
                {
                    debug!("Eligibility lost between rounds");
                    break;
                }
            }

            let progress = {
                let _trading = self.trading_lock.lock().await;
                self.match_actively_round(&mut tried).await?
            };

            info!(round, progress, "Matching round finished");
            if !progress {
                break;
            }
            any_progress = true;
        }

        Ok(any_progress)
    }

    /// One matching round against the current directory listing.
    async fn match_actively_round(
        &self,
        tried: &mut HashMap<SteamId, TriedPartner>,
    ) -> Result<bool> {
        let me = self.account.steam_id();
        let our_types = accepted_matchable_types(&self.account.matchable_types());
        if our_types.is_empty() {
            return Ok(false);
        }

        // Both tradable and untradable copies: duplicates are judged on the
        // full state, given items must be tradable.
        let filter = InventoryFilter {
            types: Some(our_types.iter().copied().collect()),
            ..Default::default()
        };
        let assets = self.backend.fetch_inventory(me, &filter).await?;
        let (mut full, mut tradable) = partition_by_set(&assets);

        if !has_duplicates(&full) {
            debug!("No duplicates left, nothing to match");
            return Ok(false);
        }

        let listed = self.directory.list_bots().await?;
        let candidates =
            select_candidates(listed, tried, &our_types, me, &|id| {
                self.account.is_blacklisted(id)
            });
        debug!(count = candidates.len(), "Candidates ranked");

        let mut skipped_sets_round: HashSet<SetKey> = HashSet::new();
        let mut empty_matches = 0usize;

        for user in candidates {
            let wanted: BTreeSet<SetKey> = full
                .iter()
                .filter(|(key, classes)| {
                    user.accepts(key.asset_type) && classes.values().any(|&c| c > 1)
                })
                .map(|(key, _)| *key)
                .collect();
            if wanted.is_empty() {
                // Nothing this partner could take; tries stays untouched.
                continue;
            }

            let their_assets = match self
                .backend
                .fetch_inventory(
                    user.steam_id,
                    &InventoryFilter::tradable_of_sets(wanted.iter().copied()),
                )
                .await
            {
                Ok(assets) => assets,
                Err(e) => {
                    warn!(partner = user.steam_id, error = %e, "Partner inventory fetch failed");
                    continue;
                }
            };
            // The fetch was restricted to tradable items, so the full
            // partition is their tradable view.
            let (mut their_state, _) = partition_by_set(&their_assets);

            let mut skipped_sets_user: HashSet<SetKey> = HashSet::new();
            let mut used_give: HashSet<AssetId> = HashSet::new();
            let mut used_receive: HashSet<AssetId> = HashSet::new();

            'trades: for _ in 0..MAX_TRADES_PER_ACCOUNT {
                let mut plan_give: HashMap<SetKey, ClassCounts> = HashMap::new();
                let mut plan_receive: HashMap<SetKey, ClassCounts> = HashMap::new();
                let mut full_after: HashMap<SetKey, ClassCounts> = HashMap::new();
                let mut tradable_after: HashMap<SetKey, ClassCounts> = HashMap::new();
                let mut sets_this_trade: BTreeSet<SetKey> = BTreeSet::new();
                let mut items_in_trade = 0usize;

                for set in &wanted {
                    if skipped_sets_user.contains(set) {
                        continue;
                    }
                    if items_in_trade >= MAX_ITEMS_PER_TRADE - 1 {
                        break;
                    }
                    let Some(their_set) = their_state.get_mut(set) else {
                        continue;
                    };

                    let mut our_full_set = full.get(set).cloned().unwrap_or_default();
                    let mut our_tradable_set =
                        tradable.get(set).cloned().unwrap_or_default();
                    let mut set_give = ClassCounts::new();
                    let mut set_receive = ClassCounts::new();

                    if plan_set_swaps(
                        &mut our_full_set,
                        &mut our_tradable_set,
                        their_set,
                        &mut set_give,
                        &mut set_receive,
                        &mut items_in_trade,
                    ) {
                        sets_this_trade.insert(*set);
                        plan_give.insert(*set, set_give);
                        plan_receive.insert(*set, set_receive);
                        full_after.insert(*set, our_full_set);
                        tradable_after.insert(*set, our_tradable_set);
                    }
                }

                if sets_this_trade.is_empty() {
                    break;
                }

                let mut items_to_give = Vec::new();
                let mut items_to_receive = Vec::new();
                let mut stale = false;
                for set in &sets_this_trade {
                    match pick_assets(&assets, *set, &plan_give[set], true, &mut used_give) {
                        Some(mut picked) => items_to_give.append(&mut picked),
                        None => {
                            stale = true;
                            break;
                        }
                    }
                    match pick_assets(
                        &their_assets,
                        *set,
                        &plan_receive[set],
                        false,
                        &mut used_receive,
                    ) {
                        Some(mut picked) => items_to_receive.append(&mut picked),
                        None => {
                            stale = true;
                            break;
                        }
                    }
                }
                if stale {
                    break;
                }

                // Fatal: a plan that fails the fairness rule means the
                // planner state is corrupt, not just this trade.
                if !is_fair_exchange(&items_to_give, &items_to_receive) {
                    return Err(SwapfarmError::UnfairTrade.into());
                }

                let entry = tried.entry(user.steam_id).or_default();
                if entry.already_offered(&items_to_give, &items_to_receive) {
                    debug!(
                        partner = user.steam_id,
                        "Verbatim repeat of a previous offer, writing partner off"
                    );
                    entry.tries = TRIES_EXHAUSTED;
                    break 'trades;
                }
                entry.record(&items_to_give, &items_to_receive);

                let token =
                    Some(user.trade_token.as_str()).filter(|token| !token.is_empty());
                match self
                    .backend
                    .send_trade_offer(user.steam_id, &items_to_give, &items_to_receive, token)
                    .await
                {
                    Ok(result) => {
                        info!(
                            partner = user.steam_id,
                            offers = result.trade_offer_ids.len(),
                            give = items_to_give.len(),
                            receive = items_to_receive.len(),
                            "Swap trade dispatched"
                        );
                        if result.requires_mobile_confirmation {
                            if let Err(e) = self
                                .confirmer
                                .accept_confirmations(&result.trade_offer_ids)
                                .await
                            {
                                warn!(error = %e, "Mobile confirmation handling failed");
                            }
                        }

                        // Commit the planned deltas to the working states.
                        for set in &sets_this_trade {
                            if let Some(counts) = full_after.remove(set) {
                                full.insert(*set, counts);
                            }
                            if let Some(counts) = tradable_after.remove(set) {
                                tradable.insert(*set, counts);
                            }
                        }
                        skipped_sets_user.extend(sets_this_trade.iter().copied());
                    }
                    Err(e) => {
                        warn!(partner = user.steam_id, error = %e, "Trade dispatch failed");
                        break 'trades;
                    }
                }
            }

            if skipped_sets_user.is_empty() {
                if skipped_sets_round.is_empty() {
                    // Nothing moved all round and this partner added nothing:
                    // not worth revisiting this pass.
                    tried.entry(user.steam_id).or_default().tries = TRIES_EXHAUSTED;
                }
                empty_matches += 1;
                if empty_matches >= MAX_MATCHED_BOTS_SOFT {
                    debug!(empty_matches, "Too many empty candidates, ending round");
                    break;
                }
                continue;
            }

            skipped_sets_round.extend(skipped_sets_user.iter().copied());
            for set in &skipped_sets_user {
                full.remove(set);
                tradable.remove(set);
            }
            if !has_duplicates(&full) {
                break;
            }
        }

        Ok(!skipped_sets_round.is_empty())
    }
}

/// Filter and rank directory candidates: must match everything, overlap our
/// types, not be blacklisted or written off; ordered by `(tries ASC,
/// score DESC)` and capped at [`MAX_MATCHED_BOTS_HARD`].
pub(crate) fn select_candidates(
    listed: Vec<ListedUser>,
    tried: &HashMap<SteamId, TriedPartner>,
    our_types: &[AssetType],
    me: SteamId,
    is_blacklisted: &dyn Fn(SteamId) -> bool,
) -> Vec<ListedUser> {
    let tries_of = |user: &ListedUser| tried.get(&user.steam_id).map_or(0, |t| t.tries);

    let mut candidates: Vec<ListedUser> = listed
        .into_iter()
        .filter(|user| {
            user.steam_id != me
                && user.match_everything
                && user.matchable_types().iter().any(|t| our_types.contains(t))
                && !is_blacklisted(user.steam_id)
                && tries_of(user) < TRIES_EXHAUSTED
        })
        .collect();

    candidates.sort_by(|a, b| {
        tries_of(a).cmp(&tries_of(b)).then(
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });
    candidates.truncate(MAX_MATCHED_BOTS_HARD);
    candidates
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
