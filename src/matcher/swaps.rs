//! Swap planning within a single set.
//!
//! The planner reduces our duplicates toward a uniform count: give away
//! copies of classes we hold many of, receive classes we hold few of.
//! A swap is only accepted while it keeps `count(G) > count(R) + 1`
//! pre-swap, which guarantees it cannot overshoot uniformity.

use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::types::{Asset, AssetId, ClassCounts, ClassId, SetKey};
use crate::web::trades::MAX_ITEMS_PER_TRADE;

/// Plan swaps for one set against one partner.
///
/// Mutates the local working copies (`our_full`, `our_tradable`), the
/// partner's remaining items, and the per-set give/receive accumulators;
/// `items_in_trade` grows by two per swap. Returns whether any swap was
/// planned.
pub fn plan_set_swaps(
    our_full: &mut ClassCounts,
    our_tradable: &mut ClassCounts,
    their_items: &mut ClassCounts,
    give: &mut ClassCounts,
    receive: &mut ClassCounts,
    items_in_trade: &mut usize,
) -> bool {
    let mut planned = false;

    while *items_in_trade < MAX_ITEMS_PER_TRADE - 1 {
        let Some((give_class, receive_class)) = next_swap(our_full, our_tradable, their_items)
        else {
            break;
        };

        // Apply the swap to the working copies.
        if let Some(count) = our_full.get_mut(&give_class) {
            *count -= 1;
        }
        *our_full.entry(receive_class).or_insert(0) += 1;
        // The tradable count drops by the swapped amount alongside full.
        if let Some(count) = our_tradable.get_mut(&give_class) {
            *count = count.saturating_sub(1);
        }
        if let Some(count) = their_items.get_mut(&receive_class) {
            *count -= 1;
            if *count == 0 {
                their_items.remove(&receive_class);
            }
        }

        *give.entry(give_class).or_insert(0) += 1;
        *receive.entry(receive_class).or_insert(0) += 1;
        *items_in_trade += 2;
        planned = true;
    }

    planned
}

/// Find the best improving swap, if any.
///
/// Give candidates are our duplicate classes (count ≥ 2 with a tradable
/// copy), highest count first; for each, the receive candidate is the
/// partner class we own least of. The pair is accepted only while
/// `ourAmount(G) > ourAmount(R) + 1`.
fn next_swap(
    our_full: &ClassCounts,
    our_tradable: &ClassCounts,
    their_items: &ClassCounts,
) -> Option<(ClassId, ClassId)> {
    if their_items.is_empty() {
        return None;
    }

    let mut give_candidates: Vec<(ClassId, u32)> = our_full
        .iter()
        .filter(|(class, &count)| {
            count > 1 && our_tradable.get(class).copied().unwrap_or(0) > 0
        })
        .map(|(&class, &count)| (class, count))
        .collect();
    // Highest count first; class id breaks ties deterministically.
    give_candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    for (give_class, give_count) in give_candidates {
        let receive = their_items
            .iter()
            .filter(|(&class, &count)| count > 0 && class != give_class)
            .map(|(&class, _)| (class, our_full.get(&class).copied().unwrap_or(0)))
            .min_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));

        if let Some((receive_class, receive_count)) = receive {
            if give_count > receive_count + 1 {
                return Some((give_class, receive_class));
            }
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Fairness
// ---------------------------------------------------------------------------

/// Total item amount per set key.
fn amounts_per_set(items: &[Asset]) -> HashMap<SetKey, u64> {
    let mut counts: HashMap<SetKey, u64> = HashMap::new();
    for item in items {
        *counts.entry(item.set_key()).or_insert(0) += u64::from(item.amount);
    }
    counts
}

fn total_amount(items: &[Asset]) -> u64 {
    items.iter().map(|a| u64::from(a.amount)).sum()
}

/// The platform's fairness rule: both sides carry the same number of items
/// overall and within every set key.
pub fn is_fair_exchange(items_to_give: &[Asset], items_to_receive: &[Asset]) -> bool {
    if total_amount(items_to_give) != total_amount(items_to_receive) {
        return false;
    }
    amounts_per_set(items_to_give) == amounts_per_set(items_to_receive)
}

// ---------------------------------------------------------------------------
// Instance picking
// ---------------------------------------------------------------------------

/// Materialise planned class counts into concrete asset instances from a
/// fetched inventory, skipping instances already committed to earlier
/// trades. Returns `None` when the (stale) inventory view cannot satisfy
/// the plan.
pub fn pick_assets(
    pool: &[Asset],
    set: SetKey,
    classes: &ClassCounts,
    require_tradable: bool,
    used: &mut HashSet<AssetId>,
) -> Option<Vec<Asset>> {
    let mut picked = Vec::new();

    for (&class, &count) in classes {
        let mut need = count;
        let candidates: Vec<&Asset> = pool
            .iter()
            .filter(|a| {
                a.set_key() == set
                    && a.class_id == class
                    && (!require_tradable || a.tradable)
                    && !used.contains(&a.asset_id)
            })
            .collect();
        for asset in candidates {
            if need == 0 {
                break;
            }
            let take = need.min(asset.amount);
            let mut instance = asset.clone();
            instance.amount = take;
            used.insert(asset.asset_id);
            picked.push(instance);
            need -= take;
        }
        if need > 0 {
            warn!(%set, class, missing = need, "Inventory view too stale to satisfy plan");
            return None;
        }
    }

    Some(picked)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
