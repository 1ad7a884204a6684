//! Active matcher scenarios: planning, dispatch, bookkeeping.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use swapfarm::config::GlobalConfig;
use swapfarm::context::SharedContext;
use swapfarm::matcher::active::ActiveMatcher;
use swapfarm::matcher::swaps::is_fair_exchange;
use swapfarm::types::{ListedUser, SteamId};

use crate::mock_backend::{
    card, emoticon, listed_user, MockAccount, MockBackend, MockConfirmer, MockDirectory, OUR_ID,
};

const PARTNER: SteamId = 76_561_198_000_001_001;

struct Harness {
    #[allow(dead_code)]
    account: Arc<MockAccount>,
    backend: Arc<MockBackend>,
    directory: Arc<MockDirectory>,
    confirmer: Arc<MockConfirmer>,
    matcher: ActiveMatcher,
}

fn harness(account: MockAccount, backend: MockBackend, listing: Vec<ListedUser>) -> Harness {
    let account = Arc::new(account);
    let backend = Arc::new(backend);
    let directory = Arc::new(MockDirectory::new(listing));
    let confirmer = Arc::new(MockConfirmer::default());
    let context = SharedContext::new(GlobalConfig::default());

    let matcher = ActiveMatcher::new(
        account.clone(),
        backend.clone(),
        directory.clone(),
        confirmer.clone(),
        context,
    );

    Harness {
        account,
        backend,
        directory,
        confirmer,
        matcher,
    }
}

/// Ours: three copies of one card class plus a single of another.
/// Partner: two card classes we own nothing of.
fn duplicate_scenario(backend: &MockBackend) {
    backend.set_inventory(
        OUR_ID,
        vec![
            card(1, 100, 440),
            card(2, 100, 440),
            card(3, 100, 440),
            card(4, 101, 440),
        ],
    );
    backend.set_inventory(PARTNER, vec![card(9001, 200, 440), card(9002, 201, 440)]);
}

#[tokio::test(start_paused = true)]
async fn test_single_pass_swaps_duplicates() {
    let h = harness(
        MockAccount::eligible(),
        MockBackend::new(true),
        vec![listed_user(PARTNER, 10, 100)],
    );
    duplicate_scenario(&h.backend);

    let progress = h.matcher.match_actively().await.unwrap();
    assert!(progress);

    let trades = h.backend.trades();
    assert_eq!(trades.len(), 1);
    let trade = &trades[0];

    assert_eq!(trade.partner, PARTNER);
    assert_eq!(trade.trade_token.as_deref(), Some("token"));

    // Two duplicates out, two new classes in; fair by construction.
    assert_eq!(trade.give.len(), 2);
    assert_eq!(trade.receive.len(), 2);
    assert!(trade.give.iter().all(|a| a.class_id == 100));
    assert!(is_fair_exchange(&trade.give, &trade.receive));

    // The mock applied the trade: we no longer hold duplicates.
    let ours = h.backend.inventories.lock().unwrap()[&OUR_ID].clone();
    assert_eq!(ours.len(), 4);
    let dupes = ours.iter().filter(|a| a.class_id == 100).count();
    assert_eq!(dupes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_verbatim_repeat_writes_partner_off() {
    // Trades are accepted by the platform but never move items, so the
    // second round plans the exact same offer again.
    let h = harness(
        MockAccount::eligible(),
        MockBackend::new(false),
        vec![listed_user(PARTNER, 10, 100)],
    );
    duplicate_scenario(&h.backend);

    let progress = h.matcher.match_actively().await.unwrap();
    assert!(progress);

    // Round 1 dispatched once; round 2 detected the verbatim repeat and
    // wrote the partner off instead of re-sending.
    assert_eq!(h.backend.trades().len(), 1);
    assert_eq!(h.directory.listings_served.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_no_duplicates_means_no_progress() {
    let h = harness(
        MockAccount::eligible(),
        MockBackend::new(true),
        vec![listed_user(PARTNER, 10, 100)],
    );
    h.backend
        .set_inventory(OUR_ID, vec![card(1, 100, 440), card(2, 101, 440)]);

    let progress = h.matcher.match_actively().await.unwrap();

    assert!(!progress);
    assert!(h.backend.trades().is_empty());
    // The round ended before the directory was even consulted.
    assert_eq!(h.directory.listings_served.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_partner_without_type_overlap_skipped() {
    // Our duplicates are emoticons; the partner only takes cards.
    let mut partner = listed_user(PARTNER, 10, 100);
    partner.matchable_emoticons = false;
    partner.matchable_backgrounds = false;
    partner.matchable_foil_cards = false;

    let h = harness(MockAccount::eligible(), MockBackend::new(true), vec![partner]);
    h.backend.set_inventory(
        OUR_ID,
        vec![emoticon(21, 300, 440), emoticon(22, 300, 440)],
    );
    h.backend.set_inventory(PARTNER, vec![card(9001, 200, 440)]);

    let progress = h.matcher.match_actively().await.unwrap();

    assert!(!progress);
    assert!(h.backend.trades().is_empty());
    assert_eq!(h.directory.listings_served.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_partner_with_empty_inventory_yields_nothing() {
    let h = harness(
        MockAccount::eligible(),
        MockBackend::new(true),
        vec![listed_user(PARTNER, 10, 100)],
    );
    duplicate_scenario(&h.backend);
    h.backend.set_inventory(PARTNER, Vec::new());

    let progress = h.matcher.match_actively().await.unwrap();

    assert!(!progress);
    assert!(h.backend.trades().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_blacklisted_partner_ignored() {
    let mut account = MockAccount::eligible();
    account.blacklist.insert(PARTNER);

    let h = harness(
        account,
        MockBackend::new(true),
        vec![listed_user(PARTNER, 10, 100)],
    );
    duplicate_scenario(&h.backend);

    let progress = h.matcher.match_actively().await.unwrap();

    assert!(!progress);
    assert!(h.backend.trades().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_invocation_is_dropped() {
    let h = harness(
        MockAccount::eligible(),
        MockBackend::new(true),
        vec![listed_user(PARTNER, 10, 100)],
    );
    duplicate_scenario(&h.backend);
    // Let the first pass park inside the directory call so the second
    // invocation observes the guard as taken.
    *h.directory.list_delay.lock().unwrap() = Some(Duration::from_secs(1));

    let (first, second) = tokio::join!(h.matcher.match_actively(), h.matcher.match_actively());

    assert!(first.unwrap());
    assert!(!second.unwrap());
    assert_eq!(h.backend.trades().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_match_everything_preference_disables_active_matching() {
    let mut account = MockAccount::eligible();
    account.preferences.match_everything = true;

    let h = harness(
        account,
        MockBackend::new(true),
        vec![listed_user(PARTNER, 10, 100)],
    );
    duplicate_scenario(&h.backend);

    assert!(!h.matcher.match_actively().await.unwrap());
    assert_eq!(h.directory.listings_served.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_account_skips() {
    let mut account = MockAccount::eligible();
    account.connected = false;

    let h = harness(
        account,
        MockBackend::new(true),
        vec![listed_user(PARTNER, 10, 100)],
    );
    duplicate_scenario(&h.backend);

    assert!(!h.matcher.match_actively().await.unwrap());
    assert!(h.backend.trades().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_mobile_confirmations_deferred_to_confirmer() {
    let mut backend = MockBackend::new(true);
    backend.needs_confirmation = true;

    let h = harness(
        MockAccount::eligible(),
        backend,
        vec![listed_user(PARTNER, 10, 100)],
    );
    duplicate_scenario(&h.backend);

    assert!(h.matcher.match_actively().await.unwrap());

    let confirmed = h.confirmer.confirmed.lock().unwrap().clone();
    assert_eq!(confirmed.len(), 1, "offer id should reach the confirmer");
}

#[tokio::test(start_paused = true)]
async fn test_trade_dispatch_failure_ends_pass_cleanly() {
    let h = harness(
        MockAccount::eligible(),
        MockBackend::new(true),
        vec![listed_user(PARTNER, 10, 100)],
    );
    duplicate_scenario(&h.backend);
    *h.backend.trade_error.lock().unwrap() = true;

    let progress = h.matcher.match_actively().await.unwrap();

    assert!(!progress);
    assert!(h.backend.trades().is_empty());
}
