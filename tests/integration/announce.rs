//! Announcement and heartbeat engine scenarios.

use chrono::{DateTime, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use swapfarm::matcher::announcer::{
    Announcer, AnnouncementState, MIN_HEARTBEAT_TTL, MIN_ITEMS_COUNT,
};
use swapfarm::types::AssetType;

use crate::mock_backend::{
    card, emoticon, ForcedOutcome, MockAccount, MockBackend, MockDirectory, OUR_ID,
};

const MINUTE: Duration = Duration::from_secs(60);

fn setup(
    account: MockAccount,
    item_count: usize,
) -> (Arc<MockAccount>, Arc<MockBackend>, Arc<MockDirectory>, Announcer) {
    let account = Arc::new(account);
    let backend = Arc::new(MockBackend::new(false));
    let directory = Arc::new(MockDirectory::new(Vec::new()));

    // Cards spread over two apps so games_count is meaningful.
    let inventory = (0..item_count as u64)
        .map(|i| card(1000 + i, 100 + i, if i % 2 == 0 { 440 } else { 570 }))
        .collect();
    backend.set_inventory(OUR_ID, inventory);

    let announcer = Announcer::new(account.clone(), backend.clone(), directory.clone());
    (account, backend, directory, announcer)
}

#[tokio::test]
async fn test_announce_success() {
    let (_, _, directory, announcer) = setup(MockAccount::eligible(), 120);

    announcer.on_persona_state("trader", "ffaa00").await.unwrap();

    let announcements = directory.announcements.lock().unwrap().clone();
    assert_eq!(announcements.len(), 1);
    let a = &announcements[0];
    assert_eq!(a.steam_id, OUR_ID);
    assert_eq!(a.nickname, "trader");
    assert_eq!(a.avatar_hash, "ffaa00");
    assert_eq!(a.items_count, 120);
    assert_eq!(a.games_count, 2);
    assert_eq!(a.trade_token, "ourtoken");
    assert!(!a.match_everything);
    assert!(a.matchable_types.contains(&AssetType::TradingCard));
    assert!(!a.guid.is_empty());

    let state = announcer.state().await;
    assert!(state.should_send_heart_beats);
    assert!(state.last_heart_beat > DateTime::<Utc>::UNIX_EPOCH);
    assert!(state.last_announcement_check > DateTime::<Utc>::UNIX_EPOCH);
}

#[tokio::test]
async fn test_announce_cooldown_skips_second_callback() {
    let (_, _, directory, announcer) = setup(MockAccount::eligible(), 120);

    announcer.on_persona_state("trader", "aa").await.unwrap();
    announcer.on_persona_state("trader", "aa").await.unwrap();

    assert_eq!(directory.announcements.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_announce_below_minimum_items() {
    // Exactly one item short of the minimum.
    let (_, _, directory, announcer) = setup(MockAccount::eligible(), MIN_ITEMS_COUNT - 1);

    announcer.on_persona_state("trader", "aa").await.unwrap();

    assert!(directory.announcements.lock().unwrap().is_empty());
    let state = announcer.state().await;
    assert!(!state.should_send_heart_beats);
    // The check itself is recorded.
    assert!(state.last_announcement_check > DateTime::<Utc>::UNIX_EPOCH);
}

#[tokio::test]
async fn test_announce_only_non_matchable_items() {
    // Plenty of items, but none of a type this account matches.
    let mut account = MockAccount::eligible();
    account.matchable_types = [AssetType::TradingCard].into_iter().collect();
    let (_, backend, directory, announcer) = setup(account, 0);
    backend.set_inventory(
        OUR_ID,
        (0..120u64).map(|i| emoticon(2000 + i, 300 + i, 440)).collect(),
    );

    announcer.on_persona_state("trader", "aa").await.unwrap();

    assert!(directory.announcements.lock().unwrap().is_empty());
    let state = announcer.state().await;
    assert!(!state.should_send_heart_beats);
}

#[tokio::test]
async fn test_announce_client_error_disables_heartbeats() {
    let (_, _, directory, announcer) = setup(MockAccount::eligible(), 120);
    *directory.announce_outcome.lock().unwrap() = ForcedOutcome::ClientError(403);

    announcer.on_persona_state("trader", "aa").await.unwrap();

    let state = announcer.state().await;
    assert!(!state.should_send_heart_beats);
    assert_eq!(state.last_heart_beat, DateTime::<Utc>::UNIX_EPOCH);
    assert!(state.last_announcement_check > DateTime::<Utc>::UNIX_EPOCH);
}

#[tokio::test]
async fn test_announce_network_failure_does_not_record_check() {
    let (_, _, directory, announcer) = setup(MockAccount::eligible(), 120);
    *directory.announce_outcome.lock().unwrap() = ForcedOutcome::NetworkError;

    announcer.on_persona_state("trader", "aa").await.unwrap();

    let state = announcer.state().await;
    assert!(!state.should_send_heart_beats);
    // Not recorded: the engine retries on the next persona callback.
    assert_eq!(state.last_announcement_check, DateTime::<Utc>::UNIX_EPOCH);
}

#[tokio::test]
async fn test_ineligible_account_records_check_without_announcing() {
    let mut account = MockAccount::eligible();
    account.mobile_authenticator = false;
    let (_, _, directory, announcer) = setup(account, 120);

    announcer.on_persona_state("trader", "aa").await.unwrap();

    assert!(directory.announcements.lock().unwrap().is_empty());
    let state = announcer.state().await;
    assert!(state.last_announcement_check > DateTime::<Utc>::UNIX_EPOCH);
}

// -- Heartbeats ------------------------------------------------------------

#[tokio::test]
async fn test_heartbeat_after_announce() {
    let (_, _, directory, announcer) = setup(MockAccount::eligible(), 120);
    announcer.on_persona_state("trader", "aa").await.unwrap();

    // Age the heartbeat past its TTL, as if the timer fired later.
    let mut state = announcer.state().await;
    state.last_heart_beat = Utc::now() - MIN_HEARTBEAT_TTL - MINUTE;
    announcer.restore_state(state).await;

    announcer.on_heart_beat().await.unwrap();

    assert_eq!(directory.heartbeats.load(Ordering::SeqCst), 1);
    // No second announcement happened.
    assert_eq!(directory.announcements.lock().unwrap().len(), 1);
    let state = announcer.state().await;
    assert!(state.last_heart_beat > Utc::now() - MINUTE);
}

#[tokio::test]
async fn test_heartbeat_not_due_is_noop() {
    let (_, _, directory, announcer) = setup(MockAccount::eligible(), 120);
    announcer.on_persona_state("trader", "aa").await.unwrap();

    announcer.on_heart_beat().await.unwrap();

    assert_eq!(directory.heartbeats.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_heartbeat_without_announce_is_noop() {
    let (_, _, directory, announcer) = setup(MockAccount::eligible(), 120);

    announcer.on_heart_beat().await.unwrap();

    assert_eq!(directory.heartbeats.load(Ordering::SeqCst), 0);
    assert!(directory.announcements.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_heartbeat_client_error_disables() {
    let (_, _, directory, announcer) = setup(MockAccount::eligible(), 120);
    announcer.on_persona_state("trader", "aa").await.unwrap();
    *directory.heartbeat_outcome.lock().unwrap() = ForcedOutcome::ClientError(410);

    let mut state = announcer.state().await;
    state.last_heart_beat = Utc::now() - MIN_HEARTBEAT_TTL - MINUTE;
    announcer.restore_state(state).await;

    announcer.on_heart_beat().await.unwrap();

    let state = announcer.state().await;
    assert!(!state.should_send_heart_beats);
    assert_eq!(state.last_heart_beat, DateTime::<Utc>::UNIX_EPOCH);
}

#[tokio::test]
async fn test_heartbeat_network_failure_stops_without_zeroing() {
    let (_, _, directory, announcer) = setup(MockAccount::eligible(), 120);
    announcer.on_persona_state("trader", "aa").await.unwrap();
    *directory.heartbeat_outcome.lock().unwrap() = ForcedOutcome::NetworkError;

    let mut state = announcer.state().await;
    let aged = Utc::now() - MIN_HEARTBEAT_TTL - MINUTE;
    state.last_heart_beat = aged;
    announcer.restore_state(state).await;

    announcer.on_heart_beat().await.unwrap();

    let state = announcer.state().await;
    assert!(!state.should_send_heart_beats);
    assert_eq!(state.last_heart_beat, aged);
}

#[tokio::test]
async fn test_persona_refresh_requested_when_ttls_lapse() {
    let (account, _, _, announcer) = setup(MockAccount::eligible(), 120);

    // Default state: both timestamps at the epoch, so both TTLs lapsed.
    announcer.on_heart_beat().await.unwrap();

    assert_eq!(account.persona_requests.load(Ordering::SeqCst), 1);
    let state = announcer.state().await;
    assert!(state.last_persona_state_request > DateTime::<Utc>::UNIX_EPOCH);

    // A second tick within the TTL does not re-request.
    announcer.on_heart_beat().await.unwrap();
    assert_eq!(account.persona_requests.load(Ordering::SeqCst), 1);
}

// -- State restore ----------------------------------------------------------

#[tokio::test]
async fn test_restore_state_roundtrip() {
    let (_, _, _, announcer) = setup(MockAccount::eligible(), 120);

    let restored = AnnouncementState {
        last_announcement_check: Utc::now() - (60 * MINUTE),
        last_heart_beat: Utc::now() - (5 * MINUTE),
        last_persona_state_request: Utc::now(),
        should_send_heart_beats: true,
    };
    announcer.restore_state(restored.clone()).await;

    let state = announcer.state().await;
    assert_eq!(state.last_announcement_check, restored.last_announcement_check);
    assert!(state.should_send_heart_beats);
}
