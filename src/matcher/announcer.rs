//! Announcement and heartbeat engine.
//!
//! A per-account state machine driven by two clocks: persona-state
//! callbacks gate announcements, a periodic timer drives heartbeats. An
//! eligible account with enough matchable items is announced to the
//! directory; afterwards heartbeats keep the listing alive until the
//! directory rejects one or the account stops qualifying.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::directory::{Announcement, DirectoryStatus, MatchingDirectory};
use super::{eligibility, PlatformBackend};
use crate::account::AccountHandle;
use crate::types::accepted_matchable_types;
use crate::web::inventory::InventoryFilter;

/// Minimum time between announcement checks.
pub const MIN_ANNOUNCEMENT_CHECK_TTL: Duration = Duration::from_secs(6 * 60 * 60);
/// Minimum time between heartbeats.
pub const MIN_HEARTBEAT_TTL: Duration = Duration::from_secs(10 * 60);
/// Minimum time between forced persona refreshes.
pub const MIN_PERSONA_STATE_TTL: Duration = Duration::from_secs(8 * 60 * 60);
/// Minimum matchable items for a listing to be worth announcing.
pub const MIN_ITEMS_COUNT: usize = 100;

/// The project's community group, joined best-effort on logon.
const PROJECT_GROUP_ID: u64 = 103_582_791_464_378_604;

/// Per-account announcement bookkeeping. Epoch timestamps mean "never".
/// Serializable so the embedding application can carry it across
/// reconnects, though persistence is not required.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AnnouncementState {
    pub last_announcement_check: DateTime<Utc>,
    pub last_heart_beat: DateTime<Utc>,
    pub last_persona_state_request: DateTime<Utc>,
    pub should_send_heart_beats: bool,
}

impl Default for AnnouncementState {
    fn default() -> Self {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        Self {
            last_announcement_check: epoch,
            last_heart_beat: epoch,
            last_persona_state_request: epoch,
            should_send_heart_beats: false,
        }
    }
}

impl AnnouncementState {
    /// Whether a persona-state callback should proceed to the announcement
    /// path. Skipped while the previous check is fresh and heartbeats are
    /// alive (or were never started).
    fn should_announce(&self, now: DateTime<Utc>) -> bool {
        let fresh = now < self.last_announcement_check + MIN_ANNOUNCEMENT_CHECK_TTL;
        let heartbeats_alive = self.should_send_heart_beats
            || self.last_heart_beat == DateTime::<Utc>::UNIX_EPOCH;
        !(fresh && heartbeats_alive)
    }
}

pub struct Announcer {
    account: Arc<dyn AccountHandle>,
    backend: Arc<dyn PlatformBackend>,
    directory: Arc<dyn MatchingDirectory>,
    /// Identifies this process instance to the directory.
    guid: String,
    /// Exclusive request guard; also owns the state.
    state: Mutex<AnnouncementState>,
}

impl Announcer {
    pub fn new(
        account: Arc<dyn AccountHandle>,
        backend: Arc<dyn PlatformBackend>,
        directory: Arc<dyn MatchingDirectory>,
    ) -> Self {
        Self {
            account,
            backend,
            directory,
            guid: uuid::Uuid::new_v4().to_string(),
            state: Mutex::new(AnnouncementState::default()),
        }
    }

    /// Snapshot of the current state, for diagnostics and tests.
    pub async fn state(&self) -> AnnouncementState {
        self.state.lock().await.clone()
    }

    /// Overwrite the state, e.g. when the embedding application restores
    /// it across reconnects.
    pub async fn restore_state(&self, state: AnnouncementState) {
        *self.state.lock().await = state;
    }

    // -- Persona clock -----------------------------------------------------

    /// The primary announce gate, driven by persona-state callbacks.
    pub async fn on_persona_state(&self, nickname: &str, avatar_hash: &str) -> Result<()> {
        {
            let state = self.state.lock().await;
            if !state.should_announce(Utc::now()) {
                return Ok(());
            }
        }

        let mut state = self.state.lock().await;
        let now = Utc::now();
        if !state.should_announce(now) {
            return Ok(());
        }

        match eligibility(self.account.as_ref(), self.backend.as_ref()).await {
            Some(true) => {}
            Some(false) => {
                state.last_announcement_check = now;
                state.should_send_heart_beats = false;
                return Ok(());
            }
            None => {
                // Network failure: stop heartbeats without recording the check.
                state.should_send_heart_beats = false;
                return Ok(());
            }
        }

        let trade_token = match self.account.trade_token().await {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => {
                debug!("No trade token available, not announcing");
                state.last_announcement_check = now;
                state.should_send_heart_beats = false;
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "Trade token fetch failed");
                state.should_send_heart_beats = false;
                return Ok(());
            }
        };

        let matchable_types = accepted_matchable_types(&self.account.matchable_types());
        let filter = InventoryFilter::tradable_of_types(matchable_types.iter().copied());
        let assets = match self
            .backend
            .fetch_inventory(self.account.steam_id(), &filter)
            .await
        {
            Ok(assets) => assets,
            Err(e) => {
                warn!(error = %e, "Inventory fetch for announcement failed");
                state.should_send_heart_beats = false;
                return Ok(());
            }
        };

        let items_count: usize = assets.iter().map(|a| a.amount as usize).sum();
        if items_count < MIN_ITEMS_COUNT {
            debug!(
                items_count,
                minimum = MIN_ITEMS_COUNT,
                "Not enough matchable items to announce"
            );
            state.last_announcement_check = now;
            state.should_send_heart_beats = false;
            return Ok(());
        }

        let games_count = {
            let mut apps: Vec<_> = assets.iter().map(|a| a.real_app_id).collect();
            apps.sort_unstable();
            apps.dedup();
            apps.len()
        };

        let announcement = Announcement {
            steam_id: self.account.steam_id(),
            guid: self.guid.clone(),
            nickname: nickname.to_string(),
            avatar_hash: avatar_hash.to_string(),
            items_count,
            games_count,
            matchable_types,
            match_everything: self.account.trading_preferences().match_everything,
            trade_token,
        };

        match self.directory.announce(&announcement).await {
            Ok(DirectoryStatus::Success) => {
                info!(items_count, games_count, "Announced to the matching directory");
                state.last_announcement_check = now;
                state.should_send_heart_beats = true;
                state.last_heart_beat = now;
            }
            Ok(DirectoryStatus::ClientError(status)) => {
                warn!(status, "Directory rejected the announcement");
                state.last_announcement_check = now;
                state.should_send_heart_beats = false;
                state.last_heart_beat = DateTime::<Utc>::UNIX_EPOCH;
            }
            Err(e) => {
                warn!(error = %e, "Announcement failed");
                state.should_send_heart_beats = false;
            }
        }

        Ok(())
    }

    // -- Heartbeat clock ---------------------------------------------------

    /// Periodic tick: refresh the persona when both TTLs lapsed, then send
    /// a heartbeat when due.
    pub async fn on_heart_beat(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        if now > state.last_persona_state_request + MIN_PERSONA_STATE_TTL
            && now > state.last_announcement_check + MIN_ANNOUNCEMENT_CHECK_TTL
        {
            if let Err(e) = self.account.request_persona_state().await {
                warn!(error = %e, "Persona state request failed");
            } else {
                state.last_persona_state_request = now;
            }
        }

        if !state.should_send_heart_beats || now < state.last_heart_beat + MIN_HEARTBEAT_TTL {
            return Ok(());
        }

        match self
            .directory
            .heart_beat(&self.guid, self.account.steam_id())
            .await
        {
            Ok(DirectoryStatus::Success) => {
                debug!("Heartbeat accepted");
                state.last_heart_beat = now;
            }
            Ok(DirectoryStatus::ClientError(status)) => {
                warn!(status, "Directory rejected the heartbeat");
                state.should_send_heart_beats = false;
                state.last_heart_beat = DateTime::<Utc>::UNIX_EPOCH;
            }
            Err(e) => {
                warn!(error = %e, "Heartbeat failed");
                state.should_send_heart_beats = false;
            }
        }

        Ok(())
    }

    // -- Logon clock -------------------------------------------------------

    /// Join the project group, best-effort.
    pub async fn on_logged_on(&self) {
        if let Err(e) = self.backend.join_group(PROJECT_GROUP_ID).await {
            warn!(error = %e, "Joining the project group failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
