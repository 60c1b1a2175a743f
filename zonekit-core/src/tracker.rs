//! Zone membership tracker: which zone each player is in.
//!
//! State is created lazily on a player's first enter and is only dropped by
//! [`ZoneMembershipTracker::clear`]. The map is guarded by one coarse lock
//! that is never held while events are published.
//!
//! `was_in_zone` means "has entered a zone at least once" and is never
//! cleared by an exit; `is_in_any_zone` tracks live membership and is what
//! [`ZoneMembershipTracker::players_in_zones`] filters on.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::events::{EventBus, PlayerEnteredZone, PlayerExitedZone};
use crate::types::{EntityHandle, Position};

/// Per-player zone state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerZoneState {
    /// Zone the player is in; empty when outside every zone.
    pub current_zone_id: String,
    /// Zone the player most recently left.
    pub previous_zone_id: String,
    /// The player has entered a zone at least once.
    pub was_in_zone: bool,
    /// The player is inside a zone right now.
    pub is_in_any_zone: bool,
    /// Opaque blood type label carried for the host.
    pub blood_type: Option<String>,
    /// Opaque blood quality carried for the host.
    pub blood_quality: f32,
    /// Position recorded at the last enter.
    pub last_position: Position,
    /// Last enter time.
    pub entered_at: Option<DateTime<Utc>>,
    /// Last exit time.
    pub exited_at: Option<DateTime<Utc>>,
    /// Last time this record changed.
    pub last_update: DateTime<Utc>,
}

impl PlayerZoneState {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            current_zone_id: String::new(),
            previous_zone_id: String::new(),
            was_in_zone: false,
            is_in_any_zone: false,
            blood_type: None,
            blood_quality: 0.0,
            last_position: Position::default(),
            entered_at: None,
            exited_at: None,
            last_update: now,
        }
    }
}

/// Owner of every [`PlayerZoneState`].
pub struct ZoneMembershipTracker {
    states: Mutex<HashMap<EntityHandle, PlayerZoneState>>,
    bus: Arc<EventBus>,
}

impl std::fmt::Debug for ZoneMembershipTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneMembershipTracker")
            .field("tracked", &self.tracked_count())
            .finish_non_exhaustive()
    }
}

impl ZoneMembershipTracker {
    /// Create an empty tracker publishing on `bus`.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            bus,
        }
    }

    /// Record an enter and publish [`PlayerEnteredZone`].
    pub fn on_player_enter_arena(&self, player: EntityHandle, zone_id: &str, position: Position) {
        let at = self.record_enter(player, zone_id, position);
        self.bus.publish(&PlayerEnteredZone {
            player,
            zone_id: zone_id.to_string(),
            position,
            at,
        });
    }

    /// Record an exit and publish [`PlayerExitedZone`].
    ///
    /// The event is published even when the player had no state, so
    /// duplicate or out-of-order exits stay visible to subscribers.
    pub fn on_player_exit_arena(&self, player: EntityHandle, zone_id: &str) {
        let at = self.record_exit(player, zone_id);
        self.bus.publish(&PlayerExitedZone {
            player,
            zone_id: zone_id.to_string(),
            implicit: false,
            at,
        });
    }

    /// Membership update for an enter, without publishing.
    ///
    /// Overwrites any current zone; callers that need an exit for the old
    /// zone must process it first. Returns the transition time.
    pub fn record_enter(&self, player: EntityHandle, zone_id: &str, position: Position) -> DateTime<Utc> {
        let now = Utc::now();
        let mut states = self.states.lock();
        let state = states
            .entry(player)
            .or_insert_with(|| PlayerZoneState::fresh(now));
        if state.is_in_any_zone && state.current_zone_id != zone_id {
            warn!(
                player = %player,
                from = %state.current_zone_id,
                to = %zone_id,
                "Enter overwrote an active zone membership"
            );
            state.previous_zone_id = std::mem::take(&mut state.current_zone_id);
        }
        state.current_zone_id = zone_id.to_string();
        state.was_in_zone = true;
        state.is_in_any_zone = true;
        state.last_position = position;
        state.entered_at = Some(now);
        state.last_update = now;
        debug!(player = %player, zone_id = %zone_id, "Membership: entered");
        now
    }

    /// Membership update for an exit, without publishing.
    ///
    /// Missing state is tolerated. Returns the transition time.
    pub fn record_exit(&self, player: EntityHandle, zone_id: &str) -> DateTime<Utc> {
        let now = Utc::now();
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(&player) else {
            debug!(player = %player, zone_id = %zone_id, "Exit for untracked player");
            return now;
        };
        if state.current_zone_id.is_empty() {
            state.previous_zone_id = zone_id.to_string();
        } else {
            if state.current_zone_id != zone_id {
                warn!(
                    player = %player,
                    current = %state.current_zone_id,
                    requested = %zone_id,
                    "Exit zone does not match current zone"
                );
            }
            state.previous_zone_id = std::mem::take(&mut state.current_zone_id);
        }
        state.is_in_any_zone = false;
        state.exited_at = Some(now);
        state.last_update = now;
        debug!(player = %player, zone_id = %zone_id, "Membership: exited");
        now
    }

    /// Copy of a player's state; `None` if the player was never tracked.
    #[must_use]
    pub fn player_state(&self, player: EntityHandle) -> Option<PlayerZoneState> {
        self.states.lock().get(&player).cloned()
    }

    /// Zone the player is in, if any.
    #[must_use]
    pub fn current_zone(&self, player: EntityHandle) -> Option<String> {
        self.states
            .lock()
            .get(&player)
            .filter(|s| s.is_in_any_zone)
            .map(|s| s.current_zone_id.clone())
    }

    /// Players currently inside some zone, sorted.
    #[must_use]
    pub fn players_in_zones(&self) -> Vec<EntityHandle> {
        self.collect(|s| s.is_in_any_zone)
    }

    /// Players that have entered a zone at least once, sorted.
    #[must_use]
    pub fn players_ever_in_zone(&self) -> Vec<EntityHandle> {
        self.collect(|s| s.was_in_zone)
    }

    fn collect(&self, filter: impl Fn(&PlayerZoneState) -> bool) -> Vec<EntityHandle> {
        let mut players: Vec<EntityHandle> = self
            .states
            .lock()
            .iter()
            .filter(|(_, s)| filter(s))
            .map(|(p, _)| *p)
            .collect();
        players.sort();
        players
    }

    /// Attach opaque blood data to a tracked player. Returns `false` if the
    /// player is not tracked.
    pub fn update_blood(&self, player: EntityHandle, blood_type: Option<String>, quality: f32) -> bool {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(&player) else {
            return false;
        };
        state.blood_type = blood_type;
        state.blood_quality = quality;
        state.last_update = Utc::now();
        true
    }

    /// Number of tracked players.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.states.lock().len()
    }

    /// Forget every player.
    pub fn clear(&self) {
        self.states.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const P1: EntityHandle = EntityHandle::new(10, 1);

    fn tracker() -> (ZoneMembershipTracker, Arc<EventBus>) {
        let bus = Arc::new(EventBus::default());
        (ZoneMembershipTracker::new(Arc::clone(&bus)), bus)
    }

    #[test]
    fn enter_sets_current_zone_and_timestamp() {
        let (tracker, _) = tracker();
        tracker.on_player_enter_arena(P1, "arena-1", Position::new(1.0, 0.0, 2.0));
        let state = tracker.player_state(P1).expect("tracked");
        assert_eq!(state.current_zone_id, "arena-1");
        assert!(state.entered_at.is_some());
        assert!(state.was_in_zone && state.is_in_any_zone);
        assert_eq!(state.last_position, Position::new(1.0, 0.0, 2.0));
    }

    #[test]
    fn exit_moves_current_into_previous() {
        let (tracker, _) = tracker();
        tracker.on_player_enter_arena(P1, "arena-1", Position::default());
        tracker.on_player_exit_arena(P1, "arena-1");
        let state = tracker.player_state(P1).expect("tracked");
        assert_eq!(state.previous_zone_id, "arena-1");
        assert_eq!(state.current_zone_id, "");
        assert!(state.exited_at.is_some());
        assert!(state.was_in_zone);
        assert!(!state.is_in_any_zone);
    }

    #[test]
    fn players_in_zones_excludes_exited_players() {
        let (tracker, _) = tracker();
        let p2 = EntityHandle::new(11, 1);
        tracker.on_player_enter_arena(P1, "arena-1", Position::default());
        tracker.on_player_enter_arena(p2, "arena-2", Position::default());
        tracker.on_player_exit_arena(P1, "arena-1");
        assert_eq!(tracker.players_in_zones(), vec![p2]);
        assert_eq!(tracker.players_ever_in_zone(), vec![P1, p2]);
    }

    #[test]
    fn exit_without_state_still_publishes() {
        let (tracker, bus) = tracker();
        let exits = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&exits);
        bus.subscribe(move |_: &PlayerExitedZone| {
            e.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        tracker.on_player_exit_arena(P1, "arena-1");
        tracker.on_player_exit_arena(P1, "arena-1");
        assert_eq!(exits.load(Ordering::SeqCst), 2);
        assert!(tracker.player_state(P1).is_none());
    }

    #[test]
    fn direct_reenter_records_previous_zone() {
        let (tracker, _) = tracker();
        tracker.record_enter(P1, "arena-1", Position::default());
        tracker.record_enter(P1, "arena-2", Position::default());
        let state = tracker.player_state(P1).expect("tracked");
        assert_eq!(state.current_zone_id, "arena-2");
        assert_eq!(state.previous_zone_id, "arena-1");
    }

    #[test]
    fn clear_forgets_everyone() {
        let (tracker, _) = tracker();
        tracker.record_enter(P1, "arena-1", Position::default());
        assert!(tracker.update_blood(P1, Some("Rogue".into()), 87.5));
        tracker.clear();
        assert_eq!(tracker.tracked_count(), 0);
        assert!(!tracker.update_blood(P1, None, 0.0));
    }
}
