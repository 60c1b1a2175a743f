//! Open sandbox sessions keyed by player.
//!
//! A session holds the baseline captured on enter and, once computed, the
//! delta captured on exit. Sessions are keyed by the normalized character
//! name; if two accounts share a name the later one is keyed
//! `name|platform_id`. Lookups fall back to the platform id so a renamed
//! character still finds its session.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tracing::debug;

use super::snapshot::{BaselineRow, DeltaRow, ZoneEntityEntry};
use crate::types::{CharacterIdentity, SessionId, normalize_key};

/// One player's open sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSession {
    /// Enter-to-exit session id.
    pub session_id: SessionId,
    /// Store key.
    pub player_key: String,
    /// Owner identity.
    pub identity: CharacterIdentity,
    /// Zone the session belongs to.
    pub zone_id: String,
    /// Correlation id shared by every row.
    pub snapshot_id: String,
    /// Baseline captured on enter (components and zone entities).
    pub baseline: Vec<BaselineRow>,
    /// Zone entities captured on enter.
    pub zone_entities: Vec<ZoneEntityEntry>,
    /// Delta computed on exit; empty until then.
    pub delta: Vec<DeltaRow>,
}

#[derive(Debug, Default)]
struct StoreState {
    sessions: HashMap<String, SandboxSession>,
    dirty: bool,
}

/// Thread-safe session table with a dirty flag for persistence.
#[derive(Debug, Default)]
pub struct SandboxSnapshotStore {
    state: Mutex<StoreState>,
}

impl SandboxSnapshotStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Key a new session for `identity` would be stored under.
    #[must_use]
    pub fn resolve_player_key(&self, identity: &CharacterIdentity) -> String {
        let state = self.state.lock();
        resolve_key(&state.sessions, identity)
    }

    /// Find the key of an existing session for `identity`.
    fn find_key(sessions: &HashMap<String, SandboxSession>, identity: &CharacterIdentity) -> Option<String> {
        let by_name = normalize_key(&identity.character_name);
        if let Some(s) = sessions.get(&by_name) {
            if s.identity.platform_id == identity.platform_id {
                return Some(by_name);
            }
        }
        let composite = format!("{by_name}|{}", identity.platform_id);
        if sessions.contains_key(&composite) {
            return Some(composite);
        }
        sessions
            .iter()
            .filter(|(_, s)| s.identity.platform_id == identity.platform_id)
            .map(|(k, _)| k.clone())
            .min()
    }

    /// Open a session. Returns `false` (and keeps the existing one) if
    /// the player already has an open session.
    pub fn open(&self, session: SandboxSession) -> bool {
        let mut state = self.state.lock();
        if Self::find_key(&state.sessions, &session.identity).is_some() {
            return false;
        }
        debug!(player_key = %session.player_key, snapshot_id = %session.snapshot_id, "Sandbox session opened");
        state.sessions.insert(session.player_key.clone(), session);
        state.dirty = true;
        true
    }

    /// Copy of the session for `identity`.
    #[must_use]
    pub fn get(&self, identity: &CharacterIdentity) -> Option<SandboxSession> {
        let state = self.state.lock();
        let key = Self::find_key(&state.sessions, identity)?;
        state.sessions.get(&key).cloned()
    }

    /// Attach the exit delta to the session for `identity`.
    pub fn put_delta(&self, identity: &CharacterIdentity, delta: Vec<DeltaRow>) -> bool {
        let mut state = self.state.lock();
        let Some(key) = Self::find_key(&state.sessions, identity) else {
            return false;
        };
        if let Some(session) = state.sessions.get_mut(&key) {
            session.delta = delta;
        }
        state.dirty = true;
        true
    }

    /// Remove and return the session for `identity`.
    pub fn take(&self, identity: &CharacterIdentity) -> Option<SandboxSession> {
        let mut state = self.state.lock();
        let key = Self::find_key(&state.sessions, identity)?;
        let session = state.sessions.remove(&key);
        state.dirty = true;
        session
    }

    /// Rebuild sessions from persisted rows, replacing the table.
    ///
    /// Baseline rows are grouped by player key and snapshot id; the most
    /// recent snapshot per player wins. A group holding only its session
    /// row still opens a session, with an empty baseline snapshot. Delta
    /// rows attach by snapshot id.
    pub fn import(&self, baseline: Vec<BaselineRow>, delta: Vec<DeltaRow>) -> usize {
        let mut grouped: BTreeMap<(String, String), Vec<BaselineRow>> = BTreeMap::new();
        for row in baseline {
            grouped
                .entry((row.player_key.clone(), row.snapshot_id.clone()))
                .or_default()
                .push(row);
        }

        let mut sessions: HashMap<String, SandboxSession> = HashMap::new();
        for ((player_key, snapshot_id), rows) in grouped {
            let Some(first) = rows.first() else { continue };
            let newer = sessions
                .get(&player_key)
                .is_none_or(|existing| existing.baseline.first().is_some_and(|r| r.captured_utc <= first.captured_utc));
            if !newer {
                continue;
            }
            let session = SandboxSession {
                session_id: SessionId::new(),
                player_key: player_key.clone(),
                identity: CharacterIdentity::new(first.platform_id, first.character_name.clone()),
                zone_id: first.zone_id.clone(),
                snapshot_id: snapshot_id.clone(),
                zone_entities: super::capture::zone_entities_from_baseline_rows(&rows),
                baseline: rows,
                delta: Vec::new(),
            };
            sessions.insert(player_key, session);
        }
        for row in delta {
            if let Some(session) = sessions.values_mut().find(|s| s.snapshot_id == row.snapshot_id) {
                session.delta.push(row);
            }
        }

        let count = sessions.len();
        let mut state = self.state.lock();
        state.sessions = sessions;
        state.dirty = false;
        count
    }

    /// Every baseline row of every open session, ordered by player key.
    #[must_use]
    pub fn all_baseline_rows(&self) -> Vec<BaselineRow> {
        self.sorted_sessions().into_iter().flat_map(|s| s.baseline).collect()
    }

    /// Every delta row of every open session, ordered by player key.
    #[must_use]
    pub fn all_delta_rows(&self) -> Vec<DeltaRow> {
        self.sorted_sessions().into_iter().flat_map(|s| s.delta).collect()
    }

    fn sorted_sessions(&self) -> Vec<SandboxSession> {
        let state = self.state.lock();
        let mut sessions: Vec<SandboxSession> = state.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.player_key.cmp(&b.player_key));
        sessions
    }

    /// Whether there are unsaved changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Flag the table as saved.
    pub fn mark_clean(&self) {
        self.state.lock().dirty = false;
    }

    /// Number of open sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Whether no session is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().sessions.is_empty()
    }

    /// Drop every session.
    pub fn clear_all(&self) {
        let mut state = self.state.lock();
        state.sessions.clear();
        state.dirty = true;
    }
}

fn resolve_key(sessions: &HashMap<String, SandboxSession>, identity: &CharacterIdentity) -> String {
    if let Some(existing) = SandboxSnapshotStore::find_key(sessions, identity) {
        return existing;
    }
    let by_name = normalize_key(&identity.character_name);
    let by_name = if by_name.is_empty() {
        identity.platform_id.to_string()
    } else {
        by_name
    };
    if sessions.contains_key(&by_name) {
        format!("{by_name}|{}", identity.platform_id)
    } else {
        by_name
    }
}
