//! Sandbox session orchestration.
//!
//! On enter into a sandboxed zone the coordinator captures the player's
//! progression and the zone's entities as a baseline. On exit it captures
//! again, records the delta (component changes, opened tech, entity
//! changes), journals it, destroys entities created in the zone, restores
//! the baseline and validates the rollback.
//!
//! Persistence failures never abort a rollback; they are logged and
//! counted, and the store stays dirty so the next flush retries.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::capture::{
    SnapshotCaptureService, build_baseline_rows, build_snapshot_id, session_row, snapshot_from_baseline_rows,
};
use super::diff::{compute_component_delta, compute_entity_delta, extract_opened_tech_with};
use super::journal::{JournalEntry, ProgressionJournal};
use super::persistence::{BASELINE_HEADER, DELTA_HEADER, read_baseline, read_delta, write_or_remove};
use super::restore::{CleanupReport, ProgressionRestoreService, RestoreReport, RestoreValidation};
use super::snapshot::{SandboxProgressionSnapshot, SnapshotStamp, stamp_delta_rows};
use super::store::{SandboxSession, SandboxSnapshotStore};
use crate::config::SandboxConfig;
use crate::error::{Result, ZoneError};
use crate::events::{EventBus, SnapshotCaptured, SnapshotRestored};
use crate::host::{HostBindings, ProgressionHost};
use crate::lifecycle::{ZoneEnterStep, ZoneExitStep, ZoneLifecycleContext};
use crate::metrics::ZoneCounters;
use crate::types::{CharacterIdentity, EntityHandle, SessionId, normalize_key};

/// Entity-map alias a sandbox enter binds the snapshot id to.
pub const SNAPSHOT_ID_ALIAS: &str = "snapshotId";

/// Everything that happened while closing one sandbox session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SandboxOutcome {
    /// Snapshot that was rolled back to.
    pub snapshot_id: String,
    /// Delta rows recorded.
    pub delta_rows: usize,
    /// Tech ids learned inside the zone.
    pub opened_tech: Vec<i64>,
    /// Entity cleanup result.
    pub cleanup: CleanupReport,
    /// Progression restore result.
    pub restore: RestoreReport,
    /// Post-restore validation result.
    pub validation: RestoreValidation,
    /// Capture, journal and persistence failures, in order.
    pub errors: Vec<String>,
}

/// Owns sandbox sessions and runs the capture/restore chain.
pub struct SandboxCoordinator {
    config: SandboxConfig,
    capture: Arc<SnapshotCaptureService>,
    restore: ProgressionRestoreService,
    store: SandboxSnapshotStore,
    journal: Option<ProgressionJournal>,
    progression: Arc<dyn ProgressionHost>,
    bus: Arc<EventBus>,
    counters: Arc<ZoneCounters>,
}

impl std::fmt::Debug for SandboxCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxCoordinator")
            .field("enabled", &self.config.enabled)
            .field("sessions", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl SandboxCoordinator {
    /// Build the capture/restore chain over `host`.
    #[must_use]
    pub fn new(config: SandboxConfig, host: &HostBindings, bus: Arc<EventBus>, counters: Arc<ZoneCounters>) -> Self {
        let capture = Arc::new(SnapshotCaptureService::new(
            host.progression.clone(),
            host.world.clone(),
            &config.progression_keywords,
            counters.clone(),
        ));
        let restore = ProgressionRestoreService::new(
            host.progression.clone(),
            host.world.clone(),
            capture.clone(),
            config.tech_property_markers.clone(),
            counters.clone(),
        );
        let journal = config.journal.then(|| ProgressionJournal::new(config.journal_path()));
        Self {
            capture,
            restore,
            store: SandboxSnapshotStore::new(),
            journal,
            progression: host.progression.clone(),
            bus,
            counters,
            config,
        }
    }

    /// Sandbox settings in use.
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Open sessions.
    #[must_use]
    pub fn store(&self) -> &SandboxSnapshotStore {
        &self.store
    }

    /// Capture service shared with restore.
    #[must_use]
    pub fn capture(&self) -> &Arc<SnapshotCaptureService> {
        &self.capture
    }

    fn identity(&self, player: EntityHandle) -> Result<CharacterIdentity> {
        self.progression
            .identity(player)
            .ok_or_else(|| ZoneError::Host(format!("no identity for character {player}")))
    }

    /// Open a sandbox for `player` entering `zone_id`.
    ///
    /// Returns the new snapshot id, or `None` when sandboxing is disabled
    /// or the player already has an open session (the older one is kept).
    ///
    /// # Errors
    /// Identity or capture failures; no session is opened then.
    pub fn begin(&self, player: EntityHandle, zone_id: &str) -> Result<Option<String>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let identity = self.identity(player)?;
        if let Some(existing) = self.store.get(&identity) {
            warn!(
                player = %player,
                zone_id = %zone_id,
                open_snapshot = %existing.snapshot_id,
                "Sandbox already open; keeping the earlier baseline"
            );
            return Ok(None);
        }

        let snapshot = self.capture.capture_progression_snapshot(player)?;
        let zone_entities = self.capture.capture_zone_entity_map(zone_id)?;
        let stamp = SnapshotStamp {
            snapshot_id: build_snapshot_id(identity.platform_id, &identity.character_name, snapshot.captured_utc),
            player_key: self.store.resolve_player_key(&identity),
            character_name: identity.character_name.clone(),
            platform_id: identity.platform_id,
            zone_id: zone_id.to_string(),
            captured_utc: snapshot.captured_utc,
        };
        let mut baseline = vec![session_row(&stamp)];
        baseline.extend(build_baseline_rows(&snapshot, &zone_entities, &stamp));
        let component_rows = snapshot.components.len();
        let entity_rows = zone_entities.len();

        self.store.open(SandboxSession {
            session_id: SessionId::new(),
            player_key: stamp.player_key.clone(),
            identity,
            zone_id: zone_id.to_string(),
            snapshot_id: stamp.snapshot_id.clone(),
            baseline,
            zone_entities,
            delta: Vec::new(),
        });
        self.flush_logged();

        self.bus.publish(&SnapshotCaptured {
            player,
            zone_id: zone_id.to_string(),
            snapshot_id: stamp.snapshot_id.clone(),
            component_rows,
            zone_entities: entity_rows,
        });
        info!(
            player = %player,
            zone_id = %zone_id,
            snapshot_id = %stamp.snapshot_id,
            components = component_rows,
            zone_entities = entity_rows,
            "Sandbox baseline captured"
        );
        Ok(Some(stamp.snapshot_id))
    }

    /// Close `player`'s sandbox on leaving `zone_id` and roll back.
    ///
    /// Returns `None` when the player has no open session. Failures past
    /// the identity lookup are collected into the outcome; the rollback
    /// always runs.
    ///
    /// # Errors
    /// Only when the player's identity cannot be resolved.
    pub fn end(&self, player: EntityHandle, zone_id: &str) -> Result<Option<SandboxOutcome>> {
        let identity = self.identity(player)?;
        let Some(session) = self.store.get(&identity) else {
            debug!(player = %player, zone_id = %zone_id, "No open sandbox session");
            return Ok(None);
        };
        if normalize_key(&session.zone_id) != normalize_key(zone_id) {
            warn!(
                player = %player,
                session_zone = %session.zone_id,
                zone_id = %zone_id,
                "Closing sandbox from a different zone"
            );
        }

        let mut outcome = SandboxOutcome {
            snapshot_id: session.snapshot_id.clone(),
            ..SandboxOutcome::default()
        };
        let stamp = session.baseline.first().map_or_else(
            || SnapshotStamp {
                snapshot_id: session.snapshot_id.clone(),
                player_key: session.player_key.clone(),
                character_name: session.identity.character_name.clone(),
                platform_id: session.identity.platform_id,
                zone_id: session.zone_id.clone(),
                captured_utc: Utc::now(),
            },
            super::snapshot::BaselineRow::stamp,
        );

        let mut delta = Vec::new();
        match self.capture.capture_progression_snapshot(player) {
            Ok(post) => {
                let post_rows = build_baseline_rows(&post, &[], &stamp);
                delta.extend(compute_component_delta(&session.baseline, &post_rows));
                let markers: Vec<&str> = self.config.tech_property_markers.iter().map(String::as_str).collect();
                let opened = extract_opened_tech_with(&session.baseline, &post_rows, &markers);
                outcome.opened_tech = opened.iter().filter_map(|r| r.tech_guid).collect();
                delta.extend(opened);
            }
            Err(e) => outcome.errors.push(format!("post capture: {e}")),
        }
        match self.capture.capture_zone_entity_map(&session.zone_id) {
            Ok(post_entities) => delta.extend(compute_entity_delta(&session.zone_entities, &post_entities)),
            Err(e) => outcome.errors.push(format!("zone entity capture: {e}")),
        }
        stamp_delta_rows(&mut delta, &stamp);
        outcome.delta_rows = delta.len();

        self.store.put_delta(&identity, delta.clone());
        if let Some(journal) = &self.journal {
            let entry = JournalEntry::from_delta(
                session.session_id,
                &session.player_key,
                &session.zone_id,
                &session.snapshot_id,
                &delta,
            );
            if let Err(e) = journal.append(&entry) {
                error!(path = %journal.path().display(), error = %e, "Journal append failed");
                self.counters.persistence_failures.fetch_add(1, Ordering::Relaxed);
                outcome.errors.push(format!("journal: {e}"));
            }
        }
        if let Err(e) = self.flush() {
            outcome.errors.push(format!("flush: {e}"));
        }

        outcome.cleanup = self.restore.try_apply_delta_entity_cleanup(&delta, &session.zone_id);
        let snapshot = snapshot_from_baseline_rows(&session.baseline).unwrap_or_else(|| SandboxProgressionSnapshot {
            platform_id: session.identity.platform_id,
            character_name: session.identity.character_name.clone(),
            captured_utc: stamp.captured_utc,
            components: std::collections::BTreeMap::new(),
        });
        outcome.restore = self.restore.restore_progression_snapshot(player, &snapshot);
        outcome.validation = self
            .restore
            .validate_delta_after_restore(player, &session.baseline, &delta, &session.zone_id);

        self.store.take(&identity);
        if let Err(e) = self.flush() {
            outcome.errors.push(format!("flush: {e}"));
        }

        self.bus.publish(&SnapshotRestored {
            player,
            zone_id: session.zone_id.clone(),
            snapshot_id: session.snapshot_id.clone(),
            restored: outcome.restore.is_ok(),
            opened_tech: outcome.opened_tech.clone(),
            validated: outcome.validation.is_clean(),
        });
        info!(
            player = %player,
            zone_id = %session.zone_id,
            snapshot_id = %session.snapshot_id,
            delta_rows = outcome.delta_rows,
            opened_tech = ?outcome.opened_tech,
            restored = outcome.restore.is_ok(),
            validated = outcome.validation.is_clean(),
            "Sandbox rolled back"
        );
        Ok(Some(outcome))
    }

    /// Write the open sessions' rows if anything changed.
    ///
    /// Files with no rows left are deleted.
    ///
    /// # Errors
    /// I/O and encoding failures; the store stays dirty.
    pub fn flush(&self) -> Result<()> {
        if !self.config.persist || !self.store.is_dirty() {
            return Ok(());
        }
        let outcome = write_or_remove(&self.config.baseline_path(), BASELINE_HEADER, &self.store.all_baseline_rows())
            .and_then(|()| write_or_remove(&self.config.delta_path(), DELTA_HEADER, &self.store.all_delta_rows()));
        match outcome {
            Ok(()) => {
                self.store.mark_clean();
                Ok(())
            }
            Err(e) => {
                self.counters.persistence_failures.fetch_add(1, Ordering::Relaxed);
                error!(dir = %self.config.snapshot_dir.display(), error = %e, "Sandbox flush failed");
                Err(e)
            }
        }
    }

    fn flush_logged(&self) {
        // flush() already logged and counted the failure.
        let _ = self.flush();
    }

    /// Re-import sessions persisted by an earlier run.
    ///
    /// Missing files mean no open sessions. Returns the session count.
    ///
    /// # Errors
    /// I/O failures other than a missing file, and malformed rows.
    pub fn load_from_disk(&self) -> Result<usize> {
        let baseline_path = self.config.baseline_path();
        if !baseline_path.exists() {
            self.store.import(Vec::new(), Vec::new());
            return Ok(0);
        }
        let baseline = read_baseline(&baseline_path)?;
        let delta_path = self.config.delta_path();
        let delta = if delta_path.exists() {
            read_delta(&delta_path)?
        } else {
            Vec::new()
        };
        let count = self.store.import(baseline, delta);
        info!(path = %baseline_path.display(), sessions = count, "Sandbox sessions loaded");
        Ok(count)
    }

    /// Forget every open session without touching files.
    pub fn reset(&self) {
        self.store.clear_all();
        self.store.mark_clean();
    }
}

// ---------------------------------------------------------------------------
// Lifecycle steps
// ---------------------------------------------------------------------------

/// Enter step that opens a sandbox for zones with `sandbox = true`.
#[derive(Debug, Clone)]
pub struct SandboxEnterStep {
    coordinator: Arc<SandboxCoordinator>,
}

impl SandboxEnterStep {
    /// Step driving `coordinator`.
    #[must_use]
    pub fn new(coordinator: Arc<SandboxCoordinator>) -> Self {
        Self { coordinator }
    }
}

impl ZoneEnterStep for SandboxEnterStep {
    fn name(&self) -> &str {
        "sandbox-capture"
    }

    fn order(&self) -> i32 {
        -100
    }

    fn execute(&self, context: &mut ZoneLifecycleContext<'_>) -> Result<()> {
        if !context.zone.sandbox {
            return Ok(());
        }
        if let Some(snapshot_id) = self.coordinator.begin(context.player, &context.zone_id)? {
            context.map.set_string(SNAPSHOT_ID_ALIAS, snapshot_id);
        }
        Ok(())
    }
}

/// Exit step that rolls a sandboxed player back.
#[derive(Debug, Clone)]
pub struct SandboxExitStep {
    coordinator: Arc<SandboxCoordinator>,
}

impl SandboxExitStep {
    /// Step driving `coordinator`.
    #[must_use]
    pub fn new(coordinator: Arc<SandboxCoordinator>) -> Self {
        Self { coordinator }
    }
}

impl ZoneExitStep for SandboxExitStep {
    fn name(&self) -> &str {
        "sandbox-restore"
    }

    fn execute(&self, context: &mut ZoneLifecycleContext<'_>) -> Result<()> {
        if !context.zone.sandbox {
            return Ok(());
        }
        let Some(outcome) = self.coordinator.end(context.player, &context.zone_id)? else {
            return Ok(());
        };
        context.map.set_string(SNAPSHOT_ID_ALIAS, outcome.snapshot_id.clone());
        if outcome.restore.is_ok() {
            Ok(())
        } else {
            Err(ZoneError::Host(format!(
                "sandbox restore incomplete: {}",
                outcome.restore.failures.join("; ")
            )))
        }
    }
}
