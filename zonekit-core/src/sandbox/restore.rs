//! Rolling a character back to a captured snapshot.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{debug, info, warn};

use super::capture::{SnapshotCaptureService, build_baseline_rows};
use super::diff::{compute_component_delta, extract_opened_tech_with};
use super::snapshot::{BaselineRow, DeltaKind, DeltaRow, SandboxProgressionSnapshot};
use crate::host::{ProgressionHost, ZoneWorld};
use crate::metrics::ZoneCounters;
use crate::types::EntityHandle;

/// Outcome of [`ProgressionRestoreService::restore_progression_snapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Components rewritten from the snapshot.
    pub written: usize,
    /// Components removed because the snapshot did not have them.
    pub removed: usize,
    /// Per-component host failures.
    pub failures: Vec<String>,
}

impl RestoreReport {
    /// Whether every host call succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of [`ProgressionRestoreService::try_apply_delta_entity_cleanup`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Entities destroyed by the strict pass.
    pub destroyed_strict: usize,
    /// Entities destroyed by the prefab-only pass.
    pub destroyed_forced: usize,
    /// Created entities already gone.
    pub already_gone: usize,
    /// Host failures.
    pub failures: Vec<String>,
}

/// Outcome of [`ProgressionRestoreService::validate_delta_after_restore`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreValidation {
    /// Component differences still present after restore.
    pub component_mismatches: Vec<DeltaRow>,
    /// Tech ids that are still unlocked.
    pub tech_still_open: Vec<i64>,
    /// Zone-created entities that still exist.
    pub surviving_entities: Vec<EntityHandle>,
    /// Re-capture failed; nothing could be checked.
    pub capture_error: Option<String>,
}

impl RestoreValidation {
    /// Whether the rollback fully took effect.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.component_mismatches.is_empty()
            && self.tech_still_open.is_empty()
            && self.surviving_entities.is_empty()
            && self.capture_error.is_none()
    }
}

/// Applies captured snapshots back onto characters and prunes zone entities.
pub struct ProgressionRestoreService {
    progression: Arc<dyn ProgressionHost>,
    world: Arc<dyn ZoneWorld>,
    capture: Arc<SnapshotCaptureService>,
    tech_markers: Vec<String>,
    counters: Arc<ZoneCounters>,
}

impl std::fmt::Debug for ProgressionRestoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressionRestoreService")
            .field("tech_markers", &self.tech_markers)
            .finish_non_exhaustive()
    }
}

impl ProgressionRestoreService {
    /// Create a restore service.
    #[must_use]
    pub fn new(
        progression: Arc<dyn ProgressionHost>,
        world: Arc<dyn ZoneWorld>,
        capture: Arc<SnapshotCaptureService>,
        tech_markers: Vec<String>,
        counters: Arc<ZoneCounters>,
    ) -> Self {
        Self {
            progression,
            world,
            capture,
            tech_markers,
            counters,
        }
    }

    /// Make the character's progression components match `snapshot`.
    ///
    /// Progression components not in the snapshot are removed, components
    /// that existed are rewritten, and components recorded as absent are
    /// removed. Host failures are collected, never propagated.
    pub fn restore_progression_snapshot(
        &self,
        character: EntityHandle,
        snapshot: &SandboxProgressionSnapshot,
    ) -> RestoreReport {
        let mut report = RestoreReport::default();

        match self.progression.read_components(character) {
            Ok(current) => {
                for component in current
                    .iter()
                    .filter(|c| self.capture.is_progression_component(&c.type_key))
                    .filter(|c| !snapshot.components.contains_key(&c.type_key))
                {
                    match self.progression.remove_component(character, &component.type_key) {
                        Ok(()) => report.removed += 1,
                        Err(e) => report.failures.push(format!("remove {}: {e}", component.type_key)),
                    }
                }
            }
            Err(e) => report.failures.push(format!("read components: {e}")),
        }

        for state in snapshot.components.values() {
            let outcome = if state.existed {
                self.progression
                    .write_component(character, &state.type_key, &state.payload)
                    .map(|()| report.written += 1)
            } else {
                self.progression
                    .remove_component(character, &state.type_key)
                    .map(|()| report.removed += 1)
            };
            if let Err(e) = outcome {
                report.failures.push(format!("restore {}: {e}", state.type_key));
            }
        }

        if report.is_ok() {
            self.counters.snapshots_restored.fetch_add(1, Ordering::Relaxed);
            info!(
                character = %character,
                written = report.written,
                removed = report.removed,
                "Progression restored"
            );
        } else {
            warn!(character = %character, failures = ?report.failures, "Progression restore incomplete");
        }
        report
    }

    /// Destroy entities the delta says were created in `zone_id`.
    ///
    /// A strict pass destroys created entities that are still in the zone
    /// with the recorded prefab. A second pass destroys the rest that still
    /// carry the recorded prefab, wherever they are.
    pub fn try_apply_delta_entity_cleanup(&self, delta: &[DeltaRow], zone_id: &str) -> CleanupReport {
        let mut report = CleanupReport::default();
        let mut remaining = Vec::new();

        for (entity, prefab) in created_entities(delta) {
            if !self.world.entity_exists(entity) {
                report.already_gone += 1;
                continue;
            }
            if self.world.prefab_of(entity) == Some(prefab) && self.world.is_in_zone(entity, zone_id) {
                match self.world.destroy_entity(entity) {
                    Ok(()) => report.destroyed_strict += 1,
                    Err(e) => report.failures.push(format!("destroy {entity}: {e}")),
                }
            } else {
                remaining.push((entity, prefab));
            }
        }

        for (entity, prefab) in remaining {
            if !self.world.entity_exists(entity) || self.world.prefab_of(entity) != Some(prefab) {
                continue;
            }
            match self.world.destroy_entity(entity) {
                Ok(()) => report.destroyed_forced += 1,
                Err(e) => report.failures.push(format!("destroy {entity}: {e}")),
            }
        }

        debug!(
            zone_id = %zone_id,
            strict = report.destroyed_strict,
            forced = report.destroyed_forced,
            gone = report.already_gone,
            "Delta entity cleanup finished"
        );
        report
    }

    /// Re-capture the character and check the rollback took effect.
    ///
    /// Compares a fresh capture against `baseline`, looks for tech that is
    /// still open, and for zone-created entities that survived cleanup.
    /// Mismatches are logged as warnings, never returned as errors.
    pub fn validate_delta_after_restore(
        &self,
        character: EntityHandle,
        baseline: &[BaselineRow],
        delta: &[DeltaRow],
        zone_id: &str,
    ) -> RestoreValidation {
        let mut validation = RestoreValidation {
            surviving_entities: created_entities(delta)
                .filter(|(entity, _)| self.world.entity_exists(*entity))
                .map(|(entity, _)| entity)
                .collect(),
            ..RestoreValidation::default()
        };

        let baseline_components: Vec<BaselineRow> =
            baseline.iter().filter(|r| r.is_component()).cloned().collect();
        match (self.capture.capture_progression_snapshot(character), baseline.first()) {
            (Ok(snapshot), Some(first)) => {
                let recaptured = build_baseline_rows(&snapshot, &[], &first.stamp());
                validation.component_mismatches = compute_component_delta(&baseline_components, &recaptured);
                let markers: Vec<&str> = self.tech_markers.iter().map(String::as_str).collect();
                validation.tech_still_open = extract_opened_tech_with(&baseline_components, &recaptured, &markers)
                    .iter()
                    .filter_map(|r| r.tech_guid)
                    .collect();
            }
            (Ok(_), None) => {}
            (Err(e), _) => validation.capture_error = Some(e.to_string()),
        }

        if !validation.is_clean() {
            self.counters.validation_mismatches.fetch_add(1, Ordering::Relaxed);
            warn!(
                character = %character,
                zone_id = %zone_id,
                mismatches = validation.component_mismatches.len(),
                tech_still_open = ?validation.tech_still_open,
                surviving_entities = validation.surviving_entities.len(),
                capture_error = ?validation.capture_error,
                "Sandbox rollback validation found leftovers"
            );
        }
        validation
    }
}

fn created_entities(delta: &[DeltaRow]) -> impl Iterator<Item = (EntityHandle, i64)> + '_ {
    delta
        .iter()
        .filter(|r| r.row_type == DeltaKind::EntityCreated)
        .filter_map(|r| Some((r.entity()?, r.prefab_guid?)))
}
