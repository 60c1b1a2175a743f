//! Turns position samples into zone enter/exit calls.
//!
//! The detector remembers, per player, the last position it evaluated and
//! the zone that position fell in. A new sample closer than the configured
//! threshold to the remembered one is ignored. Otherwise the containing
//! zone is recomputed, and a change is forwarded to the engine. The
//! detector's lock is never held across an engine call.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use zonekit_core::lifecycle::TransitionReport;
use zonekit_core::{EntityHandle, Position, ZoneKit, normalize_key};

use crate::config::{CircleZone, WorldConfig};
use crate::world::SimWorld;

#[derive(Debug, Clone)]
struct Sample {
    position: Position,
    zone: Option<String>,
}

/// Zone geometry watcher.
#[derive(Debug)]
pub struct ZoneDetector {
    zones: Vec<CircleZone>,
    threshold: f32,
    samples: Mutex<HashMap<EntityHandle, Sample>>,
}

impl ZoneDetector {
    /// Create a detector over the configured zones.
    #[must_use]
    pub fn new(config: &WorldConfig) -> Self {
        Self {
            zones: config.zones.clone(),
            threshold: config.position_change_threshold.max(0.0),
            samples: Mutex::new(HashMap::new()),
        }
    }

    /// First configured zone containing `position`.
    #[must_use]
    pub fn zone_at(&self, position: &Position) -> Option<&CircleZone> {
        self.zones.iter().find(|z| z.contains(position))
    }

    /// Zone the detector last placed `player` in.
    #[must_use]
    pub fn zone_of(&self, player: EntityHandle) -> Option<String> {
        self.samples.lock().get(&player).and_then(|s| s.zone.clone())
    }

    /// Players with a remembered sample.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.samples.lock().len()
    }

    /// Feed one position sample for `player`.
    ///
    /// Returns the transitions the engine ran: none, one enter, one exit,
    /// or an exit followed by an enter when the engine does not exit
    /// implicitly.
    pub fn observe(&self, kit: &ZoneKit, player: EntityHandle, position: Position) -> Vec<TransitionReport> {
        let next = self.zone_at(&position).map(|z| z.id.clone());
        let previous = {
            let mut samples = self.samples.lock();
            if samples
                .get(&player)
                .is_some_and(|s| s.position.distance(&position) < self.threshold)
            {
                return Vec::new();
            }
            let previous = samples.get(&player).and_then(|s| s.zone.clone());
            samples.insert(
                player,
                Sample {
                    position,
                    zone: next.clone(),
                },
            );
            previous
        };

        let same = match (&previous, &next) {
            (Some(a), Some(b)) => normalize_key(a) == normalize_key(b),
            (None, None) => true,
            _ => false,
        };
        if same {
            return Vec::new();
        }
        debug!(player = %player, from = ?previous, to = ?next, "Zone boundary crossed");

        let mut reports = Vec::new();
        let explicit_exit = next.is_none() || !kit.config().lifecycle.implicit_exit_on_reenter;
        if let Some(old) = previous.as_deref().filter(|_| explicit_exit) {
            reports.push(kit.on_exit(player, old));
        }
        if let Some(new) = &next {
            reports.push(kit.on_enter(player, new, position));
        }
        reports
    }

    /// Sample every connected player of `world`.
    pub fn tick(&self, kit: &ZoneKit, world: &SimWorld) -> Vec<TransitionReport> {
        world
            .player_positions()
            .into_iter()
            .flat_map(|(player, position)| self.observe(kit, player, position))
            .collect()
    }

    /// Drop `player` (disconnect), exiting the zone they were in.
    pub fn forget(&self, kit: &ZoneKit, player: EntityHandle) -> Option<TransitionReport> {
        let sample = self.samples.lock().remove(&player)?;
        sample.zone.map(|zone| kit.on_exit(player, &zone))
    }

    /// Forget every sample without running exits.
    pub fn clear(&self) {
        self.samples.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use zonekit_core::HostBindings;

    fn setup(threshold: f32) -> (Arc<SimWorld>, ZoneKit, ZoneDetector) {
        setup_with(threshold, true)
    }

    fn setup_with(threshold: f32, implicit_exit: bool) -> (Arc<SimWorld>, ZoneKit, ZoneDetector) {
        let geometry = WorldConfig {
            position_change_threshold: threshold,
            zones: vec![
                CircleZone::new("arena-1", Position::new(0.0, 0.0, 0.0), 10.0),
                CircleZone::new("pit", Position::new(15.0, 0.0, 0.0), 10.0),
            ],
        };
        let world = Arc::new(SimWorld::from_config(&geometry));
        let mut config = zonekit_core::ZoneKitConfig::default();
        config.sandbox.persist = false;
        config.sandbox.journal = false;
        config.lifecycle.implicit_exit_on_reenter = implicit_exit;
        let kit = ZoneKit::new(config, HostBindings::from_world(world.clone()));
        (world, kit, ZoneDetector::new(&geometry))
    }

    #[test]
    fn walking_in_and_out_fires_enter_then_exit() {
        let (world, kit, detector) = setup(0.5);
        let p = world.spawn_player(1, "P1", Position::new(-50.0, 0.0, 0.0));

        assert!(detector.tick(&kit, &world).is_empty());
        world.move_player(p, Position::new(-5.0, 0.0, 0.0)).expect("move");
        let reports = detector.tick(&kit, &world);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].zone_id, "arena-1");
        assert_eq!(kit.tracker().current_zone(p).as_deref(), Some("arena-1"));

        world.move_player(p, Position::new(-50.0, 0.0, 0.0)).expect("move");
        let reports = detector.tick(&kit, &world);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].stage, zonekit_core::LifecycleStage::Exit);
        assert_eq!(kit.tracker().current_zone(p), None);
    }

    #[test]
    fn small_moves_are_ignored() {
        let (world, kit, detector) = setup(5.0);
        let p = world.spawn_player(1, "P1", Position::new(-12.0, 0.0, 0.0));
        detector.tick(&kit, &world);

        // crosses the edge but stays under the threshold
        world.move_player(p, Position::new(-9.0, 0.0, 0.0)).expect("move");
        assert!(detector.tick(&kit, &world).is_empty());
        assert_eq!(detector.zone_of(p), None);

        world.move_player(p, Position::new(-6.0, 0.0, 0.0)).expect("move");
        assert_eq!(detector.tick(&kit, &world).len(), 1);
        assert_eq!(detector.zone_of(p).as_deref(), Some("arena-1"));
    }

    #[test]
    fn crossing_into_a_neighbor_uses_the_engine_implicit_exit() {
        let (world, kit, detector) = setup(0.5);
        let p = world.spawn_player(1, "P1", Position::new(-5.0, 0.0, 0.0));
        detector.tick(&kit, &world);

        world.move_player(p, Position::new(20.0, 0.0, 0.0)).expect("move");
        let reports = detector.tick(&kit, &world);
        assert_eq!(reports.len(), 1);
        let implicit = reports[0].implicit_exit.as_ref().expect("implicit exit");
        assert_eq!(implicit.zone_id, "arena-1");
        assert_eq!(kit.tracker().current_zone(p).as_deref(), Some("pit"));
    }

    #[test]
    fn crossing_into_a_neighbor_exits_explicitly_when_the_engine_does_not() {
        let (world, kit, detector) = setup_with(0.5, false);
        let p = world.spawn_player(1, "P1", Position::new(-5.0, 0.0, 0.0));
        detector.tick(&kit, &world);

        world.move_player(p, Position::new(20.0, 0.0, 0.0)).expect("move");
        let reports = detector.tick(&kit, &world);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].stage, zonekit_core::LifecycleStage::Exit);
        assert_eq!(reports[0].zone_id, "arena-1");
        assert!(!reports[0].skipped);
        assert_eq!(reports[1].zone_id, "pit");
        assert!(reports[1].implicit_exit.is_none());

        let state = kit.tracker().player_state(p).expect("state");
        assert_eq!(state.current_zone_id, "pit");
        assert_eq!(state.previous_zone_id, "arena-1");
    }

    #[test]
    fn forget_exits_the_current_zone() {
        let (world, kit, detector) = setup(0.5);
        let p = world.spawn_player(1, "P1", Position::new(0.0, 0.0, 0.0));
        detector.tick(&kit, &world);

        let report = detector.forget(&kit, p).expect("exit");
        assert_eq!(report.zone_id, "arena-1");
        assert_eq!(detector.tracked_count(), 0);
        assert!(detector.forget(&kit, p).is_none());
    }
}
