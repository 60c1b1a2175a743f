//! The enter/exit pipeline.
//!
//! One transition runs, in order:
//!
//! ```text
//!   membership ──► policy ──► steps ──► zone flow ──► publish
//!   (tracker)     (resolver)  (registry) (FlowLifecycle) (EventBus)
//! ```
//!
//! Membership is updated first so a player is never left half-transitioned
//! when a later stage fails. Every host call, policy, step and action is
//! isolated; nothing here returns an error to the caller.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::context::ZoneLifecycleContext;
use super::flow_lifecycle::{FlowLifecycle, LifecycleExecutionResult};
use super::steps::{StepRegistry, StepReport};
use crate::config::LifecycleConfig;
use crate::error::ZoneError;
use crate::events::{EventBus, FlowExecuted, PlayerEnteredZone, PlayerExitedZone};
use crate::host::HostBindings;
use crate::isolation::isolate;
use crate::metrics::ZoneCounters;
use crate::policy::{TrapLifecycleContext, TrapLifecycleDecision, TrapPolicyResolver};
use crate::tracker::ZoneMembershipTracker;
use crate::types::{CharacterIdentity, EntityHandle, LifecycleStage, Position, normalize_key};

/// What happened during one enter or exit.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionReport {
    /// Enter or exit.
    pub stage: LifecycleStage,
    /// Player character.
    pub player: EntityHandle,
    /// Zone entered or left.
    pub zone_id: String,
    /// Nothing ran past membership (disabled, duplicate enter, stale exit).
    pub skipped: bool,
    /// Policy verdict.
    pub decision: TrapLifecycleDecision,
    /// Step outcomes.
    pub steps: StepReport,
    /// Zone flow outcome, when the transition was not skipped.
    pub flow: Option<LifecycleExecutionResult>,
    /// Exit of the previous zone forced by this enter.
    pub implicit_exit: Option<Box<TransitionReport>>,
}

impl TransitionReport {
    fn skipped(stage: LifecycleStage, player: EntityHandle, zone_id: &str, reason: &str) -> Self {
        Self {
            stage,
            player,
            zone_id: zone_id.to_string(),
            skipped: true,
            decision: TrapLifecycleDecision::none(reason),
            steps: StepReport::default(),
            flow: None,
            implicit_exit: None,
        }
    }

    /// Whether steps and flow all succeeded (a skipped transition counts).
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.steps.is_ok() && self.flow.as_ref().is_none_or(|f| f.success)
    }
}

/// Drives zone transitions for every player.
pub struct ZoneLifecyclePipeline {
    enabled: bool,
    config: LifecycleConfig,
    tracker: Arc<ZoneMembershipTracker>,
    resolver: Arc<TrapPolicyResolver>,
    steps: Arc<StepRegistry>,
    flows: FlowLifecycle,
    bus: Arc<EventBus>,
    host: HostBindings,
    counters: Arc<ZoneCounters>,
}

impl std::fmt::Debug for ZoneLifecyclePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneLifecyclePipeline")
            .field("enabled", &self.enabled)
            .field("zones", &self.config.zones.len())
            .finish_non_exhaustive()
    }
}

impl ZoneLifecyclePipeline {
    /// Assemble a pipeline from its collaborators.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        enabled: bool,
        config: LifecycleConfig,
        tracker: Arc<ZoneMembershipTracker>,
        resolver: Arc<TrapPolicyResolver>,
        steps: Arc<StepRegistry>,
        flows: FlowLifecycle,
        bus: Arc<EventBus>,
        host: HostBindings,
        counters: Arc<ZoneCounters>,
    ) -> Self {
        Self {
            enabled,
            config,
            tracker,
            resolver,
            steps,
            flows,
            bus,
            host,
            counters,
        }
    }

    /// Lifecycle configuration in use.
    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Player `player` stepped into `zone_id` at `position`.
    pub fn on_enter(&self, player: EntityHandle, zone_id: &str, position: Position) -> TransitionReport {
        let zone_id = zone_id.trim();
        if !self.enabled {
            return TransitionReport::skipped(LifecycleStage::Enter, player, zone_id, "Lifecycle disabled");
        }
        if zone_id.is_empty() {
            warn!(player = %player, "Enter with empty zone id ignored");
            return TransitionReport::skipped(LifecycleStage::Enter, player, zone_id, "Empty zone id");
        }

        let mut implicit_exit = None;
        if let Some(current) = self.tracker.current_zone(player) {
            if normalize_key(&current) == normalize_key(zone_id) {
                debug!(player = %player, zone_id = %zone_id, "Already in zone; enter ignored");
                return TransitionReport::skipped(LifecycleStage::Enter, player, zone_id, "Already in zone");
            }
            if self.config.implicit_exit_on_reenter && !current.is_empty() {
                implicit_exit = Some(Box::new(self.exit(player, &current, true)));
            }
        }

        let start = Instant::now();
        let at = self.tracker.record_enter(player, zone_id, position);
        self.counters.zone_enters.fetch_add(1, Ordering::Relaxed);

        let identity = self.identity_of(player);
        let decision = self.resolver.evaluate_enter(&TrapLifecycleContext {
            character_id: character_id(player, identity.as_ref()),
            zone_id: zone_id.to_string(),
            position,
            stage: LifecycleStage::Enter,
        });

        let mut context = ZoneLifecycleContext::new(
            player,
            identity,
            zone_id,
            position,
            LifecycleStage::Enter,
            self.config.settings_for(zone_id),
            decision,
            &self.host,
        );
        let steps = self.steps.run_enter(&mut context);
        let flow_id = context.zone.enter_flow.clone();
        let flow = self.flows.run(LifecycleStage::Enter, &flow_id, zone_id, &mut context.map);
        let decision = context.decision;

        self.bus.publish(&PlayerEnteredZone {
            player,
            zone_id: zone_id.to_string(),
            position,
            at,
        });
        self.publish_flow(player, zone_id, &flow_id, LifecycleStage::Enter, &flow);

        info!(
            player = %player,
            zone_id = %zone_id,
            flow_ok = flow.success,
            step_failures = steps.failed.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Player entered zone"
        );
        TransitionReport {
            stage: LifecycleStage::Enter,
            player,
            zone_id: zone_id.to_string(),
            skipped: false,
            decision,
            steps,
            flow: Some(flow),
            implicit_exit,
        }
    }

    /// Player `player` left `zone_id`.
    pub fn on_exit(&self, player: EntityHandle, zone_id: &str) -> TransitionReport {
        let zone_id = zone_id.trim();
        if !self.enabled {
            return TransitionReport::skipped(LifecycleStage::Exit, player, zone_id, "Lifecycle disabled");
        }
        self.exit(player, zone_id, false)
    }

    fn exit(&self, player: EntityHandle, zone_id: &str, implicit: bool) -> TransitionReport {
        let current = self.tracker.current_zone(player);
        let matches = current
            .as_deref()
            .is_some_and(|c| normalize_key(c) == normalize_key(zone_id));

        if !matches {
            // A stale exit must not clobber a live membership in another zone.
            let at = if current.is_none() {
                self.tracker.record_exit(player, zone_id)
            } else {
                chrono::Utc::now()
            };
            debug!(player = %player, zone_id = %zone_id, current = ?current, "Exit for a zone the player is not in");
            self.bus.publish(&PlayerExitedZone {
                player,
                zone_id: zone_id.to_string(),
                implicit,
                at,
            });
            return TransitionReport::skipped(LifecycleStage::Exit, player, zone_id, "Not in zone");
        }

        let start = Instant::now();
        let last_position = self
            .tracker
            .player_state(player)
            .map(|s| s.last_position)
            .unwrap_or_default();
        let at = self.tracker.record_exit(player, zone_id);
        self.counters.zone_exits.fetch_add(1, Ordering::Relaxed);

        let position = self.position_of(player).unwrap_or(last_position);
        let identity = self.identity_of(player);
        let decision = self.resolver.evaluate_exit(&TrapLifecycleContext {
            character_id: character_id(player, identity.as_ref()),
            zone_id: zone_id.to_string(),
            position,
            stage: LifecycleStage::Exit,
        });

        let mut context = ZoneLifecycleContext::new(
            player,
            identity,
            zone_id,
            position,
            LifecycleStage::Exit,
            self.config.settings_for(zone_id),
            decision,
            &self.host,
        );
        let steps = self.steps.run_exit(&mut context);
        let flow_id = context.zone.exit_flow.clone();
        let flow = self.flows.run(LifecycleStage::Exit, &flow_id, zone_id, &mut context.map);
        let decision = context.decision;

        self.bus.publish(&PlayerExitedZone {
            player,
            zone_id: zone_id.to_string(),
            implicit,
            at,
        });
        self.publish_flow(player, zone_id, &flow_id, LifecycleStage::Exit, &flow);

        info!(
            player = %player,
            zone_id = %zone_id,
            implicit,
            flow_ok = flow.success,
            step_failures = steps.failed.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Player exited zone"
        );
        TransitionReport {
            stage: LifecycleStage::Exit,
            player,
            zone_id: zone_id.to_string(),
            skipped: false,
            decision,
            steps,
            flow: Some(flow),
            implicit_exit: None,
        }
    }

    fn publish_flow(
        &self,
        player: EntityHandle,
        zone_id: &str,
        flow_id: &str,
        stage: LifecycleStage,
        flow: &LifecycleExecutionResult,
    ) {
        if flow_id.trim().is_empty() {
            return;
        }
        self.bus.publish(&FlowExecuted {
            player,
            zone_id: zone_id.to_string(),
            flow_id: flow_id.to_string(),
            stage,
            success: flow.success,
            message: flow.message.clone(),
        });
    }

    fn identity_of(&self, player: EntityHandle) -> Option<CharacterIdentity> {
        let progression = &self.host.progression;
        isolate(|| Ok::<_, ZoneError>(progression.identity(player)))
            .inspect_err(|reason| warn!(player = %player, reason = %reason, "Identity lookup failed"))
            .ok()
            .flatten()
    }

    fn position_of(&self, player: EntityHandle) -> Option<Position> {
        let positions = &self.host.positions;
        isolate(|| Ok::<_, ZoneError>(positions.position_of(player)))
            .inspect_err(|reason| warn!(player = %player, reason = %reason, "Position lookup failed"))
            .ok()
            .flatten()
    }
}

fn character_id(player: EntityHandle, identity: Option<&CharacterIdentity>) -> u64 {
    identity.map_or(u64::from(player.index), |i| i.platform_id)
}
