//! Application context owning every engine subsystem.
//!
//! There are no process-wide singletons: the host creates one [`ZoneKit`]
//! at startup, calls [`ZoneKit::on_enter`] / [`ZoneKit::on_exit`] from its
//! tick, and calls [`ZoneKit::shutdown`] when it stops.

use std::sync::Arc;

use tracing::info;

use crate::config::{FlowsConfig, ZoneKitConfig};
use crate::error::Result;
use crate::events::EventBus;
use crate::flow::{FlowExecutor, FlowStore};
use crate::host::HostBindings;
use crate::lifecycle::{FlowLifecycle, ForceBuffClearStep, StepRegistry, TransitionReport, ZoneLifecyclePipeline};
use crate::metrics::{CounterSnapshot, ZoneCounters};
use crate::policy::TrapPolicyResolver;
use crate::sandbox::{SandboxCoordinator, SandboxEnterStep, SandboxExitStep};
use crate::tracker::ZoneMembershipTracker;
use crate::types::{EntityHandle, Position};

/// The engine, wired.
pub struct ZoneKit {
    config: ZoneKitConfig,
    counters: Arc<ZoneCounters>,
    bus: Arc<EventBus>,
    tracker: Arc<ZoneMembershipTracker>,
    resolver: Arc<TrapPolicyResolver>,
    flows: Arc<FlowStore>,
    executor: Arc<FlowExecutor>,
    steps: Arc<StepRegistry>,
    sandbox: Arc<SandboxCoordinator>,
    pipeline: ZoneLifecyclePipeline,
}

impl std::fmt::Debug for ZoneKit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneKit")
            .field("tracked_players", &self.tracker.tracked_count())
            .field("flows", &self.flows.len())
            .field("sandbox", &self.sandbox)
            .finish_non_exhaustive()
    }
}

impl ZoneKit {
    /// Build every subsystem over `host`.
    #[must_use]
    pub fn new(config: ZoneKitConfig, host: HostBindings) -> Self {
        let counters = Arc::new(ZoneCounters::new());
        let bus = Arc::new(EventBus::new(counters.clone()));
        let tracker = Arc::new(ZoneMembershipTracker::new(bus.clone()));
        let resolver = Arc::new(TrapPolicyResolver::new(counters.clone()));

        let flows = Arc::new(FlowStore::new());
        apply_flows_config(&flows, &config.flows);
        let executor = Arc::new(FlowExecutor::new(flows.clone(), host.actions.clone(), counters.clone()));

        let sandbox = Arc::new(SandboxCoordinator::new(
            config.sandbox.clone(),
            &host,
            bus.clone(),
            counters.clone(),
        ));
        let steps = Arc::new(StepRegistry::new(counters.clone()));
        install_builtin_steps(&steps, &sandbox);

        let pipeline = ZoneLifecyclePipeline::new(
            config.general.enabled,
            config.lifecycle.clone(),
            tracker.clone(),
            resolver.clone(),
            steps.clone(),
            FlowLifecycle::new(executor.clone(), config.lifecycle.stop_on_failure),
            bus.clone(),
            host,
            counters.clone(),
        );

        info!(
            flows = flows.len(),
            zones = config.lifecycle.zones.len(),
            sandbox = config.sandbox.enabled,
            "ZoneKit initialized"
        );
        Self {
            config,
            counters,
            bus,
            tracker,
            resolver,
            flows,
            executor,
            steps,
            sandbox,
            pipeline,
        }
    }

    /// Player entered a zone.
    pub fn on_enter(&self, player: EntityHandle, zone_id: &str, position: Position) -> TransitionReport {
        self.pipeline.on_enter(player, zone_id, position)
    }

    /// Player left a zone.
    pub fn on_exit(&self, player: EntityHandle, zone_id: &str) -> TransitionReport {
        self.pipeline.on_exit(player, zone_id)
    }

    /// Replace flow definitions and aliases at runtime.
    pub fn reload_flows(&self, flows: &FlowsConfig) {
        apply_flows_config(&self.flows, flows);
    }

    /// Re-import sandbox sessions left open by a previous run.
    ///
    /// # Errors
    /// Malformed or unreadable sandbox files.
    pub fn load_sandbox_state(&self) -> Result<usize> {
        self.sandbox.load_from_disk()
    }

    /// Drop all runtime state: memberships, subscriptions, the policy,
    /// custom steps, open sandboxes and counters. Flows are reloaded from
    /// the startup configuration. Files on disk are left alone.
    pub fn reset(&self) {
        self.tracker.clear();
        self.bus.clear_all();
        self.resolver.unregister_policy("");
        self.steps.clear();
        install_builtin_steps(&self.steps, &self.sandbox);
        self.sandbox.reset();
        apply_flows_config(&self.flows, &self.config.flows);
        self.counters.reset();
        info!("ZoneKit reset");
    }

    /// Flush pending sandbox state.
    ///
    /// # Errors
    /// Persistence failures.
    pub fn shutdown(&self) -> Result<()> {
        self.sandbox.flush()?;
        info!(open_sandboxes = self.sandbox.store().len(), "ZoneKit shut down");
        Ok(())
    }

    // -- accessors ------------------------------------------------------------

    /// Startup configuration.
    #[must_use]
    pub fn config(&self) -> &ZoneKitConfig {
        &self.config
    }

    /// Counter values right now.
    #[must_use]
    pub fn metrics(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Event bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Membership tracker.
    #[must_use]
    pub fn tracker(&self) -> &Arc<ZoneMembershipTracker> {
        &self.tracker
    }

    /// Trap policy slot.
    #[must_use]
    pub fn policies(&self) -> &Arc<TrapPolicyResolver> {
        &self.resolver
    }

    /// Flow definitions and aliases.
    #[must_use]
    pub fn flows(&self) -> &Arc<FlowStore> {
        &self.flows
    }

    /// Flow executor, for running flows outside a transition.
    #[must_use]
    pub fn executor(&self) -> &Arc<FlowExecutor> {
        &self.executor
    }

    /// Enter/exit steps.
    #[must_use]
    pub fn steps(&self) -> &Arc<StepRegistry> {
        &self.steps
    }

    /// Sandbox coordinator.
    #[must_use]
    pub fn sandbox(&self) -> &Arc<SandboxCoordinator> {
        &self.sandbox
    }
}

fn apply_flows_config(store: &FlowStore, flows: &FlowsConfig) {
    store.reload_action_aliases(flows.aliases.iter().map(|(alias, action)| (alias.as_str(), action.as_str())));
    store.reload(flows.to_definitions());
}

fn install_builtin_steps(steps: &StepRegistry, sandbox: &Arc<SandboxCoordinator>) {
    steps.register_enter(Arc::new(SandboxEnterStep::new(sandbox.clone())));
    steps.register_exit(Arc::new(SandboxExitStep::new(sandbox.clone())));
    steps.register_exit(Arc::new(ForceBuffClearStep));
}
