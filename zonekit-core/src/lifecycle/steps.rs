//! Ordered enter/exit steps.
//!
//! Steps run after the policy is evaluated and before the zone flow. They
//! are kept sorted by `order` (ties keep registration order). A failing or
//! panicking step is logged and counted; the remaining steps still run.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::context::ZoneLifecycleContext;
use crate::error::Result;
use crate::flow::ResolvedArg;
use crate::isolation::isolate;
use crate::metrics::ZoneCounters;
use crate::types::normalize_key;

/// A step run when a player enters a zone.
pub trait ZoneEnterStep: Send + Sync {
    /// Name used in logs and for removal.
    fn name(&self) -> &str;

    /// Lower runs first.
    fn order(&self) -> i32 {
        0
    }

    /// Do the work.
    ///
    /// # Errors
    /// Any failure; it is logged and does not stop other steps.
    fn execute(&self, context: &mut ZoneLifecycleContext<'_>) -> Result<()>;
}

/// A step run when a player leaves a zone.
pub trait ZoneExitStep: Send + Sync {
    /// Name used in logs and for removal.
    fn name(&self) -> &str;

    /// Lower runs first.
    fn order(&self) -> i32 {
        0
    }

    /// Do the work.
    ///
    /// # Errors
    /// Any failure; it is logged and does not stop other steps.
    fn execute(&self, context: &mut ZoneLifecycleContext<'_>) -> Result<()>;
}

/// What happened to the steps of one transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Names of steps that ran, in order (including failed ones).
    pub executed: Vec<String>,
    /// `(name, reason)` of steps that failed.
    pub failed: Vec<(String, String)>,
}

impl StepReport {
    /// Whether every step succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Enter and exit step lists.
pub struct StepRegistry {
    enter: RwLock<Vec<Arc<dyn ZoneEnterStep>>>,
    exit: RwLock<Vec<Arc<dyn ZoneExitStep>>>,
    counters: Arc<ZoneCounters>,
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("enter", &self.enter_step_names())
            .field("exit", &self.exit_step_names())
            .finish_non_exhaustive()
    }
}

/// Insert after every entry whose order is not greater.
fn insert_sorted<S: ?Sized>(list: &mut Vec<Arc<S>>, step: Arc<S>, order: impl Fn(&S) -> i32) {
    let key = order(step.as_ref());
    let at = list.iter().position(|s| order(s.as_ref()) > key).unwrap_or(list.len());
    list.insert(at, step);
}

impl StepRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new(counters: Arc<ZoneCounters>) -> Self {
        Self {
            enter: RwLock::new(Vec::new()),
            exit: RwLock::new(Vec::new()),
            counters,
        }
    }

    /// Add an enter step.
    pub fn register_enter(&self, step: Arc<dyn ZoneEnterStep>) {
        insert_sorted(&mut self.enter.write(), step, |s| s.order());
    }

    /// Add an exit step.
    pub fn register_exit(&self, step: Arc<dyn ZoneExitStep>) {
        insert_sorted(&mut self.exit.write(), step, |s| s.order());
    }

    /// Remove enter steps named `name` (case-insensitive).
    pub fn remove_enter(&self, name: &str) -> bool {
        let wanted = normalize_key(name);
        let mut list = self.enter.write();
        let before = list.len();
        list.retain(|s| normalize_key(s.name()) != wanted);
        list.len() != before
    }

    /// Remove exit steps named `name` (case-insensitive).
    pub fn remove_exit(&self, name: &str) -> bool {
        let wanted = normalize_key(name);
        let mut list = self.exit.write();
        let before = list.len();
        list.retain(|s| normalize_key(s.name()) != wanted);
        list.len() != before
    }

    /// Enter step names in run order.
    #[must_use]
    pub fn enter_step_names(&self) -> Vec<String> {
        self.enter.read().iter().map(|s| s.name().to_string()).collect()
    }

    /// Exit step names in run order.
    #[must_use]
    pub fn exit_step_names(&self) -> Vec<String> {
        self.exit.read().iter().map(|s| s.name().to_string()).collect()
    }

    /// Remove every step.
    pub fn clear(&self) {
        self.enter.write().clear();
        self.exit.write().clear();
    }

    /// Run every enter step against `context`.
    pub fn run_enter(&self, context: &mut ZoneLifecycleContext<'_>) -> StepReport {
        let steps = self.enter.read().clone();
        let mut report = StepReport::default();
        for step in steps {
            let outcome = isolate(|| step.execute(context));
            self.record(&mut report, step.name(), outcome, context);
        }
        report
    }

    /// Run every exit step against `context`.
    pub fn run_exit(&self, context: &mut ZoneLifecycleContext<'_>) -> StepReport {
        let steps = self.exit.read().clone();
        let mut report = StepReport::default();
        for step in steps {
            let outcome = isolate(|| step.execute(context));
            self.record(&mut report, step.name(), outcome, context);
        }
        report
    }

    fn record(
        &self,
        report: &mut StepReport,
        name: &str,
        outcome: std::result::Result<(), String>,
        context: &ZoneLifecycleContext<'_>,
    ) {
        report.executed.push(name.to_string());
        match outcome {
            Ok(()) => debug!(step = %name, zone_id = %context.zone_id, stage = %context.stage, "Lifecycle step done"),
            Err(reason) => {
                self.counters.step_faults.fetch_add(1, Ordering::Relaxed);
                warn!(
                    step = %name,
                    player = %context.player,
                    zone_id = %context.zone_id,
                    stage = %context.stage,
                    reason = %reason,
                    "Lifecycle step failed"
                );
                report.failed.push((name.to_string(), reason));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in steps
// ---------------------------------------------------------------------------

/// Action dispatched by [`ForceBuffClearStep`].
pub const CLEAN_BUFF_ACTION: &str = "CleanBuff";

/// Clears the player's buffs on exit when the policy asks for it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForceBuffClearStep;

impl ZoneExitStep for ForceBuffClearStep {
    fn name(&self) -> &str {
        "force-buff-clear"
    }

    fn order(&self) -> i32 {
        100
    }

    fn execute(&self, context: &mut ZoneLifecycleContext<'_>) -> Result<()> {
        if !context.decision.force_buff_clear_on_exit {
            return Ok(());
        }
        let args = [ResolvedArg::Entity(Some(context.player))];
        context.host.actions.dispatch(CLEAN_BUFF_ACTION, &args, &mut context.map)
    }
}
