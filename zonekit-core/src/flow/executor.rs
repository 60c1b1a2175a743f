//! Flow execution against a host-supplied action dispatcher.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{debug, warn};

use super::{FlowDefinition, FlowStep, FlowStore};
use crate::entity_map::{EntityMap, MapValue};
use crate::error::Result;
use crate::isolation::isolate;
use crate::metrics::ZoneCounters;
use crate::types::EntityHandle;

// ---------------------------------------------------------------------------
// Dispatch boundary
// ---------------------------------------------------------------------------

/// A step argument after alias resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedArg {
    /// An `@alias` reference. `None` when the alias was not bound.
    Entity(Option<EntityHandle>),
    /// A literal, or an `@alias` that named a plain value.
    Value(MapValue),
}

impl ResolvedArg {
    /// The entity, if this argument resolved to one.
    #[must_use]
    pub fn as_entity(&self) -> Option<EntityHandle> {
        match self {
            Self::Entity(e) => *e,
            Self::Value(_) => None,
        }
    }

    /// The text, if this argument is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Value(MapValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// The integer, if this argument is an integer.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Value(MapValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value as `f64`, accepting integers too.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Value(MapValue::Float(v)) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            Self::Value(MapValue::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }
}

/// Host capability: perform a named action.
///
/// Implementations return `Err` for any failure. A panic inside `dispatch`
/// is also caught by the executor and treated as a failed step.
pub trait ActionDispatcher: Send + Sync {
    /// Perform `action` with resolved `args`. The map may be updated, e.g.
    /// to bind a newly spawned entity for later steps.
    ///
    /// # Errors
    /// Any error the host wants to surface as a failed step.
    fn dispatch(&self, action: &str, args: &[ResolvedArg], map: &mut EntityMap) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Outcome of one flow run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowExecutionResult {
    /// Whether every attempted step succeeded.
    pub success: bool,
    /// Steps in the definition, preflight included.
    pub total_steps: usize,
    /// Steps that were attempted.
    pub executed_steps: usize,
    /// Steps that failed.
    pub failed_steps: usize,
    /// First failure, or a summary when several steps failed.
    pub error_message: Option<String>,
}

impl FlowExecutionResult {
    fn ok(total_steps: usize, executed_steps: usize) -> Self {
        Self {
            success: true,
            total_steps,
            executed_steps,
            failed_steps: 0,
            error_message: None,
        }
    }

    fn fail(total_steps: usize, executed_steps: usize, failed_steps: usize, message: String) -> Self {
        Self {
            success: false,
            total_steps,
            executed_steps,
            failed_steps,
            error_message: Some(message),
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs flow definitions step by step.
pub struct FlowExecutor {
    store: Arc<FlowStore>,
    dispatcher: Arc<dyn ActionDispatcher>,
    counters: Arc<ZoneCounters>,
}

impl std::fmt::Debug for FlowExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowExecutor")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl FlowExecutor {
    /// Create an executor over a store and a host dispatcher.
    #[must_use]
    pub fn new(
        store: Arc<FlowStore>,
        dispatcher: Arc<dyn ActionDispatcher>,
        counters: Arc<ZoneCounters>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            counters,
        }
    }

    /// The store flows are looked up in.
    #[must_use]
    pub fn store(&self) -> &Arc<FlowStore> {
        &self.store
    }

    /// Look up `flow_id` and run it.
    pub fn execute_by_id(
        &self,
        flow_id: &str,
        map: &mut EntityMap,
        stop_on_failure: bool,
    ) -> FlowExecutionResult {
        match self.store.try_get_flow(flow_id) {
            Some(definition) => self.execute(&definition, map, stop_on_failure),
            None => FlowExecutionResult::fail(0, 0, 0, format!("Flow '{}' not found.", flow_id.trim())),
        }
    }

    /// Run `definition` against `map`.
    ///
    /// Preflight steps run first; a failing critical preflight step aborts
    /// the flow. With `stop_on_failure`, the first failing main step aborts
    /// the rest unless that step is marked `continue_on_failure`. Without
    /// it, every step is attempted and the result is successful only if
    /// none failed.
    pub fn execute(
        &self,
        definition: &FlowDefinition,
        map: &mut EntityMap,
        stop_on_failure: bool,
    ) -> FlowExecutionResult {
        let start = Instant::now();
        let total = definition.total_steps();
        let mut executed = 0usize;
        let mut failed = 0usize;
        let mut first_error: Option<String> = None;

        for (i, step) in definition.preflight().iter().enumerate() {
            executed += 1;
            if let Err(reason) = self.run_step(step, map) {
                failed += 1;
                if step.critical {
                    return self.finish(
                        definition,
                        start,
                        FlowExecutionResult::fail(
                            total,
                            executed,
                            failed,
                            format!("Preflight step {i} failed: {}: {reason}", step.action),
                        ),
                    );
                }
                first_error.get_or_insert(reason);
            }
        }

        for (i, step) in definition.steps().iter().enumerate() {
            executed += 1;
            if let Err(reason) = self.run_step(step, map) {
                failed += 1;
                if stop_on_failure && !step.continue_on_failure {
                    return self.finish(
                        definition,
                        start,
                        FlowExecutionResult::fail(
                            total,
                            executed,
                            failed,
                            format!("Flow step {i} failed: {}: {reason}", step.action),
                        ),
                    );
                }
                first_error.get_or_insert(reason);
            }
        }

        let result = match first_error {
            None => FlowExecutionResult::ok(total, executed),
            Some(reason) => FlowExecutionResult::fail(
                total,
                executed,
                failed,
                format!("Flow completed with {failed} failed step(s): {reason}"),
            ),
        };
        self.finish(definition, start, result)
    }

    fn run_step(&self, step: &FlowStep, map: &mut EntityMap) -> std::result::Result<(), String> {
        let action = self.store.resolve_action(&step.action);
        if action.is_empty() {
            self.counters.actions_failed.fetch_add(1, Ordering::Relaxed);
            return Err("empty action name".to_string());
        }
        let args: Vec<ResolvedArg> = step.args.iter().map(|a| resolve_arg(a, map)).collect();
        debug!(action = %action, args = args.len(), "Dispatching flow action");

        let dispatcher = &self.dispatcher;
        let outcome = isolate(|| dispatcher.dispatch(&action, &args, map));
        if let Err(reason) = &outcome {
            self.counters.actions_failed.fetch_add(1, Ordering::Relaxed);
            warn!(action = %action, reason = %reason, "Flow action failed");
        }
        outcome
    }

    fn finish(
        &self,
        definition: &FlowDefinition,
        start: Instant,
        result: FlowExecutionResult,
    ) -> FlowExecutionResult {
        self.counters.flows_executed.fetch_add(1, Ordering::Relaxed);
        if !result.success {
            self.counters.flows_failed.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            flow = %definition.id(),
            success = result.success,
            executed = result.executed_steps,
            failed = result.failed_steps,
            elapsed_us = start.elapsed().as_micros(),
            "Flow finished"
        );
        result
    }
}

/// Resolve `@alias` arguments through the map; literals pass through.
fn resolve_arg(arg: &MapValue, map: &EntityMap) -> ResolvedArg {
    match arg {
        MapValue::Text(text) if text.starts_with('@') => {
            let alias = &text[1..];
            if let Some(entity) = map.entity(alias) {
                ResolvedArg::Entity(Some(entity))
            } else if let Some(value) = map.value(alias) {
                ResolvedArg::Value(value.clone())
            } else {
                ResolvedArg::Entity(None)
            }
        }
        other => ResolvedArg::Value(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ZoneError;
    use parking_lot::Mutex;

    /// Records every dispatched action; fails the ones listed in `fail`.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Vec<ResolvedArg>)>>,
        fail: Vec<&'static str>,
        panic_on: Option<&'static str>,
    }

    impl ActionDispatcher for Recorder {
        fn dispatch(&self, action: &str, args: &[ResolvedArg], _map: &mut EntityMap) -> Result<()> {
            self.calls.lock().push((action.to_string(), args.to_vec()));
            if self.panic_on == Some(action) {
                panic!("host fault in {action}");
            }
            if self.fail.iter().any(|f| *f == action) {
                return Err(ZoneError::ActionFailed {
                    action: action.to_string(),
                    reason: "rejected".to_string(),
                });
            }
            Ok(())
        }
    }

    fn executor(recorder: Arc<Recorder>) -> FlowExecutor {
        FlowExecutor::new(
            Arc::new(FlowStore::new()),
            recorder,
            Arc::new(ZoneCounters::new()),
        )
    }

    fn four_steps() -> FlowDefinition {
        FlowDefinition::new(
            "four",
            vec![
                FlowStep::new("A", vec![]),
                FlowStep::new("B", vec![]),
                FlowStep::new("C", vec![]),
                FlowStep::new("D", vec![]),
            ],
        )
    }

    fn called(recorder: &Recorder) -> Vec<String> {
        recorder.calls.lock().iter().map(|(a, _)| a.clone()).collect()
    }

    #[test]
    fn continue_mode_attempts_every_step() {
        let recorder = Arc::new(Recorder { fail: vec!["B"], ..Recorder::default() });
        let exec = executor(recorder.clone());
        let result = exec.execute(&four_steps(), &mut EntityMap::new(), false);

        assert!(!result.success);
        assert_eq!(called(&recorder), vec!["A", "B", "C", "D"]);
        assert_eq!(result.executed_steps, 4);
        assert_eq!(result.failed_steps, 1);
        assert!(result.error_message.unwrap_or_default().contains("rejected"));
    }

    #[test]
    fn stop_mode_aborts_after_first_failure() {
        let recorder = Arc::new(Recorder { fail: vec!["B"], ..Recorder::default() });
        let exec = executor(recorder.clone());
        let result = exec.execute(&four_steps(), &mut EntityMap::new(), true);

        assert!(!result.success);
        assert_eq!(called(&recorder), vec!["A", "B"]);
        assert_eq!(result.executed_steps, 2);
        assert_eq!(
            result.error_message.as_deref(),
            Some("Flow step 1 failed: B: Action 'B' failed: rejected")
        );
    }

    #[test]
    fn continue_on_failure_step_overrides_stop_mode() {
        let recorder = Arc::new(Recorder { fail: vec!["A"], ..Recorder::default() });
        let exec = executor(recorder.clone());
        let def = FlowDefinition::new(
            "soft",
            vec![FlowStep::new("A", vec![]).continue_on_failure(), FlowStep::new("B", vec![])],
        );
        let result = exec.execute(&def, &mut EntityMap::new(), true);
        assert_eq!(called(&recorder), vec!["A", "B"]);
        assert!(!result.success);
    }

    #[test]
    fn panicking_action_is_a_failed_step() {
        let recorder = Arc::new(Recorder { panic_on: Some("B"), ..Recorder::default() });
        let exec = executor(recorder.clone());
        let result = exec.execute(&four_steps(), &mut EntityMap::new(), false);
        assert_eq!(called(&recorder).len(), 4);
        assert_eq!(result.failed_steps, 1);
        assert!(result.error_message.unwrap_or_default().contains("host fault in B"));
    }

    #[test]
    fn empty_action_counts_as_failure() {
        let recorder = Arc::new(Recorder::default());
        let exec = executor(recorder.clone());
        let def = FlowDefinition::new("blank", vec![FlowStep::new("  ", vec![]), FlowStep::new("A", vec![])]);
        let result = exec.execute(&def, &mut EntityMap::new(), false);
        assert_eq!(result.failed_steps, 1);
        assert_eq!(called(&recorder), vec!["A"]);
    }

    #[test]
    fn critical_preflight_failure_aborts() {
        let recorder = Arc::new(Recorder { fail: vec!["Check"], ..Recorder::default() });
        let exec = executor(recorder.clone());
        let def = four_steps().with_preflight(vec![FlowStep::new("Check", vec![]).critical()]);
        let result = exec.execute(&def, &mut EntityMap::new(), false);
        assert!(!result.success);
        assert_eq!(called(&recorder), vec!["Check"]);
        assert_eq!(result.total_steps, 5);
    }

    #[test]
    fn aliases_and_arguments_are_resolved() {
        let recorder = Arc::new(Recorder::default());
        let exec = executor(recorder.clone());
        let def = FlowDefinition::new(
            "kit",
            vec![FlowStep::new(
                "apply_buff",
                vec![
                    MapValue::Text("@player".into()),
                    MapValue::Int(-1_234),
                    MapValue::Text("@zoneId".into()),
                    MapValue::Text("@nobody".into()),
                ],
            )],
        );
        let mut map = EntityMap::new();
        map.set_entity("player", EntityHandle::new(5, 1));
        map.set_string("zoneId", "arena-1");

        assert!(exec.execute(&def, &mut map, true).success);
        let calls = recorder.calls.lock();
        let (action, args) = &calls[0];
        assert_eq!(action, "ApplyBuff");
        assert_eq!(args[0].as_entity(), Some(EntityHandle::new(5, 1)));
        assert_eq!(args[1].as_int(), Some(-1_234));
        assert_eq!(args[2].as_str(), Some("arena-1"));
        assert_eq!(args[3], ResolvedArg::Entity(None));
    }

    #[test]
    fn unknown_flow_id_reports_not_found() {
        let exec = executor(Arc::new(Recorder::default()));
        let result = exec.execute_by_id(" ghost-flow ", &mut EntityMap::new(), true);
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("Flow 'ghost-flow' not found."));
    }
}
