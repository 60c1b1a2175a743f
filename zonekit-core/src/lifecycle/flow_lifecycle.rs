//! Zone conventions on top of the flow executor.
//!
//! An empty flow id is a benign no-op, an unknown id is a
//! [`FailureCode::MissingFlow`] failure, and any step failure surfaces as
//! [`FailureCode::RuntimeActionFailure`] with the executor's message.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::context::{PLAYER_ALIAS, ZONE_ID_ALIAS};
use crate::entity_map::EntityMap;
use crate::flow::{FlowExecutionResult, FlowExecutor};
use crate::types::{EntityHandle, LifecycleStage};

/// Why a lifecycle flow failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCode {
    /// The configured flow id does not resolve.
    MissingFlow,
    /// The flow ran and at least one action failed.
    RuntimeActionFailure,
}

/// Outcome of running a zone's enter or exit flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleExecutionResult {
    /// Whether the flow ran cleanly (or there was nothing to run).
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
    /// Set on failure.
    pub failure_code: Option<FailureCode>,
    /// Executor details when the flow actually ran.
    pub flow: Option<FlowExecutionResult>,
}

impl LifecycleExecutionResult {
    fn ok(message: String, flow: Option<FlowExecutionResult>) -> Self {
        Self {
            success: true,
            message,
            failure_code: None,
            flow,
        }
    }

    fn fail(code: FailureCode, message: String, flow: Option<FlowExecutionResult>) -> Self {
        Self {
            success: false,
            message,
            failure_code: Some(code),
            flow,
        }
    }
}

fn stage_label(stage: LifecycleStage) -> &'static str {
    match stage {
        LifecycleStage::Enter => "Enter",
        LifecycleStage::Exit => "Exit",
    }
}

/// Runs zone enter/exit flows.
#[derive(Debug)]
pub struct FlowLifecycle {
    executor: Arc<FlowExecutor>,
    stop_on_failure: bool,
}

impl FlowLifecycle {
    /// Wrap `executor`.
    #[must_use]
    pub fn new(executor: Arc<FlowExecutor>, stop_on_failure: bool) -> Self {
        Self {
            executor,
            stop_on_failure,
        }
    }

    /// The wrapped executor.
    #[must_use]
    pub fn executor(&self) -> &Arc<FlowExecutor> {
        &self.executor
    }

    /// Run `flow_id` as `player`'s enter flow for `zone_id`.
    pub fn try_execute_enter_flow(&self, flow_id: &str, zone_id: &str, player: EntityHandle) -> LifecycleExecutionResult {
        let mut map = seeded_map(zone_id, player);
        self.run(LifecycleStage::Enter, flow_id, zone_id, &mut map)
    }

    /// Run `flow_id` as `player`'s exit flow for `zone_id`.
    pub fn try_execute_exit_flow(&self, flow_id: &str, zone_id: &str, player: EntityHandle) -> LifecycleExecutionResult {
        let mut map = seeded_map(zone_id, player);
        self.run(LifecycleStage::Exit, flow_id, zone_id, &mut map)
    }

    /// Run `flow_id` against an existing map.
    pub fn run(&self, stage: LifecycleStage, flow_id: &str, zone_id: &str, map: &mut EntityMap) -> LifecycleExecutionResult {
        let label = stage_label(stage);
        let flow_id = flow_id.trim();
        if flow_id.is_empty() {
            return LifecycleExecutionResult::ok(format!("{label} flow skipped: empty flowId."), None);
        }

        let Some(definition) = self.executor.store().try_get_flow(flow_id) else {
            warn!(flow = %flow_id, zone_id = %zone_id, stage = %stage, "Lifecycle flow not found");
            return LifecycleExecutionResult::fail(
                FailureCode::MissingFlow,
                format!("{label} flow not found: {flow_id}"),
                None,
            );
        };

        let result = self.executor.execute(&definition, map, self.stop_on_failure);
        if result.success {
            debug!(flow = %flow_id, zone_id = %zone_id, stage = %stage, "Lifecycle flow executed");
            LifecycleExecutionResult::ok(format!("{label} flow executed: {flow_id}"), Some(result))
        } else {
            let message = result
                .error_message
                .clone()
                .unwrap_or_else(|| format!("{label} flow failed: {flow_id}"));
            warn!(flow = %flow_id, zone_id = %zone_id, stage = %stage, reason = %message, "Lifecycle flow failed");
            LifecycleExecutionResult::fail(FailureCode::RuntimeActionFailure, message, Some(result))
        }
    }
}

fn seeded_map(zone_id: &str, player: EntityHandle) -> EntityMap {
    let mut map = EntityMap::new();
    map.set_entity(PLAYER_ALIAS, player);
    map.set_string(ZONE_ID_ALIAS, zone_id);
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, ZoneError};
    use crate::flow::{ActionDispatcher, FlowDefinition, FlowStep, FlowStore, ResolvedArg};
    use crate::metrics::ZoneCounters;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Calls(Mutex<Vec<String>>);

    impl ActionDispatcher for Calls {
        fn dispatch(&self, action: &str, args: &[ResolvedArg], _map: &mut EntityMap) -> Result<()> {
            self.0.lock().push(action.to_string());
            if action == "Explode" {
                return Err(ZoneError::ActionFailed {
                    action: action.to_string(),
                    reason: "boom".to_string(),
                });
            }
            if args.first().is_some_and(|a| a.as_entity().is_none()) {
                return Err(ZoneError::ActionFailed {
                    action: action.to_string(),
                    reason: "no target".to_string(),
                });
            }
            Ok(())
        }
    }

    fn lifecycle() -> (FlowLifecycle, Arc<Calls>) {
        let store = Arc::new(FlowStore::new());
        store.register_flow(
            FlowDefinition::new(
                "grant-arena-kit",
                vec![FlowStep::new("apply_buff", vec!["@player".into()])],
            ),
            false,
        );
        store.register_flow(
            FlowDefinition::new("broken", vec![FlowStep::new("Explode", Vec::new())]),
            false,
        );
        let calls = Arc::new(Calls::default());
        let executor = Arc::new(FlowExecutor::new(store, calls.clone(), Arc::new(ZoneCounters::new())));
        (FlowLifecycle::new(executor, false), calls)
    }

    #[test]
    fn empty_flow_id_is_a_silent_success() {
        let (lifecycle, calls) = lifecycle();
        let result = lifecycle.try_execute_enter_flow("  ", "arena-1", EntityHandle::new(1, 0));
        assert!(result.success);
        assert_eq!(result.message, "Enter flow skipped: empty flowId.");
        assert!(result.failure_code.is_none());
        assert!(calls.0.lock().is_empty());
    }

    #[test]
    fn unknown_flow_is_missing_flow() {
        let (lifecycle, _) = lifecycle();
        let result = lifecycle.try_execute_enter_flow("ghost-flow", "arena-1", EntityHandle::new(1, 0));
        assert!(!result.success);
        assert_eq!(result.failure_code, Some(FailureCode::MissingFlow));
        assert_eq!(result.message, "Enter flow not found: ghost-flow");
    }

    #[test]
    fn player_alias_resolves_in_flow_args() {
        let (lifecycle, calls) = lifecycle();
        let result = lifecycle.try_execute_enter_flow("Grant-Arena-Kit", "arena-1", EntityHandle::new(1, 0));
        assert!(result.success, "{}", result.message);
        assert_eq!(*calls.0.lock(), vec!["ApplyBuff".to_string()]);
    }

    #[test]
    fn action_failure_is_runtime_failure_with_message() {
        let (lifecycle, _) = lifecycle();
        let result = lifecycle.try_execute_exit_flow("broken", "arena-1", EntityHandle::new(1, 0));
        assert_eq!(result.failure_code, Some(FailureCode::RuntimeActionFailure));
        assert!(result.message.contains("boom"), "{}", result.message);
        assert_eq!(result.flow.map(|f| f.failed_steps), Some(1));
    }
}
