//! Named flows: declarative action lists run on zone enter/exit.
//!
//! ```text
//!   FlowStore ──try_get_flow──▶ FlowDefinition ──▶ FlowExecutor ──▶ ActionDispatcher
//!       │                                             │                (host)
//!       └── action aliases ───────────────────────────┘
//! ```
//!
//! Definitions are immutable once registered; a reload swaps whole
//! definitions. Actions themselves are a host capability: the executor
//! only resolves names and arguments, then dispatches.

pub mod executor;
pub mod store;

use serde::{Deserialize, Serialize};

use crate::entity_map::MapValue;

pub use executor::{ActionDispatcher, FlowExecutionResult, FlowExecutor, ResolvedArg};
pub use store::FlowStore;

/// One declarative action inside a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    /// Action name or alias (`"apply_buff"`, `"Teleport"`, ...).
    pub action: String,
    /// Positional arguments. Text starting with `@` is an entity-map alias.
    #[serde(default)]
    pub args: Vec<MapValue>,
    /// Keep going after this step fails, even when the run stops on failure.
    #[serde(default)]
    pub continue_on_failure: bool,
    /// Only meaningful for preflight steps: failure aborts the whole flow.
    #[serde(default)]
    pub critical: bool,
}

impl FlowStep {
    /// Create a step with the given action and arguments.
    #[must_use]
    pub fn new(action: impl Into<String>, args: Vec<MapValue>) -> Self {
        Self {
            action: action.into(),
            args,
            continue_on_failure: false,
            critical: false,
        }
    }

    /// Builder: mark the step as tolerated on failure.
    #[must_use]
    pub fn continue_on_failure(mut self) -> Self {
        self.continue_on_failure = true;
        self
    }

    /// Builder: mark a preflight step as critical.
    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// Steps of a flow as written in configuration (the id is the table key).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowSteps {
    /// Steps that must run before the main list.
    #[serde(default)]
    pub preflight: Vec<FlowStep>,
    /// Main ordered step list.
    #[serde(default)]
    pub steps: Vec<FlowStep>,
}

/// An immutable, named flow.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowDefinition {
    id: String,
    preflight: Vec<FlowStep>,
    steps: Vec<FlowStep>,
}

impl FlowDefinition {
    /// Create a flow with only main steps.
    #[must_use]
    pub fn new(id: impl Into<String>, steps: Vec<FlowStep>) -> Self {
        Self {
            id: id.into().trim().to_string(),
            preflight: Vec::new(),
            steps,
        }
    }

    /// Create a flow from its configured step lists.
    #[must_use]
    pub fn from_steps(id: impl Into<String>, steps: FlowSteps) -> Self {
        Self {
            id: id.into().trim().to_string(),
            preflight: steps.preflight,
            steps: steps.steps,
        }
    }

    /// Builder: attach preflight steps.
    #[must_use]
    pub fn with_preflight(mut self, preflight: Vec<FlowStep>) -> Self {
        self.preflight = preflight;
        self
    }

    /// Flow id as registered (trimmed, original casing).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Preflight steps.
    #[must_use]
    pub fn preflight(&self) -> &[FlowStep] {
        &self.preflight
    }

    /// Main steps.
    #[must_use]
    pub fn steps(&self) -> &[FlowStep] {
        &self.steps
    }

    /// Total number of steps, preflight included.
    #[must_use]
    pub fn total_steps(&self) -> usize {
        self.preflight.len() + self.steps.len()
    }
}
