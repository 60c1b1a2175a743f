//! Zone enter/exit lifecycle.
//!
//! [`ZoneLifecyclePipeline`] is the entry point the host calls on every
//! transition. It updates membership, asks the trap policy, runs the
//! registered [`ZoneEnterStep`]s or [`ZoneExitStep`]s, runs the zone's
//! flow through [`FlowLifecycle`], and publishes the outcome.

pub mod context;
pub mod flow_lifecycle;
pub mod pipeline;
pub mod steps;

pub use context::ZoneLifecycleContext;
pub use flow_lifecycle::{FailureCode, FlowLifecycle, LifecycleExecutionResult};
pub use pipeline::{TransitionReport, ZoneLifecyclePipeline};
pub use steps::{ForceBuffClearStep, StepRegistry, StepReport, ZoneEnterStep, ZoneExitStep};
