//! # zonekit core library
//!
//! Game-agnostic zone lifecycle engine for game servers.
//!
//! The host tells the engine when a player enters or leaves a zone; the
//! engine does the rest:
//!
//! - **Membership**: who is in which zone ([`ZoneMembershipTracker`])
//! - **Policy**: one pluggable override hook ([`TrapPolicyResolver`])
//! - **Steps**: ordered enter/exit hooks ([`lifecycle::StepRegistry`])
//! - **Flows**: named, declarative action lists ([`flow::FlowExecutor`])
//! - **Sandbox**: progression snapshot, diff and rollback ([`sandbox`])
//! - **Events**: typed in-process publish/subscribe ([`EventBus`])
//!
//! Everything the engine needs from the live game goes through the traits
//! in [`host`]; [`ZoneKit`] wires all of it together.
//!
//! ## Failure contract
//!
//! Nothing on the transition path returns an error or panics into the
//! host. Policies, steps, actions and event handlers are isolated; their
//! failures are logged, counted in [`metrics`], and reported in the
//! returned [`lifecycle::TransitionReport`]. Only batch persistence
//! (`read_*`/`write_*`, [`ZoneKit::shutdown`]) returns `Result`.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod entity_map;
pub mod error;
pub mod events;
pub mod flow;
pub mod host;
mod isolation;
pub mod lifecycle;
pub mod metrics;
pub mod policy;
pub mod runtime;
pub mod sandbox;
pub mod tracker;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ZoneKitConfig;
pub use entity_map::{EntityMap, MapValue};
pub use error::{Result, ZoneError};
pub use events::EventBus;
pub use host::HostBindings;
pub use policy::{TrapLifecycleDecision, TrapLifecyclePolicy, TrapPolicyResolver};
pub use runtime::ZoneKit;
pub use tracker::{PlayerZoneState, ZoneMembershipTracker};
pub use types::*;
