//! # zonekit-host: simulated host for the zonekit engine
//!
//! The engine only sees capability traits. This crate provides a complete
//! in-memory implementation of them, so the engine can be driven end to
//! end without a game attached.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  SimServer                    │
//! │  ┌──────────────┐   position    ┌──────────┐  │
//! │  │   SimWorld   │──── ticks ───▶│ Detector │  │
//! │  │  players     │               └────┬─────┘  │
//! │  │  entities    │        on_enter/on_exit     │
//! │  │  actions     │                    ▼        │
//! │  │              │◀── capabilities ─ ZoneKit   │
//! │  └──────────────┘     (zonekit-core)          │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `world`: players, entities, progression components, zone geometry
//! - `actions`: built-in flow actions (`ApplyBuff`, `Teleport`, `GrantTech`, ...)
//! - `detector`: position samples to zone transitions
//! - `server`: world + engine + detector in one value
//! - `config`: `zonehost.toml`
//! - `telemetry`: `tracing` subscriber bootstrap

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod actions;
pub mod config;
pub mod detector;
pub mod error;
pub mod server;
pub mod telemetry;
pub mod world;

pub use actions::HostAction;
pub use config::{CircleZone, HostConfig, LoggingConfig, WorldConfig};
pub use detector::ZoneDetector;
pub use error::{HostError, Result};
pub use server::SimServer;
pub use telemetry::init_logging;
pub use world::{SimEntity, SimPlayer, SimWorld, TECH_COMPONENT};
