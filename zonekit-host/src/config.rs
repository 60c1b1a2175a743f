//! Host configuration (`zonehost.toml`).
//!
//! The engine sections (`[general]`, `[lifecycle]`, `[flows]`,
//! `[sandbox]`) sit at the top level exactly as in `zonekit.toml`; the
//! host adds `[host]` world geometry and `[logging]`.
//!
//! ```toml
//! [host]
//! position_change_threshold = 0.5
//!
//! [[host.zones]]
//! id = "arena-1"
//! center = { x = 0.0, y = 0.0, z = 0.0 }
//! radius = 25.0
//!
//! [logging]
//! level = "debug"
//! json = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use zonekit_core::{Position, ZoneKitConfig, normalize_key};

use crate::error::{HostError, Result};

/// Full host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    /// Engine configuration.
    #[serde(flatten)]
    pub engine: ZoneKitConfig,
    /// World geometry.
    #[serde(default)]
    pub host: WorldConfig,
    /// Logging bootstrap.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HostConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `HostError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| HostError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// World geometry
// ---------------------------------------------------------------------------

/// Zone geometry and movement sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Movement below this distance since the last evaluated sample is
    /// ignored by the zone detector.
    #[serde(default = "default_position_change_threshold")]
    pub position_change_threshold: f32,
    /// Circular zones, matched in declaration order.
    #[serde(default)]
    pub zones: Vec<CircleZone>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            position_change_threshold: default_position_change_threshold(),
            zones: Vec::new(),
        }
    }
}

/// A zone shaped as a vertical cylinder: a circle on the ground plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircleZone {
    /// Zone id handed to the engine.
    pub id: String,
    /// Center of the circle.
    pub center: Position,
    /// Radius in world units.
    pub radius: f32,
}

impl CircleZone {
    /// Create a zone.
    #[must_use]
    pub fn new(id: impl Into<String>, center: Position, radius: f32) -> Self {
        Self {
            id: id.into(),
            center,
            radius,
        }
    }

    /// Whether `position` lies inside the circle (edge included). Height
    /// is ignored.
    #[must_use]
    pub fn contains(&self, position: &Position) -> bool {
        self.center.planar_distance(position) <= self.radius
    }

    /// Whether this zone is `zone_id`, compared case-insensitively.
    #[must_use]
    pub fn is(&self, zone_id: &str) -> bool {
        normalize_key(&self.id) == normalize_key(zone_id)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging bootstrap settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Include the event target (module path).
    #[serde(default = "default_true")]
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            with_target: true,
        }
    }
}

fn default_position_change_threshold() -> f32 { 0.5 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }
