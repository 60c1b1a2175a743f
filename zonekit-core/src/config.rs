//! Configuration for the zone lifecycle engine.
//!
//! Maps directly to `zonekit.toml`. Every section is optional and falls
//! back to its `Default`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::flow::{FlowDefinition, FlowSteps};
use crate::types::normalize_key;

/// Placeholder in flow ids replaced by the zone id at lookup.
pub const ZONE_ID_PLACEHOLDER: &str = "{ZoneId}";

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneKitConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Zone enter/exit behavior.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Flow definitions and action aliases.
    #[serde(default)]
    pub flows: FlowsConfig,
    /// Progression sandboxing.
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

impl ZoneKitConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ZoneError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::ZoneError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether zone transitions are processed at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
        }
    }
}

/// Per-zone settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSettings {
    /// Flow run on enter; empty means none.
    #[serde(default)]
    pub enter_flow: String,
    /// Flow run on exit; empty means none.
    #[serde(default)]
    pub exit_flow: String,
    /// Snapshot progression on enter and roll it back on exit.
    #[serde(default)]
    pub sandbox: bool,
}

impl ZoneSettings {
    /// Copy with `{ZoneId}` substituted in both flow ids.
    #[must_use]
    pub fn resolved_for(&self, zone_id: &str) -> Self {
        Self {
            enter_flow: self.enter_flow.replace(ZONE_ID_PLACEHOLDER, zone_id),
            exit_flow: self.exit_flow.replace(ZONE_ID_PLACEHOLDER, zone_id),
            sandbox: self.sandbox,
        }
    }
}

/// Zone enter/exit behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Abort a flow at its first failing step.
    #[serde(default)]
    pub stop_on_failure: bool,
    /// Entering a new zone while inside another first exits the old one.
    #[serde(default = "default_true")]
    pub implicit_exit_on_reenter: bool,
    /// Settings by zone id (matched case-insensitively).
    #[serde(default)]
    pub zones: BTreeMap<String, ZoneSettings>,
    /// Settings for zones not listed in `zones`.
    #[serde(default)]
    pub wildcard: Option<ZoneSettings>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_on_failure: false,
            implicit_exit_on_reenter: true,
            zones: BTreeMap::new(),
            wildcard: None,
        }
    }
}

impl LifecycleConfig {
    /// Settings for `zone_id` with placeholders substituted.
    ///
    /// Falls back to the wildcard, then to empty settings.
    #[must_use]
    pub fn settings_for(&self, zone_id: &str) -> ZoneSettings {
        let wanted = normalize_key(zone_id);
        self.zones
            .iter()
            .find(|(id, _)| normalize_key(id) == wanted)
            .map(|(_, s)| s)
            .or(self.wildcard.as_ref())
            .map(|s| s.resolved_for(zone_id.trim()))
            .unwrap_or_default()
    }
}

/// Flow definitions and action aliases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowsConfig {
    /// Flows by id.
    #[serde(default)]
    pub definitions: BTreeMap<String, FlowSteps>,
    /// Action alias overrides (`alias = "Action"`).
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl FlowsConfig {
    /// Build immutable flow definitions from the configured tables.
    #[must_use]
    pub fn to_definitions(&self) -> Vec<FlowDefinition> {
        self.definitions
            .iter()
            .map(|(id, steps)| FlowDefinition::from_steps(id.clone(), steps.clone()))
            .collect()
    }
}

/// Progression sandboxing and its persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Master switch; zones still opt in with `sandbox = true`.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Write baseline/delta files on every change.
    #[serde(default = "default_true")]
    pub persist: bool,
    /// Directory all sandbox files live in.
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    /// Baseline file name.
    #[serde(default = "default_baseline_file")]
    pub baseline_file: String,
    /// Delta file name.
    #[serde(default = "default_delta_file")]
    pub delta_file: String,
    /// Journal file name.
    #[serde(default = "default_journal_file")]
    pub journal_file: String,
    /// Append each delta to the journal.
    #[serde(default = "default_true")]
    pub journal: bool,
    /// Component type keywords that mark progression state.
    #[serde(default = "default_progression_keywords")]
    pub progression_keywords: Vec<String>,
    /// JSON property-name fragments that mark tech ids.
    #[serde(default = "default_tech_markers")]
    pub tech_property_markers: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            persist: true,
            snapshot_dir: default_snapshot_dir(),
            baseline_file: default_baseline_file(),
            delta_file: default_delta_file(),
            journal_file: default_journal_file(),
            journal: true,
            progression_keywords: default_progression_keywords(),
            tech_property_markers: default_tech_markers(),
        }
    }
}

impl SandboxConfig {
    /// Full baseline path.
    #[must_use]
    pub fn baseline_path(&self) -> PathBuf {
        self.snapshot_dir.join(&self.baseline_file)
    }

    /// Full delta path.
    #[must_use]
    pub fn delta_path(&self) -> PathBuf {
        self.snapshot_dir.join(&self.delta_file)
    }

    /// Full journal path.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.snapshot_dir.join(&self.journal_file)
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_snapshot_dir() -> PathBuf { PathBuf::from("sandbox") }
fn default_baseline_file() -> String { "sandbox_progression_baseline.csv.gz".to_string() }
fn default_delta_file() -> String { "sandbox_progression_delta.csv.gz".to_string() }
fn default_journal_file() -> String { "sandbox_progression_journal.jsonl".to_string() }
fn default_progression_keywords() -> Vec<String> {
    crate::sandbox::DEFAULT_PROGRESSION_KEYWORDS.iter().map(ToString::to_string).collect()
}
fn default_tech_markers() -> Vec<String> {
    crate::sandbox::DEFAULT_TECH_MARKERS.iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = ZoneKitConfig::from_toml("").expect("parse");
        assert!(config.general.enabled);
        assert!(!config.lifecycle.stop_on_failure);
        assert!(config.lifecycle.implicit_exit_on_reenter);
        assert_eq!(config.sandbox.baseline_file, "sandbox_progression_baseline.csv.gz");
        assert_eq!(config.sandbox.tech_property_markers, vec!["guid", "prefab", "tech", "unlock"]);
    }

    #[test]
    fn zones_flows_and_aliases_parse() {
        let config = ZoneKitConfig::from_toml(
            r#"
            [lifecycle]
            stop_on_failure = true

            [lifecycle.zones.Arena-1]
            enter_flow = "grant-arena-kit"
            exit_flow = "strip-{ZoneId}"
            sandbox = true

            [lifecycle.wildcard]
            enter_flow = "enter-{ZoneId}"

            [flows.definitions.grant-arena-kit]
            steps = [
                { action = "apply_buff", args = ["@player", 1234] },
                { action = "message_all", args = ["welcome"], continue_on_failure = true },
            ]

            [flows.aliases]
            heal = "ApplyBuff"
            "#,
        )
        .expect("parse");

        let arena = config.lifecycle.settings_for(" arena-1 ");
        assert_eq!(arena.enter_flow, "grant-arena-kit");
        assert_eq!(arena.exit_flow, "strip-arena-1");
        assert!(arena.sandbox);

        let other = config.lifecycle.settings_for("pit");
        assert_eq!(other.enter_flow, "enter-pit");
        assert!(!other.sandbox);

        let defs = config.flows.to_definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].steps().len(), 2);
        assert!(defs[0].steps()[1].continue_on_failure);
        assert_eq!(config.flows.aliases.get("heal").map(String::as_str), Some("ApplyBuff"));
    }

    #[test]
    fn unknown_zone_without_wildcard_is_empty() {
        let config = LifecycleConfig::default();
        assert_eq!(config.settings_for("nowhere"), ZoneSettings::default());
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = ZoneKitConfig::from_toml("[lifecycle\n").expect_err("invalid");
        assert!(matches!(err, crate::ZoneError::Config(_)));
    }
}
