//! Event payloads published by the engine.
//!
//! Plain immutable records; subscribers get a shared reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EntityHandle, LifecycleStage, Position};

/// A player's zone membership switched to `zone_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerEnteredZone {
    /// Player character.
    pub player: EntityHandle,
    /// Zone entered.
    pub zone_id: String,
    /// Where the player stood when the transition fired.
    pub position: Position,
    /// Transition time.
    pub at: DateTime<Utc>,
}

/// A player left `zone_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerExitedZone {
    /// Player character.
    pub player: EntityHandle,
    /// Zone left.
    pub zone_id: String,
    /// Whether the exit was forced by entering another zone.
    pub implicit: bool,
    /// Transition time.
    pub at: DateTime<Utc>,
}

/// A zone's enter or exit flow ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowExecuted {
    /// Player the flow ran for.
    pub player: EntityHandle,
    /// Zone whose flow ran.
    pub zone_id: String,
    /// Flow id as configured.
    pub flow_id: String,
    /// Enter or exit.
    pub stage: LifecycleStage,
    /// Overall outcome.
    pub success: bool,
    /// Failure message, if any.
    pub message: String,
}

/// A progression snapshot was taken for a player entering a sandboxed zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotCaptured {
    /// Player character.
    pub player: EntityHandle,
    /// Zone being entered.
    pub zone_id: String,
    /// Snapshot correlation id.
    pub snapshot_id: String,
    /// Baseline rows captured.
    pub component_rows: usize,
    /// Zone entities recorded alongside.
    pub zone_entities: usize,
}

/// A player's progression was rolled back on leaving a sandboxed zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRestored {
    /// Player character.
    pub player: EntityHandle,
    /// Zone being left.
    pub zone_id: String,
    /// Snapshot that was re-applied.
    pub snapshot_id: String,
    /// Whether the host accepted every component write.
    pub restored: bool,
    /// Tech ids learned inside the zone (and rolled back).
    pub opened_tech: Vec<i64>,
    /// Whether post-restore validation came back clean.
    pub validated: bool,
}
