//! Core type definitions shared across the zone engine.
//!
//! All types are plain values: cheap to copy or clone, serializable, and
//! free of any reference back into the host world.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Opaque handle to a host entity (player character, spawned structure, ...).
///
/// Mirrors the usual ECS `(index, version)` pair: a recycled index with a
/// bumped version is a different entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityHandle {
    /// Slot index inside the host entity table.
    pub index: u32,
    /// Generation counter for the slot.
    pub version: u32,
}

impl EntityHandle {
    /// Create a handle from its raw parts.
    #[must_use]
    pub const fn new(index: u32, version: u32) -> Self {
        Self { index, version }
    }

    /// Stable string key used by entity deltas (`"index:version"`).
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.index, self.version)
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.version)
    }
}

/// Platform account id (e.g. a Steam id) of a connected user.
pub type PlatformId = u64;

/// Who a character is, as far as snapshot bookkeeping is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterIdentity {
    /// Platform account the character belongs to.
    pub platform_id: PlatformId,
    /// Display name of the character.
    pub character_name: String,
}

impl CharacterIdentity {
    /// Create an identity.
    #[must_use]
    pub fn new(platform_id: PlatformId, character_name: impl Into<String>) -> Self {
        Self {
            platform_id,
            character_name: character_name.into(),
        }
    }
}

/// Unique identifier for one sandbox session (enter to exit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Spatial
// ---------------------------------------------------------------------------

/// A 3D position in the game world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
}

impl Position {
    /// Create a position.
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another position.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Distance on the ground plane, ignoring height.
    #[must_use]
    pub fn planar_distance(&self, other: &Self) -> f32 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        (dx * dx + dz * dz).sqrt()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Which side of a zone transition is being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleStage {
    /// Player is entering a zone.
    Enter,
    /// Player is leaving a zone.
    Exit,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enter => f.write_str("enter"),
            Self::Exit => f.write_str("exit"),
        }
    }
}

// ---------------------------------------------------------------------------
// Key normalization
// ---------------------------------------------------------------------------

/// Normalize a lookup key: trimmed and lowercased.
///
/// Used by every case-insensitive registry in the crate (flow ids, action
/// aliases, entity map aliases).
#[must_use]
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}
