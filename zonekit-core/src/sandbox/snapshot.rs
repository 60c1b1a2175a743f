//! Snapshot value types: in-memory snapshots and their persisted rows.
//!
//! Row structs are flat on purpose: field order is the column order of the
//! tabular files, and that order is part of the on-disk contract.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EntityHandle, PlatformId, Position};

/// Current row format version.
pub const ROW_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// In-memory snapshots
// ---------------------------------------------------------------------------

/// One progression component as observed on a character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentState {
    /// Fully qualified component type key.
    pub type_key: String,
    /// Whether the component was present.
    pub existed: bool,
    /// JSON payload (empty when the component was absent).
    pub payload: String,
}

impl ComponentState {
    /// A present component with the given payload.
    #[must_use]
    pub fn present(type_key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            type_key: type_key.into(),
            existed: true,
            payload: payload.into(),
        }
    }

    /// Short type name: the segment after the last `.` or `::`, before any `,`.
    #[must_use]
    pub fn short_type_name(&self) -> &str {
        short_type_name(&self.type_key)
    }
}

pub(crate) fn short_type_name(type_key: &str) -> &str {
    let head = type_key.split(',').next().unwrap_or(type_key).trim();
    let after_path = head.rsplit("::").next().unwrap_or(head);
    after_path.rsplit('.').next().unwrap_or(after_path)
}

/// Everything learned/owned by a character at one moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxProgressionSnapshot {
    /// Owner account.
    pub platform_id: PlatformId,
    /// Character name at capture time.
    pub character_name: String,
    /// Capture time.
    pub captured_utc: DateTime<Utc>,
    /// Progression components keyed by type key.
    pub components: BTreeMap<String, ComponentState>,
}

/// One entity associated with a zone at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneEntityEntry {
    /// Entity identity.
    pub entity: EntityHandle,
    /// Prefab id.
    pub prefab_guid: i64,
    /// Prefab name, if the host knows it.
    pub prefab_name: String,
    /// Position at capture time.
    pub position: Position,
}

// ---------------------------------------------------------------------------
// Stamp shared by every row of one capture
// ---------------------------------------------------------------------------

/// Correlation fields written into every row of one snapshot batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStamp {
    /// Snapshot correlation id.
    pub snapshot_id: String,
    /// Store key of the player.
    pub player_key: String,
    /// Character name.
    pub character_name: String,
    /// Owner account.
    pub platform_id: PlatformId,
    /// Zone the snapshot belongs to.
    pub zone_id: String,
    /// Capture time.
    pub captured_utc: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Baseline rows
// ---------------------------------------------------------------------------

/// What a baseline row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineRowType {
    /// Marks an open session; written even when nothing else was captured.
    Session,
    /// A progression component.
    Component,
    /// An entity associated with the zone.
    ZoneEntity,
}

/// One persisted fact about a captured snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineRow {
    /// Row format version.
    pub version: u32,
    /// Snapshot correlation id.
    pub snapshot_id: String,
    /// Store key of the player.
    pub player_key: String,
    /// Character name.
    pub character_name: String,
    /// Owner account.
    pub platform_id: PlatformId,
    /// Zone id.
    pub zone_id: String,
    /// Capture time.
    pub captured_utc: DateTime<Utc>,
    /// Component or zone entity.
    pub row_type: BaselineRowType,
    /// Short component type, or prefab name for zone entities.
    pub component_type: String,
    /// Component type key, or `"index:version"` for zone entities.
    pub key: String,
    /// Whether the component existed.
    pub existed: bool,
    /// JSON payload.
    pub payload: String,
    /// Uppercase hex SHA-256 of `payload`.
    pub payload_hash: String,
}

impl BaselineRow {
    /// Whether this row records a progression component.
    #[must_use]
    pub fn is_component(&self) -> bool {
        self.row_type == BaselineRowType::Component
    }

    /// The batch stamp carried by this row.
    #[must_use]
    pub fn stamp(&self) -> SnapshotStamp {
        SnapshotStamp {
            snapshot_id: self.snapshot_id.clone(),
            player_key: self.player_key.clone(),
            character_name: self.character_name.clone(),
            platform_id: self.platform_id,
            zone_id: self.zone_id.clone(),
            captured_utc: self.captured_utc,
        }
    }
}

// ---------------------------------------------------------------------------
// Delta rows
// ---------------------------------------------------------------------------

/// Kind of change a delta row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    /// Component appeared.
    ComponentAdded,
    /// Component disappeared.
    ComponentRemoved,
    /// Component payload changed.
    ComponentChanged,
    /// A tech id unlocked that was not unlocked before.
    TechOpened,
    /// Entity appeared in the zone.
    EntityCreated,
    /// Entity vanished from the zone.
    EntityRemoved,
    /// Same entity, different prefab.
    EntityPrefabChanged,
}

impl DeltaKind {
    /// Operation column value.
    #[must_use]
    pub fn operation(self) -> &'static str {
        match self {
            Self::ComponentAdded | Self::EntityCreated => "created",
            Self::ComponentRemoved | Self::EntityRemoved => "removed",
            Self::ComponentChanged => "changed",
            Self::TechOpened => "opened",
            Self::EntityPrefabChanged => "prefab_changed",
        }
    }
}

/// One detected change between two captures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaRow {
    /// Row format version.
    pub version: u32,
    /// Snapshot correlation id.
    pub snapshot_id: String,
    /// Store key of the player.
    pub player_key: String,
    /// Character name.
    pub character_name: String,
    /// Owner account.
    pub platform_id: PlatformId,
    /// Zone id.
    pub zone_id: String,
    /// Capture time of the batch.
    pub captured_utc: DateTime<Utc>,
    /// What changed.
    pub row_type: DeltaKind,
    /// Operation label derived from `row_type`.
    pub operation: String,
    /// Component type key, tech key or entity key.
    pub key: String,
    /// Value before (JSON payload or prefab id).
    pub before: String,
    /// Value after (JSON payload or prefab id).
    pub after: String,
    /// Tech id for `tech_opened` rows.
    pub tech_guid: Option<i64>,
    /// Tech label for `tech_opened` rows.
    pub tech_name: String,
    /// Entity index for entity rows.
    pub entity_index: Option<u32>,
    /// Entity version for entity rows.
    pub entity_version: Option<u32>,
    /// Prefab id for entity rows.
    pub prefab_guid: Option<i64>,
    /// Prefab name for entity rows.
    pub prefab_name: String,
    /// Entity X.
    pub pos_x: Option<f32>,
    /// Entity Y.
    pub pos_y: Option<f32>,
    /// Entity Z.
    pub pos_z: Option<f32>,
}

impl DeltaRow {
    /// An unstamped row of `kind` for `key`.
    #[must_use]
    pub fn new(kind: DeltaKind, key: impl Into<String>) -> Self {
        Self {
            version: ROW_VERSION,
            snapshot_id: String::new(),
            player_key: String::new(),
            character_name: String::new(),
            platform_id: 0,
            zone_id: String::new(),
            captured_utc: DateTime::<Utc>::default(),
            row_type: kind,
            operation: kind.operation().to_string(),
            key: key.into(),
            before: String::new(),
            after: String::new(),
            tech_guid: None,
            tech_name: String::new(),
            entity_index: None,
            entity_version: None,
            prefab_guid: None,
            prefab_name: String::new(),
            pos_x: None,
            pos_y: None,
            pos_z: None,
        }
    }

    /// Builder: set before/after values.
    #[must_use]
    pub fn with_values(mut self, before: impl Into<String>, after: impl Into<String>) -> Self {
        self.before = before.into();
        self.after = after.into();
        self
    }

    /// Builder: copy entity columns from a zone entry.
    #[must_use]
    pub fn with_entity(mut self, entry: &ZoneEntityEntry) -> Self {
        self.entity_index = Some(entry.entity.index);
        self.entity_version = Some(entry.entity.version);
        self.prefab_guid = Some(entry.prefab_guid);
        self.prefab_name = entry.prefab_name.clone();
        self.pos_x = Some(entry.position.x);
        self.pos_y = Some(entry.position.y);
        self.pos_z = Some(entry.position.z);
        self
    }

    /// Apply a batch stamp.
    pub fn stamp(&mut self, stamp: &SnapshotStamp) {
        self.version = ROW_VERSION;
        self.snapshot_id.clone_from(&stamp.snapshot_id);
        self.player_key.clone_from(&stamp.player_key);
        self.character_name.clone_from(&stamp.character_name);
        self.platform_id = stamp.platform_id;
        self.zone_id.clone_from(&stamp.zone_id);
        self.captured_utc = stamp.captured_utc;
    }

    /// Entity handle for entity rows.
    #[must_use]
    pub fn entity(&self) -> Option<EntityHandle> {
        Some(EntityHandle::new(self.entity_index?, self.entity_version?))
    }
}

/// Apply `stamp` to every row of a batch.
pub fn stamp_delta_rows(rows: &mut [DeltaRow], stamp: &SnapshotStamp) {
    for row in rows {
        row.stamp(stamp);
    }
}
