//! Progression and zone-entity capture.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::snapshot::{
    BaselineRow, BaselineRowType, ComponentState, ROW_VERSION, SandboxProgressionSnapshot,
    SnapshotStamp, ZoneEntityEntry,
};
use crate::error::{Result, ZoneError};
use crate::host::{ProgressionHost, ZoneWorld};
use crate::metrics::ZoneCounters;
use crate::types::{EntityHandle, PlatformId};

/// Component type keywords that mark a component as progression state.
pub const DEFAULT_PROGRESSION_KEYWORDS: &[&str] = &[
    "Research",
    "VBlood",
    "Achievement",
    "Unlock",
    "Tech",
    "Recipe",
    "Progress",
];

/// Reads progression and zone entities from the host into snapshot values.
pub struct SnapshotCaptureService {
    progression: Arc<dyn ProgressionHost>,
    world: Arc<dyn ZoneWorld>,
    keywords: Vec<String>,
    counters: Arc<ZoneCounters>,
}

impl std::fmt::Debug for SnapshotCaptureService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCaptureService")
            .field("keywords", &self.keywords)
            .finish_non_exhaustive()
    }
}

impl SnapshotCaptureService {
    /// Create a capture service. An empty keyword list falls back to
    /// [`DEFAULT_PROGRESSION_KEYWORDS`].
    #[must_use]
    pub fn new(
        progression: Arc<dyn ProgressionHost>,
        world: Arc<dyn ZoneWorld>,
        keywords: &[String],
        counters: Arc<ZoneCounters>,
    ) -> Self {
        let keywords = if keywords.is_empty() {
            DEFAULT_PROGRESSION_KEYWORDS.iter().map(|k| k.to_lowercase()).collect()
        } else {
            keywords.iter().map(|k| k.to_lowercase()).collect()
        };
        Self {
            progression,
            world,
            keywords,
            counters,
        }
    }

    /// Whether a component type key counts as progression state.
    #[must_use]
    pub fn is_progression_component(&self, type_key: &str) -> bool {
        let lower = type_key.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// Read the character's progression components into a snapshot.
    ///
    /// # Errors
    /// `ZoneError::Host` if the character has no identity, or whatever the
    /// host reports while reading components.
    pub fn capture_progression_snapshot(&self, character: EntityHandle) -> Result<SandboxProgressionSnapshot> {
        let identity = self
            .progression
            .identity(character)
            .ok_or_else(|| ZoneError::Host(format!("no identity for character {character}")))?;
        let components: BTreeMap<String, ComponentState> = self
            .progression
            .read_components(character)?
            .into_iter()
            .filter(|c| self.is_progression_component(&c.type_key))
            .map(|c| (c.type_key.clone(), c))
            .collect();

        self.counters.snapshots_captured.fetch_add(1, Ordering::Relaxed);
        debug!(
            character = %character,
            components = components.len(),
            "Captured progression snapshot"
        );
        Ok(SandboxProgressionSnapshot {
            platform_id: identity.platform_id,
            character_name: identity.character_name,
            captured_utc: Utc::now(),
            components,
        })
    }

    /// Every entity currently associated with `zone_id`, sorted by handle.
    ///
    /// # Errors
    /// Whatever the host reports.
    pub fn capture_zone_entity_map(&self, zone_id: &str) -> Result<Vec<ZoneEntityEntry>> {
        let mut entries = self.world.entities_in_zone(zone_id)?;
        entries.sort_by_key(|e| e.entity);
        entries.dedup_by_key(|e| e.entity);
        debug!(zone_id = %zone_id, entities = entries.len(), "Captured zone entity map");
        Ok(entries)
    }
}

/// Derive the correlation id for one capture:
/// `{yyyyMMddHHmmssfff}_{name}_{platform_id}`.
///
/// The name is trimmed and `|` replaced with `_`; an empty name falls back
/// to the platform id.
#[must_use]
pub fn build_snapshot_id(platform_id: PlatformId, character_name: &str, captured_utc: DateTime<Utc>) -> String {
    let trimmed = character_name.trim();
    let safe_name = if trimmed.is_empty() {
        platform_id.to_string()
    } else {
        trimmed.replace('|', "_")
    };
    format!(
        "{}_{}_{}",
        captured_utc.format("%Y%m%d%H%M%S%3f"),
        safe_name,
        platform_id
    )
}

/// Uppercase hex SHA-256 of a payload.
#[must_use]
pub fn payload_hash(payload: &str) -> String {
    hex::encode_upper(Sha256::digest(payload.as_bytes()))
}

fn stamped_row(
    stamp: &SnapshotStamp,
    row_type: BaselineRowType,
    component_type: &str,
    key: String,
    existed: bool,
    payload: String,
) -> BaselineRow {
    BaselineRow {
        version: ROW_VERSION,
        snapshot_id: stamp.snapshot_id.clone(),
        player_key: stamp.player_key.clone(),
        character_name: stamp.character_name.clone(),
        platform_id: stamp.platform_id,
        zone_id: stamp.zone_id.clone(),
        captured_utc: stamp.captured_utc,
        row_type,
        component_type: component_type.to_string(),
        key,
        existed,
        payload_hash: payload_hash(&payload),
        payload,
    }
}

/// The row that keeps an open session on disk, keyed by the player key.
///
/// A session whose baseline holds no components and no zone entities is
/// persisted through this row alone.
#[must_use]
pub fn session_row(stamp: &SnapshotStamp) -> BaselineRow {
    stamped_row(stamp, BaselineRowType::Session, "session", stamp.player_key.clone(), true, String::new())
}

/// Flatten a snapshot (and optionally its zone entities) into baseline
/// rows, all carrying `stamp`.
#[must_use]
pub fn build_baseline_rows(
    snapshot: &SandboxProgressionSnapshot,
    zone_entities: &[ZoneEntityEntry],
    stamp: &SnapshotStamp,
) -> Vec<BaselineRow> {
    let row = |row_type, component_type: &str, key: String, existed, payload: String| {
        stamped_row(stamp, row_type, component_type, key, existed, payload)
    };

    let mut rows: Vec<BaselineRow> = snapshot
        .components
        .values()
        .map(|c| {
            row(
                BaselineRowType::Component,
                c.short_type_name(),
                c.type_key.clone(),
                c.existed,
                c.payload.clone(),
            )
        })
        .collect();

    rows.extend(zone_entities.iter().map(|e| {
        // ZoneEntityEntry is plain data; serializing it cannot fail.
        let payload = serde_json::to_string(e).unwrap_or_default();
        row(BaselineRowType::ZoneEntity, &e.prefab_name, e.entity.key(), true, payload)
    }));
    rows
}

/// Rebuild an in-memory snapshot from baseline rows (component rows only).
///
/// Rows without any component (a session row alone) give an empty
/// snapshot; `None` only for no rows at all.
#[must_use]
pub fn snapshot_from_baseline_rows(rows: &[BaselineRow]) -> Option<SandboxProgressionSnapshot> {
    let first = rows.first()?;
    let components = rows
        .iter()
        .filter(|r| r.is_component() && !r.key.trim().is_empty())
        .map(|r| {
            (
                r.key.clone(),
                ComponentState {
                    type_key: r.key.clone(),
                    existed: r.existed,
                    payload: r.payload.clone(),
                },
            )
        })
        .collect();
    Some(SandboxProgressionSnapshot {
        platform_id: first.platform_id,
        character_name: first.character_name.clone(),
        captured_utc: first.captured_utc,
        components,
    })
}

/// Zone entities recorded in baseline rows.
#[must_use]
pub fn zone_entities_from_baseline_rows(rows: &[BaselineRow]) -> Vec<ZoneEntityEntry> {
    rows.iter()
        .filter(|r| r.row_type == BaselineRowType::ZoneEntity)
        .filter_map(|r| serde_json::from_str(&r.payload).ok())
        .collect()
}
