//! Snapshot diffing.
//!
//! Pure functions over borrowed row collections. Output is sorted by key,
//! so the same inputs always produce the same rows in the same order.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::warn;

use super::snapshot::{BaselineRow, DeltaKind, DeltaRow, ZoneEntityEntry};
use crate::types::EntityHandle;

/// Property-name fragments that mark a JSON number as a tech id.
pub const DEFAULT_TECH_MARKERS: &[&str] = &["guid", "prefab", "tech", "unlock"];

fn component_rows(rows: &[BaselineRow]) -> BTreeMap<&str, &BaselineRow> {
    rows.iter()
        .filter(|r| r.is_component() && !r.key.trim().is_empty())
        .map(|r| (r.key.as_str(), r))
        .collect()
}

fn warn_on_mixed_snapshots(pre: &[BaselineRow], post: &[BaselineRow]) {
    let ids: BTreeSet<&str> = pre
        .iter()
        .chain(post.iter())
        .map(|r| r.snapshot_id.as_str())
        .collect();
    if ids.len() > 1 {
        warn!(snapshot_ids = ?ids, "Diffing rows from different snapshots");
    }
}

/// Component-level set difference between two baseline collections.
///
/// Keys only present (or only `existed`) in `post` become
/// `component_added`, the reverse `component_removed`, and keys whose
/// payload differs `component_changed`. Zone-entity rows are ignored.
#[must_use]
pub fn compute_component_delta(pre: &[BaselineRow], post: &[BaselineRow]) -> Vec<DeltaRow> {
    warn_on_mixed_snapshots(pre, post);
    let pre_map = component_rows(pre);
    let post_map = component_rows(post);
    let keys: BTreeSet<&str> = pre_map.keys().chain(post_map.keys()).copied().collect();

    let mut out = Vec::new();
    for key in keys {
        let before = pre_map.get(key).filter(|r| r.existed);
        let after = post_map.get(key).filter(|r| r.existed);
        let kind = match (before, after) {
            (None, None) => continue,
            (None, Some(_)) => DeltaKind::ComponentAdded,
            (Some(_), None) => DeltaKind::ComponentRemoved,
            (Some(b), Some(a)) if b.payload == a.payload => continue,
            (Some(_), Some(_)) => DeltaKind::ComponentChanged,
        };
        out.push(DeltaRow::new(kind, key).with_values(
            before.map_or("", |r| r.payload.as_str()),
            after.map_or("", |r| r.payload.as_str()),
        ));
    }
    out
}

/// Tech ids present in `rows`' component payloads, using `markers`.
#[must_use]
pub fn collect_tech_ids(rows: &[BaselineRow], markers: &[&str]) -> BTreeSet<i64> {
    let mut ids = BTreeSet::new();
    for row in rows.iter().filter(|r| r.is_component() && r.existed) {
        if let Ok(value) = serde_json::from_str::<Value>(&row.payload) {
            collect_numbers(&value, markers, false, &mut ids);
        }
    }
    ids
}

fn collect_numbers(value: &Value, markers: &[&str], marked: bool, out: &mut BTreeSet<i64>) {
    match value {
        Value::Number(n) if marked => {
            if let Some(id) = n.as_i64() {
                out.insert(id);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_numbers(item, markers, marked, out);
            }
        }
        Value::Object(fields) => {
            for (name, field) in fields {
                let lower = name.to_lowercase();
                let is_marked = markers.iter().any(|m| lower.contains(m));
                collect_numbers(field, markers, is_marked, out);
            }
        }
        _ => {}
    }
}

/// Tech unlocks present in `post` but not in `pre`, as `tech_opened` rows.
#[must_use]
pub fn extract_opened_tech(pre: &[BaselineRow], post: &[BaselineRow]) -> Vec<DeltaRow> {
    extract_opened_tech_with(pre, post, DEFAULT_TECH_MARKERS)
}

/// [`extract_opened_tech`] with explicit property markers.
#[must_use]
pub fn extract_opened_tech_with(pre: &[BaselineRow], post: &[BaselineRow], markers: &[&str]) -> Vec<DeltaRow> {
    let before = collect_tech_ids(pre, markers);
    let after = collect_tech_ids(post, markers);
    after
        .difference(&before)
        .map(|id| {
            let name = format!("GUID:{id}");
            let mut row = DeltaRow::new(DeltaKind::TechOpened, name.clone()).with_values("", id.to_string());
            row.tech_guid = Some(*id);
            row.tech_name = name;
            row
        })
        .collect()
}

/// Entity-level set difference between two zone captures.
#[must_use]
pub fn compute_entity_delta(pre: &[ZoneEntityEntry], post: &[ZoneEntityEntry]) -> Vec<DeltaRow> {
    let pre_map: BTreeMap<EntityHandle, &ZoneEntityEntry> = pre.iter().map(|e| (e.entity, e)).collect();
    let post_map: BTreeMap<EntityHandle, &ZoneEntityEntry> = post.iter().map(|e| (e.entity, e)).collect();
    let keys: BTreeSet<EntityHandle> = pre_map.keys().chain(post_map.keys()).copied().collect();

    let mut out = Vec::new();
    for key in keys {
        match (pre_map.get(&key), post_map.get(&key)) {
            (None, Some(after)) => out.push(
                DeltaRow::new(DeltaKind::EntityCreated, key.key())
                    .with_values("", after.prefab_guid.to_string())
                    .with_entity(after),
            ),
            (Some(before), None) => out.push(
                DeltaRow::new(DeltaKind::EntityRemoved, key.key())
                    .with_values(before.prefab_guid.to_string(), "")
                    .with_entity(before),
            ),
            (Some(before), Some(after)) if before.prefab_guid != after.prefab_guid => out.push(
                DeltaRow::new(DeltaKind::EntityPrefabChanged, key.key())
                    .with_values(before.prefab_guid.to_string(), after.prefab_guid.to_string())
                    .with_entity(after),
            ),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::snapshot::{BaselineRowType, ROW_VERSION};
    use crate::types::Position;
    use chrono::Utc;

    fn row(key: &str, payload: &str) -> BaselineRow {
        BaselineRow {
            version: ROW_VERSION,
            snapshot_id: "s1".into(),
            player_key: "p1".into(),
            character_name: "P1".into(),
            platform_id: 1,
            zone_id: "arena-1".into(),
            captured_utc: Utc::now(),
            row_type: BaselineRowType::Component,
            component_type: key.into(),
            key: key.into(),
            existed: true,
            payload: payload.into(),
            payload_hash: String::new(),
        }
    }

    fn entity(index: u32, prefab: i64) -> ZoneEntityEntry {
        ZoneEntityEntry {
            entity: EntityHandle::new(index, 1),
            prefab_guid: prefab,
            prefab_name: format!("Prefab{prefab}"),
            position: Position::default(),
        }
    }

    #[test]
    fn identical_inputs_give_empty_delta() {
        let rows = vec![row("Tech", r#"{"unlocked_tech":[1,2]}"#), row("Recipe", "{}")];
        assert!(compute_component_delta(&rows, &rows).is_empty());
    }

    #[test]
    fn classifies_added_removed_changed() {
        let pre = vec![row("A", "1"), row("B", "2"), row("C", "3")];
        let mut gone = row("C", "3");
        gone.existed = false;
        let post = vec![row("B", "20"), gone, row("D", "4")];
        let delta = compute_component_delta(&pre, &post);
        let kinds: Vec<(&str, DeltaKind)> = delta.iter().map(|r| (r.key.as_str(), r.row_type)).collect();
        assert_eq!(
            kinds,
            vec![
                ("A", DeltaKind::ComponentRemoved),
                ("B", DeltaKind::ComponentChanged),
                ("C", DeltaKind::ComponentRemoved),
                ("D", DeltaKind::ComponentAdded),
            ]
        );
        assert_eq!(delta[1].before, "2");
        assert_eq!(delta[1].after, "20");
    }

    #[test]
    fn opened_tech_is_post_minus_pre() {
        let pre = vec![row("Unlocks", r#"{"unlocked_tech":[101,102]}"#)];
        let post = vec![row("Unlocks", r#"{"unlocked_tech":[101,102,103]}"#)];
        let opened = extract_opened_tech(&pre, &post);
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].tech_guid, Some(103));
        assert_eq!(opened[0].tech_name, "GUID:103");
        assert_eq!(opened[0].row_type, DeltaKind::TechOpened);
    }

    #[test]
    fn tech_ids_require_marked_property() {
        let rows = vec![row(
            "Progress",
            r#"{"level": 7, "nested": {"PrefabGuid": 55, "items": [{"TechId": 66}]}, "count": [1, 2]}"#,
        )];
        let ids: Vec<i64> = collect_tech_ids(&rows, DEFAULT_TECH_MARKERS).into_iter().collect();
        assert_eq!(ids, vec![55, 66]);
    }

    #[test]
    fn entity_delta_detects_all_kinds() {
        let pre = vec![entity(1, 10), entity(2, 20)];
        let post = vec![entity(2, 21), entity(3, 30)];
        let delta = compute_entity_delta(&pre, &post);
        let kinds: Vec<DeltaKind> = delta.iter().map(|r| r.row_type).collect();
        assert_eq!(
            kinds,
            vec![DeltaKind::EntityRemoved, DeltaKind::EntityPrefabChanged, DeltaKind::EntityCreated]
        );
        assert_eq!(delta[2].entity(), Some(EntityHandle::new(3, 1)));
        assert_eq!(delta[2].prefab_guid, Some(30));
    }

    #[test]
    fn entity_rows_are_not_component_rows() {
        let mut ent = row("5:1", "{}");
        ent.row_type = BaselineRowType::ZoneEntity;
        assert!(compute_component_delta(&[], &[ent]).is_empty());
    }
}
