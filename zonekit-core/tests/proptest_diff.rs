//! Property-based tests for snapshot diffing.
//!
//! Diffing must be pure: the same two collections always give the same
//! rows, a collection diffed against itself gives nothing, and opened tech
//! is always a subset of what the post capture holds.

use std::collections::BTreeSet;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use zonekit_core::sandbox::{
    BaselineRow, BaselineRowType, DEFAULT_TECH_MARKERS, DeltaKind, ZoneEntityEntry, collect_tech_ids,
    compute_component_delta, compute_entity_delta, extract_opened_tech,
};
use zonekit_core::{EntityHandle, Position};

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

fn row(key: String, existed: bool, payload: String) -> BaselineRow {
    BaselineRow {
        version: 1,
        snapshot_id: "prop".into(),
        player_key: "p".into(),
        character_name: "P".into(),
        platform_id: 1,
        zone_id: "z".into(),
        captured_utc: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("valid"),
        row_type: BaselineRowType::Component,
        component_type: key.clone(),
        key,
        existed,
        payload,
        payload_hash: String::new(),
    }
}

fn arb_rows() -> impl Strategy<Value = Vec<BaselineRow>> {
    prop::collection::vec(
        ("[A-E][a-z]{0,3}", any::<bool>(), prop::collection::vec(0i64..50, 0..5)),
        0..12,
    )
    .prop_map(|items| {
        items
            .into_iter()
            .map(|(key, existed, tech)| {
                let payload = serde_json::json!({ "unlocked_tech": tech }).to_string();
                row(key, existed, payload)
            })
            .collect()
    })
}

fn arb_entities() -> impl Strategy<Value = Vec<ZoneEntityEntry>> {
    prop::collection::vec((0u32..30, 0i64..4), 0..15).prop_map(|items| {
        items
            .into_iter()
            .map(|(index, prefab)| ZoneEntityEntry {
                entity: EntityHandle::new(index, 1),
                prefab_guid: prefab,
                prefab_name: format!("P{prefab}"),
                position: Position::default(),
            })
            .collect()
    })
}

// ---------------------------------------------------------------------------
// Property: a collection diffed against itself is empty
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn component_delta_of_self_is_empty(rows in arb_rows()) {
        prop_assert!(compute_component_delta(&rows, &rows).is_empty());
    }

    #[test]
    fn entity_delta_of_self_is_empty(entities in arb_entities()) {
        prop_assert!(compute_entity_delta(&entities, &entities).is_empty());
    }
}

// ---------------------------------------------------------------------------
// Property: diffing is deterministic and sorted by key
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn component_delta_is_deterministic(pre in arb_rows(), post in arb_rows()) {
        let first = compute_component_delta(&pre, &post);
        let second = compute_component_delta(&pre, &post);
        prop_assert_eq!(&first, &second);

        let keys: Vec<&str> = first.iter().map(|r| r.key.as_str()).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        sorted.dedup();
        prop_assert_eq!(keys, sorted);
    }

    #[test]
    fn entity_delta_is_deterministic(pre in arb_entities(), post in arb_entities()) {
        prop_assert_eq!(compute_entity_delta(&pre, &post), compute_entity_delta(&pre, &post));
    }
}

// ---------------------------------------------------------------------------
// Property: opened tech = post tech minus pre tech
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn opened_tech_is_set_difference(pre in arb_rows(), post in arb_rows()) {
        let before = collect_tech_ids(&pre, DEFAULT_TECH_MARKERS);
        let after = collect_tech_ids(&post, DEFAULT_TECH_MARKERS);
        let opened: BTreeSet<i64> = extract_opened_tech(&pre, &post)
            .iter()
            .map(|r| {
                assert_eq!(r.row_type, DeltaKind::TechOpened);
                r.tech_guid.expect("tech rows carry a guid")
            })
            .collect();
        let expected: BTreeSet<i64> = after.difference(&before).copied().collect();
        prop_assert_eq!(opened, expected);
    }

    #[test]
    fn created_and_removed_partition_the_symmetric_difference(pre in arb_entities(), post in arb_entities()) {
        let delta = compute_entity_delta(&pre, &post);
        let pre_ids: BTreeSet<EntityHandle> = pre.iter().map(|e| e.entity).collect();
        let post_ids: BTreeSet<EntityHandle> = post.iter().map(|e| e.entity).collect();

        let created: BTreeSet<EntityHandle> = delta
            .iter()
            .filter(|r| r.row_type == DeltaKind::EntityCreated)
            .filter_map(zonekit_core::sandbox::DeltaRow::entity)
            .collect();
        let removed: BTreeSet<EntityHandle> = delta
            .iter()
            .filter(|r| r.row_type == DeltaKind::EntityRemoved)
            .filter_map(zonekit_core::sandbox::DeltaRow::entity)
            .collect();
        prop_assert_eq!(created, post_ids.difference(&pre_ids).copied().collect::<BTreeSet<_>>());
        prop_assert_eq!(removed, pre_ids.difference(&post_ids).copied().collect::<BTreeSet<_>>());
    }
}
