//! zonekit Benchmark Suite
//!
//! Hot paths run from the host tick:
//!   flow_execute_5_steps .............. one enter flow against the sim world
//!   component_delta_200_rows .......... diff of two baselines
//!   opened_tech_200_rows .............. tech extraction over the same rows
//!   entity_delta_500 .................. zone entity diff
//!   transition_enter_exit ............. full enter + exit, no sandbox
//!   transition_sandboxed .............. full enter + exit with rollback

use std::sync::Arc;

use chrono::Utc;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use zonekit_core::entity_map::EntityMap;
use zonekit_core::flow::{FlowDefinition, FlowExecutor, FlowStep, FlowStore};
use zonekit_core::metrics::ZoneCounters;
use zonekit_core::sandbox::{
    BaselineRow, BaselineRowType, ZoneEntityEntry, compute_component_delta, compute_entity_delta,
    extract_opened_tech,
};
use zonekit_core::{EntityHandle, Position};
use zonekit_host::{CircleZone, HostConfig, SimServer, SimWorld, WorldConfig};

fn random_rows(rng: &mut StdRng, count: usize) -> Vec<BaselineRow> {
    (0..count)
        .map(|i| {
            let tech: Vec<i64> = (0..8).map(|_| rng.gen_range(0..5_000)).collect();
            let payload = serde_json::json!({ "unlocked_tech": tech, "level": i }).to_string();
            BaselineRow {
                version: 1,
                snapshot_id: "bench".into(),
                player_key: "bench".into(),
                character_name: "Bench".into(),
                platform_id: 1,
                zone_id: "arena-1".into(),
                captured_utc: Utc::now(),
                row_type: BaselineRowType::Component,
                component_type: format!("Unlock{i}"),
                key: format!("Game.Progression.Unlock{i}"),
                existed: true,
                payload,
                payload_hash: String::new(),
            }
        })
        .collect()
}

fn random_entities(rng: &mut StdRng, count: u32) -> Vec<ZoneEntityEntry> {
    (0..count)
        .map(|i| ZoneEntityEntry {
            entity: EntityHandle::new(i, 1),
            prefab_guid: rng.gen_range(0..16),
            prefab_name: "Bench".into(),
            position: Position::default(),
        })
        .collect()
}

fn bench_flow_execution(c: &mut Criterion) {
    let world = Arc::new(SimWorld::new(Vec::new()));
    let player = world.spawn_player(1, "Bench", Position::default());
    let store = Arc::new(FlowStore::new());
    store.register_flow(
        FlowDefinition::new(
            "kit",
            vec![
                FlowStep::new("apply_buff", vec!["@player".into(), 1_i64.into()]),
                FlowStep::new("apply_buff", vec!["@player".into(), 2_i64.into()]),
                FlowStep::new("set_position", vec!["spot".into(), 1_i64.into(), 2_i64.into(), 3_i64.into()]),
                FlowStep::new("teleport", vec!["@player".into(), "@spot".into()]),
                FlowStep::new("clean_buff", vec!["@player".into()]),
            ],
        ),
        true,
    );
    let executor = FlowExecutor::new(store, world, Arc::new(ZoneCounters::new()));

    c.bench_function("flow_execute_5_steps", |b| {
        b.iter(|| {
            let mut map = EntityMap::new();
            map.set_entity("player", player);
            black_box(executor.execute_by_id(black_box("kit"), &mut map, false));
        });
    });
}

fn bench_diff(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let pre = random_rows(&mut rng, 200);
    let post = random_rows(&mut rng, 200);
    c.bench_function("component_delta_200_rows", |b| {
        b.iter(|| black_box(compute_component_delta(black_box(&pre), black_box(&post))));
    });
    c.bench_function("opened_tech_200_rows", |b| {
        b.iter(|| black_box(extract_opened_tech(black_box(&pre), black_box(&post))));
    });

    let before = random_entities(&mut rng, 500);
    let after = random_entities(&mut rng, 500);
    c.bench_function("entity_delta_500", |b| {
        b.iter(|| black_box(compute_entity_delta(black_box(&before), black_box(&after))));
    });
}

fn server(sandbox: bool) -> SimServer {
    let mut config = HostConfig {
        host: WorldConfig {
            position_change_threshold: 0.0,
            zones: vec![CircleZone::new("arena-1", Position::default(), 10.0)],
        },
        ..HostConfig::default()
    };
    config.engine.sandbox.persist = false;
    config.engine.sandbox.journal = false;
    config.engine.lifecycle.zones.insert(
        "arena-1".into(),
        zonekit_core::config::ZoneSettings {
            sandbox,
            ..Default::default()
        },
    );
    SimServer::new(&config)
}

fn bench_transitions(c: &mut Criterion) {
    for (name, sandbox) in [("transition_enter_exit", false), ("transition_sandboxed", true)] {
        let server = server(sandbox);
        let player = server.world().spawn_player(1, "Bench", Position::default());
        c.bench_function(name, |b| {
            b.iter(|| {
                black_box(server.kit().on_enter(player, "arena-1", Position::default()));
                black_box(server.kit().on_exit(player, "arena-1"));
            });
        });
    }
}

criterion_group!(benches, bench_flow_execution, bench_diff, bench_transitions);
criterion_main!(benches);
