//! In-memory host used by unit tests.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde_json::json;

use crate::entity_map::EntityMap;
use crate::error::{Result, ZoneError};
use crate::flow::{ActionDispatcher, ResolvedArg};
use crate::host::{PositionLookup, ProgressionHost, ZoneWorld};
use crate::sandbox::{ComponentState, ZoneEntityEntry};
use crate::types::{CharacterIdentity, EntityHandle, Position};

pub(crate) const TECH_COMPONENT: &str = "Game.Progression.TechUnlocks";

struct Character {
    identity: CharacterIdentity,
    components: BTreeMap<String, String>,
    position: Position,
}

struct Spawned {
    prefab: i64,
    zone: String,
    position: Position,
}

#[derive(Default)]
struct State {
    characters: HashMap<EntityHandle, Character>,
    entities: BTreeMap<EntityHandle, Spawned>,
    next_index: u32,
    actions: Vec<String>,
}

#[derive(Default)]
pub(crate) struct FakeHost {
    state: Mutex<State>,
    failing_actions: Vec<String>,
}

fn tech_payload(tech: &[i64]) -> String {
    json!({ "unlocked_tech": tech }).to_string()
}

impl FakeHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing(actions: &[&str]) -> Self {
        Self {
            failing_actions: actions.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    fn next_handle(state: &mut State) -> EntityHandle {
        state.next_index += 1;
        EntityHandle::new(state.next_index, 1)
    }

    pub(crate) fn add_player(&self, platform_id: u64, name: &str, tech: &[i64]) -> EntityHandle {
        let mut state = self.state.lock();
        let handle = Self::next_handle(&mut state);
        let mut components = BTreeMap::new();
        components.insert(TECH_COMPONENT.to_string(), tech_payload(tech));
        components.insert("Game.Combat.Health".to_string(), "{\"value\":100}".to_string());
        state.characters.insert(
            handle,
            Character {
                identity: CharacterIdentity::new(platform_id, name),
                components,
                position: Position::default(),
            },
        );
        handle
    }

    pub(crate) fn grant_tech(&self, player: EntityHandle, id: i64) {
        let mut tech = self.tech_of(player);
        tech.push(id);
        tech.sort_unstable();
        if let Some(c) = self.state.lock().characters.get_mut(&player) {
            c.components.insert(TECH_COMPONENT.to_string(), tech_payload(&tech));
        }
    }

    pub(crate) fn tech_of(&self, player: EntityHandle) -> Vec<i64> {
        let state = self.state.lock();
        let Some(payload) = state.characters.get(&player).and_then(|c| c.components.get(TECH_COMPONENT)) else {
            return Vec::new();
        };
        let value: serde_json::Value = serde_json::from_str(payload).expect("tech payload");
        let mut tech: Vec<i64> = value["unlocked_tech"]
            .as_array()
            .map(|a| a.iter().filter_map(serde_json::Value::as_i64).collect())
            .unwrap_or_default();
        tech.sort_unstable();
        tech
    }

    pub(crate) fn set_component(&self, player: EntityHandle, type_key: &str, payload: &str) {
        if let Some(c) = self.state.lock().characters.get_mut(&player) {
            c.components.insert(type_key.to_string(), payload.to_string());
        }
    }

    pub(crate) fn remove(&self, player: EntityHandle, type_key: &str) {
        if let Some(c) = self.state.lock().characters.get_mut(&player) {
            c.components.remove(type_key);
        }
    }

    pub(crate) fn has_component(&self, player: EntityHandle, type_key: &str) -> bool {
        self.state
            .lock()
            .characters
            .get(&player)
            .is_some_and(|c| c.components.contains_key(type_key))
    }

    pub(crate) fn relocate(&self, entity: EntityHandle, zone: &str) {
        if let Some(e) = self.state.lock().entities.get_mut(&entity) {
            e.zone = zone.to_string();
        }
    }

    pub(crate) fn move_to(&self, player: EntityHandle, position: Position) {
        if let Some(c) = self.state.lock().characters.get_mut(&player) {
            c.position = position;
        }
    }

    pub(crate) fn spawn(&self, prefab: i64, zone: &str, position: Position) -> EntityHandle {
        let mut state = self.state.lock();
        let handle = Self::next_handle(&mut state);
        state.entities.insert(
            handle,
            Spawned {
                prefab,
                zone: zone.to_string(),
                position,
            },
        );
        handle
    }

    pub(crate) fn exists(&self, entity: EntityHandle) -> bool {
        self.state.lock().entities.contains_key(&entity)
    }

    pub(crate) fn actions(&self) -> Vec<String> {
        self.state.lock().actions.clone()
    }
}

impl ActionDispatcher for FakeHost {
    fn dispatch(&self, action: &str, _args: &[ResolvedArg], _map: &mut EntityMap) -> Result<()> {
        self.state.lock().actions.push(action.to_string());
        if self.failing_actions.iter().any(|a| a == action) {
            return Err(ZoneError::ActionFailed {
                action: action.to_string(),
                reason: "rejected by host".to_string(),
            });
        }
        Ok(())
    }
}

impl PositionLookup for FakeHost {
    fn position_of(&self, entity: EntityHandle) -> Option<Position> {
        self.state.lock().characters.get(&entity).map(|c| c.position)
    }
}

impl ProgressionHost for FakeHost {
    fn identity(&self, character: EntityHandle) -> Option<CharacterIdentity> {
        self.state.lock().characters.get(&character).map(|c| c.identity.clone())
    }

    fn read_components(&self, character: EntityHandle) -> Result<Vec<ComponentState>> {
        let state = self.state.lock();
        let c = state
            .characters
            .get(&character)
            .ok_or_else(|| ZoneError::Host(format!("unknown character {character}")))?;
        Ok(c.components
            .iter()
            .map(|(k, v)| ComponentState::present(k.clone(), v.clone()))
            .collect())
    }

    fn write_component(&self, character: EntityHandle, type_key: &str, payload: &str) -> Result<()> {
        let mut state = self.state.lock();
        let c = state
            .characters
            .get_mut(&character)
            .ok_or_else(|| ZoneError::Host(format!("unknown character {character}")))?;
        c.components.insert(type_key.to_string(), payload.to_string());
        Ok(())
    }

    fn remove_component(&self, character: EntityHandle, type_key: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(c) = state.characters.get_mut(&character) {
            c.components.remove(type_key);
        }
        Ok(())
    }
}

impl ZoneWorld for FakeHost {
    fn entities_in_zone(&self, zone_id: &str) -> Result<Vec<ZoneEntityEntry>> {
        Ok(self
            .state
            .lock()
            .entities
            .iter()
            .filter(|(_, e)| e.zone == zone_id)
            .map(|(handle, e)| ZoneEntityEntry {
                entity: *handle,
                prefab_guid: e.prefab,
                prefab_name: format!("Prefab{}", e.prefab),
                position: e.position,
            })
            .collect())
    }

    fn entity_exists(&self, entity: EntityHandle) -> bool {
        self.exists(entity)
    }

    fn prefab_of(&self, entity: EntityHandle) -> Option<i64> {
        self.state.lock().entities.get(&entity).map(|e| e.prefab)
    }

    fn is_in_zone(&self, entity: EntityHandle, zone_id: &str) -> bool {
        self.state.lock().entities.get(&entity).is_some_and(|e| e.zone == zone_id)
    }

    fn destroy_entity(&self, entity: EntityHandle) -> Result<()> {
        self.state
            .lock()
            .entities
            .remove(&entity)
            .map(|_| ())
            .ok_or_else(|| ZoneError::Host(format!("no entity {entity}")))
    }
}
