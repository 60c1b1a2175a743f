//! In-memory game world implementing every engine capability.
//!
//! Players carry progression as JSON components keyed by type name, plus
//! buffs and an inbox. Non-player entities have a prefab and a position;
//! zone membership is pure geometry against the configured circles.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::json;
use tracing::debug;

use zonekit_core::entity_map::EntityMap;
use zonekit_core::flow::{ActionDispatcher, ResolvedArg};
use zonekit_core::host::{PositionLookup, ProgressionHost, ZoneWorld};
use zonekit_core::sandbox::{ComponentState, ZoneEntityEntry};
use zonekit_core::{CharacterIdentity, EntityHandle, PlatformId, Position, ZoneError};

use crate::actions::{self, HostAction};
use crate::config::{CircleZone, WorldConfig};

/// Component holding a player's unlocked tech ids.
pub const TECH_COMPONENT: &str = "Game.Progression.TechUnlocks";

/// Property inside [`TECH_COMPONENT`] listing the ids.
const TECH_PROPERTY: &str = "unlocked_tech";

// ---------------------------------------------------------------------------
// World records
// ---------------------------------------------------------------------------

/// A chat message delivered by an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Delivery time.
    pub at: DateTime<Utc>,
    /// Message text.
    pub text: String,
}

impl Message {
    fn now(text: &str) -> Self {
        Self {
            at: Utc::now(),
            text: text.to_string(),
        }
    }
}

/// A connected player character.
#[derive(Debug, Clone, PartialEq)]
pub struct SimPlayer {
    /// Owner account and character name.
    pub identity: CharacterIdentity,
    /// Current position.
    pub position: Position,
    /// Components by type key, JSON payloads.
    pub components: BTreeMap<String, String>,
    /// Active buff ids.
    pub buffs: BTreeSet<i64>,
    /// Messages addressed to this player.
    pub inbox: Vec<Message>,
}

/// A non-player entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SimEntity {
    /// Prefab id.
    pub prefab_guid: i64,
    /// Prefab name.
    pub prefab_name: String,
    /// Current position.
    pub position: Position,
}

#[derive(Debug, Default)]
struct WorldState {
    next_index: u32,
    players: BTreeMap<EntityHandle, SimPlayer>,
    entities: BTreeMap<EntityHandle, SimEntity>,
    broadcasts: Vec<Message>,
}

impl WorldState {
    fn allocate(&mut self) -> EntityHandle {
        self.next_index += 1;
        EntityHandle::new(self.next_index, 1)
    }

    fn player_mut(&mut self, player: EntityHandle) -> zonekit_core::Result<&mut SimPlayer> {
        self.players
            .get_mut(&player)
            .ok_or_else(|| ZoneError::Host(format!("no player {player}")))
    }
}

fn tech_ids(payload: &str) -> Vec<i64> {
    serde_json::from_str::<serde_json::Value>(payload)
        .ok()
        .and_then(|v| {
            v.get(TECH_PROPERTY)
                .and_then(serde_json::Value::as_array)
                .map(|ids| ids.iter().filter_map(serde_json::Value::as_i64).collect())
        })
        .unwrap_or_default()
}

fn tech_payload(ids: &BTreeSet<i64>) -> String {
    json!({ TECH_PROPERTY: ids }).to_string()
}

// ---------------------------------------------------------------------------
// SimWorld
// ---------------------------------------------------------------------------

/// The simulated world.
pub struct SimWorld {
    zones: Vec<CircleZone>,
    state: RwLock<WorldState>,
}

impl std::fmt::Debug for SimWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("SimWorld")
            .field("zones", &self.zones.len())
            .field("players", &state.players.len())
            .field("entities", &state.entities.len())
            .finish_non_exhaustive()
    }
}

impl SimWorld {
    /// Create an empty world with the given zone geometry.
    #[must_use]
    pub fn new(zones: Vec<CircleZone>) -> Self {
        Self {
            zones,
            state: RwLock::new(WorldState::default()),
        }
    }

    /// Create an empty world from host configuration.
    #[must_use]
    pub fn from_config(config: &WorldConfig) -> Self {
        Self::new(config.zones.clone())
    }

    /// Configured zones.
    #[must_use]
    pub fn zones(&self) -> &[CircleZone] {
        &self.zones
    }

    fn zone(&self, zone_id: &str) -> Option<&CircleZone> {
        self.zones.iter().find(|z| z.is(zone_id))
    }

    // -- players ------------------------------------------------------------

    /// Connect a player with no unlocked tech.
    pub fn spawn_player(&self, platform_id: PlatformId, name: &str, position: Position) -> EntityHandle {
        let mut state = self.state.write();
        let handle = state.allocate();
        let mut components = BTreeMap::new();
        components.insert(TECH_COMPONENT.to_string(), tech_payload(&BTreeSet::new()));
        state.players.insert(
            handle,
            SimPlayer {
                identity: CharacterIdentity::new(platform_id, name),
                position,
                components,
                buffs: BTreeSet::new(),
                inbox: Vec::new(),
            },
        );
        debug!(player = %handle, platform_id, name, "Player connected");
        handle
    }

    /// Disconnect a player. Returns `false` if unknown.
    pub fn despawn_player(&self, player: EntityHandle) -> bool {
        self.state.write().players.remove(&player).is_some()
    }

    /// Copy of a player's record.
    #[must_use]
    pub fn player(&self, player: EntityHandle) -> Option<SimPlayer> {
        self.state.read().players.get(&player).cloned()
    }

    /// Every connected player and where they stand, ordered by handle.
    #[must_use]
    pub fn player_positions(&self) -> Vec<(EntityHandle, Position)> {
        self.state
            .read()
            .players
            .iter()
            .map(|(handle, p)| (*handle, p.position))
            .collect()
    }

    /// Move a player.
    ///
    /// # Errors
    /// `ZoneError::Host` for an unknown player.
    pub fn move_player(&self, player: EntityHandle, position: Position) -> zonekit_core::Result<()> {
        self.state.write().player_mut(player)?.position = position;
        Ok(())
    }

    /// Sorted tech ids unlocked by a player.
    #[must_use]
    pub fn tech_of(&self, player: EntityHandle) -> Vec<i64> {
        let state = self.state.read();
        let mut ids = state
            .players
            .get(&player)
            .and_then(|p| p.components.get(TECH_COMPONENT))
            .map(|payload| tech_ids(payload))
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Unlock a tech id. Returns `false` if it was already unlocked.
    ///
    /// # Errors
    /// `ZoneError::Host` for an unknown player.
    pub fn grant_tech(&self, player: EntityHandle, tech_id: i64) -> zonekit_core::Result<bool> {
        let mut state = self.state.write();
        let record = state.player_mut(player)?;
        let mut ids: BTreeSet<i64> = record
            .components
            .get(TECH_COMPONENT)
            .map(|payload| tech_ids(payload).into_iter().collect())
            .unwrap_or_default();
        let added = ids.insert(tech_id);
        record.components.insert(TECH_COMPONENT.to_string(), tech_payload(&ids));
        Ok(added)
    }

    /// Active buffs of a player.
    #[must_use]
    pub fn buffs_of(&self, player: EntityHandle) -> Vec<i64> {
        self.state
            .read()
            .players
            .get(&player)
            .map(|p| p.buffs.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Text of every message delivered to a player.
    #[must_use]
    pub fn inbox_of(&self, player: EntityHandle) -> Vec<String> {
        self.state
            .read()
            .players
            .get(&player)
            .map(|p| p.inbox.iter().map(|m| m.text.clone()).collect())
            .unwrap_or_default()
    }

    /// Text of every server-wide broadcast.
    #[must_use]
    pub fn broadcasts(&self) -> Vec<String> {
        self.state.read().broadcasts.iter().map(|m| m.text.clone()).collect()
    }

    pub(crate) fn add_buff(&self, player: EntityHandle, buff: i64) -> zonekit_core::Result<bool> {
        Ok(self.state.write().player_mut(player)?.buffs.insert(buff))
    }

    pub(crate) fn remove_buff(&self, player: EntityHandle, buff: i64) -> zonekit_core::Result<bool> {
        Ok(self.state.write().player_mut(player)?.buffs.remove(&buff))
    }

    pub(crate) fn clear_buffs(&self, player: EntityHandle) -> zonekit_core::Result<usize> {
        let mut state = self.state.write();
        let record = state.player_mut(player)?;
        let cleared = record.buffs.len();
        record.buffs.clear();
        Ok(cleared)
    }

    pub(crate) fn broadcast(&self, text: &str) {
        self.state.write().broadcasts.push(Message::now(text));
    }

    pub(crate) fn message_player(&self, player: EntityHandle, text: &str) -> zonekit_core::Result<()> {
        self.state.write().player_mut(player)?.inbox.push(Message::now(text));
        Ok(())
    }

    pub(crate) fn message_platform(&self, platform_id: PlatformId, text: &str) -> usize {
        let mut state = self.state.write();
        let mut delivered = 0;
        for record in state
            .players
            .values_mut()
            .filter(|p| p.identity.platform_id == platform_id)
        {
            record.inbox.push(Message::now(text));
            delivered += 1;
        }
        delivered
    }

    // -- entities -------------------------------------------------------------

    /// Spawn a non-player entity.
    pub fn spawn_entity(&self, prefab_guid: i64, prefab_name: &str, position: Position) -> EntityHandle {
        let mut state = self.state.write();
        let handle = state.allocate();
        state.entities.insert(
            handle,
            SimEntity {
                prefab_guid,
                prefab_name: prefab_name.to_string(),
                position,
            },
        );
        debug!(entity = %handle, prefab_guid, "Entity spawned");
        handle
    }

    /// Copy of an entity's record.
    #[must_use]
    pub fn entity(&self, entity: EntityHandle) -> Option<SimEntity> {
        self.state.read().entities.get(&entity).cloned()
    }

    /// Number of live non-player entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.state.read().entities.len()
    }

    /// Move a non-player entity.
    ///
    /// # Errors
    /// `ZoneError::Host` for an unknown entity.
    pub fn move_entity(&self, entity: EntityHandle, position: Position) -> zonekit_core::Result<()> {
        let mut state = self.state.write();
        let record = state
            .entities
            .get_mut(&entity)
            .ok_or_else(|| ZoneError::Host(format!("no entity {entity}")))?;
        record.position = position;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine capabilities
// ---------------------------------------------------------------------------

impl ActionDispatcher for SimWorld {
    fn dispatch(&self, action: &str, args: &[ResolvedArg], map: &mut EntityMap) -> zonekit_core::Result<()> {
        let action: HostAction = action.parse()?;
        actions::apply(self, action, args, map)
    }
}

impl PositionLookup for SimWorld {
    fn position_of(&self, entity: EntityHandle) -> Option<Position> {
        let state = self.state.read();
        state
            .players
            .get(&entity)
            .map(|p| p.position)
            .or_else(|| state.entities.get(&entity).map(|e| e.position))
    }
}

impl ProgressionHost for SimWorld {
    fn identity(&self, character: EntityHandle) -> Option<CharacterIdentity> {
        self.state.read().players.get(&character).map(|p| p.identity.clone())
    }

    fn read_components(&self, character: EntityHandle) -> zonekit_core::Result<Vec<ComponentState>> {
        let state = self.state.read();
        let record = state
            .players
            .get(&character)
            .ok_or_else(|| ZoneError::Host(format!("no player {character}")))?;
        Ok(record
            .components
            .iter()
            .map(|(key, payload)| ComponentState::present(key.clone(), payload.clone()))
            .collect())
    }

    fn write_component(&self, character: EntityHandle, type_key: &str, payload: &str) -> zonekit_core::Result<()> {
        let mut state = self.state.write();
        state
            .player_mut(character)?
            .components
            .insert(type_key.to_string(), payload.to_string());
        Ok(())
    }

    fn remove_component(&self, character: EntityHandle, type_key: &str) -> zonekit_core::Result<()> {
        let mut state = self.state.write();
        state.player_mut(character)?.components.remove(type_key);
        Ok(())
    }
}

impl ZoneWorld for SimWorld {
    fn entities_in_zone(&self, zone_id: &str) -> zonekit_core::Result<Vec<ZoneEntityEntry>> {
        let Some(zone) = self.zone(zone_id) else {
            debug!(zone_id = %zone_id, "No geometry for zone; reporting no entities");
            return Ok(Vec::new());
        };
        Ok(self
            .state
            .read()
            .entities
            .iter()
            .filter(|(_, e)| zone.contains(&e.position))
            .map(|(handle, e)| ZoneEntityEntry {
                entity: *handle,
                prefab_guid: e.prefab_guid,
                prefab_name: e.prefab_name.clone(),
                position: e.position,
            })
            .collect())
    }

    fn entity_exists(&self, entity: EntityHandle) -> bool {
        self.state.read().entities.contains_key(&entity)
    }

    fn prefab_of(&self, entity: EntityHandle) -> Option<i64> {
        self.state.read().entities.get(&entity).map(|e| e.prefab_guid)
    }

    fn is_in_zone(&self, entity: EntityHandle, zone_id: &str) -> bool {
        let Some(zone) = self.zone(zone_id) else {
            return false;
        };
        self.state
            .read()
            .entities
            .get(&entity)
            .is_some_and(|e| zone.contains(&e.position))
    }

    fn destroy_entity(&self, entity: EntityHandle) -> zonekit_core::Result<()> {
        if self.state.write().entities.remove(&entity).is_none() {
            return Err(ZoneError::Host(format!("no entity {entity}")));
        }
        debug!(entity = %entity, "Entity destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> SimWorld {
        SimWorld::new(vec![CircleZone::new("arena-1", Position::new(0.0, 0.0, 0.0), 10.0)])
    }

    #[test]
    fn grant_tech_is_idempotent_and_sorted() {
        let world = world();
        let p = world.spawn_player(7, "Ash", Position::default());
        assert!(world.grant_tech(p, 30).expect("grant"));
        assert!(world.grant_tech(p, 10).expect("grant"));
        assert!(!world.grant_tech(p, 30).expect("grant"));
        assert_eq!(world.tech_of(p), vec![10, 30]);
    }

    #[test]
    fn zone_membership_follows_geometry() {
        let world = world();
        let inside = world.spawn_entity(5, "Chest", Position::new(3.0, 0.0, 3.0));
        let outside = world.spawn_entity(5, "Chest", Position::new(30.0, 0.0, 0.0));

        let listed: Vec<EntityHandle> = world
            .entities_in_zone("ARENA-1")
            .expect("query")
            .into_iter()
            .map(|e| e.entity)
            .collect();
        assert_eq!(listed, vec![inside]);
        assert!(world.is_in_zone(inside, "arena-1"));
        assert!(!world.is_in_zone(outside, "arena-1"));

        world.move_entity(outside, Position::new(1.0, 0.0, 1.0)).expect("move");
        assert!(world.is_in_zone(outside, "arena-1"));
        assert!(world.entities_in_zone("nowhere").expect("query").is_empty());
    }

    #[test]
    fn progression_components_round_trip_through_trait() {
        let world = world();
        let p = world.spawn_player(1, "P1", Position::default());
        world.write_component(p, "Game.Progression.Recipes", "{\"recipe_guid\":[4]}").expect("write");

        let keys: Vec<String> = world
            .read_components(p)
            .expect("read")
            .into_iter()
            .map(|c| c.type_key)
            .collect();
        assert_eq!(keys, vec!["Game.Progression.Recipes".to_string(), TECH_COMPONENT.to_string()]);

        world.remove_component(p, "Game.Progression.Recipes").expect("remove");
        assert_eq!(world.read_components(p).expect("read").len(), 1);
        assert!(world.read_components(EntityHandle::new(99, 1)).is_err());
    }

    #[test]
    fn destroying_twice_fails_the_second_time() {
        let world = world();
        let e = world.spawn_entity(1, "Crate", Position::default());
        world.destroy_entity(e).expect("destroy");
        assert!(!world.entity_exists(e));
        assert!(world.destroy_entity(e).is_err());
    }

    #[test]
    fn platform_messages_reach_every_character_of_the_account() {
        let world = world();
        let a = world.spawn_player(5, "Alt1", Position::default());
        let b = world.spawn_player(5, "Alt2", Position::default());
        let c = world.spawn_player(6, "Other", Position::default());
        assert_eq!(world.message_platform(5, "hello"), 2);
        assert_eq!(world.inbox_of(a), vec!["hello"]);
        assert_eq!(world.inbox_of(b), vec!["hello"]);
        assert!(world.inbox_of(c).is_empty());
    }
}
