//! Per-invocation scratch map passed through flow execution.
//!
//! An [`EntityMap`] binds short aliases (`"player"`, `"zoneId"`, `"target"`)
//! to typed values for the duration of one flow run. Keys are trimmed and
//! compared case-insensitively. Entity bindings and plain values live in
//! separate tables, so `"target"` can be both an entity and a label.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::types::{EntityHandle, Position, normalize_key};

/// A non-entity value stored in the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MapValue {
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// 3D position.
    Position(Position),
    /// Free-form text.
    Text(String),
}

impl From<&str> for MapValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MapValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MapValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for MapValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Position> for MapValue {
    fn from(value: Position) -> Self {
        Self::Position(value)
    }
}

/// Typed alias table for one flow invocation.
#[derive(Debug, Clone, Default)]
pub struct EntityMap {
    entities: HashMap<String, EntityHandle>,
    values: HashMap<String, MapValue>,
}

impl EntityMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `alias` to an entity, overwriting any previous binding.
    pub fn set_entity(&mut self, alias: &str, entity: EntityHandle) {
        let key = normalize_key(alias);
        if key.is_empty() {
            return;
        }
        self.entities.insert(key, entity);
    }

    /// Bind `alias` to an entity only if it is free, or always if `replace`.
    ///
    /// Returns `true` when the binding was written.
    pub fn map(&mut self, alias: &str, entity: EntityHandle, replace: bool) -> bool {
        let key = normalize_key(alias);
        if key.is_empty() {
            return false;
        }
        if !replace && self.entities.contains_key(&key) {
            return false;
        }
        self.entities.insert(key, entity);
        true
    }

    /// Look up an entity binding.
    #[must_use]
    pub fn entity(&self, alias: &str) -> Option<EntityHandle> {
        self.entities.get(&normalize_key(alias)).copied()
    }

    /// Store a text value.
    pub fn set_string(&mut self, alias: &str, value: impl Into<String>) {
        self.set_value(alias, MapValue::Text(value.into()));
    }

    /// Store an integer value.
    pub fn set_int(&mut self, alias: &str, value: i64) {
        self.set_value(alias, MapValue::Int(value));
    }

    /// Store a float value.
    pub fn set_float(&mut self, alias: &str, value: f64) {
        self.set_value(alias, MapValue::Float(value));
    }

    /// Store a position value.
    pub fn set_position(&mut self, alias: &str, value: Position) {
        self.set_value(alias, MapValue::Position(value));
    }

    fn set_value(&mut self, alias: &str, value: MapValue) {
        let key = normalize_key(alias);
        if key.is_empty() {
            return;
        }
        self.values.insert(key, value);
    }

    /// Raw value lookup.
    #[must_use]
    pub fn value(&self, alias: &str) -> Option<&MapValue> {
        self.values.get(&normalize_key(alias))
    }

    /// Text lookup. `None` if absent or not text.
    #[must_use]
    pub fn string(&self, alias: &str) -> Option<&str> {
        match self.value(alias) {
            Some(MapValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Integer lookup. `None` if absent or not an integer.
    #[must_use]
    pub fn int(&self, alias: &str) -> Option<i64> {
        match self.value(alias) {
            Some(MapValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Position lookup. `None` if absent or not a position.
    #[must_use]
    pub fn position(&self, alias: &str) -> Option<Position> {
        match self.value(alias) {
            Some(MapValue::Position(p)) => Some(*p),
            _ => None,
        }
    }

    /// Remove an alias from both tables. Returns `true` if anything was removed.
    pub fn remove(&mut self, alias: &str) -> bool {
        let key = normalize_key(alias);
        let had_entity = self.entities.remove(&key).is_some();
        let had_value = self.values.remove(&key).is_some();
        had_entity || had_value
    }

    /// Drop every binding.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.values.clear();
    }

    /// Number of entity bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether there are no bindings at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.values.is_empty()
    }

    /// Sorted copy of the entity bindings, for logging and assertions.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, EntityHandle> {
        self.entities.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_are_case_insensitive_and_trimmed() {
        let mut map = EntityMap::new();
        map.set_entity("  Player ", EntityHandle::new(1, 1));
        assert_eq!(map.entity("player"), Some(EntityHandle::new(1, 1)));
        assert_eq!(map.entity("PLAYER"), Some(EntityHandle::new(1, 1)));
    }

    #[test]
    fn map_respects_replace_flag() {
        let mut map = EntityMap::new();
        assert!(map.map("target", EntityHandle::new(1, 1), false));
        assert!(!map.map("Target", EntityHandle::new(2, 1), false));
        assert_eq!(map.entity("target"), Some(EntityHandle::new(1, 1)));
        assert!(map.map("target", EntityHandle::new(2, 1), true));
        assert_eq!(map.entity("target"), Some(EntityHandle::new(2, 1)));
    }

    #[test]
    fn empty_alias_is_ignored() {
        let mut map = EntityMap::new();
        map.set_entity("   ", EntityHandle::new(1, 1));
        map.set_string("", "x");
        assert!(map.is_empty());
        assert!(!map.map(" ", EntityHandle::new(1, 1), true));
    }

    #[test]
    fn entities_and_values_are_separate() {
        let mut map = EntityMap::new();
        map.set_entity("zone", EntityHandle::new(9, 1));
        map.set_string("zone", "arena-1");
        assert_eq!(map.entity("zone"), Some(EntityHandle::new(9, 1)));
        assert_eq!(map.string("zone"), Some("arena-1"));
        assert_eq!(map.int("zone"), None);
        assert!(map.remove("ZONE"));
        assert!(map.entity("zone").is_none());
        assert!(map.string("zone").is_none());
    }
}
