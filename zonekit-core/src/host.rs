//! Capability traits the host integration layer implements.
//!
//! The engine never reaches into host internals. Everything it needs from
//! the live game (positions, progression components, zone entities,
//! actions) goes through these narrow traits, bundled in [`HostBindings`].

use std::sync::Arc;

use crate::error::Result;
use crate::sandbox::{ComponentState, ZoneEntityEntry};
use crate::types::{CharacterIdentity, EntityHandle, Position};

pub use crate::flow::ActionDispatcher;

/// Where is an entity right now.
pub trait PositionLookup: Send + Sync {
    /// Current position, or `None` if the entity no longer exists.
    fn position_of(&self, entity: EntityHandle) -> Option<Position>;
}

/// Read and write a character's progression components.
///
/// Component payloads are JSON text; the engine treats them as opaque
/// except for tech extraction.
pub trait ProgressionHost: Send + Sync {
    /// Account and name of the character, if it is a player character.
    fn identity(&self, character: EntityHandle) -> Option<CharacterIdentity>;

    /// Every component currently on the character.
    ///
    /// # Errors
    /// Host-side failures.
    fn read_components(&self, character: EntityHandle) -> Result<Vec<ComponentState>>;

    /// Add the component if missing, then set its data.
    ///
    /// # Errors
    /// Host-side failures.
    fn write_component(&self, character: EntityHandle, type_key: &str, payload: &str) -> Result<()>;

    /// Remove the component if present.
    ///
    /// # Errors
    /// Host-side failures.
    fn remove_component(&self, character: EntityHandle, type_key: &str) -> Result<()>;
}

/// Query and prune entities associated with zones.
pub trait ZoneWorld: Send + Sync {
    /// Every entity currently associated with `zone_id`.
    ///
    /// # Errors
    /// Host-side failures.
    fn entities_in_zone(&self, zone_id: &str) -> Result<Vec<ZoneEntityEntry>>;

    /// Whether the entity is still alive.
    fn entity_exists(&self, entity: EntityHandle) -> bool;

    /// Prefab id of a live entity.
    fn prefab_of(&self, entity: EntityHandle) -> Option<i64>;

    /// Whether the entity lies inside `zone_id`.
    fn is_in_zone(&self, entity: EntityHandle, zone_id: &str) -> bool;

    /// Destroy a live entity.
    ///
    /// # Errors
    /// Host-side failures.
    fn destroy_entity(&self, entity: EntityHandle) -> Result<()>;
}

/// Every host capability the engine uses, as shared trait objects.
#[derive(Clone)]
pub struct HostBindings {
    /// Flow action dispatch.
    pub actions: Arc<dyn ActionDispatcher>,
    /// Position queries.
    pub positions: Arc<dyn PositionLookup>,
    /// Progression component access.
    pub progression: Arc<dyn ProgressionHost>,
    /// Zone entity access.
    pub world: Arc<dyn ZoneWorld>,
}

impl std::fmt::Debug for HostBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBindings").finish_non_exhaustive()
    }
}

impl HostBindings {
    /// Bind every capability to one object implementing all of them.
    #[must_use]
    pub fn from_world<W>(world: Arc<W>) -> Self
    where
        W: ActionDispatcher + PositionLookup + ProgressionHost + ZoneWorld + 'static,
    {
        Self {
            actions: world.clone(),
            positions: world.clone(),
            progression: world.clone(),
            world,
        }
    }
}
