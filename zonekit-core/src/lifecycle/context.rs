//! Per-transition context handed to lifecycle steps.

use crate::config::ZoneSettings;
use crate::entity_map::EntityMap;
use crate::host::HostBindings;
use crate::policy::TrapLifecycleDecision;
use crate::types::{CharacterIdentity, EntityHandle, LifecycleStage, Position};

/// Entity-map alias the player is bound to.
pub const PLAYER_ALIAS: &str = "player";
/// Entity-map alias holding the zone id.
pub const ZONE_ID_ALIAS: &str = "zoneId";
/// Entity-map alias holding the player position.
pub const POSITION_ALIAS: &str = "position";

/// Everything a step knows about one enter or exit.
///
/// Built fresh for each transition and dropped when it completes. Steps
/// may add aliases to `map`; the zone's flow runs against the same map
/// afterwards.
pub struct ZoneLifecycleContext<'a> {
    /// Player character.
    pub player: EntityHandle,
    /// Account and name, if the host knows the character.
    pub identity: Option<CharacterIdentity>,
    /// Zone being entered or left.
    pub zone_id: String,
    /// Player position when the transition fired.
    pub position: Position,
    /// Enter or exit.
    pub stage: LifecycleStage,
    /// Resolved settings of the zone.
    pub zone: ZoneSettings,
    /// Policy verdict for this transition.
    pub decision: TrapLifecycleDecision,
    /// Aliases shared by steps and the zone flow.
    pub map: EntityMap,
    /// Host capabilities.
    pub host: &'a HostBindings,
}

impl std::fmt::Debug for ZoneLifecycleContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneLifecycleContext")
            .field("player", &self.player)
            .field("zone_id", &self.zone_id)
            .field("stage", &self.stage)
            .field("decision", &self.decision)
            .finish_non_exhaustive()
    }
}

impl<'a> ZoneLifecycleContext<'a> {
    /// Build a context with the standard aliases seeded.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        player: EntityHandle,
        identity: Option<CharacterIdentity>,
        zone_id: &str,
        position: Position,
        stage: LifecycleStage,
        zone: ZoneSettings,
        decision: TrapLifecycleDecision,
        host: &'a HostBindings,
    ) -> Self {
        let mut map = EntityMap::new();
        map.set_entity(PLAYER_ALIAS, player);
        map.set_string(ZONE_ID_ALIAS, zone_id);
        map.set_position(POSITION_ALIAS, position);
        Self {
            player,
            identity,
            zone_id: zone_id.to_string(),
            position,
            stage,
            zone,
            decision,
            map,
            host,
        }
    }
}
