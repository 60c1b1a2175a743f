//! Built-in flow actions of the simulated host.
//!
//! | Action                  | Arguments                                   |
//! |-------------------------|---------------------------------------------|
//! | `ApplyBuff`             | target, buff id                             |
//! | `CleanBuff`             | target                                      |
//! | `RemoveBuff`            | target, buff id                             |
//! | `Teleport`              | target, position (or x, y, z)               |
//! | `SetPosition`           | alias, position (or x, y, z)                |
//! | `SendMessageToAll`      | text                                        |
//! | `SendMessageToPlatform` | platform id, text                           |
//! | `SendMessageToUser`     | target, text                                |
//! | `GrantTech`             | target, tech id                             |
//! | `SpawnEntity`           | prefab id, position (or x, y, z), [alias]   |
//!
//! A target is an `@alias` argument bound to an entity in the map.

use std::str::FromStr;

use tracing::debug;

use zonekit_core::entity_map::{EntityMap, MapValue};
use zonekit_core::flow::ResolvedArg;
use zonekit_core::{EntityHandle, Position, ZoneError};

use crate::world::SimWorld;

/// Every action the simulated host understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostAction {
    /// Add a buff to the target.
    ApplyBuff,
    /// Remove every buff from the target.
    CleanBuff,
    /// Remove one buff from the target.
    RemoveBuff,
    /// Move the target.
    Teleport,
    /// Store a position in the entity map.
    SetPosition,
    /// Broadcast to every player.
    SendMessageToAll,
    /// Message every character of one account.
    SendMessageToPlatform,
    /// Message one player.
    SendMessageToUser,
    /// Unlock a tech id on the target.
    GrantTech,
    /// Spawn a non-player entity.
    SpawnEntity,
}

impl HostAction {
    /// All actions, in table order.
    pub const ALL: [Self; 10] = [
        Self::ApplyBuff,
        Self::CleanBuff,
        Self::RemoveBuff,
        Self::Teleport,
        Self::SetPosition,
        Self::SendMessageToAll,
        Self::SendMessageToPlatform,
        Self::SendMessageToUser,
        Self::GrantTech,
        Self::SpawnEntity,
    ];

    /// Canonical action name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ApplyBuff => "ApplyBuff",
            Self::CleanBuff => "CleanBuff",
            Self::RemoveBuff => "RemoveBuff",
            Self::Teleport => "Teleport",
            Self::SetPosition => "SetPosition",
            Self::SendMessageToAll => "SendMessageToAll",
            Self::SendMessageToPlatform => "SendMessageToPlatform",
            Self::SendMessageToUser => "SendMessageToUser",
            Self::GrantTech => "GrantTech",
            Self::SpawnEntity => "SpawnEntity",
        }
    }
}

impl FromStr for HostAction {
    type Err = ZoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ZoneError::ActionFailed {
                action: wanted.to_string(),
                reason: "unknown action".to_string(),
            })
    }
}

impl std::fmt::Display for HostAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Argument decoding
// ---------------------------------------------------------------------------

struct Args<'a> {
    action: HostAction,
    args: &'a [ResolvedArg],
}

impl Args<'_> {
    fn fail(&self, reason: impl Into<String>) -> ZoneError {
        ZoneError::ActionFailed {
            action: self.action.name().to_string(),
            reason: reason.into(),
        }
    }

    fn get(&self, index: usize) -> zonekit_core::Result<&ResolvedArg> {
        self.args
            .get(index)
            .ok_or_else(|| self.fail(format!("missing argument {index}")))
    }

    fn entity(&self, index: usize) -> zonekit_core::Result<EntityHandle> {
        match self.get(index)? {
            ResolvedArg::Entity(Some(entity)) => Ok(*entity),
            ResolvedArg::Entity(None) => Err(self.fail(format!("argument {index} names an unbound alias"))),
            ResolvedArg::Value(_) => Err(self.fail(format!("argument {index} is not an entity"))),
        }
    }

    fn int(&self, index: usize) -> zonekit_core::Result<i64> {
        self.get(index)?
            .as_int()
            .ok_or_else(|| self.fail(format!("argument {index} is not an integer")))
    }

    fn text(&self, index: usize) -> zonekit_core::Result<&str> {
        self.get(index)?
            .as_str()
            .ok_or_else(|| self.fail(format!("argument {index} is not text")))
    }

    /// A position value at `index`, or three numbers starting there.
    #[allow(clippy::cast_possible_truncation)]
    fn position(&self, index: usize) -> zonekit_core::Result<Position> {
        if let ResolvedArg::Value(MapValue::Position(p)) = self.get(index)? {
            return Ok(*p);
        }
        let coord = |i: usize| {
            self.args
                .get(i)
                .and_then(ResolvedArg::as_f64)
                .map(|v| v as f32)
                .ok_or_else(|| self.fail(format!("argument {i} is not a coordinate")))
        };
        Ok(Position::new(coord(index)?, coord(index + 1)?, coord(index + 2)?))
    }

    /// Index just past a position argument starting at `index`.
    fn after_position(&self, index: usize) -> usize {
        match self.args.get(index) {
            Some(ResolvedArg::Value(MapValue::Position(_))) => index + 1,
            _ => index + 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Run one action against `world`.
///
/// # Errors
/// `ZoneError::ActionFailed` for bad arguments, `ZoneError::Host` when the
/// target does not exist.
pub fn apply(world: &SimWorld, action: HostAction, args: &[ResolvedArg], map: &mut EntityMap) -> zonekit_core::Result<()> {
    let args = Args { action, args };
    match action {
        HostAction::ApplyBuff => {
            let target = args.entity(0)?;
            let buff = args.int(1)?;
            world.add_buff(target, buff)?;
            debug!(target = %target, buff, "Buff applied");
        }
        HostAction::CleanBuff => {
            let target = args.entity(0)?;
            let cleared = world.clear_buffs(target)?;
            debug!(target = %target, cleared, "Buffs cleaned");
        }
        HostAction::RemoveBuff => {
            let target = args.entity(0)?;
            let buff = args.int(1)?;
            if !world.remove_buff(target, buff)? {
                debug!(target = %target, buff, "Buff was not active");
            }
        }
        HostAction::Teleport => {
            let target = args.entity(0)?;
            let position = args.position(1)?;
            world.move_player(target, position)?;
            debug!(target = %target, x = position.x, y = position.y, z = position.z, "Teleported");
        }
        HostAction::SetPosition => {
            let alias = args.text(0)?;
            let position = args.position(1)?;
            map.set_position(alias, position);
        }
        HostAction::SendMessageToAll => world.broadcast(args.text(0)?),
        HostAction::SendMessageToPlatform => {
            let platform = u64::try_from(args.int(0)?).map_err(|_| args.fail("negative platform id"))?;
            let delivered = world.message_platform(platform, args.text(1)?);
            debug!(platform_id = platform, delivered, "Platform message sent");
        }
        HostAction::SendMessageToUser => {
            let target = args.entity(0)?;
            world.message_player(target, args.text(1)?)?;
        }
        HostAction::GrantTech => {
            let target = args.entity(0)?;
            let tech = args.int(1)?;
            world.grant_tech(target, tech)?;
        }
        HostAction::SpawnEntity => {
            let prefab = args.int(0)?;
            let position = args.position(1)?;
            let entity = world.spawn_entity(prefab, &format!("Prefab{prefab}"), position);
            if let Some(alias) = args.args.get(args.after_position(1)).and_then(ResolvedArg::as_str) {
                map.map(alias, entity, true);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircleZone;
    use zonekit_core::flow::ActionDispatcher;

    fn value(v: impl Into<MapValue>) -> ResolvedArg {
        ResolvedArg::Value(v.into())
    }

    fn world() -> SimWorld {
        SimWorld::new(vec![CircleZone::new("arena-1", Position::default(), 10.0)])
    }

    #[test]
    fn names_parse_case_insensitively() {
        for action in HostAction::ALL {
            let parsed: HostAction = action.name().to_uppercase().parse().expect("parse");
            assert_eq!(parsed, action);
        }
        assert!("Explode".parse::<HostAction>().is_err());
    }

    #[test]
    fn buffs_apply_remove_and_clean() {
        let world = world();
        let p = world.spawn_player(1, "P1", Position::default());
        let mut map = EntityMap::new();
        let target = ResolvedArg::Entity(Some(p));

        world.dispatch("ApplyBuff", &[target.clone(), value(10_i64)], &mut map).expect("apply");
        world.dispatch("ApplyBuff", &[target.clone(), value(11_i64)], &mut map).expect("apply");
        world.dispatch("RemoveBuff", &[target.clone(), value(10_i64)], &mut map).expect("remove");
        world.dispatch("RemoveBuff", &[target.clone(), value(10_i64)], &mut map).expect("remove absent");
        assert_eq!(world.buffs_of(p), vec![11]);

        world.dispatch("CleanBuff", &[target], &mut map).expect("clean");
        assert!(world.buffs_of(p).is_empty());
    }

    #[test]
    fn unbound_target_fails_with_action_error() {
        let world = world();
        let mut map = EntityMap::new();
        let err = world
            .dispatch("ApplyBuff", &[ResolvedArg::Entity(None), value(1_i64)], &mut map)
            .expect_err("unbound");
        assert!(matches!(err, ZoneError::ActionFailed { ref action, .. } if action == "ApplyBuff"));
    }

    #[test]
    fn teleport_accepts_position_or_coordinates() {
        let world = world();
        let p = world.spawn_player(1, "P1", Position::default());
        let mut map = EntityMap::new();
        let target = ResolvedArg::Entity(Some(p));

        world
            .dispatch("Teleport", &[target.clone(), value(Position::new(1.0, 2.0, 3.0))], &mut map)
            .expect("teleport");
        assert_eq!(world.player(p).map(|r| r.position), Some(Position::new(1.0, 2.0, 3.0)));

        world
            .dispatch("Teleport", &[target, value(4_i64), value(5.5), value(6_i64)], &mut map)
            .expect("teleport");
        assert_eq!(world.player(p).map(|r| r.position), Some(Position::new(4.0, 5.5, 6.0)));
    }

    #[test]
    fn set_position_writes_the_map() {
        let world = world();
        let mut map = EntityMap::new();
        world
            .dispatch("SetPosition", &[value("spawnPoint"), value(1_i64), value(0_i64), value(2_i64)], &mut map)
            .expect("set");
        assert_eq!(map.position("SPAWNPOINT"), Some(Position::new(1.0, 0.0, 2.0)));
    }

    #[test]
    fn spawn_maps_alias_and_lands_in_zone() {
        let world = world();
        let mut map = EntityMap::new();
        world
            .dispatch(
                "SpawnEntity",
                &[value(900_i64), value(Position::new(1.0, 0.0, 1.0)), value("chest")],
                &mut map,
            )
            .expect("spawn");
        let chest = map.entity("chest").expect("mapped");
        assert_eq!(world.entity(chest).map(|e| e.prefab_guid), Some(900));
        assert!(zonekit_core::host::ZoneWorld::is_in_zone(&world, chest, "arena-1"));
    }

    #[test]
    fn messages_and_tech_reach_the_world() {
        let world = world();
        let p = world.spawn_player(42, "P1", Position::default());
        let mut map = EntityMap::new();
        let target = ResolvedArg::Entity(Some(p));

        world.dispatch("SendMessageToAll", &[value("gates open")], &mut map).expect("all");
        world.dispatch("SendMessageToUser", &[target.clone(), value("hi")], &mut map).expect("user");
        world
            .dispatch("SendMessageToPlatform", &[value(42_i64), value("account")], &mut map)
            .expect("platform");
        world.dispatch("GrantTech", &[target, value(77_i64)], &mut map).expect("tech");

        assert_eq!(world.broadcasts(), vec!["gates open"]);
        assert_eq!(world.inbox_of(p), vec!["hi", "account"]);
        assert_eq!(world.tech_of(p), vec![77]);
    }
}
