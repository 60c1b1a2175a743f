//! One simulated server: world, engine and detector wired together.

use std::sync::Arc;

use tracing::info;

use zonekit_core::lifecycle::TransitionReport;
use zonekit_core::{EntityHandle, HostBindings, ZoneKit};

use crate::config::HostConfig;
use crate::detector::ZoneDetector;
use crate::error::Result;
use crate::world::SimWorld;

/// Owns the simulated world and the engine driving it.
pub struct SimServer {
    world: Arc<SimWorld>,
    kit: ZoneKit,
    detector: ZoneDetector,
}

impl std::fmt::Debug for SimServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimServer")
            .field("world", &self.world)
            .field("detector", &self.detector)
            .finish_non_exhaustive()
    }
}

impl SimServer {
    /// Build a server without touching persisted sandbox state.
    #[must_use]
    pub fn new(config: &HostConfig) -> Self {
        let world = Arc::new(SimWorld::from_config(&config.host));
        let kit = ZoneKit::new(config.engine.clone(), HostBindings::from_world(world.clone()));
        let detector = ZoneDetector::new(&config.host);
        Self { world, kit, detector }
    }

    /// Build a server and re-import sandboxes left open by an earlier run.
    ///
    /// # Errors
    /// Unreadable or malformed sandbox files.
    pub fn start(config: &HostConfig) -> Result<Self> {
        let server = Self::new(config);
        let restored = server.kit.load_sandbox_state()?;
        info!(
            zones = server.world.zones().len(),
            open_sandboxes = restored,
            "Simulated server started"
        );
        Ok(server)
    }

    /// The simulated world.
    #[must_use]
    pub fn world(&self) -> &Arc<SimWorld> {
        &self.world
    }

    /// The engine.
    #[must_use]
    pub fn kit(&self) -> &ZoneKit {
        &self.kit
    }

    /// The zone detector.
    #[must_use]
    pub fn detector(&self) -> &ZoneDetector {
        &self.detector
    }

    /// Sample every player once.
    pub fn tick(&self) -> Vec<TransitionReport> {
        self.detector.tick(&self.kit, &self.world)
    }

    /// Exit the player's zone, then remove them from the world.
    pub fn disconnect(&self, player: EntityHandle) -> Option<TransitionReport> {
        let report = self.detector.forget(&self.kit, player);
        self.world.despawn_player(player);
        report
    }

    /// Flush engine state.
    ///
    /// # Errors
    /// Persistence failures.
    pub fn shutdown(&self) -> Result<()> {
        self.kit.shutdown()?;
        Ok(())
    }
}
