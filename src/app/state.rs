//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{default_arena, SimHandle, Simulation, World};
use crate::session::SessionManager;
use crate::store::TokenStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sim: SimHandle,
    pub sessions: SessionManager,
    pub tokens: TokenStore,
}

impl AppState {
    /// Build the state and the simulation it fronts. The caller spawns the
    /// simulation.
    pub fn new(config: Config) -> (Self, Simulation) {
        let world = default_arena(config.physics_backend, config.ball_count);
        Self::with_world(config, world)
    }

    pub fn with_world(config: Config, world: World) -> (Self, Simulation) {
        let config = Arc::new(config);

        // Initialize per-player delivery
        let sessions = SessionManager::new(config.session_buffer);

        // Initialize the simulation and its command handle
        let (simulation, sim) = Simulation::new(world, sessions.clone());

        // Initialize join token storage
        let tokens = TokenStore::default();

        let state = Self {
            config,
            sim,
            sessions,
            tokens,
        };
        (state, simulation)
    }
}
