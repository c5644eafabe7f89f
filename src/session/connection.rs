//! Connection lifecycle: Authorizing -> Open -> Closed

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::dispatcher::Command;
use crate::game::snapshot::Frame;
use crate::game::SimHandle;

use super::SessionManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Token consumed and player joined, transport not yet upgraded
    Authorizing,
    /// Session registered, frames flowing
    Open,
    /// Session and player released
    Closed,
}

/// Lifecycle of one authorized player connection.
///
/// Cleanup runs exactly once, on the first of [`Connection::close`] or drop.
pub struct Connection {
    player_id: Uuid,
    state: Mutex<ConnectionState>,
    sessions: SessionManager,
    sim: SimHandle,
}

impl Connection {
    /// Wrap a player that has already joined the room
    pub fn authorized(player_id: Uuid, sessions: SessionManager, sim: SimHandle) -> Self {
        Self {
            player_id,
            state: Mutex::new(ConnectionState::Authorizing),
            sessions,
            sim,
        }
    }

    pub fn player_id(&self) -> Uuid {
        self.player_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Register the outbound session. Returns `None` unless authorizing.
    pub fn open(&self) -> Option<mpsc::Receiver<Frame>> {
        let mut state = self.state.lock();
        if *state != ConnectionState::Authorizing {
            return None;
        }
        let (tx, rx) = self.sessions.channel();
        self.sessions.register(self.player_id, tx);
        *state = ConnectionState::Open;
        info!(player_id = %self.player_id, "Connection opened");
        Some(rx)
    }

    /// Forward a decoded command for this player to the simulation
    pub fn submit(&self, command: Command) {
        if self.state() == ConnectionState::Open {
            self.sim.submit(self.player_id, command);
        }
    }

    /// Release the session and the player. Later calls are no-ops.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if *state == ConnectionState::Closed {
            return;
        }
        let was = *state;
        *state = ConnectionState::Closed;
        drop(state);

        self.sessions.unregister(self.player_id);
        self.sim.leave(self.player_id);

        if was == ConnectionState::Open {
            info!(player_id = %self.player_id, "Connection closed");
        } else {
            debug!(player_id = %self.player_id, "Connection closed before upgrade");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
