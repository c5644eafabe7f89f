//! Per-player outbound delivery and connection lifecycle

pub mod connection;

pub use connection::{Connection, ConnectionState};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

use crate::game::snapshot::Frame;

/// Default number of frames buffered per player
pub const DEFAULT_SESSION_BUFFER: usize = 8;

/// Result of a non-blocking delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// Buffer full, frame discarded
    Dropped,
    /// No live session for the player
    NoSession,
}

/// Maps player ids to their bounded outbound channels
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<DashMap<Uuid, mpsc::Sender<Frame>>>,
    buffer: usize,
}

impl SessionManager {
    pub fn new(buffer: usize) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Create a delivery channel with this manager's bound
    pub fn channel(&self) -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
        mpsc::channel(self.buffer)
    }

    pub fn register(&self, player_id: Uuid, sender: mpsc::Sender<Frame>) {
        if self.sessions.insert(player_id, sender).is_some() {
            debug!(player_id = %player_id, "Replaced existing session");
        }
    }

    pub fn unregister(&self, player_id: Uuid) -> bool {
        self.sessions.remove(&player_id).is_some()
    }

    /// Enqueue without waiting; a full buffer drops the frame
    pub fn send(&self, player_id: Uuid, frame: Frame) -> SendOutcome {
        let Some(sender) = self.sessions.get(&player_id) else {
            return SendOutcome::NoSession;
        };
        match sender.try_send(frame) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => SendOutcome::Dropped,
            Err(TrySendError::Closed(_)) => SendOutcome::NoSession,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
impl SessionManager {
    pub fn is_registered(&self, player_id: Uuid) -> bool {
        self.sessions.contains_key(&player_id)
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_BUFFER)
    }
}
