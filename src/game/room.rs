//! Player registry of the single active room

use std::collections::HashMap;

use tracing::info;
use uuid::Uuid;

use super::physics::{BodyHandle, Vec2};
use super::world::World;

/// Where new players appear
pub const SPAWN_POINT: Vec2 = Vec2::new(0.0, 200.0);
/// Health of a freshly spawned player
pub const STARTING_HEALTH: i32 = 100;

/// A connected player
#[derive(Debug, Clone)]
pub struct Player {
    pub nickname: String,
    pub body: BodyHandle,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("nickname already taken")]
    AlreadyTaken,

    #[error("unable to join game: {0}")]
    Internal(String),
}

/// Registry keyed by player id. Nicknames are unique among members.
#[derive(Debug, Default)]
pub struct Room {
    players: HashMap<Uuid, Player>,
}

impl Room {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a player and give them a body in `world`
    pub fn join_player(&mut self, nickname: &str, world: &mut World) -> Result<Uuid, RoomError> {
        if self.is_nickname_taken(nickname) {
            return Err(RoomError::AlreadyTaken);
        }

        let id = Uuid::new_v4();
        if self.players.contains_key(&id) {
            return Err(RoomError::Internal("player id collision".to_string()));
        }

        let body = world.create_player(SPAWN_POINT.x, SPAWN_POINT.y);
        if !world.tag_player(body, id, STARTING_HEALTH) {
            world.destroy_body(body);
            return Err(RoomError::Internal("failed to tag player body".to_string()));
        }

        self.players.insert(
            id,
            Player {
                nickname: nickname.to_string(),
                body,
            },
        );

        info!(player_id = %id, nickname, player_count = self.players.len(), "Player joined room");
        Ok(id)
    }

    /// Unregister a player and destroy their body. Absent ids are ignored.
    pub fn remove_player(&mut self, player_id: Uuid, world: &mut World) -> bool {
        match self.players.remove(&player_id) {
            Some(player) => {
                world.destroy_body(player.body);
                info!(
                    player_id = %player_id,
                    nickname = %player.nickname,
                    player_count = self.players.len(),
                    "Player left room"
                );
                true
            }
            None => false,
        }
    }

    pub fn player_ids(&self) -> Vec<Uuid> {
        self.players.keys().copied().collect()
    }

    pub fn is_nickname_taken(&self, nickname: &str) -> bool {
        self.players.values().any(|p| p.nickname == nickname)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
impl Room {
    pub fn get(&self, player_id: &Uuid) -> Option<&Player> {
        self.players.get(player_id)
    }
}
