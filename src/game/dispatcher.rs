//! Inbound command decoding and application

use std::str::FromStr;

use tracing::debug;
use uuid::Uuid;

use crate::ws::protocol::{ClientEnvelope, KeyData, KEY_PRESS_EVENT};

use super::physics::Vec2;
use super::world::World;

/// Horizontal velocity change of a left/right key press
pub const HORIZONTAL_IMPULSE: f32 = 10.0;
/// Vertical velocity change of an up key press
pub const JUMP_IMPULSE: f32 = 50.0;
/// Vertical velocity change of a down key press
pub const DIVE_IMPULSE: f32 = 10.0;

/// Movement direction carried by a key press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Left,
    Down,
    Right,
}

impl Direction {
    /// Velocity change applied to the player's body
    pub fn velocity_delta(self) -> Vec2 {
        match self {
            Direction::Up => Vec2::new(0.0, JUMP_IMPULSE),
            Direction::Left => Vec2::new(-HORIZONTAL_IMPULSE, 0.0),
            Direction::Down => Vec2::new(0.0, -DIVE_IMPULSE),
            Direction::Right => Vec2::new(HORIZONTAL_IMPULSE, 0.0),
        }
    }
}

impl FromStr for Direction {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "left" => Ok(Direction::Left),
            "down" => Ok(Direction::Down),
            "right" => Ok(Direction::Right),
            other => Err(DecodeError::UnknownKey(other.to_string())),
        }
    }
}

/// A decoded client command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    KeyPress(Direction),
}

/// Reasons an inbound message produces no command
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("unknown key: {0}")]
    UnknownKey(String),
}

impl DecodeError {
    /// Unknown events are valid envelopes that simply carry no action
    pub fn is_ignorable(&self) -> bool {
        matches!(self, DecodeError::UnknownEvent(_))
    }
}

/// Decode one inbound text frame
pub fn decode(text: &str) -> Result<Command, DecodeError> {
    let envelope: ClientEnvelope = serde_json::from_str(text)?;

    if envelope.event != KEY_PRESS_EVENT {
        return Err(DecodeError::UnknownEvent(envelope.event));
    }

    let data: KeyData = serde_json::from_value(envelope.data)?;
    let direction = data.key.parse()?;
    Ok(Command::KeyPress(direction))
}

/// Apply a decoded command to the sender's body
pub fn apply(world: &mut World, player_id: Uuid, command: Command) {
    match command {
        Command::KeyPress(direction) => {
            if !world.apply_velocity_delta(player_id, direction) {
                debug!(player_id = %player_id, ?direction, "Key press for player without body");
            }
        }
    }
}
