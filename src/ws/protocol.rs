//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize, Serializer};

/// Event name of the only command clients can send
pub const KEY_PRESS_EVENT: &str = "KEY_PRESS";

/// Envelope of every inbound message.
///
/// `data` is kept raw so that unknown events still parse at the envelope
/// level and are dropped by the dispatcher.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Payload of a `KEY_PRESS` event
#[derive(Debug, Clone, Deserialize)]
pub struct KeyData {
    pub key: String,
}

/// Numeric body type tag on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyType {
    Ground = 0,
    Player = 1,
    Ball = 2,
}

impl Serialize for BodyType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// Type-specific body payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BodyData {
    Ground {
        #[serde(rename = "type")]
        body_type: BodyType,
        width: f32,
        height: f32,
    },
    Player {
        #[serde(rename = "type")]
        body_type: BodyType,
        width: f32,
        height: f32,
        health: i32,
    },
    Ball {
        #[serde(rename = "type")]
        body_type: BodyType,
        radius: f32,
    },
}

/// One element of the per-tick frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BodyView {
    pub x: f32,
    pub y: f32,
    #[serde(rename = "type")]
    pub body_type: BodyType,
    pub data: BodyData,
}
