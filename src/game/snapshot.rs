//! Frame encoding and broadcast statistics

use std::sync::Arc;

use crate::ws::protocol::BodyView;

/// Serialized frame shared by every recipient of a tick
pub type Frame = Arc<str>;

/// Encode a snapshot as the JSON array clients expect
pub fn encode_frame(views: &[BodyView]) -> Result<Frame, serde_json::Error> {
    serde_json::to_string(views).map(Frame::from)
}

/// Per-second delivery counters, logged by the simulation loop
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastStats {
    pub frames_queued: u64,
    pub frames_dropped: u64,
    pub bytes_queued: u64,
}

impl BroadcastStats {
    pub fn record_queued(&mut self, bytes: usize) {
        self.frames_queued += 1;
        self.bytes_queued += bytes as u64;
    }

    pub fn record_dropped(&mut self) {
        self.frames_dropped += 1;
    }

    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}
