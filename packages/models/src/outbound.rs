//! Relay to client payloads.

use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;

use crate::{PlayerId, PlayerSummary, Position, Tombstone};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutboundPayload {
    /// A player arrived on the recipient's floor.
    Connect(PlayerSummary),
    /// A player left the recipient's floor.
    Disconnect(DisconnectPayload),
    /// Reply to the joining player only.
    Floor(FloorSnapshot),
    Movement(MovementUpdate),
    Dead(Tombstone),
}

impl std::fmt::Display for OutboundPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectPayload {
    pub id: PlayerId,
}

/// The dead recorded on a floor and the live players currently on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloorSnapshot {
    pub dead: Vec<Tombstone>,
    pub players: Vec<PlayerSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementUpdate {
    pub id: PlayerId,
    pub x: i32,
    pub y: i32,
}

impl MovementUpdate {
    #[must_use]
    pub const fn new(id: PlayerId, position: Position) -> Self {
        Self {
            id,
            x: position.x,
            y: position.y,
        }
    }
}

impl OutboundPayload {
    #[must_use]
    pub const fn disconnect(id: PlayerId) -> Self {
        Self::Disconnect(DisconnectPayload { id })
    }

    /// Serializes the payload as a single frame, without the trailing delimiter.
    ///
    /// # Errors
    ///
    /// * If the payload fails to serialize
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
