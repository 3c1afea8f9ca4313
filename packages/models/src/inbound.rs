//! Client to relay payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::AsRefStr;
use thiserror::Error;

use crate::{FloorId, Position};

/// A decoded client frame.
///
/// The `type` tag is resolved while decoding. Tags with no matching variant decode to
/// [`InboundPayload::Unknown`] instead of failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InboundPayload {
    Connect(ConnectPayload),
    Floor(FloorPayload),
    Movement(MovementPayload),
    Dead(DeadPayload),
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for InboundPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Identity announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectPayload {
    pub appearance: String,
    /// External account id. Absent or non-positive ids fall back to the connection id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloorPayload {
    pub floor: FloorId,
    pub x: i32,
    pub y: i32,
}

impl FloorPayload {
    #[must_use]
    pub const fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPayload {
    pub x: i32,
    pub y: i32,
}

impl MovementPayload {
    #[must_use]
    pub const fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadPayload {
    pub dead_to: String,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("Missing message type")]
    MissingType,
    #[error("Invalid '{message_type}' payload: {source}")]
    InvalidPayload {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl InboundPayload {
    /// Decodes one frame, without its trailing delimiter.
    ///
    /// # Errors
    ///
    /// * If the frame is not a JSON value
    /// * If the frame has no string `type` field
    /// * If a known `type` is missing required fields or has fields of the wrong shape
    pub fn from_frame(frame: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(frame).map_err(DecodeError::InvalidJson)?;

        let message_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingType)?
            .to_string();

        serde_json::from_value(value).map_err(|source| DecodeError::InvalidPayload {
            message_type,
            source,
        })
    }
}
