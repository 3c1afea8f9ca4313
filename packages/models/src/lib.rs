//! Wire models shared by the storymode relay.
//!
//! Every frame on the wire is a single JSON object terminated by `\n` and carrying a `type`
//! field. [`inbound::InboundPayload`] covers what clients send, [`outbound::OutboundPayload`]
//! covers what the relay sends back.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod inbound;
pub mod outbound;

/// Player identifier as seen by other players.
pub type PlayerId = u64;

/// Identity a death is recorded under.
///
/// Account ids and locally assigned connection ids may carry the same number, so the key keeps
/// track of which one it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlayerKey {
    Account(PlayerId),
    /// A player that connected without an account id. The value is random per session so it
    /// stays unique across restarts.
    Guest(u64),
}

impl std::fmt::Display for PlayerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Account(id) => write!(f, "account:{id}"),
            Self::Guest(id) => write!(f, "guest:{id}"),
        }
    }
}

#[derive(Debug, Error)]
#[error("Invalid player key '{0}'")]
pub struct ParsePlayerKeyError(String);

impl std::str::FromStr for PlayerKey {
    type Err = ParsePlayerKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParsePlayerKeyError(s.to_string());
        let (kind, id) = s.split_once(':').ok_or_else(invalid)?;
        let id = id.parse::<u64>().map_err(|_| invalid())?;

        match kind {
            "account" => Ok(Self::Account(id)),
            "guest" => Ok(Self::Guest(id)),
            _ => Err(invalid()),
        }
    }
}

/// Dungeon floor number. Floors are broadcast group boundaries.
pub type FloorId = u32;

/// Display name used when a client connects without one.
pub const DEFAULT_PLAYER_NAME: &str = "An Unknown Soul";

/// Grid coordinates on a floor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Where and how a player died. At most one exists per player per day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: PlayerId,
    pub name: String,
    pub dead_to: String,
    pub floor: FloorId,
    pub x: i32,
    pub y: i32,
}

/// Public view of a live player on a floor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub id: PlayerId,
    pub name: String,
    pub appearance: String,
    pub x: i32,
    pub y: i32,
}

impl PlayerSummary {
    #[must_use]
    pub const fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }

    pub const fn set_position(&mut self, position: Position) {
        self.x = position.x;
        self.y = position.y;
    }
}
