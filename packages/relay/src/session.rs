//! Per-connection player state.

use chrono::NaiveDate;
use storymode_models::{
    DEFAULT_PLAYER_NAME, FloorId, PlayerId, PlayerKey, PlayerSummary, Position, Tombstone,
    inbound::ConnectPayload,
};

use crate::{ConnId, floor::FloorMember};

/// What a client announced about itself in its `connect` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub external_id: Option<PlayerId>,
    pub name: String,
    pub appearance: String,
}

impl From<ConnectPayload> for Identity {
    fn from(value: ConnectPayload) -> Self {
        Self {
            external_id: value
                .id
                .filter(|id| *id > 0)
                .and_then(|id| PlayerId::try_from(id).ok()),
            name: value
                .name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_PLAYER_NAME.to_string()),
            appearance: value.appearance,
        }
    }
}

/// State owned by exactly one connection and dropped with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSession {
    conn_id: ConnId,
    guest_key: u64,
    identity: Option<Identity>,
    floor: Option<FloorId>,
    position: Option<Position>,
    died_on: Option<NaiveDate>,
}

impl PlayerSession {
    #[must_use]
    pub fn new(conn_id: ConnId) -> Self {
        Self {
            conn_id,
            guest_key: rand::random(),
            identity: None,
            floor: None,
            position: None,
            died_on: None,
        }
    }

    #[must_use]
    pub const fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    /// The id other players know this player by: the announced account id, or the connection
    /// id when none was announced.
    #[must_use]
    pub fn id(&self) -> PlayerId {
        self.identity
            .as_ref()
            .and_then(|identity| identity.external_id)
            .unwrap_or(self.conn_id)
    }

    /// The key this player's deaths are recorded under. Players without an account id get a
    /// random guest key that lives as long as the connection.
    #[must_use]
    pub fn key(&self) -> PlayerKey {
        self.identity
            .as_ref()
            .and_then(|identity| identity.external_id)
            .map_or(PlayerKey::Guest(self.guest_key), PlayerKey::Account)
    }

    #[must_use]
    pub const fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.identity.is_some()
    }

    /// Records the identity. Only the first announcement is kept.
    ///
    /// Returns whether the session became loaded by this call.
    pub fn load(&mut self, identity: Identity) -> bool {
        if self.identity.is_some() {
            return false;
        }

        self.identity = Some(identity);
        true
    }

    #[must_use]
    pub const fn floor(&self) -> Option<FloorId> {
        self.floor
    }

    /// Unassigns the session's floor and returns the floor it was on.
    pub const fn take_floor(&mut self) -> Option<FloorId> {
        self.floor.take()
    }

    pub const fn enter_floor(&mut self, floor: FloorId, position: Position) {
        self.floor = Some(floor);
        self.position = Some(position);
    }

    #[must_use]
    pub const fn position(&self) -> Option<Position> {
        self.position
    }

    pub const fn set_position(&mut self, position: Position) {
        self.position = Some(position);
    }

    /// Whether this player died in the `date` dungeon. A death from an earlier dungeon no
    /// longer counts.
    #[must_use]
    pub fn is_dead_on(&self, date: NaiveDate) -> bool {
        self.died_on == Some(date)
    }

    pub const fn mark_dead(&mut self, date: NaiveDate) {
        self.died_on = Some(date);
    }

    /// Public view of this player. `None` until loaded.
    #[must_use]
    pub fn summary(&self) -> Option<PlayerSummary> {
        let identity = self.identity.as_ref()?;
        let position = self.position.unwrap_or_default();

        Some(PlayerSummary {
            id: self.id(),
            name: identity.name.clone(),
            appearance: identity.appearance.clone(),
            x: position.x,
            y: position.y,
        })
    }

    /// Floor registry entry for this player. `None` until loaded.
    #[must_use]
    pub fn member(&self) -> Option<FloorMember> {
        Some(FloorMember {
            conn: self.conn_id,
            player: self.summary()?,
            died_on: self.died_on,
        })
    }

    /// Where this player died. `None` unless loaded and on a floor.
    #[must_use]
    pub fn tombstone(&self, dead_to: String) -> Option<Tombstone> {
        let identity = self.identity.as_ref()?;
        let floor = self.floor?;
        let position = self.position.unwrap_or_default();

        Some(Tombstone {
            id: self.id(),
            name: identity.name.clone(),
            dead_to,
            floor,
            x: position.x,
            y: position.y,
        })
    }
}
