//! Death ledger for the storymode relay.
//!
//! The ledger keeps the latest [`Tombstone`] of every player, tagged with the date of the daily
//! dungeon it was recorded in. Recording a death upserts by [`PlayerKey`], so a player who dies
//! twice only leaves the most recent tombstone behind, and reads only ever see the requested
//! day.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use async_trait::async_trait;
use chrono::NaiveDate;
use storymode_models::{FloorId, PlayerId, PlayerKey, Tombstone};
use thiserror::Error;

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryDeathLedger;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDeathLedger;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error("Ledger connection lock was poisoned")]
    Poisoned,
    #[error("Player id {0} does not fit the ledger")]
    IdOutOfRange(PlayerId),
    #[error("Invalid tombstone row: {0}")]
    InvalidRow(String),
}

/// A tombstone and who it belongs to, for one daily dungeon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathRecord {
    pub key: PlayerKey,
    pub date: NaiveDate,
    pub tombstone: Tombstone,
}

/// Keyed store of tombstones, queried by day and floor and upserted by player key.
#[async_trait]
pub trait DeathLedger: Send + Sync {
    /// Returns the deaths recorded on `floor` during the `date` dungeon, in no particular order.
    ///
    /// # Errors
    ///
    /// * If the underlying store fails to read
    async fn tombstones(
        &self,
        date: NaiveDate,
        floor: FloorId,
    ) -> Result<Vec<DeathRecord>, LedgerError>;

    /// Records `record`, replacing any previous record with the same key.
    ///
    /// # Errors
    ///
    /// * If the underlying store fails to write
    async fn upsert(&self, record: DeathRecord) -> Result<(), LedgerError>;

    /// Forgets every record from a dungeon before `date`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// * If the underlying store fails to write
    async fn clear_before(&self, date: NaiveDate) -> Result<usize, LedgerError>;
}

impl std::fmt::Debug for dyn DeathLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{DeathLedger}}")
    }
}
