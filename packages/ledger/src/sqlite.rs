use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{Connection, params};
use storymode_models::{FloorId, PlayerId, PlayerKey, Tombstone};

use crate::{DeathLedger, DeathRecord, LedgerError};

// `dead_players` held undated rows keyed by a bare number and cannot be attributed to a day.
const CREATE_DEATH_RECORDS: &str = "
DROP TABLE IF EXISTS dead_players;
CREATE TABLE IF NOT EXISTS death_records (
    player_key  TEXT    PRIMARY KEY NOT NULL,
    date        TEXT    NOT NULL,
    player_id   INTEGER NOT NULL,
    player_name TEXT    NOT NULL DEFAULT 'Adventurer',
    dead_to     TEXT    NOT NULL,
    floor       INTEGER NOT NULL,
    x           INTEGER NOT NULL,
    y           INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS death_records_date_floor ON death_records (date, floor);
";

const UPSERT_DEATH_RECORD: &str = "
INSERT INTO death_records (player_key, date, player_id, player_name, dead_to, floor, x, y)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT (player_key) DO UPDATE SET
    date        = excluded.date,
    player_id   = excluded.player_id,
    player_name = excluded.player_name,
    dead_to     = excluded.dead_to,
    floor       = excluded.floor,
    x           = excluded.x,
    y           = excluded.y
";

const SELECT_FLOOR: &str = "
SELECT player_key, date, player_id, player_name, dead_to, floor, x, y
FROM death_records
WHERE date = ?1 AND floor = ?2
ORDER BY player_key
";

const DELETE_BEFORE: &str = "DELETE FROM death_records WHERE date < ?1";

/// `SQLite` backed ledger.
///
/// Statements run on the blocking thread pool so callers never stall the async runtime.
#[derive(Debug, Clone)]
pub struct SqliteDeathLedger {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteDeathLedger {
    /// Opens (or creates) the ledger database at `path`.
    ///
    /// # Errors
    ///
    /// * If the database fails to open
    /// * If the schema fails to be created
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        log::debug!("Opening death ledger at {}", path.as_ref().display());
        Self::init(Connection::open(path)?)
    }

    /// # Errors
    ///
    /// * If the schema fails to be created
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(connection: Connection) -> Result<Self, LedgerError> {
        connection.execute_batch(CREATE_DEATH_RECORDS)?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, LedgerError> + Send + 'static,
    {
        let connection = self.connection.clone();

        tokio::task::spawn_blocking(move || {
            let connection = connection.lock().map_err(|_| LedgerError::Poisoned)?;
            f(&connection)
        })
        .await?
    }
}

type DeathRow = (String, NaiveDate, i64, String, String, i64, i32, i32);

fn to_record(
    (key, date, id, name, dead_to, floor, x, y): DeathRow,
) -> Result<DeathRecord, LedgerError> {
    Ok(DeathRecord {
        key: key
            .parse::<PlayerKey>()
            .map_err(|e| LedgerError::InvalidRow(e.to_string()))?,
        date,
        tombstone: Tombstone {
            id: PlayerId::try_from(id)
                .map_err(|_| LedgerError::InvalidRow(format!("player_id={id}")))?,
            name,
            dead_to,
            floor: FloorId::try_from(floor)
                .map_err(|_| LedgerError::InvalidRow(format!("floor={floor}")))?,
            x,
            y,
        },
    })
}

#[async_trait]
impl DeathLedger for SqliteDeathLedger {
    async fn tombstones(
        &self,
        date: NaiveDate,
        floor: FloorId,
    ) -> Result<Vec<DeathRecord>, LedgerError> {
        self.with_connection(move |connection| {
            let mut statement = connection.prepare_cached(SELECT_FLOOR)?;
            let rows = statement
                .query_map(params![date, i64::from(floor)], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                })?
                .collect::<Result<Vec<DeathRow>, _>>()?;

            rows.into_iter().map(to_record).collect()
        })
        .await
    }

    async fn upsert(&self, record: DeathRecord) -> Result<(), LedgerError> {
        let DeathRecord {
            key,
            date,
            tombstone,
        } = record;
        let id = i64::try_from(tombstone.id).map_err(|_| LedgerError::IdOutOfRange(tombstone.id))?;

        log::debug!(
            "Recording tombstone for {key} on floor {} of {date}",
            tombstone.floor
        );

        self.with_connection(move |connection| {
            connection.execute(
                UPSERT_DEATH_RECORD,
                params![
                    key.to_string(),
                    date,
                    id,
                    tombstone.name,
                    tombstone.dead_to,
                    i64::from(tombstone.floor),
                    tombstone.x,
                    tombstone.y,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn clear_before(&self, date: NaiveDate) -> Result<usize, LedgerError> {
        self.with_connection(move |connection| {
            let removed = connection.execute(DELETE_BEFORE, [date])?;
            log::debug!("Cleared {removed} tombstones from before {date}");
            Ok(removed)
        })
        .await
    }
}
