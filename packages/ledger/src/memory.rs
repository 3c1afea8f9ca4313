use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use storymode_models::{FloorId, PlayerKey};
use tokio::sync::RwLock;

use crate::{DeathLedger, DeathRecord, LedgerError};

/// Process-local ledger. Records are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryDeathLedger {
    records: RwLock<BTreeMap<PlayerKey, DeathRecord>>,
}

impl MemoryDeathLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeathLedger for MemoryDeathLedger {
    async fn tombstones(
        &self,
        date: NaiveDate,
        floor: FloorId,
    ) -> Result<Vec<DeathRecord>, LedgerError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.date == date && record.tombstone.floor == floor)
            .cloned()
            .collect())
    }

    async fn upsert(&self, record: DeathRecord) -> Result<(), LedgerError> {
        log::debug!(
            "Recording tombstone for {} on floor {} of {}",
            record.key,
            record.tombstone.floor,
            record.date
        );
        self.records.write().await.insert(record.key, record);
        Ok(())
    }

    async fn clear_before(&self, date: NaiveDate) -> Result<usize, LedgerError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.date >= date);
        let removed = before - records.len();
        drop(records);

        log::debug!("Cleared {removed} tombstones from before {date}");
        Ok(removed)
    }
}
