//! Daily dungeon generation.
//!
//! Every UTC day gets one dungeon, described by a random seed, a file type theme and a
//! difficulty. Everything recorded against a dungeon (tombstones, death flags) expires at the
//! next UTC midnight.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use strum::VariantArray as _;
use strum_macros::{AsRefStr, EnumString, VariantArray};

/// Number of random bits in a dungeon seed.
pub const SEED_BITS: u32 = 63;

pub const MIN_DIFFICULTY: u8 = 1;
pub const MAX_DIFFICULTY: u8 = 5;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr, VariantArray,
)]
pub enum DungeonType {
    Other,
    Audio,
    Image,
    Compressed,
    Video,
    Executable,
}

impl std::fmt::Display for DungeonType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyDungeon {
    pub date: NaiveDate,
    pub seed: u64,
    #[serde(rename = "type")]
    pub dungeon_type: DungeonType,
    pub difficulty: u8,
}

impl DailyDungeon {
    /// Rolls the dungeon for `date`.
    pub fn generate(date: NaiveDate, rng: &mut impl Rng) -> Self {
        let seed = rng.random::<u64>() >> (u64::BITS - SEED_BITS);
        let dungeon_type = DungeonType::VARIANTS[rng.random_range(0..DungeonType::VARIANTS.len())];
        let difficulty = rng.random_range(MIN_DIFFICULTY..=MAX_DIFFICULTY);

        let dungeon = Self {
            date,
            seed,
            dungeon_type,
            difficulty,
        };
        log::debug!("Generated daily dungeon {dungeon:?}");
        dungeon
    }

    /// Rolls the dungeon for the current UTC day.
    #[must_use]
    pub fn today() -> Self {
        Self::generate(Utc::now().date_naive(), &mut rand::rng())
    }

    /// Whether this dungeon is still the active one at `now`.
    #[must_use]
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.date == now.date_naive()
    }
}

/// The first UTC midnight strictly after `now`.
#[must_use]
pub fn next_reset_after(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive().succ_opt().unwrap_or(NaiveDate::MAX);
    NaiveDateTime::new(tomorrow, NaiveTime::MIN).and_utc()
}

#[must_use]
pub fn duration_until_next_reset(now: DateTime<Utc>) -> Duration {
    (next_reset_after(now) - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
