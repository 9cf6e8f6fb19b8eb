//! Day-partition keys.
//!
//! Every calendar day maps to exactly one `MMDDYYYY` key. Storage backends
//! derive physical names only from a validated [`PartitionId`].

use chrono::{Datelike, NaiveDate};
use std::fmt;

use crate::store::StoreError;

const PARTITION_KEY_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId {
    day: NaiveDate,
}

impl PartitionId {
    pub fn for_day(day: NaiveDate) -> Self {
        Self { day }
    }

    /// Parse an `MMDDYYYY` key. Anything that does not name a real date is rejected.
    pub fn parse(key: &str) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidPartition(key.to_string());

        if key.len() != PARTITION_KEY_LEN || !key.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let month: u32 = key[0..2].parse().map_err(|_| invalid())?;
        let day: u32 = key[2..4].parse().map_err(|_| invalid())?;
        let year: i32 = key[4..8].parse().map_err(|_| invalid())?;

        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self::for_day)
            .ok_or_else(invalid)
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    /// Canonical `MMDDYYYY` rendering.
    pub fn key(&self) -> String {
        format!("{:02}{:02}{:04}", self.day.month(), self.day.day(), self.day.year())
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<NaiveDate> for PartitionId {
    fn from(day: NaiveDate) -> Self {
        Self::for_day(day)
    }
}
