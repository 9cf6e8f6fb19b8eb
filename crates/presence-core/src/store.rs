//! Storage contracts for the identity registry and per-day time records.
//!
//! "Not found" is an expected outcome and comes back as `Ok(None)`.
//! Errors are reserved for caller mistakes and transport failures.

use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;

use crate::partition::PartitionId;
use crate::types::{Identity, TimeRecord};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("identity already registered: {0}")]
    DuplicateIdentity(String),
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
    #[error("record already exists for {name} on {partition}")]
    DuplicateRecord { partition: PartitionId, name: String },
    #[error("no record for {name} on {partition}")]
    RecordNotFound { partition: PartitionId, name: String },
    #[error("partition {0} has not been created")]
    PartitionMissing(PartitionId),
    #[error("invalid partition key: {0}")]
    InvalidPartition(String),
    #[error("partition key {key} already bound to {existing}, refusing {requested}")]
    PartitionCollision {
        key: String,
        existing: NaiveDate,
        requested: NaiveDate,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable registry of known people, keyed by name.
pub trait IdentityStore {
    /// Create an identity. Fails with `DuplicateIdentity` if the name is taken.
    fn register(&self, name: &str, employee_id: &str) -> StoreResult<Identity>;

    /// Exact-match lookup by name.
    fn lookup(&self, name: &str) -> StoreResult<Option<Identity>>;

    /// All identities, ordered by name.
    fn list(&self) -> StoreResult<Vec<Identity>>;
}

/// Per-day partitions of time records, at most one record per (day, name).
///
/// Each write is a single atomic transaction.
pub trait DailyRecordStore {
    /// Create the partition for `day` if absent. Idempotent.
    fn ensure_partition(&self, day: NaiveDate) -> StoreResult<PartitionId>;

    fn find_record(&self, day: NaiveDate, name: &str) -> StoreResult<Option<TimeRecord>>;

    /// All records of a day, ordered by name. Empty if the partition is absent.
    fn find_all(&self, day: NaiveDate) -> StoreResult<Vec<TimeRecord>>;

    /// Create a record with `entry_time` set and no exit.
    /// Fails with `DuplicateRecord` if one already exists.
    fn insert_entry(
        &self,
        day: NaiveDate,
        identity: &Identity,
        entry_time: NaiveTime,
    ) -> StoreResult<TimeRecord>;

    /// Overwrite the exit time. Fails with `RecordNotFound` if no entry exists.
    fn record_exit(&self, day: NaiveDate, name: &str, exit_time: NaiveTime) -> StoreResult<TimeRecord>;

    /// Set the entry time only if it is empty. Returns whether it was filled.
    fn record_entry_if_missing(
        &self,
        day: NaiveDate,
        name: &str,
        entry_time: NaiveTime,
    ) -> StoreResult<bool>;

    /// Days that currently have a partition, oldest first.
    fn partitions(&self) -> StoreResult<Vec<PartitionId>>;
}

/// Shared validation for `IdentityStore::register` implementations.
///
/// Returns the trimmed name and employee id.
pub fn validate_identity<'a>(name: &'a str, employee_id: &'a str) -> StoreResult<(&'a str, &'a str)> {
    let name = name.trim();
    let employee_id = employee_id.trim();
    if name.is_empty() {
        return Err(StoreError::InvalidIdentity("name is empty".into()));
    }
    if crate::types::is_unknown_label(name) {
        return Err(StoreError::InvalidIdentity(format!("{name:?} is reserved")));
    }
    if employee_id.is_empty() {
        return Err(StoreError::InvalidIdentity(format!("employee id for {name} is empty")));
    }
    Ok((name, employee_id))
}

impl<T: IdentityStore + ?Sized> IdentityStore for &T {
    fn register(&self, name: &str, employee_id: &str) -> StoreResult<Identity> {
        (**self).register(name, employee_id)
    }

    fn lookup(&self, name: &str) -> StoreResult<Option<Identity>> {
        (**self).lookup(name)
    }

    fn list(&self) -> StoreResult<Vec<Identity>> {
        (**self).list()
    }
}

impl<T: DailyRecordStore + ?Sized> DailyRecordStore for &T {
    fn ensure_partition(&self, day: NaiveDate) -> StoreResult<PartitionId> {
        (**self).ensure_partition(day)
    }

    fn find_record(&self, day: NaiveDate, name: &str) -> StoreResult<Option<TimeRecord>> {
        (**self).find_record(day, name)
    }

    fn find_all(&self, day: NaiveDate) -> StoreResult<Vec<TimeRecord>> {
        (**self).find_all(day)
    }

    fn insert_entry(
        &self,
        day: NaiveDate,
        identity: &Identity,
        entry_time: NaiveTime,
    ) -> StoreResult<TimeRecord> {
        (**self).insert_entry(day, identity, entry_time)
    }

    fn record_exit(&self, day: NaiveDate, name: &str, exit_time: NaiveTime) -> StoreResult<TimeRecord> {
        (**self).record_exit(day, name, exit_time)
    }

    fn record_entry_if_missing(
        &self,
        day: NaiveDate,
        name: &str,
        entry_time: NaiveTime,
    ) -> StoreResult<bool> {
        (**self).record_entry_if_missing(day, name, entry_time)
    }

    fn partitions(&self) -> StoreResult<Vec<PartitionId>> {
        (**self).partitions()
    }
}
