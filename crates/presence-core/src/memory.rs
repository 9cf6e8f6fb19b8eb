//! In-memory store satisfying both storage traits.
//!
//! Used for dry runs and tests. Supports injecting a storage failure for a
//! chosen name so callers can exercise their error paths.

use chrono::{NaiveDate, NaiveTime};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::partition::PartitionId;
use crate::store::{validate_identity, DailyRecordStore, IdentityStore, StoreError, StoreResult};
use crate::types::{Identity, TimeRecord};

#[derive(Debug, Default)]
struct Inner {
    identities: BTreeMap<String, Identity>,
    partitions: BTreeMap<PartitionId, BTreeMap<String, TimeRecord>>,
    failing: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every record operation for `name` fail with `Unavailable`.
    pub fn fail_for(&self, name: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing.insert(name.to_string());
        }
    }

    /// Blank out an entry time, mimicking rows written without one.
    #[cfg(test)]
    pub(crate) fn clear_entry_time(&self, day: NaiveDate, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner
            .partitions
            .get_mut(&PartitionId::for_day(day))
            .and_then(|records| records.get_mut(name))
        {
            record.entry_time = None;
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    fn guarded(&self, name: &str) -> StoreResult<MutexGuard<'_, Inner>> {
        let inner = self.lock()?;
        if inner.failing.contains(name) {
            return Err(StoreError::Unavailable(format!("injected failure for {name}")));
        }
        Ok(inner)
    }
}

impl IdentityStore for MemoryStore {
    fn register(&self, name: &str, employee_id: &str) -> StoreResult<Identity> {
        let (name, employee_id) = validate_identity(name, employee_id)?;
        let mut inner = self.lock()?;
        if inner.identities.contains_key(name) {
            return Err(StoreError::DuplicateIdentity(name.to_string()));
        }
        let identity = Identity {
            name: name.to_string(),
            employee_id: employee_id.to_string(),
        };
        inner.identities.insert(identity.name.clone(), identity.clone());
        Ok(identity)
    }

    fn lookup(&self, name: &str) -> StoreResult<Option<Identity>> {
        Ok(self.lock()?.identities.get(name).cloned())
    }

    fn list(&self) -> StoreResult<Vec<Identity>> {
        Ok(self.lock()?.identities.values().cloned().collect())
    }
}

impl DailyRecordStore for MemoryStore {
    fn ensure_partition(&self, day: NaiveDate) -> StoreResult<PartitionId> {
        let partition = PartitionId::for_day(day);
        self.lock()?.partitions.entry(partition).or_default();
        Ok(partition)
    }

    fn find_record(&self, day: NaiveDate, name: &str) -> StoreResult<Option<TimeRecord>> {
        let inner = self.guarded(name)?;
        Ok(inner
            .partitions
            .get(&PartitionId::for_day(day))
            .and_then(|records| records.get(name))
            .cloned())
    }

    fn find_all(&self, day: NaiveDate) -> StoreResult<Vec<TimeRecord>> {
        let inner = self.lock()?;
        Ok(inner
            .partitions
            .get(&PartitionId::for_day(day))
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    fn insert_entry(
        &self,
        day: NaiveDate,
        identity: &Identity,
        entry_time: NaiveTime,
    ) -> StoreResult<TimeRecord> {
        let mut inner = self.guarded(&identity.name)?;
        let partition = PartitionId::for_day(day);
        let records = inner
            .partitions
            .get_mut(&partition)
            .ok_or(StoreError::PartitionMissing(partition))?;
        if records.contains_key(&identity.name) {
            return Err(StoreError::DuplicateRecord {
                partition,
                name: identity.name.clone(),
            });
        }
        let record = TimeRecord {
            day,
            name: identity.name.clone(),
            employee_id: Some(identity.employee_id.clone()),
            entry_time: Some(entry_time),
            exit_time: None,
        };
        records.insert(record.name.clone(), record.clone());
        Ok(record)
    }

    fn record_exit(&self, day: NaiveDate, name: &str, exit_time: NaiveTime) -> StoreResult<TimeRecord> {
        let mut inner = self.guarded(name)?;
        let partition = PartitionId::for_day(day);
        let record = inner
            .partitions
            .get_mut(&partition)
            .and_then(|records| records.get_mut(name))
            .ok_or_else(|| StoreError::RecordNotFound {
                partition,
                name: name.to_string(),
            })?;
        record.exit_time = Some(exit_time);
        Ok(record.clone())
    }

    fn record_entry_if_missing(
        &self,
        day: NaiveDate,
        name: &str,
        entry_time: NaiveTime,
    ) -> StoreResult<bool> {
        let mut inner = self.guarded(name)?;
        let partition = PartitionId::for_day(day);
        let record = inner
            .partitions
            .get_mut(&partition)
            .and_then(|records| records.get_mut(name))
            .ok_or_else(|| StoreError::RecordNotFound {
                partition,
                name: name.to_string(),
            })?;
        if record.entry_time.is_some() {
            return Ok(false);
        }
        record.entry_time = Some(entry_time);
        Ok(true)
    }

    fn partitions(&self) -> StoreResult<Vec<PartitionId>> {
        Ok(self.lock()?.partitions.keys().copied().collect())
    }
}
