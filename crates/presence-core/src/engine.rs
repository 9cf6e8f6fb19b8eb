//! Snapshot diffing and time-record updates.
//!
//! Each engine owns the previous snapshot of exactly one session. First
//! entry of the day wins; last exit of the day wins.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::store::{DailyRecordStore, IdentityStore, StoreError};
use crate::types::{Anomaly, AnomalyKind, PresenceDelta, Snapshot};

impl From<StoreError> for AnomalyKind {
    fn from(err: StoreError) -> Self {
        AnomalyKind::Storage(err.to_string())
    }
}

pub struct PresenceDiffEngine<S> {
    store: S,
    previous: Snapshot,
}

impl<S> PresenceDiffEngine<S>
where
    S: IdentityStore + DailyRecordStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            previous: Snapshot::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Snapshot seen on the last call to [`observe`](Self::observe).
    pub fn previous(&self) -> &Snapshot {
        &self.previous
    }

    /// Forget the previous snapshot, as if the session had just started.
    pub fn reset(&mut self) {
        self.previous = Snapshot::new();
    }

    /// Diff `current` against the previous snapshot and persist the result.
    ///
    /// Per-name storage failures are reported as anomalies in the returned
    /// delta and never stop the remaining names from being processed. The
    /// previous snapshot always advances to `current`.
    pub fn observe(&mut self, current: Snapshot, now: NaiveDateTime) -> PresenceDelta {
        let at = now.with_nanosecond(0).unwrap_or(now);
        let day = at.date();
        let time = at.time();

        let entered = current.difference(&self.previous);
        let exited = self.previous.difference(&current);
        let mut anomalies = Vec::new();

        if !entered.is_empty() {
            match self.store.ensure_partition(day) {
                Ok(partition) => {
                    for name in &entered {
                        if let Err(kind) = self.persist_entry(day, name, time) {
                            anomalies.push(Anomaly { name: name.clone(), kind });
                        } else {
                            tracing::info!(name = %name, %partition, %time, "entered");
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, %day, "cannot create day partition");
                    anomalies.extend(entered.iter().map(|name| Anomaly {
                        name: name.clone(),
                        kind: err.clone().into(),
                    }));
                }
            }
        }

        for name in &exited {
            if let Err(kind) = self.persist_exit(day, name, time) {
                anomalies.push(Anomaly { name: name.clone(), kind });
            } else {
                tracing::info!(name = %name, %day, %time, "exited");
            }
        }

        for anomaly in &anomalies {
            match &anomaly.kind {
                AnomalyKind::Storage(msg) => {
                    tracing::error!(name = %anomaly.name, error = %msg, "presence write failed")
                }
                kind => tracing::warn!(name = %anomaly.name, ?kind, "presence write skipped"),
            }
        }

        self.previous = current;

        PresenceDelta {
            at,
            entered,
            exited,
            anomalies,
        }
    }

    fn persist_entry(&self, day: NaiveDate, name: &str, time: NaiveTime) -> Result<(), AnomalyKind> {
        match self.store.find_record(day, name)? {
            Some(record) if record.entry_time.is_some() => {
                tracing::debug!(name, "re-entry keeps first entry time");
                Ok(())
            }
            Some(_) => {
                self.store.record_entry_if_missing(day, name, time)?;
                Ok(())
            }
            None => {
                let identity = self.store.lookup(name)?.ok_or(AnomalyKind::Unregistered)?;
                match self.store.insert_entry(day, &identity, time) {
                    Ok(_) => Ok(()),
                    // Another writer created the record after our lookup.
                    Err(StoreError::DuplicateRecord { .. }) => {
                        self.store.record_entry_if_missing(day, name, time)?;
                        Ok(())
                    }
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    fn persist_exit(&self, day: NaiveDate, name: &str, time: NaiveTime) -> Result<(), AnomalyKind> {
        if self.store.find_record(day, name)?.is_none() {
            return Err(AnomalyKind::ExitWithoutEntry);
        }
        match self.store.record_exit(day, name, time) {
            Ok(_) => Ok(()),
            Err(StoreError::RecordNotFound { .. }) => Err(AnomalyKind::ExitWithoutEntry),
            Err(err) => Err(err.into()),
        }
    }
}
