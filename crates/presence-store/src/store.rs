//! [`SqliteStore`] is the SQLite implementation of the identity and daily record stores.

use std::path::Path;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension as _, Transaction, TransactionBehavior};

use presence_core::store::validate_identity;
use presence_core::{DailyRecordStore, Identity, IdentityStore, PartitionId, StoreError, StoreResult, TimeRecord};

use crate::encode::{decode_day, encode_day, encode_time, RawRecord};
use crate::schema::{day_table, day_table_ddl, PRAGMAS, TABLES};
use crate::Result;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn unavailable(err: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Presence store backed by a single SQLite file.
///
/// Every trait write runs in its own IMMEDIATE transaction, so the
/// read-then-write steps inside one call cannot interleave with another
/// connection's writes.
pub struct SqliteStore {
    pub(crate) conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a store at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self {
            conn: Connection::open(path)?,
        };
        store.init()?;
        tracing::info!(path = %path.display(), "opened presence store");
        Ok(store)
    }

    /// Open an in-memory store, useful for testing.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init()?;
        Ok(store)
    }

    /// How long a write waits on a locked database before failing.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    fn init(&self) -> Result<()> {
        self.conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        self.conn.execute_batch(PRAGMAS)?;
        self.conn.execute_batch(TABLES)?;
        Ok(())
    }

    pub(crate) fn begin(&self, behavior: TransactionBehavior) -> StoreResult<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, behavior).map_err(unavailable)
    }

    /// Drop every day partition and the identity registry, then recreate the
    /// empty schema. Returns how many day partitions were dropped.
    pub fn clean(&self) -> Result<usize> {
        let tx = self.begin(TransactionBehavior::Immediate)?;

        // Sweep by name as well as by catalog so orphaned day tables go too.
        let tables: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'day\\_%' ESCAPE '\\'",
            )?;
            let rows = stmt.query_map([], |r| r.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        for table in &tables {
            // Table names come from sqlite_master; quote them anyway.
            tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\"", table.replace('"', "\"\"")))?;
        }
        tx.execute_batch("DROP TABLE IF EXISTS partitions; DROP TABLE IF EXISTS identities;")?;
        tx.execute_batch(TABLES)?;
        tx.commit()?;

        tracing::warn!(partitions = tables.len(), "presence store cleaned");
        Ok(tables.len())
    }

    fn catalog_day(tx: &Connection, partition: &PartitionId) -> StoreResult<Option<NaiveDate>> {
        let raw: Option<String> = tx
            .query_row(
                "SELECT day FROM partitions WHERE partition_key = ?1",
                params![partition.key()],
                |r| r.get(0),
            )
            .optional()
            .map_err(unavailable)?;
        raw.as_deref().map(decode_day).transpose()
    }

    /// Verify the partition exists and is bound to the requested day.
    fn existing_partition(conn: &Connection, day: NaiveDate) -> StoreResult<Option<PartitionId>> {
        let partition = PartitionId::for_day(day);
        match Self::catalog_day(conn, &partition)? {
            None => Ok(None),
            Some(existing) if existing == day => Ok(Some(partition)),
            Some(existing) => Err(StoreError::PartitionCollision {
                key: partition.key(),
                existing,
                requested: day,
            }),
        }
    }

    fn select_record(
        conn: &Connection,
        partition: &PartitionId,
        name: &str,
    ) -> StoreResult<Option<TimeRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE name = ?1",
            RawRecord::COLUMNS,
            day_table(partition)
        );
        let raw = conn
            .query_row(&sql, params![name], RawRecord::from_row)
            .optional()
            .map_err(unavailable)?;
        raw.map(|r| r.into_record(partition)).transpose()
    }
}

impl IdentityStore for SqliteStore {
    fn register(&self, name: &str, employee_id: &str) -> StoreResult<Identity> {
        let (name, employee_id) = validate_identity(name, employee_id)?;
        let tx = self.begin(TransactionBehavior::Immediate)?;
        match tx.execute(
            "INSERT INTO identities (name, employee_id) VALUES (?1, ?2)",
            params![name, employee_id],
        ) {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(StoreError::DuplicateIdentity(name.to_string()))
            }
            Err(e) => return Err(unavailable(e)),
        }
        tx.commit().map_err(unavailable)?;

        tracing::info!(name, employee_id, "identity registered");
        Ok(Identity {
            name: name.to_string(),
            employee_id: employee_id.to_string(),
        })
    }

    fn lookup(&self, name: &str) -> StoreResult<Option<Identity>> {
        self.conn
            .query_row(
                "SELECT name, employee_id FROM identities WHERE name = ?1",
                params![name],
                |r| {
                    Ok(Identity {
                        name: r.get(0)?,
                        employee_id: r.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(unavailable)
    }

    fn list(&self) -> StoreResult<Vec<Identity>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, employee_id FROM identities ORDER BY name")
            .map_err(unavailable)?;
        let rows = stmt
            .query_map([], |r| {
                Ok(Identity {
                    name: r.get(0)?,
                    employee_id: r.get(1)?,
                })
            })
            .map_err(unavailable)?;
        rows.collect::<rusqlite::Result<_>>().map_err(unavailable)
    }
}

impl DailyRecordStore for SqliteStore {
    fn ensure_partition(&self, day: NaiveDate) -> StoreResult<PartitionId> {
        let tx = self.begin(TransactionBehavior::Immediate)?;
        let partition = match Self::existing_partition(&tx, day)? {
            Some(partition) => partition,
            None => {
                let partition = PartitionId::for_day(day);
                tx.execute(
                    "INSERT INTO partitions (partition_key, day) VALUES (?1, ?2)",
                    params![partition.key(), encode_day(day)],
                )
                .map_err(unavailable)?;
                tracing::debug!(%partition, %day, "created day partition");
                partition
            }
        };
        tx.execute_batch(&day_table_ddl(&partition)).map_err(unavailable)?;
        tx.commit().map_err(unavailable)?;
        Ok(partition)
    }

    fn find_record(&self, day: NaiveDate, name: &str) -> StoreResult<Option<TimeRecord>> {
        match Self::existing_partition(&self.conn, day)? {
            Some(partition) => Self::select_record(&self.conn, &partition, name),
            None => Ok(None),
        }
    }

    fn find_all(&self, day: NaiveDate) -> StoreResult<Vec<TimeRecord>> {
        let Some(partition) = Self::existing_partition(&self.conn, day)? else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT {} FROM {} ORDER BY name",
            RawRecord::COLUMNS,
            day_table(&partition)
        );
        let mut stmt = self.conn.prepare(&sql).map_err(unavailable)?;
        let raw = stmt
            .query_map([], RawRecord::from_row)
            .map_err(unavailable)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(unavailable)?;
        raw.into_iter().map(|r| r.into_record(&partition)).collect()
    }

    fn insert_entry(
        &self,
        day: NaiveDate,
        identity: &Identity,
        entry_time: NaiveTime,
    ) -> StoreResult<TimeRecord> {
        let tx = self.begin(TransactionBehavior::Immediate)?;
        let partition = Self::existing_partition(&tx, day)?
            .ok_or(StoreError::PartitionMissing(PartitionId::for_day(day)))?;

        let sql = format!(
            "INSERT INTO {} (name, employee_id, entry_time, exit_time) VALUES (?1, ?2, ?3, NULL)",
            day_table(&partition)
        );
        match tx.execute(
            &sql,
            params![identity.name, identity.employee_id, encode_time(entry_time)],
        ) {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(StoreError::DuplicateRecord {
                    partition,
                    name: identity.name.clone(),
                })
            }
            Err(e) => return Err(unavailable(e)),
        }
        tx.commit().map_err(unavailable)?;

        Ok(TimeRecord {
            day,
            name: identity.name.clone(),
            employee_id: Some(identity.employee_id.clone()),
            entry_time: Some(entry_time),
            exit_time: None,
        })
    }

    fn record_exit(&self, day: NaiveDate, name: &str, exit_time: NaiveTime) -> StoreResult<TimeRecord> {
        let tx = self.begin(TransactionBehavior::Immediate)?;
        let partition = PartitionId::for_day(day);
        let not_found = || StoreError::RecordNotFound {
            partition,
            name: name.to_string(),
        };
        if Self::existing_partition(&tx, day)?.is_none() {
            return Err(not_found());
        }

        let sql = format!("UPDATE {} SET exit_time = ?1 WHERE name = ?2", day_table(&partition));
        let changed = tx
            .execute(&sql, params![encode_time(exit_time), name])
            .map_err(unavailable)?;
        if changed == 0 {
            return Err(not_found());
        }
        let record = Self::select_record(&tx, &partition, name)?.ok_or_else(not_found)?;
        tx.commit().map_err(unavailable)?;
        Ok(record)
    }

    fn record_entry_if_missing(
        &self,
        day: NaiveDate,
        name: &str,
        entry_time: NaiveTime,
    ) -> StoreResult<bool> {
        let tx = self.begin(TransactionBehavior::Immediate)?;
        let partition = PartitionId::for_day(day);
        let not_found = || StoreError::RecordNotFound {
            partition,
            name: name.to_string(),
        };
        if Self::existing_partition(&tx, day)?.is_none() {
            return Err(not_found());
        }
        if Self::select_record(&tx, &partition, name)?.is_none() {
            return Err(not_found());
        }

        let sql = format!(
            "UPDATE {} SET entry_time = ?1 WHERE name = ?2 AND (entry_time IS NULL OR entry_time = '')",
            day_table(&partition)
        );
        let filled = tx
            .execute(&sql, params![encode_time(entry_time), name])
            .map_err(unavailable)?
            > 0;
        tx.commit().map_err(unavailable)?;
        Ok(filled)
    }

    fn partitions(&self) -> StoreResult<Vec<PartitionId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT day FROM partitions ORDER BY day")
            .map_err(unavailable)?;
        let days = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(unavailable)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(unavailable)?;
        days.iter()
            .map(|raw| decode_day(raw).map(PartitionId::for_day))
            .collect()
    }
}
