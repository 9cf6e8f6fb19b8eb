//! SQL schema for the presence SQLite store.
//!
//! Day tables are created on demand by `ensure_partition`; only the
//! registry and the partition catalog live here.

use presence_core::PartitionId;

/// Connection-level settings. Must run outside a transaction.
pub const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
";

/// Registry and catalog DDL; idempotent.
pub const TABLES: &str = "
CREATE TABLE IF NOT EXISTS identities (
    name        TEXT PRIMARY KEY,
    employee_id TEXT NOT NULL
);

-- One row per day partition. The key is MMDDYYYY, the day is ISO 8601.
CREATE TABLE IF NOT EXISTS partitions (
    partition_key TEXT PRIMARY KEY,
    day           TEXT NOT NULL UNIQUE
);

PRAGMA user_version = 1;
";

/// Physical table name for a partition. Only ever built from a validated key.
pub fn day_table(partition: &PartitionId) -> String {
    format!("day_{}", partition.key())
}

pub fn day_table_ddl(partition: &PartitionId) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            name        TEXT PRIMARY KEY,
            employee_id TEXT,
            entry_time  TEXT,   -- HH:MM:SS, NULL until first entry
            exit_time   TEXT    -- HH:MM:SS, overwritten by every exit
        )",
        day_table(partition)
    )
}
