//! Flat delimited dump of every table: registry first, then each day.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use presence_core::DailyRecordStore;
use rusqlite::TransactionBehavior;

use crate::schema::day_table;
use crate::store::SqliteStore;
use crate::{Error, Result};

/// Quote a field if it contains a delimiter, quote or line break.
fn escape_field(s: &str) -> String {
    if s.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn write_row<W: Write>(out: &mut W, fields: &[String]) -> std::io::Result<()> {
    let line: Vec<String> = fields.iter().map(|f| escape_field(f)).collect();
    writeln!(out, "{}", line.join(","))
}

impl SqliteStore {
    /// Write `presence_export_YYYYMMDD_HHMMSS.csv` into `dir` and return its path.
    ///
    /// Fails with [`Error::ExportExists`] rather than overwrite an earlier export.
    pub fn export_csv(&self, dir: impl AsRef<Path>, now: NaiveDateTime) -> Result<PathBuf> {
        let path = dir
            .as_ref()
            .join(format!("presence_export_{}.csv", now.format("%Y%m%d_%H%M%S")));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => Error::ExportExists(path.clone()),
                _ => Error::Io(e),
            })?;
        let mut out = BufWriter::new(file);

        let written = self.dump_all(&mut out).and_then(|n| {
            out.flush()?;
            Ok(n)
        });
        drop(out);
        let partitions = match written {
            Ok(n) => n,
            Err(err) => {
                // A partial file would also block a retry within the same second.
                if let Err(rm) = std::fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %rm, "cannot remove partial export");
                }
                return Err(err);
            }
        };

        tracing::info!(path = %path.display(), partitions, "exported presence data");
        Ok(path)
    }

    /// Dump the registry and every day table; returns the partition count.
    fn dump_all<W: Write>(&self, out: &mut W) -> Result<usize> {
        // Deferred read transaction: one consistent view across all tables.
        let tx = self.begin(TransactionBehavior::Deferred)?;
        let partitions = self.partitions()?;

        self.dump_table(out, "identities", "ORDER BY name")?;
        for partition in &partitions {
            self.dump_table(out, &day_table(partition), "ORDER BY name")?;
        }
        tx.finish()?;
        Ok(partitions.len())
    }

    fn dump_table<W: Write>(&self, out: &mut W, table: &str, order: &str) -> Result<()> {
        let mut stmt = self.conn.prepare(&format!("SELECT * FROM {table} {order}"))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        writeln!(out, "Table: {table}")?;
        write_row(out, &columns)?;

        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let fields = (0..columns.len())
                .map(|i| row.get::<_, Option<String>>(i).map(Option::unwrap_or_default))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            write_row(out, &fields)?;
        }
        Ok(())
    }
}
