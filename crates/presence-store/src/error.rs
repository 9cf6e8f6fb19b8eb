//! Error type for `presence-store` operations outside the storage traits.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] presence_core::StoreError),

    /// Export target already exists; exports never overwrite.
    #[error("export file already exists: {}", .0.display())]
    ExportExists(PathBuf),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
