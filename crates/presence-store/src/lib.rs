//! SQLite backend for presence tracking.
//!
//! One table per calendar day (`day_MMDDYYYY`), a catalog binding each
//! partition key to its date, and the identity registry.

mod encode;
mod export;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
