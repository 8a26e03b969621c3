//! Destination connector appending derived records to a `SQLite` table.
//!
//! Each entry gets a generated UUID and a creation timestamp. Grouped
//! creates commit inside one transaction.

pub mod config;
pub mod sink;

pub use config::Config;
pub use sink::SqliteDestination;
