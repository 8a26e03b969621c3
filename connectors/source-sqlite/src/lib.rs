//! Source connector reading a SQLite "document collection".
//!
//! A collection is a table with an id column and a JSON body column. Query
//! filters and the sort key are evaluated server-side with `json_extract`,
//! and pages are keyset-paginated on `(sort key, id)`.

pub mod config;
pub mod query;
pub mod source;

pub use config::Config;
pub use source::SqliteSource;
