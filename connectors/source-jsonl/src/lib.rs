//! Source connector over a JSON-lines export.
//!
//! The file is read once at open time into an index sorted on
//! `(sort key, id)`; pages are then served from memory by cursor.

pub mod config;
pub mod source;

pub use config::Config;
pub use source::JsonlSource;
