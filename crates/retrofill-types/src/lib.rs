//! Shared retrofill data model.
//!
//! Pure data types used by the engine, the state backend, and connectors.
//! Nothing in this crate performs I/O.

#![warn(clippy::pedantic)]

pub mod cursor;
pub mod envelope;
pub mod error;
pub mod metric;
pub mod record;
pub mod state;
