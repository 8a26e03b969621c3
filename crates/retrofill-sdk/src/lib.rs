//! Connector-facing API for retrofill.
//!
//! Sources implement [`connector::RecordSource`], destinations implement
//! [`connector::Destination`]. [`query::FieldFilter`] is the shared
//! field/operator/value predicate used both for source-side query filters
//! and for the engine's constraint predicate.

pub mod connector;
pub mod prelude;
pub mod query;
