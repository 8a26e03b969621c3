//! Common imports for connector crates.

pub use crate::connector::{DocumentId, Destination, RecordSource, DEFAULT_MAX_GROUP_SIZE};
pub use crate::query::{FieldFilter, FilterOp};

pub use retrofill_types::cursor::{compare_keys, position_cmp, Cursor};
pub use retrofill_types::error::{ConnectorError, ErrorCategory, ValidationResult, ValidationStatus};
pub use retrofill_types::record::{DerivedRecord, Page, SourceRecord};
