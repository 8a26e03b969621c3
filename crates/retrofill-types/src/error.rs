//! Structured error model for connector operations.
//!
//! [`ConnectorError`] carries a classification, a stable code, and optional
//! diagnostic details. Construct via the category-specific factory methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a connector error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid connector configuration or unreadable input.
    Config,
    /// Network-level failure talking to the store.
    TransientNetwork,
    /// Store-side failure (lock contention, constraint, I/O).
    TransientDb,
    /// Store quota or page/group size limit exceeded.
    Quota,
    /// Invalid or corrupt record data.
    Data,
    /// Bug or unexpected state inside the connector.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::TransientNetwork => "transient_network",
            Self::TransientDb => "transient_db",
            Self::Quota => "quota",
            Self::Data => "data",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Validation check outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Success,
    Failed,
    Warning,
}

/// Result of a connectivity or configuration check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    pub message: String,
}

impl ValidationResult {
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ValidationStatus::Success,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ValidationStatus::Failed,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ValidationStatus::Success
    }
}

/// Structured error from a connector operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct ConnectorError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ConnectorError {
    fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Configuration error.
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, code, message)
    }

    /// Transient network error.
    #[must_use]
    pub fn transient_network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientNetwork, code, message)
    }

    /// Transient database error.
    #[must_use]
    pub fn transient_db(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientDb, code, message)
    }

    /// Quota or size-limit error.
    #[must_use]
    pub fn quota(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Quota, code, message)
    }

    /// Data error.
    #[must_use]
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Data, code, message)
    }

    /// Internal connector error.
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, code, message)
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
