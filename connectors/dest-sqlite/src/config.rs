//! Destination `SQLite` connector configuration.

use std::path::PathBuf;

use retrofill_sdk::prelude::*;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Database file, created if missing.
    pub path: PathBuf,
    /// Largest group committed in one transaction.
    #[serde(default = "default_max_group_size")]
    pub max_group_size: usize,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_max_group_size() -> usize {
    DEFAULT_MAX_GROUP_SIZE
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Config {
    /// # Errors
    ///
    /// Returns a config error when the group cap is zero.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.max_group_size == 0 {
            return Err(ConnectorError::config(
                "INVALID_GROUP_CAP",
                "max_group_size must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let cfg: Config = serde_json::from_value(serde_json::json!({"path": "d.db"})).unwrap();
        assert_eq!(cfg.max_group_size, 500);
        assert_eq!(cfg.busy_timeout_ms, 5_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_group_cap_rejected() {
        let cfg: Config =
            serde_json::from_value(serde_json::json!({"path": "d.db", "max_group_size": 0}))
                .unwrap();
        assert_eq!(cfg.validate().unwrap_err().code, "INVALID_GROUP_CAP");
    }
}
