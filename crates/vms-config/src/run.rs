//! Run-level tuning.

use serde::{Deserialize, Serialize};

use crate::ConfigError;

const fn default_fetch_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Pages fetched in parallel within one kind when the CRM supports
    /// offset cursors. Writes stay serialized regardless.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: default_fetch_concurrency(),
        }
    }
}

impl RunConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_concurrency == 0 {
            return Err(ConfigError::invalid(
                "sync.fetch_concurrency",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}
