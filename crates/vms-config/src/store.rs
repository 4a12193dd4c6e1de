//! Local store location and scope-lock timing.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

fn default_db_path() -> PathBuf {
    PathBuf::from(".vms").join("vms.db")
}

/// Zero means a second run for a busy scope is rejected immediately.
const fn default_lock_wait_secs() -> u64 {
    0
}

const fn default_lock_stale_after_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Path of the libSQL database file. `:memory:` opens a transient store.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// How long a run waits for a held scope lock before giving up.
    #[serde(default = "default_lock_wait_secs")]
    pub lock_wait_secs: u64,

    /// Locks older than this are treated as abandoned and reclaimed.
    #[serde(default = "default_lock_stale_after_secs")]
    pub lock_stale_after_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            lock_wait_secs: default_lock_wait_secs(),
            lock_stale_after_secs: default_lock_stale_after_secs(),
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub const fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }

    #[must_use]
    pub const fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_after_secs)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("store.db_path", "must not be empty"));
        }
        if self.lock_stale_after_secs == 0 {
            return Err(ConfigError::invalid(
                "store.lock_stale_after_secs",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}
