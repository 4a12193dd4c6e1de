//! # vms-config
//!
//! Layered configuration loading for VMS sync using figment.
//!
//! Configuration sources (in priority order, highest wins):
//! 1. Environment variables (`VMS_*` prefix, `__` as separator)
//! 2. Project-level `.vms/config.toml`
//! 3. User-level `~/.config/vms-sync/config.toml`
//! 4. Built-in defaults
//!
//! # Environment Variable Mapping
//!
//! Figment maps `VMS_CRM__BASE_URL` -> `crm.base_url`,
//! `VMS_RETRY__MAX_ATTEMPTS` -> `retry.max_attempts`, etc.
//!
//! # Usage
//!
//! ```no_run
//! use vms_config::SyncConfig;
//!
//! let config = SyncConfig::load_with_dotenv().expect("config");
//! config.validate().expect("valid config");
//!
//! if config.crm.is_configured() {
//!     println!("CRM login: {}", config.crm.base_url);
//! }
//! ```

mod crm;
mod error;
mod retry;
mod run;
mod store;
mod validation;

pub use crm::CrmConfig;
pub use error::ConfigError;
pub use retry::RetryConfig;
pub use run::RunConfig;
pub use store::StoreConfig;
pub use validation::ValidationConfig;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete sync configuration handed to the orchestrator.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub crm: CrmConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sync: RunConfig,
}

impl SyncConfig {
    /// Load configuration from all sources (TOML files + environment variables).
    ///
    /// Does NOT call `dotenvy`; use [`Self::load_with_dotenv`] for `.env` support.
    pub fn load() -> Result<Self, ConfigError> {
        Self::figment().extract().map_err(ConfigError::from)
    }

    /// Load configuration after reading `.env` from the current directory
    /// or the workspace root.
    pub fn load_with_dotenv() -> Result<Self, ConfigError> {
        Self::load_dotenv();
        Self::load()
    }

    /// Build the figment provider chain.
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            figment = figment.merge(Toml::file(global_path));
        }

        let local_path = PathBuf::from(".vms").join("config.toml");
        if local_path.exists() {
            figment = figment.merge(Toml::file(local_path));
        }

        figment.merge(Env::prefixed("VMS_").split("__"))
    }

    /// Reject values that would make a run misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.crm.validate()?;
        self.validation.validate()?;
        self.retry.validate()?;
        self.store.validate()?;
        self.sync.validate()?;
        Ok(())
    }

    /// Same as [`Self::validate`] but also requires CRM credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotConfigured`] when the `crm` section lacks
    /// credentials.
    pub fn validate_for_sync(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if !self.crm.is_configured() {
            return Err(ConfigError::NotConfigured {
                section: "crm".to_string(),
            });
        }
        Ok(())
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("vms-sync").join("config.toml"))
    }

    fn load_dotenv() {
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let mut dir = PathBuf::from(manifest_dir);
            // crate -> crates/ -> workspace root
            for _ in 0..3 {
                let env_path = dir.join(".env");
                if env_path.exists() {
                    let _ = dotenvy::from_path(&env_path);
                    return;
                }
                if !dir.pop() {
                    break;
                }
            }
        }

        let _ = dotenvy::dotenv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_but_not_configured() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.crm.is_configured());
        assert!(matches!(
            config.validate_for_sync(),
            Err(ConfigError::NotConfigured { .. })
        ));
    }

    #[test]
    fn validate_reports_offending_field() {
        let mut config = SyncConfig::default();
        config.sync.fetch_concurrency = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sync.fetch_concurrency"));
    }
}
