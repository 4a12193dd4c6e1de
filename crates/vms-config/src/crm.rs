//! Salesforce CRM connection configuration.

use serde::{Deserialize, Serialize};

use crate::ConfigError;

fn default_base_url() -> String {
    "https://login.salesforce.com".to_string()
}

fn default_api_version() -> String {
    "v59.0".to_string()
}

/// Default page size requested per query batch (Salesforce caps at 2000).
const fn default_page_size() -> u32 {
    2000
}

const fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrmConfig {
    /// Login host used for the OAuth token exchange
    /// (e.g. `https://login.salesforce.com` or a My Domain URL).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// REST API version segment, e.g. `v59.0`.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Appended to the password for the password grant.
    #[serde(default)]
    pub security_token: String,

    /// Connected app consumer key.
    #[serde(default)]
    pub client_id: String,

    /// Connected app consumer secret.
    #[serde(default)]
    pub client_secret: String,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_version: default_api_version(),
            username: String::new(),
            password: String::new(),
            security_token: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CrmConfig {
    /// Check if the credentials needed for the password grant are present.
    pub fn is_configured(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty() && !self.client_id.is_empty()
    }

    /// Token endpoint derived from the base URL.
    pub fn token_url(&self) -> String {
        format!(
            "{}/services/oauth2/token",
            self.base_url.trim_end_matches('/')
        )
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("https://") || self.base_url.starts_with("http://")) {
            return Err(ConfigError::invalid(
                "crm.base_url",
                format!("expected an http(s) URL, got '{}'", self.base_url),
            ));
        }
        if !self.api_version.starts_with('v') {
            return Err(ConfigError::invalid(
                "crm.api_version",
                format!("expected a version like 'v59.0', got '{}'", self.api_version),
            ));
        }
        if self.page_size == 0 || self.page_size > 2000 {
            return Err(ConfigError::invalid(
                "crm.page_size",
                "must be between 1 and 2000",
            ));
        }
        Ok(())
    }
}
