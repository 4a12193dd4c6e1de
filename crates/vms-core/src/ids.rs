//! Local ID prefixes and the external CRM identifier contract.
//!
//! Local IDs are `{prefix}-{8 hex}` strings generated by the store. External
//! IDs are Salesforce case-safe identifiers: exactly 18 ASCII alphanumeric
//! characters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::enums::RecordKind;
use crate::errors::CoreError;

pub const PREFIX_RECORD: &str = "rec";
pub const PREFIX_LINK: &str = "lnk";
pub const PREFIX_USER: &str = "usr";
pub const PREFIX_RUN: &str = "run";
pub const PREFIX_FINDING: &str = "fnd";

pub const ALL_PREFIXES: &[&str] = &[
    PREFIX_RECORD,
    PREFIX_LINK,
    PREFIX_USER,
    PREFIX_RUN,
    PREFIX_FINDING,
];

/// Length of a case-safe CRM identifier.
pub const EXTERNAL_ID_LEN: usize = 18;

/// A CRM identifier that passed its kind's format rule.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct ExternalId(String);

impl ExternalId {
    /// Validate `raw` against the format rule of `kind`.
    ///
    /// Surrounding whitespace is ignored; the stored value is the trimmed one.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidIdentifier` when the length or alphabet
    /// does not match.
    pub fn parse(kind: RecordKind, raw: &str) -> Result<Self, CoreError> {
        let value = raw.trim();
        let expected = kind.spec().id_length;
        let invalid = |reason: String| CoreError::InvalidIdentifier {
            kind: kind.as_str().to_string(),
            value: raw.to_string(),
            reason,
        };

        if value.len() != expected {
            return Err(invalid(format!(
                "expected {expected} characters, got {}",
                value.len()
            )));
        }
        if let Some(bad) = value.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(invalid(format!("unexpected character '{bad}'")));
        }
        Ok(Self(value.to_string()))
    }

    /// Whether `raw` would pass [`Self::parse`] for `kind`.
    #[must_use]
    pub fn is_valid(kind: RecordKind, raw: &str) -> bool {
        Self::parse(kind, raw).is_ok()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ExternalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
