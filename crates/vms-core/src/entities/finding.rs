use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::entities::RecordRef;
use crate::enums::Severity;

/// One rule violation attached to a run's report.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ValidationFinding {
    pub rule_id: String,
    pub severity: Severity,
    pub record: RecordRef,
    pub message: String,
}

impl ValidationFinding {
    #[must_use]
    pub fn error(rule_id: &str, record: RecordRef, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            severity: Severity::Error,
            record,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn warning(rule_id: &str, record: RecordRef, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            severity: Severity::Warning,
            record,
            message: message.into(),
        }
    }
}
