use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::enums::RecordKind;

/// Field name → raw value, ordered by field name.
pub type Fields = BTreeMap<String, serde_json::Value>;

/// Read a field as text. Strings are trimmed, numbers and booleans are
/// rendered, `null` and blank strings read as `None`.
#[must_use]
pub fn field_text(fields: &Fields, name: &str) -> Option<String> {
    match fields.get(name)? {
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Null | serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            None
        }
    }
}

/// One CRM-origin entity snapshot. Produced by the fetch step and consumed by
/// the reconciler; never persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ExternalRecord {
    /// Raw CRM identifier; validated by the identity resolver.
    pub external_id: String,
    pub kind: RecordKind,
    pub fields: Fields,
    pub last_modified: Option<DateTime<Utc>>,
}

impl ExternalRecord {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<String> {
        field_text(&self.fields, name)
    }

    /// District carried directly on the record, if its kind has a district field.
    #[must_use]
    pub fn own_district(&self) -> Option<String> {
        self.kind
            .spec()
            .district_field
            .and_then(|field| self.field(field))
    }
}

/// Persisted counterpart of an external record.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct LocalRecord {
    pub id: String,
    pub kind: RecordKind,
    pub external_id: String,
    pub fields: Fields,
    pub district: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl LocalRecord {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<String> {
        field_text(&self.fields, name)
    }

    #[must_use]
    pub fn reference(&self) -> RecordRef {
        RecordRef {
            kind: self.kind,
            external_id: self.external_id.clone(),
            district: self.district.clone(),
        }
    }
}

/// Join row between an event and a student local record.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ParticipationLink {
    pub id: String,
    /// Local record backing this link (kind `participation_link`).
    pub record_id: String,
    pub event_id: String,
    pub student_id: String,
    pub created_at: DateTime<Utc>,
}

/// Reference to the record a finding or decision is about.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct RecordRef {
    pub kind: RecordKind,
    pub external_id: String,
    pub district: Option<String>,
}

impl RecordRef {
    #[must_use]
    pub fn new(kind: RecordKind, external_id: impl Into<String>, district: Option<String>) -> Self {
        Self {
            kind,
            external_id: external_id.into(),
            district,
        }
    }
}
