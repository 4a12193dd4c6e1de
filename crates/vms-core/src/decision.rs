//! Reconciliation decisions and field diffs.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::entities::{ExternalRecord, Fields, RecordRef};

/// One changed field between local and source state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub local: Option<serde_json::Value>,
    pub source: Option<serde_json::Value>,
}

/// Compare two field maps. `null` and a missing key are treated as equal.
#[must_use]
pub fn diff_fields(local: &Fields, source: &Fields) -> Vec<FieldChange> {
    let present = |fields: &Fields, key: &str| {
        fields
            .get(key)
            .filter(|value| !value.is_null())
            .cloned()
    };

    let keys: BTreeSet<&String> = local.keys().chain(source.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let l = present(local, key);
            let s = present(source, key);
            (l != s).then(|| FieldChange {
                field: key.clone(),
                local: l,
                source: s,
            })
        })
        .collect()
}

/// Per-record output of the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReconciliationDecision {
    /// No local record exists for this external ID.
    Create { record: ExternalRecord },
    /// Source differs and may overwrite local state.
    Update {
        record: ExternalRecord,
        local_id: String,
        diff: Vec<FieldChange>,
    },
    /// Source and local agree.
    NoOp { target: RecordRef, local_id: String },
    /// Local edits are newer than the source and would be clobbered.
    Conflict {
        target: RecordRef,
        local_id: String,
        diff: Vec<FieldChange>,
        local_updated_at: DateTime<Utc>,
        source_modified: Option<DateTime<Utc>>,
    },
}

impl ReconciliationDecision {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::NoOp { .. } => "no_op",
            Self::Conflict { .. } => "conflict",
        }
    }

    #[must_use]
    pub fn external_id(&self) -> &str {
        match self {
            Self::Create { record } | Self::Update { record, .. } => &record.external_id,
            Self::NoOp { target, .. } | Self::Conflict { target, .. } => &target.external_id,
        }
    }

    #[must_use]
    pub fn diff(&self) -> &[FieldChange] {
        match self {
            Self::Update { diff, .. } | Self::Conflict { diff, .. } => diff,
            Self::Create { .. } | Self::NoOp { .. } => &[],
        }
    }
}
