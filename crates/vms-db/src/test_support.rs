//! Shared test utilities for vms-db unit tests.

use chrono::{DateTime, Utc};
use serde_json::json;

use vms_core::entities::{Fields, LocalRecord};
use vms_core::enums::RecordKind;

use crate::service::SyncStore;

pub async fn test_store() -> SyncStore {
    SyncStore::open(":memory:").await.unwrap()
}

pub fn fields(pairs: &[(&str, serde_json::Value)]) -> Fields {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// External IDs padded to 18 characters, e.g. `sf_id("003", 1)`.
pub fn sf_id(prefix: &str, n: u32) -> String {
    format!("{prefix}{n:0>width$}", width = 18 - prefix.len())
}

pub async fn insert_student(
    store: &SyncStore,
    n: u32,
    district: &str,
    updated_at: DateTime<Utc>,
) -> LocalRecord {
    store
        .insert_record(
            RecordKind::Student,
            &sf_id("003", n),
            &fields(&[("district", json!(district)), ("grade", json!(7))]),
            Some(district),
            updated_at,
            Some(updated_at),
        )
        .await
        .unwrap()
}
