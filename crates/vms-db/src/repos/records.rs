//! Local record repository: the mirror of CRM records keyed by
//! (kind, external ID).

use chrono::{DateTime, Utc};

use vms_core::entities::{Fields, LocalRecord};
use vms_core::enums::RecordKind;
use vms_core::ids::PREFIX_RECORD;

use crate::error::DatabaseError;
use crate::helpers::{
    fields_to_json, get_opt_string, parse_datetime, parse_enum, parse_fields,
    parse_optional_datetime,
};
use crate::service::SyncStore;

const RECORD_COLUMNS: &str = "id, kind, external_id, fields, district, updated_at, synced_at";

fn row_to_record(row: &libsql::Row) -> Result<LocalRecord, DatabaseError> {
    Ok(LocalRecord {
        id: row.get::<String>(0)?,
        kind: parse_enum(&row.get::<String>(1)?)?,
        external_id: row.get::<String>(2)?,
        fields: parse_fields(&row.get::<String>(3)?)?,
        district: get_opt_string(row, 4)?,
        updated_at: parse_datetime(&row.get::<String>(5)?)?,
        synced_at: parse_optional_datetime(get_opt_string(row, 6)?.as_deref())?,
    })
}

impl SyncStore {
    /// Insert a new record. Fails with `DatabaseError::Constraint` if the
    /// (kind, external ID) pair already exists.
    pub async fn insert_record(
        &self,
        kind: RecordKind,
        external_id: &str,
        fields: &Fields,
        district: Option<&str>,
        updated_at: DateTime<Utc>,
        synced_at: Option<DateTime<Utc>>,
    ) -> Result<LocalRecord, DatabaseError> {
        let id = self.db().generate_id(PREFIX_RECORD).await?;
        self.db()
            .execute(
                "INSERT INTO records (id, kind, external_id, fields, district, updated_at, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                libsql::params![
                    id.as_str(),
                    kind.as_str(),
                    external_id,
                    fields_to_json(fields)?,
                    district,
                    updated_at.to_rfc3339(),
                    synced_at.map(|t| t.to_rfc3339())
                ],
            )
            .await?;

        Ok(LocalRecord {
            id,
            kind,
            external_id: external_id.to_string(),
            fields: fields.clone(),
            district: district.map(str::to_string),
            updated_at,
            synced_at,
        })
    }

    /// Overwrite the fields of an existing record.
    pub async fn update_record(
        &self,
        id: &str,
        fields: &Fields,
        district: Option<&str>,
        updated_at: DateTime<Utc>,
        synced_at: Option<DateTime<Utc>>,
    ) -> Result<LocalRecord, DatabaseError> {
        let changed = self
            .db()
            .execute(
                "UPDATE records SET fields = ?2, district = ?3, updated_at = ?4, synced_at = ?5
                 WHERE id = ?1",
                libsql::params![
                    id,
                    fields_to_json(fields)?,
                    district,
                    updated_at.to_rfc3339(),
                    synced_at.map(|t| t.to_rfc3339())
                ],
            )
            .await?;
        if changed == 0 {
            return Err(DatabaseError::NoResult);
        }
        self.get_record(id).await
    }

    /// Record a local edit: new fields, `updated_at` now, `synced_at` untouched.
    pub async fn edit_record_locally(
        &self,
        id: &str,
        fields: &Fields,
    ) -> Result<LocalRecord, DatabaseError> {
        let changed = self
            .db()
            .execute(
                "UPDATE records SET fields = ?2, updated_at = ?3 WHERE id = ?1",
                libsql::params![id, fields_to_json(fields)?, Utc::now().to_rfc3339()],
            )
            .await?;
        if changed == 0 {
            return Err(DatabaseError::NoResult);
        }
        self.get_record(id).await
    }

    pub async fn get_record(&self, id: &str) -> Result<LocalRecord, DatabaseError> {
        let mut rows = self
            .db()
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"),
                [id],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        row_to_record(&row)
    }

    /// Look up a record by its identity. `None` when absent.
    pub async fn find_record(
        &self,
        kind: RecordKind,
        external_id: &str,
    ) -> Result<Option<LocalRecord>, DatabaseError> {
        let mut rows = self
            .db()
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE kind = ?1 AND external_id = ?2"
                ),
                [kind.as_str(), external_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    /// All records of a kind, ordered by external ID.
    pub async fn list_records(&self, kind: RecordKind) -> Result<Vec<LocalRecord>, DatabaseError> {
        let mut rows = self
            .db()
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE kind = ?1 ORDER BY external_id"
                ),
                [kind.as_str()],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    pub async fn count_records(&self, kind: RecordKind) -> Result<u64, DatabaseError> {
        let mut rows = self
            .db()
            .query(
                "SELECT COUNT(*) FROM records WHERE kind = ?1",
                [kind.as_str()],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let count = row.get::<i64>(0)?;
        u64::try_from(count).map_err(|e| DatabaseError::InvalidState(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::test_support::{fields, insert_student, sf_id, test_store};

    #[tokio::test]
    async fn insert_and_find_roundtrip() {
        let store = test_store().await;
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let created = insert_student(&store, 1, "D1", at).await;

        assert!(created.id.starts_with("rec-"));
        let found = store
            .find_record(RecordKind::Student, &sf_id("003", 1))
            .await
            .unwrap()
            .expect("record exists");
        assert_eq!(found, created);
        assert_eq!(found.district.as_deref(), Some("D1"));
        assert_eq!(found.updated_at, at);
    }

    #[tokio::test]
    async fn find_is_kind_scoped() {
        let store = test_store().await;
        insert_student(&store, 1, "D1", Utc::now()).await;
        let other = store
            .find_record(RecordKind::Event, &sf_id("003", 1))
            .await
            .unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn duplicate_identity_rejected() {
        let store = test_store().await;
        insert_student(&store, 1, "D1", Utc::now()).await;
        let err = store
            .insert_record(
                RecordKind::Student,
                &sf_id("003", 1),
                &fields(&[]),
                None,
                Utc::now(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
        assert_eq!(store.count_records(RecordKind::Student).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_overwrites_fields_and_timestamps() {
        let store = test_store().await;
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let record = insert_student(&store, 1, "D1", at).await;

        let later = at + Duration::hours(2);
        let updated = store
            .update_record(
                &record.id,
                &fields(&[("district", json!("D2")), ("grade", json!(8))]),
                Some("D2"),
                later,
                Some(later),
            )
            .await
            .unwrap();
        assert_eq!(updated.district.as_deref(), Some("D2"));
        assert_eq!(updated.fields["grade"], json!(8));
        assert_eq!(updated.updated_at, later);
    }

    #[tokio::test]
    async fn local_edit_bumps_updated_at_only() {
        let store = test_store().await;
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let record = insert_student(&store, 1, "D1", at).await;

        let edited = store
            .edit_record_locally(&record.id, &fields(&[("grade", json!(9))]))
            .await
            .unwrap();
        assert!(edited.updated_at > at);
        assert_eq!(edited.synced_at, Some(at));
    }

    #[tokio::test]
    async fn update_missing_record_is_no_result() {
        let store = test_store().await;
        let err = store
            .update_record("rec-deadbeef", &fields(&[]), None, Utc::now(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NoResult));
    }

    #[tokio::test]
    async fn list_orders_by_external_id() {
        let store = test_store().await;
        insert_student(&store, 2, "D1", Utc::now()).await;
        insert_student(&store, 1, "D2", Utc::now()).await;
        let ids: Vec<String> = store
            .list_records(RecordKind::Student)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.external_id)
            .collect();
        assert_eq!(ids, vec![sf_id("003", 1), sf_id("003", 2)]);
    }
}
