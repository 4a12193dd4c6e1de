//! Participation repository: the Event x Student join.
//!
//! A participation record lives in `records` like every other kind; the
//! `participation_links` row pins it to the local Event and Student records
//! and carries the uniqueness guarantee on (event, student).

use chrono::{DateTime, Utc};

use vms_core::entities::{Fields, LocalRecord, ParticipationLink};
use vms_core::enums::RecordKind;
use vms_core::ids::{PREFIX_LINK, PREFIX_RECORD};

use crate::error::DatabaseError;
use crate::helpers::{fields_to_json, parse_datetime};
use crate::service::SyncStore;

const LINK_COLUMNS: &str = "id, record_id, event_id, student_id, created_at";

fn row_to_link(row: &libsql::Row) -> Result<ParticipationLink, DatabaseError> {
    Ok(ParticipationLink {
        id: row.get::<String>(0)?,
        record_id: row.get::<String>(1)?,
        event_id: row.get::<String>(2)?,
        student_id: row.get::<String>(3)?,
        created_at: parse_datetime(&row.get::<String>(4)?)?,
    })
}

/// A participation record and its link row, written together.
#[derive(Debug, Clone)]
pub struct NewParticipation<'a> {
    pub external_id: &'a str,
    pub fields: &'a Fields,
    pub district: Option<&'a str>,
    /// Local ID of the Event record.
    pub event_id: &'a str,
    /// Local ID of the Student record.
    pub student_id: &'a str,
    pub updated_at: DateTime<Utc>,
}

impl SyncStore {
    /// Insert a participation record and its link in one transaction.
    ///
    /// A second link for the same (event, student) pair fails with
    /// `DatabaseError::Constraint` and leaves no record behind.
    pub async fn create_participation(
        &self,
        new: &NewParticipation<'_>,
    ) -> Result<(LocalRecord, ParticipationLink), DatabaseError> {
        let record_id = self.db().generate_id(PREFIX_RECORD).await?;
        let link_id = self.db().generate_id(PREFIX_LINK).await?;
        let now = Utc::now();

        let tx = self.db().conn().transaction().await?;
        let result = async {
            tx.execute(
                "INSERT INTO records (id, kind, external_id, fields, district, updated_at, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                libsql::params![
                    record_id.as_str(),
                    RecordKind::ParticipationLink.as_str(),
                    new.external_id,
                    fields_to_json(new.fields)?,
                    new.district,
                    new.updated_at.to_rfc3339(),
                    now.to_rfc3339()
                ],
            )
            .await
            .map_err(DatabaseError::classify)?;
            tx.execute(
                "INSERT INTO participation_links (id, record_id, event_id, student_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                libsql::params![
                    link_id.as_str(),
                    record_id.as_str(),
                    new.event_id,
                    new.student_id,
                    now.to_rfc3339()
                ],
            )
            .await
            .map_err(DatabaseError::classify)?;
            Ok::<(), DatabaseError>(())
        }
        .await;

        match result {
            Ok(()) => tx.commit().await?,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        }

        let record = LocalRecord {
            id: record_id.clone(),
            kind: RecordKind::ParticipationLink,
            external_id: new.external_id.to_string(),
            fields: new.fields.clone(),
            district: new.district.map(str::to_string),
            updated_at: new.updated_at,
            synced_at: Some(now),
        };
        let link = ParticipationLink {
            id: link_id,
            record_id,
            event_id: new.event_id.to_string(),
            student_id: new.student_id.to_string(),
            created_at: now,
        };
        Ok((record, link))
    }

    /// Update a participation record and repoint its link in one transaction.
    pub async fn update_participation(
        &self,
        record_id: &str,
        new: &NewParticipation<'_>,
    ) -> Result<LocalRecord, DatabaseError> {
        let now = Utc::now();
        let tx = self.db().conn().transaction().await?;
        let result = async {
            let changed = tx
                .execute(
                    "UPDATE records SET fields = ?2, district = ?3, updated_at = ?4, synced_at = ?5
                     WHERE id = ?1",
                    libsql::params![
                        record_id,
                        fields_to_json(new.fields)?,
                        new.district,
                        new.updated_at.to_rfc3339(),
                        now.to_rfc3339()
                    ],
                )
                .await
                .map_err(DatabaseError::classify)?;
            if changed == 0 {
                return Err(DatabaseError::NoResult);
            }
            tx.execute(
                "UPDATE participation_links SET event_id = ?2, student_id = ?3 WHERE record_id = ?1",
                libsql::params![record_id, new.event_id, new.student_id],
            )
            .await
            .map_err(DatabaseError::classify)?;
            Ok::<(), DatabaseError>(())
        }
        .await;

        match result {
            Ok(()) => tx.commit().await?,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        }
        self.get_record(record_id).await
    }

    /// Link for an (event, student) pair of local IDs, if any.
    pub async fn find_participation(
        &self,
        event_id: &str,
        student_id: &str,
    ) -> Result<Option<ParticipationLink>, DatabaseError> {
        let mut rows = self
            .db()
            .query(
                &format!(
                    "SELECT {LINK_COLUMNS} FROM participation_links
                     WHERE event_id = ?1 AND student_id = ?2"
                ),
                [event_id, student_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_link(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn participation_for_record(
        &self,
        record_id: &str,
    ) -> Result<Option<ParticipationLink>, DatabaseError> {
        let mut rows = self
            .db()
            .query(
                &format!("SELECT {LINK_COLUMNS} FROM participation_links WHERE record_id = ?1"),
                [record_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_link(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_participation_links(&self) -> Result<Vec<ParticipationLink>, DatabaseError> {
        let mut rows = self
            .db()
            .query(
                &format!("SELECT {LINK_COLUMNS} FROM participation_links ORDER BY created_at, id"),
                (),
            )
            .await?;
        let mut links = Vec::new();
        while let Some(row) = rows.next().await? {
            links.push(row_to_link(&row)?);
        }
        Ok(links)
    }
}
