//! The local store as seen by the pipeline.
//!
//! [`LocalStore`] is the seam between the sync stages and persistence. The
//! production implementation is [`vms_db::service::SyncStore`]; tests wrap it
//! to inject failures.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vms_core::entities::{Fields, LocalRecord, ParticipationLink, RunReport, ScopedUser, ValidationFinding};
use vms_core::enums::RecordKind;
use vms_db::repos::locks::LockAttempt;
use vms_db::repos::participation::NewParticipation;
use vms_db::service::SyncStore;

use crate::error::SyncError;

#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn generate_id(&self, prefix: &str) -> Result<String, SyncError>;

    async fn find_record(
        &self,
        kind: RecordKind,
        external_id: &str,
    ) -> Result<Option<LocalRecord>, SyncError>;

    async fn insert_record(
        &self,
        kind: RecordKind,
        external_id: &str,
        fields: &Fields,
        district: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<LocalRecord, SyncError>;

    async fn update_record(
        &self,
        id: &str,
        fields: &Fields,
        district: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<LocalRecord, SyncError>;

    async fn create_participation(
        &self,
        new: &NewParticipation<'_>,
    ) -> Result<(LocalRecord, ParticipationLink), SyncError>;

    async fn update_participation(
        &self,
        record_id: &str,
        new: &NewParticipation<'_>,
    ) -> Result<LocalRecord, SyncError>;

    async fn find_participation(
        &self,
        event_id: &str,
        student_id: &str,
    ) -> Result<Option<ParticipationLink>, SyncError>;

    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ScopedUser>, SyncError>;

    async fn clear_findings(&self, scope: &str) -> Result<u64, SyncError>;

    async fn insert_findings(
        &self,
        run_id: &str,
        scope: &str,
        findings: &[ValidationFinding],
    ) -> Result<(), SyncError>;

    async fn save_run(&self, report: &RunReport) -> Result<(), SyncError>;

    async fn try_acquire_lock(
        &self,
        scope: &str,
        run_id: &str,
        stale_after: Duration,
    ) -> Result<LockAttempt, SyncError>;

    async fn release_lock(&self, scope: &str, run_id: &str) -> Result<bool, SyncError>;
}

#[async_trait]
impl LocalStore for SyncStore {
    async fn generate_id(&self, prefix: &str) -> Result<String, SyncError> {
        Ok(self.db().generate_id(prefix).await?)
    }

    async fn find_record(
        &self,
        kind: RecordKind,
        external_id: &str,
    ) -> Result<Option<LocalRecord>, SyncError> {
        Ok(Self::find_record(self, kind, external_id).await?)
    }

    async fn insert_record(
        &self,
        kind: RecordKind,
        external_id: &str,
        fields: &Fields,
        district: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<LocalRecord, SyncError> {
        Ok(Self::insert_record(
            self,
            kind,
            external_id,
            fields,
            district,
            updated_at,
            Some(Utc::now()),
        )
        .await?)
    }

    async fn update_record(
        &self,
        id: &str,
        fields: &Fields,
        district: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<LocalRecord, SyncError> {
        Ok(Self::update_record(self, id, fields, district, updated_at, Some(Utc::now())).await?)
    }

    async fn create_participation(
        &self,
        new: &NewParticipation<'_>,
    ) -> Result<(LocalRecord, ParticipationLink), SyncError> {
        Ok(Self::create_participation(self, new).await?)
    }

    async fn update_participation(
        &self,
        record_id: &str,
        new: &NewParticipation<'_>,
    ) -> Result<LocalRecord, SyncError> {
        Ok(Self::update_participation(self, record_id, new).await?)
    }

    async fn find_participation(
        &self,
        event_id: &str,
        student_id: &str,
    ) -> Result<Option<ParticipationLink>, SyncError> {
        Ok(Self::find_participation(self, event_id, student_id).await?)
    }

    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ScopedUser>, SyncError> {
        Ok(Self::find_user_by_external_id(self, external_id).await?)
    }

    async fn clear_findings(&self, scope: &str) -> Result<u64, SyncError> {
        Ok(Self::clear_findings(self, scope).await?)
    }

    async fn insert_findings(
        &self,
        run_id: &str,
        scope: &str,
        findings: &[ValidationFinding],
    ) -> Result<(), SyncError> {
        Ok(Self::insert_findings(self, run_id, scope, findings).await?)
    }

    async fn save_run(&self, report: &RunReport) -> Result<(), SyncError> {
        Ok(Self::save_run(self, report).await?)
    }

    async fn try_acquire_lock(
        &self,
        scope: &str,
        run_id: &str,
        stale_after: Duration,
    ) -> Result<LockAttempt, SyncError> {
        Ok(Self::try_acquire_lock(self, scope, run_id, stale_after).await?)
    }

    async fn release_lock(&self, scope: &str, run_id: &str) -> Result<bool, SyncError> {
        Ok(Self::release_lock(self, scope, run_id).await?)
    }
}
