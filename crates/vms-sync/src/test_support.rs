//! Doubles for exercising the pipeline without a CRM or a flaky disk.
//!
//! [`ScriptedCrm`] serves canned records page by page and can fail on
//! request. [`FaultyStore`] wraps a real [`SyncStore`] and injects write
//! failures.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vms_core::entities::{
    ExternalRecord, Fields, LocalRecord, ParticipationLink, RunReport, ScopedUser,
    ValidationFinding,
};
use vms_core::enums::RecordKind;
use vms_crm::{CrmClient, CrmError, Page, PageCursor};
use vms_db::repos::locks::LockAttempt;
use vms_db::repos::participation::NewParticipation;
use vms_db::service::SyncStore;

use crate::cancel::CancelToken;
use crate::error::SyncError;
use crate::retry::Backoff;
use crate::store::LocalStore;

/// Five attempts with millisecond delays.
#[must_use]
pub const fn fast_backoff() -> Backoff {
    Backoff {
        max_attempts: 5,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    }
}

#[must_use]
pub fn fields(pairs: &[(&str, serde_json::Value)]) -> Fields {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// An 18-character CRM ID, e.g. `sf_id("003", 1)`.
#[must_use]
pub fn sf_id(prefix: &str, n: u32) -> String {
    format!("{prefix}{n:0>width$}", width = 18 - prefix.len())
}

/// Key prefix used for generated IDs of each kind.
#[must_use]
pub const fn prefix(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Organization => "001",
        RecordKind::School => "0SC",
        RecordKind::Student => "003",
        RecordKind::Event => "a0E",
        RecordKind::ParticipationLink => "a0S",
        RecordKind::User => "005",
    }
}

#[must_use]
pub fn external(
    kind: RecordKind,
    external_id: &str,
    pairs: &[(&str, serde_json::Value)],
    last_modified: Option<DateTime<Utc>>,
) -> ExternalRecord {
    ExternalRecord {
        external_id: external_id.to_string(),
        kind,
        fields: fields(pairs),
        last_modified,
    }
}

/// `count` records of `kind` numbered from 1, carrying `district` when the
/// kind has a district field.
#[must_use]
pub fn numbered(kind: RecordKind, count: u32, district: &str) -> Vec<ExternalRecord> {
    (1..=count)
        .map(|n| {
            let mut values = fields(&[("name", serde_json::json!(format!("{kind} {n}")))]);
            if let Some(field) = kind.spec().district_field {
                values.insert(field.to_string(), serde_json::json!(district));
            }
            ExternalRecord {
                external_id: sf_id(prefix(kind), n),
                kind,
                fields: values,
                last_modified: None,
            }
        })
        .collect()
}

/// In-memory CRM serving pre-loaded records.
pub struct ScriptedCrm {
    records: HashMap<RecordKind, Vec<ExternalRecord>>,
    page_size: usize,
    offset_cursors: bool,
    reject_credentials: bool,
    broken: HashSet<RecordKind>,
    transient_failures: Mutex<HashMap<RecordKind, u32>>,
    cancel_on: Option<(RecordKind, CancelToken)>,
    calls: Mutex<HashMap<RecordKind, u32>>,
}

impl Default for ScriptedCrm {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCrm {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            page_size: 200,
            offset_cursors: false,
            reject_credentials: false,
            broken: HashSet::new(),
            transient_failures: Mutex::new(HashMap::new()),
            cancel_on: None,
            calls: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_records(mut self, kind: RecordKind, records: Vec<ExternalRecord>) -> Self {
        self.records.insert(kind, records);
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Address pages by offset so they can be fetched concurrently.
    #[must_use]
    pub const fn with_offset_cursors(mut self) -> Self {
        self.offset_cursors = true;
        self
    }

    /// Fail the first `times` requests for `kind` with a 503.
    #[must_use]
    pub fn failing_transiently(self, kind: RecordKind, times: u32) -> Self {
        if let Ok(mut failures) = self.transient_failures.lock() {
            failures.insert(kind, times);
        }
        self
    }

    /// Fail every request for `kind` with a non-transient API error.
    #[must_use]
    pub fn broken(mut self, kind: RecordKind) -> Self {
        self.broken.insert(kind);
        self
    }

    /// Fail every request with `invalid_grant`.
    #[must_use]
    pub const fn rejecting_credentials(mut self) -> Self {
        self.reject_credentials = true;
        self
    }

    /// Cancel `token` as soon as `kind` is requested.
    #[must_use]
    pub fn cancelling_on(mut self, kind: RecordKind, token: CancelToken) -> Self {
        self.cancel_on = Some((kind, token));
        self
    }

    /// Number of `fetch_page` calls made for `kind`.
    #[must_use]
    pub fn calls(&self, kind: RecordKind) -> u32 {
        self.calls
            .lock()
            .map(|calls| calls.get(&kind).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn cursor_at(&self, kind: RecordKind, offset: usize) -> PageCursor {
        if self.offset_cursors {
            PageCursor::Offset(offset)
        } else {
            PageCursor::Locator(format!("{kind}/{offset}"))
        }
    }

    fn offset_of(kind: RecordKind, cursor: Option<&PageCursor>) -> Result<usize, CrmError> {
        match cursor {
            None => Ok(0),
            Some(PageCursor::Offset(offset)) => Ok(*offset),
            Some(PageCursor::Locator(locator)) => locator
                .strip_prefix(&format!("{kind}/"))
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| CrmError::InvalidCursor(locator.clone())),
        }
    }
}

#[async_trait]
impl CrmClient for ScriptedCrm {
    async fn fetch_page(
        &self,
        kind: RecordKind,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, CrmError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(kind).or_default() += 1;
        }
        if let Some((on, token)) = &self.cancel_on
            && *on == kind
        {
            token.cancel();
        }
        if self.reject_credentials {
            return Err(CrmError::Authentication(
                "invalid_grant: authentication failure".into(),
            ));
        }
        if self.broken.contains(&kind) {
            return Err(CrmError::Api {
                status: 400,
                message: "MALFORMED_QUERY".into(),
            });
        }
        let fail = self
            .transient_failures
            .lock()
            .map(|mut failures| match failures.get_mut(&kind) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            })
            .unwrap_or(false);
        if fail {
            return Err(CrmError::Api {
                status: 503,
                message: "SERVER_UNAVAILABLE".into(),
            });
        }

        let all = self.records.get(&kind).map_or(&[][..], Vec::as_slice);
        let start = Self::offset_of(kind, cursor)?.min(all.len());
        let end = (start + self.page_size).min(all.len());
        Ok(Page {
            records: all[start..end].to_vec(),
            next_cursor: (end < all.len()).then(|| self.cursor_at(kind, end)),
            total_size: Some(all.len()),
        })
    }
}

/// A [`SyncStore`] whose record writes fail on demand.
///
/// Reads, locks, findings and run persistence pass straight through.
pub struct FaultyStore {
    inner: SyncStore,
    transient_writes: AtomicU32,
    always_fail: bool,
}

impl FaultyStore {
    #[must_use]
    pub const fn new(inner: SyncStore) -> Self {
        Self {
            inner,
            transient_writes: AtomicU32::new(0),
            always_fail: false,
        }
    }

    /// Fail the next `times` writes with a transient "database is locked".
    #[must_use]
    pub fn failing_writes(self, times: u32) -> Self {
        self.transient_writes.store(times, Ordering::SeqCst);
        self
    }

    /// Fail every write transiently, so retries are always exhausted.
    #[must_use]
    pub const fn always_failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    #[must_use]
    pub const fn inner(&self) -> &SyncStore {
        &self.inner
    }

    fn check_write(&self) -> Result<(), SyncError> {
        let injected = self.always_fail
            || self
                .transient_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if injected {
            return Err(SyncError::Persistence {
                message: "database is locked".into(),
                transient: true,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LocalStore for FaultyStore {
    async fn generate_id(&self, prefix: &str) -> Result<String, SyncError> {
        LocalStore::generate_id(&self.inner, prefix).await
    }

    async fn find_record(
        &self,
        kind: RecordKind,
        external_id: &str,
    ) -> Result<Option<LocalRecord>, SyncError> {
        LocalStore::find_record(&self.inner, kind, external_id).await
    }

    async fn insert_record(
        &self,
        kind: RecordKind,
        external_id: &str,
        fields: &Fields,
        district: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<LocalRecord, SyncError> {
        self.check_write()?;
        LocalStore::insert_record(&self.inner, kind, external_id, fields, district, updated_at)
            .await
    }

    async fn update_record(
        &self,
        id: &str,
        fields: &Fields,
        district: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<LocalRecord, SyncError> {
        self.check_write()?;
        LocalStore::update_record(&self.inner, id, fields, district, updated_at).await
    }

    async fn create_participation(
        &self,
        new: &NewParticipation<'_>,
    ) -> Result<(LocalRecord, ParticipationLink), SyncError> {
        self.check_write()?;
        LocalStore::create_participation(&self.inner, new).await
    }

    async fn update_participation(
        &self,
        record_id: &str,
        new: &NewParticipation<'_>,
    ) -> Result<LocalRecord, SyncError> {
        self.check_write()?;
        LocalStore::update_participation(&self.inner, record_id, new).await
    }

    async fn find_participation(
        &self,
        event_id: &str,
        student_id: &str,
    ) -> Result<Option<ParticipationLink>, SyncError> {
        LocalStore::find_participation(&self.inner, event_id, student_id).await
    }

    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ScopedUser>, SyncError> {
        LocalStore::find_user_by_external_id(&self.inner, external_id).await
    }

    async fn clear_findings(&self, scope: &str) -> Result<u64, SyncError> {
        LocalStore::clear_findings(&self.inner, scope).await
    }

    async fn insert_findings(
        &self,
        run_id: &str,
        scope: &str,
        findings: &[ValidationFinding],
    ) -> Result<(), SyncError> {
        LocalStore::insert_findings(&self.inner, run_id, scope, findings).await
    }

    async fn save_run(&self, report: &RunReport) -> Result<(), SyncError> {
        LocalStore::save_run(&self.inner, report).await
    }

    async fn try_acquire_lock(
        &self,
        scope: &str,
        run_id: &str,
        stale_after: Duration,
    ) -> Result<LockAttempt, SyncError> {
        LocalStore::try_acquire_lock(&self.inner, scope, run_id, stale_after).await
    }

    async fn release_lock(&self, scope: &str, run_id: &str) -> Result<bool, SyncError> {
        LocalStore::release_lock(&self.inner, scope, run_id).await
    }
}
