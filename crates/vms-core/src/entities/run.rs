use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::entities::ValidationFinding;
use crate::enums::{KindStatus, RecordKind, RunStatus, Severity};
use crate::errors::CoreError;
use crate::scope::ScopeSelector;

/// Per-kind record counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct KindCounts {
    pub fetched: u32,
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub skipped: u32,
    pub conflicted: u32,
    pub out_of_scope: u32,
}

impl KindCounts {
    pub fn absorb(&mut self, other: &Self) {
        self.fetched += other.fetched;
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.conflicted += other.conflicted;
        self.out_of_scope += other.out_of_scope;
    }
}

/// Outcome of one record kind within a run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct KindOutcome {
    pub kind: RecordKind,
    pub status: KindStatus,
    pub counts: KindCounts,
    /// Why the kind failed or was cancelled.
    pub error: Option<String>,
}

impl KindOutcome {
    #[must_use]
    pub const fn succeeded(kind: RecordKind, counts: KindCounts) -> Self {
        Self {
            kind,
            status: KindStatus::Succeeded,
            counts,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(kind: RecordKind, counts: KindCounts, error: impl Into<String>) -> Self {
        Self {
            kind,
            status: KindStatus::Failed,
            counts,
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn cancelled(kind: RecordKind) -> Self {
        Self {
            kind,
            status: KindStatus::Cancelled,
            counts: KindCounts::default(),
            error: Some("run cancelled before this kind started".into()),
        }
    }
}

/// One end-to-end execution of fetch → reconcile → validate → finalize.
///
/// Created at orchestration start and finalized exactly once. After
/// finalization the run is immutable: findings and outcomes are rejected.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct SyncRun {
    pub id: String,
    pub scope: ScopeSelector,
    /// Kinds selected for this run, in sync order.
    pub kinds: Vec<RecordKind>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: Option<RunStatus>,
    pub outcomes: Vec<KindOutcome>,
    pub findings: Vec<ValidationFinding>,
    /// Last fatal error, kept for the report.
    pub fatal_error: Option<String>,
    pub cancelled: bool,
}

impl SyncRun {
    #[must_use]
    pub fn new(
        id: String,
        scope: ScopeSelector,
        mut kinds: Vec<RecordKind>,
        dry_run: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        kinds.sort_by_key(|kind| kind.sync_rank());
        kinds.dedup();
        Self {
            id,
            scope,
            kinds,
            dry_run,
            started_at,
            finished_at: None,
            status: None,
            outcomes: Vec::new(),
            findings: Vec::new(),
            fatal_error: None,
            cancelled: false,
        }
    }

    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.status.is_some()
    }

    fn ensure_open(&self) -> Result<(), CoreError> {
        if self.is_finalized() {
            return Err(CoreError::AlreadyFinalized(self.id.clone()));
        }
        Ok(())
    }

    /// Append a finding.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::AlreadyFinalized` after finalization.
    pub fn record_finding(&mut self, finding: ValidationFinding) -> Result<(), CoreError> {
        self.ensure_open()?;
        self.findings.push(finding);
        Ok(())
    }

    /// Append many findings.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::AlreadyFinalized` after finalization.
    pub fn record_findings(
        &mut self,
        findings: impl IntoIterator<Item = ValidationFinding>,
    ) -> Result<(), CoreError> {
        self.ensure_open()?;
        self.findings.extend(findings);
        Ok(())
    }

    /// Record the outcome of one kind.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::AlreadyFinalized` after finalization.
    pub fn record_outcome(&mut self, outcome: KindOutcome) -> Result<(), CoreError> {
        self.ensure_open()?;
        self.outcomes.push(outcome);
        Ok(())
    }

    /// Mark the run as fatally failed, keeping `error` for the report.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::AlreadyFinalized` after finalization.
    pub fn record_fatal(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.ensure_open()?;
        self.fatal_error = Some(error.into());
        Ok(())
    }

    #[must_use]
    pub fn outcome(&self, kind: RecordKind) -> Option<&KindOutcome> {
        self.outcomes.iter().find(|o| o.kind == kind)
    }

    /// Kinds that completed before the run ended.
    #[must_use]
    pub fn completed_kinds(&self) -> Vec<RecordKind> {
        self.outcomes
            .iter()
            .filter(|o| o.status == KindStatus::Succeeded)
            .map(|o| o.kind)
            .collect()
    }

    /// Status implied by the recorded outcomes.
    ///
    /// A fatal error fails the run. A run where every selected kind failed
    /// also fails. Any failed or cancelled kind otherwise makes it partial.
    #[must_use]
    pub fn derive_status(&self) -> RunStatus {
        if self.fatal_error.is_some() {
            return RunStatus::Failed;
        }
        let failed = self
            .outcomes
            .iter()
            .filter(|o| o.status == KindStatus::Failed)
            .count();
        if !self.outcomes.is_empty() && failed == self.outcomes.len() {
            return RunStatus::Failed;
        }
        let incomplete = self
            .outcomes
            .iter()
            .any(|o| o.status != KindStatus::Succeeded);
        if incomplete || self.cancelled {
            RunStatus::PartialFailure
        } else {
            RunStatus::Succeeded
        }
    }

    /// Seal the run with its terminal status.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::AlreadyFinalized` if called a second time.
    pub fn finalize(&mut self, finished_at: DateTime<Utc>) -> Result<RunStatus, CoreError> {
        self.ensure_open()?;
        let status = self.derive_status();
        self.finished_at = Some(finished_at);
        self.status = Some(status);
        Ok(status)
    }

    #[must_use]
    pub fn totals(&self) -> KindCounts {
        let mut totals = KindCounts::default();
        for outcome in &self.outcomes {
            totals.absorb(&outcome.counts);
        }
        totals
    }
}

/// Aggregate view of a run for display.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ReportSummary {
    pub totals: KindCounts,
    pub errors: u32,
    pub warnings: u32,
    pub completed_kinds: Vec<RecordKind>,
    pub failed_kinds: Vec<RecordKind>,
}

/// Persisted and exported run report: the run plus its summary.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RunReport {
    pub run: SyncRun,
    pub summary: ReportSummary,
}

impl RunReport {
    #[must_use]
    pub fn from_run(run: SyncRun) -> Self {
        let summary = summarize(&run);
        Self { run, summary }
    }

    /// Recompute the summary, e.g. after findings were filtered for a viewer.
    #[must_use]
    pub fn resummarized(self) -> Self {
        Self::from_run(self.run)
    }
}

fn summarize(run: &SyncRun) -> ReportSummary {
    let count = |severity: Severity| {
        u32::try_from(
            run.findings
                .iter()
                .filter(|f| f.severity == severity)
                .count(),
        )
        .unwrap_or(u32::MAX)
    };
    ReportSummary {
        totals: run.totals(),
        errors: count(Severity::Error),
        warnings: count(Severity::Warning),
        completed_kinds: run.completed_kinds(),
        failed_kinds: run
            .outcomes
            .iter()
            .filter(|o| o.status == KindStatus::Failed)
            .map(|o| o.kind)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::RecordRef;
    use pretty_assertions::assert_eq;

    fn run() -> SyncRun {
        SyncRun::new(
            "run-00000001".into(),
            ScopeSelector::Global,
            vec![RecordKind::Event, RecordKind::School, RecordKind::Event],
            false,
            Utc::now(),
        )
    }

    fn counts(created: u32) -> KindCounts {
        KindCounts {
            created,
            ..KindCounts::default()
        }
    }

    #[test]
    fn kinds_are_sorted_and_deduplicated() {
        assert_eq!(run().kinds, vec![RecordKind::School, RecordKind::Event]);
    }

    #[test]
    fn all_succeeded_is_succeeded() {
        let mut r = run();
        r.record_outcome(KindOutcome::succeeded(RecordKind::School, counts(1)))
            .unwrap();
        r.record_outcome(KindOutcome::succeeded(RecordKind::Event, counts(2)))
            .unwrap();
        assert_eq!(r.finalize(Utc::now()).unwrap(), RunStatus::Succeeded);
        assert_eq!(r.totals().created, 3);
    }

    #[test]
    fn one_failed_kind_is_partial() {
        let mut r = run();
        r.record_outcome(KindOutcome::succeeded(RecordKind::School, counts(1)))
            .unwrap();
        r.record_outcome(KindOutcome::failed(
            RecordKind::Event,
            KindCounts::default(),
            "fetch retries exhausted",
        ))
        .unwrap();
        assert_eq!(r.derive_status(), RunStatus::PartialFailure);
    }

    #[test]
    fn fatal_error_fails_run() {
        let mut r = run();
        r.record_outcome(KindOutcome::succeeded(RecordKind::School, counts(1)))
            .unwrap();
        r.record_fatal("authentication failed").unwrap();
        assert_eq!(r.derive_status(), RunStatus::Failed);
    }

    #[test]
    fn cancelled_run_is_partial() {
        let mut r = run();
        r.record_outcome(KindOutcome::succeeded(RecordKind::School, counts(1)))
            .unwrap();
        r.record_outcome(KindOutcome::cancelled(RecordKind::Event))
            .unwrap();
        r.cancelled = true;
        assert_eq!(r.derive_status(), RunStatus::PartialFailure);
        assert_eq!(r.completed_kinds(), vec![RecordKind::School]);
    }

    #[test]
    fn finalize_exactly_once() {
        let mut r = run();
        r.finalize(Utc::now()).unwrap();
        assert!(matches!(
            r.finalize(Utc::now()),
            Err(CoreError::AlreadyFinalized(_))
        ));
        let finding = ValidationFinding::error(
            "identity.format",
            RecordRef::new(RecordKind::Event, "bad", None),
            "bad id",
        );
        assert!(r.record_finding(finding).is_err());
        assert!(r
            .record_outcome(KindOutcome::cancelled(RecordKind::Event))
            .is_err());
    }

    #[test]
    fn report_summary_counts_severities() {
        let mut r = run();
        let rec = RecordRef::new(RecordKind::Event, "a", None);
        r.record_findings([
            ValidationFinding::error("x", rec.clone(), "e"),
            ValidationFinding::warning("y", rec.clone(), "w1"),
            ValidationFinding::warning("z", rec, "w2"),
        ])
        .unwrap();
        let report = RunReport::from_run(r);
        assert_eq!(report.summary.errors, 1);
        assert_eq!(report.summary.warnings, 2);
    }
}
