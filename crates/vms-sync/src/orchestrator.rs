//! Sync run orchestration.
//!
//! A run walks the selected kinds in dependency order: fetch every page,
//! reconcile the batch, and move on. Validation runs once over everything the
//! run staged, then the run is finalized and (unless it is a dry run)
//! persisted together with its findings.
//!
//! ```text
//! idle → fetching ⇄ reconciling → validating → finalizing → succeeded
//!                                                         → partial_failure
//!                                                         → failed
//! ```
//!
//! Non-dry runs hold the advisory lock of their scope for their whole
//! duration. Cancellation is checked between kinds.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use vms_config::SyncConfig;
use vms_core::entities::{KindCounts, KindOutcome, LocalRecord, RunReport, SyncRun};
use vms_core::enums::{KindStatus, RecordKind, RunPhase};
use vms_core::errors::CoreError;
use vms_core::ids::PREFIX_RUN;
use vms_core::scope::ScopeSelector;
use vms_crm::CrmClient;
use vms_db::repos::locks::LockAttempt;

use crate::cancel::CancelToken;
use crate::error::SyncError;
use crate::fetch::fetch_all;
use crate::reconciler::Reconciler;
use crate::retry::Backoff;
use crate::store::LocalStore;
use crate::validation::ValidationEngine;

const LOCK_POLL: Duration = Duration::from_millis(250);

/// Reason recorded for participation links skipped because a kind they
/// reference failed.
pub const DEPENDENCY_FAILED: &str = "dependency_failed";

/// What to synchronize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub scope: ScopeSelector,
    /// Kinds to run; `None` runs every kind.
    pub kinds: Option<Vec<RecordKind>>,
    /// Plan only: nothing is written, locked or persisted.
    pub dry_run: bool,
}

impl RunRequest {
    #[must_use]
    pub const fn new(scope: ScopeSelector) -> Self {
        Self {
            scope,
            kinds: None,
            dry_run: false,
        }
    }

    #[must_use]
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = RecordKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn selected_kinds(&self) -> Vec<RecordKind> {
        match &self.kinds {
            Some(kinds) if !kinds.is_empty() => kinds.clone(),
            _ => RecordKind::SYNC_ORDER.to_vec(),
        }
    }
}

/// Progress callbacks, e.g. for a terminal spinner.
pub trait RunObserver: Send + Sync {
    fn kind_started(&self, _kind: RecordKind) {}

    fn kind_finished(&self, _outcome: &KindOutcome) {}
}

/// Tracks the run phase and rejects transitions the state machine forbids.
struct PhaseTracker<'a> {
    run_id: &'a str,
    phase: RunPhase,
}

impl<'a> PhaseTracker<'a> {
    const fn new(run_id: &'a str) -> Self {
        Self {
            run_id,
            phase: RunPhase::Idle,
        }
    }

    fn advance(&mut self, next: RunPhase) -> Result<(), CoreError> {
        if !self.phase.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                entity_type: "sync_run".into(),
                id: self.run_id.to_string(),
                from: self.phase.as_str().into(),
                to: next.as_str().into(),
            });
        }
        tracing::debug!(run_id = self.run_id, from = %self.phase, to = %next, "phase");
        self.phase = next;
        Ok(())
    }
}

pub struct Orchestrator {
    crm: Arc<dyn CrmClient>,
    store: Arc<dyn LocalStore>,
    config: SyncConfig,
    backoff: Backoff,
    cancel: CancelToken,
    observer: Option<Arc<dyn RunObserver>>,
}

impl Orchestrator {
    /// Build an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if `config` does not validate.
    pub fn new(
        crm: Arc<dyn CrmClient>,
        store: Arc<dyn LocalStore>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            crm,
            store,
            backoff: Backoff::from_config(&config.retry),
            config,
            cancel: CancelToken::new(),
            observer: None,
        })
    }

    /// Use `cancel` to stop runs between kinds.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Override the retry policy from the configuration.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Execute one run and return its finalized report.
    ///
    /// Kind failures and fatal errors during the run are part of the report
    /// (`partial` / `failed`), not errors of this call.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::RunAlreadyInProgress`] when the scope lock stays
    /// held past `store.lock_wait_secs`, [`SyncError::Cancelled`] if the run
    /// is cancelled while waiting for the lock, and
    /// [`SyncError::Persistence`] when the run cannot be started or its
    /// report cannot be saved.
    pub async fn run(&self, request: RunRequest) -> Result<RunReport, SyncError> {
        let store = Arc::clone(&self.store);
        let run_id = self
            .backoff
            .persist("generate run id", || store.generate_id(PREFIX_RUN))
            .await?;
        let run = SyncRun::new(
            run_id,
            request.scope.clone(),
            request.selected_kinds(),
            request.dry_run,
            Utc::now(),
        );
        tracing::info!(
            run_id = %run.id,
            scope = %run.scope,
            kinds = ?run.kinds,
            dry_run = run.dry_run,
            "starting sync run"
        );

        if run.dry_run {
            return self.execute(run).await;
        }

        let scope_key = run.scope.key();
        let run_id = run.id.clone();
        self.acquire_lock(&scope_key, &run_id).await?;
        let result = self.execute(run).await;
        match self.store.release_lock(&scope_key, &run_id).await {
            Ok(true) => tracing::debug!(scope = %scope_key, "released scope lock"),
            Ok(false) => tracing::warn!(scope = %scope_key, "scope lock was already gone"),
            Err(e) => tracing::warn!(scope = %scope_key, error = %e, "failed to release scope lock"),
        }
        result
    }

    async fn acquire_lock(&self, scope_key: &str, run_id: &str) -> Result<(), SyncError> {
        let store = Arc::clone(&self.store);
        let stale_after = self.config.store.lock_stale_after();
        let deadline = Instant::now() + self.config.store.lock_wait();
        loop {
            let attempt = self
                .backoff
                .persist("acquire scope lock", || {
                    store.try_acquire_lock(scope_key, run_id, stale_after)
                })
                .await?;
            let holder = match attempt {
                LockAttempt::Acquired => {
                    tracing::debug!(scope = scope_key, run_id, "acquired scope lock");
                    return Ok(());
                }
                LockAttempt::Held(holder) => holder,
            };
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SyncError::RunAlreadyInProgress {
                    scope: scope_key.to_string(),
                    holder: format!(
                        "run {} (pid {}) since {}",
                        holder.run_id,
                        holder.pid,
                        holder.acquired_at.to_rfc3339()
                    ),
                });
            }
            tracing::info!(scope = scope_key, holder = %holder.run_id, "waiting for scope lock");
            tokio::time::sleep(LOCK_POLL.min(deadline - now)).await;
        }
    }

    async fn execute(&self, mut run: SyncRun) -> Result<RunReport, SyncError> {
        let run_id = run.id.clone();
        let mut phase = PhaseTracker::new(&run_id);

        if let Err(e) = self.drive(&mut run, &mut phase).await {
            tracing::error!(run_id = %run.id, error = %e, "sync run failed");
            run.record_fatal(e.to_string())?;
        }

        phase.advance(RunPhase::Finalizing)?;
        let status = run.finalize(Utc::now())?;
        phase.advance(status.into())?;
        let report = RunReport::from_run(run);

        if !report.run.dry_run {
            self.persist(&report).await?;
        }

        tracing::info!(
            run_id = %report.run.id,
            status = %status,
            errors = report.summary.errors,
            warnings = report.summary.warnings,
            "sync run finished"
        );
        Ok(report)
    }

    /// Fetch, reconcile and validate. Returns only fatal errors.
    async fn drive(&self, run: &mut SyncRun, phase: &mut PhaseTracker<'_>) -> Result<(), SyncError> {
        let store: &dyn LocalStore = self.store.as_ref();
        let scope_key = run.scope.key();

        if !run.dry_run {
            let cleared = self
                .backoff
                .persist("clear findings", || store.clear_findings(&scope_key))
                .await?;
            tracing::debug!(scope = %scope_key, cleared, "cleared previous findings");
        }

        let mut reconciler = Reconciler::new(store, self.backoff, run.scope.as_user_scope());
        let mut staged: Vec<LocalRecord> = Vec::new();

        let kinds = run.kinds.clone();
        for (idx, &kind) in kinds.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!(run_id = %run.id, next = %kind, "run cancelled between kinds");
                run.cancelled = true;
                for &rest in &kinds[idx..] {
                    self.finish_kind(run, KindOutcome::cancelled(rest))?;
                }
                break;
            }

            if kind == RecordKind::ParticipationLink && dependency_failed(run) {
                tracing::warn!(run_id = %run.id, "skipping participation links, a referenced kind failed");
                self.finish_kind(
                    run,
                    KindOutcome::failed(kind, KindCounts::default(), DEPENDENCY_FAILED),
                )?;
                continue;
            }

            phase.advance(RunPhase::Fetching)?;
            if let Some(observer) = &self.observer {
                observer.kind_started(kind);
            }

            let records = match fetch_all(
                self.crm.as_ref(),
                kind,
                &self.backoff,
                self.config.sync.fetch_concurrency,
            )
            .await
            {
                Ok(records) => records,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(run_id = %run.id, %kind, error = %e, "kind failed");
                    self.finish_kind(run, KindOutcome::failed(kind, KindCounts::default(), e.to_string()))?;
                    continue;
                }
            };

            phase.advance(RunPhase::Reconciling)?;
            let planned = if run.dry_run {
                reconciler.reconcile(kind, &records).await
            } else {
                reconciler.apply(kind, &records, Utc::now()).await
            };
            let plan = match planned {
                Ok(plan) => plan,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(run_id = %run.id, %kind, error = %e, "kind failed");
                    let counts = KindCounts {
                        fetched: u32::try_from(records.len()).unwrap_or(u32::MAX),
                        ..KindCounts::default()
                    };
                    self.finish_kind(run, KindOutcome::failed(kind, counts, e.to_string()))?;
                    continue;
                }
            };

            run.record_findings(plan.findings)?;
            staged.extend(plan.staged);
            self.finish_kind(run, KindOutcome::succeeded(kind, plan.counts))?;
        }

        phase.advance(RunPhase::Validating)?;
        let engine = ValidationEngine::new(store, self.config.validation.clone(), self.backoff);
        let findings = engine.validate(&staged).await?;
        run.record_findings(findings)?;
        Ok(())
    }

    fn finish_kind(&self, run: &mut SyncRun, outcome: KindOutcome) -> Result<(), CoreError> {
        if let Some(observer) = &self.observer {
            observer.kind_finished(&outcome);
        }
        run.record_outcome(outcome)
    }

    async fn persist(&self, report: &RunReport) -> Result<(), SyncError> {
        let store = Arc::clone(&self.store);
        let run = &report.run;
        let scope_key = run.scope.key();
        self.backoff
            .persist("save findings", || {
                store.insert_findings(&run.id, &scope_key, &run.findings)
            })
            .await?;
        self.backoff
            .persist("save run", || store.save_run(report))
            .await?;
        Ok(())
    }
}

fn dependency_failed(run: &SyncRun) -> bool {
    [RecordKind::Event, RecordKind::Student].into_iter().any(|kind| {
        run.outcome(kind)
            .is_some_and(|o| o.status == KindStatus::Failed)
    })
}
