//! End-to-end properties of the sync pipeline against an in-memory store and
//! a scripted CRM.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;

use vms_config::SyncConfig;
use vms_core::entities::{ExternalRecord, RunReport};
use vms_core::enums::{KindStatus, RecordKind, RunStatus, Severity};
use vms_core::rules;
use vms_core::scope::{ScopeSelector, UserScope};
use vms_db::repos::locks::LockAttempt;
use vms_db::service::SyncStore;
use vms_sync::reconciler::Reconciler;
use vms_sync::scope::filter_report;
use vms_sync::test_support::{FaultyStore, ScriptedCrm, external, fast_backoff, prefix, sf_id};
use vms_sync::{CancelToken, LocalStore, Orchestrator, RunRequest, SyncError};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn id(kind: RecordKind, n: u32) -> String {
    sf_id(prefix(kind), n)
}

fn school(n: u32, district: &str) -> ExternalRecord {
    external(
        RecordKind::School,
        &id(RecordKind::School, n),
        &[("name", json!(format!("School {n}"))), ("district", json!(district))],
        Some(t0()),
    )
}

fn student(n: u32, district: &str, school: u32, grade: serde_json::Value) -> ExternalRecord {
    external(
        RecordKind::Student,
        &id(RecordKind::Student, n),
        &[
            ("first_name", json!(format!("Student{n}"))),
            ("district", json!(district)),
            ("school_id", json!(id(RecordKind::School, school))),
            ("grade", grade),
            ("local_status", json!("local")),
        ],
        Some(t0()),
    )
}

fn event(n: u32, district: &str, school: u32) -> ExternalRecord {
    external(
        RecordKind::Event,
        &id(RecordKind::Event, n),
        &[
            ("name", json!(format!("Career Day {n}"))),
            ("district", json!(district)),
            ("school_id", json!(id(RecordKind::School, school))),
        ],
        Some(t0()),
    )
}

fn link(n: u32, event: u32, student: u32) -> ExternalRecord {
    external(
        RecordKind::ParticipationLink,
        &id(RecordKind::ParticipationLink, n),
        &[
            ("event_id", json!(id(RecordKind::Event, event))),
            ("student_id", json!(id(RecordKind::Student, student))),
            ("status", json!("Attended")),
        ],
        Some(t0()),
    )
}

/// Two districts with one school, student and event each, plus a
/// participation link per district.
fn two_districts() -> ScriptedCrm {
    ScriptedCrm::new()
        .with_records(
            RecordKind::Organization,
            vec![external(
                RecordKind::Organization,
                &id(RecordKind::Organization, 1),
                &[("name", json!("Acme Volunteers"))],
                Some(t0()),
            )],
        )
        .with_records(RecordKind::School, vec![school(1, "D1"), school(2, "D2")])
        .with_records(
            RecordKind::Student,
            vec![student(1, "D1", 1, json!(7)), student(2, "D2", 2, json!(9))],
        )
        .with_records(RecordKind::Event, vec![event(1, "D1", 1), event(2, "D2", 2)])
        .with_records(RecordKind::ParticipationLink, vec![link(1, 1, 1), link(2, 2, 2)])
}

fn orchestrator(store: &Arc<SyncStore>, crm: ScriptedCrm) -> Orchestrator {
    orchestrator_with(store, crm, SyncConfig::default())
}

fn orchestrator_with(store: &Arc<SyncStore>, crm: ScriptedCrm, config: SyncConfig) -> Orchestrator {
    Orchestrator::new(
        Arc::new(crm),
        Arc::clone(store) as Arc<dyn LocalStore>,
        config,
    )
    .unwrap()
    .with_backoff(fast_backoff())
}

async fn memory_store() -> Arc<SyncStore> {
    Arc::new(SyncStore::open(":memory:").await.unwrap())
}

async fn run(orchestrator: &Orchestrator, scope: ScopeSelector) -> RunReport {
    orchestrator.run(RunRequest::new(scope)).await.unwrap()
}

#[tokio::test]
async fn empty_store_decides_create_for_every_record() {
    let store = memory_store().await;
    let records = vec![school(1, "D1"), school(2, "D2"), school(3, "D1")];

    let mut reconciler = Reconciler::new(store.as_ref(), fast_backoff(), UserScope::Global);
    let plan = reconciler
        .reconcile(RecordKind::School, &records)
        .await
        .unwrap();

    let labels: Vec<&str> = plan.decisions.iter().map(|d| d.label()).collect();
    assert_eq!(labels, vec!["create", "create", "create"]);
    assert_eq!(plan.counts.created, 3);
}

#[tokio::test]
async fn full_run_then_second_run_is_all_noop() {
    let store = memory_store().await;

    let first = run(&orchestrator(&store, two_districts()), ScopeSelector::Global).await;
    assert_eq!(first.run.status, Some(RunStatus::Succeeded));
    assert_eq!(first.summary.totals.created, 9);
    assert_eq!(first.summary.errors, 0, "{:?}", first.run.findings);

    let second = run(&orchestrator(&store, two_districts()), ScopeSelector::Global).await;
    assert_eq!(second.run.status, Some(RunStatus::Succeeded));
    let totals = second.summary.totals;
    assert_eq!(totals.created, 0);
    assert_eq!(totals.updated, 0);
    assert_eq!(totals.unchanged, 9);
    assert_eq!(store.list_participation_links().await.unwrap().len(), 2);
}

#[tokio::test]
async fn participation_pair_is_unique_across_runs() {
    let store = memory_store().await;
    let duplicate_in_batch = two_districts().with_records(
        RecordKind::ParticipationLink,
        vec![link(1, 1, 1), link(3, 1, 1)],
    );
    let first = run(&orchestrator(&store, duplicate_in_batch), ScopeSelector::Global).await;
    let duplicates: Vec<_> = first
        .run
        .findings
        .iter()
        .filter(|f| f.rule_id == rules::PARTICIPATION_DUPLICATE)
        .collect();
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].record.external_id, id(RecordKind::ParticipationLink, 3));
    assert_eq!(duplicates[0].severity, Severity::Error);

    let later = two_districts().with_records(RecordKind::ParticipationLink, vec![link(4, 1, 1)]);
    let second = run(&orchestrator(&store, later), ScopeSelector::Global).await;
    let outcome = second.run.outcome(RecordKind::ParticipationLink).unwrap();
    assert_eq!(outcome.counts.skipped, 1);
    assert_eq!(outcome.counts.created, 0);
    assert_eq!(store.list_participation_links().await.unwrap().len(), 1);
}

#[tokio::test]
async fn district_run_never_touches_other_districts() {
    let store = memory_store().await;
    let crm = two_districts().with_records(
        RecordKind::Student,
        vec![student(1, "D1", 1, json!(7)), student(2, "D2", 2, json!(13))],
    );

    let report = run(
        &orchestrator(&store, crm),
        ScopeSelector::District("D1".into()),
    )
    .await;
    assert_eq!(report.run.status, Some(RunStatus::Succeeded));

    for kind in [RecordKind::School, RecordKind::Student, RecordKind::Event] {
        let stored = store.list_records(kind).await.unwrap();
        assert_eq!(stored.len(), 1, "{kind}");
        assert_eq!(stored[0].district.as_deref(), Some("D1"));
        assert_eq!(report.run.outcome(kind).unwrap().counts.out_of_scope, 1);
    }
    let links = store.list_records(RecordKind::ParticipationLink).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].district.as_deref(), Some("D1"));

    assert_eq!(store.count_records(RecordKind::Organization).await.unwrap(), 0);
    assert_eq!(store.count_records(RecordKind::User).await.unwrap(), 0);
    assert!(
        report
            .run
            .findings
            .iter()
            .all(|f| f.record.district.as_deref() == Some("D1")),
        "{:?}",
        report.run.findings
    );
}

#[tokio::test]
async fn reports_are_filtered_for_district_users() {
    let store = memory_store().await;
    let crm = two_districts().with_records(
        RecordKind::Student,
        vec![student(1, "D1", 1, json!(14)), student(2, "D2", 2, json!(13))],
    );
    let report = run(&orchestrator(&store, crm), ScopeSelector::Global).await;
    assert_eq!(report.summary.errors, 2);

    let d1 = filter_report(&report, &UserScope::districts(["D1"]).unwrap());
    assert_eq!(d1.summary.errors, 1);
    assert!(d1.run.findings.iter().all(|f| f.record.district.as_deref() == Some("D1")));

    let saved = store.get_run(&report.run.id).await.unwrap();
    assert_eq!(saved.run.findings.len(), 2);
}

#[tokio::test]
async fn local_edit_newer_than_source_is_kept() {
    let store = memory_store().await;
    let crm = || ScriptedCrm::new().with_records(RecordKind::School, vec![school(1, "D1")]);
    run(&orchestrator(&store, crm()), ScopeSelector::Global).await;

    let stored = store
        .find_record(RecordKind::School, &id(RecordKind::School, 1))
        .await
        .unwrap()
        .unwrap();
    let mut edited = stored.fields.clone();
    edited.insert("name".into(), json!("School One (renamed locally)"));
    store.edit_record_locally(&stored.id, &edited).await.unwrap();

    let mut changed = school(1, "D1");
    changed
        .fields
        .insert("name".into(), json!("School 1 (renamed in CRM)"));
    changed.last_modified = Some(t0() + chrono::Duration::hours(1));
    let report = run(
        &orchestrator(
            &store,
            ScriptedCrm::new().with_records(RecordKind::School, vec![changed]),
        ),
        ScopeSelector::Global,
    )
    .await;

    let conflicts: Vec<_> = report
        .run
        .findings
        .iter()
        .filter(|f| f.rule_id == rules::RECONCILIATION_CONFLICT)
        .collect();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].severity, Severity::Warning);
    assert_eq!(report.summary.totals.conflicted, 1);
    assert_eq!(report.run.status, Some(RunStatus::Succeeded));

    let kept = store.get_record(&stored.id).await.unwrap();
    assert_eq!(kept.fields, edited);
}

#[tokio::test]
async fn grade_thirteen_yields_exactly_one_error() {
    let store = memory_store().await;
    let crm = ScriptedCrm::new()
        .with_records(RecordKind::School, vec![school(1, "D1")])
        .with_records(
            RecordKind::Student,
            vec![student(1, "D1", 1, json!(13)), student(2, "D1", 1, json!(7))],
        );
    let report = run(&orchestrator(&store, crm), ScopeSelector::Global).await;

    let grade_findings: Vec<_> = report
        .run
        .findings
        .iter()
        .filter(|f| f.rule_id == rules::GRADE_RANGE)
        .collect();
    assert_eq!(grade_findings.len(), 1);
    assert_eq!(grade_findings[0].severity, Severity::Error);
    assert_eq!(grade_findings[0].record.external_id, id(RecordKind::Student, 1));
    assert_eq!(report.summary.errors, 1);
}

#[tokio::test]
async fn four_transient_failures_then_success() {
    let store = memory_store().await;
    let crm = two_districts().failing_transiently(RecordKind::Student, 4);
    let report = run(&orchestrator(&store, crm), ScopeSelector::Global).await;

    let outcome = report.run.outcome(RecordKind::Student).unwrap();
    assert_eq!(outcome.status, KindStatus::Succeeded);
    assert_eq!(outcome.counts.created, 2);
    assert!(report.run.findings.is_empty(), "{:?}", report.run.findings);
    assert_eq!(report.run.status, Some(RunStatus::Succeeded));
}

#[tokio::test]
async fn exhausted_fetch_retries_make_the_run_partial() {
    let store = memory_store().await;
    let crm = two_districts().failing_transiently(RecordKind::Student, 5);
    let report = run(&orchestrator(&store, crm), ScopeSelector::Global).await;

    let outcome = report.run.outcome(RecordKind::Student).unwrap();
    assert_eq!(outcome.status, KindStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("5 attempts"));
    assert_eq!(report.run.status, Some(RunStatus::PartialFailure));
    assert_eq!(
        report.run.outcome(RecordKind::ParticipationLink).unwrap().error.as_deref(),
        Some("dependency_failed")
    );
    assert_eq!(
        report.run.outcome(RecordKind::Event).unwrap().status,
        KindStatus::Succeeded
    );
}

#[tokio::test]
async fn rejected_credentials_fail_the_run() {
    let store = memory_store().await;
    let report = run(
        &orchestrator(&store, ScriptedCrm::new().rejecting_credentials()),
        ScopeSelector::Global,
    )
    .await;

    assert_eq!(report.run.status, Some(RunStatus::Failed));
    assert!(report.run.fatal_error.as_deref().unwrap().contains("authentication"));
    assert!(report.run.outcomes.is_empty());
    assert_eq!(store.get_run(&report.run.id).await.unwrap(), report);
}

#[tokio::test]
async fn exhausted_write_retries_fail_the_run() {
    let faulty = Arc::new(FaultyStore::new(SyncStore::open(":memory:").await.unwrap()).always_failing());
    let orchestrator = Orchestrator::new(
        Arc::new(two_districts()),
        Arc::clone(&faulty) as Arc<dyn LocalStore>,
        SyncConfig::default(),
    )
    .unwrap()
    .with_backoff(fast_backoff());

    let report = orchestrator
        .run(RunRequest::new(ScopeSelector::Global))
        .await
        .unwrap();
    assert_eq!(report.run.status, Some(RunStatus::Failed));
    assert!(
        report
            .run
            .fatal_error
            .as_deref()
            .unwrap()
            .contains("gave up after 5 attempts")
    );
    assert_eq!(faulty.inner().count_records(RecordKind::Organization).await.unwrap(), 0);
}

#[tokio::test]
async fn transient_write_failures_are_absorbed() {
    let faulty = Arc::new(FaultyStore::new(SyncStore::open(":memory:").await.unwrap()).failing_writes(3));
    let orchestrator = Orchestrator::new(
        Arc::new(two_districts()),
        Arc::clone(&faulty) as Arc<dyn LocalStore>,
        SyncConfig::default(),
    )
    .unwrap()
    .with_backoff(fast_backoff());

    let report = orchestrator
        .run(RunRequest::new(ScopeSelector::Global))
        .await
        .unwrap();
    assert_eq!(report.run.status, Some(RunStatus::Succeeded));
    assert_eq!(report.summary.totals.created, 9);
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let store = memory_store().await;
    let orchestrator = orchestrator(&store, two_districts());
    let report = orchestrator
        .run(RunRequest::new(ScopeSelector::Global).dry_run(true))
        .await
        .unwrap();

    assert!(report.run.dry_run);
    assert_eq!(report.summary.totals.created, 9);
    for kind in RecordKind::SYNC_ORDER {
        assert_eq!(store.count_records(kind).await.unwrap(), 0, "{kind}");
    }
    assert!(store.latest_run(None).await.unwrap().is_none());
}

#[tokio::test]
async fn kind_filter_limits_the_run() {
    let store = memory_store().await;
    let report = orchestrator(&store, two_districts())
        .run(RunRequest::new(ScopeSelector::Global).with_kinds([RecordKind::School]))
        .await
        .unwrap();

    assert_eq!(report.run.kinds, vec![RecordKind::School]);
    assert_eq!(report.run.outcomes.len(), 1);
    assert_eq!(store.count_records(RecordKind::School).await.unwrap(), 2);
    assert_eq!(store.count_records(RecordKind::Student).await.unwrap(), 0);
}

#[tokio::test]
async fn cancellation_stops_between_kinds() {
    let store = memory_store().await;
    let token = CancelToken::new();
    let crm = two_districts().cancelling_on(RecordKind::Student, token.clone());
    let report = orchestrator(&store, crm)
        .with_cancel(token)
        .run(RunRequest::new(ScopeSelector::Global))
        .await
        .unwrap();

    assert!(report.run.cancelled);
    assert_eq!(report.run.status, Some(RunStatus::PartialFailure));
    assert_eq!(
        report.summary.completed_kinds,
        vec![RecordKind::Organization, RecordKind::School, RecordKind::Student]
    );
    for kind in [RecordKind::Event, RecordKind::ParticipationLink, RecordKind::User] {
        assert_eq!(report.run.outcome(kind).unwrap().status, KindStatus::Cancelled);
    }
    assert_eq!(store.count_records(RecordKind::Student).await.unwrap(), 2);
    assert_eq!(store.count_records(RecordKind::Event).await.unwrap(), 0);
}

#[tokio::test]
async fn second_run_for_same_scope_is_rejected() {
    let store = memory_store().await;
    let held = store
        .try_acquire_lock("district:D1", "run-elsewhere", Duration::from_secs(3600))
        .await
        .unwrap();
    assert!(matches!(held, LockAttempt::Acquired));

    let err = orchestrator(&store, two_districts())
        .run(RunRequest::new(ScopeSelector::District("D1".into())))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::RunAlreadyInProgress { .. }), "{err}");

    // Other scopes are independent.
    let report = run(&orchestrator(&store, two_districts()), ScopeSelector::District("D2".into())).await;
    assert_eq!(report.run.status, Some(RunStatus::Succeeded));
}

#[tokio::test]
async fn queued_run_proceeds_once_lock_is_released() {
    let store = memory_store().await;
    store
        .try_acquire_lock("global", "run-elsewhere", Duration::from_secs(3600))
        .await
        .unwrap();

    let releaser = Arc::clone(&store);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        releaser.release_lock("global", "run-elsewhere").await.unwrap();
    });

    let mut config = SyncConfig::default();
    config.store.lock_wait_secs = 5;
    let report = orchestrator_with(&store, two_districts(), config)
        .run(RunRequest::new(ScopeSelector::Global))
        .await
        .unwrap();
    assert_eq!(report.run.status, Some(RunStatus::Succeeded));
}
