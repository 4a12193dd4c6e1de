//! JsonSchema validation of the exported run report and decisions.

use chrono::{TimeZone, Utc};
use schemars::schema_for;
use serde_json::json;
use vms_core::decision::{FieldChange, ReconciliationDecision};
use vms_core::entities::*;
use vms_core::enums::*;
use vms_core::scope::ScopeSelector;

fn validate_against_schema(
    schema: &serde_json::Value,
    instance: &serde_json::Value,
) -> Vec<String> {
    let validator = jsonschema::validator_for(schema).expect("schema should be valid");
    validator
        .iter_errors(instance)
        .map(|e| format!("{e}"))
        .collect()
}

fn sample_run() -> SyncRun {
    let started = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap();
    let mut run = SyncRun::new(
        "run-0a1b2c3d".into(),
        ScopeSelector::District("D1".into()),
        RecordKind::SYNC_ORDER.to_vec(),
        false,
        started,
    );
    run.record_outcome(KindOutcome::succeeded(
        RecordKind::Student,
        KindCounts {
            fetched: 3,
            created: 2,
            unchanged: 1,
            ..KindCounts::default()
        },
    ))
    .unwrap();
    run.record_outcome(KindOutcome::failed(
        RecordKind::Event,
        KindCounts::default(),
        "transient fetch error after 5 attempts",
    ))
    .unwrap();
    run.record_finding(ValidationFinding::error(
        vms_core::rules::GRADE_RANGE,
        RecordRef::new(
            RecordKind::Student,
            "003000000000000013",
            Some("D1".into()),
        ),
        "grade 13 outside [0, 12]",
    ))
    .unwrap();
    run.finalize(started + chrono::Duration::minutes(3)).unwrap();
    run
}

#[test]
fn run_report_roundtrips_and_matches_schema() {
    let report = RunReport::from_run(sample_run());
    assert_eq!(report.run.status, Some(RunStatus::PartialFailure));

    let json_str = serde_json::to_string_pretty(&report).unwrap();
    let recovered: RunReport = serde_json::from_str(&json_str).unwrap();
    assert_eq!(recovered, report);

    let schema = serde_json::to_value(schema_for!(RunReport)).unwrap();
    let instance = serde_json::to_value(&report).unwrap();
    let errors = validate_against_schema(&schema, &instance);
    assert!(errors.is_empty(), "schema validation failed: {errors:?}");
}

#[test]
fn report_uses_partial_status_label() {
    let report = RunReport::from_run(sample_run());
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["run"]["status"], json!("partial"));
    assert_eq!(value["run"]["scope"], json!({"district": "D1"}));
    assert_eq!(value["summary"]["failed_kinds"], json!(["event"]));
}

#[test]
fn conflict_decision_matches_schema() {
    let decision = ReconciliationDecision::Conflict {
        target: RecordRef::new(RecordKind::Student, "003000000000000001", None),
        local_id: "rec-00000001".into(),
        diff: vec![FieldChange {
            field: "first_name".into(),
            local: Some(json!("Ada")),
            source: Some(json!("Adah")),
        }],
        local_updated_at: Utc::now(),
        source_modified: None,
    };
    let schema = serde_json::to_value(schema_for!(ReconciliationDecision)).unwrap();
    let instance = serde_json::to_value(&decision).unwrap();
    assert_eq!(instance["decision"], json!("conflict"));
    let errors = validate_against_schema(&schema, &instance);
    assert!(errors.is_empty(), "schema validation failed: {errors:?}");
}
