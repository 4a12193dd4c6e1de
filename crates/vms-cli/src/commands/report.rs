use anyhow::Context;
use vms_core::entities::RunReport;
use vms_db::service::SyncStore;
use vms_sync::scope::filter_report;

use crate::cli::{GlobalFlags, ReportArgs};
use crate::context::AppContext;
use crate::output::output;

/// Handle `vms report`.
pub async fn handle(args: &ReportArgs, ctx: &AppContext, flags: &GlobalFlags) -> anyhow::Result<()> {
    let report = load_report(args, &ctx.store).await?;
    output(&report, flags.format)
}

/// The requested (or latest) report, narrowed to what `--user` may see.
async fn load_report(args: &ReportArgs, store: &SyncStore) -> anyhow::Result<RunReport> {
    let report = match &args.run {
        Some(id) => store
            .get_run(id)
            .await
            .with_context(|| format!("no sync run with id '{id}'"))?,
        None => store
            .latest_run(None)
            .await?
            .context("no sync runs recorded yet")?,
    };

    match &args.user {
        Some(username) => {
            let user = store
                .get_user_by_username(username)
                .await
                .with_context(|| format!("unknown user '{username}'"))?;
            Ok(filter_report(&report, &user.scope))
        }
        None => Ok(report),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use vms_core::entities::{RecordRef, RunReport, SyncRun, ValidationFinding};
    use vms_core::enums::RecordKind;
    use vms_core::scope::{ScopeSelector, UserScope};
    use vms_db::service::SyncStore;

    use super::load_report;
    use crate::cli::ReportArgs;

    async fn store_with_run() -> SyncStore {
        let store = SyncStore::open(":memory:").await.unwrap();
        let mut run = SyncRun::new(
            "run-00000001".into(),
            ScopeSelector::Global,
            vec![RecordKind::Student],
            false,
            Utc::now(),
        );
        for (n, district) in [(1, "North"), (2, "South")] {
            run.record_finding(ValidationFinding::error(
                "student.grade_range",
                RecordRef::new(
                    RecordKind::Student,
                    format!("00300000000000000{n}"),
                    Some(district.into()),
                ),
                "grade 13 outside 0..=12",
            ))
            .unwrap();
        }
        run.finalize(Utc::now()).unwrap();
        store.save_run(&RunReport::from_run(run)).await.unwrap();
        store
            .create_user("north-admin", None, &UserScope::districts(["North"]).unwrap())
            .await
            .unwrap();
        store
    }

    fn args(run: Option<&str>, user: Option<&str>) -> ReportArgs {
        ReportArgs {
            run: run.map(str::to_string),
            user: user.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn latest_run_is_shown_unfiltered_without_user() {
        let store = store_with_run().await;
        let report = load_report(&args(None, None), &store).await.unwrap();
        assert_eq!(report.run.id, "run-00000001");
        assert_eq!(report.summary.errors, 2);
    }

    #[tokio::test]
    async fn district_user_sees_only_their_findings() {
        let store = store_with_run().await;
        let report = load_report(&args(Some("run-00000001"), Some("north-admin")), &store)
            .await
            .unwrap();
        assert_eq!(report.run.findings.len(), 1);
        assert_eq!(report.run.findings[0].record.district.as_deref(), Some("North"));
        assert_eq!(report.summary.errors, 1);
    }

    #[tokio::test]
    async fn unknown_user_and_missing_runs_are_errors() {
        let store = store_with_run().await;
        assert!(load_report(&args(None, Some("nobody")), &store).await.is_err());
        assert!(load_report(&args(Some("run-missing"), None), &store).await.is_err());

        let empty = SyncStore::open(":memory:").await.unwrap();
        let err = load_report(&args(None, None), &empty).await.unwrap_err();
        assert!(err.to_string().contains("no sync runs"));
    }
}
