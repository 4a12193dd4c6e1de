use std::sync::Arc;

use anyhow::Context;
use vms_core::enums::RunStatus;
use vms_crm::SalesforceClient;
use vms_sync::report::write_report;
use vms_sync::{CancelToken, LocalStore, Orchestrator, RunObserver, RunRequest};

use crate::cli::{GlobalFlags, RunArgs};
use crate::context::AppContext;
use crate::output::output;
use crate::progress::KindProgress;

/// Handle `vms run`. Exit code follows the run status.
pub async fn handle(args: &RunArgs, ctx: &AppContext, flags: &GlobalFlags) -> anyhow::Result<i32> {
    ctx.config
        .validate_for_sync()
        .context("CRM credentials missing; set the [crm] section or VMS_CRM__* variables")?;
    let crm = SalesforceClient::new(&ctx.config.crm).context("failed to build CRM client")?;

    let cancel = CancelToken::new();
    let mut orchestrator = Orchestrator::new(
        Arc::new(crm),
        Arc::clone(&ctx.store) as Arc<dyn LocalStore>,
        ctx.config.clone(),
    )?
    .with_cancel(cancel.clone());
    if let Some(progress) = KindProgress::for_terminal() {
        orchestrator = orchestrator.with_observer(Arc::new(progress) as Arc<dyn RunObserver>);
    }

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current kind");
            cancel.cancel();
        }
    });

    let request = RunRequest::new(args.scope.clone())
        .with_kinds(args.kinds.iter().copied())
        .dry_run(args.dry_run);
    let result = orchestrator.run(request).await;
    interrupt.abort();
    let report = result.context("sync run did not complete")?;

    if let Some(path) = &args.report {
        write_report(path, &report)?;
        tracing::info!(path = %path.display(), "wrote run report");
    }

    output(&report, flags.format)?;
    Ok(report.run.status.map_or(1, exit_code))
}

#[must_use]
pub const fn exit_code(status: RunStatus) -> i32 {
    match status {
        RunStatus::Succeeded => 0,
        RunStatus::PartialFailure => 3,
        RunStatus::Failed => 1,
    }
}
