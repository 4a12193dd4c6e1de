use anyhow::Context;

use crate::cli::{GlobalFlags, UserCommands};
use crate::context::AppContext;
use crate::output::{describe_scope, output};

/// Handle `vms user`.
pub async fn handle(
    action: &UserCommands,
    ctx: &AppContext,
    flags: &GlobalFlags,
) -> anyhow::Result<()> {
    match action {
        UserCommands::Add {
            username,
            scope,
            external_id,
        } => {
            let user = ctx
                .store
                .create_user(username, external_id.as_deref(), scope)
                .await
                .with_context(|| format!("failed to add user '{username}'"))?;
            tracing::info!(username = %user.username, scope = %describe_scope(&user.scope), "user added");
            output(&user, flags.format)
        }
        UserCommands::SetScope { username, scope } => {
            let user = ctx
                .store
                .set_user_scope(username, scope)
                .await
                .with_context(|| format!("failed to change scope of '{username}'"))?;
            output(&user, flags.format)
        }
        UserCommands::List => {
            let users = ctx.store.list_users().await?;
            output(&users, flags.format)
        }
    }
}
