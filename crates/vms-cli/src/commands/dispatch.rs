use crate::cli::{Commands, GlobalFlags};
use crate::commands;
use crate::context::AppContext;

/// Dispatch a parsed command. Returns the process exit code.
pub async fn dispatch(
    command: Commands,
    ctx: &AppContext,
    flags: &GlobalFlags,
) -> anyhow::Result<i32> {
    match command {
        Commands::Run(args) => commands::run::handle(&args, ctx, flags).await,
        Commands::Report(args) => commands::report::handle(&args, ctx, flags).await.map(|()| 0),
        Commands::User { action } => commands::user::handle(&action, ctx, flags).await.map(|()| 0),
        Commands::Schema => commands::schema::handle(flags).map(|()| 0),
    }
}
