use std::path::PathBuf;

use clap::{Args, Subcommand};
use vms_core::enums::RecordKind;
use vms_core::scope::{ScopeSelector, UserScope};

/// Top-level command tree.
#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    /// Pull records from the CRM into the local store.
    Run(RunArgs),
    /// Show a stored run report.
    Report(ReportArgs),
    /// Scoped users.
    User {
        #[command(subcommand)]
        action: UserCommands,
    },
    /// Print the JSON schema of the run report.
    Schema,
}

#[derive(Clone, Debug, Args)]
pub struct RunArgs {
    /// `global` or `district:<name>`
    #[arg(long, default_value = "global")]
    pub scope: ScopeSelector,

    /// Only sync these kinds (repeatable). Defaults to all kinds.
    #[arg(long = "kind", value_name = "KIND")]
    pub kinds: Vec<RecordKind>,

    /// Fetch and plan without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Also write the run report as JSON to this path.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

#[derive(Clone, Debug, Args)]
pub struct ReportArgs {
    /// Run ID. Defaults to the most recent run.
    #[arg(long)]
    pub run: Option<String>,

    /// Only show findings this user is allowed to see.
    #[arg(long, value_name = "USERNAME")]
    pub user: Option<String>,
}

#[derive(Clone, Debug, Subcommand)]
pub enum UserCommands {
    /// Provision a user with a scope.
    Add {
        username: String,
        /// `global` or `district:<a,b,...>`
        #[arg(long)]
        scope: UserScope,
        /// CRM user ID, used to check participation ownership.
        #[arg(long)]
        external_id: Option<String>,
    },
    /// Replace a user's scope.
    SetScope {
        username: String,
        #[arg(long)]
        scope: UserScope,
    },
    /// List users and their scopes.
    List,
}
