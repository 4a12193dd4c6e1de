use std::path::PathBuf;

use anyhow::Context;
use vms_config::SyncConfig;

use crate::cli::GlobalFlags;

/// Load `.env`, then the layered configuration, then apply flag overrides.
pub fn load_config(flags: &GlobalFlags) -> anyhow::Result<SyncConfig> {
    load_dotenv()?;

    let mut config = SyncConfig::load().context("failed to load configuration")?;
    if let Some(db) = &flags.db {
        config.store.db_path = PathBuf::from(db);
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn load_dotenv() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("failed to determine current directory")?;
    let env_path = cwd.join(".env");
    if env_path.exists() {
        dotenvy::from_path(&env_path)
            .with_context(|| format!("failed to load dotenv file at {}", env_path.display()))?;
    }
    Ok(())
}
