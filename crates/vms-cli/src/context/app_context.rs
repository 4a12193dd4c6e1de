use std::sync::Arc;

use anyhow::Context;
use vms_config::SyncConfig;
use vms_db::service::SyncStore;

/// Shared application resources initialized once at startup.
pub struct AppContext {
    pub store: Arc<SyncStore>,
    pub config: SyncConfig,
}

impl AppContext {
    /// Open the local store named by `store.db_path`.
    pub async fn init(config: SyncConfig) -> anyhow::Result<Self> {
        let db_path = config.store.db_path.to_string_lossy().into_owned();
        let store = SyncStore::open(&db_path)
            .await
            .with_context(|| format!("failed to open store at {db_path}"))?;
        tracing::debug!(path = %db_path, "store ready");
        Ok(Self {
            store: Arc::new(store),
            config,
        })
    }
}
