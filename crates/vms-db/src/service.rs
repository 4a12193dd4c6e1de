//! Store service wrapping the raw database handle.
//!
//! `SyncStore` is the type the sync pipeline writes through. All repository
//! methods live in `repos/` as `impl SyncStore` blocks.

use crate::VmsDb;
use crate::error::DatabaseError;

pub struct SyncStore {
    db: VmsDb,
}

impl SyncStore {
    /// Open a store at `db_path`, or `":memory:"` for tests.
    ///
    /// Parent directories of a file path are created when missing.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the directory or database cannot be opened.
    pub async fn open(db_path: &str) -> Result<Self, DatabaseError> {
        if db_path != ":memory:"
            && let Some(parent) = std::path::Path::new(db_path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::InvalidState(format!(
                    "cannot create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let db = VmsDb::open_local(db_path).await?;
        tracing::debug!(path = db_path, "opened sync store");
        Ok(Self { db })
    }

    #[must_use]
    pub const fn from_db(db: VmsDb) -> Self {
        Self { db }
    }

    /// Access the underlying database handle.
    #[must_use]
    pub const fn db(&self) -> &VmsDb {
        &self.db
    }
}
