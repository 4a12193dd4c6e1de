//! Advisory scope locks.
//!
//! One row per scope key while a run holds it. A lock whose holder has not
//! released it within the stale window is reclaimed by the next caller.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::helpers::parse_datetime;
use crate::service::SyncStore;

/// Current holder of a scope lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeLock {
    pub scope: String,
    pub run_id: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl ScopeLock {
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        (now - self.acquired_at)
            .to_std()
            .is_ok_and(|age| age >= stale_after)
    }
}

/// Result of a single acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired,
    Held(ScopeLock),
}

fn row_to_lock(row: &libsql::Row) -> Result<ScopeLock, DatabaseError> {
    let pid = row.get::<i64>(2)?;
    Ok(ScopeLock {
        scope: row.get::<String>(0)?,
        run_id: row.get::<String>(1)?,
        pid: u32::try_from(pid).map_err(|e| DatabaseError::InvalidState(e.to_string()))?,
        acquired_at: parse_datetime(&row.get::<String>(3)?)?,
    })
}

impl SyncStore {
    /// Try once to take the lock for `scope` on behalf of `run_id`.
    pub async fn try_acquire_lock(
        &self,
        scope: &str,
        run_id: &str,
        stale_after: Duration,
    ) -> Result<LockAttempt, DatabaseError> {
        if self.insert_lock(scope, run_id).await? {
            return Ok(LockAttempt::Acquired);
        }

        let Some(holder) = self.current_lock(scope).await? else {
            // Released between our insert and read.
            return Ok(if self.insert_lock(scope, run_id).await? {
                LockAttempt::Acquired
            } else {
                LockAttempt::Held(self.current_lock(scope).await?.ok_or(DatabaseError::NoResult)?)
            });
        };

        if holder.is_stale(Utc::now(), stale_after) {
            tracing::warn!(
                scope,
                stale_run = %holder.run_id,
                stale_pid = holder.pid,
                acquired_at = %holder.acquired_at,
                "reclaiming stale scope lock"
            );
            self.db()
                .execute(
                    "DELETE FROM sync_locks WHERE scope = ?1 AND run_id = ?2",
                    [scope, holder.run_id.as_str()],
                )
                .await?;
            if self.insert_lock(scope, run_id).await? {
                return Ok(LockAttempt::Acquired);
            }
            let current = self.current_lock(scope).await?.ok_or(DatabaseError::NoResult)?;
            return Ok(LockAttempt::Held(current));
        }

        Ok(LockAttempt::Held(holder))
    }

    async fn insert_lock(&self, scope: &str, run_id: &str) -> Result<bool, DatabaseError> {
        let inserted = self
            .db()
            .execute(
                "INSERT OR IGNORE INTO sync_locks (scope, run_id, pid, acquired_at)
                 VALUES (?1, ?2, ?3, ?4)",
                libsql::params![
                    scope,
                    run_id,
                    i64::from(std::process::id()),
                    Utc::now().to_rfc3339()
                ],
            )
            .await?;
        Ok(inserted == 1)
    }

    /// Release a lock held by `run_id`. Returns false if it was not held by it.
    pub async fn release_lock(&self, scope: &str, run_id: &str) -> Result<bool, DatabaseError> {
        let removed = self
            .db()
            .execute(
                "DELETE FROM sync_locks WHERE scope = ?1 AND run_id = ?2",
                [scope, run_id],
            )
            .await?;
        Ok(removed == 1)
    }

    pub async fn current_lock(&self, scope: &str) -> Result<Option<ScopeLock>, DatabaseError> {
        let mut rows = self
            .db()
            .query(
                "SELECT scope, run_id, pid, acquired_at FROM sync_locks WHERE scope = ?1",
                [scope],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_lock(&row)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_support::test_store;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn second_run_sees_holder() {
        let store = test_store().await;
        assert_eq!(
            store
                .try_acquire_lock("district:D1", "run-00000001", HOUR)
                .await
                .unwrap(),
            LockAttempt::Acquired
        );
        let attempt = store
            .try_acquire_lock("district:D1", "run-00000002", HOUR)
            .await
            .unwrap();
        match attempt {
            LockAttempt::Held(holder) => assert_eq!(holder.run_id, "run-00000001"),
            LockAttempt::Acquired => panic!("lock should be held"),
        }
    }

    #[tokio::test]
    async fn different_scopes_do_not_contend() {
        let store = test_store().await;
        for (scope, run) in [("district:D1", "run-1"), ("district:D2", "run-2"), ("global", "run-3")] {
            assert_eq!(
                store.try_acquire_lock(scope, run, HOUR).await.unwrap(),
                LockAttempt::Acquired
            );
        }
    }

    #[tokio::test]
    async fn release_frees_the_scope() {
        let store = test_store().await;
        store.try_acquire_lock("global", "run-1", HOUR).await.unwrap();
        assert!(!store.release_lock("global", "run-other").await.unwrap());
        assert!(store.release_lock("global", "run-1").await.unwrap());
        assert!(store.current_lock("global").await.unwrap().is_none());
        assert_eq!(
            store.try_acquire_lock("global", "run-2", HOUR).await.unwrap(),
            LockAttempt::Acquired
        );
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimed() {
        let store = test_store().await;
        store
            .db()
            .execute(
                "INSERT INTO sync_locks (scope, run_id, pid, acquired_at)
                 VALUES ('global', 'run-crashed', 1, '2020-01-01T00:00:00+00:00')",
                (),
            )
            .await
            .unwrap();

        assert_eq!(
            store.try_acquire_lock("global", "run-new", HOUR).await.unwrap(),
            LockAttempt::Acquired
        );
        let holder = store.current_lock("global").await.unwrap().unwrap();
        assert_eq!(holder.run_id, "run-new");
        assert_eq!(holder.pid, std::process::id());
    }
}
