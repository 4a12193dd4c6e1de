//! Sync run repository. Finalized runs are stored once with their full
//! report JSON and kept for audit.

use vms_core::entities::RunReport;

use crate::error::DatabaseError;
use crate::service::SyncStore;

fn row_to_report(row: &libsql::Row) -> Result<RunReport, DatabaseError> {
    let raw = row.get::<String>(0)?;
    serde_json::from_str(&raw)
        .map_err(|e| DatabaseError::InvalidState(format!("corrupt run report: {e}")))
}

impl SyncStore {
    /// Persist a finalized run. Unfinalized runs and duplicate IDs are rejected.
    pub async fn save_run(&self, report: &RunReport) -> Result<(), DatabaseError> {
        let run = &report.run;
        let (Some(status), Some(finished_at)) = (run.status, run.finished_at) else {
            return Err(DatabaseError::InvalidState(format!(
                "run {} is not finalized",
                run.id
            )));
        };

        self.db()
            .execute(
                "INSERT INTO sync_runs (id, scope, status, started_at, finished_at, report)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                libsql::params![
                    run.id.as_str(),
                    run.scope.key(),
                    status.as_str(),
                    run.started_at.to_rfc3339(),
                    finished_at.to_rfc3339(),
                    serde_json::to_string(report)?
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn get_run(&self, id: &str) -> Result<RunReport, DatabaseError> {
        let mut rows = self
            .db()
            .query("SELECT report FROM sync_runs WHERE id = ?1", [id])
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        row_to_report(&row)
    }

    /// Most recent run, optionally restricted to one scope key.
    pub async fn latest_run(&self, scope_key: Option<&str>) -> Result<Option<RunReport>, DatabaseError> {
        let mut rows = match scope_key {
            Some(scope) => {
                self.db()
                    .query(
                        "SELECT report FROM sync_runs WHERE scope = ?1
                         ORDER BY started_at DESC, rowid DESC LIMIT 1",
                        [scope],
                    )
                    .await?
            }
            None => {
                self.db()
                    .query(
                        "SELECT report FROM sync_runs ORDER BY started_at DESC, rowid DESC LIMIT 1",
                        (),
                    )
                    .await?
            }
        };
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_report(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunReport>, DatabaseError> {
        let mut rows = self
            .db()
            .query(
                &format!(
                    "SELECT report FROM sync_runs ORDER BY started_at DESC, rowid DESC LIMIT {limit}"
                ),
                (),
            )
            .await?;
        let mut reports = Vec::new();
        while let Some(row) = rows.next().await? {
            reports.push(row_to_report(&row)?);
        }
        Ok(reports)
    }
}
