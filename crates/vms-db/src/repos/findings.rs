//! Validation findings, partitioned by scope key.
//!
//! Findings are append-only within a run. A new non-dry run for a scope
//! clears that scope's partition before writing its own.

use vms_core::entities::{RecordRef, ValidationFinding};
use vms_core::ids::PREFIX_FINDING;

use crate::error::DatabaseError;
use crate::helpers::{get_opt_string, parse_enum};
use crate::service::SyncStore;

fn row_to_finding(row: &libsql::Row) -> Result<ValidationFinding, DatabaseError> {
    Ok(ValidationFinding {
        rule_id: row.get::<String>(0)?,
        severity: parse_enum(&row.get::<String>(1)?)?,
        record: RecordRef {
            kind: parse_enum(&row.get::<String>(2)?)?,
            external_id: row.get::<String>(3)?,
            district: get_opt_string(row, 4)?,
        },
        message: row.get::<String>(5)?,
    })
}

impl SyncStore {
    /// Drop every finding stored for `scope`. Returns the number removed.
    pub async fn clear_findings(&self, scope: &str) -> Result<u64, DatabaseError> {
        let removed = self
            .db()
            .execute("DELETE FROM validation_findings WHERE scope = ?1", [scope])
            .await?;
        tracing::debug!(scope, removed, "cleared findings");
        Ok(removed)
    }

    /// Append the findings of one run.
    pub async fn insert_findings(
        &self,
        run_id: &str,
        scope: &str,
        findings: &[ValidationFinding],
    ) -> Result<(), DatabaseError> {
        for finding in findings {
            let id = self.db().generate_id(PREFIX_FINDING).await?;
            self.db()
                .execute(
                    "INSERT INTO validation_findings
                     (id, run_id, scope, rule_id, severity, record_kind, external_id, district, message)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    libsql::params![
                        id.as_str(),
                        run_id,
                        scope,
                        finding.rule_id.as_str(),
                        finding.severity.as_str(),
                        finding.record.kind.as_str(),
                        finding.record.external_id.as_str(),
                        finding.record.district.as_deref(),
                        finding.message.as_str()
                    ],
                )
                .await?;
        }
        Ok(())
    }

    /// Current findings of a scope, in insertion order.
    pub async fn list_findings(&self, scope: &str) -> Result<Vec<ValidationFinding>, DatabaseError> {
        let mut rows = self
            .db()
            .query(
                "SELECT rule_id, severity, record_kind, external_id, district, message
                 FROM validation_findings WHERE scope = ?1 ORDER BY rowid",
                [scope],
            )
            .await?;
        let mut findings = Vec::new();
        while let Some(row) = rows.next().await? {
            findings.push(row_to_finding(&row)?);
        }
        Ok(findings)
    }
}
