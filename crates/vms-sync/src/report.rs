//! Run report export.

use std::path::Path;

use vms_core::entities::RunReport;

use crate::error::SyncError;

/// Write `report` as pretty-printed JSON to `path`, creating parent
/// directories as needed.
///
/// # Errors
///
/// Returns [`SyncError::Persistence`] if the file cannot be written.
pub fn write_report(path: &Path, report: &RunReport) -> Result<(), SyncError> {
    let io_error = |e: std::io::Error| SyncError::Persistence {
        message: format!("cannot write report to {}: {e}", path.display()),
        transient: false,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    let json = serde_json::to_string_pretty(report).map_err(|e| SyncError::Persistence {
        message: format!("cannot serialize report: {e}"),
        transient: false,
    })?;
    std::fs::write(path, json + "\n").map_err(io_error)
}

/// Read a report previously written by [`write_report`].
///
/// # Errors
///
/// Returns [`SyncError::Persistence`] if the file is missing or malformed.
pub fn read_report(path: &Path) -> Result<RunReport, SyncError> {
    let body = std::fs::read_to_string(path).map_err(|e| SyncError::Persistence {
        message: format!("cannot read report {}: {e}", path.display()),
        transient: false,
    })?;
    serde_json::from_str(&body).map_err(|e| SyncError::Persistence {
        message: format!("malformed report {}: {e}", path.display()),
        transient: false,
    })
}
