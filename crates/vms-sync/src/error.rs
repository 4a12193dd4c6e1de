//! Sync pipeline error taxonomy.
//!
//! Per-record problems never surface here: they become findings and skip
//! counts. These variants are what a stage, a kind or a whole run can fail
//! with.

use thiserror::Error;

use vms_config::ConfigError;
use vms_core::enums::RecordKind;
use vms_core::errors::CoreError;
use vms_crm::CrmError;
use vms_db::error::DatabaseError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// An external ID failed its kind's format rule.
    #[error("invalid {kind} identifier '{value}': {reason}")]
    InvalidIdentifier {
        kind: RecordKind,
        value: String,
        reason: String,
    },

    /// CRM fetches kept failing transiently until the retry budget ran out.
    #[error("fetching {kind} failed after {attempts} attempts: {source}")]
    TransientFetch {
        kind: RecordKind,
        attempts: u32,
        #[source]
        source: CrmError,
    },

    /// A kind could not be synchronized; the run continues with other kinds.
    #[error("{kind} failed: {reason}")]
    KindFailed { kind: RecordKind, reason: String },

    /// The CRM rejected our credentials.
    #[error("CRM authentication failed: {0}")]
    Authentication(String),

    /// Local edits are newer than the source.
    #[error("{kind} {external_id} was edited locally after the source changed")]
    ReconciliationConflict {
        kind: RecordKind,
        external_id: String,
    },

    /// A uniqueness rule of the local store rejected the write.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The local store failed.
    #[error("persistence failure: {message}")]
    Persistence { message: String, transient: bool },

    /// Another run holds the scope lock.
    #[error("a sync run for scope '{scope}' is already in progress ({holder})")]
    RunAlreadyInProgress { scope: String, holder: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl SyncError {
    /// Errors that end the run as `failed` instead of failing one kind.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::Persistence { .. } | Self::Config(_) | Self::Core(_)
        )
    }
}

impl From<DatabaseError> for SyncError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::Constraint(msg) => Self::ConstraintViolation(msg),
            other => Self::Persistence {
                transient: other.is_transient(),
                message: other.to_string(),
            },
        }
    }
}
