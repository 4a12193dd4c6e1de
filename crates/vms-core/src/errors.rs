//! Cross-cutting error types.
//!
//! Domain-specific errors (`DatabaseError`, `CrmError`, `SyncError`) live in
//! their respective crates. A unified error is deferred to `vms-cli` where all
//! crate errors converge into `anyhow`.

use thiserror::Error;

/// Errors that can be raised by any VMS sync crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity lookup returned no result.
    #[error("Entity not found: {entity_type} {id}")]
    NotFound { entity_type: String, id: String },

    /// An external identifier does not match the CRM ID format of its kind.
    #[error("Invalid {kind} identifier '{value}': {reason}")]
    InvalidIdentifier {
        kind: String,
        value: String,
        reason: String,
    },

    /// A scope selector or user scope is malformed.
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// A state machine transition was attempted that is not allowed.
    #[error("Invalid state transition: {entity_type} {id} from {from} to {to}")]
    InvalidTransition {
        entity_type: String,
        id: String,
        from: String,
        to: String,
    },

    /// A sync run was finalized a second time.
    #[error("Run {0} is already finalized")]
    AlreadyFinalized(String),

    /// Data failed validation (schema, format, constraints).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Catch-all for unexpected errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
