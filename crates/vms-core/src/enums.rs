//! Record kinds, severities, run phases and statuses.
//!
//! All enums use `snake_case` serialization via `#[serde(rename_all = "snake_case")]`.
//! `RunPhase` provides `allowed_next_states()` to enforce valid orchestrator
//! transitions at the application layer.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::CoreError;

// ---------------------------------------------------------------------------
// RecordKind
// ---------------------------------------------------------------------------

/// The fixed set of CRM record kinds handled by the pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Organization,
    School,
    Student,
    Event,
    ParticipationLink,
    User,
}

impl RecordKind {
    /// Dependency order used by every sync run. Referenced kinds always come
    /// before the kinds that reference them.
    pub const SYNC_ORDER: [Self; 6] = [
        Self::Organization,
        Self::School,
        Self::Student,
        Self::Event,
        Self::ParticipationLink,
        Self::User,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::School => "school",
            Self::Student => "student",
            Self::Event => "event",
            Self::ParticipationLink => "participation_link",
            Self::User => "user",
        }
    }

    /// Position of this kind in [`Self::SYNC_ORDER`].
    #[must_use]
    pub const fn sync_rank(self) -> usize {
        match self {
            Self::Organization => 0,
            Self::School => 1,
            Self::Student => 2,
            Self::Event => 3,
            Self::ParticipationLink => 4,
            Self::User => 5,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::SYNC_ORDER
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .or_else(|| match normalized.as_str() {
                "participation" | "link" => Some(Self::ParticipationLink),
                "org" => Some(Self::Organization),
                _ => None,
            })
            .ok_or_else(|| CoreError::Validation(format!("unknown record kind '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Severity of a validation finding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Terminal status of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    #[serde(rename = "partial")]
    PartialFailure,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::PartialFailure => "partial",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// KindStatus
// ---------------------------------------------------------------------------

/// Outcome of one record kind within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum KindStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl KindStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for KindStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RunPhase
// ---------------------------------------------------------------------------

/// Orchestrator state machine.
///
/// ```text
/// idle → fetching ⇄ reconciling → validating → finalizing → succeeded
///          ↘ (kind failed) fetching                       → partial_failure
///   any non-terminal → finalizing (fatal / cancelled)     → failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Fetching,
    Reconciling,
    Validating,
    Finalizing,
    Succeeded,
    PartialFailure,
    Failed,
}

impl RunPhase {
    /// Valid next states from the current state.
    #[must_use]
    pub const fn allowed_next_states(self) -> &'static [Self] {
        match self {
            Self::Idle => &[Self::Fetching, Self::Validating, Self::Finalizing],
            Self::Fetching => &[
                Self::Fetching,
                Self::Reconciling,
                Self::Validating,
                Self::Finalizing,
            ],
            Self::Reconciling => &[Self::Fetching, Self::Validating, Self::Finalizing],
            Self::Validating => &[Self::Finalizing],
            Self::Finalizing => &[Self::Succeeded, Self::PartialFailure, Self::Failed],
            Self::Succeeded | Self::PartialFailure | Self::Failed => &[],
        }
    }

    /// Check whether transitioning to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_next_states().contains(&next)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::PartialFailure | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Reconciling => "reconciling",
            Self::Validating => "validating",
            Self::Finalizing => "finalizing",
            Self::Succeeded => "succeeded",
            Self::PartialFailure => "partial_failure",
            Self::Failed => "failed",
        }
    }
}

impl From<RunStatus> for RunPhase {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Succeeded => Self::Succeeded,
            RunStatus::PartialFailure => Self::PartialFailure,
            RunStatus::Failed => Self::Failed,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_order_matches_rank() {
        for (idx, kind) in RecordKind::SYNC_ORDER.iter().enumerate() {
            assert_eq!(kind.sync_rank(), idx, "{kind} out of order");
        }
    }

    #[test]
    fn participation_follows_event_and_student() {
        let link = RecordKind::ParticipationLink.sync_rank();
        assert!(RecordKind::Event.sync_rank() < link);
        assert!(RecordKind::Student.sync_rank() < link);
    }

    #[test]
    fn record_kind_parses_aliases() {
        assert_eq!(
            "participation-link".parse::<RecordKind>().unwrap(),
            RecordKind::ParticipationLink
        );
        assert_eq!(
            "Student".parse::<RecordKind>().unwrap(),
            RecordKind::Student
        );
        assert!("volunteer".parse::<RecordKind>().is_err());
    }

    #[test]
    fn run_status_serializes_partial() {
        let json = serde_json::to_string(&RunStatus::PartialFailure).unwrap();
        assert_eq!(json, "\"partial\"");
        let back: RunStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RunStatus::PartialFailure);
    }

    #[test]
    fn terminal_phases_have_no_successors() {
        for phase in [RunPhase::Succeeded, RunPhase::PartialFailure, RunPhase::Failed] {
            assert!(phase.is_terminal());
            assert!(phase.allowed_next_states().is_empty());
        }
    }

    #[test]
    fn validating_only_moves_to_finalizing() {
        assert!(RunPhase::Validating.can_transition_to(RunPhase::Finalizing));
        assert!(!RunPhase::Validating.can_transition_to(RunPhase::Fetching));
        assert!(!RunPhase::Idle.can_transition_to(RunPhase::Succeeded));
    }

    #[test]
    fn severity_orders_error_above_warning() {
        assert!(Severity::Error > Severity::Warning);
    }
}
