//! Entity structs for the sync pipeline.
//!
//! Records, participation links, users and runs map to tables in the local
//! libSQL store (see `vms-db/migrations`). Report-facing structs derive
//! `JsonSchema` so the run report schema can be exported.

mod finding;
mod record;
mod run;
mod user;

pub use finding::ValidationFinding;
pub use record::{ExternalRecord, Fields, LocalRecord, ParticipationLink, RecordRef, field_text};
pub use run::{KindCounts, KindOutcome, ReportSummary, RunReport, SyncRun};
pub use user::ScopedUser;
