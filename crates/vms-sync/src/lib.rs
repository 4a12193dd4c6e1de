//! # vms-sync
//!
//! The sync pipeline: pull CRM records kind by kind, reconcile them against
//! the local store, validate the result, and report.
//!
//! - [`resolver`]: external ID to local record lookup
//! - [`scope`]: district visibility for records, findings and reports
//! - [`reconciler`]: Create / Update / NoOp / Conflict decisions and writes
//! - [`validation`]: rule table applied after reconciliation
//! - [`orchestrator`]: run lifecycle, scope locks, retries and cancellation
//!
//! The pipeline reaches the CRM through [`vms_crm::CrmClient`] and the store
//! through [`store::LocalStore`], so both can be swapped in tests. The
//! doubles live in `test_support`, built for this crate's tests and behind
//! the `test-support` feature.

pub mod cancel;
pub mod error;
pub mod fetch;
pub mod orchestrator;
pub mod reconciler;
pub mod report;
pub mod resolver;
pub mod retry;
pub mod scope;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validation;

pub use cancel::CancelToken;
pub use error::SyncError;
pub use orchestrator::{Orchestrator, RunObserver, RunRequest};
pub use store::LocalStore;
