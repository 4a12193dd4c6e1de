//! # vms-crm
//!
//! CRM access for VMS sync.
//!
//! [`CrmClient`] is the seam the sync pipeline fetches through: one page of
//! records of one kind per call, addressed by an opaque [`PageCursor`].
//! [`SalesforceClient`] implements it over the Salesforce REST API (OAuth2
//! password grant + SOQL queries following `nextRecordsUrl`).

mod error;
mod http;
pub mod salesforce;
pub mod soql;

pub use error::CrmError;
pub use salesforce::SalesforceClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vms_core::entities::ExternalRecord;
use vms_core::enums::RecordKind;

/// Position of the next page in a CRM result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageCursor {
    /// Record offset into the result set. Pages addressed this way can be
    /// fetched out of order and in parallel.
    Offset(usize),
    /// Server-issued locator for the next batch (e.g. `nextRecordsUrl`).
    Locator(String),
}

/// One batch of records.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    pub records: Vec<ExternalRecord>,
    pub next_cursor: Option<PageCursor>,
    /// Size of the whole result set, when the CRM reports it.
    pub total_size: Option<usize>,
}

/// Read access to the CRM.
///
/// `fetch_page` must be idempotent: fetching the same (kind, cursor) twice
/// yields the same records, so callers may retry freely.
#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn fetch_page(
        &self,
        kind: RecordKind,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, CrmError>;
}
