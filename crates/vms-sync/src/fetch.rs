//! Paging through one record kind of the CRM.
//!
//! Every page request is retried on its own. When the CRM addresses pages by
//! offset and reports the total size, the remaining pages are requested with
//! bounded concurrency; locator cursors are followed one after another.

use futures::stream::{self, StreamExt};

use vms_core::entities::ExternalRecord;
use vms_core::enums::RecordKind;
use vms_crm::{CrmClient, CrmError, Page, PageCursor};

use crate::error::SyncError;
use crate::retry::{Backoff, RetryError};

/// Fetch all records of `kind`, in CRM order.
///
/// # Errors
///
/// Returns [`SyncError::Authentication`] when the CRM rejects the
/// credentials, [`SyncError::TransientFetch`] when a page kept failing
/// transiently, and [`SyncError::KindFailed`] for any other CRM error.
pub async fn fetch_all<C: CrmClient + ?Sized>(
    crm: &C,
    kind: RecordKind,
    backoff: &Backoff,
    concurrency: usize,
) -> Result<Vec<ExternalRecord>, SyncError> {
    let first = fetch_page(crm, kind, backoff, None).await?;
    let mut records = first.records;
    let mut pages = 1_usize;

    match (first.next_cursor, first.total_size) {
        (Some(PageCursor::Offset(page_len)), Some(total)) if concurrency > 1 && page_len > 0 => {
            let offsets: Vec<usize> = (page_len..total).step_by(page_len).collect();
            let mut rest = stream::iter(offsets)
                .map(|offset| async move {
                    fetch_page(crm, kind, backoff, Some(&PageCursor::Offset(offset))).await
                })
                .buffered(concurrency);
            while let Some(page) = rest.next().await {
                records.extend(page?.records);
                pages += 1;
            }
        }
        (mut cursor, _) => {
            while let Some(next) = cursor {
                let page = fetch_page(crm, kind, backoff, Some(&next)).await?;
                if page.next_cursor.as_ref() == Some(&next) {
                    return Err(SyncError::KindFailed {
                        kind,
                        reason: format!("CRM returned the same cursor twice: {next:?}"),
                    });
                }
                records.extend(page.records);
                cursor = page.next_cursor;
                pages += 1;
            }
        }
    }

    tracing::info!(%kind, records = records.len(), pages, "fetched kind");
    Ok(records)
}

async fn fetch_page<C: CrmClient + ?Sized>(
    crm: &C,
    kind: RecordKind,
    backoff: &Backoff,
    cursor: Option<&PageCursor>,
) -> Result<Page, SyncError> {
    let what = format!("fetch {kind} page");
    backoff
        .run(&what, || crm.fetch_page(kind, cursor))
        .await
        .map_err(|e| match e {
            RetryError::Fatal(CrmError::Authentication(reason)) => {
                SyncError::Authentication(reason)
            }
            RetryError::Fatal(other) => SyncError::KindFailed {
                kind,
                reason: other.to_string(),
            },
            RetryError::Exhausted { attempts, last } => SyncError::TransientFetch {
                kind,
                attempts,
                source: last,
            },
        })
}
