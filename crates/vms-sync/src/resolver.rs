//! Identity resolution: external CRM ID to local record.

use vms_core::entities::LocalRecord;
use vms_core::enums::RecordKind;
use vms_core::errors::CoreError;
use vms_core::ids::ExternalId;

use crate::error::SyncError;
use crate::retry::Backoff;
use crate::store::LocalStore;

/// Result of looking up an external ID.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found(LocalRecord),
    NotFound,
}

impl Resolution {
    #[must_use]
    pub fn into_local(self) -> Option<LocalRecord> {
        match self {
            Self::Found(local) => Some(local),
            Self::NotFound => None,
        }
    }
}

/// Read-only lookup of local records by external ID. Never creates records.
pub struct IdentityResolver<'a, S: ?Sized> {
    store: &'a S,
    backoff: Backoff,
}

impl<'a, S: LocalStore + ?Sized> IdentityResolver<'a, S> {
    pub const fn new(store: &'a S, backoff: Backoff) -> Self {
        Self { store, backoff }
    }

    /// Validate `external_id` against the format rule of `kind`, then look it
    /// up.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidIdentifier`] for malformed IDs and
    /// [`SyncError::Persistence`] when the lookup keeps failing.
    pub async fn resolve(
        &self,
        external_id: &str,
        kind: RecordKind,
    ) -> Result<Resolution, SyncError> {
        let id = ExternalId::parse(kind, external_id).map_err(|e| match e {
            CoreError::InvalidIdentifier { value, reason, .. } => {
                SyncError::InvalidIdentifier { kind, value, reason }
            }
            other => SyncError::Core(other),
        })?;

        let found = self
            .backoff
            .persist("resolve identity", || self.store.find_record(kind, id.as_str()))
            .await?;
        Ok(found.map_or(Resolution::NotFound, Resolution::Found))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use vms_db::service::SyncStore;

    use super::*;
    use crate::test_support::{fast_backoff, fields, sf_id};

    #[tokio::test]
    async fn finds_existing_record() {
        let store = SyncStore::open(":memory:").await.unwrap();
        let ext = sf_id("003", 1);
        let inserted = LocalStore::insert_record(
            &store,
            RecordKind::Student,
            &ext,
            &fields(&[("grade", json!(7))]),
            Some("D1"),
            Utc::now(),
        )
        .await
        .unwrap();

        let resolver = IdentityResolver::new(&store, fast_backoff());
        let found = resolver.resolve(&ext, RecordKind::Student).await.unwrap();
        assert_eq!(found, Resolution::Found(inserted));
    }

    #[tokio::test]
    async fn kind_is_part_of_identity() {
        let store = SyncStore::open(":memory:").await.unwrap();
        let ext = sf_id("003", 1);
        LocalStore::insert_record(&store, RecordKind::Student, &ext, &fields(&[]), None, Utc::now())
            .await
            .unwrap();

        let resolver = IdentityResolver::new(&store, fast_backoff());
        let found = resolver.resolve(&ext, RecordKind::Event).await.unwrap();
        assert_eq!(found, Resolution::NotFound);
    }

    #[tokio::test]
    async fn malformed_id_is_rejected_before_lookup() {
        let store = SyncStore::open(":memory:").await.unwrap();
        let resolver = IdentityResolver::new(&store, fast_backoff());
        let err = resolver
            .resolve("003-not-an-id", RecordKind::Student)
            .await
            .unwrap_err();
        match err {
            SyncError::InvalidIdentifier { kind, value, .. } => {
                assert_eq!(kind, RecordKind::Student);
                assert_eq!(value, "003-not-an-id");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
