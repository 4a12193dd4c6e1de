use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scope::UserScope;

/// A provisioned account and its visibility boundary.
///
/// The scope is set at provisioning and changed only through an explicit
/// scope-change operation; syncing `User` records never touches it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopedUser {
    pub id: String,
    pub username: String,
    /// CRM identifier of the matching `User` record, when linked.
    pub external_id: Option<String>,
    #[serde(flatten)]
    pub scope: UserScope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScopedUser {
    #[must_use]
    pub fn can_see(&self, district: Option<&str>) -> bool {
        self.scope.allows(district)
    }
}
