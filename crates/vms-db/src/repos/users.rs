//! Scoped user repository.
//!
//! The district set crosses the store boundary as a JSON array in
//! `allowed_districts`; everywhere else it is a typed `UserScope`.

use chrono::Utc;

use vms_core::entities::ScopedUser;
use vms_core::ids::PREFIX_USER;
use vms_core::scope::{ScopeType, UserScope};

use crate::error::DatabaseError;
use crate::helpers::{get_opt_string, parse_datetime, parse_enum};
use crate::service::SyncStore;

const USER_COLUMNS: &str =
    "id, username, external_id, scope_type, allowed_districts, created_at, updated_at";

fn scope_to_columns(scope: &UserScope) -> Result<(&'static str, Option<String>), DatabaseError> {
    let districts = match scope.allowed_districts() {
        Some(set) => Some(serde_json::to_string(set)?),
        None => None,
    };
    Ok((scope.scope_type().as_str(), districts))
}

fn scope_from_columns(
    scope_type: ScopeType,
    districts: Option<&str>,
) -> Result<UserScope, DatabaseError> {
    match scope_type {
        ScopeType::Global => Ok(UserScope::Global),
        ScopeType::District => {
            let names: Vec<String> = serde_json::from_str(districts.unwrap_or("[]"))?;
            UserScope::districts(names).map_err(|e| DatabaseError::InvalidState(e.to_string()))
        }
    }
}

fn row_to_user(row: &libsql::Row) -> Result<ScopedUser, DatabaseError> {
    let scope_type: ScopeType = parse_enum(&row.get::<String>(3)?)?;
    Ok(ScopedUser {
        id: row.get::<String>(0)?,
        username: row.get::<String>(1)?,
        external_id: get_opt_string(row, 2)?,
        scope: scope_from_columns(scope_type, get_opt_string(row, 4)?.as_deref())?,
        created_at: parse_datetime(&row.get::<String>(5)?)?,
        updated_at: parse_datetime(&row.get::<String>(6)?)?,
    })
}

impl SyncStore {
    /// Provision a user. Usernames and external IDs are unique.
    pub async fn create_user(
        &self,
        username: &str,
        external_id: Option<&str>,
        scope: &UserScope,
    ) -> Result<ScopedUser, DatabaseError> {
        let id = self.db().generate_id(PREFIX_USER).await?;
        let now = Utc::now();
        let (scope_type, districts) = scope_to_columns(scope)?;

        self.db()
            .execute(
                "INSERT INTO scoped_users
                 (id, username, external_id, scope_type, allowed_districts, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                libsql::params![
                    id.as_str(),
                    username,
                    external_id,
                    scope_type,
                    districts,
                    now.to_rfc3339()
                ],
            )
            .await?;

        Ok(ScopedUser {
            id,
            username: username.to_string(),
            external_id: external_id.map(str::to_string),
            scope: scope.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace a user's scope. The only path that changes a scope.
    pub async fn set_user_scope(
        &self,
        username: &str,
        scope: &UserScope,
    ) -> Result<ScopedUser, DatabaseError> {
        let (scope_type, districts) = scope_to_columns(scope)?;
        let changed = self
            .db()
            .execute(
                "UPDATE scoped_users SET scope_type = ?2, allowed_districts = ?3, updated_at = ?4
                 WHERE username = ?1",
                libsql::params![username, scope_type, districts, Utc::now().to_rfc3339()],
            )
            .await?;
        if changed == 0 {
            return Err(DatabaseError::NoResult);
        }
        tracing::info!(username, scope = ?scope, "user scope changed");
        self.get_user_by_username(username).await
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<ScopedUser, DatabaseError> {
        let mut rows = self
            .db()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM scoped_users WHERE username = ?1"),
                [username],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        row_to_user(&row)
    }

    pub async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ScopedUser>, DatabaseError> {
        let mut rows = self
            .db()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM scoped_users WHERE external_id = ?1"),
                [external_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_users(&self) -> Result<Vec<ScopedUser>, DatabaseError> {
        let mut rows = self
            .db()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM scoped_users ORDER BY username"),
                (),
            )
            .await?;
        let mut users = Vec::new();
        while let Some(row) = rows.next().await? {
            users.push(row_to_user(&row)?);
        }
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_support::test_store;

    #[tokio::test]
    async fn district_scope_roundtrips_through_json_column() {
        let store = test_store().await;
        let scope = UserScope::districts(["D2", "D1"]).unwrap();
        let user = store
            .create_user("kc.coordinator", Some("005000000000000001"), &scope)
            .await
            .unwrap();
        assert!(user.id.starts_with("usr-"));

        let loaded = store.get_user_by_username("kc.coordinator").await.unwrap();
        assert_eq!(loaded.scope, scope);
        assert_eq!(loaded.external_id.as_deref(), Some("005000000000000001"));

        let mut rows = store
            .db()
            .query(
                "SELECT allowed_districts FROM scoped_users WHERE username = ?1",
                ["kc.coordinator"],
            )
            .await
            .unwrap();
        let raw: String = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(raw, r#"["D1","D2"]"#);
    }

    #[tokio::test]
    async fn global_scope_stores_null_districts() {
        let store = test_store().await;
        store
            .create_user("admin", None, &UserScope::Global)
            .await
            .unwrap();
        let loaded = store.get_user_by_username("admin").await.unwrap();
        assert!(loaded.scope.is_global());
        assert!(loaded.external_id.is_none());
    }

    #[tokio::test]
    async fn set_scope_is_explicit_and_persisted() {
        let store = test_store().await;
        store
            .create_user("kc.coordinator", None, &UserScope::districts(["D1"]).unwrap())
            .await
            .unwrap();
        let widened = store
            .set_user_scope("kc.coordinator", &UserScope::districts(["D1", "D3"]).unwrap())
            .await
            .unwrap();
        assert_eq!(
            widened.scope.allowed_districts().unwrap().len(),
            2
        );

        let err = store
            .set_user_scope("nobody", &UserScope::Global)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NoResult));
    }

    #[tokio::test]
    async fn duplicate_username_is_constraint_error() {
        let store = test_store().await;
        store.create_user("a", None, &UserScope::Global).await.unwrap();
        let err = store
            .create_user("a", None, &UserScope::Global)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn lookup_by_external_id() {
        let store = test_store().await;
        store
            .create_user("owner", Some("005000000000000009"), &UserScope::Global)
            .await
            .unwrap();
        let found = store
            .find_user_by_external_id("005000000000000009")
            .await
            .unwrap();
        assert_eq!(found.map(|u| u.username), Some("owner".to_string()));
        assert!(store
            .find_user_by_external_id("005000000000000000")
            .await
            .unwrap()
            .is_none());
    }
}
