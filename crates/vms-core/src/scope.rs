//! District scoping types.
//!
//! A user's scope is either global or a non-empty set of district names. At
//! the domain layer the set is a typed `BTreeSet<String>`; the store serializes
//! it only at its boundary. A run is scoped by a [`ScopeSelector`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::errors::CoreError;

/// Scope classification as stored and exchanged on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Global,
    District,
}

impl ScopeType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::District => "district",
        }
    }
}

/// Visibility boundary of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ScopeRepr", into = "ScopeRepr")]
pub enum UserScope {
    Global,
    District(BTreeSet<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScopeRepr {
    scope_type: ScopeType,
    #[serde(default)]
    allowed_districts: BTreeSet<String>,
}

impl UserScope {
    /// Build a district scope. Names are trimmed; blanks are dropped.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidScope` if no district name remains.
    pub fn districts<I, S>(names: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: BTreeSet<String> = names
            .into_iter()
            .map(|name| name.as_ref().trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        if set.is_empty() {
            return Err(CoreError::InvalidScope(
                "district scope requires at least one allowed district".into(),
            ));
        }
        Ok(Self::District(set))
    }

    #[must_use]
    pub const fn scope_type(&self) -> ScopeType {
        match self {
            Self::Global => ScopeType::Global,
            Self::District(_) => ScopeType::District,
        }
    }

    #[must_use]
    pub const fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    /// Allowed districts; empty for global scope, where it is ignored.
    #[must_use]
    pub fn allowed_districts(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::Global => None,
            Self::District(set) => Some(set),
        }
    }

    /// Core visibility rule. Records without a district are visible only to
    /// global scope.
    #[must_use]
    pub fn allows(&self, district: Option<&str>) -> bool {
        match (self, district) {
            (Self::Global, _) => true,
            (Self::District(set), Some(d)) => set.contains(d.trim()),
            (Self::District(_), None) => false,
        }
    }
}

impl TryFrom<ScopeRepr> for UserScope {
    type Error = CoreError;

    fn try_from(repr: ScopeRepr) -> Result<Self, Self::Error> {
        match repr.scope_type {
            ScopeType::Global => Ok(Self::Global),
            ScopeType::District => Self::districts(repr.allowed_districts),
        }
    }
}

impl From<UserScope> for ScopeRepr {
    fn from(scope: UserScope) -> Self {
        match scope {
            UserScope::Global => Self {
                scope_type: ScopeType::Global,
                allowed_districts: BTreeSet::new(),
            },
            UserScope::District(set) => Self {
                scope_type: ScopeType::District,
                allowed_districts: set,
            },
        }
    }
}

impl FromStr for UserScope {
    type Err = CoreError;

    /// Parses `global` or `district:<a>,<b>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("global") {
            return Ok(Self::Global);
        }
        let names = trimmed.strip_prefix("district:").ok_or_else(|| {
            CoreError::InvalidScope(format!(
                "expected 'global' or 'district:<names>', got '{s}'"
            ))
        })?;
        Self::districts(names.split(','))
    }
}

/// Scope of a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScopeSelector {
    Global,
    District(String),
}

impl ScopeSelector {
    /// Stable key used for advisory locks and finding partitions.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Global => "global".to_string(),
            Self::District(name) => format!("district:{name}"),
        }
    }

    /// The user scope a run with this selector acts under.
    #[must_use]
    pub fn as_user_scope(&self) -> UserScope {
        match self {
            Self::Global => UserScope::Global,
            Self::District(name) => UserScope::District(BTreeSet::from([name.clone()])),
        }
    }
}

impl fmt::Display for ScopeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for ScopeSelector {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("global") {
            return Ok(Self::Global);
        }
        match trimmed.strip_prefix("district:").map(str::trim) {
            Some(name) if !name.is_empty() && !name.contains(',') => {
                Ok(Self::District(name.to_string()))
            }
            _ => Err(CoreError::InvalidScope(format!(
                "expected 'global' or 'district:<name>', got '{s}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn district_scope_requires_names() {
        assert!(UserScope::districts(Vec::<String>::new()).is_err());
        assert!(UserScope::districts(["  ", ""]).is_err());
        let scope = UserScope::districts([" D1 ", "D2"]).unwrap();
        assert_eq!(
            scope.allowed_districts().unwrap().iter().collect::<Vec<_>>(),
            vec!["D1", "D2"]
        );
    }

    #[test]
    fn allows_follows_visibility_rule() {
        let global = UserScope::Global;
        assert!(global.allows(Some("D9")));
        assert!(global.allows(None));

        let d1 = UserScope::districts(["D1"]).unwrap();
        assert!(d1.allows(Some("D1")));
        assert!(!d1.allows(Some("D2")));
        assert!(!d1.allows(None));
    }

    #[test]
    fn user_scope_wire_shape() {
        let scope = UserScope::districts(["D1"]).unwrap();
        let json = serde_json::to_value(&scope).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"scope_type": "district", "allowed_districts": ["D1"]})
        );

        let empty = serde_json::json!({"scope_type": "district", "allowed_districts": []});
        assert!(serde_json::from_value::<UserScope>(empty).is_err());

        let global = serde_json::json!({"scope_type": "global", "allowed_districts": ["ignored"]});
        assert_eq!(
            serde_json::from_value::<UserScope>(global).unwrap(),
            UserScope::Global
        );
    }

    #[test]
    fn selector_parses_and_keys() {
        let sel: ScopeSelector = "district:Kansas City".parse().unwrap();
        assert_eq!(sel.key(), "district:Kansas City");
        assert_eq!(sel.to_string(), "district:Kansas City");
        assert_eq!("GLOBAL".parse::<ScopeSelector>().unwrap(), ScopeSelector::Global);
        assert!("district:".parse::<ScopeSelector>().is_err());
        assert!("district:A,B".parse::<ScopeSelector>().is_err());
        assert!("county:A".parse::<ScopeSelector>().is_err());
    }

    #[test]
    fn user_scope_parses_district_lists() {
        let scope: UserScope = "district:D1, D2".parse().unwrap();
        assert!(scope.allows(Some("D2")));
        assert_eq!("global".parse::<UserScope>().unwrap(), UserScope::Global);
    }
}
