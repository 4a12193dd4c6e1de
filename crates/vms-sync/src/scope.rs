//! District visibility.
//!
//! Everything that can be shown to a user carries an optional district
//! through [`Scoped`]. Global users see everything; district users see only
//! items whose district is in their allowed set, and never items without a
//! district.

use vms_core::entities::{
    ExternalRecord, LocalRecord, RecordRef, RunReport, ScopedUser, ValidationFinding,
};
use vms_core::scope::UserScope;

pub trait Scoped {
    fn district(&self) -> Option<&str>;
}

impl Scoped for RecordRef {
    fn district(&self) -> Option<&str> {
        self.district.as_deref()
    }
}

impl Scoped for LocalRecord {
    fn district(&self) -> Option<&str> {
        self.district.as_deref()
    }
}

impl Scoped for ValidationFinding {
    fn district(&self) -> Option<&str> {
        self.record.district.as_deref()
    }
}

/// Source records expose only the district carried on the record itself.
/// Kinds that inherit their district from a reference read as districtless
/// until they are resolved.
impl Scoped for ExternalRecord {
    fn district(&self) -> Option<&str> {
        let field = self.kind.spec().district_field?;
        self.fields
            .get(field)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

#[must_use]
pub fn is_visible<T: Scoped + ?Sized>(user: &ScopedUser, item: &T) -> bool {
    user.can_see(item.district())
}

#[must_use]
pub fn in_scope<T: Scoped + ?Sized>(scope: &UserScope, item: &T) -> bool {
    scope.allows(item.district())
}

/// Keep the items of `items` visible under `scope`, preserving order.
pub fn select<'a, T: Scoped>(
    scope: &'a UserScope,
    items: &'a [T],
) -> impl Iterator<Item = &'a T> {
    items.iter().filter(move |item| in_scope(scope, *item))
}

/// A copy of `report` as seen under `scope`.
///
/// Findings outside the scope are dropped and the severity tallies are
/// recomputed. Per-kind counts are aggregates and stay as recorded.
#[must_use]
pub fn filter_report(report: &RunReport, scope: &UserScope) -> RunReport {
    let mut run = report.run.clone();
    run.findings.retain(|finding| in_scope(scope, finding));
    RunReport::from_run(run)
}
