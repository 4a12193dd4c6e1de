//! Stable rule identifiers attached to findings.

pub const IDENTITY_FORMAT: &str = "identity.format";
pub const GRADE_RANGE: &str = "student.grade_range";
pub const ZONE_RECOGNIZED: &str = "record.zone";
pub const REFERENCE_EXISTS: &str = "record.reference";
pub const OWNER_SCOPE: &str = "participation.owner_scope";
pub const PARTICIPATION_REFERENCE: &str = "participation.reference";
pub const PARTICIPATION_DUPLICATE: &str = "participation.duplicate";
pub const RECONCILIATION_CONFLICT: &str = "reconciliation.conflict";
