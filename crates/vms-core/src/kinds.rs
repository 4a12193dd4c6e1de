//! Per-kind field table.
//!
//! Each `RecordKind` maps to a static [`KindSpec`] describing where its
//! district, grade and zone live, which fields reference other kinds, and
//! which field names the owning user. Pipeline stages dispatch on the kind and
//! read this table instead of probing records for fields.

use crate::enums::RecordKind;
use crate::ids::EXTERNAL_ID_LEN;

/// A field holding the external ID of a record of another kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub field: &'static str,
    pub kind: RecordKind,
}

/// Static description of one record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSpec {
    pub kind: RecordKind,
    /// Required length of the external ID.
    pub id_length: usize,
    /// Field carrying the district name, if the kind is district-scoped.
    pub district_field: Option<&'static str>,
    /// Reference whose target's district this kind inherits.
    pub district_from: Option<Reference>,
    pub grade_field: Option<&'static str>,
    pub zone_field: Option<&'static str>,
    pub references: &'static [Reference],
    /// Field carrying the external ID of the owning user.
    pub owner_field: Option<&'static str>,
}

const SCHOOL_REF: Reference = Reference {
    field: "school_id",
    kind: RecordKind::School,
};
const EVENT_REF: Reference = Reference {
    field: "event_id",
    kind: RecordKind::Event,
};
const STUDENT_REF: Reference = Reference {
    field: "student_id",
    kind: RecordKind::Student,
};

const ORGANIZATION: KindSpec = KindSpec {
    kind: RecordKind::Organization,
    id_length: EXTERNAL_ID_LEN,
    district_field: None,
    district_from: None,
    grade_field: None,
    zone_field: None,
    references: &[],
    owner_field: None,
};

const SCHOOL: KindSpec = KindSpec {
    kind: RecordKind::School,
    id_length: EXTERNAL_ID_LEN,
    district_field: Some("district"),
    district_from: None,
    grade_field: None,
    zone_field: None,
    references: &[],
    owner_field: None,
};

const STUDENT: KindSpec = KindSpec {
    kind: RecordKind::Student,
    id_length: EXTERNAL_ID_LEN,
    district_field: Some("district"),
    district_from: None,
    grade_field: Some("grade"),
    zone_field: Some("local_status"),
    references: &[SCHOOL_REF],
    owner_field: None,
};

const EVENT: KindSpec = KindSpec {
    kind: RecordKind::Event,
    id_length: EXTERNAL_ID_LEN,
    district_field: Some("district"),
    district_from: None,
    grade_field: None,
    zone_field: None,
    references: &[SCHOOL_REF],
    owner_field: None,
};

const PARTICIPATION_LINK: KindSpec = KindSpec {
    kind: RecordKind::ParticipationLink,
    id_length: EXTERNAL_ID_LEN,
    district_field: None,
    district_from: Some(EVENT_REF),
    grade_field: None,
    zone_field: None,
    references: &[EVENT_REF, STUDENT_REF],
    owner_field: Some("owner_id"),
};

const USER: KindSpec = KindSpec {
    kind: RecordKind::User,
    id_length: EXTERNAL_ID_LEN,
    district_field: None,
    district_from: None,
    grade_field: None,
    zone_field: None,
    references: &[],
    owner_field: None,
};

impl RecordKind {
    /// The static field table for this kind.
    #[must_use]
    pub const fn spec(self) -> &'static KindSpec {
        match self {
            Self::Organization => &ORGANIZATION,
            Self::School => &SCHOOL,
            Self::Student => &STUDENT,
            Self::Event => &EVENT,
            Self::ParticipationLink => &PARTICIPATION_LINK,
            Self::User => &USER,
        }
    }
}
