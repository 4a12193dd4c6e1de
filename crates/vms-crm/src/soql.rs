//! Per-kind SOQL queries and field mapping.
//!
//! Every kind maps to one `SObject` and a fixed list of (Salesforce field,
//! local field) pairs. Relationship paths such as `Parent.Name` are read
//! from the nested objects Salesforce returns for them.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use vms_core::entities::{ExternalRecord, Fields};
use vms_core::enums::RecordKind;

/// Query shape of one record kind.
#[derive(Debug, Clone, Copy)]
pub struct ObjectMapping {
    pub sobject: &'static str,
    /// `(salesforce_path, local_field)` pairs.
    pub fields: &'static [(&'static str, &'static str)],
    pub filter: Option<&'static str>,
}

const ORGANIZATION: ObjectMapping = ObjectMapping {
    sobject: "Account",
    fields: &[
        ("Name", "name"),
        ("Type", "type"),
        ("Description", "description"),
        ("BillingCity", "city"),
        ("BillingState", "state"),
    ],
    filter: Some("Type NOT IN ('School', 'School District', 'Household')"),
};

const SCHOOL: ObjectMapping = ObjectMapping {
    sobject: "Account",
    fields: &[
        ("Name", "name"),
        ("School_Code_External_ID__c", "school_code"),
        ("Parent.Name", "district"),
        ("School_Level__c", "level"),
    ],
    filter: Some("Type = 'School'"),
};

const STUDENT: ObjectMapping = ObjectMapping {
    sobject: "Contact",
    fields: &[
        ("FirstName", "first_name"),
        ("LastName", "last_name"),
        ("Email", "email"),
        ("Current_Grade__c", "grade"),
        ("Local_Status__c", "local_status"),
        ("npsp__Primary_Affiliation__c", "school_id"),
        ("Account.Parent.Name", "district"),
    ],
    filter: Some("Contact_Type__c = 'Student'"),
};

const EVENT: ObjectMapping = ObjectMapping {
    sobject: "Session__c",
    fields: &[
        ("Name", "name"),
        ("Session_Type__c", "session_type"),
        ("Session_Status__c", "status"),
        ("Start_Date_and_Time__c", "start_time"),
        ("End_Date_and_Time__c", "end_time"),
        ("School__c", "school_id"),
        ("District__c", "district"),
    ],
    filter: None,
};

const PARTICIPATION: ObjectMapping = ObjectMapping {
    sobject: "Session_Participant__c",
    fields: &[
        ("Session__c", "event_id"),
        ("Contact__c", "student_id"),
        ("Status__c", "status"),
        ("OwnerId", "owner_id"),
    ],
    filter: Some("Participant_Type__c = 'Student'"),
};

const USER: ObjectMapping = ObjectMapping {
    sobject: "User",
    fields: &[
        ("Username", "username"),
        ("Name", "name"),
        ("Email", "email"),
        ("IsActive", "active"),
    ],
    filter: None,
};

#[must_use]
pub const fn mapping(kind: RecordKind) -> &'static ObjectMapping {
    match kind {
        RecordKind::Organization => &ORGANIZATION,
        RecordKind::School => &SCHOOL,
        RecordKind::Student => &STUDENT,
        RecordKind::Event => &EVENT,
        RecordKind::ParticipationLink => &PARTICIPATION,
        RecordKind::User => &USER,
    }
}

/// SOQL text for a full extract of `kind`, ordered by `Id` so paging is stable.
#[must_use]
pub fn query_for(kind: RecordKind) -> String {
    let m = mapping(kind);
    let mut columns = vec!["Id", "LastModifiedDate"];
    columns.extend(m.fields.iter().map(|(path, _)| *path));
    let mut soql = format!("SELECT {} FROM {}", columns.join(", "), m.sobject);
    if let Some(filter) = m.filter {
        soql.push_str(" WHERE ");
        soql.push_str(filter);
    }
    soql.push_str(" ORDER BY Id");
    soql
}

/// Parse Salesforce datetimes (`2026-03-01T12:00:00.000+0000`), accepting
/// RFC 3339 as well.
#[must_use]
pub fn parse_sf_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.3f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn lookup<'a>(raw: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = raw.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Map one raw Salesforce row into an [`ExternalRecord`].
///
/// A row without `Id` maps to an empty external ID; the resolver rejects it
/// downstream with a finding instead of failing the whole page.
#[must_use]
pub fn to_record(kind: RecordKind, raw: &Map<String, Value>) -> ExternalRecord {
    let external_id = raw
        .get("Id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let last_modified = raw
        .get("LastModifiedDate")
        .and_then(Value::as_str)
        .and_then(parse_sf_datetime);
    let fields: Fields = mapping(kind)
        .fields
        .iter()
        .map(|(path, local)| {
            (
                (*local).to_string(),
                lookup(raw, path).cloned().unwrap_or(Value::Null),
            )
        })
        .collect();

    ExternalRecord {
        external_id,
        kind,
        fields,
        last_modified,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn student_query_selects_mapped_fields() {
        let soql = query_for(RecordKind::Student);
        assert!(soql.starts_with("SELECT Id, LastModifiedDate, FirstName"));
        assert!(soql.contains("FROM Contact WHERE Contact_Type__c = 'Student'"));
        assert!(soql.ends_with("ORDER BY Id"));
    }

    #[test]
    fn unfiltered_kinds_have_no_where_clause() {
        assert_eq!(
            query_for(RecordKind::User),
            "SELECT Id, LastModifiedDate, Username, Name, Email, IsActive FROM User ORDER BY Id"
        );
    }

    #[test]
    fn every_kind_maps_its_district_field() {
        for kind in RecordKind::SYNC_ORDER {
            if let Some(district) = kind.spec().district_field {
                assert!(
                    mapping(kind).fields.iter().any(|(_, local)| *local == district),
                    "{kind} does not map {district}"
                );
            }
            for reference in kind.spec().references {
                assert!(
                    mapping(kind)
                        .fields
                        .iter()
                        .any(|(_, local)| *local == reference.field),
                    "{kind} does not map {}",
                    reference.field
                );
            }
        }
    }

    #[test]
    fn parses_salesforce_datetime() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_sf_datetime("2026-03-01T12:00:00.000+0000"), Some(expected));
        assert_eq!(parse_sf_datetime("2026-03-01T12:00:00Z"), Some(expected));
        assert_eq!(parse_sf_datetime("March 1st"), None);
    }

    #[test]
    fn maps_nested_relationship_paths() {
        let raw = json!({
            "attributes": {"type": "Contact"},
            "Id": "003000000000000001",
            "LastModifiedDate": "2026-03-01T12:00:00.000+0000",
            "FirstName": "Ada",
            "LastName": "Lovelace",
            "Email": null,
            "Current_Grade__c": "7",
            "Local_Status__c": "Local",
            "npsp__Primary_Affiliation__c": "001000000000000009",
            "Account": {"attributes": {"type": "Account"}, "Parent": {"Name": "Kansas City"}}
        });
        let record = to_record(RecordKind::Student, raw.as_object().unwrap());

        assert_eq!(record.external_id, "003000000000000001");
        assert!(record.last_modified.is_some());
        assert_eq!(record.fields["district"], json!("Kansas City"));
        assert_eq!(record.fields["school_id"], json!("001000000000000009"));
        assert_eq!(record.fields["email"], Value::Null);
        assert_eq!(record.own_district().as_deref(), Some("Kansas City"));
    }

    #[test]
    fn missing_relationship_maps_to_null() {
        let raw = json!({"Id": "003000000000000002", "Account": null});
        let record = to_record(RecordKind::Student, raw.as_object().unwrap());
        assert_eq!(record.fields["district"], Value::Null);
        assert_eq!(record.last_modified, None);
    }
}
