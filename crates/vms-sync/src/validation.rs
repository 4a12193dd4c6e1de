//! Post-reconciliation validation.
//!
//! A fixed rule table keyed by record kind. Rules are independent of each
//! other and of record order; one record can produce several findings.

use std::collections::{HashMap, HashSet};

use vms_config::ValidationConfig;
use vms_core::entities::{LocalRecord, ScopedUser, ValidationFinding, field_text};
use vms_core::enums::{RecordKind, Severity};
use vms_core::ids::ExternalId;
use vms_core::kinds::Reference;
use vms_core::rules;

use crate::error::SyncError;
use crate::retry::Backoff;
use crate::store::LocalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    IdentityFormat,
    GradeRange,
    ZoneRecognized,
    ReferenceExists,
    OwnerScope,
}

impl Rule {
    pub const ALL: [Self; 5] = [
        Self::IdentityFormat,
        Self::GradeRange,
        Self::ZoneRecognized,
        Self::ReferenceExists,
        Self::OwnerScope,
    ];

    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::IdentityFormat => rules::IDENTITY_FORMAT,
            Self::GradeRange => rules::GRADE_RANGE,
            Self::ZoneRecognized => rules::ZONE_RECOGNIZED,
            Self::ReferenceExists => rules::REFERENCE_EXISTS,
            Self::OwnerScope => rules::OWNER_SCOPE,
        }
    }

    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::ZoneRecognized | Self::OwnerScope => Severity::Warning,
            Self::IdentityFormat | Self::GradeRange | Self::ReferenceExists => Severity::Error,
        }
    }

    /// Whether the rule is part of `kind`'s rule set.
    ///
    /// Participation references are enforced while reconciling, so the
    /// reference rule does not apply to participation links.
    #[must_use]
    pub const fn applies_to(self, kind: RecordKind) -> bool {
        let spec = kind.spec();
        match self {
            Self::IdentityFormat => true,
            Self::GradeRange => spec.grade_field.is_some(),
            Self::ZoneRecognized => spec.zone_field.is_some(),
            Self::ReferenceExists => {
                !spec.references.is_empty() && !matches!(kind, RecordKind::ParticipationLink)
            }
            Self::OwnerScope => spec.owner_field.is_some(),
        }
    }
}

/// The rules checked for `kind`.
pub fn rules_for(kind: RecordKind) -> impl Iterator<Item = Rule> {
    Rule::ALL.into_iter().filter(move |rule| rule.applies_to(kind))
}

/// Parse a grade value. Kindergarten (`K`) is 0.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn parse_grade(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        serde_json::Value::String(s) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("k") {
                return Some(0);
            }
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

/// Lookup caches for one validation pass.
#[derive(Default)]
struct Lookups {
    references: HashMap<(RecordKind, String), bool>,
    owners: HashMap<String, Option<ScopedUser>>,
}

pub struct ValidationEngine<'a, S: ?Sized> {
    store: &'a S,
    config: ValidationConfig,
    backoff: Backoff,
}

impl<'a, S: LocalStore + ?Sized> ValidationEngine<'a, S> {
    pub const fn new(store: &'a S, config: ValidationConfig, backoff: Backoff) -> Self {
        Self {
            store,
            config,
            backoff,
        }
    }

    /// Check `records` against their kinds' rules.
    ///
    /// References may point at other records of the same batch as well as at
    /// stored records.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Persistence`] when store lookups keep failing.
    pub async fn validate(
        &self,
        records: &[LocalRecord],
    ) -> Result<Vec<ValidationFinding>, SyncError> {
        let batch: HashSet<(RecordKind, &str)> = records
            .iter()
            .map(|r| (r.kind, r.external_id.as_str()))
            .collect();
        let mut lookups = Lookups::default();
        let mut findings = Vec::new();

        for record in records {
            for rule in rules_for(record.kind) {
                self.check(rule, record, &batch, &mut lookups, &mut findings)
                    .await?;
            }
        }

        tracing::info!(
            records = records.len(),
            findings = findings.len(),
            "validation finished"
        );
        Ok(findings)
    }

    async fn check(
        &self,
        rule: Rule,
        record: &LocalRecord,
        batch: &HashSet<(RecordKind, &str)>,
        lookups: &mut Lookups,
        findings: &mut Vec<ValidationFinding>,
    ) -> Result<(), SyncError> {
        let spec = record.kind.spec();
        let mut report = |message: String| {
            findings.push(ValidationFinding {
                rule_id: rule.id().to_string(),
                severity: rule.severity(),
                record: record.reference(),
                message,
            });
        };

        match rule {
            Rule::IdentityFormat => {
                if let Err(e) = ExternalId::parse(record.kind, &record.external_id) {
                    report(e.to_string());
                }
            }
            Rule::GradeRange => {
                let Some(field) = spec.grade_field else {
                    return Ok(());
                };
                let Some(raw) = record.fields.get(field).filter(|v| !is_blank(v)) else {
                    return Ok(());
                };
                match parse_grade(raw) {
                    Some(grade) if self.grade_in_range(grade) => {}
                    Some(grade) => report(format!(
                        "grade {grade} outside [{}, {}]",
                        self.config.grade_min, self.config.grade_max
                    )),
                    None => report(format!("grade {raw} is not a grade")),
                }
            }
            Rule::ZoneRecognized => {
                let Some(zone) = spec.zone_field.and_then(|f| record.field(f)) else {
                    return Ok(());
                };
                if !self.config.is_recognized_zone(&zone) {
                    report(format!(
                        "zone '{zone}' is not one of {}",
                        self.config.recognized_zones.join(", ")
                    ));
                }
            }
            Rule::ReferenceExists => {
                for reference in spec.references {
                    let Some(target) = record.field(reference.field) else {
                        continue;
                    };
                    if !self
                        .reference_exists(*reference, &target, batch, lookups)
                        .await?
                    {
                        report(format!(
                            "{} '{target}' ({}) not found",
                            reference.field, reference.kind
                        ));
                    }
                }
            }
            Rule::OwnerScope => {
                let (Some(district), Some(owner)) = (
                    record.district.as_deref(),
                    spec.owner_field.and_then(|f| field_text(&record.fields, f)),
                ) else {
                    return Ok(());
                };
                if let Some(user) = self.owner(&owner, lookups).await?
                    && !user.can_see(Some(district))
                {
                    report(format!(
                        "owner {} is not allowed to see district '{district}'",
                        user.username
                    ));
                }
            }
        }
        Ok(())
    }

    fn grade_in_range(&self, grade: i64) -> bool {
        (i64::from(self.config.grade_min)..=i64::from(self.config.grade_max)).contains(&grade)
    }

    async fn reference_exists(
        &self,
        reference: Reference,
        target: &str,
        batch: &HashSet<(RecordKind, &str)>,
        lookups: &mut Lookups,
    ) -> Result<bool, SyncError> {
        if batch.contains(&(reference.kind, target)) {
            return Ok(true);
        }
        let key = (reference.kind, target.to_string());
        if let Some(&exists) = lookups.references.get(&key) {
            return Ok(exists);
        }
        let exists = if ExternalId::is_valid(reference.kind, target) {
            let store = self.store;
            self.backoff
                .persist("look up reference", || {
                    store.find_record(reference.kind, target)
                })
                .await?
                .is_some()
        } else {
            false
        };
        lookups.references.insert(key, exists);
        Ok(exists)
    }

    async fn owner(
        &self,
        external_id: &str,
        lookups: &mut Lookups,
    ) -> Result<Option<ScopedUser>, SyncError> {
        if let Some(cached) = lookups.owners.get(external_id) {
            return Ok(cached.clone());
        }
        let store = self.store;
        let user = self
            .backoff
            .persist("look up owner", || store.find_user_by_external_id(external_id))
            .await?;
        lookups
            .owners
            .insert(external_id.to_string(), user.clone());
        Ok(user)
    }
}

fn is_blank(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
