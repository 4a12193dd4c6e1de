//! Record reconciliation.
//!
//! For each fetched record the reconciler decides Create / Update / NoOp /
//! Conflict against the local store. [`Reconciler::reconcile`] only plans;
//! [`Reconciler::apply`] commits record by record in source order, so a
//! record later in the batch sees what earlier records wrote.
//!
//! Records the run's scope does not cover are counted as out of scope and
//! otherwise ignored. Per-record problems (bad IDs, missing references,
//! duplicate participation pairs) become error findings and skip counts;
//! only store failures abort.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use vms_core::decision::{ReconciliationDecision, diff_fields};
use vms_core::entities::{
    ExternalRecord, KindCounts, LocalRecord, RecordRef, ValidationFinding,
};
use vms_core::enums::RecordKind;
use vms_core::ids::ExternalId;
use vms_core::kinds::Reference;
use vms_core::rules;
use vms_core::scope::UserScope;
use vms_db::repos::participation::NewParticipation;

use crate::error::SyncError;
use crate::resolver::{IdentityResolver, Resolution};
use crate::retry::Backoff;
use crate::store::LocalStore;

/// `record` with its external ID in the form the store keys on. Malformed
/// IDs are left as they are for the resolver to report.
fn canonical(kind: RecordKind, record: &ExternalRecord) -> Cow<'_, ExternalRecord> {
    match ExternalId::parse(kind, &record.external_id) {
        Ok(id) if id.as_str() != record.external_id => Cow::Owned(ExternalRecord {
            external_id: id.into_inner(),
            ..record.clone()
        }),
        _ => Cow::Borrowed(record),
    }
}

/// Decide what to do with `record` given its local counterpart.
///
/// Local edits newer than the source change are preserved as a conflict.
/// Missing or equal timestamps let the source win.
#[must_use]
pub fn decide(record: &ExternalRecord, local: Option<&LocalRecord>) -> ReconciliationDecision {
    let Some(local) = local else {
        return ReconciliationDecision::Create {
            record: record.clone(),
        };
    };

    let diff = diff_fields(&local.fields, &record.fields);
    if diff.is_empty() {
        return ReconciliationDecision::NoOp {
            target: local.reference(),
            local_id: local.id.clone(),
        };
    }

    match record.last_modified {
        Some(source) if local.updated_at > source => ReconciliationDecision::Conflict {
            target: local.reference(),
            local_id: local.id.clone(),
            diff,
            local_updated_at: local.updated_at,
            source_modified: Some(source),
        },
        _ => ReconciliationDecision::Update {
            record: record.clone(),
            local_id: local.id.clone(),
            diff,
        },
    }
}

/// Everything the reconciler produced for one batch of a kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KindPlan {
    pub decisions: Vec<ReconciliationDecision>,
    pub counts: KindCounts,
    pub findings: Vec<ValidationFinding>,
    /// Local state of every in-scope record after this batch: written,
    /// unchanged, preserved on conflict, or (when planning) as it would be
    /// written. Input to validation.
    pub staged: Vec<LocalRecord>,
}

impl KindPlan {
    fn skip(&mut self, finding: ValidationFinding) {
        self.counts.skipped += 1;
        self.findings.push(finding);
    }
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Plan,
    Commit { now: DateTime<Utc> },
}

/// A resolved reference: the local ID when the target is stored, and the
/// target's district.
#[derive(Debug, Clone)]
struct Target {
    local_id: Option<String>,
    district: Option<String>,
}

/// Event and Student a participation record links.
#[derive(Debug, Clone)]
struct LinkTargets {
    event: Target,
    student: Target,
    event_ext: String,
    student_ext: String,
}

/// Reconciles batches of source records for one run.
///
/// Keeps track of what a planning pass would have created so later kinds of
/// the same dry run can reference it.
pub struct Reconciler<'a, S: ?Sized> {
    store: &'a S,
    resolver: IdentityResolver<'a, S>,
    backoff: Backoff,
    scope: UserScope,
    planned: HashMap<(RecordKind, String), Option<String>>,
    planned_pairs: HashSet<(String, String)>,
}

impl<'a, S: LocalStore + ?Sized> Reconciler<'a, S> {
    pub fn new(store: &'a S, backoff: Backoff, scope: UserScope) -> Self {
        Self {
            store,
            resolver: IdentityResolver::new(store, backoff),
            backoff,
            scope,
            planned: HashMap::new(),
            planned_pairs: HashSet::new(),
        }
    }

    /// Plan decisions for `records` of `kind` without writing anything.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Persistence`] when store reads keep failing.
    pub async fn reconcile(
        &mut self,
        kind: RecordKind,
        records: &[ExternalRecord],
    ) -> Result<KindPlan, SyncError> {
        self.process(kind, records, Mode::Plan).await
    }

    /// Decide and commit `records` of `kind` one by one. Records without a
    /// source timestamp are stamped with `now`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Persistence`] when the store keeps failing, and
    /// [`SyncError::ConstraintViolation`] if a create collides and the
    /// colliding record cannot be found again.
    pub async fn apply(
        &mut self,
        kind: RecordKind,
        records: &[ExternalRecord],
        now: DateTime<Utc>,
    ) -> Result<KindPlan, SyncError> {
        self.process(kind, records, Mode::Commit { now }).await
    }

    async fn process(
        &mut self,
        kind: RecordKind,
        records: &[ExternalRecord],
        mode: Mode,
    ) -> Result<KindPlan, SyncError> {
        let mut plan = KindPlan::default();
        for record in records {
            plan.counts.fetched += 1;
            let record = canonical(kind, record);
            self.process_one(kind, &record, mode, &mut plan).await?;
        }
        tracing::info!(
            %kind,
            fetched = plan.counts.fetched,
            created = plan.counts.created,
            updated = plan.counts.updated,
            unchanged = plan.counts.unchanged,
            skipped = plan.counts.skipped,
            conflicted = plan.counts.conflicted,
            out_of_scope = plan.counts.out_of_scope,
            "reconciled kind"
        );
        Ok(plan)
    }

    async fn process_one(
        &mut self,
        kind: RecordKind,
        record: &ExternalRecord,
        mode: Mode,
        plan: &mut KindPlan,
    ) -> Result<(), SyncError> {
        let spec = kind.spec();
        let pending = if kind == RecordKind::ParticipationLink {
            Some(self.link_targets(record).await?)
        } else {
            None
        };

        let district = match (spec.district_field, spec.district_from) {
            (Some(field), _) => record.field(field),
            (None, Some(reference)) => match pending.as_ref() {
                Some(pending) if reference.kind == RecordKind::Event => {
                    pending.event.as_ref().and_then(|t| t.district.clone())
                }
                _ => self
                    .resolve_reference(record, reference)
                    .await?
                    .and_then(|t| t.district),
            },
            (None, None) => None,
        };

        if !self.scope.allows(district.as_deref()) {
            plan.counts.out_of_scope += 1;
            tracing::debug!(%kind, external_id = %record.external_id, "out of scope");
            return Ok(());
        }

        let target = RecordRef::new(kind, record.external_id.clone(), district.clone());

        let local = match self.resolver.resolve(&record.external_id, kind).await {
            Ok(resolution) => resolution.into_local(),
            Err(e @ SyncError::InvalidIdentifier { .. }) => {
                tracing::warn!(%kind, external_id = %record.external_id, "skipping record with invalid identifier");
                plan.skip(ValidationFinding::error(
                    rules::IDENTITY_FORMAT,
                    target,
                    e.to_string(),
                ));
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let links = match pending {
            None => None,
            Some(PendingLinks {
                event: Some(event),
                student: Some(student),
                event_ext,
                student_ext,
            }) => Some(LinkTargets {
                event,
                student,
                event_ext,
                student_ext,
            }),
            Some(pending) => {
                tracing::warn!(%kind, external_id = %record.external_id, "skipping participation with missing reference");
                plan.skip(ValidationFinding::error(
                    rules::PARTICIPATION_REFERENCE,
                    target,
                    pending.describe_missing(),
                ));
                return Ok(());
            }
        };

        if let Some(links) = links.as_ref()
            && self.is_duplicate_pair(links, local.as_ref()).await?
        {
            tracing::warn!(%kind, external_id = %record.external_id, "skipping duplicate participation");
            plan.skip(duplicate_finding(target, links));
            return Ok(());
        }

        let decision = decide(record, local.as_ref());
        tracing::debug!(
            %kind,
            external_id = %record.external_id,
            decision = decision.label(),
            changed = decision.diff().len(),
            "decided"
        );

        match mode {
            Mode::Plan => self.stage_planned(record, &decision, local, district, links.as_ref(), plan),
            Mode::Commit { now } => {
                self.commit(record, decision, local, district, links.as_ref(), now, plan)
                    .await?;
            }
        }
        Ok(())
    }

    fn stage_planned(
        &mut self,
        record: &ExternalRecord,
        decision: &ReconciliationDecision,
        local: Option<LocalRecord>,
        district: Option<String>,
        links: Option<&LinkTargets>,
        plan: &mut KindPlan,
    ) {
        match decision {
            ReconciliationDecision::Create { .. } => {
                plan.counts.created += 1;
                self.planned
                    .insert((record.kind, record.external_id.clone()), district.clone());
                plan.staged
                    .push(as_written(record, String::new(), district, Utc::now()));
            }
            ReconciliationDecision::Update { local_id, .. } => {
                plan.counts.updated += 1;
                plan.staged
                    .push(as_written(record, local_id.clone(), district, Utc::now()));
            }
            ReconciliationDecision::NoOp { .. } => {
                plan.counts.unchanged += 1;
                plan.staged.extend(local);
            }
            ReconciliationDecision::Conflict { .. } => {
                plan.counts.conflicted += 1;
                plan.findings.extend(conflict_finding(decision));
                plan.staged.extend(local);
            }
        }
        if let Some(links) = links {
            self.planned_pairs
                .insert((links.event_ext.clone(), links.student_ext.clone()));
        }
        plan.decisions.push(decision.clone());
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit(
        &self,
        record: &ExternalRecord,
        decision: ReconciliationDecision,
        local: Option<LocalRecord>,
        district: Option<String>,
        links: Option<&LinkTargets>,
        now: DateTime<Utc>,
        plan: &mut KindPlan,
    ) -> Result<(), SyncError> {
        let updated_at = record.last_modified.unwrap_or(now);
        if matches!(decision, ReconciliationDecision::Create { .. }) {
            match self.write(record, None, district.as_deref(), links, updated_at).await {
                Ok(written) => {
                    plan.counts.created += 1;
                    plan.staged.push(written);
                    plan.decisions.push(decision);
                }
                Err(SyncError::ConstraintViolation(reason)) => {
                    if let Some(links) = links {
                        tracing::warn!(external_id = %record.external_id, %reason, "participation pair already linked");
                        plan.skip(duplicate_finding(
                            RecordRef::new(record.kind, record.external_id.clone(), district),
                            links,
                        ));
                        return Ok(());
                    }
                    // Someone else stored the record since we resolved it.
                    let Some(existing) = self
                        .resolver
                        .resolve(&record.external_id, record.kind)
                        .await?
                        .into_local()
                    else {
                        return Err(SyncError::ConstraintViolation(reason));
                    };
                    let retry = decide(record, Some(&existing));
                    self.commit_existing(record, retry, existing, district, links, updated_at, plan)
                        .await?;
                }
                Err(e) => return Err(e),
            }
        } else {
            let Some(local) = local else {
                return Err(SyncError::Persistence {
                    message: format!(
                        "{} {} decided as {} without a local record",
                        record.kind,
                        record.external_id,
                        decision.label()
                    ),
                    transient: false,
                });
            };
            self.commit_existing(record, decision, local, district, links, updated_at, plan)
                .await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit_existing(
        &self,
        record: &ExternalRecord,
        decision: ReconciliationDecision,
        local: LocalRecord,
        district: Option<String>,
        links: Option<&LinkTargets>,
        updated_at: DateTime<Utc>,
        plan: &mut KindPlan,
    ) -> Result<(), SyncError> {
        match &decision {
            ReconciliationDecision::Update { local_id, .. } => {
                match self
                    .write(record, Some(local_id), district.as_deref(), links, updated_at)
                    .await
                {
                    Ok(written) => {
                        plan.counts.updated += 1;
                        plan.staged.push(written);
                    }
                    Err(SyncError::ConstraintViolation(reason)) => {
                        let Some(links) = links else {
                            return Err(SyncError::ConstraintViolation(reason));
                        };
                        tracing::warn!(external_id = %record.external_id, %reason, "participation pair already linked");
                        plan.skip(duplicate_finding(local.reference(), links));
                        plan.staged.push(local);
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
            ReconciliationDecision::NoOp { .. } => {
                plan.counts.unchanged += 1;
                plan.staged.push(local);
            }
            ReconciliationDecision::Conflict { .. } => {
                plan.counts.conflicted += 1;
                tracing::warn!(
                    kind = %record.kind,
                    external_id = %record.external_id,
                    "local edit is newer than source, keeping local"
                );
                plan.findings.extend(conflict_finding(&decision));
                plan.staged.push(local);
            }
            ReconciliationDecision::Create { .. } => {
                return Err(SyncError::ConstraintViolation(format!(
                    "{} {} exists locally but was decided as create",
                    record.kind, record.external_id
                )));
            }
        }
        plan.decisions.push(decision);
        Ok(())
    }

    /// Insert (`local_id` is `None`) or update a record, retrying transient
    /// store failures.
    async fn write(
        &self,
        record: &ExternalRecord,
        local_id: Option<&str>,
        district: Option<&str>,
        links: Option<&LinkTargets>,
        updated_at: DateTime<Utc>,
    ) -> Result<LocalRecord, SyncError> {
        let store = self.store;
        if let Some(links) = links {
            let (Some(event_id), Some(student_id)) = (
                links.event.local_id.as_deref(),
                links.student.local_id.as_deref(),
            ) else {
                return Err(SyncError::ConstraintViolation(format!(
                    "participation {} references records that are not stored",
                    record.external_id
                )));
            };
            let new = NewParticipation {
                external_id: &record.external_id,
                fields: &record.fields,
                district,
                event_id,
                student_id,
                updated_at,
            };
            return match local_id {
                None => self
                    .backoff
                    .persist("create participation", || store.create_participation(&new))
                    .await
                    .map(|(local, _link)| local),
                Some(id) => {
                    self.backoff
                        .persist("update participation", || store.update_participation(id, &new))
                        .await
                }
            };
        }

        match local_id {
            None => {
                self.backoff
                    .persist("insert record", || {
                        store.insert_record(
                            record.kind,
                            &record.external_id,
                            &record.fields,
                            district,
                            updated_at,
                        )
                    })
                    .await
            }
            Some(id) => {
                self.backoff
                    .persist("update record", || {
                        store.update_record(id, &record.fields, district, updated_at)
                    })
                    .await
            }
        }
    }

    async fn link_targets(&self, record: &ExternalRecord) -> Result<PendingLinks, SyncError> {
        let (event, event_ext) = self.link_target(record, RecordKind::Event).await?;
        let (student, student_ext) = self.link_target(record, RecordKind::Student).await?;
        Ok(PendingLinks {
            event,
            student,
            event_ext,
            student_ext,
        })
    }

    async fn link_target(
        &self,
        record: &ExternalRecord,
        target: RecordKind,
    ) -> Result<(Option<Target>, String), SyncError> {
        let Some(reference) = record
            .kind
            .spec()
            .references
            .iter()
            .copied()
            .find(|r| r.kind == target)
        else {
            return Ok((None, String::new()));
        };
        Ok((
            self.resolve_reference(record, reference).await?,
            record.field(reference.field).unwrap_or_default(),
        ))
    }

    /// Resolve the record `reference` points at, in the store or among the
    /// records this reconciler planned to create. Missing or malformed
    /// references resolve to `None`.
    async fn resolve_reference(
        &self,
        record: &ExternalRecord,
        reference: Reference,
    ) -> Result<Option<Target>, SyncError> {
        let Some(raw) = record.field(reference.field) else {
            return Ok(None);
        };
        let Ok(id) = ExternalId::parse(reference.kind, &raw) else {
            return Ok(None);
        };
        match self.resolver.resolve(id.as_str(), reference.kind).await {
            Ok(Resolution::Found(local)) => Ok(Some(Target {
                local_id: Some(local.id),
                district: local.district,
            })),
            Ok(Resolution::NotFound) => Ok(self
                .planned
                .get(&(reference.kind, id.into_inner()))
                .map(|district| Target {
                    local_id: None,
                    district: district.clone(),
                })),
            Err(SyncError::InvalidIdentifier { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Whether the (event, student) pair is already linked by a different
    /// participation record.
    async fn is_duplicate_pair(
        &self,
        links: &LinkTargets,
        local: Option<&LocalRecord>,
    ) -> Result<bool, SyncError> {
        let pair = (links.event_ext.clone(), links.student_ext.clone());
        if local.is_none() && self.planned_pairs.contains(&pair) {
            return Ok(true);
        }
        let (Some(event_id), Some(student_id)) = (
            links.event.local_id.as_deref(),
            links.student.local_id.as_deref(),
        ) else {
            return Ok(false);
        };
        let store = self.store;
        let existing = self
            .backoff
            .persist("find participation", || {
                store.find_participation(event_id, student_id)
            })
            .await?;
        Ok(existing.is_some_and(|link| local.is_none_or(|l| l.id != link.record_id)))
    }
}

/// Participation references as looked up, before checking both exist.
#[derive(Debug, Clone)]
struct PendingLinks {
    event: Option<Target>,
    student: Option<Target>,
    event_ext: String,
    student_ext: String,
}

impl PendingLinks {
    fn describe_missing(&self) -> String {
        let mut missing = Vec::new();
        if self.event.is_none() {
            missing.push(format!("event '{}'", self.event_ext));
        }
        if self.student.is_none() {
            missing.push(format!("student '{}'", self.student_ext));
        }
        format!("referenced {} not found locally", missing.join(" and "))
    }
}

fn as_written(
    record: &ExternalRecord,
    local_id: String,
    district: Option<String>,
    now: DateTime<Utc>,
) -> LocalRecord {
    LocalRecord {
        id: local_id,
        kind: record.kind,
        external_id: record.external_id.clone(),
        fields: record.fields.clone(),
        district,
        updated_at: record.last_modified.unwrap_or(now),
        synced_at: None,
    }
}

fn duplicate_finding(target: RecordRef, links: &LinkTargets) -> ValidationFinding {
    let error = SyncError::ConstraintViolation(format!(
        "event '{}' and student '{}' are already linked",
        links.event_ext, links.student_ext
    ));
    ValidationFinding::error(rules::PARTICIPATION_DUPLICATE, target, error.to_string())
}

fn conflict_finding(decision: &ReconciliationDecision) -> Option<ValidationFinding> {
    let ReconciliationDecision::Conflict {
        target,
        diff,
        local_updated_at,
        source_modified,
        ..
    } = decision
    else {
        return None;
    };
    let error = SyncError::ReconciliationConflict {
        kind: target.kind,
        external_id: target.external_id.clone(),
    };
    let fields: Vec<&str> = diff.iter().map(|c| c.field.as_str()).collect();
    let source = source_modified.map_or_else(|| "unknown".to_string(), |t| t.to_rfc3339());
    Some(ValidationFinding::warning(
        rules::RECONCILIATION_CONFLICT,
        target.clone(),
        format!(
            "{error} (local {}, source {source}); kept local values of {}",
            local_updated_at.to_rfc3339(),
            fields.join(", ")
        ),
    ))
}
