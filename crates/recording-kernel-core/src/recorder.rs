use serde::{Deserialize, Serialize};

use crate::model::{
    BookEntry, BookEntryId, DocumentId, RecordableStatus, RecordingAct, RecordingActId,
    RecordingActKind, RecordingDocument, Resource, ResourceId, ResourceKind, TractItemId,
    TractRole,
};
use crate::resolver::{review_admissibility, AdmissibilityReview};
use crate::rules::{RecordingRule, RecordingRuleset, TargetKind};
use crate::tract::RegistryLedger;
use crate::{OperationContext, RegistryError};

/// How the dispatcher obtains the resource(s) a recording task operates on.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAcquisition {
    CreateNew { kind: ResourceKind },
    CreateOnNewBookEntry { kind: ResourceKind, volume: String, entry_no: u32 },
    CreateOnExistingBookEntry { kind: ResourceKind, entry: BookEntryId },
    SelectExisting { resource: ResourceId },
}

/// Concrete target of a cancelation or modification act.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ActTarget {
    RecordingAct(RecordingActId),
    Resource(ResourceId),
    Party(String),
    Structure(ResourceId),
}

impl ActTarget {
    #[must_use]
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::RecordingAct(_) => TargetKind::RecordingAct,
            Self::Resource(_) => TargetKind::Resource,
            Self::Party(_) => TargetKind::Party,
            Self::Structure(_) => TargetKind::Structure,
        }
    }
}

/// Subdivision policy: how many partitions, and whether the parent stays
/// legally alive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SubdivisionPolicy {
    /// One new partition; the parent remains active.
    Partial,
    /// One new partition; the parent is merged into it.
    Last,
    /// N partitions created up front; the parent is merged into the last.
    Full { partitions: u32 },
}

/// One requested recording operation.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RecordingTask {
    pub act_kind: RecordingActKind,
    pub document_id: DocumentId,
    pub acquisition: ResourceAcquisition,
    #[serde(default)]
    pub target: Option<ActTarget>,
    #[serde(default)]
    pub new_partition: Option<SubdivisionPolicy>,
}

/// Everything a recording task produced: the acts, their tract items, the
/// acted-upon resources, and the admissibility reviews that let it through.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordingOutcome {
    pub acts: Vec<RecordingActId>,
    pub items: Vec<TractItemId>,
    pub resources: Vec<ResourceId>,
    pub reviews: Vec<AdmissibilityReview>,
}

/// The act-creation dispatcher: translates a recording task into concrete
/// acts and tract entries, consulting the rule engine and the resolver.
#[derive(Debug, Clone)]
pub struct RecorderExpert<'a> {
    ruleset: &'a RecordingRuleset,
}

impl<'a> RecorderExpert<'a> {
    #[must_use]
    pub fn new(ruleset: &'a RecordingRuleset) -> Self {
        Self { ruleset }
    }

    /// Execute one recording task.
    ///
    /// # Errors
    /// Returns [`RegistryError::RuleViolation`] when a business rule gates
    /// the act, [`RegistryError::NotSupported`] for target combinations with
    /// no implemented strategy, [`RegistryError::Precondition`] for malformed
    /// tasks, and [`RegistryError::NotFound`] for unknown references.
    pub fn record(
        &self,
        ledger: &mut RegistryLedger,
        task: RecordingTask,
        ctx: &OperationContext,
    ) -> Result<RecordingOutcome, RegistryError> {
        let rule = self.ruleset.rule_for(task.act_kind)?.clone();
        let document = ledger.document(task.document_id)?.clone();
        if document.is_closed {
            return Err(RegistryError::RuleViolation(format!(
                "document {} is closed; reopen it before recording new acts",
                document.id
            )));
        }

        if matches!(task.act_kind, RecordingActKind::Cancelation | RecordingActKind::Modification)
        {
            return self.record_targeted(ledger, &task, &rule, &document, ctx);
        }
        if task.target.is_some() {
            return Err(RegistryError::Precondition(format!(
                "a {} act does not take a target",
                task.act_kind.as_str()
            )));
        }

        if let Some(policy) = task.new_partition {
            return self.record_partition(ledger, &task, &rule, &document, policy, ctx);
        }

        match task.acquisition.clone() {
            ResourceAcquisition::CreateNew { kind } => {
                self.record_creation(ledger, &task, &rule, &document, kind, None, TractRole::Created, ctx)
            }
            ResourceAcquisition::CreateOnNewBookEntry { kind, volume, entry_no } => {
                let entry_id = ledger.insert_book_entry(BookEntry::new(volume, entry_no));
                self.record_creation(
                    ledger,
                    &task,
                    &rule,
                    &document,
                    kind,
                    Some(entry_id),
                    TractRole::Created,
                    ctx,
                )
            }
            ResourceAcquisition::CreateOnExistingBookEntry { kind, entry } => {
                ledger.book_entry(entry)?;
                self.record_creation(
                    ledger,
                    &task,
                    &rule,
                    &document,
                    kind,
                    Some(entry),
                    TractRole::Extended,
                    ctx,
                )
            }
            ResourceAcquisition::SelectExisting { resource } => {
                self.record_on_existing(ledger, &task, &rule, &document, resource, ctx)
            }
        }
    }

    /// Subdivide a resource through a structure act: the canonical entry
    /// point for partition tasks.
    ///
    /// # Errors
    /// Propagates the errors of [`RecorderExpert::record`].
    pub fn subdivide(
        &self,
        ledger: &mut RegistryLedger,
        document_id: DocumentId,
        parent: ResourceId,
        policy: SubdivisionPolicy,
        ctx: &OperationContext,
    ) -> Result<RecordingOutcome, RegistryError> {
        self.record(
            ledger,
            RecordingTask {
                act_kind: RecordingActKind::Structure,
                document_id,
                acquisition: ResourceAcquisition::SelectExisting { resource: parent },
                target: None,
                new_partition: Some(policy),
            },
            ctx,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn record_creation(
        &self,
        ledger: &mut RegistryLedger,
        task: &RecordingTask,
        rule: &RecordingRule,
        document: &RecordingDocument,
        kind: ResourceKind,
        book_entry: Option<BookEntryId>,
        role: TractRole,
        ctx: &OperationContext,
    ) -> Result<RecordingOutcome, RegistryError> {
        if !rule.applies_to_kind(kind) {
            return Err(RegistryError::RuleViolation(format!(
                "a {} act does not apply to {} resources",
                rule.kind.as_str(),
                kind.as_str()
            )));
        }

        let resource = Resource::new(kind);
        let resource_id = resource.id;
        let mut act = RecordingAct::new(task.act_kind, document.id, &ctx.actor, ctx.now);
        act.book_entry = book_entry;
        let act_id = ledger.append_act(act)?;
        let item_id = ledger.attach_resource(act_id, resource, role, ctx)?;

        let line = ledger.partition_line(resource_id)?;
        let review = review_admissibility(
            &line,
            self.ruleset,
            resource_id,
            rule,
            document.presentation_time,
        )?;
        if !review.admissible {
            return Err(RegistryError::RuleViolation(review.violations.join("; ")));
        }
        debug_assert!(ledger.verify_tract_integrity(resource_id).is_ok());

        Ok(RecordingOutcome {
            acts: vec![act_id],
            items: vec![item_id],
            resources: vec![resource_id],
            reviews: vec![review],
        })
    }

    fn record_on_existing(
        &self,
        ledger: &mut RegistryLedger,
        task: &RecordingTask,
        rule: &RecordingRule,
        document: &RecordingDocument,
        resource_id: ResourceId,
        ctx: &OperationContext,
    ) -> Result<RecordingOutcome, RegistryError> {
        let resource = ledger.resource(resource_id)?.clone();
        self.check_applicability(rule, &resource)?;

        let review = self.review(ledger, rule, resource_id, document)?;
        let act = RecordingAct::new(task.act_kind, document.id, &ctx.actor, ctx.now);
        let act_id = ledger.append_act(act)?;
        let role = match task.act_kind {
            RecordingActKind::Information
            | RecordingActKind::Document
            | RecordingActKind::Transaction => TractRole::Informative,
            _ => TractRole::Edited,
        };
        let item_id = ledger.attach_resource(act_id, resource, role, ctx)?;
        if rule.is_ending_act {
            ledger.resource_mut(resource_id)?.status = RecordableStatus::Closed;
        }
        debug_assert!(ledger.verify_tract_integrity(resource_id).is_ok());

        Ok(RecordingOutcome {
            acts: vec![act_id],
            items: vec![item_id],
            resources: vec![resource_id],
            reviews: vec![review],
        })
    }

    fn record_partition(
        &self,
        ledger: &mut RegistryLedger,
        task: &RecordingTask,
        rule: &RecordingRule,
        document: &RecordingDocument,
        policy: SubdivisionPolicy,
        ctx: &OperationContext,
    ) -> Result<RecordingOutcome, RegistryError> {
        if !rule.allows_partitions {
            return Err(RegistryError::RuleViolation(format!(
                "a {} act does not allow partitions",
                rule.kind.as_str()
            )));
        }
        let ResourceAcquisition::SelectExisting { resource: parent_id } = task.acquisition.clone()
        else {
            return Err(RegistryError::Precondition(
                "a partition task must select the existing parent resource".to_string(),
            ));
        };
        let parent = ledger.resource(parent_id)?.clone();
        if parent.is_merged() {
            return Err(RegistryError::RuleViolation(format!(
                "resource {} is already merged and can never be subdivided again",
                parent.uid
            )));
        }
        if !parent.accepts_new_acts() {
            return Err(RegistryError::RuleViolation(format!(
                "resource {} is {} and cannot be subdivided",
                parent.uid,
                parent.status.as_str()
            )));
        }
        self.check_applicability(rule, &parent)?;

        let partition_count = match policy {
            SubdivisionPolicy::Partial | SubdivisionPolicy::Last => 1,
            SubdivisionPolicy::Full { partitions } => partitions,
        };
        if partition_count == 0 {
            return Err(RegistryError::Precondition(
                "a full subdivision must create at least one partition".to_string(),
            ));
        }

        let review = self.review(ledger, rule, parent_id, document)?;
        let act = RecordingAct::new(task.act_kind, document.id, &ctx.actor, ctx.now);
        let act_id = ledger.append_act(act)?;

        let parent_role = if matches!(policy, SubdivisionPolicy::Partial) {
            TractRole::Split
        } else {
            TractRole::MergedInto
        };
        let mut items = vec![ledger.attach_resource(act_id, parent.clone(), parent_role, ctx)?];

        let child_role = if matches!(policy, SubdivisionPolicy::Full { .. }) {
            TractRole::DivisionOf
        } else {
            TractRole::PartitionOf
        };
        let mut partition_ids = Vec::new();
        for _ in 0..partition_count {
            let child = Resource::new_partition(&parent);
            partition_ids.push(child.id);
            items.push(ledger.attach_resource(act_id, child, child_role, ctx)?);
        }

        // The merge effect lands last: the parent's own tract entry for this
        // act must already exist when the resource becomes terminal.
        if !matches!(policy, SubdivisionPolicy::Partial) {
            if let Some(last) = partition_ids.last().copied() {
                ledger.resource_mut(parent_id)?.merged_into = Some(last);
            }
        }
        debug_assert!(ledger.verify_tract_integrity(parent_id).is_ok());

        let mut resources = partition_ids;
        resources.push(parent_id);
        Ok(RecordingOutcome { acts: vec![act_id], items, resources, reviews: vec![review] })
    }

    fn record_targeted(
        &self,
        ledger: &mut RegistryLedger,
        task: &RecordingTask,
        rule: &RecordingRule,
        document: &RecordingDocument,
        ctx: &OperationContext,
    ) -> Result<RecordingOutcome, RegistryError> {
        let target = match (task.target.clone(), task.acquisition.clone()) {
            (Some(target), _) => target,
            (None, ResourceAcquisition::SelectExisting { resource }) => {
                ActTarget::Resource(resource)
            }
            (None, _) => {
                return Err(RegistryError::Precondition(format!(
                    "a {} act requires a target or a selected resource",
                    task.act_kind.as_str()
                )));
            }
        };
        if let Some(declared) = rule.target {
            if declared != target.kind() {
                return Err(RegistryError::RuleViolation(format!(
                    "the rule for {} acts targets {}, got {}",
                    rule.kind.as_str(),
                    declared.as_str(),
                    target.kind().as_str()
                )));
            }
        }

        match (task.act_kind, target) {
            (RecordingActKind::Cancelation, ActTarget::RecordingAct(target_act)) => {
                self.cancel_recording_act(ledger, rule, document, target_act, ctx)
            }
            (RecordingActKind::Cancelation, ActTarget::Resource(resource)) => {
                self.cancel_resource(ledger, rule, document, resource, ctx)
            }
            (RecordingActKind::Cancelation, ActTarget::Structure(resource)) => {
                self.cancel_structure(ledger, rule, document, resource, ctx)
            }
            (RecordingActKind::Modification, ActTarget::RecordingAct(target_act)) => {
                self.amend_recording_act(ledger, rule, document, target_act, ctx)
            }
            (RecordingActKind::Modification, ActTarget::Resource(resource)) => {
                self.modify_resource(ledger, rule, document, resource, ctx)
            }
            (kind, target) => Err(RegistryError::NotSupported(format!(
                "no {} strategy is implemented for target kind {}; refusing to record silently",
                kind.as_str(),
                target.kind().as_str()
            ))),
        }
    }

    fn cancel_recording_act(
        &self,
        ledger: &mut RegistryLedger,
        rule: &RecordingRule,
        document: &RecordingDocument,
        target_act: RecordingActId,
        ctx: &OperationContext,
    ) -> Result<RecordingOutcome, RegistryError> {
        let target = ledger.act(target_act)?.clone();
        if !target.status.is_active() {
            return Err(RegistryError::RuleViolation(format!(
                "act {target_act} is deleted; there is nothing left to cancel"
            )));
        }
        let affected: Vec<ResourceId> = ledger
            .items_for_act(target_act)
            .iter()
            .filter(|item| item.status.is_active())
            .map(|item| item.resource_id)
            .collect();
        if affected.is_empty() {
            return Err(RegistryError::RuleViolation(format!(
                "act {target_act} touches no active resource; there is nothing to cancel"
            )));
        }

        let mut outcome = RecordingOutcome::default();
        for resource_id in affected {
            let resource = ledger.resource(resource_id)?.clone();
            self.check_applicability(rule, &resource)?;
            let review = self.review(ledger, rule, resource_id, document)?;

            let mut act =
                RecordingAct::new(RecordingActKind::Cancelation, document.id, &ctx.actor, ctx.now);
            act.cancels = Some(target_act);
            let act_id = ledger.append_act(act)?;
            let item_id = ledger.attach_resource(act_id, resource, TractRole::Canceled, ctx)?;
            debug_assert!(ledger.verify_tract_integrity(resource_id).is_ok());

            outcome.acts.push(act_id);
            outcome.items.push(item_id);
            outcome.resources.push(resource_id);
            outcome.reviews.push(review);
        }
        Ok(outcome)
    }

    fn cancel_resource(
        &self,
        ledger: &mut RegistryLedger,
        rule: &RecordingRule,
        document: &RecordingDocument,
        resource_id: ResourceId,
        ctx: &OperationContext,
    ) -> Result<RecordingOutcome, RegistryError> {
        let resource = ledger.resource(resource_id)?.clone();
        self.check_applicability(rule, &resource)?;
        let review = self.review(ledger, rule, resource_id, document)?;

        let act = RecordingAct::new(RecordingActKind::Cancelation, document.id, &ctx.actor, ctx.now);
        let act_id = ledger.append_act(act)?;
        let item_id = ledger.attach_resource(act_id, resource, TractRole::Canceled, ctx)?;
        if rule.is_ending_act {
            ledger.resource_mut(resource_id)?.status = RecordableStatus::Closed;
        }
        debug_assert!(ledger.verify_tract_integrity(resource_id).is_ok());

        Ok(RecordingOutcome {
            acts: vec![act_id],
            items: vec![item_id],
            resources: vec![resource_id],
            reviews: vec![review],
        })
    }

    fn cancel_structure(
        &self,
        ledger: &mut RegistryLedger,
        rule: &RecordingRule,
        document: &RecordingDocument,
        resource_id: ResourceId,
        ctx: &OperationContext,
    ) -> Result<RecordingOutcome, RegistryError> {
        let resource = ledger.resource(resource_id)?.clone();
        self.check_applicability(rule, &resource)?;

        let snapshot = ledger.tract(resource_id)?;
        let active: Vec<_> = snapshot.active_entries().collect();
        let structural = active
            .iter()
            .rev()
            .find(|entry| entry.act_kind == RecordingActKind::Structure)
            .map(|entry| entry.act_id)
            .ok_or_else(|| {
                RegistryError::RuleViolation(format!(
                    "resource {} has no structure act to cancel",
                    resource.uid
                ))
            })?;

        let review = self.review(ledger, rule, resource_id, document)?;
        let mut act =
            RecordingAct::new(RecordingActKind::Cancelation, document.id, &ctx.actor, ctx.now);
        act.cancels = Some(structural);
        let act_id = ledger.append_act(act)?;
        let item_id = ledger.attach_resource(act_id, resource, TractRole::Canceled, ctx)?;
        debug_assert!(ledger.verify_tract_integrity(resource_id).is_ok());

        Ok(RecordingOutcome {
            acts: vec![act_id],
            items: vec![item_id],
            resources: vec![resource_id],
            reviews: vec![review],
        })
    }

    fn amend_recording_act(
        &self,
        ledger: &mut RegistryLedger,
        rule: &RecordingRule,
        document: &RecordingDocument,
        target_act: RecordingActId,
        ctx: &OperationContext,
    ) -> Result<RecordingOutcome, RegistryError> {
        let target = ledger.act(target_act)?.clone();
        if !target.status.is_active() {
            return Err(RegistryError::RuleViolation(format!(
                "act {target_act} is deleted and cannot be amended"
            )));
        }
        if let Some(amender) = target.amended_by {
            return Err(RegistryError::RuleViolation(format!(
                "act {target_act} was already amended by act {amender}; amend the latest act in \
                 the chain instead"
            )));
        }
        let affected: Vec<ResourceId> = ledger
            .items_for_act(target_act)
            .iter()
            .filter(|item| item.status.is_active())
            .map(|item| item.resource_id)
            .collect();
        if affected.is_empty() {
            return Err(RegistryError::RuleViolation(format!(
                "act {target_act} touches no active resource; there is nothing to amend"
            )));
        }

        let mut reviews = Vec::new();
        for resource_id in &affected {
            let resource = ledger.resource(*resource_id)?.clone();
            self.check_applicability(rule, &resource)?;
            reviews.push(self.review(ledger, rule, *resource_id, document)?);
        }

        // One amending act forms the chain link; it touches every resource of
        // the amended act.
        let mut act =
            RecordingAct::new(RecordingActKind::Modification, document.id, &ctx.actor, ctx.now);
        act.amendment_of = Some(target_act);
        let act_id = ledger.append_act(act)?;
        ledger.act_mut(target_act)?.amended_by = Some(act_id);

        let mut items = Vec::new();
        for resource_id in &affected {
            let resource = ledger.resource(*resource_id)?.clone();
            items.push(ledger.attach_resource(act_id, resource, TractRole::Edited, ctx)?);
            debug_assert!(ledger.verify_tract_integrity(*resource_id).is_ok());
        }

        Ok(RecordingOutcome { acts: vec![act_id], items, resources: affected, reviews })
    }

    fn modify_resource(
        &self,
        ledger: &mut RegistryLedger,
        rule: &RecordingRule,
        document: &RecordingDocument,
        resource_id: ResourceId,
        ctx: &OperationContext,
    ) -> Result<RecordingOutcome, RegistryError> {
        let resource = ledger.resource(resource_id)?.clone();
        self.check_applicability(rule, &resource)?;
        let review = self.review(ledger, rule, resource_id, document)?;

        let act =
            RecordingAct::new(RecordingActKind::Modification, document.id, &ctx.actor, ctx.now);
        let act_id = ledger.append_act(act)?;
        let item_id = ledger.attach_resource(act_id, resource, TractRole::Edited, ctx)?;
        debug_assert!(ledger.verify_tract_integrity(resource_id).is_ok());

        Ok(RecordingOutcome {
            acts: vec![act_id],
            items: vec![item_id],
            resources: vec![resource_id],
            reviews: vec![review],
        })
    }

    fn check_applicability(
        &self,
        rule: &RecordingRule,
        resource: &Resource,
    ) -> Result<(), RegistryError> {
        if rule.applies_to_kind(resource.kind) {
            Ok(())
        } else {
            Err(RegistryError::RuleViolation(format!(
                "a {} act does not apply to {} resources (resource {})",
                rule.kind.as_str(),
                resource.kind.as_str(),
                resource.uid
            )))
        }
    }

    fn review(
        &self,
        ledger: &RegistryLedger,
        rule: &RecordingRule,
        resource_id: ResourceId,
        document: &RecordingDocument,
    ) -> Result<AdmissibilityReview, RegistryError> {
        let line = ledger.partition_line(resource_id)?;
        let review = review_admissibility(
            &line,
            self.ruleset,
            resource_id,
            rule,
            document.presentation_time,
        )?;
        if review.admissible {
            Ok(review)
        } else {
            Err(RegistryError::RuleViolation(review.violations.join("; ")))
        }
    }
}
