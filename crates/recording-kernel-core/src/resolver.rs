use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::model::{RecordingActId, RecordingActKind, ResourceId, ResourceUid, TractRole};
use crate::rules::{chain_requirement_waiver, RecordingRule, RecordingRuleset};
use crate::tract::{TractEntry, TractSnapshot};
use crate::RegistryError;

/// A resource's snapshot together with the snapshots of all its partition
/// ancestors; antecedent resolution recurses over this map.
pub type PartitionLine = BTreeMap<ResourceId, TractSnapshot>;

/// The active tract: non-deleted entries in prelation order.
#[must_use]
pub fn active_tract(snapshot: &TractSnapshot) -> Vec<&TractEntry> {
    snapshot.active_entries().collect()
}

/// The prefix of the active tract strictly before `break_act`, or up to and
/// including it.
///
/// # Errors
/// Returns [`RegistryError::NotFound`] when the break act has no entry in
/// this tract.
pub fn tract_until(
    snapshot: &TractSnapshot,
    break_act: RecordingActId,
    include_break: bool,
) -> Result<Vec<&TractEntry>, RegistryError> {
    let break_entry = snapshot
        .entries
        .iter()
        .find(|entry| entry.act_id == break_act)
        .ok_or_else(|| {
            RegistryError::NotFound(format!(
                "act {break_act} is not in the tract of resource {}",
                snapshot.resource.uid
            ))
        })?;
    let break_key = break_entry.ordering_key();
    Ok(snapshot
        .active_entries()
        .filter(|entry| {
            if include_break {
                entry.ordering_key() <= break_key
            } else {
                entry.ordering_key() < break_key
            }
        })
        .collect())
}

/// Resolve the domain antecedent: walk the active tract backward from the
/// boundary and return the last domain-bearing entry; fall back to the very
/// first entry; when a partition has no own entry before the boundary at
/// all, recurse into the parent's tract anchored at the same boundary.
///
/// # Errors
/// Returns [`RegistryError::NotFound`] when an ancestor snapshot is missing
/// from the line, and [`RegistryError::Integrity`] on a parentage cycle.
pub fn domain_antecedent<'a>(
    line: &'a PartitionLine,
    ruleset: &RecordingRuleset,
    resource_id: ResourceId,
    boundary: Option<OffsetDateTime>,
) -> Result<Option<&'a TractEntry>, RegistryError> {
    let mut visited = BTreeSet::new();
    let mut cursor = Some(resource_id);

    while let Some(id) = cursor {
        if !visited.insert(id) {
            return Err(RegistryError::Integrity(format!(
                "partition parentage of resource {resource_id} forms a cycle at {id}"
            )));
        }
        let snapshot = line.get(&id).ok_or_else(|| {
            RegistryError::NotFound(format!(
                "resource {id} is missing from the loaded partition line"
            ))
        })?;

        let bounded: Vec<&TractEntry> = snapshot
            .active_entries()
            .filter(|entry| boundary.map_or(true, |cut| entry.presentation_time < cut))
            .collect();

        if let Some(entry) =
            bounded.iter().rev().find(|entry| ruleset.bears_domain(entry)).copied()
        {
            return Ok(Some(entry));
        }
        if let Some(first) = bounded.first().copied() {
            return Ok(Some(first));
        }

        cursor = snapshot.resource.partition_of;
    }
    Ok(None)
}

/// Outcome of a chained-act check: which act satisfied the requirement, or
/// which grandfather waiver applied.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ChainCheck {
    pub satisfied_by: Option<RecordingActId>,
    pub waived_by: Option<String>,
}

/// Validate the chained-act requirement of a rule: an active, non-cancelled
/// act of the required kind, inside a closed document, strictly before the
/// proposed presentation time. Pre-cutoff documents are waived via the
/// grandfather table.
///
/// # Errors
/// Returns [`RegistryError::RuleViolation`] when the requirement is neither
/// satisfied nor waived.
pub fn check_chained_act(
    snapshot: &TractSnapshot,
    rule: &RecordingRule,
    presentation_time: OffsetDateTime,
) -> Result<ChainCheck, RegistryError> {
    let Some(required) = rule.chained_act else {
        return Ok(ChainCheck { satisfied_by: None, waived_by: None });
    };

    let cancelled: BTreeSet<RecordingActId> = snapshot
        .active_entries()
        .filter(|entry| entry.act_kind == RecordingActKind::Cancelation)
        .filter_map(|entry| entry.cancels)
        .collect();

    let satisfied = snapshot.active_entries().find(|entry| {
        entry.presentation_time < presentation_time
            && entry.act_kind == required
            && entry.role != TractRole::Canceled
            && entry.document_closed
            && !cancelled.contains(&entry.act_id)
    });
    if let Some(entry) = satisfied {
        return Ok(ChainCheck { satisfied_by: Some(entry.act_id), waived_by: None });
    }

    if let Some(waiver) = chain_requirement_waiver(presentation_time) {
        return Ok(ChainCheck { satisfied_by: None, waived_by: Some(waiver.to_string()) });
    }

    Err(RegistryError::RuleViolation(format!(
        "a {} act requires an earlier active {} act in the tract of {}; none was found",
        rule.kind.as_str(),
        required.as_str(),
        snapshot.resource.uid
    )))
}

/// Validate prelation: the proposed document must not be inserted earlier in
/// time than any already-Closed act in the tract. Violations are reported,
/// never silently reordered.
///
/// # Errors
/// Returns [`RegistryError::RuleViolation`] citing the conflicting closed
/// act.
pub fn check_prelation(
    snapshot: &TractSnapshot,
    rule: &RecordingRule,
    presentation_time: OffsetDateTime,
) -> Result<(), RegistryError> {
    if rule.skip_prelation {
        return Ok(());
    }
    for entry in snapshot.active_entries() {
        if entry.act_status == crate::model::RecordableStatus::Closed
            && presentation_time < entry.presentation_time
        {
            return Err(RegistryError::RuleViolation(format!(
                "a document presented at {presentation_time} would precede closed act {} \
                 (presented at {}) in the tract of {}; prelation forbids insertion before a \
                 closed act",
                entry.act_id, entry.presentation_time, snapshot.resource.uid
            )));
        }
    }
    Ok(())
}

/// Explainable admissibility decision for one proposed act against one
/// resource: the resolved antecedent, every violation, every waiver applied,
/// and the ordering trace that produced them.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AdmissibilityReview {
    pub resource_id: ResourceId,
    pub resource_uid: ResourceUid,
    pub act_kind: RecordingActKind,
    #[serde(with = "time::serde::rfc3339")]
    pub presentation_time: OffsetDateTime,
    pub admissible: bool,
    pub antecedent_act: Option<RecordingActId>,
    pub chain_satisfied_by: Option<RecordingActId>,
    pub waivers: Vec<String>,
    pub violations: Vec<String>,
    pub trace: Vec<String>,
}

/// Run the full admissibility review of a proposed act kind against a
/// resource at a presentation time. Rule failures land in `violations`;
/// only structural faults (missing snapshots, parentage cycles) error out.
///
/// # Errors
/// Returns [`RegistryError::NotFound`] when the resource is missing from the
/// line and [`RegistryError::Integrity`] on a parentage cycle.
pub fn review_admissibility(
    line: &PartitionLine,
    ruleset: &RecordingRuleset,
    resource_id: ResourceId,
    rule: &RecordingRule,
    presentation_time: OffsetDateTime,
) -> Result<AdmissibilityReview, RegistryError> {
    let snapshot = line.get(&resource_id).ok_or_else(|| {
        RegistryError::NotFound(format!(
            "resource {resource_id} is missing from the loaded partition line"
        ))
    })?;

    let mut trace = vec![
        "filter: item and act status != deleted".to_string(),
        "sort: (presentation_time, act_index, act_id)".to_string(),
    ];
    let mut violations = Vec::new();
    let mut waivers = Vec::new();

    let antecedent = domain_antecedent(line, ruleset, resource_id, Some(presentation_time))?;
    match antecedent {
        Some(entry) if entry.resource_id == resource_id => {
            trace.push(format!("antecedent: act {} by backward walk", entry.act_id));
        }
        Some(entry) => {
            trace.push(format!(
                "antecedent: act {} inherited from partition parent {}",
                entry.act_id, entry.resource_id
            ));
        }
        None => trace.push("antecedent: none (empty tract line)".to_string()),
    }

    let chain_satisfied_by = match check_chained_act(snapshot, rule, presentation_time) {
        Ok(check) => {
            if let Some(waiver) = check.waived_by {
                trace.push(format!("chain: waived ({waiver})"));
                waivers.push(waiver);
            } else if let Some(act_id) = check.satisfied_by {
                trace.push(format!("chain: satisfied by act {act_id}"));
            }
            check.satisfied_by
        }
        Err(RegistryError::RuleViolation(reason)) => {
            trace.push("chain: violated".to_string());
            violations.push(reason);
            None
        }
        Err(err) => return Err(err),
    };

    match check_prelation(snapshot, rule, presentation_time) {
        Ok(()) => trace.push("prelation: no closed act displaced".to_string()),
        Err(RegistryError::RuleViolation(reason)) => {
            trace.push("prelation: violated".to_string());
            violations.push(reason);
        }
        Err(err) => return Err(err),
    }

    Ok(AdmissibilityReview {
        resource_id,
        resource_uid: snapshot.resource.uid.clone(),
        act_kind: rule.kind,
        presentation_time,
        admissible: violations.is_empty(),
        antecedent_act: antecedent.map(|entry| entry.act_id),
        chain_satisfied_by,
        waivers,
        violations,
        trace,
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::model::{
        RecordingAct, RecordingActKind, RecordingDocument, Resource, ResourceKind,
    };
    use crate::tract::RegistryLedger;
    use crate::OperationContext;
    use time::macros::datetime;
    use time::Duration;

    fn fixture_time(offset_secs: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000 + offset_secs)
    }

    fn ctx() -> OperationContext {
        match OperationContext::new("clerk", fixture_time(0)) {
            Ok(ctx) => ctx,
            Err(err) => panic!("context should build: {err}"),
        }
    }

    struct Fixture {
        ledger: RegistryLedger,
        ruleset: RecordingRuleset,
    }

    impl Fixture {
        fn new() -> Self {
            Self { ledger: RegistryLedger::new(), ruleset: RecordingRuleset::builtin() }
        }

        fn document(&mut self, presented_at: OffsetDateTime) -> crate::model::DocumentId {
            self.ledger.insert_document(RecordingDocument::new("trx", presented_at))
        }

        fn act(
            &mut self,
            document_id: crate::model::DocumentId,
            kind: RecordingActKind,
        ) -> RecordingActId {
            let act = RecordingAct::new(kind, document_id, "clerk", fixture_time(0));
            match self.ledger.append_act(act) {
                Ok(id) => id,
                Err(err) => panic!("act should append: {err}"),
            }
        }

        fn attach(&mut self, act_id: RecordingActId, resource: &Resource, role: TractRole) {
            if let Err(err) = self.ledger.attach_resource(act_id, resource.clone(), role, &ctx()) {
                panic!("attach should succeed: {err}");
            }
        }

        fn snapshot(&self, resource_id: ResourceId) -> TractSnapshot {
            match self.ledger.tract(resource_id) {
                Ok(snapshot) => snapshot,
                Err(err) => panic!("tract should load: {err}"),
            }
        }

        fn line(&self, resource_id: ResourceId) -> PartitionLine {
            match self.ledger.partition_line(resource_id) {
                Ok(line) => line,
                Err(err) => panic!("partition line should load: {err}"),
            }
        }

        fn rule(&self, kind: RecordingActKind) -> RecordingRule {
            match self.ruleset.rule_for(kind) {
                Ok(rule) => rule.clone(),
                Err(err) => panic!("rule should exist: {err}"),
            }
        }
    }

    // Test IDs: TSLV-001
    #[test]
    fn tract_until_returns_strict_and_inclusive_prefixes() {
        let mut fx = Fixture::new();
        let d1 = fx.document(fixture_time(0));
        let d2 = fx.document(fixture_time(100));
        let d3 = fx.document(fixture_time(200));
        let a1 = fx.act(d1, RecordingActKind::Domain);
        let a2 = fx.act(d2, RecordingActKind::Limitation);
        let a3 = fx.act(d3, RecordingActKind::Information);

        let resource = Resource::new(ResourceKind::RealEstate);
        fx.attach(a1, &resource, TractRole::Created);
        fx.attach(a2, &resource, TractRole::Edited);
        fx.attach(a3, &resource, TractRole::Informative);

        let snapshot = fx.snapshot(resource.id);
        let strict = match tract_until(&snapshot, a2, false) {
            Ok(entries) => entries,
            Err(err) => panic!("strict prefix should resolve: {err}"),
        };
        assert_eq!(strict.iter().map(|entry| entry.act_id).collect::<Vec<_>>(), vec![a1]);

        let inclusive = match tract_until(&snapshot, a2, true) {
            Ok(entries) => entries,
            Err(err) => panic!("inclusive prefix should resolve: {err}"),
        };
        assert_eq!(
            inclusive.iter().map(|entry| entry.act_id).collect::<Vec<_>>(),
            vec![a1, a2]
        );

        let stranger = RecordingActId::new();
        assert!(matches!(
            tract_until(&snapshot, stranger, false),
            Err(RegistryError::NotFound(_))
        ));
    }

    // Test IDs: TSLV-002
    #[test]
    fn domain_antecedent_walks_backward_past_informative_entries() {
        let mut fx = Fixture::new();
        let d1 = fx.document(fixture_time(0));
        let d2 = fx.document(fixture_time(100));
        let d3 = fx.document(fixture_time(200));
        let created = fx.act(d1, RecordingActKind::Domain);
        let transfer = fx.act(d2, RecordingActKind::Domain);
        let note = fx.act(d3, RecordingActKind::Information);

        let resource = Resource::new(ResourceKind::RealEstate);
        fx.attach(created, &resource, TractRole::Created);
        fx.attach(transfer, &resource, TractRole::Edited);
        fx.attach(note, &resource, TractRole::Informative);

        let line = fx.line(resource.id);
        let antecedent =
            match domain_antecedent(&line, &fx.ruleset, resource.id, None) {
                Ok(antecedent) => antecedent,
                Err(err) => panic!("antecedent should resolve: {err}"),
            };
        let entry = match antecedent {
            Some(entry) => entry,
            None => panic!("antecedent should exist"),
        };
        assert_eq!(entry.act_id, transfer, "informative tail must be skipped");
    }

    // Test IDs: TSLV-003
    #[test]
    fn domain_antecedent_falls_back_to_first_entry() {
        let mut fx = Fixture::new();
        let d1 = fx.document(fixture_time(0));
        // Seed a tract whose only active entries are informative; the walk
        // finds no domain-bearing entry and falls back to the earliest one.
        let seed = fx.act(d1, RecordingActKind::Domain);
        let d2 = fx.document(fixture_time(50));
        let note = fx.act(d2, RecordingActKind::Information);

        let resource = Resource::new(ResourceKind::RealEstate);
        fx.attach(seed, &resource, TractRole::Created);
        fx.attach(note, &resource, TractRole::Informative);

        // Soft-delete the creational entry: what remains is informative only.
        let items: Vec<_> = fx.ledger.items_for_act(seed).iter().map(|item| item.id).collect();
        for item_id in items {
            if let Err(err) = fx.ledger.delete_item(item_id) {
                panic!("delete should succeed: {err}");
            }
        }

        let line = fx.line(resource.id);
        let antecedent =
            match domain_antecedent(&line, &fx.ruleset, resource.id, None) {
                Ok(antecedent) => antecedent,
                Err(err) => panic!("antecedent should resolve: {err}"),
            };
        let entry = match antecedent {
            Some(entry) => entry,
            None => panic!("fallback antecedent should exist"),
        };
        assert_eq!(entry.act_id, note);
    }

    // Test IDs: TSLV-004
    #[test]
    fn partition_with_no_own_entries_before_boundary_inherits_parent_antecedent() {
        let mut fx = Fixture::new();
        let d1 = fx.document(fixture_time(0));
        let d2 = fx.document(fixture_time(100));
        let d3 = fx.document(fixture_time(200));
        let parent_created = fx.act(d1, RecordingActKind::Domain);
        let parent_transfer = fx.act(d2, RecordingActKind::Domain);
        let split = fx.act(d3, RecordingActKind::Structure);

        let parent = Resource::new(ResourceKind::RealEstate);
        fx.attach(parent_created, &parent, TractRole::Created);
        fx.attach(parent_transfer, &parent, TractRole::Edited);

        let child = Resource::new_partition(&parent);
        fx.attach(split, &child, TractRole::PartitionOf);

        // Anchored before the split, the child has no own entry and resolves
        // through the parent's tract at the same boundary.
        let line = fx.line(child.id);
        let inherited = match domain_antecedent(&line, &fx.ruleset, child.id, Some(fixture_time(150)))
        {
            Ok(antecedent) => antecedent,
            Err(err) => panic!("antecedent should resolve: {err}"),
        };
        let entry = match inherited {
            Some(entry) => entry,
            None => panic!("inherited antecedent should exist"),
        };
        assert_eq!(entry.act_id, parent_transfer);
        assert_eq!(entry.resource_id, parent.id);

        // With no boundary the child's own creational entry wins.
        let own = match domain_antecedent(&line, &fx.ruleset, child.id, None) {
            Ok(antecedent) => antecedent,
            Err(err) => panic!("antecedent should resolve: {err}"),
        };
        let entry = match own {
            Some(entry) => entry,
            None => panic!("own antecedent should exist"),
        };
        assert_eq!(entry.act_id, split);
        assert_eq!(entry.resource_id, child.id);
    }

    // Test IDs: TSLV-005
    #[test]
    fn chained_act_requirement_fails_without_an_active_domain_act() {
        let mut fx = Fixture::new();
        let d1 = fx.document(datetime!(2024-03-01 10:00 UTC));
        let note = fx.act(d1, RecordingActKind::Information);

        let resource = Resource::new(ResourceKind::RealEstate);
        // First item must be creational; use a creational information entry
        // seeded from a book capture.
        fx.attach(note, &resource, TractRole::Created);

        let snapshot = fx.snapshot(resource.id);
        let rule = fx.rule(RecordingActKind::Limitation);
        let err = match check_chained_act(&snapshot, &rule, datetime!(2024-04-01 10:00 UTC)) {
            Ok(_) => panic!("missing chained act should be a violation"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("requires an earlier active domain act"));
    }

    // Test IDs: TSLV-006
    #[test]
    fn chained_act_requirement_is_satisfied_by_closed_document_domain_act() {
        let mut fx = Fixture::new();
        let d1 = fx.document(datetime!(2024-03-01 10:00 UTC));
        let domain_act = fx.act(d1, RecordingActKind::Domain);

        let resource = Resource::new(ResourceKind::RealEstate);
        fx.attach(domain_act, &resource, TractRole::Created);

        let rule = fx.rule(RecordingActKind::Limitation);

        // While the document is still open the requirement is unmet.
        let snapshot = fx.snapshot(resource.id);
        assert!(check_chained_act(&snapshot, &rule, datetime!(2024-04-01 10:00 UTC)).is_err());

        if let Err(err) = fx.ledger.close_document(d1) {
            panic!("document should close: {err}");
        }
        let snapshot = fx.snapshot(resource.id);
        let check = match check_chained_act(&snapshot, &rule, datetime!(2024-04-01 10:00 UTC)) {
            Ok(check) => check,
            Err(err) => panic!("chained requirement should be satisfied: {err}"),
        };
        assert_eq!(check.satisfied_by, Some(domain_act));
        assert_eq!(check.waived_by, None);
    }

    // Test IDs: TSLV-007
    #[test]
    fn cancelled_domain_act_does_not_satisfy_the_chain() {
        let mut fx = Fixture::new();
        let d1 = fx.document(datetime!(2024-03-01 10:00 UTC));
        let domain_act = fx.act(d1, RecordingActKind::Domain);
        let d2 = fx.document(datetime!(2024-03-10 10:00 UTC));
        let cancelation = {
            let mut act =
                RecordingAct::new(RecordingActKind::Cancelation, d2, "clerk", fixture_time(0));
            act.cancels = Some(domain_act);
            match fx.ledger.append_act(act) {
                Ok(id) => id,
                Err(err) => panic!("act should append: {err}"),
            }
        };

        let resource = Resource::new(ResourceKind::RealEstate);
        fx.attach(domain_act, &resource, TractRole::Created);
        fx.attach(cancelation, &resource, TractRole::Canceled);
        for doc in [d1, d2] {
            if let Err(err) = fx.ledger.close_document(doc) {
                panic!("document should close: {err}");
            }
        }

        let snapshot = fx.snapshot(resource.id);
        let rule = fx.rule(RecordingActKind::Limitation);
        assert!(check_chained_act(&snapshot, &rule, datetime!(2024-04-01 10:00 UTC)).is_err());
    }

    // Test IDs: TSLV-008
    #[test]
    fn pre_cutoff_documents_bypass_the_chain_with_recorded_waiver() {
        let mut fx = Fixture::new();
        let d1 = fx.document(datetime!(2001-05-20 09:00 UTC));
        let note = fx.act(d1, RecordingActKind::Information);
        let resource = Resource::new(ResourceKind::RealEstate);
        fx.attach(note, &resource, TractRole::Created);

        let snapshot = fx.snapshot(resource.id);
        let rule = fx.rule(RecordingActKind::Limitation);
        let check = match check_chained_act(&snapshot, &rule, datetime!(2003-01-15 09:00 UTC)) {
            Ok(check) => check,
            Err(err) => panic!("pre-cutoff document should be waived: {err}"),
        };
        assert_eq!(check.satisfied_by, None);
        assert!(matches!(check.waived_by, Some(label) if label.contains("statutory")));
    }

    // Test IDs: TSLV-009
    #[test]
    fn prelation_rejects_insertion_before_a_closed_act() {
        let mut fx = Fixture::new();
        let d1 = fx.document(fixture_time(1_000));
        let act_a = fx.act(d1, RecordingActKind::Domain);
        let d3 = fx.document(fixture_time(3_000));
        let act_b = fx.act(d3, RecordingActKind::Domain);

        let resource = Resource::new(ResourceKind::RealEstate);
        fx.attach(act_a, &resource, TractRole::Created);
        fx.attach(act_b, &resource, TractRole::Edited);

        // Close ActA.
        if let Err(err) = fx.ledger.register_act(act_a) {
            panic!("register should succeed: {err}");
        }
        if let Err(err) = fx.ledger.close_act(act_a) {
            panic!("close should succeed: {err}");
        }

        let snapshot = fx.snapshot(resource.id);
        let rule = fx.rule(RecordingActKind::Domain);

        // ActC at t2 sits after the closed ActA: admissible.
        if let Err(err) = check_prelation(&snapshot, &rule, fixture_time(2_000)) {
            panic!("insertion after the closed act should pass: {err}");
        }

        // ActD at t0 would precede the closed ActA: violation citing ActA.
        let err = match check_prelation(&snapshot, &rule, fixture_time(0)) {
            Ok(()) => panic!("insertion before a closed act should fail"),
            Err(err) => err,
        };
        assert!(err.to_string().contains(&act_a.to_string()));
    }

    // Test IDs: TSLV-010
    #[test]
    fn review_collects_violations_waivers_and_trace() {
        let mut fx = Fixture::new();
        let d1 = fx.document(fixture_time(1_000));
        let act_a = fx.act(d1, RecordingActKind::Domain);
        let resource = Resource::new(ResourceKind::RealEstate);
        fx.attach(act_a, &resource, TractRole::Created);
        if let Err(err) = fx.ledger.register_act(act_a) {
            panic!("register should succeed: {err}");
        }
        if let Err(err) = fx.ledger.close_act(act_a) {
            panic!("close should succeed: {err}");
        }

        let line = fx.line(resource.id);
        let rule = fx.rule(RecordingActKind::Limitation);
        let review =
            match review_admissibility(&line, &fx.ruleset, resource.id, &rule, fixture_time(0)) {
                Ok(review) => review,
                Err(err) => panic!("review should build: {err}"),
            };

        assert!(!review.admissible);
        // Missing chained domain act and a prelation conflict, both reported.
        assert_eq!(review.violations.len(), 2);
        assert!(review.trace.iter().any(|line| line.starts_with("sort:")));
        assert!(review.violations.iter().any(|v| v.contains("prelation")));
    }

    // Test IDs: TSLV-011
    proptest! {
        #[test]
        fn review_is_deterministic_under_permuted_attachment_order(seed in any::<u64>()) {
            fn splitmix64(mut value: u64) -> u64 {
                value = value.wrapping_add(0x9E37_79B9_7F4A_7C15);
                value = (value ^ (value >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
                value = (value ^ (value >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
                value ^ (value >> 31)
            }

            fn build(order: &[usize]) -> AdmissibilityReview {
                let mut fx = Fixture::new();
                let d0 = fx.document(fixture_time(0));
                let created = fx.act(d0, RecordingActKind::Domain);
                let docs = [
                    fx.document(fixture_time(100)),
                    fx.document(fixture_time(200)),
                    fx.document(fixture_time(300)),
                ];
                let follow_ups = [
                    fx.act(docs[0], RecordingActKind::Domain),
                    fx.act(docs[1], RecordingActKind::Limitation),
                    fx.act(docs[2], RecordingActKind::Information),
                ];
                let roles =
                    [TractRole::Edited, TractRole::Edited, TractRole::Informative];

                let resource = Resource::new(ResourceKind::RealEstate);
                fx.attach(created, &resource, TractRole::Created);
                for position in order {
                    fx.attach(follow_ups[*position], &resource, roles[*position]);
                }

                let line = fx.line(resource.id);
                let rule = fx.rule(RecordingActKind::Domain);
                match review_admissibility(
                    &line,
                    &fx.ruleset,
                    resource.id,
                    &rule,
                    fixture_time(400),
                ) {
                    Ok(review) => review,
                    Err(err) => panic!("review should build: {err}"),
                }
            }

            let mut order = vec![0_usize, 1, 2];
            order.sort_by_key(|position| {
                splitmix64(seed ^ u64::try_from(*position).unwrap_or(u64::MAX))
            });
            let permuted = build(&order);
            let canonical = build(&[0, 1, 2]);

            // Ids differ per run; determinism shows in the shape of the
            // decision, not in freshly issued ulids.
            prop_assert_eq!(permuted.admissible, canonical.admissible);
            prop_assert_eq!(permuted.violations.len(), canonical.violations.len());
            prop_assert_eq!(permuted.waivers.clone(), canonical.waivers.clone());
            prop_assert_eq!(permuted.trace.len(), canonical.trace.len());
        }
    }
}
