use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::macros::datetime;
use time::OffsetDateTime;

use crate::model::{RecordingActKind, ResourceKind};
use crate::tract::TractEntry;
use crate::RegistryError;

/// Documents presented before the registry modernization act carry no
/// chained-act obligation; their chains were reconstructed on paper and are
/// taken on faith.
pub const CHAINED_ACT_STATUTORY_CUTOFF: OffsetDateTime = datetime!(2004-07-01 00:00 UTC);

/// Operational waiver covering the digitization backlog: books captured
/// under the recapture program were keyed without their full chains.
pub const CHAINED_ACT_BACKLOG_CUTOFF: OffsetDateTime = datetime!(2016-09-15 00:00 UTC);

/// Operational waiver covering the provincial book transfers; chains for
/// transferred volumes arrive after the acts themselves.
pub const CHAINED_ACT_PROVINCIAL_TRANSFER_CUTOFF: OffsetDateTime = datetime!(2019-02-28 00:00 UTC);

/// Check the grandfather table: documents presented before a configured
/// cutoff bypass the chained-act requirement. The returned label is recorded
/// on the admissibility review so every waived check stays auditable.
#[must_use]
pub fn chain_requirement_waiver(presentation_time: OffsetDateTime) -> Option<&'static str> {
    if presentation_time < CHAINED_ACT_STATUTORY_CUTOFF {
        return Some("statutory cutoff 2004-07-01: pre-modernization document");
    }
    if presentation_time < CHAINED_ACT_BACKLOG_CUTOFF {
        return Some("operational cutoff 2016-09-15: digitization backlog recapture");
    }
    if presentation_time < CHAINED_ACT_PROVINCIAL_TRANSFER_CUTOFF {
        return Some("operational cutoff 2019-02-28: provincial book transfer");
    }
    None
}

/// Target kind selecting the cancelation/modification sub-strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    RecordingAct,
    Resource,
    Party,
    Structure,
}

impl TargetKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RecordingAct => "recording_act",
            Self::Resource => "resource",
            Self::Party => "party",
            Self::Structure => "structure",
        }
    }
}

/// Declarative recording rule for one act kind. Loaded once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RecordingRule {
    pub kind: RecordingActKind,
    /// Numeric act-type code from the deployment's rule configuration.
    pub act_code: u32,
    /// Resource kinds the act kind may touch; empty means any.
    #[serde(default)]
    pub applies_to: Vec<ResourceKind>,
    #[serde(default)]
    pub chained_act: Option<RecordingActKind>,
    #[serde(default)]
    pub is_annotation: bool,
    #[serde(default)]
    pub is_ending_act: bool,
    #[serde(default)]
    pub allows_partitions: bool,
    #[serde(default)]
    pub skip_prelation: bool,
    #[serde(default)]
    pub target: Option<TargetKind>,
}

impl RecordingRule {
    #[must_use]
    pub fn applies_to_kind(&self, kind: ResourceKind) -> bool {
        self.applies_to.is_empty() || self.applies_to.contains(&kind)
    }

    #[must_use]
    pub fn has_chained_rule(&self) -> bool {
        self.chained_act.is_some()
    }
}

/// Deployment-specific act codes with special meaning for antecedent
/// resolution. Sourced from configuration, never hard-coded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct SpecialActCodes {
    /// The "undetermined act" code: keyed from damaged or illegible book
    /// entries, still anchors a domain antecedent.
    #[serde(default)]
    pub undetermined_act: Option<u32>,
    /// Further codes the deployment treats as domain-bearing regardless of
    /// their tract role.
    #[serde(default)]
    pub supplemental_domain_acts: BTreeSet<u32>,
}

impl SpecialActCodes {
    #[must_use]
    pub fn is_domain_bearing(&self, act_code: u32) -> bool {
        self.undetermined_act == Some(act_code)
            || self.supplemental_domain_acts.contains(&act_code)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
struct RulesetDocument {
    version: String,
    #[serde(default)]
    special: SpecialActCodes,
    rules: Vec<RecordingRule>,
}

/// Immutable per-act-kind rule records: pure lookup over versioned
/// configuration, loaded once and cached, invalidated only by wholesale
/// reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingRuleset {
    version: String,
    rules: BTreeMap<RecordingActKind, RecordingRule>,
    special: SpecialActCodes,
}

impl RecordingRuleset {
    /// The built-in rule table; deployments override it with
    /// [`RecordingRuleset::from_json`].
    #[must_use]
    pub fn builtin() -> Self {
        let rules = vec![
            RecordingRule {
                kind: RecordingActKind::Domain,
                act_code: 2100,
                applies_to: vec![ResourceKind::RealEstate, ResourceKind::Association],
                chained_act: None,
                is_annotation: false,
                is_ending_act: false,
                allows_partitions: true,
                skip_prelation: false,
                target: None,
            },
            RecordingRule {
                kind: RecordingActKind::Limitation,
                act_code: 2300,
                applies_to: vec![ResourceKind::RealEstate],
                chained_act: Some(RecordingActKind::Domain),
                is_annotation: false,
                is_ending_act: false,
                allows_partitions: false,
                skip_prelation: false,
                target: None,
            },
            RecordingRule {
                kind: RecordingActKind::Information,
                act_code: 2500,
                applies_to: Vec::new(),
                chained_act: None,
                is_annotation: true,
                is_ending_act: false,
                allows_partitions: false,
                skip_prelation: true,
                target: None,
            },
            RecordingRule {
                kind: RecordingActKind::Cancelation,
                act_code: 2600,
                applies_to: Vec::new(),
                chained_act: None,
                is_annotation: false,
                is_ending_act: true,
                allows_partitions: false,
                skip_prelation: false,
                target: None,
            },
            RecordingRule {
                kind: RecordingActKind::Modification,
                act_code: 2700,
                applies_to: Vec::new(),
                chained_act: None,
                is_annotation: false,
                is_ending_act: false,
                allows_partitions: false,
                skip_prelation: false,
                target: None,
            },
            RecordingRule {
                kind: RecordingActKind::Structure,
                act_code: 2400,
                applies_to: vec![ResourceKind::RealEstate],
                chained_act: None,
                is_annotation: false,
                is_ending_act: false,
                allows_partitions: true,
                skip_prelation: false,
                target: None,
            },
            RecordingRule {
                kind: RecordingActKind::Association,
                act_code: 2110,
                applies_to: vec![ResourceKind::Association],
                chained_act: None,
                is_annotation: false,
                is_ending_act: false,
                allows_partitions: false,
                skip_prelation: false,
                target: None,
            },
            RecordingRule {
                kind: RecordingActKind::Document,
                act_code: 2800,
                applies_to: vec![ResourceKind::NoProperty],
                chained_act: None,
                is_annotation: true,
                is_ending_act: false,
                allows_partitions: false,
                skip_prelation: true,
                target: None,
            },
            RecordingRule {
                kind: RecordingActKind::Transaction,
                act_code: 2810,
                applies_to: vec![ResourceKind::NoProperty],
                chained_act: None,
                is_annotation: true,
                is_ending_act: false,
                allows_partitions: false,
                skip_prelation: true,
                target: None,
            },
        ];

        match Self::from_rules("ruleset.builtin.v1", SpecialActCodes::default(), rules) {
            Ok(ruleset) => ruleset,
            // The built-in table is validated by tests; a broken table is a
            // programming error, not a runtime condition.
            Err(err) => unreachable!("built-in ruleset is invalid: {err}"),
        }
    }

    /// Load a versioned rule configuration document.
    ///
    /// # Errors
    /// Returns [`RegistryError::Precondition`] when the document cannot be
    /// parsed, the version is blank, an act kind is configured twice, or a
    /// rule chains to itself.
    pub fn from_json(document: &str) -> Result<Self, RegistryError> {
        let parsed: RulesetDocument = serde_json::from_str(document).map_err(|err| {
            RegistryError::Precondition(format!("rule configuration does not parse: {err}"))
        })?;
        Self::from_rules(parsed.version, parsed.special, parsed.rules)
    }

    fn from_rules(
        version: impl Into<String>,
        special: SpecialActCodes,
        rules: Vec<RecordingRule>,
    ) -> Result<Self, RegistryError> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(RegistryError::Precondition(
                "rule configuration version MUST be provided".to_string(),
            ));
        }

        let mut by_kind = BTreeMap::new();
        for rule in rules {
            if rule.chained_act == Some(rule.kind) {
                return Err(RegistryError::Precondition(format!(
                    "rule for {} chains to itself",
                    rule.kind.as_str()
                )));
            }
            let kind = rule.kind;
            if by_kind.insert(kind, rule).is_some() {
                return Err(RegistryError::Precondition(format!(
                    "rule configuration lists act kind {} twice",
                    kind.as_str()
                )));
            }
        }

        Ok(Self { version, rules: by_kind, special })
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn special(&self) -> &SpecialActCodes {
        &self.special
    }

    /// Resolve the full rule record for an act kind.
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`] when the kind is not configured.
    pub fn rule_for(&self, kind: RecordingActKind) -> Result<&RecordingRule, RegistryError> {
        self.rules.get(&kind).ok_or_else(|| {
            RegistryError::NotFound(format!(
                "no recording rule configured for act kind {}",
                kind.as_str()
            ))
        })
    }

    /// Whether a tract entry anchors domain-antecedent resolution: creational
    /// and structural roles always do; edits only when the act itself moves
    /// domain or structure; configured special act codes do regardless of
    /// role.
    #[must_use]
    pub fn bears_domain(&self, entry: &TractEntry) -> bool {
        if entry.role.is_creational() || entry.role.is_structural() {
            return true;
        }
        if entry.role == crate::model::TractRole::Edited
            && matches!(
                entry.act_kind,
                RecordingActKind::Domain
                    | RecordingActKind::Structure
                    | RecordingActKind::Association
            )
        {
            return true;
        }
        self.rules
            .get(&entry.act_kind)
            .is_some_and(|rule| self.special.is_domain_bearing(rule.act_code))
    }
}

impl Default for RecordingRuleset {
    fn default() -> Self {
        Self::builtin()
    }
}
