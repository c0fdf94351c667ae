pub mod model;
pub mod recorder;
pub mod resolver;
pub mod rules;
pub mod tract;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub use model::{
    BookEntry, BookEntryId, DeleteAuthority, DocumentId, RecordableStatus, RecordingAct,
    RecordingActId, RecordingActKind, RecordingDocument, Resource, ResourceId, ResourceKind,
    ResourceUid, TractItemId, TractRole,
};
pub use recorder::{
    ActTarget, RecorderExpert, RecordingOutcome, RecordingTask, ResourceAcquisition,
    SubdivisionPolicy,
};
pub use resolver::{
    active_tract, check_chained_act, check_prelation, domain_antecedent, review_admissibility,
    tract_until, AdmissibilityReview, ChainCheck, PartitionLine,
};
pub use rules::{
    chain_requirement_waiver, RecordingRule, RecordingRuleset, SpecialActCodes, TargetKind,
    CHAINED_ACT_BACKLOG_CUTOFF, CHAINED_ACT_PROVINCIAL_TRANSFER_CUTOFF,
    CHAINED_ACT_STATUTORY_CUTOFF,
};
pub use tract::{RegistryLedger, TractEntry, TractGateway, TractIndexItem, TractSnapshot};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RegistryError {
    #[error("precondition violation: {0}")]
    Precondition(String),
    #[error("recording rule violation: {0}")]
    RuleViolation(String),
    #[error("operation not supported: {0}")]
    NotSupported(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("resource {resource} is not in the tract of act {act}")]
    ResourceNotInTract { resource: ResourceId, act: RecordingActId },
    #[error("integrity error: {0}")]
    Integrity(String),
}

/// Explicit actor/clock context for every mutating operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationContext {
    pub actor: String,
    #[serde(with = "time::serde::rfc3339")]
    pub now: OffsetDateTime,
}

impl OperationContext {
    /// Build an operation context.
    ///
    /// # Errors
    /// Returns [`RegistryError::Precondition`] when the actor is blank; every
    /// write to the ledger must be attributable.
    pub fn new(actor: impl Into<String>, now: OffsetDateTime) -> Result<Self, RegistryError> {
        let actor = actor.into();
        if actor.trim().is_empty() {
            return Err(RegistryError::Precondition(
                "actor MUST be provided for every recording operation".to_string(),
            ));
        }
        Ok(Self { actor, now })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
    }

    // Test IDs: TCTX-001
    #[test]
    fn operation_context_rejects_blank_actor() {
        let err = match OperationContext::new("  ", fixture_time()) {
            Ok(_) => panic!("blank actor should be rejected"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("actor MUST be provided"));
    }

    // Test IDs: TCTX-002
    #[test]
    fn operation_context_keeps_actor_and_clock() {
        let ctx = match OperationContext::new("clerk-17", fixture_time()) {
            Ok(ctx) => ctx,
            Err(err) => panic!("context should build: {err}"),
        };
        assert_eq!(ctx.actor, "clerk-17");
        assert_eq!(ctx.now, fixture_time());
    }
}
