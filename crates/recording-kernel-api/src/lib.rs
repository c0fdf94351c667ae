use anyhow::Result;
use recording_kernel_core::{
    domain_antecedent, ActTarget, DocumentId, OperationContext, RecorderExpert, RecordingActKind,
    RecordingDocument, RecordingOutcome, RecordingRuleset, RecordingTask, Resource,
    ResourceAcquisition, ResourceId, SubdivisionPolicy, TractEntry, TractGateway, TractItemId,
    TractSnapshot,
};
use recording_kernel_store_memory::MemoryStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

pub const API_CONTRACT_VERSION: &str = "recording-api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenDocumentRequest {
    pub transaction_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub presentation_time: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordActRequest {
    pub act_kind: RecordingActKind,
    pub document_id: DocumentId,
    pub acquisition: ResourceAcquisition,
    #[serde(default)]
    pub target: Option<ActTarget>,
    #[serde(default)]
    pub new_partition: Option<SubdivisionPolicy>,
    pub actor: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub recorded_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubdivideRequest {
    pub document_id: DocumentId,
    pub parent: ResourceId,
    pub policy: SubdivisionPolicy,
    pub actor: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub recorded_at: Option<OffsetDateTime>,
}

/// Result of one recording operation, stamped with a replayable snapshot id
/// over the tracts it produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordingReceipt {
    pub snapshot_id: String,
    pub outcome: RecordingOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TractReport {
    pub snapshot_id: String,
    pub resource: Resource,
    pub entries: Vec<TractEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AntecedentReport {
    pub snapshot_id: String,
    pub resource_id: ResourceId,
    pub antecedent: Option<TractEntry>,
}

/// The narrow façade external collaborators call: typed requests in,
/// receipts with audit snapshot ids out. Owns the store and the loaded rule
/// configuration.
#[derive(Debug, Default)]
pub struct RecorderApi {
    store: MemoryStore,
    ruleset: RecordingRuleset,
}

impl RecorderApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ruleset(ruleset: RecordingRuleset) -> Self {
        Self { store: MemoryStore::new(), ruleset }
    }

    #[must_use]
    pub fn ruleset(&self) -> &RecordingRuleset {
        &self.ruleset
    }

    /// Open a recording document with its presentation time.
    ///
    /// # Errors
    /// Returns an error when the write fails.
    pub fn open_document(&mut self, input: OpenDocumentRequest) -> Result<DocumentId> {
        self.store.mutate(None, |ledger| {
            Ok(ledger.insert_document(RecordingDocument::new(
                input.transaction_id.clone(),
                input.presentation_time,
            )))
        })
    }

    /// # Errors
    /// Returns an error for an unknown document.
    pub fn close_document(&mut self, id: DocumentId) -> Result<()> {
        self.store.mutate(None, |ledger| ledger.close_document(id))
    }

    /// # Errors
    /// Returns an error for an unknown document.
    pub fn reopen_document(&mut self, id: DocumentId) -> Result<()> {
        self.store.mutate(None, |ledger| ledger.reopen_document(id))
    }

    /// Record one act through the dispatcher, guarded by the acted-upon
    /// resource's tract version when the task selects an existing resource.
    ///
    /// # Errors
    /// Returns the dispatcher's rule violations, precondition failures, and
    /// not-found errors, or the store's stale-version conflict.
    pub fn record_act(&mut self, input: RecordActRequest) -> Result<RecordingReceipt> {
        let ctx = OperationContext::new(
            input.actor.clone(),
            input.recorded_at.unwrap_or_else(OffsetDateTime::now_utc),
        )?;
        let guard = match input.acquisition {
            ResourceAcquisition::SelectExisting { resource } => {
                Some((resource, self.store.tract_version(resource)))
            }
            _ => None,
        };
        let task = RecordingTask {
            act_kind: input.act_kind,
            document_id: input.document_id,
            acquisition: input.acquisition,
            target: input.target,
            new_partition: input.new_partition,
        };
        let ruleset = self.ruleset.clone();
        let outcome = self.store.mutate(guard, |ledger| {
            let expert = RecorderExpert::new(&ruleset);
            expert.record(ledger, task.clone(), &ctx)
        })?;
        self.receipt(outcome, ctx.now)
    }

    /// Subdivide a resource under the given policy.
    ///
    /// # Errors
    /// Returns the dispatcher's errors or the store's stale-version conflict.
    pub fn subdivide(&mut self, input: SubdivideRequest) -> Result<RecordingReceipt> {
        self.record_act(RecordActRequest {
            act_kind: RecordingActKind::Structure,
            document_id: input.document_id,
            acquisition: ResourceAcquisition::SelectExisting { resource: input.parent },
            target: None,
            new_partition: Some(input.policy),
            actor: input.actor,
            recorded_at: input.recorded_at,
        })
    }

    /// Soft-delete one tract item.
    ///
    /// # Errors
    /// Returns an error for an unknown item.
    pub fn delete_tract_item(&mut self, item: TractItemId) -> Result<()> {
        self.store.mutate(None, |ledger| ledger.delete_item(item))
    }

    /// Move an act to a new 1-based position inside its open document.
    ///
    /// # Errors
    /// Returns an error when the act is not in the document's list, the
    /// document is closed, or the index is out of range.
    pub fn reorder_act(
        &mut self,
        document: DocumentId,
        act: recording_kernel_core::RecordingActId,
        new_index: u32,
    ) -> Result<()> {
        self.store.mutate(None, |ledger| ledger.reorder_act(document, act, new_index))
    }

    /// Register a pending act (and mirror its items).
    ///
    /// # Errors
    /// Returns an error for an unknown act or an illegal transition.
    pub fn register_act(&mut self, act: recording_kernel_core::RecordingActId) -> Result<()> {
        self.store.mutate(None, |ledger| ledger.register_act(act))
    }

    /// Close a registered act (and mirror its items).
    ///
    /// # Errors
    /// Returns an error for an unknown act or an illegal transition.
    pub fn close_act(&mut self, act: recording_kernel_core::RecordingActId) -> Result<()> {
        self.store.mutate(None, |ledger| ledger.close_act(act))
    }

    /// Load one resource's tract report, stamped with its snapshot id.
    ///
    /// # Errors
    /// Returns an error for an unknown resource.
    pub fn tract(&self, resource: ResourceId, as_of: OffsetDateTime) -> Result<TractReport> {
        let snapshot = self.store.load_tract(resource)?;
        let snapshot_id = compute_snapshot_id(std::slice::from_ref(&snapshot), as_of);
        Ok(TractReport {
            snapshot_id,
            resource: snapshot.resource,
            entries: snapshot.entries,
        })
    }

    /// Resolve the domain antecedent of a resource, optionally anchored at a
    /// presentation-time boundary.
    ///
    /// # Errors
    /// Returns an error for an unknown resource or a broken partition line.
    pub fn domain_antecedent(
        &self,
        resource: ResourceId,
        boundary: Option<OffsetDateTime>,
        as_of: OffsetDateTime,
    ) -> Result<AntecedentReport> {
        let line = self.store.ledger().partition_line(resource)?;
        let snapshots: Vec<TractSnapshot> = line.values().cloned().collect();
        let antecedent =
            domain_antecedent(&line, &self.ruleset, resource, boundary)?.cloned();
        Ok(AntecedentReport {
            snapshot_id: compute_snapshot_id(&snapshots, as_of),
            resource_id: resource,
            antecedent,
        })
    }

    fn receipt(
        &self,
        outcome: RecordingOutcome,
        as_of: OffsetDateTime,
    ) -> Result<RecordingReceipt> {
        let mut snapshots = Vec::new();
        for resource in &outcome.resources {
            snapshots.push(self.store.load_tract(*resource)?);
        }
        Ok(RecordingReceipt { snapshot_id: compute_snapshot_id(&snapshots, as_of), outcome })
    }
}

/// Deterministic snapshot id over the loaded tracts: the same registry state
/// at the same instant always hashes to the same id, so every decision can
/// be replayed against the exact inputs that produced it.
fn compute_snapshot_id(snapshots: &[TractSnapshot], as_of: OffsetDateTime) -> String {
    let mut hasher = Sha256::new();
    hasher.update(as_of.unix_timestamp().to_string().as_bytes());

    let mut parts: Vec<String> = snapshots
        .iter()
        .flat_map(|snapshot| {
            snapshot.entries.iter().map(|entry| {
                format!(
                    "{}:{}:{}",
                    entry.resource_id,
                    entry.act_id,
                    entry.item_status.as_str()
                )
            })
        })
        .collect();
    parts.sort_unstable();
    for part in parts {
        hasher.update(part.as_bytes());
    }

    let digest = hasher.finalize();
    let digest_hex = format!("{digest:x}");
    format!("reg_{}", &digest_hex[..16])
}
