use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::model::{
    BookEntry, BookEntryId, DeleteAuthority, DocumentId, RecordableStatus, RecordingAct,
    RecordingActId, RecordingActKind, RecordingDocument, Resource, ResourceId, TractItemId,
    TractRole,
};
use crate::{OperationContext, RegistryError};

/// One edge of the tract index: a recording act touching a resource under a
/// typed role. Never physically removed once recorded; deletion is a status
/// transition.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TractIndexItem {
    pub id: TractItemId,
    pub resource_id: ResourceId,
    pub act_id: RecordingActId,
    pub role: TractRole,
    pub status: RecordableStatus,
    pub recorded_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// Denormalized tract row: the item together with the act and document facts
/// the resolver orders and filters by. Built once per operation; resolver
/// functions never chase live object references.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TractEntry {
    pub item_id: TractItemId,
    pub resource_id: ResourceId,
    pub act_id: RecordingActId,
    pub role: TractRole,
    pub item_status: RecordableStatus,
    pub act_kind: RecordingActKind,
    pub act_status: RecordableStatus,
    pub act_index: u32,
    pub document_id: DocumentId,
    #[serde(with = "time::serde::rfc3339")]
    pub presentation_time: OffsetDateTime,
    pub document_closed: bool,
    pub cancels: Option<RecordingActId>,
}

impl TractEntry {
    /// Prelation ordering: presentation time, then act position in its
    /// document, then act id as a deterministic tie-breaker.
    #[must_use]
    pub fn ordering_key(&self) -> (OffsetDateTime, u32, RecordingActId) {
        (self.presentation_time, self.act_index, self.act_id)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.item_status.is_active() && self.act_status.is_active()
    }
}

/// The tract of one resource, loaded once per operation and sorted by
/// prelation order. Deleted entries are retained for audit.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TractSnapshot {
    pub resource: Resource,
    pub entries: Vec<TractEntry>,
}

impl TractSnapshot {
    pub fn active_entries(&self) -> impl Iterator<Item = &TractEntry> {
        self.entries.iter().filter(|entry| entry.is_active())
    }
}

/// Narrow persistence contract the surrounding infrastructure implements.
/// All operations are transactional and idempotent on retry by identity.
pub trait TractGateway {
    /// Load the full tract of one resource in prelation order.
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`] for an unknown resource.
    fn load_tract(&self, resource_id: ResourceId) -> Result<TractSnapshot, RegistryError>;

    /// Persist one resource.
    ///
    /// # Errors
    /// Returns an error when the write fails.
    fn save_resource(&mut self, resource: &Resource) -> Result<(), RegistryError>;

    /// Persist one recording act.
    ///
    /// # Errors
    /// Returns an error when the write fails.
    fn save_recording_act(&mut self, act: &RecordingAct) -> Result<(), RegistryError>;

    /// Persist one tract item together with its owning resource. The
    /// resource is written first when unseen: resource creation is never
    /// observable without its first tract entry.
    ///
    /// # Errors
    /// Returns an error when the write fails.
    fn save_tract_item(
        &mut self,
        item: &TractIndexItem,
        resource: &Resource,
    ) -> Result<(), RegistryError>;
}

/// Id-indexed arena of registry state for one operation. Replaces the lazily
/// loaded live object graph: every lookup is explicit and deterministic.
#[derive(Debug, Clone, Default)]
pub struct RegistryLedger {
    resources: BTreeMap<ResourceId, Resource>,
    acts: BTreeMap<RecordingActId, RecordingAct>,
    documents: BTreeMap<DocumentId, RecordingDocument>,
    book_entries: BTreeMap<BookEntryId, BookEntry>,
    items: BTreeMap<TractItemId, TractIndexItem>,
}

impl RegistryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns [`RegistryError::NotFound`] for an unknown resource id.
    pub fn resource(&self, id: ResourceId) -> Result<&Resource, RegistryError> {
        self.resources
            .get(&id)
            .ok_or_else(|| RegistryError::NotFound(format!("resource {id} does not exist")))
    }

    /// # Errors
    /// Returns [`RegistryError::NotFound`] for an unknown act id.
    pub fn act(&self, id: RecordingActId) -> Result<&RecordingAct, RegistryError> {
        self.acts
            .get(&id)
            .ok_or_else(|| RegistryError::NotFound(format!("recording act {id} does not exist")))
    }

    /// # Errors
    /// Returns [`RegistryError::NotFound`] for an unknown document id.
    pub fn document(&self, id: DocumentId) -> Result<&RecordingDocument, RegistryError> {
        self.documents
            .get(&id)
            .ok_or_else(|| RegistryError::NotFound(format!("document {id} does not exist")))
    }

    /// # Errors
    /// Returns [`RegistryError::NotFound`] for an unknown book entry id.
    pub fn book_entry(&self, id: BookEntryId) -> Result<&BookEntry, RegistryError> {
        self.book_entries
            .get(&id)
            .ok_or_else(|| RegistryError::NotFound(format!("book entry {id} does not exist")))
    }

    /// # Errors
    /// Returns [`RegistryError::NotFound`] for an unknown tract item id.
    pub fn item(&self, id: TractItemId) -> Result<&TractIndexItem, RegistryError> {
        self.items
            .get(&id)
            .ok_or_else(|| RegistryError::NotFound(format!("tract item {id} does not exist")))
    }

    pub fn insert_document(&mut self, document: RecordingDocument) -> DocumentId {
        let id = document.id;
        self.documents.insert(id, document);
        id
    }

    pub fn insert_book_entry(&mut self, entry: BookEntry) -> BookEntryId {
        let id = entry.id;
        self.book_entries.insert(id, entry);
        id
    }

    /// Upsert a resource directly; gateway implementations use this for
    /// idempotent retries. Ledger-internal creation goes through
    /// [`RegistryLedger::attach_resource`] instead.
    pub fn upsert_resource(&mut self, resource: Resource) {
        self.resources.insert(resource.id, resource);
    }

    /// Upsert a tract item directly; gateway implementations use this for
    /// idempotent retries.
    pub fn upsert_item(&mut self, item: TractIndexItem) {
        self.items.insert(item.id, item);
    }

    /// Upsert a recording act directly; gateway implementations use this for
    /// idempotent retries.
    pub fn upsert_act(&mut self, act: RecordingAct) {
        self.acts.insert(act.id, act);
    }

    /// # Errors
    /// Returns [`RegistryError::NotFound`] for an unknown document.
    pub fn close_document(&mut self, id: DocumentId) -> Result<(), RegistryError> {
        let document = self
            .documents
            .get_mut(&id)
            .ok_or_else(|| RegistryError::NotFound(format!("document {id} does not exist")))?;
        document.close();
        Ok(())
    }

    /// # Errors
    /// Returns [`RegistryError::NotFound`] for an unknown document.
    pub fn reopen_document(&mut self, id: DocumentId) -> Result<(), RegistryError> {
        let document = self
            .documents
            .get_mut(&id)
            .ok_or_else(|| RegistryError::NotFound(format!("document {id} does not exist")))?;
        document.reopen();
        Ok(())
    }

    /// Append a new act to its owning document, assigning the next 1-based
    /// index.
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`] for an unknown document,
    /// [`RegistryError::RuleViolation`] when the document is closed, and
    /// [`RegistryError::Integrity`] when the act id already exists.
    pub fn append_act(&mut self, mut act: RecordingAct) -> Result<RecordingActId, RegistryError> {
        let document_id = act.document_id;
        let document = self.documents.get_mut(&document_id).ok_or_else(|| {
            RegistryError::NotFound(format!("document {document_id} does not exist"))
        })?;
        if document.is_closed {
            return Err(RegistryError::RuleViolation(format!(
                "document {document_id} is closed; reopen it before appending acts"
            )));
        }
        if self.acts.contains_key(&act.id) {
            return Err(RegistryError::Integrity(format!(
                "recording act {} appended twice",
                act.id
            )));
        }
        act.index = document.next_index();
        let id = act.id;
        document.acts.push(id);
        self.acts.insert(id, act);
        Ok(id)
    }

    /// # Errors
    /// Returns [`RegistryError::NotFound`] for an unknown act, or the state
    /// machine's [`RegistryError::RuleViolation`].
    pub fn register_act(&mut self, id: RecordingActId) -> Result<(), RegistryError> {
        let act = self
            .acts
            .get_mut(&id)
            .ok_or_else(|| RegistryError::NotFound(format!("recording act {id} does not exist")))?;
        act.register()?;
        self.mirror_act_status(id, RecordableStatus::Registered);
        Ok(())
    }

    /// # Errors
    /// Returns [`RegistryError::NotFound`] for an unknown act, or the state
    /// machine's [`RegistryError::RuleViolation`].
    pub fn close_act(&mut self, id: RecordingActId) -> Result<(), RegistryError> {
        let act = self
            .acts
            .get_mut(&id)
            .ok_or_else(|| RegistryError::NotFound(format!("recording act {id} does not exist")))?;
        act.close()?;
        self.mirror_act_status(id, RecordableStatus::Closed);
        Ok(())
    }

    /// Soft-delete an act and cascade to its tract items. Deleting out of
    /// Closed demands an administrative override, and only once the owning
    /// document has been reopened.
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`] for an unknown act, or the state
    /// machine's [`RegistryError::RuleViolation`].
    pub fn delete_act(
        &mut self,
        id: RecordingActId,
        admin_override: bool,
    ) -> Result<(), RegistryError> {
        let document_reopened = {
            let act = self.acts.get(&id).ok_or_else(|| {
                RegistryError::NotFound(format!("recording act {id} does not exist"))
            })?;
            self.documents.get(&act.document_id).is_some_and(|doc| !doc.is_closed)
        };
        let authority = if admin_override {
            DeleteAuthority::AdministrativeOverride { document_reopened }
        } else {
            DeleteAuthority::Standard
        };
        let act = self
            .acts
            .get_mut(&id)
            .ok_or_else(|| RegistryError::NotFound(format!("recording act {id} does not exist")))?;
        act.mark_deleted(authority)?;

        let item_ids: Vec<TractItemId> = self
            .items
            .values()
            .filter(|item| item.act_id == id)
            .map(|item| item.id)
            .collect();
        for item_id in item_ids {
            self.delete_item(item_id)?;
        }
        Ok(())
    }

    /// Attach a resource to a recording act under a typed role, creating the
    /// resource's tract entry. An unsaved resource is persisted first, in the
    /// same operation: resource creation is never observable without its
    /// first tract entry. The new item starts Pending.
    ///
    /// # Errors
    /// Returns [`RegistryError::Precondition`] for placeholder operands,
    /// [`RegistryError::NotFound`] for an unknown act, and
    /// [`RegistryError::RuleViolation`] when the resource is merged, closed
    /// or deleted, when the `(resource, act)` pair already exists, or when
    /// the creational-role rule is broken.
    pub fn attach_resource(
        &mut self,
        act_id: RecordingActId,
        resource: Resource,
        role: TractRole,
        ctx: &OperationContext,
    ) -> Result<TractItemId, RegistryError> {
        if act_id.is_placeholder() {
            return Err(RegistryError::Precondition(
                "a real recording act is required; got the placeholder act".to_string(),
            ));
        }
        if resource.is_placeholder() {
            return Err(RegistryError::Precondition(
                "a real resource is required; got the placeholder resource".to_string(),
            ));
        }
        let act = self
            .acts
            .get(&act_id)
            .ok_or_else(|| RegistryError::NotFound(format!("recording act {act_id} does not exist")))?;
        if !act.status.is_active() {
            return Err(RegistryError::RuleViolation(format!(
                "recording act {act_id} is deleted and cannot take new tract items"
            )));
        }

        let resource_id = resource.id;
        let subject = self.resources.get(&resource_id).unwrap_or(&resource);
        let uid = subject.uid.clone();
        if subject.is_merged() {
            return Err(RegistryError::RuleViolation(format!(
                "resource {uid} has been merged into a successor and accepts no further acts"
            )));
        }
        if subject.status == RecordableStatus::Deleted {
            return Err(RegistryError::RuleViolation(format!(
                "resource {uid} is deleted; cancelled resources cannot be revived"
            )));
        }
        if subject.status == RecordableStatus::Closed {
            return Err(RegistryError::RuleViolation(format!(
                "resource {uid} is legally closed and accepts no further acts"
            )));
        }

        if self
            .items
            .values()
            .any(|item| item.resource_id == resource_id && item.act_id == act_id)
        {
            return Err(RegistryError::RuleViolation(format!(
                "resource {uid} already has a tract item under act {act_id}"
            )));
        }

        let has_active_items = self
            .items
            .values()
            .any(|item| item.resource_id == resource_id && item.status.is_active());
        if role.is_creational() && has_active_items {
            return Err(RegistryError::RuleViolation(format!(
                "role {} is creational and only legal as the very first tract item of {uid}",
                role.as_str()
            )));
        }
        if !role.is_creational() && !has_active_items {
            return Err(RegistryError::RuleViolation(format!(
                "the first tract item of {uid} must carry a creational role; got {}",
                role.as_str()
            )));
        }

        self.resources.entry(resource_id).or_insert(resource);
        let item = TractIndexItem {
            id: TractItemId::new(),
            resource_id,
            act_id,
            role,
            status: RecordableStatus::Pending,
            recorded_by: ctx.actor.clone(),
            recorded_at: ctx.now,
        };
        let id = item.id;
        self.items.insert(id, item);
        Ok(id)
    }

    /// Soft-delete one tract item; idempotent. When the resource's remaining
    /// active tract becomes empty the resource itself is marked Deleted.
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`] for an unknown item.
    pub fn delete_item(&mut self, id: TractItemId) -> Result<(), RegistryError> {
        let item = self
            .items
            .get_mut(&id)
            .ok_or_else(|| RegistryError::NotFound(format!("tract item {id} does not exist")))?;
        if item.status == RecordableStatus::Deleted {
            return Ok(());
        }
        item.status = RecordableStatus::Deleted;
        let resource_id = item.resource_id;

        let any_active = self
            .items
            .values()
            .any(|item| item.resource_id == resource_id && item.status.is_active());
        if !any_active {
            if let Some(resource) = self.resources.get_mut(&resource_id) {
                resource.status = RecordableStatus::Deleted;
            }
        }
        Ok(())
    }

    /// Remove a resource from an act's tract (soft).
    ///
    /// # Errors
    /// Returns [`RegistryError::ResourceNotInTract`] when the resource has no
    /// item under the act.
    pub fn detach_resource(
        &mut self,
        act_id: RecordingActId,
        resource_id: ResourceId,
    ) -> Result<(), RegistryError> {
        let item_id = self
            .items
            .values()
            .find(|item| item.resource_id == resource_id && item.act_id == act_id)
            .map(|item| item.id)
            .ok_or(RegistryError::ResourceNotInTract { resource: resource_id, act: act_id })?;
        self.delete_item(item_id)
    }

    #[must_use]
    pub fn items_for_act(&self, act_id: RecordingActId) -> Vec<&TractIndexItem> {
        self.items.values().filter(|item| item.act_id == act_id).collect()
    }

    /// Load the tract snapshot of one resource, sorted by prelation order.
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`] for an unknown resource and
    /// [`RegistryError::Integrity`] when an item references a missing act or
    /// document.
    pub fn tract(&self, resource_id: ResourceId) -> Result<TractSnapshot, RegistryError> {
        let resource = self.resource(resource_id)?.clone();
        let mut entries = Vec::new();
        for item in self.items.values().filter(|item| item.resource_id == resource_id) {
            entries.push(self.entry_for(item)?);
        }
        entries.sort_by_key(TractEntry::ordering_key);
        Ok(TractSnapshot { resource, entries })
    }

    /// Load the snapshots of a resource and all its partition ancestors,
    /// keyed by resource id; the antecedent resolver recurses over this map.
    ///
    /// # Errors
    /// Returns [`RegistryError::Integrity`] on a partition parentage cycle,
    /// plus any error from [`RegistryLedger::tract`].
    pub fn partition_line(
        &self,
        resource_id: ResourceId,
    ) -> Result<BTreeMap<ResourceId, TractSnapshot>, RegistryError> {
        let mut line = BTreeMap::new();
        let mut visited = BTreeSet::new();
        let mut cursor = Some(resource_id);
        while let Some(id) = cursor {
            if !visited.insert(id) {
                return Err(RegistryError::Integrity(format!(
                    "partition parentage of resource {resource_id} forms a cycle at {id}"
                )));
            }
            let snapshot = self.tract(id)?;
            cursor = snapshot.resource.partition_of;
            line.insert(id, snapshot);
        }
        Ok(line)
    }

    /// Move an act to a new 1-based position inside its document and
    /// renumber the whole run.
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`] when the act is not in the
    /// document's list, [`RegistryError::RuleViolation`] when the document is
    /// closed, and [`RegistryError::Precondition`] for an out-of-range index.
    pub fn reorder_act(
        &mut self,
        document_id: DocumentId,
        act_id: RecordingActId,
        new_index: u32,
    ) -> Result<(), RegistryError> {
        let document = self.documents.get_mut(&document_id).ok_or_else(|| {
            RegistryError::NotFound(format!("document {document_id} does not exist"))
        })?;
        if document.is_closed {
            return Err(RegistryError::RuleViolation(format!(
                "document {document_id} is closed; reopen it before reordering acts"
            )));
        }
        let position = document
            .acts
            .iter()
            .position(|id| *id == act_id)
            .ok_or_else(|| {
                RegistryError::NotFound(format!(
                    "act {act_id} is not in the recording act list of document {document_id}"
                ))
            })?;
        let count = u32::try_from(document.acts.len()).unwrap_or(u32::MAX);
        if new_index == 0 || new_index > count {
            return Err(RegistryError::Precondition(format!(
                "index {new_index} is out of range; document {document_id} holds {count} acts"
            )));
        }
        let moved = document.acts.remove(position);
        let target = usize::try_from(new_index - 1).unwrap_or(usize::MAX);
        document.acts.insert(target, moved);

        let order: Vec<RecordingActId> = document.acts.clone();
        for (position, id) in order.iter().enumerate() {
            if let Some(act) = self.acts.get_mut(id) {
                act.index = u32::try_from(position).unwrap_or(u32::MAX).saturating_add(1);
            }
        }
        Ok(())
    }

    /// Verify the structural invariants of one resource's tract: at most one
    /// active creational item, always the earliest, and no duplicate
    /// `(resource, act)` pair.
    ///
    /// # Errors
    /// Returns [`RegistryError::Integrity`] describing the breached
    /// invariant.
    pub fn verify_tract_integrity(&self, resource_id: ResourceId) -> Result<(), RegistryError> {
        let snapshot = self.tract(resource_id)?;
        let uid = snapshot.resource.uid.clone();

        let mut pairs = BTreeSet::new();
        for entry in &snapshot.entries {
            if !pairs.insert((entry.resource_id, entry.act_id)) {
                return Err(RegistryError::Integrity(format!(
                    "resource {uid} holds two tract items under act {}",
                    entry.act_id
                )));
            }
        }

        let active: Vec<&TractEntry> = snapshot.active_entries().collect();
        let creational: Vec<&TractEntry> =
            active.iter().filter(|entry| entry.role.is_creational()).copied().collect();
        if creational.len() > 1 {
            return Err(RegistryError::Integrity(format!(
                "resource {uid} carries {} creational tract roles; exactly one is legal",
                creational.len()
            )));
        }
        if let (Some(first_creational), Some(first_active)) = (creational.first(), active.first()) {
            if first_creational.item_id != first_active.item_id {
                return Err(RegistryError::Integrity(format!(
                    "the creational tract item of resource {uid} is not the earliest entry"
                )));
            }
        }
        Ok(())
    }

    fn mirror_act_status(&mut self, act_id: RecordingActId, status: RecordableStatus) {
        for item in self.items.values_mut() {
            if item.act_id == act_id && item.status != RecordableStatus::Deleted {
                item.status = status;
            }
        }
    }

    fn entry_for(&self, item: &TractIndexItem) -> Result<TractEntry, RegistryError> {
        let act = self.acts.get(&item.act_id).ok_or_else(|| {
            RegistryError::Integrity(format!(
                "tract item {} references unknown act {}",
                item.id, item.act_id
            ))
        })?;
        let document = self.documents.get(&act.document_id).ok_or_else(|| {
            RegistryError::Integrity(format!(
                "recording act {} references unknown document {}",
                act.id, act.document_id
            ))
        })?;
        Ok(TractEntry {
            item_id: item.id,
            resource_id: item.resource_id,
            act_id: item.act_id,
            role: item.role,
            item_status: item.status,
            act_kind: act.kind,
            act_status: act.status,
            act_index: act.index,
            document_id: document.id,
            presentation_time: document.presentation_time,
            document_closed: document.is_closed,
            cancels: act.cancels,
        })
    }

    pub(crate) fn resource_mut(
        &mut self,
        id: ResourceId,
    ) -> Result<&mut Resource, RegistryError> {
        self.resources
            .get_mut(&id)
            .ok_or_else(|| RegistryError::NotFound(format!("resource {id} does not exist")))
    }

    pub(crate) fn act_mut(
        &mut self,
        id: RecordingActId,
    ) -> Result<&mut RecordingAct, RegistryError> {
        self.acts
            .get_mut(&id)
            .ok_or_else(|| RegistryError::NotFound(format!("recording act {id} does not exist")))
    }
}
