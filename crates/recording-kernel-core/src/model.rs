use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

use crate::RegistryError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ResourceId(pub Ulid);

impl ResourceId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// The nil id stands in for the "no resource" placeholder; operations
    /// that require a real resource reject it up front.
    #[must_use]
    pub fn placeholder() -> Self {
        Self(Ulid::nil())
    }

    #[must_use]
    pub fn is_placeholder(self) -> bool {
        self.0.is_nil()
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RecordingActId(pub Ulid);

impl RecordingActId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    #[must_use]
    pub fn placeholder() -> Self {
        Self(Ulid::nil())
    }

    #[must_use]
    pub fn is_placeholder(self) -> bool {
        self.0.is_nil()
    }
}

impl Default for RecordingActId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RecordingActId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DocumentId(pub Ulid);

impl DocumentId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for DocumentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BookEntryId(pub Ulid);

impl BookEntryId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for BookEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for BookEntryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TractItemId(pub Ulid);

impl TractItemId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TractItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TractItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared lifecycle for resources, recording acts, and tract items.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordableStatus {
    Incomplete,
    Pending,
    Registered,
    Closed,
    Deleted,
}

impl RecordableStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::Pending => "pending",
            Self::Registered => "registered",
            Self::Closed => "closed",
            Self::Deleted => "deleted",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "incomplete" => Some(Self::Incomplete),
            "pending" => Some(Self::Pending),
            "registered" => Some(Self::Registered),
            "closed" => Some(Self::Closed),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Deleted entries are retained for audit but excluded from the active
    /// tract.
    #[must_use]
    pub fn is_active(self) -> bool {
        self != Self::Deleted
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    RealEstate,
    Association,
    NoProperty,
}

impl ResourceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RealEstate => "real_estate",
            Self::Association => "association",
            Self::NoProperty => "no_property",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "real_estate" => Some(Self::RealEstate),
            "association" => Some(Self::Association),
            "no_property" => Some(Self::NoProperty),
            _ => None,
        }
    }

    #[must_use]
    pub fn uid_prefix(self) -> &'static str {
        match self {
            Self::RealEstate => "RE",
            Self::Association => "AS",
            Self::NoProperty => "NP",
        }
    }
}

/// Registry number of a resource. Assigned exactly once and never reused;
/// the prefix encodes the resource kind.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ResourceUid(pub String);

impl ResourceUid {
    #[must_use]
    pub fn issue(kind: ResourceKind) -> Self {
        Self(format!("{}-{}", kind.uid_prefix(), Ulid::new()))
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Display for ResourceUid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub uid: ResourceUid,
    pub kind: ResourceKind,
    pub status: RecordableStatus,
    pub partition_of: Option<ResourceId>,
    pub merged_into: Option<ResourceId>,
}

impl Resource {
    #[must_use]
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            id: ResourceId::new(),
            uid: ResourceUid::issue(kind),
            kind,
            status: RecordableStatus::Pending,
            partition_of: None,
            merged_into: None,
        }
    }

    #[must_use]
    pub fn new_partition(parent: &Resource) -> Self {
        let mut partition = Self::new(parent.kind);
        partition.partition_of = Some(parent.id);
        partition
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.id.is_placeholder() || self.uid.is_placeholder()
    }

    /// A merged resource is permanently inactive for new acts.
    #[must_use]
    pub fn is_merged(&self) -> bool {
        self.merged_into.is_some()
    }

    #[must_use]
    pub fn accepts_new_acts(&self) -> bool {
        !self.is_merged()
            && !matches!(self.status, RecordableStatus::Closed | RecordableStatus::Deleted)
    }
}

/// Closed taxonomy of recording act kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordingActKind {
    Domain,
    Limitation,
    Information,
    Cancelation,
    Modification,
    Structure,
    Association,
    Document,
    Transaction,
}

impl RecordingActKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Limitation => "limitation",
            Self::Information => "information",
            Self::Cancelation => "cancelation",
            Self::Modification => "modification",
            Self::Structure => "structure",
            Self::Association => "association",
            Self::Document => "document",
            Self::Transaction => "transaction",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "domain" => Some(Self::Domain),
            "limitation" => Some(Self::Limitation),
            "information" => Some(Self::Information),
            "cancelation" => Some(Self::Cancelation),
            "modification" => Some(Self::Modification),
            "structure" => Some(Self::Structure),
            "association" => Some(Self::Association),
            "document" => Some(Self::Document),
            "transaction" => Some(Self::Transaction),
            _ => None,
        }
    }
}

/// How a tract item affects the existence or structure of its resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TractRole {
    Created,
    PartitionOf,
    DivisionOf,
    Split,
    Extended,
    MergedInto,
    Edited,
    Informative,
    Canceled,
}

impl TractRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::PartitionOf => "partition_of",
            Self::DivisionOf => "division_of",
            Self::Split => "split",
            Self::Extended => "extended",
            Self::MergedInto => "merged_into",
            Self::Edited => "edited",
            Self::Informative => "informative",
            Self::Canceled => "canceled",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "partition_of" => Some(Self::PartitionOf),
            "division_of" => Some(Self::DivisionOf),
            "split" => Some(Self::Split),
            "extended" => Some(Self::Extended),
            "merged_into" => Some(Self::MergedInto),
            "edited" => Some(Self::Edited),
            "informative" => Some(Self::Informative),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Creational roles bring a resource into legal existence and are only
    /// legal as the very first chronological tract item.
    #[must_use]
    pub fn is_creational(self) -> bool {
        matches!(self, Self::Created | Self::PartitionOf | Self::DivisionOf | Self::Extended)
    }

    /// Structural roles reshape the resource without creating it: the parent
    /// side of a split or a merger.
    #[must_use]
    pub fn is_structural(self) -> bool {
        matches!(self, Self::Split | Self::MergedInto)
    }
}

/// Authority under which a tract item or act may be deleted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeleteAuthority {
    Standard,
    /// Deleting out of Closed is an administrative act and additionally
    /// requires the owning document to have been reopened first.
    AdministrativeOverride { document_reopened: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RecordingAct {
    pub id: RecordingActId,
    pub kind: RecordingActKind,
    pub status: RecordableStatus,
    /// 1-based position inside the owning document; 0 until appended.
    pub index: u32,
    pub document_id: DocumentId,
    pub book_entry: Option<BookEntryId>,
    pub amendment_of: Option<RecordingActId>,
    pub amended_by: Option<RecordingActId>,
    pub cancels: Option<RecordingActId>,
    pub recorded_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

impl RecordingAct {
    #[must_use]
    pub fn new(
        kind: RecordingActKind,
        document_id: DocumentId,
        recorded_by: impl Into<String>,
        recorded_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: RecordingActId::new(),
            kind,
            status: RecordableStatus::Pending,
            index: 0,
            document_id,
            book_entry: None,
            amendment_of: None,
            amended_by: None,
            cancels: None,
            recorded_by: recorded_by.into(),
            recorded_at,
        }
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.id.is_placeholder()
    }

    /// Move a captured draft into the recordable lifecycle.
    ///
    /// # Errors
    /// Returns [`RegistryError::RuleViolation`] unless the act is Incomplete.
    pub fn complete(&mut self) -> Result<(), RegistryError> {
        if self.status != RecordableStatus::Incomplete {
            return Err(RegistryError::RuleViolation(format!(
                "act {} cannot be completed from status {}",
                self.id,
                self.status.as_str()
            )));
        }
        self.status = RecordableStatus::Pending;
        Ok(())
    }

    /// Pending -> Registered.
    ///
    /// # Errors
    /// Returns [`RegistryError::RuleViolation`] for any other starting status.
    pub fn register(&mut self) -> Result<(), RegistryError> {
        if self.status != RecordableStatus::Pending {
            return Err(RegistryError::RuleViolation(format!(
                "act {} cannot be registered from status {}",
                self.id,
                self.status.as_str()
            )));
        }
        self.status = RecordableStatus::Registered;
        Ok(())
    }

    /// Registered -> Closed.
    ///
    /// # Errors
    /// Returns [`RegistryError::RuleViolation`] for any other starting status.
    pub fn close(&mut self) -> Result<(), RegistryError> {
        if self.status != RecordableStatus::Registered {
            return Err(RegistryError::RuleViolation(format!(
                "act {} cannot be closed from status {}",
                self.id,
                self.status.as_str()
            )));
        }
        self.status = RecordableStatus::Closed;
        Ok(())
    }

    /// Soft-delete the act. Deleted is terminal and reachable from any
    /// non-Closed status; leaving Closed takes an administrative override on
    /// a reopened document.
    ///
    /// # Errors
    /// Returns [`RegistryError::RuleViolation`] when the act is Closed and
    /// the authority is insufficient.
    pub fn mark_deleted(&mut self, authority: DeleteAuthority) -> Result<(), RegistryError> {
        match self.status {
            RecordableStatus::Deleted => Ok(()),
            RecordableStatus::Closed => match authority {
                DeleteAuthority::AdministrativeOverride { document_reopened: true } => {
                    self.status = RecordableStatus::Deleted;
                    Ok(())
                }
                DeleteAuthority::AdministrativeOverride { document_reopened: false } => {
                    Err(RegistryError::RuleViolation(format!(
                        "act {} is closed; reopen the owning document before deleting it",
                        self.id
                    )))
                }
                DeleteAuthority::Standard => Err(RegistryError::RuleViolation(format!(
                    "act {} is closed and may only be deleted under administrative override",
                    self.id
                ))),
            },
            _ => {
                self.status = RecordableStatus::Deleted;
                Ok(())
            }
        }
    }
}

/// The recording document owning a run of acts, as seen by this core: the
/// presentation time used for prelation, the closed flag, and the 1-based act
/// order. Everything else about documents belongs to the transaction layer.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RecordingDocument {
    pub id: DocumentId,
    pub transaction_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub presentation_time: OffsetDateTime,
    pub is_closed: bool,
    pub acts: Vec<RecordingActId>,
}

impl RecordingDocument {
    #[must_use]
    pub fn new(transaction_id: impl Into<String>, presentation_time: OffsetDateTime) -> Self {
        Self {
            id: DocumentId::new(),
            transaction_id: transaction_id.into(),
            presentation_time,
            is_closed: false,
            acts: Vec::new(),
        }
    }

    #[must_use]
    pub fn next_index(&self) -> u32 {
        u32::try_from(self.acts.len()).unwrap_or(u32::MAX).saturating_add(1)
    }

    #[must_use]
    pub fn contains_act(&self, act_id: RecordingActId) -> bool {
        self.acts.contains(&act_id)
    }

    pub fn close(&mut self) {
        self.is_closed = true;
    }

    pub fn reopen(&mut self) {
        self.is_closed = false;
    }
}

/// Opaque handle to a physical book entry; used only as an ownership marker
/// on historically captured acts.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct BookEntry {
    pub id: BookEntryId,
    pub volume: String,
    pub entry_no: u32,
}

impl BookEntry {
    #[must_use]
    pub fn new(volume: impl Into<String>, entry_no: u32) -> Self {
        Self { id: BookEntryId::new(), volume: volume.into(), entry_no }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
    }

    fn fixture_act() -> RecordingAct {
        RecordingAct::new(RecordingActKind::Domain, DocumentId::new(), "clerk", fixture_time())
    }

    // Test IDs: TMDL-001
    #[test]
    fn resource_uid_prefix_follows_kind() {
        let re = ResourceUid::issue(ResourceKind::RealEstate);
        let assoc = ResourceUid::issue(ResourceKind::Association);
        let nop = ResourceUid::issue(ResourceKind::NoProperty);
        assert!(re.0.starts_with("RE-"));
        assert!(assoc.0.starts_with("AS-"));
        assert!(nop.0.starts_with("NP-"));
    }

    // Test IDs: TMDL-002
    #[test]
    fn merged_resource_refuses_new_acts() {
        let parent = Resource::new(ResourceKind::RealEstate);
        let mut merged = Resource::new(ResourceKind::RealEstate);
        merged.merged_into = Some(parent.id);
        assert!(!merged.accepts_new_acts());
        assert!(parent.accepts_new_acts());
    }

    // Test IDs: TMDL-003
    #[test]
    fn act_lifecycle_walks_pending_registered_closed() {
        let mut act = fixture_act();
        assert_eq!(act.status, RecordableStatus::Pending);
        if let Err(err) = act.register() {
            panic!("register should succeed: {err}");
        }
        if let Err(err) = act.close() {
            panic!("close should succeed: {err}");
        }
        assert_eq!(act.status, RecordableStatus::Closed);
    }

    // Test IDs: TMDL-004
    #[test]
    fn act_cannot_skip_registered() {
        let mut act = fixture_act();
        let err = match act.close() {
            Ok(()) => panic!("closing a pending act should fail"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("cannot be closed"));
    }

    // Test IDs: TMDL-005
    #[test]
    fn closed_act_deletion_requires_override_on_reopened_document() {
        let mut act = fixture_act();
        if let Err(err) = act.register() {
            panic!("register should succeed: {err}");
        }
        if let Err(err) = act.close() {
            panic!("close should succeed: {err}");
        }

        if act.mark_deleted(DeleteAuthority::Standard).is_ok() {
            panic!("standard deletion of a closed act should fail");
        }
        if act
            .mark_deleted(DeleteAuthority::AdministrativeOverride { document_reopened: false })
            .is_ok()
        {
            panic!("override without a reopened document should fail");
        }
        if let Err(err) =
            act.mark_deleted(DeleteAuthority::AdministrativeOverride { document_reopened: true })
        {
            panic!("override on a reopened document should succeed: {err}");
        }
        assert_eq!(act.status, RecordableStatus::Deleted);
    }

    // Test IDs: TMDL-006
    #[test]
    fn deletion_is_idempotent_on_acts() {
        let mut act = fixture_act();
        if let Err(err) = act.mark_deleted(DeleteAuthority::Standard) {
            panic!("first deletion should succeed: {err}");
        }
        if let Err(err) = act.mark_deleted(DeleteAuthority::Standard) {
            panic!("second deletion should be idempotent: {err}");
        }
        assert_eq!(act.status, RecordableStatus::Deleted);
    }

    // Test IDs: TMDL-007
    #[test]
    fn creational_roles_are_the_expected_subset() {
        let creational: Vec<TractRole> = [
            TractRole::Created,
            TractRole::PartitionOf,
            TractRole::DivisionOf,
            TractRole::Split,
            TractRole::Extended,
            TractRole::MergedInto,
            TractRole::Edited,
            TractRole::Informative,
            TractRole::Canceled,
        ]
        .into_iter()
        .filter(|role| role.is_creational())
        .collect();
        assert_eq!(
            creational,
            vec![
                TractRole::Created,
                TractRole::PartitionOf,
                TractRole::DivisionOf,
                TractRole::Extended
            ]
        );
    }

    // Test IDs: TMDL-008
    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            RecordableStatus::Incomplete,
            RecordableStatus::Pending,
            RecordableStatus::Registered,
            RecordableStatus::Closed,
            RecordableStatus::Deleted,
        ] {
            assert_eq!(RecordableStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RecordableStatus::parse("archived"), None);
    }
}
