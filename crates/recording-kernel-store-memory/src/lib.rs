use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use recording_kernel_core::{
    RegistryError, RegistryLedger, Resource, ResourceId, TractGateway, TractIndexItem,
    TractSnapshot,
};

/// In-memory reference implementation of the persistence gateway: the tract
/// store a deployment would back with its registry database. Mutations are
/// transactional (all-or-nothing against a scratch copy) and serialized per
/// resource through an optimistic tract-version counter.
#[derive(Debug, Default)]
pub struct MemoryStore {
    ledger: RegistryLedger,
    tract_versions: BTreeMap<ResourceId, u64>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn ledger(&self) -> &RegistryLedger {
        &self.ledger
    }

    /// Current tract version of a resource; starts at 0 for unseen ids.
    #[must_use]
    pub fn tract_version(&self, resource: ResourceId) -> u64 {
        self.tract_versions.get(&resource).copied().unwrap_or(0)
    }

    /// Run one mutating operation inside a transactional boundary. When a
    /// `(resource, expected_version)` guard is given, the write is rejected
    /// if another writer has advanced that resource's tract since the caller
    /// loaded it (compare-and-swap); on success the version is bumped.
    ///
    /// The operation runs against a scratch copy of the ledger: an error
    /// leaves the store untouched.
    ///
    /// # Errors
    /// Returns the stale-version conflict, or whatever the operation itself
    /// failed with.
    pub fn mutate<T>(
        &mut self,
        guard: Option<(ResourceId, u64)>,
        op: impl FnOnce(&mut RegistryLedger) -> Result<T, RegistryError>,
    ) -> Result<T> {
        if let Some((resource, expected)) = guard {
            let current = self.tract_version(resource);
            if current != expected {
                return Err(anyhow!(
                    "stale tract version for resource {resource}: expected {expected}, found \
                     {current}; reload the tract and retry"
                ));
            }
        }

        let mut scratch = self.ledger.clone();
        let value = op(&mut scratch).map_err(anyhow::Error::new)?;
        self.ledger = scratch;
        if let Some((resource, _)) = guard {
            *self.tract_versions.entry(resource).or_insert(0) += 1;
        }
        Ok(value)
    }
}

impl TractGateway for MemoryStore {
    fn load_tract(&self, resource_id: ResourceId) -> Result<TractSnapshot, RegistryError> {
        self.ledger.tract(resource_id)
    }

    fn save_resource(&mut self, resource: &Resource) -> Result<(), RegistryError> {
        self.ledger.upsert_resource(resource.clone());
        Ok(())
    }

    fn save_recording_act(
        &mut self,
        act: &recording_kernel_core::RecordingAct,
    ) -> Result<(), RegistryError> {
        self.ledger.upsert_act(act.clone());
        Ok(())
    }

    fn save_tract_item(
        &mut self,
        item: &TractIndexItem,
        resource: &Resource,
    ) -> Result<(), RegistryError> {
        if item.resource_id != resource.id {
            return Err(RegistryError::Precondition(format!(
                "tract item {} belongs to resource {}, not {}",
                item.id, item.resource_id, resource.id
            )));
        }
        // The resource lands first: its creation must never be observable
        // without the tract entry that brought it into existence.
        if self.ledger.resource(resource.id).is_err() {
            self.ledger.upsert_resource(resource.clone());
        }
        self.ledger.upsert_item(item.clone());
        *self.tract_versions.entry(resource.id).or_insert(0) += 1;
        Ok(())
    }
}
