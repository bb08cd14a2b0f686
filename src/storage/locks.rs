//! Per-entity update scopes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::entity::EntityId;

use super::traits::StorageError;

/// One mutex per entity ID.
///
/// Holding an entity's slot grants exclusive update rights for that entity;
/// updates to different entities proceed in parallel. Callers needing two
/// slots must take them in ascending ID order.
#[derive(Debug, Default)]
pub(crate) struct EntityLocks {
    slots: Mutex<HashMap<EntityId, Arc<Mutex<()>>>>,
}

impl EntityLocks {
    /// Returns the slot for `id`, creating it on first use.
    pub(crate) fn slot(&self, id: &EntityId) -> Result<Arc<Mutex<()>>, StorageError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| StorageError::BackendError("poisoned lock: entity.locks".to_string()))?;
        Ok(Arc::clone(slots.entry(id.clone()).or_default()))
    }

    /// Drops the slot of an entity that no longer exists.
    pub(crate) fn forget(&self, id: &EntityId) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.remove(id);
        }
    }
}
