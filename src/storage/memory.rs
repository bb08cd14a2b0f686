//! In-memory storage backend.
//!
//! This module provides a thread-safe in-memory implementation of
//! [`EntityStore`]. It is intended for embedded usage and tests, and it is the
//! index the persistent backend rebuilds on open.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::RwLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entity::{Entity, EntityId, EntityType};
use crate::resolution::blocking::{block_keys, BlockKey};
use crate::resolution::normalize::normalize_entity;
use crate::TARGET_STORE;

use super::locks::EntityLocks;
use super::traits::{EntityMutation, EntityStore, Journal, StorageError, StoreEvent};

/// How often a mutation re-resolves its target after losing a race with a merge.
const MAX_REDIRECT_RETRIES: usize = 8;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn normalize_key(s: &str) -> String {
    s.trim().to_lowercase()
}

fn remove_from<K: Eq + Hash>(map: &mut HashMap<K, BTreeSet<EntityId>>, key: &K, id: &EntityId) {
    if let Some(set) = map.get_mut(key) {
        set.remove(id);
        if set.is_empty() {
            map.remove(key);
        }
    }
}

fn other_owner(
    map: &HashMap<String, BTreeSet<EntityId>>,
    key: &str,
    id: &EntityId,
) -> Option<EntityId> {
    map.get(key)?.iter().find(|owner| *owner != id).cloned()
}

fn next_version(version: u64) -> Result<u64, StorageError> {
    version
        .checked_add(1)
        .ok_or_else(|| StorageError::BackendError("entity version overflow".to_string()))
}

/// Folds `absorbed` into `survivor`. The survivor wins every conflict.
fn absorb(survivor: &mut Entity, absorbed: &Entity) -> Result<(), StorageError> {
    let base_version = survivor.version;

    for name in absorbed.all_names() {
        survivor.add_alias(name);
    }
    for (key, value) in &absorbed.attributes {
        survivor
            .attributes
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
    if survivor.address.is_none() {
        survivor.address.clone_from(&absorbed.address);
    }
    if survivor.contact.is_none() {
        survivor.contact.clone_from(&absorbed.contact);
    }

    survivor
        .name_change_history
        .extend(absorbed.name_change_history.iter().cloned());
    survivor.name_change_history.sort_by_key(|c| c.recorded_at);

    survivor.created_at = survivor.created_at.min(absorbed.created_at);
    survivor.updated_at = Utc::now();
    survivor.version = next_version(base_version)?;
    Ok(())
}

/// Point-in-time copy of a store's contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Every canonical entity, ordered by ID.
    pub entities: Vec<Entity>,
    /// Merged-away ID mapped to the ID it was merged into.
    #[serde(default)]
    pub redirects: BTreeMap<EntityId, EntityId>,
}

#[derive(Debug, Default)]
struct EntityState {
    by_id: BTreeMap<EntityId, Entity>,
    blocks: HashMap<(EntityType, BlockKey), BTreeSet<EntityId>>,
    by_primary: HashMap<String, BTreeSet<EntityId>>,
    by_alias: HashMap<String, BTreeSet<EntityId>>,
    merged_into: HashMap<EntityId, EntityId>,
}

impl EntityState {
    fn index(&mut self, entity: &Entity) {
        for key in block_keys(&normalize_entity(entity)) {
            self.blocks
                .entry((entity.entity_type, key))
                .or_default()
                .insert(entity.id.clone());
        }
        self.by_primary
            .entry(normalize_key(&entity.primary_name))
            .or_default()
            .insert(entity.id.clone());
        for alias in &entity.aliases {
            self.by_alias
                .entry(normalize_key(alias))
                .or_default()
                .insert(entity.id.clone());
        }
    }

    fn unindex(&mut self, entity: &Entity) {
        for key in block_keys(&normalize_entity(entity)) {
            remove_from(&mut self.blocks, &(entity.entity_type, key), &entity.id);
        }
        remove_from(&mut self.by_primary, &normalize_key(&entity.primary_name), &entity.id);
        for alias in &entity.aliases {
            remove_from(&mut self.by_alias, &normalize_key(alias), &entity.id);
        }
    }

    fn install(&mut self, entity: Entity) {
        if let Some(prev) = self.by_id.remove(&entity.id) {
            self.unindex(&prev);
        }
        self.index(&entity);
        self.by_id.insert(entity.id.clone(), entity);
    }

    fn install_merge(&mut self, survivor: Entity, absorbed: &EntityId) {
        if let Some(prev) = self.by_id.remove(absorbed) {
            self.unindex(&prev);
        }
        self.merged_into.insert(absorbed.clone(), survivor.id.clone());
        self.install(survivor);
    }

    fn canonical_id(&self, id: &EntityId) -> Result<EntityId, StorageError> {
        let mut current = id;
        for _ in 0..128 {
            let Some(next) = self.merged_into.get(current) else {
                return Ok(current.clone());
            };
            if next == current {
                return Err(StorageError::BackendError(
                    "entity merge map contains a self-cycle".to_string(),
                ));
            }
            current = next;
        }

        Err(StorageError::BackendError(
            "entity merge map resolution exceeded hop limit".to_string(),
        ))
    }

    /// Rejects `entity` if one of its names collides with another entity.
    fn check_names(&self, entity: &Entity) -> Result<(), StorageError> {
        for alias in &entity.aliases {
            if let Some(owner) = other_owner(&self.by_primary, &normalize_key(alias), &entity.id) {
                return Err(StorageError::AliasConflict {
                    alias: alias.clone(),
                    owner,
                });
            }
        }
        if let Some(owner) = other_owner(
            &self.by_alias,
            &normalize_key(&entity.primary_name),
            &entity.id,
        ) {
            return Err(StorageError::AliasConflict {
                alias: entity.primary_name.clone(),
                owner,
            });
        }
        Ok(())
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            entities: self.by_id.values().cloned().collect(),
            redirects: self
                .merged_into
                .iter()
                .map(|(from, to)| (from.clone(), to.clone()))
                .collect(),
        }
    }
}

/// Thread-safe in-memory entity store.
///
/// Reads clone out of a shared lock, so every read sees one consistent
/// state. Mutations of one entity are serialized by a per-entity update
/// scope; the shared write lock is held only to check store-wide invariants
/// and install the result.
#[derive(Default)]
pub struct InMemoryEntityStore {
    state: RwLock<EntityState>,
    locks: EntityLocks,
    journal: Option<Box<dyn Journal>>,
}

impl fmt::Debug for InMemoryEntityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryEntityStore")
            .field("journaled", &self.journal.is_some())
            .finish_non_exhaustive()
    }
}

impl InMemoryEntityStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that hands every change to `journal` before
    /// making it visible.
    #[must_use]
    pub fn with_journal(journal: Box<dyn Journal>) -> Self {
        Self {
            journal: Some(journal),
            ..Self::default()
        }
    }

    /// Number of canonical entities.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.state.read().map_err(|_| lock_err("entity.len"))?.by_id.len())
    }

    /// True if the store holds no entity.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Copies the current contents.
    pub fn snapshot(&self) -> Result<StoreSnapshot, StorageError> {
        Ok(self
            .state
            .read()
            .map_err(|_| lock_err("entity.snapshot"))?
            .snapshot())
    }

    /// Replaces the contents with `snapshot` without journaling.
    pub(crate) fn restore(&self, snapshot: StoreSnapshot) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.restore"))?;
        *state = EntityState::default();
        for entity in snapshot.entities {
            state.install(entity);
        }
        state.merged_into = snapshot.redirects.into_iter().collect();
        Ok(())
    }

    /// Re-applies a recorded event without checks or journaling.
    pub(crate) fn replay(&self, event: StoreEvent) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.replay"))?;
        match event {
            StoreEvent::Put { entity } => state.install(entity),
            StoreEvent::Merge { survivor, absorbed } => state.install_merge(survivor, &absorbed),
        }
        Ok(())
    }

    /// Runs `f` over a snapshot while holding off every writer.
    pub(crate) fn compact_with<F>(&self, f: F) -> Result<(), StorageError>
    where
        F: FnOnce(&StoreSnapshot) -> Result<(), StorageError>,
    {
        let state = self.state.read().map_err(|_| lock_err("entity.compact"))?;
        f(&state.snapshot())
    }

    fn record(&self, event: &StoreEvent) -> Result<(), StorageError> {
        match &self.journal {
            Some(journal) => journal.record(event),
            None => Ok(()),
        }
    }
}

impl EntityStore for InMemoryEntityStore {
    fn create(&self, mut entity: Entity) -> Result<EntityId, StorageError> {
        if entity.id.is_blank() {
            return Err(StorageError::InvalidEntity("entity id cannot be blank".to_string()));
        }
        if entity.primary_name.trim().is_empty() {
            return Err(StorageError::InvalidEntity(
                "primary name cannot be empty".to_string(),
            ));
        }
        entity
            .aliases
            .retain(|a| !a.trim().is_empty() && !a.eq_ignore_ascii_case(&entity.primary_name));

        let mut state = self.state.write().map_err(|_| lock_err("entity.create"))?;
        if state.by_id.contains_key(&entity.id) || state.merged_into.contains_key(&entity.id) {
            return Err(StorageError::DuplicateKey(entity.id.to_string()));
        }
        state.check_names(&entity)?;
        self.record(&StoreEvent::Put {
            entity: entity.clone(),
        })?;

        let id = entity.id.clone();
        debug!(target: TARGET_STORE, entity_id = %id, name = %entity.primary_name, "entity created");
        state.install(entity);
        Ok(id)
    }

    fn get(&self, id: &EntityId) -> Result<Option<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.get"))?;
        let canonical = state.canonical_id(id)?;
        Ok(state.by_id.get(&canonical).cloned())
    }

    fn find_block(
        &self,
        entity_type: EntityType,
        keys: &BTreeSet<BlockKey>,
    ) -> Result<Vec<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.find_block"))?;
        let ids: BTreeSet<&EntityId> = keys
            .iter()
            .filter_map(|key| state.blocks.get(&(entity_type, key.clone())))
            .flatten()
            .collect();

        Ok(ids
            .into_iter()
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect())
    }

    fn apply_mutation(
        &self,
        id: &EntityId,
        mutations: &[EntityMutation],
    ) -> Result<Entity, StorageError> {
        for _ in 0..MAX_REDIRECT_RETRIES {
            let canonical = self
                .state
                .read()
                .map_err(|_| lock_err("entity.apply_mutation"))?
                .canonical_id(id)?;

            let slot = self.locks.slot(&canonical)?;
            let _scope = slot.lock().map_err(|_| lock_err("entity.update_scope"))?;

            let current = {
                let state = self.state.read().map_err(|_| lock_err("entity.apply_mutation"))?;
                if state.canonical_id(id)? != canonical {
                    // Merged away while waiting for the scope.
                    continue;
                }
                state
                    .by_id
                    .get(&canonical)
                    .cloned()
                    .ok_or_else(|| StorageError::EntityNotFound(id.clone()))?
            };

            let mut next = current.clone();
            for mutation in mutations {
                mutation.apply(&mut next)?;
            }
            if next == current {
                return Ok(current);
            }
            next.version = next_version(current.version)?;

            let mut state = self.state.write().map_err(|_| lock_err("entity.apply_mutation"))?;
            state.check_names(&next)?;
            self.record(&StoreEvent::Put {
                entity: next.clone(),
            })?;
            state.install(next.clone());

            debug!(
                target: TARGET_STORE,
                entity_id = %canonical,
                version = next.version,
                mutations = mutations.len(),
                "entity updated"
            );
            return Ok(next);
        }

        Err(StorageError::BackendError(format!(
            "entity {id} was merged repeatedly during update"
        )))
    }

    fn merge(&self, survivor: &EntityId, absorbed: &EntityId) -> Result<Entity, StorageError> {
        let (keep, gone) = {
            let state = self.state.read().map_err(|_| lock_err("entity.merge"))?;
            (state.canonical_id(survivor)?, state.canonical_id(absorbed)?)
        };
        if keep == gone {
            return Err(StorageError::InvalidEntity(
                "cannot merge: both IDs resolve to the same canonical entity".to_string(),
            ));
        }

        let (first, second) = if keep < gone { (&keep, &gone) } else { (&gone, &keep) };
        let first_slot = self.locks.slot(first)?;
        let second_slot = self.locks.slot(second)?;
        let _first = first_slot.lock().map_err(|_| lock_err("entity.update_scope"))?;
        let _second = second_slot.lock().map_err(|_| lock_err("entity.update_scope"))?;

        let mut state = self.state.write().map_err(|_| lock_err("entity.merge"))?;
        if state.canonical_id(survivor)? != keep || state.canonical_id(absorbed)? != gone {
            return Err(StorageError::BackendError(
                "merge raced with another merge of the same entities".to_string(),
            ));
        }

        let mut merged = state
            .by_id
            .get(&keep)
            .cloned()
            .ok_or_else(|| StorageError::EntityNotFound(keep.clone()))?;
        let other = state
            .by_id
            .get(&gone)
            .cloned()
            .ok_or_else(|| StorageError::EntityNotFound(gone.clone()))?;
        if merged.entity_type != other.entity_type {
            return Err(StorageError::InvalidEntity(format!(
                "cannot merge a {} into a {}",
                other.entity_type, merged.entity_type
            )));
        }

        absorb(&mut merged, &other)?;
        self.record(&StoreEvent::Merge {
            survivor: merged.clone(),
            absorbed: gone.clone(),
        })?;
        state.install_merge(merged.clone(), &gone);
        drop(state);
        self.locks.forget(&gone);

        info!(target: TARGET_STORE, survivor = %keep, absorbed = %gone, "entities merged");
        Ok(merged)
    }

    fn list(&self) -> Result<Vec<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.list"))?;
        Ok(state.by_id.values().cloned().collect())
    }
}
