//! Abstract storage contract for canonical entities.
//!
//! The entity store is the only component allowed to mutate canonical
//! records. Backends must:
//! - serve reads from a consistent snapshot (a mutation committing after a
//!   read began is not visible to that read)
//! - serialize mutations per entity ID, applying each batch atomically
//! - reject a batch that would break a store invariant without applying any
//!   part of it

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::{Address, ContactInfo, Entity, EntityId, EntityType, NameChange};
use crate::resolution::blocking::BlockKey;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Entity not found.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// An alias would equal another entity's primary name (or the reverse).
    #[error("Alias conflict: '{alias}' is already a name of entity {owner}")]
    AliasConflict {
        /// The contested name.
        alias: String,
        /// The entity that already holds it.
        owner: EntityId,
    },

    /// The entity violates a structural invariant.
    #[error("Invalid entity: {0}")]
    InvalidEntity(String),

    /// The persistence collaborator cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// A single change to a canonical entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EntityMutation {
    /// Record an alternate name. Idempotent.
    AddAlias {
        /// Name to record.
        alias: String,
    },
    /// Append to the name-change history. A change between the same two
    /// names is recorded once.
    RecordNameChange {
        /// The observed change.
        change: NameChange,
    },
    /// Promote a new primary name; the old one becomes an alias.
    Rename {
        /// New primary name.
        name: String,
    },
    /// Set an open attribute.
    SetAttribute {
        /// Attribute key.
        key: String,
        /// Attribute value.
        value: serde_json::Value,
    },
    /// Replace the address.
    SetAddress {
        /// New address.
        address: Address,
    },
    /// Replace the contact information.
    SetContact {
        /// New contact details.
        contact: ContactInfo,
    },
}

impl EntityMutation {
    /// Applies the mutation to an entity copy.
    ///
    /// # Errors
    /// `InvalidEntity` if a recorded name change is malformed or a rename
    /// is blank.
    pub fn apply(&self, entity: &mut Entity) -> Result<(), StorageError> {
        match self {
            Self::AddAlias { alias } => {
                entity.add_alias(alias.as_str());
            }
            Self::RecordNameChange { change } => {
                change
                    .validate()
                    .map_err(|e| StorageError::InvalidEntity(e.to_string()))?;
                let already_recorded = entity.name_change_history.iter().any(|c| {
                    c.previous_name.eq_ignore_ascii_case(&change.previous_name)
                        && c.current_name.eq_ignore_ascii_case(&change.current_name)
                });
                if !already_recorded {
                    entity.record_name_change(change.clone());
                }
            }
            Self::Rename { name } => {
                if name.trim().is_empty() {
                    return Err(StorageError::InvalidEntity(
                        "primary name cannot be empty".to_string(),
                    ));
                }
                entity.rename(name.as_str());
            }
            Self::SetAttribute { key, value } => entity.set_attribute(key.as_str(), value.clone()),
            Self::SetAddress { address } => {
                if entity.address.as_ref() != Some(address) {
                    entity.address = Some(address.clone());
                    entity.touch();
                }
            }
            Self::SetContact { contact } => {
                if entity.contact.as_ref() != Some(contact) {
                    entity.contact = Some(contact.clone());
                    entity.touch();
                }
            }
        }
        Ok(())
    }
}

/// A committed change, as handed to a [`Journal`] before it becomes visible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    /// An entity was created or replaced by a mutation batch.
    Put {
        /// Full entity state after the change.
        entity: Entity,
    },
    /// `absorbed` was merged into `survivor` (post-merge state).
    Merge {
        /// Surviving entity after the merge.
        survivor: Entity,
        /// ID that now redirects to the survivor.
        absorbed: EntityId,
    },
}

/// Durability hook for a store.
///
/// `record` is called while the store's write lock is held, after every
/// invariant check passed and before the change is installed. An error
/// aborts the change: nothing becomes visible.
pub trait Journal: Send + Sync {
    /// Persist one event.
    fn record(&self, event: &StoreEvent) -> Result<(), StorageError>;
}

/// Storage trait for canonical entities.
pub trait EntityStore: Send + Sync {
    /// Register a new canonical entity. Returns its ID.
    ///
    /// # Errors
    /// `DuplicateKey` if the ID exists, `InvalidEntity` for a blank name or
    /// ID, `AliasConflict` if a name collides with another entity.
    fn create(&self, entity: Entity) -> Result<EntityId, StorageError>;

    /// Get an entity by ID. A merged-away ID returns the surviving entity.
    fn get(&self, id: &EntityId) -> Result<Option<Entity>, StorageError>;

    /// Entities of `entity_type` sharing at least one key, ordered by ID.
    fn find_block(
        &self,
        entity_type: EntityType,
        keys: &BTreeSet<BlockKey>,
    ) -> Result<Vec<Entity>, StorageError>;

    /// Apply a batch of mutations to one entity inside its exclusive update
    /// scope. Either every mutation is applied or none is.
    fn apply_mutation(
        &self,
        id: &EntityId,
        mutations: &[EntityMutation],
    ) -> Result<Entity, StorageError>;

    /// Merge `absorbed` into `survivor`, returning the merged entity.
    ///
    /// After a successful merge `get(absorbed)` returns the survivor.
    ///
    /// # Errors
    /// - `EntityNotFound` if either entity does not exist
    /// - `InvalidEntity` if both IDs resolve to the same entity or the types differ
    fn merge(&self, survivor: &EntityId, absorbed: &EntityId) -> Result<Entity, StorageError>;

    /// All canonical entities, ordered by ID.
    fn list(&self) -> Result<Vec<Entity>, StorageError>;
}
