//! Durable entity store.
//!
//! Wraps an [`InMemoryEntityStore`] for reads and indexing, journals every
//! committed change to the WAL before it becomes visible, and compacts the WAL
//! into a snapshot once it outgrows the configured size.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::entity::{Entity, EntityId, EntityType};
use crate::resolution::blocking::BlockKey;
use crate::storage::{
    EntityMutation, EntityStore, InMemoryEntityStore, Journal, StorageError, StoreEvent,
};
use crate::TARGET_STORE;

use super::file_lock::FileLock;
use super::snapshot::{read_snapshot, remove_stale_temp_files, write_snapshot, SnapshotFile};
use super::wal::WriteAheadLog;
use super::PersistentConfig;

const WAL_FILE: &str = "entities.wal";

fn unavailable(context: &str, err: &io::Error) -> StorageError {
    StorageError::Unavailable(format!("{context}: {err}"))
}

/// Journal writing each event to the WAL.
struct WalJournal {
    wal: Arc<WriteAheadLog>,
}

impl Journal for WalJournal {
    fn record(&self, event: &StoreEvent) -> Result<(), StorageError> {
        self.wal
            .append(event)
            .map(|_| ())
            .map_err(|e| match e.kind() {
                io::ErrorKind::InvalidData => StorageError::SerializationError(e.to_string()),
                _ => unavailable("WAL append failed", &e),
            })
    }
}

/// Outcome of a compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// WAL sequence number the new snapshot covers.
    pub sequence: u64,
    /// Entities written to the snapshot.
    pub entities: usize,
    /// WAL bytes before compaction.
    pub wal_size_before: u64,
    /// WAL bytes after truncation (the header).
    pub wal_size_after: u64,
}

/// Entity store persisted to a directory.
///
/// The directory holds a lock file, the WAL, and at most one snapshot. Only
/// one process may open it at a time.
#[derive(Debug)]
pub struct PersistentEntityStore {
    dir: PathBuf,
    _lock: FileLock,
    wal: Arc<WriteAheadLog>,
    inner: InMemoryEntityStore,
    config: PersistentConfig,
}

impl PersistentEntityStore {
    /// Opens or creates a store: loads the snapshot, then replays the WAL
    /// entries written after it.
    ///
    /// # Errors
    /// - `Unavailable` if the directory cannot be created, is locked by
    ///   another process, or a file cannot be read
    /// - `SerializationError` if the snapshot is corrupt
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| unavailable("failed to create store directory", &e))?;
        let lock = FileLock::acquire(dir).map_err(|e| unavailable("failed to lock store", &e))?;

        let stale = remove_stale_temp_files(dir)
            .map_err(|e| unavailable("failed to clean store directory", &e))?;
        if stale > 0 {
            warn!(target: TARGET_STORE, removed = stale, "removed interrupted snapshot writes");
        }

        let snapshot = read_snapshot(dir).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                StorageError::SerializationError(format!("corrupt snapshot: {e}"))
            }
            _ => unavailable("failed to read snapshot", &e),
        })?;

        let wal = Arc::new(
            WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
                .map_err(|e| unavailable("failed to open WAL", &e))?,
        );
        let inner = InMemoryEntityStore::with_journal(Box::new(WalJournal {
            wal: Arc::clone(&wal),
        }));

        let mut covered = 0;
        if let Some(snapshot) = snapshot {
            covered = snapshot.sequence;
            inner.restore(snapshot.store)?;
        }

        let mut replayed = 0usize;
        for entry in wal.iter().map_err(|e| unavailable("failed to read WAL", &e))? {
            let entry = entry.map_err(|e| unavailable("failed to read WAL", &e))?;
            if entry.sequence <= covered {
                continue;
            }
            inner.replay(entry.event)?;
            replayed += 1;
        }
        wal.advance_to(covered)
            .map_err(|e| unavailable("failed to position WAL", &e))?;

        info!(
            target: TARGET_STORE,
            dir = %dir.display(),
            entities = inner.len()?,
            snapshot_sequence = covered,
            replayed,
            "entity store opened"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal,
            inner,
            config,
        })
    }

    /// The store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current WAL size in bytes.
    pub fn wal_size(&self) -> Result<u64, StorageError> {
        self.wal
            .size_bytes()
            .map_err(|e| unavailable("failed to stat WAL", &e))
    }

    /// Number of canonical entities.
    pub fn len(&self) -> Result<usize, StorageError> {
        self.inner.len()
    }

    /// True if the store holds no entity.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        self.inner.is_empty()
    }

    /// Writes a snapshot of the current state and empties the WAL.
    ///
    /// Writers are held off for the duration, so no committed change can fall
    /// between the snapshot and the truncation.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        let wal_size_before = self.wal_size()?;
        let mut result = None;

        self.inner.compact_with(|store| {
            let sequence = self
                .wal
                .current_sequence()
                .map_err(|e| unavailable("failed to read WAL position", &e))?;
            write_snapshot(
                &self.dir,
                &SnapshotFile {
                    sequence,
                    written_at: Utc::now(),
                    store: store.clone(),
                },
            )
            .map_err(|e| unavailable("failed to write snapshot", &e))?;
            self.wal
                .truncate()
                .map_err(|e| unavailable("failed to truncate WAL", &e))?;
            result = Some((sequence, store.entities.len()));
            Ok(())
        })?;

        let (sequence, entities) = result
            .ok_or_else(|| StorageError::BackendError("compaction did not run".to_string()))?;
        let compaction = CompactionResult {
            sequence,
            entities,
            wal_size_before,
            wal_size_after: self.wal_size()?,
        };
        info!(
            target: TARGET_STORE,
            sequence,
            entities,
            wal_size_before,
            "WAL compacted into snapshot"
        );
        Ok(compaction)
    }

    /// Compacts when the WAL has outgrown its limit. A failed compaction is
    /// logged; the committed write that triggered it stands.
    fn maybe_compact(&self) {
        match self.wal.size_bytes() {
            Ok(size) if size > self.config.max_wal_size => {
                if let Err(e) = self.compact() {
                    warn!(target: TARGET_STORE, error = %e, "WAL compaction failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(target: TARGET_STORE, error = %e, "failed to stat WAL"),
        }
    }
}

impl EntityStore for PersistentEntityStore {
    fn create(&self, entity: Entity) -> Result<EntityId, StorageError> {
        let id = self.inner.create(entity)?;
        self.maybe_compact();
        Ok(id)
    }

    fn get(&self, id: &EntityId) -> Result<Option<Entity>, StorageError> {
        self.inner.get(id)
    }

    fn find_block(
        &self,
        entity_type: EntityType,
        keys: &BTreeSet<BlockKey>,
    ) -> Result<Vec<Entity>, StorageError> {
        self.inner.find_block(entity_type, keys)
    }

    fn apply_mutation(
        &self,
        id: &EntityId,
        mutations: &[EntityMutation],
    ) -> Result<Entity, StorageError> {
        let entity = self.inner.apply_mutation(id, mutations)?;
        self.maybe_compact();
        Ok(entity)
    }

    fn merge(&self, survivor: &EntityId, absorbed: &EntityId) -> Result<Entity, StorageError> {
        let entity = self.inner.merge(survivor, absorbed)?;
        self.maybe_compact();
        Ok(entity)
    }

    fn list(&self) -> Result<Vec<Entity>, StorageError> {
        self.inner.list()
    }
}
