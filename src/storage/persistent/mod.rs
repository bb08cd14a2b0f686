//! Durable entity storage.
//!
//! A store directory holds:
//! - `store.lock`: exclusive lock, one process at a time
//! - `entities.wal`: CRC-checked write-ahead log of committed changes
//! - `entities.snapshot`: compacted state up to a WAL sequence number
//!
//! Every change is appended to the WAL before it becomes visible. Once the
//! WAL outgrows [`PersistentConfig::max_wal_size`] the state is written to a
//! fresh snapshot and the WAL is emptied.

mod codec;
mod file_lock;
mod snapshot;
mod store;
mod wal;

pub use file_lock::FileLock;
pub use snapshot::{SnapshotFile, SNAPSHOT_FILE};
pub use store::{CompactionResult, PersistentEntityStore};
pub use wal::{WalEntry, WriteAheadLog};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ResolveError, ValidationError};

/// Configuration for persistent storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// WAL size in bytes that triggers compaction.
    pub max_wal_size: u64,
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024,
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    /// Smallest accepted `max_wal_size`; below this compaction would run on
    /// nearly every write.
    pub const MIN_WAL_SIZE: u64 = 4 * 1024;

    /// Checks the configuration.
    ///
    /// # Errors
    /// `InvalidConfig` if `max_wal_size` is below [`Self::MIN_WAL_SIZE`].
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "max_wal_size must be at least {} bytes (got {})",
                    Self::MIN_WAL_SIZE,
                    self.max_wal_size
                ),
            });
        }
        Ok(self)
    }
}

/// Opens or creates a persistent entity store at `path`.
///
/// # Errors
/// - `Validation` for an invalid configuration
/// - `StoreUnavailable` if the path cannot be created or another process
///   holds the lock
/// - `Storage` if the snapshot is corrupt
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use entity_resolver::storage::persistent::open_store;
/// use entity_resolver::Resolver;
///
/// let store = open_store("./entities.db", None)?;
/// let resolver = Resolver::new(Arc::new(store));
/// ```
pub fn open_store(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentEntityStore, ResolveError> {
    let config = config.unwrap_or_default().validate()?;
    Ok(PersistentEntityStore::open(path.as_ref(), config)?)
}
