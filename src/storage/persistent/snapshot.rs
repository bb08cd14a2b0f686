//! Compacted store snapshots.
//!
//! A snapshot holds the full store state up to a WAL sequence number. It is
//! written to a temporary file, fsynced, then renamed over the previous one,
//! so a crash leaves either the old or the new snapshot intact.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::StoreSnapshot;

use super::codec;

/// File name of the current snapshot inside a store directory.
pub const SNAPSHOT_FILE: &str = "entities.snapshot";

/// On-disk snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// Last WAL sequence number the snapshot covers.
    pub sequence: u64,
    /// When compaction wrote the file.
    pub written_at: DateTime<Utc>,
    /// Entities and merge redirects.
    pub store: StoreSnapshot,
}

fn write_synced(path: &Path, snapshot: &SnapshotFile) -> IoResult<()> {
    let file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let mut writer = BufWriter::new(file);
    codec::write_header(&mut writer)?;
    writer.write_all(&codec::encode(snapshot)?)?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

/// Atomically replaces the snapshot in `dir`.
pub fn write_snapshot(dir: &Path, snapshot: &SnapshotFile) -> IoResult<()> {
    let final_path = dir.join(SNAPSHOT_FILE);
    let temp_path = dir.join(format!("{SNAPSHOT_FILE}.tmp.{}", Uuid::new_v4()));

    let result = write_synced(&temp_path, snapshot).and_then(|()| fs::rename(&temp_path, &final_path));
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Reads the snapshot in `dir`, if one exists.
pub fn read_snapshot(dir: &Path) -> IoResult<Option<SnapshotFile>> {
    let file = match File::open(dir.join(SNAPSHOT_FILE)) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader)?;
    codec::decode(&mut reader).map(Some)
}

/// Removes temporary files left behind by an interrupted snapshot write.
pub fn remove_stale_temp_files(dir: &Path) -> IoResult<usize> {
    let prefix = format!("{SNAPSHOT_FILE}.tmp.");
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::entity::{Entity, EntityType};

    #[test]
    fn test_missing_snapshot_reads_as_none() {
        let dir = tempdir().unwrap();
        assert!(read_snapshot(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_write_replaces_previous_snapshot() {
        let dir = tempdir().unwrap();
        let mut snapshot = SnapshotFile {
            sequence: 3,
            written_at: Utc::now(),
            store: StoreSnapshot {
                entities: vec![Entity::with_id("E1", "Acme Corp", EntityType::Company)],
                ..StoreSnapshot::default()
            },
        };
        write_snapshot(dir.path(), &snapshot).unwrap();

        snapshot.sequence = 9;
        write_snapshot(dir.path(), &snapshot).unwrap();

        let read = read_snapshot(dir.path()).unwrap().unwrap();
        assert_eq!(read, snapshot);
        assert_eq!(remove_stale_temp_files(dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_stale_temp_files_are_removed() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(format!("{SNAPSHOT_FILE}.tmp.abc")), b"partial").unwrap();
        assert_eq!(remove_stale_temp_files(dir.path()).unwrap(), 1);
    }
}
