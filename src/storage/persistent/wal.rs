//! Write-ahead log.
//!
//! Every committed [`StoreEvent`] is appended (and by default fsynced) before
//! it becomes visible in memory. On open the log is scanned; a torn or corrupt
//! tail left by a crash is cut off so later appends stay readable.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-framed WalEntry]
//! [ENTRY 2: codec-framed WalEntry]
//! ...
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::StoreEvent;
use crate::TARGET_STORE;

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The committed change.
    pub event: StoreEvent,
}

/// Borrowing twin of [`WalEntry`], so appends need not clone the event.
#[derive(Serialize)]
struct WalEntryRef<'a> {
    sequence: u64,
    timestamp: DateTime<Utc>,
    event: &'a StoreEvent,
}

struct WalWriter {
    file: BufWriter<File>,
    sequence: u64,
}

/// Write-ahead log. Thread-safe via an internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("path", &self.path)
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned lock: wal.writer")
}

impl WriteAheadLog {
    /// Opens or creates a log file.
    ///
    /// An existing file is scanned to find the last sequence number; any
    /// unreadable tail is truncated away.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let is_new = !path.exists() || std::fs::metadata(path)?.len() == 0;

        let sequence = if is_new {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            file.sync_all()?;
            0
        } else {
            Self::recover(path)?
        };

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                file: BufWriter::new(file),
                sequence,
            }),
            sync_on_write,
        })
    }

    /// Scans the log, cutting it after the last intact entry.
    fn recover(path: &Path) -> IoResult<u64> {
        let mut last_sequence = 0;
        let mut valid_end = codec::HEADER_LEN;
        let mut entries = WalIterator::new(path)?;

        loop {
            match entries.next() {
                None => break,
                Some(Ok(entry)) => {
                    last_sequence = entry.sequence;
                    valid_end = entries.position()?;
                }
                Some(Err(e)) => {
                    warn!(
                        target: TARGET_STORE,
                        path = %path.display(),
                        after_sequence = last_sequence,
                        error = %e,
                        "discarding unreadable WAL tail"
                    );
                    break;
                }
            }
        }

        let file = OpenOptions::new().write(true).open(path)?;
        if file.metadata()?.len() > valid_end {
            file.set_len(valid_end)?;
            file.sync_all()?;
        }
        Ok(last_sequence)
    }

    fn lock(&self) -> IoResult<MutexGuard<'_, WalWriter>> {
        self.writer.lock().map_err(|_| poisoned())
    }

    /// Appends an event, returning the sequence number assigned to it.
    pub fn append(&self, event: &StoreEvent) -> IoResult<u64> {
        let mut writer = self.lock()?;
        let sequence = writer.sequence + 1;
        let encoded = codec::encode(&WalEntryRef {
            sequence,
            timestamp: Utc::now(),
            event,
        })?;

        writer.file.write_all(&encoded)?;
        writer.file.flush()?;
        if self.sync_on_write {
            writer.file.get_ref().sync_data()?;
        }

        writer.sequence = sequence;
        Ok(sequence)
    }

    /// Iterates over all entries from the start of the file.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Sequence number of the last appended entry.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.lock()?.sequence)
    }

    /// Raises the sequence counter so numbering continues past a snapshot.
    pub fn advance_to(&self, sequence: u64) -> IoResult<()> {
        let mut writer = self.lock()?;
        writer.sequence = writer.sequence.max(sequence);
        Ok(())
    }

    /// File size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Drops every entry, keeping the header. Sequence numbers keep counting.
    ///
    /// Only call this after a snapshot covering every entry is durable.
    pub fn truncate(&self) -> IoResult<()> {
        let mut writer = self.lock()?;
        writer.file.flush()?;
        let file = writer.file.get_ref();
        file.set_len(codec::HEADER_LEN)?;
        file.sync_all()
    }
}

/// Iterator over WAL entries.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let version = codec::read_header(&mut reader)?;
        if version != codec::CODEC_VERSION {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!("unsupported WAL version {version}"),
            ));
        }
        Ok(Self { reader, file_size })
    }

    fn position(&mut self) -> IoResult<u64> {
        self.reader.stream_position()
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }
        Some(codec::decode(&mut self.reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::entity::{Entity, EntityId, EntityType};

    fn put(name: &str) -> StoreEvent {
        StoreEvent::Put {
            entity: Entity::new(name, EntityType::Company),
        }
    }

    #[test]
    fn test_wal_append_and_iterate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entities.wal");

        let wal = WriteAheadLog::open(&path, false).unwrap();
        wal.append(&put("Acme Corp")).unwrap();
        wal.append(&StoreEvent::Merge {
            survivor: Entity::with_id("E1", "Acme Corp", EntityType::Company),
            absorbed: EntityId::from("E2"),
        })
        .unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 2);
        drop(wal);

        let wal = WriteAheadLog::open(&path, false).unwrap();
        let entries: Vec<WalEntry> = wal.iter().unwrap().map(Result::unwrap).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 1);
        assert!(matches!(entries[1].event, StoreEvent::Merge { .. }));
    }

    #[test]
    fn test_torn_tail_is_cut_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entities.wal");
        {
            let wal = WriteAheadLog::open(&path, true).unwrap();
            wal.append(&put("Acme Corp")).unwrap();
            wal.append(&put("Bennett Logistics")).unwrap();
        }

        // Simulate a crash halfway through the second record.
        let len = std::fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 7)
            .unwrap();

        let wal = WriteAheadLog::open(&path, true).unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 1);
        wal.append(&put("Zephyr Lines")).unwrap();

        let entries: Vec<WalEntry> = wal.iter().unwrap().map(Result::unwrap).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].sequence, 2);
    }

    #[test]
    fn test_truncate_keeps_numbering() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entities.wal");
        let wal = WriteAheadLog::open(&path, false).unwrap();
        wal.append(&put("Acme Corp")).unwrap();

        wal.truncate().unwrap();
        assert_eq!(wal.size_bytes().unwrap(), codec::HEADER_LEN);
        assert_eq!(wal.iter().unwrap().count(), 0);

        assert_eq!(wal.append(&put("Bennett Logistics")).unwrap(), 2);
    }
}
