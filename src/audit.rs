//! Audit trail of resolution results.
//!
//! Every [`MappingResult`] the resolver produces can be appended to an
//! [`AuditSink`]. Records carry a blake3 fingerprint of the submitted
//! candidate so repeated submissions of the same extraction can be
//! correlated.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::mapping::MappingResult;
use crate::storage::StorageError;
use crate::TARGET_STORE;

/// One audited resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the log, starting at 1.
    pub sequence: u64,
    /// Fingerprint of the submitted candidate.
    pub fingerprint: String,
    /// When the record was appended.
    pub recorded_at: DateTime<Utc>,
    /// The audited result, unchanged.
    pub result: MappingResult,
}

impl AuditRecord {
    fn new(sequence: u64, result: &MappingResult) -> Self {
        Self {
            sequence,
            fingerprint: result.original_entity.fingerprint(),
            recorded_at: Utc::now(),
            result: result.clone(),
        }
    }
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    /// Appends a result, returning the sequence number it was given.
    ///
    /// # Errors
    /// - `Unavailable` if the sink cannot be written
    /// - `SerializationError` if the record cannot be encoded
    fn record(&self, result: &MappingResult) -> Result<u64, StorageError>;
}

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// In-memory audit log, mostly for tests and short-lived batch jobs.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in append order.
    pub fn records(&self) -> Result<Vec<AuditRecord>, StorageError> {
        Ok(self
            .records
            .read()
            .map_err(|_| lock_err("audit.records"))?
            .clone())
    }

    /// Records whose candidate had the given fingerprint.
    pub fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Vec<AuditRecord>, StorageError> {
        Ok(self
            .records
            .read()
            .map_err(|_| lock_err("audit.find"))?
            .iter()
            .filter(|r| r.fingerprint == fingerprint)
            .cloned()
            .collect())
    }

    /// Number of records.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.records.read().map_err(|_| lock_err("audit.len"))?.len())
    }

    /// True if nothing was recorded.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, result: &MappingResult) -> Result<u64, StorageError> {
        let mut records = self.records.write().map_err(|_| lock_err("audit.record"))?;
        let sequence = records.len() as u64 + 1;
        records.push(AuditRecord::new(sequence, result));
        Ok(sequence)
    }
}

struct JsonLinesWriter {
    file: BufWriter<File>,
    sequence: u64,
}

/// Append-only audit log with one JSON record per line.
pub struct JsonLinesAuditLog {
    path: PathBuf,
    writer: Mutex<JsonLinesWriter>,
}

impl std::fmt::Debug for JsonLinesAuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesAuditLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl JsonLinesAuditLog {
    /// Opens or creates a log; numbering continues after existing records.
    ///
    /// A final line left half-written by a crash is cut off so appends can
    /// resume.
    ///
    /// # Errors
    /// - `Unavailable` if the file cannot be opened, read or repaired
    /// - `SerializationError` if a record before the last one does not parse
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let scan = match fs::read(&path) {
            Ok(bytes) => scan(&String::from_utf8_lossy(&bytes))?,
            Err(e) if e.kind() == ErrorKind::NotFound => Scan::default(),
            Err(e) => return Err(unavailable("failed to read audit log", &e)),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| unavailable("failed to open audit log", &e))?;

        if let Some(torn) = &scan.torn {
            warn!(
                target: TARGET_STORE,
                path = %path.display(),
                line = torn.line,
                dropped_bytes = torn.dropped,
                "truncating torn audit log tail"
            );
            file.set_len(scan.valid_len)
                .map_err(|e| unavailable("failed to truncate audit log", &e))?;
        }
        if scan.needs_newline {
            file.write_all(b"\n")
                .map_err(|e| unavailable("failed to repair audit log", &e))?;
        }

        Ok(Self {
            path,
            writer: Mutex::new(JsonLinesWriter {
                file: BufWriter::new(file),
                sequence: scan.records.last().map_or(0, |r| r.sequence),
            }),
        })
    }

    /// The log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every record in a log file. Blank lines are skipped, as is a
    /// half-written final line.
    ///
    /// # Errors
    /// - `Unavailable` if the file cannot be read
    /// - `SerializationError` naming the first earlier line that does not parse
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<AuditRecord>, StorageError> {
        let bytes = fs::read(path.as_ref()).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::Unavailable(format!(
                "audit log {} does not exist",
                path.as_ref().display()
            )),
            _ => unavailable("failed to read audit log", &e),
        })?;
        Ok(scan(&String::from_utf8_lossy(&bytes))?.records)
    }
}

fn unavailable(context: &str, err: &std::io::Error) -> StorageError {
    StorageError::Unavailable(format!("{context}: {err}"))
}

/// A final line that did not parse. Only that line can hold a torn
/// multi-byte character, so lossy decoding keeps earlier offsets exact.
#[derive(Debug, Clone, Copy)]
struct TornTail {
    line: usize,
    dropped: usize,
}

#[derive(Debug, Default)]
struct Scan {
    records: Vec<AuditRecord>,
    /// Bytes to keep: everything before a torn final line.
    valid_len: u64,
    torn: Option<TornTail>,
    /// The kept content does not end in a newline.
    needs_newline: bool,
}

fn scan(content: &str) -> Result<Scan, StorageError> {
    let mut scan = Scan::default();
    let mut kept = content.len();
    let mut offset = 0usize;

    for (index, line) in content.split_inclusive('\n').enumerate() {
        let start = offset;
        offset += line.len();
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditRecord>(line.trim()) {
            Ok(record) => scan.records.push(record),
            Err(_) if content[offset..].trim().is_empty() => {
                kept = start;
                scan.torn = Some(TornTail {
                    line: index + 1,
                    dropped: content.len() - start,
                });
                break;
            }
            Err(e) => {
                return Err(StorageError::SerializationError(format!(
                    "audit log line {}: {e}",
                    index + 1
                )));
            }
        }
    }

    scan.valid_len = kept as u64;
    scan.needs_newline = kept > 0 && !content[..kept].ends_with('\n');
    Ok(scan)
}

impl AuditSink for JsonLinesAuditLog {
    fn record(&self, result: &MappingResult) -> Result<u64, StorageError> {
        let mut writer = self.writer.lock().map_err(|_| lock_err("audit.writer"))?;
        let sequence = writer.sequence + 1;
        let line = serde_json::to_string(&AuditRecord::new(sequence, result))
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        writeln!(writer.file, "{line}")
            .and_then(|()| writer.file.flush())
            .map_err(|e| StorageError::Unavailable(format!("failed to write audit log: {e}")))?;

        writer.sequence = sequence;
        Ok(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{CandidateEntity, EntityId};
    use crate::mapping::ResolutionOutcome;
    use tempfile::tempdir;

    fn matched(name: &str) -> MappingResult {
        MappingResult::matched(
            CandidateEntity::company(name),
            EntityId::from("E1"),
            "Acme Corp",
            0.92,
            ResolutionOutcome::NoOp,
        )
    }

    #[test]
    fn test_memory_log_numbers_and_fingerprints() {
        let log = MemoryAuditLog::new();
        assert_eq!(log.record(&matched("Acme Corp")).unwrap(), 1);
        assert_eq!(log.record(&matched("ACME")).unwrap(), 2);
        assert_eq!(log.record(&matched("Acme Corp")).unwrap(), 3);

        let fingerprint = CandidateEntity::company("Acme Corp").fingerprint();
        let repeats = log.find_by_fingerprint(&fingerprint).unwrap();
        assert_eq!(repeats.len(), 2);
        assert_eq!(repeats[1].sequence, 3);
    }

    #[test]
    fn test_json_lines_log_round_trips_and_resumes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let first = matched("Acme Corp");
        {
            let log = JsonLinesAuditLog::open(&path).unwrap();
            log.record(&first).unwrap();
            log.record(&MappingResult::no_match(CandidateEntity::company("Zephyr Lines")))
                .unwrap();
        }

        let log = JsonLinesAuditLog::open(&path).unwrap();
        assert_eq!(log.record(&matched("ACME")).unwrap(), 3);

        let records = JsonLinesAuditLog::read_all(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].result, first);
        assert_eq!(records[1].result.outcome, ResolutionOutcome::NoMatch);
    }

    #[test]
    fn test_read_all_reports_bad_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let log = JsonLinesAuditLog::open(&path).unwrap();
            log.record(&matched("Acme Corp")).unwrap();
        }
        let good = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, format!("{{\"sequence\":1}}\n{good}")).unwrap();

        let err = JsonLinesAuditLog::read_all(&path).unwrap_err();
        assert!(err.to_string().contains("line 1"));
        assert!(matches!(
            JsonLinesAuditLog::open(&path),
            Err(StorageError::SerializationError(_))
        ));
    }

    #[test]
    fn test_torn_final_line_is_truncated_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let log = JsonLinesAuditLog::open(&path).unwrap();
            log.record(&matched("Acme Corp")).unwrap();
        }
        let intact = std::fs::metadata(&path).unwrap().len();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"sequence":2,"finger"#).unwrap();
        drop(file);
        assert_eq!(JsonLinesAuditLog::read_all(&path).unwrap().len(), 1);

        let log = JsonLinesAuditLog::open(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), intact);
        assert_eq!(log.record(&matched("ACME")).unwrap(), 2);
        drop(log);

        let records = JsonLinesAuditLog::read_all(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].sequence, 2);
        assert_eq!(records[1].result.original_entity.name, "ACME");
    }

    #[test]
    fn test_complete_record_without_newline_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let log = JsonLinesAuditLog::open(&path).unwrap();
            log.record(&matched("Acme Corp")).unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.trim_end()).unwrap();

        let log = JsonLinesAuditLog::open(&path).unwrap();
        assert_eq!(log.record(&matched("ACME")).unwrap(), 2);
        drop(log);
        assert_eq!(JsonLinesAuditLog::read_all(&path).unwrap().len(), 2);
    }
}
