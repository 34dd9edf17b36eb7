//! Append-only event log storage
//!
//! Two backends share the [`EventLog`] trait:
//!
//! - [`MemoryEventLog`]: records kept in process memory
//! - [`JsonlEventLog`]: one JSON record per line in a per-service file
//!
//! [`LogStore`] hands out the right backend per service and rotates the
//! log of a resolved incident aside so the next incident starts clean.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::types::{LogEntry, LogRecord, Sequence};

/// Error type for event log operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record at {path}:{line}: {message}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Out-of-order record: expected seq {expected}, found {found}")]
    OutOfOrder { expected: Sequence, found: Sequence },
}

/// Result type for event log operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Ordered, append-only log of one incident's events
pub trait EventLog: Send + Sync {
    /// Append an entry, assigning it the next sequence number.
    fn append(&mut self, entry: LogEntry) -> StoreResult<LogRecord>;

    /// All records in sequence order.
    fn records(&self) -> StoreResult<Vec<LogRecord>>;

    /// Sequence number the next append will receive.
    fn next_seq(&self) -> Sequence;

    fn is_empty(&self) -> bool {
        self.next_seq() == 0
    }
}

/// In-memory event log
#[derive(Debug, Default, Clone)]
pub struct MemoryEventLog {
    records: Vec<LogRecord>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a log from previously recorded records.
    pub fn from_records(records: Vec<LogRecord>) -> StoreResult<Self> {
        check_order(&records)?;
        Ok(Self { records })
    }
}

impl EventLog for MemoryEventLog {
    fn append(&mut self, entry: LogEntry) -> StoreResult<LogRecord> {
        let record = LogRecord::new(self.next_seq(), entry);
        self.records.push(record.clone());
        Ok(record)
    }

    fn records(&self) -> StoreResult<Vec<LogRecord>> {
        Ok(self.records.clone())
    }

    fn next_seq(&self) -> Sequence {
        self.records.len() as Sequence
    }
}

/// File-backed event log, one JSON record per line
#[derive(Debug)]
pub struct JsonlEventLog {
    path: PathBuf,
    file: File,
    /// Bytes of whole records on disk
    len: u64,
    next_seq: Sequence,
}

impl JsonlEventLog {
    /// Open or create the log at `path`, validating existing records.
    ///
    /// A final line that does not parse is the remains of an append cut
    /// short by a crash. It was never applied, so it is cut off with a
    /// warning. Damage anywhere else is reported as [`StoreError::Corrupt`].
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let scan = if path.exists() {
            scan_records(&path)?
        } else {
            Scan::default()
        };
        check_order(&scan.records)?;

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if let Some(torn) = &scan.torn {
            warn!(
                path = %path.display(),
                line = torn.line,
                error = %torn.message,
                "Dropping torn record at end of event log"
            );
            file.set_len(scan.valid_len)?;
        }
        if scan.missing_newline {
            file.write_all(b"\n")?;
            file.flush()?;
        }
        let len = file.metadata()?.len();
        debug!(path = %path.display(), records = scan.records.len(), "Opened event log");

        Ok(Self {
            path,
            file,
            len,
            next_seq: scan.records.len() as Sequence,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventLog for JsonlEventLog {
    fn append(&mut self, entry: LogEntry) -> StoreResult<LogRecord> {
        let record = LogRecord::new(self.next_seq, entry);
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        if let Err(e) = self.file.write_all(&line).and_then(|()| self.file.flush()) {
            // Drop any partial write so the next append starts on a clean line.
            if let Err(truncate) = self.file.set_len(self.len) {
                warn!(
                    path = %self.path.display(),
                    error = %truncate,
                    "Failed to roll back partial event log write"
                );
            }
            return Err(e.into());
        }
        self.len += line.len() as u64;
        self.next_seq += 1;
        Ok(record)
    }

    fn records(&self) -> StoreResult<Vec<LogRecord>> {
        let scan = scan_records(&self.path)?;
        match scan.torn {
            Some(torn) => Err(StoreError::Corrupt {
                path: self.path.clone(),
                line: torn.line,
                message: torn.message,
            }),
            None => Ok(scan.records),
        }
    }

    fn next_seq(&self) -> Sequence {
        self.next_seq
    }
}

/// Unparseable final line of a log file
#[derive(Debug)]
struct TornRecord {
    line: usize,
    message: String,
}

#[derive(Debug, Default)]
struct Scan {
    records: Vec<LogRecord>,
    /// Byte length up to the end of the last good record
    valid_len: u64,
    /// Last good record is not newline-terminated
    missing_newline: bool,
    torn: Option<TornRecord>,
}

fn scan_records(path: &Path) -> StoreResult<Scan> {
    let contents = fs::read(path)?;
    let mut scan = Scan::default();
    let mut offset = 0usize;
    let mut line_no = 0usize;

    while offset < contents.len() {
        line_no += 1;
        let end = contents[offset..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|pos| offset + pos);
        let line = &contents[offset..end.unwrap_or(contents.len())];
        let next = end.map_or(contents.len(), |pos| pos + 1);

        if line.iter().all(u8::is_ascii_whitespace) {
            offset = next;
            continue;
        }

        match serde_json::from_slice::<LogRecord>(line) {
            Ok(record) => {
                scan.records.push(record);
                scan.valid_len = next as u64;
                scan.missing_newline = end.is_none();
            }
            Err(e) => {
                let is_last = contents[next..].iter().all(u8::is_ascii_whitespace);
                if !is_last {
                    return Err(StoreError::Corrupt {
                        path: path.to_path_buf(),
                        line: line_no,
                        message: e.to_string(),
                    });
                }
                scan.torn = Some(TornRecord {
                    line: line_no,
                    message: e.to_string(),
                });
                break;
            }
        }
        offset = next;
    }

    Ok(scan)
}

fn check_order(records: &[LogRecord]) -> StoreResult<()> {
    for (expected, record) in records.iter().enumerate() {
        let expected = expected as Sequence;
        if record.seq != expected {
            return Err(StoreError::OutOfOrder {
                expected,
                found: record.seq,
            });
        }
    }
    Ok(())
}

/// Where incident logs live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogStore {
    /// Fresh in-memory log per incident; nothing survives a restart
    Memory,
    /// One `<service>.jsonl` file per incident under this directory
    Directory(PathBuf),
}

impl LogStore {
    /// Open the log for a service.
    pub fn open(&self, service: &str) -> StoreResult<Box<dyn EventLog>> {
        match self {
            LogStore::Memory => Ok(Box::new(MemoryEventLog::new())),
            LogStore::Directory(dir) => Ok(Box::new(JsonlEventLog::open(
                dir.join(format!("{}.jsonl", file_stem(service))),
            )?)),
        }
    }

    /// Path of a service's log file, for directory stores.
    pub fn path_for(&self, service: &str) -> Option<PathBuf> {
        match self {
            LogStore::Memory => None,
            LogStore::Directory(dir) => Some(dir.join(format!("{}.jsonl", file_stem(service)))),
        }
    }

    /// Logs of incidents that have not been rotated aside, in path order.
    pub fn active_logs(&self) -> StoreResult<Vec<PathBuf>> {
        let LogStore::Directory(dir) = self else {
            return Ok(Vec::new());
        };
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(".jsonl") && !name.ends_with(".resolved.jsonl") && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Move a finished incident's log aside so the service can start anew.
    ///
    /// Returns the archive path, or `None` when there was nothing to rotate.
    pub fn rotate(&self, service: &str) -> StoreResult<Option<PathBuf>> {
        let LogStore::Directory(dir) = self else {
            return Ok(None);
        };
        let path = dir.join(format!("{}.jsonl", file_stem(service)));
        if !path.exists() {
            return Ok(None);
        }

        let archived = dir.join(format!(
            "{}.{}.resolved.jsonl",
            file_stem(service),
            Utc::now().format("%Y%m%dT%H%M%S%3f")
        ));
        fs::rename(&path, &archived)?;
        info!(service, archived = %archived.display(), "Rotated resolved incident log");
        Ok(Some(archived))
    }
}

/// Filesystem-safe form of a service identifier.
fn file_stem(service: &str) -> String {
    service
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::Command;

    fn alert(id: &str) -> LogEntry {
        LogEntry::Command {
            command: Command::AddAlert {
                alert_id: id.into(),
            },
        }
    }

    #[test]
    fn test_memory_log_assigns_sequence() {
        let mut log = MemoryEventLog::new();
        assert!(log.is_empty());

        log.append(LogEntry::Opened {
            service: "db".into(),
        })
        .unwrap();
        let second = log.append(alert("a1")).unwrap();

        assert_eq!(second.seq, 1);
        assert_eq!(log.next_seq(), 2);
        assert_eq!(log.records().unwrap().len(), 2);
    }

    #[test]
    fn test_jsonl_log_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("db.jsonl");

        {
            let mut log = JsonlEventLog::open(&path).unwrap();
            log.append(LogEntry::Opened {
                service: "db".into(),
            })
            .unwrap();
            log.append(alert("a1")).unwrap();
        }

        let mut reopened = JsonlEventLog::open(&path).unwrap();
        assert_eq!(reopened.next_seq(), 2);
        let third = reopened.append(alert("a2")).unwrap();
        assert_eq!(third.seq, 2);

        let records = reopened.records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].entry, alert("a1"));
    }

    fn write_opened(path: &Path) {
        let mut log = JsonlEventLog::open(path).unwrap();
        log.append(LogEntry::Opened {
            service: "db".into(),
        })
        .unwrap();
        log.append(alert("a1")).unwrap();
    }

    #[test]
    fn test_corrupt_line_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        write_opened(&path);
        let good = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = good.lines().collect();
        fs::write(&path, format!("{}\n{{not json}}\n{}\n", lines[0], lines[1])).unwrap();

        let err = JsonlEventLog::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { line: 2, .. }));
    }

    #[test]
    fn test_torn_tail_truncated_on_open() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("db.jsonl");
        write_opened(&path);
        let intact = fs::read(&path).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"seq":2,"recorded_at":"2026"#).unwrap();
        drop(file);

        let mut log = JsonlEventLog::open(&path).unwrap();
        assert_eq!(log.next_seq(), 2);
        assert_eq!(fs::read(&path).unwrap(), intact);

        let third = log.append(alert("a2")).unwrap();
        assert_eq!(third.seq, 2);
        let records = log.records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].entry, alert("a2"));
    }

    #[test]
    fn test_unterminated_last_record_kept() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("db.jsonl");
        write_opened(&path);
        let contents = fs::read_to_string(&path).unwrap();
        fs::write(&path, contents.trim_end()).unwrap();

        let mut log = JsonlEventLog::open(&path).unwrap();
        assert_eq!(log.next_seq(), 2);
        log.append(alert("a2")).unwrap();

        let reopened = JsonlEventLog::open(&path).unwrap();
        assert_eq!(reopened.records().unwrap().len(), 3);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let records = vec![LogRecord::new(1, alert("a1"))];
        let err = MemoryEventLog::from_records(records).unwrap_err();
        assert!(matches!(
            err,
            StoreError::OutOfOrder {
                expected: 0,
                found: 1
            }
        ));
    }

    #[test]
    fn test_store_paths_and_rotation() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LogStore::Directory(dir.path().to_path_buf());

        let path = store.path_for("payments/eu").unwrap();
        assert_eq!(path.file_name().unwrap(), "payments_eu.jsonl");

        assert!(store.rotate("payments/eu").unwrap().is_none());

        let mut log = store.open("payments/eu").unwrap();
        log.append(LogEntry::Opened {
            service: "payments/eu".into(),
        })
        .unwrap();
        drop(log);

        let archived = store.rotate("payments/eu").unwrap().unwrap();
        assert!(archived.exists());
        assert!(!path.exists());
        assert!(store.open("payments/eu").unwrap().is_empty());

        assert!(LogStore::Memory.path_for("db").is_none());
    }

    #[test]
    fn test_active_logs_skip_rotated() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LogStore::Directory(dir.path().to_path_buf());
        for service in ["web", "db"] {
            store
                .open(service)
                .unwrap()
                .append(LogEntry::Opened {
                    service: service.into(),
                })
                .unwrap();
        }
        store.rotate("web").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let active = store.active_logs().unwrap();
        assert_eq!(active, vec![dir.path().join("db.jsonl")]);
        assert!(LogStore::Memory.active_logs().unwrap().is_empty());
    }
}
