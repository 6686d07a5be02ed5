//! ---
//! vigil_section: "03-persistence-logging"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Append-only crash record log."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nix::fcntl::{Flock, FlockArg};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CrashLogError;
use crate::exit::{ExitReason, StopEvent};

/// Durable evidence of one classified failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashRecord {
    pub timestamp: DateTime<Utc>,
    pub service_name: String,
    pub exit_reason: ExitReason,
    pub exit_code: Option<i32>,
}

impl CrashRecord {
    pub fn from_event(event: &StopEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            service_name: event.service.clone(),
            exit_reason: event.reason,
            exit_code: event.exit_code,
        }
    }
}

/// Append-only store for crash records.
pub trait CrashLog: Send + Sync {
    fn append(&self, record: &CrashRecord) -> Result<(), CrashLogError>;

    /// Most recent records, oldest first.
    fn recent(&self, limit: usize) -> Result<Vec<CrashRecord>, CrashLogError>;
}

/// JSON-lines crash log shared by concurrent stop hooks.
#[derive(Debug)]
pub struct FileCrashLog {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileCrashLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_for_append(&self) -> Result<File, CrashLogError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?)
    }
}

impl CrashLog for FileCrashLog {
    fn append(&self, record: &CrashRecord) -> Result<(), CrashLogError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _in_process = self.guard.lock();
        let file = self.open_for_append()?;
        let mut locked = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| CrashLogError::Lock(errno.to_string()))?;
        // Single write of the full line; O_APPEND keeps it contiguous.
        locked.write_all(line.as_bytes())?;
        locked.flush()?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<CrashRecord>, CrashLogError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut window: VecDeque<CrashRecord> = VecDeque::with_capacity(limit.min(1024));
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CrashRecord>(&line) {
                Ok(record) => {
                    if limit == 0 {
                        continue;
                    }
                    if window.len() == limit {
                        window.pop_front();
                    }
                    window.push_back(record);
                }
                Err(err) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %err,
                    "skipping malformed crash record"
                ),
            }
        }
        Ok(window.into_iter().collect())
    }
}

/// In-memory crash log used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCrashLog {
    records: Mutex<Vec<CrashRecord>>,
}

impl MemoryCrashLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CrashRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl CrashLog for MemoryCrashLog {
    fn append(&self, record: &CrashRecord) -> Result<(), CrashLogError> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<CrashRecord>, CrashLogError> {
        let records = self.records.lock();
        let skip = records.len().saturating_sub(limit);
        Ok(records[skip..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use tempfile::tempdir;

    fn record(service: &str, code: i32) -> CrashRecord {
        CrashRecord::from_event(&StopEvent::new(service, ExitReason::NonZeroExit, Some(code)))
    }

    #[test]
    fn appends_one_line_per_record_and_reads_tail() {
        let dir = tempdir().unwrap();
        let log = FileCrashLog::new(dir.path().join("nested/crashes.jsonl"));
        for code in 1..=5 {
            log.append(&record("broker", code)).unwrap();
        }
        let raw = fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 5);

        let tail = log.recent(2).unwrap();
        let codes: Vec<_> = tail.iter().map(|r| r.exit_code).collect();
        assert_eq!(codes, vec![Some(4), Some(5)]);
    }

    #[test]
    fn missing_file_reads_as_empty_and_bad_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let log = FileCrashLog::new(dir.path().join("crashes.jsonl"));
        assert!(log.recent(10).unwrap().is_empty());

        log.append(&record("dashboard", 1)).unwrap();
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        writeln!(file, "{{not json").unwrap();
        log.append(&record("dashboard", 2)).unwrap();
        assert_eq!(log.recent(10).unwrap().len(), 2);
    }

    #[test]
    fn concurrent_appends_do_not_interleave() {
        let dir = tempdir().unwrap();
        let log = Arc::new(FileCrashLog::new(dir.path().join("crashes.jsonl")));
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for n in 0..25 {
                        log.append(&record(&format!("svc-{worker}"), n)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let raw = fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 200);
        for line in raw.lines() {
            serde_json::from_str::<CrashRecord>(line).unwrap();
        }
    }

    #[test]
    fn serialized_record_uses_kebab_case_reason() {
        let json = serde_json::to_value(record("broker", 137)).unwrap();
        assert_eq!(json["exit_reason"], "non-zero-exit");
        assert_eq!(json["service_name"], "broker");
    }
}
