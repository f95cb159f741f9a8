// ABOUTME: AuditLog — append-only record of terminal gate decisions, optionally mirrored to JSONL.
// ABOUTME: Replays on open, rotates by size, and fails open when the file cannot be written.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use super::entry::{AuditEntry, AuditFilter, AuditStats};
use super::export::{ExportFormat, export};
use crate::error::GateError;

/// Retention and rotation knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditSettings {
    /// Cap on entries held in memory. The file keeps everything.
    pub max_entries: Option<usize>,
    /// Rotate the JSONL file once it would grow past this size.
    pub max_file_bytes: Option<u64>,
    /// Rotated files kept as `<path>.1` (newest) through `<path>.N`. Zero disables
    /// rotation, so the live file is never discarded.
    pub keep_rotated: usize,
}

struct Sink {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes: u64,
}

impl Sink {
    fn open(path: &Path) -> Result<Self, GateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let bytes = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            bytes,
        })
    }

    fn write(&mut self, entry: &AuditEntry, settings: &AuditSettings) -> Result<(), GateError> {
        let line = serde_json::to_string(entry)?;
        let len = line.len() as u64 + 1;
        if let Some(max) = settings.max_file_bytes.filter(|_| settings.keep_rotated > 0) {
            if self.bytes > 0 && self.bytes + len > max {
                self.rotate(settings.keep_rotated)?;
            }
        }
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        self.bytes += len;
        Ok(())
    }

    fn rotate(&mut self, keep: usize) -> Result<(), GateError> {
        self.writer.flush()?;
        remove_if_exists(&rotated_path(&self.path, keep))?;
        for n in (1..keep).rev() {
            let from = rotated_path(&self.path, n);
            if from.exists() {
                fs::rename(&from, rotated_path(&self.path, n + 1))?;
            }
        }
        fs::rename(&self.path, rotated_path(&self.path, 1))?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.bytes = 0;
        debug!(path = %self.path.display(), "audit log rotated");
        Ok(())
    }

    fn truncate(&mut self, keep: usize) -> Result<(), GateError> {
        self.writer.flush()?;
        self.writer.get_ref().set_len(0)?;
        self.bytes = 0;
        for n in 1..=keep {
            remove_if_exists(&rotated_path(&self.path, n))?;
        }
        Ok(())
    }
}

struct Inner {
    entries: VecDeque<AuditEntry>,
    next_seq: u64,
    last_timestamp: Option<DateTime<Utc>>,
    sink: Option<Sink>,
}

/// Append-only audit store, safe for concurrent writers from many sessions.
///
/// Every append is serialized behind one lock so `seq` order, timestamp order and
/// file order agree. `stats` and `export` scan the retained entries.
pub struct AuditLog {
    inner: Mutex<Inner>,
    settings: AuditSettings,
    write_failed: AtomicBool,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl AuditLog {
    pub fn in_memory() -> Self {
        Self::with_settings(AuditSettings::default())
    }

    /// In-memory log with a retention cap.
    pub fn with_settings(settings: AuditSettings) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                next_seq: 1,
                last_timestamp: None,
                sink: None,
            }),
            settings,
            write_failed: AtomicBool::new(false),
        }
    }

    /// Open a JSONL-backed log, replaying rotated files oldest first and then the live file.
    pub fn open(path: impl AsRef<Path>, settings: AuditSettings) -> Result<Self, GateError> {
        let path = path.as_ref();
        let mut replayed = Vec::new();
        for n in (1..=settings.keep_rotated).rev() {
            replayed.extend(replay(&rotated_path(path, n))?);
        }
        replayed.extend(replay(path)?);

        let log = Self::with_settings(settings);
        {
            let mut inner = log.lock();
            inner.next_seq = replayed.iter().map(|e| e.seq).max().unwrap_or(0) + 1;
            inner.last_timestamp = replayed.iter().map(|e| e.timestamp).max();
            inner.entries = replayed.into();
            log.enforce_retention(&mut inner);
            inner.sink = Some(Sink::open(path)?);
        }
        debug!(path = %path.display(), entries = log.len(), "audit log opened");
        Ok(log)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enforce_retention(&self, inner: &mut Inner) {
        if let Some(max) = self.settings.max_entries {
            while inner.entries.len() > max {
                inner.entries.pop_front();
            }
        }
    }

    /// Store a copy of `entry`, assigning its sequence number and clamping its timestamp
    /// so it never precedes the previous entry. Never rejects; a failed file write is
    /// reported once and the in-memory record is still kept.
    pub fn append(&self, entry: &AuditEntry) -> AuditEntry {
        let mut stored = entry.clone();
        let mut inner = self.lock();

        stored.seq = inner.next_seq;
        inner.next_seq += 1;
        if let Some(last) = inner.last_timestamp {
            if stored.timestamp < last {
                stored.timestamp = last;
            }
        }
        inner.last_timestamp = Some(stored.timestamp);

        if let Some(sink) = inner.sink.as_mut() {
            if let Err(err) = sink.write(&stored, &self.settings) {
                self.report_failure(&sink.path, &err);
            }
        }

        inner.entries.push_back(stored.clone());
        self.enforce_retention(&mut inner);
        stored
    }

    fn report_failure(&self, path: &Path, err: &GateError) {
        if !self.write_failed.swap(true, Ordering::SeqCst) {
            error!(path = %path.display(), error = %err, "audit write failed; decisions continue unaffected");
        }
    }

    /// Whether any file write has failed since the log was opened.
    pub fn write_failed(&self) -> bool {
        self.write_failed.load(Ordering::SeqCst)
    }

    /// Up to `n` entries, newest first, across all sessions.
    pub fn recent(&self, n: usize) -> Vec<AuditEntry> {
        self.lock().entries.iter().rev().take(n).cloned().collect()
    }

    /// All retained entries in append order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect()
    }

    /// Full-scan statistics, optionally restricted to one session.
    pub fn stats(&self, session_id: Option<&str>) -> AuditStats {
        let inner = self.lock();
        AuditStats::from_entries(
            inner
                .entries
                .iter()
                .filter(|entry| session_id.is_none_or(|id| entry.session_id == id)),
        )
    }

    pub fn export(&self, format: ExportFormat) -> Result<String, GateError> {
        export(&self.entries(), format)
    }

    /// Administrative wipe of memory, the live file, and rotated files.
    /// Sequence numbers keep counting up.
    pub fn clear(&self) -> Result<usize, GateError> {
        let mut inner = self.lock();
        let cleared = inner.entries.len();
        inner.entries.clear();
        if let Some(sink) = inner.sink.as_mut() {
            sink.truncate(self.settings.keep_rotated)?;
        }
        warn!(cleared, "audit log cleared");
        Ok(cleared)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.lock().sink.as_ref().map(|sink| sink.path.clone())
    }
}

/// `<path>.<n>`
pub fn rotated_path(path: &Path, n: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> Result<(), GateError> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
        _ => Ok(()),
    }
}

/// Read entries from a JSONL file. Missing files and non-regular files yield nothing;
/// malformed lines are skipped.
fn replay(path: &Path) -> Result<Vec<AuditEntry>, GateError> {
    let is_file = fs::metadata(path).map(|m| m.is_file()).unwrap_or(false);
    if !is_file {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(err) => warn!(path = %path.display(), line = index + 1, error = %err, "skipping malformed audit line"),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateState;
    use crate::risk::RiskLevel;
    use chrono::Duration;

    fn entry(session: &str, tool: &str, terminal: GateState) -> AuditEntry {
        AuditEntry::new(session, tool, RiskLevel::Medium, terminal)
    }

    #[test]
    fn append_assigns_sequence_and_copies() {
        let log = AuditLog::in_memory();
        let mut original = entry("s1", "write_file", GateState::DeniedTerminal);
        let stored = log.append(&original);
        original.tool = "mutated".to_string();

        assert_eq!(stored.seq, 1);
        assert_eq!(log.append(&original).seq, 2);
        assert_eq!(log.entries()[0].tool, "write_file");
    }

    #[test]
    fn recent_is_newest_first() {
        let log = AuditLog::in_memory();
        for tool in ["a", "b", "c"] {
            log.append(&entry("s1", tool, GateState::AutoAllowedTerminal));
        }
        let tools: Vec<String> = log.recent(2).into_iter().map(|e| e.tool).collect();
        assert_eq!(tools, vec!["c", "b"]);
        assert_eq!(log.recent(10).len(), 3);
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let log = AuditLog::in_memory();
        let first = log.append(&entry("s1", "a", GateState::AutoAllowedTerminal));
        let mut late = entry("s1", "b", GateState::AutoAllowedTerminal);
        late.timestamp = first.timestamp - Duration::seconds(30);
        let stored = log.append(&late);
        assert_eq!(stored.timestamp, first.timestamp);
    }

    #[test]
    fn stats_filter_by_session() {
        let log = AuditLog::in_memory();
        log.append(&entry("s1", "write_file", GateState::ApprovedTerminal));
        log.append(&entry("s1", "write_file", GateState::DeniedTerminal));
        log.append(&entry("s2", "web_fetch", GateState::AutoAllowedTerminal));

        let all = log.stats(None);
        assert_eq!(all.total_calls, 3);
        assert_eq!(all.approved, 2);

        let s1 = log.stats(Some("s1"));
        assert_eq!(s1.total_calls, 2);
        assert_eq!(s1.denied, 1);
        assert_eq!(s1.by_tool.len(), 1);
    }

    #[test]
    fn query_filters_by_tool_and_outcome() {
        let log = AuditLog::in_memory();
        log.append(&entry("s1", "write_file", GateState::ApprovedTerminal));
        log.append(&entry("s1", "write_file", GateState::DeniedTerminal));
        log.append(&entry("s1", "web_fetch", GateState::DeniedTerminal));
        let hits = log.query(&AuditFilter::default().tool("write_file").approved(false));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].seq, 2);
    }

    #[test]
    fn retention_caps_memory() {
        let log = AuditLog::with_settings(AuditSettings {
            max_entries: Some(2),
            ..AuditSettings::default()
        });
        for tool in ["a", "b", "c"] {
            log.append(&entry("s1", tool, GateState::AutoAllowedTerminal));
        }
        let tools: Vec<String> = log.entries().into_iter().map(|e| e.tool).collect();
        assert_eq!(tools, vec!["b", "c"]);
    }

    #[test]
    fn reopen_replays_entries_and_continues_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let log = AuditLog::open(&path, AuditSettings::default()).unwrap();
        log.append(&entry("s1", "a", GateState::AutoAllowedTerminal));
        log.append(&entry("s1", "b", GateState::DeniedTerminal));
        drop(log);

        let reopened = AuditLog::open(&path, AuditSettings::default()).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.append(&entry("s1", "c", GateState::AutoAllowedTerminal)).seq, 3);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[test]
    fn malformed_lines_are_skipped_on_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let good = serde_json::to_string(&entry("s1", "a", GateState::AutoAllowedTerminal)).unwrap();
        fs::write(&path, format!("{good}\nnot json\n\n")).unwrap();

        let log = AuditLog::open(&path, AuditSettings::default()).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn rotation_keeps_bounded_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let settings = AuditSettings {
            max_entries: None,
            max_file_bytes: Some(1),
            keep_rotated: 2,
        };

        let log = AuditLog::open(&path, settings.clone()).unwrap();
        for tool in ["a", "b", "c", "d"] {
            log.append(&entry("s1", tool, GateState::AutoAllowedTerminal));
        }
        assert!(!log.write_failed());
        assert!(rotated_path(&path, 1).exists());
        assert!(rotated_path(&path, 2).exists());
        assert!(!rotated_path(&path, 3).exists());
        drop(log);

        let reopened = AuditLog::open(&path, settings).unwrap();
        let tools: Vec<String> = reopened.entries().into_iter().map(|e| e.tool).collect();
        assert_eq!(tools, vec!["b", "c", "d"]);
    }

    #[test]
    fn zero_kept_rotations_never_discards_the_live_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let settings = AuditSettings {
            max_file_bytes: Some(1),
            keep_rotated: 0,
            ..AuditSettings::default()
        };

        let log = AuditLog::open(&path, settings.clone()).unwrap();
        for tool in ["a", "b", "c"] {
            log.append(&entry("s1", tool, GateState::AutoAllowedTerminal));
        }
        assert!(!log.write_failed());
        assert!(!rotated_path(&path, 1).exists());
        drop(log);

        let reopened = AuditLog::open(&path, settings).unwrap();
        let tools: Vec<String> = reopened.entries().into_iter().map(|e| e.tool).collect();
        assert_eq!(tools, vec!["a", "b", "c"]);
    }

    #[test]
    fn clear_wipes_memory_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let settings = AuditSettings {
            max_file_bytes: Some(1),
            keep_rotated: 1,
            ..AuditSettings::default()
        };
        let log = AuditLog::open(&path, settings.clone()).unwrap();
        log.append(&entry("s1", "a", GateState::AutoAllowedTerminal));
        log.append(&entry("s1", "b", GateState::AutoAllowedTerminal));

        assert_eq!(log.clear().unwrap(), 2);
        assert!(log.is_empty());
        assert!(!rotated_path(&path, 1).exists());
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
        assert_eq!(log.append(&entry("s1", "c", GateState::AutoAllowedTerminal)).seq, 3);
        drop(log);

        assert_eq!(AuditLog::open(&path, settings).unwrap().len(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn write_failure_fails_open() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let log = AuditLog::open(full, AuditSettings::default()).unwrap();
        let stored = log.append(&entry("s1", "a", GateState::AutoAllowedTerminal));
        log.append(&entry("s1", "b", GateState::AutoAllowedTerminal));
        assert!(log.write_failed());
        assert_eq!(stored.seq, 1);
        assert_eq!(log.len(), 2);
    }
}
