//! DNA Memory — append-only threat log
//!
//! One JSON object per line (`logs/threat_log.jsonl` by default). Writers only
//! append; each record goes out as a single `write_all` of `line + '\n'`
//! followed by `sync_data`, under the store lock. Readers take the same lock
//! and ignore a trailing line with no newline, so a half-written record is
//! never observed, not even after a crash mid-append.

use crate::model::{ClassificationResult, ThreatEvent, Verdict};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_LOG_PATH: &str = "logs/threat_log.jsonl";

pub struct DnaMemory {
    path: PathBuf,
    /// Single writer lock; readers hold it too so appends are atomic to them
    lock: Mutex<()>,
}

impl DnaMemory {
    /// Open (creating if needed) the log at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event with its verdict re-sanitized
    pub fn store_event(&self, event: ThreatEvent) -> Result<(), MemoryError> {
        let event = event.sanitized();
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let _guard = self.lock.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    /// Build an event from a classification (its reason kept as an extra) and store it
    pub fn record(
        &self,
        sequence: u64,
        input: &str,
        classification: &ClassificationResult,
    ) -> Result<ThreatEvent, MemoryError> {
        let mut event = ThreatEvent::new(
            sequence,
            input,
            classification.verdict.clone(),
            classification.confidence,
        );
        if let Some(reason) = &classification.reason {
            event = event.with_extra("reason", reason.as_str());
        }
        self.store_event(event.clone())?;
        Ok(event.sanitized())
    }

    /// [`DnaMemory::store_event`] for callers that must not fail on storage.
    /// Errors are logged; returns whether the record landed.
    pub fn log_event(&self, event: ThreatEvent) -> bool {
        match self.store_event(event) {
            Ok(()) => true,
            Err(e) => {
                error!("DNA memory append to {} failed: {}", self.path.display(), e);
                false
            }
        }
    }

    pub fn count_logs(&self) -> usize {
        self.with_lines(|lines| lines.count()).unwrap_or(0)
    }

    /// Events whose serialized record contains `keyword`, case-insensitively
    pub fn search_memory(&self, keyword: &str) -> Vec<ThreatEvent> {
        let needle = keyword.to_lowercase();
        self.with_lines(|lines| {
            lines
                .filter(|line| line.to_lowercase().contains(&needle))
                .filter_map(parse_event)
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn full_dump(&self) -> Vec<ThreatEvent> {
        self.with_lines(|lines| lines.filter_map(parse_event).collect())
            .unwrap_or_default()
    }

    /// Last `limit` events, oldest first
    pub fn recent(&self, limit: usize) -> Vec<ThreatEvent> {
        let all = self.full_dump();
        let skip = all.len().saturating_sub(limit);
        all.into_iter().skip(skip).collect()
    }

    /// Canonical verdict label → count, recomputed from a full scan.
    ///
    /// Unparseable lines count as `UNKNOWN` so the total always equals
    /// [`DnaMemory::count_logs`].
    pub fn stats(&self) -> BTreeMap<String, usize> {
        self.with_lines(|lines| {
            let mut counts = BTreeMap::new();
            for line in lines {
                *counts.entry(line_verdict(line).label().to_string()).or_insert(0) += 1;
            }
            counts
        })
        .unwrap_or_default()
    }

    /// Truncate the log. Irreversible.
    pub fn clear(&self) -> Result<(), MemoryError> {
        let _guard = self.lock.lock();
        let file = File::create(&self.path)?;
        file.sync_all()?;
        info!("DNA memory cleared: {}", self.path.display());
        Ok(())
    }

    /// Rewrite every record with its verdict in canonical form.
    ///
    /// Writes a sibling temp file and renames it over the log, so readers see
    /// either the old or the new log. Returns the number of records rewritten.
    pub fn resanitize(&self) -> Result<usize, MemoryError> {
        let _guard = self.lock.lock();
        let content = read_log(&self.path)?;

        let mut out = String::with_capacity(content.len());
        let mut rewritten = 0;
        for line in complete_lines(&content) {
            match serde_json::from_str::<Value>(line) {
                Ok(Value::Object(mut record)) => {
                    let verdict = record
                        .get("verdict")
                        .map(value_verdict)
                        .unwrap_or(Verdict::Unknown);
                    record.insert("verdict".into(), Value::String(verdict.label().to_string()));
                    out.push_str(&serde_json::to_string(&record)?);
                    rewritten += 1;
                }
                // Foreign lines are carried over untouched
                _ => out.push_str(line),
            }
            out.push('\n');
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(out.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        info!("Re-sanitized {} DNA records", rewritten);
        Ok(rewritten)
    }

    /// Summary line for `whoami`-style output
    pub fn summary(&self) -> String {
        format!("DnaMemory: {} records, file={}", self.count_logs(), self.path.display())
    }

    fn with_lines<T>(
        &self,
        f: impl FnOnce(&mut dyn Iterator<Item = &str>) -> T,
    ) -> Result<T, MemoryError> {
        let content = {
            let _guard = self.lock.lock();
            read_log(&self.path)?
        };
        let mut lines = complete_lines(&content);
        Ok(f(&mut lines))
    }
}

fn read_log(path: &Path) -> Result<String, MemoryError> {
    match fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

/// Non-empty, newline-terminated lines; a trailing partial line is dropped
fn complete_lines(content: &str) -> impl Iterator<Item = &str> {
    let complete = match content.rfind('\n') {
        Some(end) => &content[..=end],
        None => "",
    };
    complete.lines().filter(|line| !line.trim().is_empty())
}

fn parse_event(line: &str) -> Option<ThreatEvent> {
    match serde_json::from_str(line) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Skipping unreadable DNA record: {}", e);
            None
        }
    }
}

fn line_verdict(line: &str) -> Verdict {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|record| record.get("verdict").map(value_verdict))
        .unwrap_or(Verdict::Unknown)
}

fn value_verdict(value: &Value) -> Verdict {
    serde_json::from_value::<Verdict>(value.clone()).unwrap_or(Verdict::Unknown)
}

/// Memory store errors
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
