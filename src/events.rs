use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One accepted verification. Never read back by the matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationEvent {
    pub nim: String,
    pub name: String,
    pub model: String,
    pub distance: f32,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

/// Append-only audit trail of accepted verifications.
pub trait EventLog: Send + Sync {
    fn record(&self, event: &VerificationEvent) -> Result<()>;
    fn count(&self) -> Result<usize>;
    /// Newest first.
    fn recent(&self, limit: usize) -> Result<Vec<VerificationEvent>>;
}

#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<VerificationEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventLog for MemoryEventLog {
    fn record(&self, event: &VerificationEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.events.lock().unwrap_or_else(PoisonError::into_inner).len())
    }

    fn recent(&self, limit: usize) -> Result<Vec<VerificationEvent>> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(newest_first(events.clone(), limit))
    }
}

/// Newline-delimited JSON, one event per line.
#[derive(Debug)]
pub struct JsonlEventLog {
    path: PathBuf,
    append: Mutex<()>,
}

impl JsonlEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<VerificationEvent>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;

        let mut events = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}", self.path.display(), n + 1))?;
            events.push(event);
        }
        Ok(events)
    }
}

impl EventLog for JsonlEventLog {
    fn record(&self, event: &VerificationEvent) -> Result<()> {
        let _guard = self.append.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()))
            .with_context(|| format!("appending to {}", self.path.display()))
    }

    fn count(&self) -> Result<usize> {
        Ok(self.read_all()?.len())
    }

    fn recent(&self, limit: usize) -> Result<Vec<VerificationEvent>> {
        Ok(newest_first(self.read_all()?, limit))
    }
}

fn newest_first(mut events: Vec<VerificationEvent>, limit: usize) -> Vec<VerificationEvent> {
    // stable: same-instant events keep reverse insertion order
    events.reverse();
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    events.truncate(limit);
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(nim: &str, minute: u32) -> VerificationEvent {
        VerificationEvent {
            nim: nim.to_string(),
            name: format!("name of {nim}"),
            model: "SFace".to_string(),
            distance: 0.1,
            confidence: 66.67,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, minute, 0).unwrap(),
        }
    }

    #[test]
    fn memory_log_orders_newest_first() {
        let log = MemoryEventLog::new();
        log.record(&event("A001", 5)).unwrap();
        log.record(&event("B002", 1)).unwrap();
        log.record(&event("C003", 9)).unwrap();

        assert_eq!(log.count().unwrap(), 3);
        let recent: Vec<_> = log.recent(2).unwrap().into_iter().map(|e| e.nim).collect();
        assert_eq!(recent, ["C003", "A001"]);
    }

    #[test]
    fn jsonl_log_appends_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlEventLog::new(dir.path().join("logs").join("events.jsonl"));
        assert_eq!(log.count().unwrap(), 0);
        assert!(log.recent(10).unwrap().is_empty());

        log.record(&event("A001", 1)).unwrap();
        log.record(&event("A001", 2)).unwrap();
        assert_eq!(log.count().unwrap(), 2);

        // a fresh handle sees the same file
        let reopened = JsonlEventLog::new(log.path());
        let recent = reopened.recent(50).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0], event("A001", 2));
    }

    #[test]
    fn jsonl_log_reports_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();
        let err = JsonlEventLog::new(&path).count().unwrap_err();
        assert!(format!("{err:#}").contains("events.jsonl:1"));
    }
}
