//! IncidentSink: durable, append-only record of positively matched transcripts.

use crate::detector::MatchResult;
use crate::error::GuardResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// 1 distinct match -> LOW, 2 -> MEDIUM, 3 or more -> HIGH.
    pub fn from_match_count(matches: usize) -> Self {
        match matches {
            0 | 1 => Severity::Low,
            2 => Severity::Medium,
            _ => Severity::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToxicIncident {
    pub timestamp: DateTime<Utc>,
    pub sentence: String,
    pub matched_canonical: String,
    pub machine_id: String,
    #[serde(default)]
    pub corrected_sentence: String,
    #[serde(default)]
    pub matches: Vec<String>,
    pub severity: Severity,
}

impl ToxicIncident {
    pub fn from_match(
        machine_id: &str,
        sentence: &str,
        verdict: &MatchResult,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            sentence: sentence.to_string(),
            matched_canonical: verdict.matched_canonical.clone().unwrap_or_default(),
            machine_id: machine_id.to_string(),
            corrected_sentence: verdict.corrected_sentence.clone(),
            matches: verdict.matches.clone(),
            severity: Severity::from_match_count(verdict.matches.len()),
        }
    }
}

pub trait IncidentSink: Send + Sync {
    fn append(&self, incident: &ToxicIncident) -> GuardResult<()>;

    /// Most recent incidents, oldest first.
    fn recent(&self, limit: usize) -> GuardResult<Vec<ToxicIncident>>;
}

/// JSON-lines incident log. Opened in append mode for every write; the process
/// never truncates or rewrites it.
#[derive(Debug)]
pub struct JsonlIncidentLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlIncidentLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IncidentSink for JsonlIncidentLog {
    fn append(&self, incident: &ToxicIncident) -> GuardResult<()> {
        let line = serde_json::to_string(incident)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> GuardResult<Vec<ToxicIncident>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)?;
        let mut incidents = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ToxicIncident>(&line) {
                Ok(incident) => incidents.push(incident),
                Err(e) => warn!(line = lineno + 1, error = %e, "[INCIDENT] skipping unreadable entry"),
            }
        }
        let skip = incidents.len().saturating_sub(limit);
        Ok(incidents.split_off(skip))
    }
}

/// In-memory sink for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryIncidentSink {
    incidents: Mutex<Vec<ToxicIncident>>,
}

impl MemoryIncidentSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.incidents.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IncidentSink for MemoryIncidentSink {
    fn append(&self, incident: &ToxicIncident) -> GuardResult<()> {
        self.incidents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(incident.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> GuardResult<Vec<ToxicIncident>> {
        let incidents = self.incidents.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = incidents.len().saturating_sub(limit);
        Ok(incidents[skip..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(matches: &[&str]) -> MatchResult {
        MatchResult {
            is_toxic: true,
            matched_canonical: matches.first().map(|m| m.to_string()),
            span: Some((0, 1)),
            corrected_sentence: matches.join(" "),
            matches: matches.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn severity_by_distinct_matches() {
        assert_eq!(Severity::from_match_count(1), Severity::Low);
        assert_eq!(Severity::from_match_count(2), Severity::Medium);
        assert_eq!(Severity::from_match_count(5), Severity::High);
    }

    #[test]
    fn jsonl_log_appends_and_never_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("incidents.jsonl");

        let first = JsonlIncidentLog::new(&path);
        first
            .append(&ToxicIncident::from_match("kiosk-1", "a", &verdict(&["a"]), Utc::now()))
            .unwrap();

        // A second writer over the same file keeps earlier lines.
        let second = JsonlIncidentLog::new(&path);
        second
            .append(&ToxicIncident::from_match("kiosk-1", "a b", &verdict(&["a", "b"]), Utc::now()))
            .unwrap();

        let all = second.recent(10).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].severity, Severity::Low);
        assert_eq!(all[1].severity, Severity::Medium);

        let last = second.recent(1).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].sentence, "a b");

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[test]
    fn unreadable_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incidents.jsonl");
        std::fs::write(&path, "garbage\n").unwrap();
        let log = JsonlIncidentLog::new(&path);
        log.append(&ToxicIncident::from_match("m", "x", &verdict(&["x"]), Utc::now()))
            .unwrap();
        assert_eq!(log.recent(10).unwrap().len(), 1);
    }
}
