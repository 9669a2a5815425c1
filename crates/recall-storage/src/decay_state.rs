use crate::{write_atomic, StoreError};
use chrono::{DateTime, TimeZone, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Timestamp of the last decay run, persisted as epoch seconds.
#[derive(Debug, Clone)]
pub struct DecayStateFile {
    path: PathBuf,
}

impl DecayStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when decay has never run or the file cannot be parsed.
    pub fn last_run(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let parsed = parse_timestamp(raw.trim());
        if parsed.is_none() {
            tracing::warn!(
                event = "decay_state_malformed",
                path = %self.path.display()
            );
        }
        Ok(parsed)
    }

    pub fn record(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        write_atomic(&self.path, format!("{}\n", now.timestamp()).as_bytes())
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(secs) = raw.parse::<i64>() {
        return Utc.timestamp_opt(secs, 0).single();
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
