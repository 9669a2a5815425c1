use crate::{write_atomic, StoreError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CHECKPOINT_EXT: &str = "json";

/// How far citation tracking has read into one session's transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    #[serde(default)]
    pub last_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub position: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(checkpoint) = serde_json::from_str::<Checkpoint>(trimmed) {
            return Some(checkpoint);
        }
        // Older state files hold a bare timestamp.
        DateTime::parse_from_rfc3339(trimmed)
            .ok()
            .map(|ts| Checkpoint {
                last_timestamp: Some(ts.with_timezone(&Utc)),
                position: 0,
                updated_at: None,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    pub session_id: String,
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupPolicy {
    pub max_per_run: usize,
    pub min_orphan_age: Duration,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            max_per_run: 10,
            min_orphan_age: Duration::days(7),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub scanned: usize,
    pub orphaned: usize,
    pub removed: usize,
    pub too_young: usize,
    pub check_errors: usize,
    pub remove_errors: usize,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{CHECKPOINT_EXT}", file_stem_for(session_id)))
    }

    /// A missing or unreadable checkpoint reads as absent.
    pub fn get(&self, session_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let path = self.path_for(session_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let checkpoint = Checkpoint::parse(&raw);
        if checkpoint.is_none() {
            warn!(
                event = "checkpoint_malformed",
                path = %path.display(),
                session_id = session_id
            );
        }
        Ok(checkpoint)
    }

    pub fn set(&self, session_id: &str, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let payload = serde_json::to_string_pretty(checkpoint)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        write_atomic(&self.path_for(session_id), payload.as_bytes())
    }

    pub fn entries(&self) -> Result<Vec<CheckpointEntry>, StoreError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut entries = Vec::new();
        for entry in read_dir.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let Some(stem) = name.strip_suffix(&format!(".{CHECKPOINT_EXT}")) else {
                continue;
            };
            let Some(session_id) = session_id_for(stem) else {
                debug!(event = "checkpoint_name_unreadable", file = %name);
                continue;
            };
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            entries.push(CheckpointEntry {
                session_id,
                path: entry.path(),
                modified: DateTime::<Utc>::from(modified),
            });
        }
        entries.sort_by(|left, right| {
            left.modified
                .cmp(&right.modified)
                .then(left.session_id.cmp(&right.session_id))
        });
        Ok(entries)
    }

    pub fn latest_activity(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.entries()?.into_iter().map(|entry| entry.modified).max())
    }

    /// Removes checkpoints whose transcript is gone and that are older than
    /// the policy's minimum age, oldest first, at most `max_per_run` per
    /// call. A failed existence check keeps the checkpoint.
    pub fn cleanup<F>(
        &self,
        mut transcript_exists: F,
        policy: &CleanupPolicy,
        active_session: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CleanupReport, StoreError>
    where
        F: FnMut(&str) -> std::io::Result<bool>,
    {
        let mut report = CleanupReport::default();

        for entry in self.entries()? {
            if report.removed >= policy.max_per_run {
                break;
            }
            report.scanned += 1;

            if active_session == Some(entry.session_id.as_str()) {
                continue;
            }

            match transcript_exists(&entry.session_id) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    report.check_errors += 1;
                    warn!(
                        event = "checkpoint_orphan_check_failed",
                        session_id = %entry.session_id,
                        error = %err
                    );
                    continue;
                }
            }

            report.orphaned += 1;
            if now - entry.modified <= policy.min_orphan_age {
                report.too_young += 1;
                continue;
            }

            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    report.removed += 1;
                    debug!(event = "checkpoint_removed", session_id = %entry.session_id);
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    report.remove_errors += 1;
                    warn!(
                        event = "checkpoint_remove_failed",
                        path = %entry.path.display(),
                        error = %err
                    );
                }
            }
        }

        Ok(report)
    }
}

/// Reversible file name for a session id. Ids are opaque, so every byte
/// outside the URL-unreserved set is percent-escaped, a leading dot is
/// escaped so the file is never hidden, and the empty id becomes a lone `%`.
fn file_stem_for(session_id: &str) -> String {
    if session_id.is_empty() {
        return "%".to_string();
    }
    let encoded = urlencoding::encode(session_id);
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{rest}"),
        None => encoded.into_owned(),
    }
}

fn session_id_for(stem: &str) -> Option<String> {
    if stem == "%" {
        return Some(String::new());
    }
    urlencoding::decode(stem).ok().map(|id| id.into_owned())
}
