use chrono::{DateTime, NaiveDate, Utc};
use recall_core::{extract_citations, LessonId, Tier};
use recall_storage::{Checkpoint, CheckpointStore, LessonStore, StoreError};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

mod index;
mod transcript;

pub use index::TranscriptIndex;
pub use transcript::{normalize_jsonl, MessageRole, Transcript, TranscriptMessage};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackReport {
    pub scanned_messages: usize,
    pub cited: Vec<LessonId>,
    pub unknown: Vec<LessonId>,
    pub failed: Vec<LessonId>,
    pub skipped_corrupt_lines: usize,
    pub deferred_partial_line: bool,
    pub resumed_by_timestamp: bool,
    pub checkpoint_advanced: bool,
    pub transcript_unreadable: bool,
}

/// Where to resume scanning a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResumePoint {
    Start,
    AfterPosition(u64),
    AfterTimestamp(DateTime<Utc>),
}

impl ResumePoint {
    fn from_checkpoint(checkpoint: Option<&Checkpoint>, line_count: u64) -> Self {
        let Some(checkpoint) = checkpoint else {
            return Self::Start;
        };
        if checkpoint.position > 0 && checkpoint.position <= line_count {
            return Self::AfterPosition(checkpoint.position);
        }
        // Legacy checkpoint, or the transcript was rewritten shorter.
        match checkpoint.last_timestamp {
            Some(ts) => Self::AfterTimestamp(ts),
            None if checkpoint.position > line_count => Self::Start,
            None => Self::AfterPosition(checkpoint.position),
        }
    }

    fn includes(&self, message: &TranscriptMessage) -> bool {
        match self {
            Self::Start => true,
            Self::AfterPosition(position) => message.position > *position,
            Self::AfterTimestamp(ts) => message.timestamp.is_some_and(|value| value > *ts),
        }
    }
}

/// Detects lesson citations in a session transcript and credits them to the
/// matching tier store, advancing the session checkpoint every run.
pub struct CitationTracker<'a> {
    project: &'a LessonStore,
    system: &'a LessonStore,
    checkpoints: &'a CheckpointStore,
}

impl<'a> CitationTracker<'a> {
    pub fn new(
        project: &'a LessonStore,
        system: &'a LessonStore,
        checkpoints: &'a CheckpointStore,
    ) -> Self {
        Self {
            project,
            system,
            checkpoints,
        }
    }

    pub fn track_file(
        &self,
        session_id: &str,
        path: impl AsRef<Path>,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<TrackReport, TrackerError> {
        let path = path.as_ref();
        match fs::read(path) {
            Ok(bytes) => self.track(session_id, &normalize_jsonl(&bytes), today, now),
            Err(err) => {
                warn!(
                    event = "transcript_unreadable",
                    session_id = session_id,
                    path = %path.display(),
                    error = %err
                );
                Ok(TrackReport {
                    transcript_unreadable: true,
                    ..TrackReport::default()
                })
            }
        }
    }

    pub fn track(
        &self,
        session_id: &str,
        transcript: &Transcript,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<TrackReport, TrackerError> {
        let mut report = TrackReport {
            skipped_corrupt_lines: transcript.skipped_corrupt_lines,
            deferred_partial_line: transcript.deferred_partial_line,
            ..TrackReport::default()
        };

        if transcript.is_unparseable() {
            warn!(
                event = "transcript_unparseable",
                session_id = session_id,
                lines = transcript.line_count
            );
            report.transcript_unreadable = true;
            return Ok(report);
        }

        let previous = self.checkpoints.get(session_id)?;
        let resume = ResumePoint::from_checkpoint(previous.as_ref(), transcript.line_count);
        report.resumed_by_timestamp = matches!(resume, ResumePoint::AfterTimestamp(_));

        let mut cited = BTreeSet::new();
        let mut newest_ts = previous.as_ref().and_then(|cp| cp.last_timestamp);
        for message in transcript.messages.iter().filter(|m| resume.includes(m)) {
            report.scanned_messages += 1;
            if let Some(ts) = message.timestamp {
                newest_ts = Some(newest_ts.map_or(ts, |current| current.max(ts)));
            }
            if message.role == MessageRole::Assistant {
                cited.extend(extract_citations(&message.text));
            }
        }

        for id in cited {
            match self.store_for(id.tier).cite(id, today) {
                Ok(lesson) => {
                    debug!(event = "lesson_cited", id = %id, uses = lesson.uses);
                    report.cited.push(id);
                }
                Err(err) if err.is_not_found() => report.unknown.push(id),
                Err(err) => {
                    warn!(event = "lesson_cite_failed", id = %id, error = %err);
                    report.failed.push(id);
                }
            }
        }

        let position = match (previous.as_ref(), resume) {
            (Some(cp), ResumePoint::AfterPosition(_)) => cp.position.max(transcript.line_count),
            _ => transcript.line_count,
        };
        self.checkpoints.set(
            session_id,
            &Checkpoint {
                last_timestamp: newest_ts,
                position,
                updated_at: Some(now),
            },
        )?;
        report.checkpoint_advanced = true;

        Ok(report)
    }

    fn store_for(&self, tier: Tier) -> &LessonStore {
        match tier {
            Tier::Project => self.project,
            Tier::System => self.system,
        }
    }
}
