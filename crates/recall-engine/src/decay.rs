use crate::EngineError;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use recall_core::LessonDocument;
use recall_storage::{CheckpointStore, DecayStateFile, LessonStore};
use tracing::{info, warn};

pub const DECAY_INTERVAL_DAYS: i64 = 7;
pub const DEFAULT_DECAY_THRESHOLD_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecayConfig {
    pub threshold_days: i64,
    pub interval: Duration,
    /// Skip the interval gate. The activity gate still applies.
    pub force: bool,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            threshold_days: DEFAULT_DECAY_THRESHOLD_DAYS,
            interval: Duration::days(DECAY_INTERVAL_DAYS),
            force: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecayOutcome {
    /// The last run was too recent; nothing was touched.
    NotDue { next_due: DateTime<Utc> },
    /// No session activity since the last run; only the run was recorded.
    Idle,
    Applied { decayed: usize, failed_stores: usize },
}

impl DecayOutcome {
    pub fn decayed(&self) -> usize {
        match self {
            Self::Applied { decayed, .. } => *decayed,
            _ => 0,
        }
    }
}

/// Time and activity gated decay over every given store.
///
/// Activity means some checkpoint was written after the last run. With no
/// previous run, any existing checkpoint counts as activity.
pub fn maybe_decay(
    stores: &[&LessonStore],
    state: &DecayStateFile,
    checkpoints: &CheckpointStore,
    config: &DecayConfig,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<DecayOutcome, EngineError> {
    let last_run = state.last_run()?;

    if let Some(last_run) = last_run {
        let next_due = last_run + config.interval;
        if !config.force && now < next_due {
            return Ok(DecayOutcome::NotDue { next_due });
        }
    }

    let latest_activity = checkpoints.latest_activity()?;
    let active = match (last_run, latest_activity) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(last_run), Some(activity)) => activity > last_run,
    };
    if !active {
        state.record(now)?;
        info!(event = "decay_skipped_idle", last_run = ?last_run);
        return Ok(DecayOutcome::Idle);
    }

    let mut decayed = 0;
    let mut failed_stores = 0;
    for store in stores {
        match decay_store(store, config.threshold_days, today) {
            Ok(count) => decayed += count,
            Err(err) => {
                failed_stores += 1;
                warn!(
                    event = "decay_store_failed",
                    path = %store.path().display(),
                    error = %err
                );
            }
        }
    }

    state.record(now)?;
    info!(event = "decay_applied", decayed = decayed, failed_stores = failed_stores);
    Ok(DecayOutcome::Applied {
        decayed,
        failed_stores,
    })
}

/// Decrements `uses` on records unused for more than `threshold_days`,
/// never below 1. Returns how many records changed.
pub fn decay_document(document: &mut LessonDocument, threshold_days: i64, today: NaiveDate) -> usize {
    let mut changed = 0;
    for lesson in &mut document.lessons {
        let idle_days = (today - lesson.last_used).num_days();
        if idle_days > threshold_days && lesson.uses > 1 {
            lesson.uses -= 1;
            changed += 1;
        }
    }
    changed
}

fn decay_store(
    store: &LessonStore,
    threshold_days: i64,
    today: NaiveDate,
) -> Result<usize, EngineError> {
    if !store.exists() {
        return Ok(0);
    }
    let guard = store.lock()?;
    let mut document = guard.read()?;
    let changed = decay_document(&mut document, threshold_days, today);
    if changed > 0 {
        guard.write(&document)?;
    }
    Ok(changed)
}
