use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use recall_core::Tier;
use recall_engine::DecayConfig;
use recall_storage::{CheckpointStore, CleanupPolicy, DecayStateFile, LessonStore, LockPolicy};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const STORE_FILE: &str = "LESSONS.md";
pub const DATA_DIR: &str = ".recall";
pub const LEGACY_DATA_DIR: &str = ".coding-agent-lessons";
const SYSTEM_DIR: &str = "recall";
const LEGACY_SYSTEM_DIR: &str = "coding-agent-lessons";
const CHECKPOINT_DIR: &str = ".citation-state";
const DECAY_STATE_FILE: &str = ".decay-last-run";
const DEFAULTS_FILE: &str = "config.json";
const LOG_FILE: &str = "debug.log";

/// Tunables read from `<system root>/config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Defaults {
    pub decay_threshold_days: i64,
    pub inject_count: usize,
    pub cleanup_max_per_run: usize,
    pub cleanup_min_age_days: i64,
    pub lock_attempts: u32,
    pub lock_retry_ms: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            decay_threshold_days: recall_engine::decay::DEFAULT_DECAY_THRESHOLD_DAYS,
            inject_count: recall_engine::DEFAULT_INJECT_COUNT,
            cleanup_max_per_run: 10,
            cleanup_min_age_days: 7,
            lock_attempts: 10,
            lock_retry_ms: 50,
        }
    }
}

/// Command-line overrides that feed config resolution.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base: Option<PathBuf>,
    pub project: Option<PathBuf>,
    pub debug: bool,
}

#[derive(Debug, Clone)]
pub struct RecallConfig {
    pub enabled: bool,
    pub debug: bool,
    pub system_root: PathBuf,
    pub project_root: PathBuf,
    pub project_data_dir: PathBuf,
    pub state_dir: PathBuf,
    pub defaults: Defaults,
}

impl RecallConfig {
    pub fn from_env(overrides: &Overrides) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        Self::resolve(overrides, &cwd, |key| std::env::var(key).ok())
    }

    pub fn resolve(
        overrides: &Overrides,
        cwd: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let var = |key: &str| env(key).filter(|value| !value.trim().is_empty());

        let enabled = !var("RECALL_ENABLED").is_some_and(|value| is_falsy(&value));
        let debug = overrides.debug || var("RECALL_DEBUG").is_some_and(|value| is_truthy(&value));

        let system_root = overrides
            .base
            .clone()
            .or_else(|| var("RECALL_BASE").map(PathBuf::from))
            .or_else(|| var("LESSONS_BASE").map(PathBuf::from))
            .or_else(|| default_system_root(dirs::config_dir(), dirs::home_dir()))
            .context("Cannot determine a system lesson directory; set RECALL_BASE")?;

        let project_root = overrides
            .project
            .clone()
            .or_else(|| var("RECALL_PROJECT_DIR").map(PathBuf::from))
            .unwrap_or_else(|| find_project_root(cwd));
        let project_data_dir = project_data_dir(&project_root);

        let state_dir = var("RECALL_STATE")
            .map(PathBuf::from)
            .or_else(|| {
                dirs::state_dir()
                    .or_else(dirs::data_local_dir)
                    .map(|dir| dir.join("recall"))
            })
            .unwrap_or_else(|| system_root.join("state"));

        let defaults = if enabled {
            load_defaults(&system_root.join(DEFAULTS_FILE))
        } else {
            Defaults::default()
        };

        Ok(Self {
            enabled,
            debug,
            system_root,
            project_root,
            project_data_dir,
            state_dir,
            defaults,
        })
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            attempts: self.defaults.lock_attempts.max(1),
            retry_delay: Duration::from_millis(self.defaults.lock_retry_ms),
        }
    }

    pub fn system_store(&self) -> LessonStore {
        LessonStore::new(Tier::System, self.system_root.join(STORE_FILE))
            .with_lock_policy(self.lock_policy())
    }

    pub fn project_store(&self) -> LessonStore {
        LessonStore::new(Tier::Project, self.project_data_dir.join(STORE_FILE))
            .with_lock_policy(self.lock_policy())
    }

    pub fn store_for(&self, tier: Tier) -> LessonStore {
        match tier {
            Tier::System => self.system_store(),
            Tier::Project => self.project_store(),
        }
    }

    pub fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(self.system_root.join(CHECKPOINT_DIR))
    }

    pub fn decay_state(&self) -> DecayStateFile {
        DecayStateFile::new(self.system_root.join(DECAY_STATE_FILE))
    }

    pub fn decay_config(&self, threshold_days: Option<i64>, force: bool) -> DecayConfig {
        DecayConfig {
            threshold_days: threshold_days.unwrap_or(self.defaults.decay_threshold_days),
            force,
            ..DecayConfig::default()
        }
    }

    pub fn cleanup_policy(&self, max_per_run: Option<usize>) -> CleanupPolicy {
        CleanupPolicy {
            max_per_run: max_per_run.unwrap_or(self.defaults.cleanup_max_per_run),
            min_orphan_age: ChronoDuration::days(self.defaults.cleanup_min_age_days),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.state_dir.join(LOG_FILE)
    }
}

fn load_defaults(path: &Path) -> Defaults {
    let Ok(content) = fs::read_to_string(path) else {
        return Defaults::default();
    };
    match serde_json::from_str::<Defaults>(&content) {
        Ok(defaults) => defaults,
        Err(err) => {
            eprintln!("Warning: failed to parse {}: {}", path.display(), err);
            Defaults::default()
        }
    }
}

/// `<config dir>/recall`, unless only an older `~/.config/coding-agent-lessons`
/// install exists.
fn default_system_root(config_dir: Option<PathBuf>, home: Option<PathBuf>) -> Option<PathBuf> {
    let current = config_dir.as_ref().map(|dir| dir.join(SYSTEM_DIR));
    if current.as_ref().is_some_and(|dir| dir.is_dir()) {
        return current;
    }
    let legacy = [
        config_dir.map(|dir| dir.join(LEGACY_SYSTEM_DIR)),
        home.map(|dir| dir.join(".config").join(LEGACY_SYSTEM_DIR)),
    ]
    .into_iter()
    .flatten()
    .find(|dir| dir.is_dir());
    legacy.or(current)
}

fn find_project_root(cwd: &Path) -> PathBuf {
    cwd.ancestors()
        .find(|dir| dir.join(".git").exists())
        .unwrap_or(cwd)
        .to_path_buf()
}

fn project_data_dir(project_root: &Path) -> PathBuf {
    let current = project_root.join(DATA_DIR);
    if current.is_dir() {
        return current;
    }
    let legacy = project_root.join(LEGACY_DATA_DIR);
    if legacy.is_dir() {
        return legacy;
    }
    current
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn is_falsy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}
