use recall_core::{LessonId, Tier};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

mod checkpoints;
mod decay_state;
mod lessons;
mod lock;

pub use checkpoints::{
    Checkpoint, CheckpointEntry, CheckpointStore, CleanupPolicy, CleanupReport,
};
pub use decay_state::DecayStateFile;
pub use lessons::{LessonFilter, LessonPatch, LessonStore, StoreGuard};
pub use lock::{lock_path_for, LockPolicy, StoreLock};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lesson {0} not found")]
    NotFound(LessonId),
    #[error("lesson {id} does not belong to the {tier} tier")]
    TierMismatch { id: LessonId, tier: Tier },
    #[error("store lock {} still busy after {attempts} attempts", .path.display())]
    LockTimeout { path: PathBuf, attempts: u32 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Replaces `path` with `contents` through a temp file in the same
/// directory, so readers see either the old or the new file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_nanos())
        .unwrap_or_default();
    let tmp_path = parent.join(format!(".{file_name}.{}.{nonce}.tmp", std::process::id()));

    let result = (|| -> Result<(), std::io::Error> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if let Err(err) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_creates_parents_and_leaves_no_temp_files() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a").join("b").join("LESSONS.md");

        write_atomic(&path, b"first").expect("write first");
        write_atomic(&path, b"second").expect("write second");

        assert_eq!(fs::read_to_string(&path).expect("read"), "second");
        let entries: Vec<_> = fs::read_dir(path.parent().expect("parent"))
            .expect("list")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["LESSONS.md".to_string()]);
    }

    #[test]
    fn atomic_write_fails_cleanly_when_target_is_a_directory() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("occupied");
        fs::create_dir_all(target.join("child")).expect("dir");

        let err = write_atomic(&target, b"data").expect_err("rename over dir");
        assert!(matches!(err, StoreError::Io(_)));
        let leftovers = fs::read_dir(dir.path())
            .expect("list")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
