use crate::StoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            retry_delay: Duration::from_millis(50),
        }
    }
}

/// Exclusive advisory lock on a sidecar `<store>.lock` file.
///
/// The lock lives on a sidecar rather than the store itself because the
/// store is replaced by rename on every write.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    pub fn acquire(path: &Path, policy: LockPolicy) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let attempts = policy.attempts.max(1);
        for attempt in 1..=attempts {
            if file.try_lock_exclusive().is_ok() {
                let owner = format!("pid={}\n", std::process::id());
                file.set_len(0)?;
                file.write_all(owner.as_bytes())?;
                file.flush()?;
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }
            if attempt < attempts {
                tracing::debug!(
                    event = "store_lock_busy",
                    path = %path.display(),
                    attempt = attempt
                );
                thread::sleep(policy.retry_delay);
            }
        }

        Err(StoreError::LockTimeout {
            path: path.to_path_buf(),
            attempts,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub fn lock_path_for(store_path: &Path) -> PathBuf {
    let mut name = store_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    store_path.with_file_name(name)
}
