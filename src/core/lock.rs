//! Host-local advisory locks.
//!
//! A [`LockGuard`] holds the lock until it is dropped. File-backed locks are
//! also released by the kernel when the process exits, whatever the exit path.

use fs2::FileExt;
use std::any::Any;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{ConfigurationError, RunnerError};

/// Interval between attempts while waiting for a held lock
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Exclusive lock held until drop
pub struct LockGuard {
    key: String,
    _held: Box<dyn Any + Send + Sync>,
}

impl LockGuard {
    pub fn new(key: &str, held: Box<dyn Any + Send + Sync>) -> Self {
        Self {
            key: key.to_string(),
            _held: held,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// Source of exclusive locks keyed by name
pub trait LockProvider: Send + Sync {
    /// Try to take the lock once; `Ok(None)` means another holder has it
    fn try_acquire(&self, key: &str) -> io::Result<Option<LockGuard>>;
}

/// `flock`-style locks on `<dir>/<key>.lock`
#[derive(Debug, Clone)]
pub struct FileLockProvider {
    dir: PathBuf,
}

impl FileLockProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", key))
    }
}

impl LockProvider for FileLockProvider {
    fn try_acquire(&self, key: &str) -> io::Result<Option<LockGuard>> {
        fs::create_dir_all(&self.dir)?;
        let path = self.lock_path(key);
        // Don't truncate before holding the lock; the current holder's pid lives there.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                debug!("Lock {} is held by another process", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        write_holder_pid(&file)?;
        Ok(Some(LockGuard::new(key, Box::new(file))))
    }
}

fn write_holder_pid(file: &File) -> io::Result<()> {
    file.set_len(0)?;
    let mut file = file;
    writeln!(file, "{}", std::process::id())
}

/// Take the per-codebase lock, polling until `timeout` elapses.
///
/// A timeout is a configuration error naming the codebase, not a crash.
pub async fn acquire_with_timeout(
    provider: &dyn LockProvider,
    key: &str,
    timeout: Duration,
) -> Result<LockGuard, RunnerError> {
    let start = Instant::now();
    let mut announced = false;
    loop {
        if let Some(guard) = provider.try_acquire(key)? {
            if announced {
                info!("Acquired lock on codebase `{}` after {:.1}s", key, start.elapsed().as_secs_f64());
            }
            return Ok(guard);
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ConfigurationError::LockTimeout {
                codebase_id: key.to_string(),
                timeout_secs: timeout.as_secs(),
            }
            .into());
        }
        if !announced {
            info!(
                "Codebase `{}` is in use by another job; waiting up to {}s",
                key,
                timeout.as_secs()
            );
            announced = true;
        }
        tokio::time::sleep(LOCK_POLL_INTERVAL.min(timeout - elapsed)).await;
    }
}

/// Non-blocking per-job lock guarding against starting the same job twice
pub fn try_job_lock(job_dir: &Path) -> io::Result<Option<LockGuard>> {
    FileLockProvider::new(job_dir).try_acquire(".runner")
}
