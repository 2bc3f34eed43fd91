use chrono::Utc;
use nix::sys::signal::Signal;
use std::io;
use std::path::{Path, PathBuf};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use crate::core::{load_job, try_job_lock, validate_job_id, BuildLog, JobRun, JobStateStore, WorkspaceManager};
use crate::error::{RunnerError, EXIT_CONFIG, EXIT_INTERNAL};
use crate::models::Config;

/// Termination signals the runner turns into a finalized failure
pub struct TerminationSignals {
    term: tokio::signal::unix::Signal,
    int: tokio::signal::unix::Signal,
    hup: tokio::signal::unix::Signal,
}

impl TerminationSignals {
    /// Install handlers. Do this before the job is marked running so an early
    /// signal can't leave the status stuck.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            term: signal(SignalKind::terminate())?,
            int: signal(SignalKind::interrupt())?,
            hup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next signal and return its number
    pub async fn recv(&mut self) -> i32 {
        let received = tokio::select! {
            _ = self.term.recv() => Signal::SIGTERM,
            _ = self.int.recv() => Signal::SIGINT,
            _ = self.hup.recv() => Signal::SIGHUP,
        };
        warn!("Received {}; stopping the job", received);
        received as i32
    }
}

/// Run one job end to end and return the process exit code.
///
/// Every path past the job lock goes through [`JobStateStore::finish`]
/// exactly once, including termination by signal.
pub async fn run_job(config: &Config, job_id: &str) -> i32 {
    run_job_with(config, job_id, |_| {}).await
}

/// [`run_job`], handing the build log to `attach_log` once this runner owns
/// the job. A duplicate invocation never sees the log.
pub async fn run_job_with<F>(config: &Config, job_id: &str, attach_log: F) -> i32
where
    F: FnOnce(&BuildLog),
{
    if let Err(e) = validate_job_id(job_id) {
        error!("{}", e);
        return EXIT_CONFIG;
    }
    let job_dir = config.job_dir(job_id);
    if !job_dir.is_dir() {
        error!("Job directory {} does not exist", job_dir.display());
        return EXIT_CONFIG;
    }

    let _job_lock = match try_job_lock(&job_dir) {
        Ok(Some(guard)) => guard,
        Ok(None) => {
            info!("Job {} is already running under another runner; nothing to do", job_id);
            return 0;
        }
        Err(e) => {
            error!("Failed to take the job lock in {}: {}", job_dir.display(), e);
            return EXIT_INTERNAL;
        }
    };

    let mut signals = match TerminationSignals::install() {
        Ok(signals) => signals,
        Err(e) => {
            error!("Failed to install signal handlers: {}", e);
            return EXIT_INTERNAL;
        }
    };
    let log = match BuildLog::open(&job_dir) {
        Ok(log) => log,
        Err(e) => {
            error!("Failed to open the build log in {}: {}", job_dir.display(), e);
            return EXIT_INTERNAL;
        }
    };

    attach_log(&log);
    let banner = format!(
        "==> autobuild job {} (pid {}) at {}",
        job_id,
        std::process::id(),
        Utc::now().to_rfc3339()
    );
    if let Err(e) = log.line(&banner) {
        warn!("Failed to write to {}: {}", log.path().display(), e);
    }

    let store = JobStateStore::new(&job_dir);
    if let Err(e) = store.start() {
        error!("Failed to mark job {} running: {}", job_id, e);
        // The status record may already say running; close it out.
        if let Err(e) = store.finish(EXIT_INTERNAL, None).await {
            error!("Failed to finalize job {}: {}", job_id, e);
        }
        return EXIT_INTERNAL;
    }
    info!("Starting job {} (pid {})", job_id, std::process::id());

    let mut workspace_root = None;
    let result = tokio::select! {
        result = execute(config, job_id, &job_dir, &log, &mut workspace_root) => result,
        signal = signals.recv() => Err(RunnerError::Terminated { signal }),
    };

    let exit_code = match &result {
        Ok(()) => 0,
        Err(e) => {
            error!("Job {} failed: {}", job_id, e);
            e.exit_code()
        }
    };

    match store.finish(exit_code, workspace_root.as_deref()).await {
        Ok(_) => exit_code,
        Err(e) => {
            error!("Failed to finalize job {}: {}", job_id, e);
            if exit_code == 0 {
                EXIT_INTERNAL
            } else {
                exit_code
            }
        }
    }
}

async fn execute(
    config: &Config,
    job_id: &str,
    job_dir: &Path,
    log: &BuildLog,
    workspace_root: &mut Option<PathBuf>,
) -> Result<(), RunnerError> {
    let spec = load_job(config, job_id)?;
    let manager = WorkspaceManager::new(config);
    let workspace = manager.resolve(&spec)?;
    *workspace_root = Some(workspace.root.clone());

    if let Some(note) = &spec.note {
        info!("Note: {}", note);
    }

    let run = JobRun {
        config,
        manager: &manager,
        job_dir,
        log,
    };
    run.execute(&spec, &workspace).await
}
