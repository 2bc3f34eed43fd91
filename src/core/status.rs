use chrono::Utc;
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::atomic::write_json_atomic;
use crate::core::parser::JOB_SPEC_FILE;
use crate::error::StatusError;
use crate::models::{JobRunState, JobStatus};

/// Small status record polled by the queue
pub const STATUS_FILE: &str = "status.json";

/// Recorded when `du` can't measure the workspace
pub const DISK_USAGE_UNAVAILABLE: &str = "unavailable";

/// Upper bound on measuring the workspace before the terminal status is written
pub const DISK_USAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Status record and job metadata writer for one job directory
pub struct JobStateStore {
    status_file: PathBuf,
    metadata_file: PathBuf,
}

impl JobStateStore {
    pub fn new(job_dir: &Path) -> Self {
        Self {
            status_file: job_dir.join(STATUS_FILE),
            metadata_file: job_dir.join(JOB_SPEC_FILE),
        }
    }

    pub fn status_file(&self) -> &Path {
        &self.status_file
    }

    /// Read the current status record
    pub fn load(&self) -> Result<JobRunState, StatusError> {
        let content = fs::read_to_string(&self.status_file)
            .map_err(|e| StatusError::ReadError(self.status_file.clone(), e))?;
        serde_json::from_str(&content)
            .map_err(|e| StatusError::ParseError(self.status_file.clone(), e.to_string()))
    }

    /// Mark the job running before any stage executes
    pub fn start(&self) -> Result<(), StatusError> {
        let state = JobRunState::running();
        self.save(&state)?;

        let pid = std::process::id();
        self.update_metadata(|meta| {
            meta.insert("status".into(), JobStatus::Running.as_str().into());
            meta.insert("exit_code".into(), Value::Null);
            meta.insert("finished_at".into(), Value::Null);
            meta.insert("started_at".into(), Utc::now().to_rfc3339().into());
            meta.insert("runner_pid".into(), pid.into());
        })?;

        info!("Job marked running (pid {})", pid);
        Ok(())
    }

    /// Write the terminal outcome to both records. Called once per run.
    pub async fn finish(&self, exit_code: i32, workspace: Option<&Path>) -> Result<JobRunState, StatusError> {
        let disk_usage = match workspace {
            Some(root) => disk_usage(root, DISK_USAGE_TIMEOUT).await,
            None => DISK_USAGE_UNAVAILABLE.to_string(),
        };
        let state = JobRunState::finished(exit_code, disk_usage);
        self.save(&state)?;

        self.update_metadata(|meta| {
            let status = state.status.as_str();
            meta.insert("status".into(), status.into());
            meta.insert("exit_code".into(), exit_code.into());
            meta.insert(
                "finished_at".into(),
                state.finished_at.map(|t| t.to_rfc3339()).into(),
            );
            meta.insert("disk_usage".into(), state.disk_usage.clone().into());
            meta.insert("is_pruned".into(), false.into());
            meta.remove("runner_pid");
            if let Some(Value::Object(snapshot)) = meta.get_mut("snapshot") {
                snapshot.insert("status".into(), status.into());
            }
        })?;

        info!(
            "Job finished: status={} exit_code={} disk_usage={}",
            state.status.as_str(),
            exit_code,
            state.disk_usage.as_deref().unwrap_or(DISK_USAGE_UNAVAILABLE)
        );
        Ok(state)
    }

    fn save(&self, state: &JobRunState) -> Result<(), StatusError> {
        write_json_atomic(&self.status_file, state)
            .map_err(|e| StatusError::WriteError(self.status_file.clone(), e))?;
        debug!("Saved {}", self.status_file.display());
        Ok(())
    }

    /// Mutate `job.json` in place, keeping every key owned by collaborators.
    /// A missing or unreadable record is logged and left alone.
    fn update_metadata<F>(&self, update: F) -> Result<(), StatusError>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let content = match fs::read_to_string(&self.metadata_file) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("No metadata record at {}; skipping", self.metadata_file.display());
                return Ok(());
            }
            Err(e) => return Err(StatusError::ReadError(self.metadata_file.clone(), e)),
        };
        let mut meta = match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(meta)) => meta,
            _ => {
                warn!(
                    "Metadata record {} is not a JSON object; leaving it untouched",
                    self.metadata_file.display()
                );
                return Ok(());
            }
        };

        update(&mut meta);
        write_json_atomic(&self.metadata_file, &meta)
            .map_err(|e| StatusError::WriteError(self.metadata_file.clone(), e))
    }
}

/// Human-readable size of `root` via `du -sh`, or "unavailable" when `du`
/// fails or takes longer than `timeout`
pub async fn disk_usage(root: &Path, timeout: Duration) -> String {
    let measure = tokio::process::Command::new("du")
        .arg("-sh")
        .arg(root)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = match tokio::time::timeout(timeout, measure).await {
        Ok(output) => output,
        Err(_) => {
            warn!("du did not finish within {}s for {}", timeout.as_secs(), root.display());
            return DISK_USAGE_UNAVAILABLE.to_string();
        }
    };

    match output {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .next()
            .map(str::to_string)
            .unwrap_or_else(|| DISK_USAGE_UNAVAILABLE.to_string()),
        Ok(output) => {
            warn!("du failed for {}: {}", root.display(), output.status);
            DISK_USAGE_UNAVAILABLE.to_string()
        }
        Err(e) => {
            warn!("Could not run du for {}: {}", root.display(), e);
            DISK_USAGE_UNAVAILABLE.to_string()
        }
    }
}
