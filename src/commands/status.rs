use crate::core::JobStateStore;
use crate::error::StatusError;
use crate::models::{Config, JobRunState};

/// Show a job's status record
pub fn show_status(config: &Config, job_id: &str) -> Result<JobRunState, StatusError> {
    let store = JobStateStore::new(&config.job_dir(job_id));
    let state = store.load()?;

    println!("Job {}: {}", job_id, state.status.as_str().to_uppercase());
    if let Some(code) = state.exit_code {
        println!("  exit code:   {}", code);
    }
    if let Some(finished_at) = state.finished_at {
        println!("  finished at: {}", finished_at.to_rfc3339());
    }
    if let Some(disk_usage) = &state.disk_usage {
        println!("  disk usage:  {}", disk_usage);
    }
    if !state.status.is_complete() {
        println!("  (still running)");
    }

    Ok(state)
}
