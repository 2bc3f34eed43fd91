use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse outcome of a job as seen by pollers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Enqueued but the runner has not started
    Pending,
    /// Runner process is executing stages
    Running,
    /// Runner finished with exit code 0
    Success,
    /// Runner finished with a non-zero exit code
    Failed,
}

impl JobStatus {
    /// Check if this status indicates the job is complete
    pub fn is_complete(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    pub fn from_exit_code(exit_code: i32) -> Self {
        if exit_code == 0 {
            JobStatus::Success
        } else {
            JobStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }
}

/// Small status record written to `status.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRunState {
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_usage: Option<String>,
}

impl JobRunState {
    /// State written before any stage runs
    pub fn running() -> Self {
        Self {
            status: JobStatus::Running,
            exit_code: None,
            finished_at: None,
            disk_usage: None,
        }
    }

    /// Terminal state for an exit code
    pub fn finished(exit_code: i32, disk_usage: String) -> Self {
        Self {
            status: JobStatus::from_exit_code(exit_code),
            exit_code: Some(exit_code),
            finished_at: Some(Utc::now()),
            disk_usage: Some(disk_usage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_is_complete() {
        assert!(JobStatus::Success.is_complete());
        assert!(JobStatus::Failed.is_complete());
        assert!(!JobStatus::Pending.is_complete());
        assert!(!JobStatus::Running.is_complete());
    }

    #[test]
    fn test_status_from_exit_code() {
        assert_eq!(JobStatus::from_exit_code(0), JobStatus::Success);
        assert_eq!(JobStatus::from_exit_code(2), JobStatus::Failed);
        assert_eq!(JobStatus::from_exit_code(-9), JobStatus::Failed);
    }

    #[test]
    fn test_running_state_serialization() {
        let json = serde_json::to_string(&JobRunState::running()).unwrap();
        assert!(json.contains("\"status\":\"running\""));
        assert!(json.contains("\"exit_code\":null"));
        assert!(json.contains("\"finished_at\":null"));
        assert!(!json.contains("disk_usage"));
    }

    #[test]
    fn test_finished_state_roundtrip() {
        let state = JobRunState::finished(1, "1.2G".to_string());
        assert_eq!(state.status, JobStatus::Failed);
        let json = serde_json::to_string(&state).unwrap();
        let parsed: JobRunState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}
