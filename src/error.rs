use std::path::PathBuf;
use thiserror::Error;

use crate::models::ConfigError;

/// Exit code for every configuration error (bad recipe, spec, credential, lock timeout)
pub const EXIT_CONFIG: i32 = 2;

/// Exit code for internal failures of the runner itself (I/O on its own records)
pub const EXIT_INTERNAL: i32 = 1;

/// Main error type for the job runner
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigurationError),

    #[error("Stage {stage} failed: `{command}` exited with code {exit_code}")]
    Execution {
        stage: String,
        command: String,
        exit_code: i32,
    },

    #[error("Terminated by signal {signal}")]
    Terminated { signal: i32 },

    #[error("Status file error: {0}")]
    Status(#[from] StatusError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Process exit code reported for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RunnerError::Config(_) => EXIT_CONFIG,
            RunnerError::Execution { exit_code, .. } => *exit_code,
            RunnerError::Terminated { signal } => 128 + signal,
            RunnerError::Status(_) | RunnerError::Io(_) => EXIT_INTERNAL,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, RunnerError::Config(_))
    }
}

/// Fatal, never-retried errors in the job's declarative inputs or environment
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("{0}")]
    Settings(#[from] ConfigError),

    #[error("Failed to read {0}: {1}")]
    ReadError(PathBuf, std::io::Error),

    #[error("Missing {what}: {path}")]
    MissingDocument { what: &'static str, path: PathBuf },

    #[error("Malformed document {0}: {1}")]
    Syntax(PathBuf, String),

    #[error("Invalid value for `{field}` in {path}: {reason}")]
    InvalidField {
        path: PathBuf,
        field: String,
        reason: String,
    },

    #[error("Unsupported field `{field}` in {path}")]
    UnsupportedField { path: PathBuf, field: String },

    #[error("Retired field `{field}` in {path}: {hint}")]
    RetiredField {
        path: PathBuf,
        field: String,
        hint: &'static str,
    },

    #[error("Invalid mode `{0}` (expected full, clone_only, build_only or edit_only)")]
    InvalidMode(String),

    #[error("Invalid job id `{0}`: must match [A-Za-z0-9._-]+")]
    InvalidJobId(String),

    #[error("Invalid codebase id `{0}`: must match [A-Za-z0-9._-]+ without path traversal")]
    InvalidCodebaseId(String),

    #[error("Mode {mode} requires a non-empty {stage} block")]
    MissingStageLines { mode: String, stage: &'static str },

    #[error("Mode {mode} requires a codebase_id")]
    CodebaseRequired { mode: String },

    #[error("Mode edit_only has nothing to do: no file_edits and no modify_block lines")]
    NothingToEdit,

    #[error("Codebase `{id}` not found under {root} (available: {})", format_available(.available))]
    MissingCodebase {
        id: String,
        root: PathBuf,
        available: Vec<String>,
    },

    #[error("Workdir `{workdir}` does not exist under {root}")]
    WorkdirMissing { workdir: PathBuf, root: PathBuf },

    #[error("Unsafe path `{path}`: {reason}")]
    UnsafePath { path: String, reason: &'static str },

    #[error("No source-control token for user {owner} at {path}")]
    MissingCredential { owner: String, path: PathBuf },

    #[error("Source-control token for user {owner} at {path} is empty")]
    EmptyCredential { owner: String, path: PathBuf },

    #[error("Job spec has no owner (set `owner` or `created_by`)")]
    MissingOwner,

    #[error("Timed out after {timeout_secs}s waiting for the lock on codebase `{codebase_id}`")]
    LockTimeout {
        codebase_id: String,
        timeout_secs: u64,
    },
}

fn format_available(available: &[String]) -> String {
    if available.is_empty() {
        "none".to_string()
    } else {
        available.join(", ")
    }
}

/// Errors related to status and metadata record operations
#[derive(Error, Debug)]
pub enum StatusError {
    #[error("Failed to read status file {0}: {1}")]
    ReadError(PathBuf, std::io::Error),

    #[error("Failed to write status file {0}: {1}")]
    WriteError(PathBuf, std::io::Error),

    #[error("Failed to parse status file {0}: {1}")]
    ParseError(PathBuf, String),
}

pub type Result<T> = std::result::Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_map_to_config_exit_code() {
        let error = RunnerError::from(ConfigurationError::InvalidMode("fast".to_string()));
        assert_eq!(error.exit_code(), EXIT_CONFIG);
        assert!(error.is_config());
    }

    #[test]
    fn test_execution_error_propagates_child_code() {
        let error = RunnerError::Execution {
            stage: "build".to_string(),
            command: "bitbake image".to_string(),
            exit_code: 7,
        };
        assert_eq!(error.exit_code(), 7);
        assert!(!error.is_config());
    }

    #[test]
    fn test_terminated_exit_code() {
        assert_eq!(RunnerError::Terminated { signal: 15 }.exit_code(), 143);
    }

    #[test]
    fn test_missing_codebase_lists_siblings() {
        let error = ConfigurationError::MissingCodebase {
            id: "demo".to_string(),
            root: PathBuf::from("/srv/ws"),
            available: vec!["alpha".to_string(), "beta".to_string()],
        };
        let message = error.to_string();
        assert!(message.contains("demo"));
        assert!(message.contains("alpha, beta"));

        let empty = ConfigurationError::MissingCodebase {
            id: "demo".to_string(),
            root: PathBuf::from("/srv/ws"),
            available: vec![],
        };
        assert!(empty.to_string().contains("available: none"));
    }

    #[test]
    fn test_lock_timeout_message_names_codebase() {
        let error = ConfigurationError::LockTimeout {
            codebase_id: "demo".to_string(),
            timeout_secs: 5,
        };
        let message = error.to_string();
        assert!(message.contains("demo"));
        assert!(message.contains("5s"));
    }
}
