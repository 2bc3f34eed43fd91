use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration loaded from autobuild.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
}

/// Filesystem roots shared with the web front end and queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// One directory per job id (spec, recipe, status, logs, artifacts)
    #[serde(default = "default_jobs_root")]
    pub jobs_root: PathBuf,
    /// Shared codebase workspaces
    #[serde(default = "default_workspaces_root")]
    pub workspaces_root: PathBuf,
    /// Per-user source-control tokens (`<owner>.token`)
    #[serde(default = "default_token_root")]
    pub token_root: PathBuf,
    /// Shared download/sstate cache configuration, included when present
    #[serde(default = "default_site_conf")]
    pub site_conf: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            jobs_root: default_jobs_root(),
            workspaces_root: default_workspaces_root(),
            token_root: default_token_root(),
            site_conf: default_site_conf(),
        }
    }
}

fn default_jobs_root() -> PathBuf {
    PathBuf::from("/srv/autobuild/jobs")
}

fn default_workspaces_root() -> PathBuf {
    PathBuf::from("/srv/autobuild/workspaces")
}

fn default_token_root() -> PathBuf {
    PathBuf::from("/srv/autobuild/tokens")
}

fn default_site_conf() -> Option<PathBuf> {
    Some(PathBuf::from("/srv/autobuild/site.conf"))
}

/// How stage command lines are executed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Shell used for `<shell> -c <line>`
    #[serde(default = "default_shell")]
    pub shell: String,
    /// How long to wait for another job holding the codebase lock
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_seconds: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            lock_timeout_seconds: default_lock_timeout(),
        }
    }
}

impl ExecutionConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_lock_timeout() -> u64 {
    3600
}

/// Where a job's working tree lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceLayout {
    /// `<workspaces_root>/<codebase_id>`, reused across jobs
    #[default]
    Shared,
    /// `<jobs_root>/<job_id>/work`, private to one job
    JobPrivate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub layout: WorkspaceLayout,
    /// Whether file edits and modify lines run before a build_only build
    #[serde(default = "default_edit_in_build_only")]
    pub edit_in_build_only: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            layout: WorkspaceLayout::default(),
            edit_in_build_only: default_edit_in_build_only(),
        }
    }
}

fn default_edit_in_build_only() -> bool {
    true
}

/// Artifact collection after the build stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Deploy-images directory, relative to the post-build working directory
    #[serde(default = "default_deploy_dir")]
    pub deploy_dir: PathBuf,
    /// File-name suffixes considered flashable images
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            deploy_dir: default_deploy_dir(),
            extensions: default_extensions(),
        }
    }
}

fn default_deploy_dir() -> PathBuf {
    PathBuf::from("tmp/deploy/images")
}

fn default_extensions() -> Vec<String> {
    vec!["static.mtd".to_string(), "static.mtd.tar".to_string()]
}

/// Command-line overrides applied on top of the file and environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub jobs_root: Option<PathBuf>,
    pub workspaces_root: Option<PathBuf>,
    pub lock_timeout: Option<u64>,
}

impl Config {
    /// Load config from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::ParseError(path.to_path_buf(), e))
    }

    /// Load the given file, or defaults when no file is configured
    pub fn load_optional(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Apply `AUTOBUILD_*` path variables from a lookup function
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty("AUTOBUILD_JOBS_ROOT") {
            self.paths.jobs_root = PathBuf::from(v);
        }
        if let Some(v) = non_empty("AUTOBUILD_WORKSPACES_ROOT") {
            self.paths.workspaces_root = PathBuf::from(v);
        }
        if let Some(v) = non_empty("AUTOBUILD_TOKEN_ROOT") {
            self.paths.token_root = PathBuf::from(v);
        }
        if let Some(v) = non_empty("AUTOBUILD_SITE_CONF") {
            self.paths.site_conf = Some(PathBuf::from(v));
        }
        self
    }

    /// Merge CLI overrides into the config
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(root) = overrides.jobs_root {
            self.paths.jobs_root = root;
        }
        if let Some(root) = overrides.workspaces_root {
            self.paths.workspaces_root = root;
        }
        if let Some(t) = overrides.lock_timeout {
            self.execution.lock_timeout_seconds = t;
        }
        self
    }

    /// Directory holding everything that belongs to one job
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.paths.jobs_root.join(job_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, std::io::Error),
    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, toml::de::Error),
}
