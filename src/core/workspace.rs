use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::core::atomic::write_json_atomic;
use crate::core::lock::FileLockProvider;
use crate::error::{ConfigurationError, RunnerError};
use crate::models::{CodebaseMeta, Config, JobSpec, WorkspaceLayout};

/// Metadata record marking a directory as a codebase
pub const CODEBASE_META_FILE: &str = "codebase.json";

/// Directory under the workspaces root holding per-codebase lock files
const LOCKS_DIR: &str = ".locks";

/// A resolved working tree and the lock that guards it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Codebase id, or `None` for a job-private tree
    pub codebase_id: Option<String>,
    pub root: PathBuf,
    /// Lock key within `lock_dir`
    pub lock_key: String,
    pub lock_dir: PathBuf,
}

impl Workspace {
    pub fn lock_provider(&self) -> FileLockProvider {
        FileLockProvider::new(&self.lock_dir)
    }

    pub fn meta_path(&self) -> Option<PathBuf> {
        self.codebase_id
            .as_ref()
            .map(|_| self.root.join(CODEBASE_META_FILE))
    }

    /// Human-readable name for log lines
    pub fn label(&self) -> &str {
        self.codebase_id.as_deref().unwrap_or("job-private workspace")
    }
}

/// A codebase directory found under the workspaces root
#[derive(Debug, Clone)]
pub struct CodebaseListing {
    pub id: String,
    pub path: PathBuf,
    /// `None` when the metadata record exists but can't be parsed
    pub meta: Option<CodebaseMeta>,
}

/// Resolves codebase ids to directories and maintains their metadata
pub struct WorkspaceManager {
    workspaces_root: PathBuf,
    jobs_root: PathBuf,
    layout: WorkspaceLayout,
}

impl WorkspaceManager {
    pub fn new(config: &Config) -> Self {
        Self {
            workspaces_root: config.paths.workspaces_root.clone(),
            jobs_root: config.paths.jobs_root.clone(),
            layout: config.workspace.layout,
        }
    }

    pub fn workspaces_root(&self) -> &Path {
        &self.workspaces_root
    }

    /// Map a job onto its working tree without touching the filesystem.
    ///
    /// Reuse modes fail here, before any lock is taken or command runs, when
    /// the workspace doesn't exist yet.
    pub fn resolve(&self, spec: &JobSpec) -> Result<Workspace, ConfigurationError> {
        let workspace = match (&spec.codebase_id, self.layout) {
            (Some(id), WorkspaceLayout::Shared) => Workspace {
                codebase_id: Some(id.clone()),
                root: self.workspaces_root.join(id),
                lock_key: id.clone(),
                lock_dir: self.workspaces_root.join(LOCKS_DIR),
            },
            _ => {
                let job_dir = self.jobs_root.join(&spec.job_id);
                Workspace {
                    codebase_id: None,
                    root: job_dir.join("work"),
                    lock_key: ".workspace".to_string(),
                    lock_dir: job_dir,
                }
            }
        };

        if spec.mode.reuses_workspace() {
            let exists = match workspace.meta_path() {
                Some(meta) => workspace.root.is_dir() && meta.is_file(),
                None => workspace.root.is_dir(),
            };
            if !exists {
                return Err(ConfigurationError::MissingCodebase {
                    id: workspace.label().to_string(),
                    root: self.workspaces_root.clone(),
                    available: self.available_ids(),
                });
            }
        }

        debug!("Resolved {} to {}", workspace.label(), workspace.root.display());
        Ok(workspace)
    }

    /// Create the directory and metadata record on first use and refresh
    /// `last_used_at`. Call only while holding the workspace lock.
    ///
    /// Returns `true` when this call created the workspace, i.e. nothing has
    /// been checked out into it yet.
    pub fn prepare(&self, workspace: &Workspace, owner: &str, job_id: &str) -> Result<bool, RunnerError> {
        let existed = workspace.root.is_dir();
        fs::create_dir_all(&workspace.root)?;
        let Some(meta_path) = workspace.meta_path() else {
            return Ok(!existed);
        };
        let id = workspace.label();

        let (mut meta, created) = match fs::read_to_string(&meta_path) {
            Ok(content) => match serde_json::from_str::<CodebaseMeta>(&content) {
                Ok(meta) => (meta, false),
                Err(e) => {
                    warn!("Rewriting unparsable codebase metadata {}: {}", meta_path.display(), e);
                    (CodebaseMeta::new(id, owner), false)
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("Creating codebase `{}` at {}", id, workspace.root.display());
                (CodebaseMeta::new(id, owner), true)
            }
            Err(e) => return Err(e.into()),
        };
        meta.touch(job_id);
        write_json_atomic(&meta_path, &meta)?;
        Ok(created)
    }

    /// Codebases that carry a metadata record, sorted by id
    pub fn list_codebases(&self) -> io::Result<Vec<CodebaseListing>> {
        let mut codebases = Vec::new();
        let entries = match fs::read_dir(&self.workspaces_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(codebases),
            Err(e) => return Err(e),
        };

        for entry in entries {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let meta_path = path.join(CODEBASE_META_FILE);
            if !meta_path.is_file() {
                continue;
            }
            let Some(id) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let meta = fs::read_to_string(&meta_path)
                .ok()
                .and_then(|content| serde_json::from_str(&content).ok());
            codebases.push(CodebaseListing { id, path, meta });
        }

        codebases.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(codebases)
    }

    /// Ids of existing codebases, for diagnostics
    pub fn available_ids(&self) -> Vec<String> {
        self.list_codebases()
            .map(|list| list.into_iter().map(|c| c.id).collect())
            .unwrap_or_default()
    }
}

/// Directory a stage should start in given the recipe's relative `workdir`
pub fn validate_workdir(root: &Path, workdir: Option<&Path>) -> Result<PathBuf, ConfigurationError> {
    match workdir {
        None => Ok(root.to_path_buf()),
        Some(workdir) => {
            let dir = root.join(workdir);
            if dir.is_dir() {
                Ok(dir)
            } else {
                Err(ConfigurationError::WorkdirMissing {
                    workdir: workdir.to_path_buf(),
                    root: root.to_path_buf(),
                })
            }
        }
    }
}
