//! Staged executor and the locked job pipeline around it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::core::artifacts::{collect_artifacts, ARTIFACTS_DIR};
use crate::core::credentials::Credentials;
use crate::core::file_edit::apply_file_edit;
use crate::core::lock::acquire_with_timeout;
use crate::core::log::BuildLog;
use crate::core::workspace::{validate_workdir, Workspace, WorkspaceManager, CODEBASE_META_FILE};
use crate::error::RunnerError;
use crate::models::{Config, FileEdit, JobMode, JobSpec, Stage};

pub mod context;
pub mod shell;

pub use shell::{LineOutcome, ShellRunner};

/// Marker of the block that includes the shared site configuration
pub const SITE_CONF_MARKER: &str = "autobuild site config";

/// Executor progress; `Done` follows the last stage or the first failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    NotStarted,
    Cloning,
    Editing,
    Initializing,
    Building,
    Done,
}

impl ExecutorState {
    fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Clone => ExecutorState::Cloning,
            Stage::Edit => ExecutorState::Editing,
            Stage::Init => ExecutorState::Initializing,
            Stage::Build => ExecutorState::Building,
        }
    }
}

/// Runs the stages of one job against a locked workspace
pub struct Executor<'a> {
    spec: &'a JobSpec,
    workspace: &'a Workspace,
    shell: ShellRunner,
    site_conf: Option<PathBuf>,
    state: ExecutorState,
    cwd: PathBuf,
    /// Started the build from a context marker left by an earlier run
    resumed: bool,
    /// The workspace already holds a checkout from an earlier job
    checked_out: bool,
}

impl<'a> Executor<'a> {
    pub fn new(spec: &'a JobSpec, workspace: &'a Workspace, shell: ShellRunner, site_conf: Option<PathBuf>) -> Self {
        Self {
            spec,
            workspace,
            shell,
            site_conf,
            state: ExecutorState::NotStarted,
            cwd: workspace.root.clone(),
            resumed: false,
            checked_out: false,
        }
    }

    /// Mark the workspace as already checked out, so `full` reuses it
    /// instead of cloning again. `clone_only` always re-clones.
    pub fn checked_out(mut self, checked_out: bool) -> Self {
        self.checked_out = checked_out;
        self
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Run every stage the mode selects. Returns the final working directory.
    pub async fn run(&mut self) -> Result<PathBuf, RunnerError> {
        let result = self.run_stages().await;
        self.state = ExecutorState::Done;
        result.map(|()| self.cwd.clone())
    }

    async fn run_stages(&mut self) -> Result<(), RunnerError> {
        let spec = self.spec;
        let plan = spec.plan();
        let root = self.workspace.root.clone();
        let workdir = spec.recipe.workdir.as_deref();
        info!(
            "Running {} job {} in {} (clone={}, edit={}, init={}, build={})",
            spec.mode,
            spec.job_id,
            root.display(),
            plan.clone,
            plan.edit,
            plan.init,
            plan.build
        );

        let clone = plan.clone && !(self.checked_out && spec.mode == JobMode::Full);
        if clone {
            self.enter(Stage::Clone);
            clear_workspace(&root)?;
            self.cwd = root.clone();
            self.run_lines(Stage::Clone).await?;
            if workdir.is_some() {
                self.cwd = validate_workdir(&root, workdir)?;
            }
        } else {
            if plan.clone {
                info!("[clone] {} is already checked out; reusing it", self.workspace.label());
            }
            self.cwd = validate_workdir(&root, workdir)?;
        }

        if plan.edit {
            self.enter(Stage::Edit);
            for edit in &spec.file_edits {
                apply_file_edit(&root, edit)?;
            }
            self.run_lines(Stage::Edit).await?;
        }

        if plan.init {
            self.enter(Stage::Init);
            self.run_lines(Stage::Init).await?;
            context::save(&root, &self.cwd, &spec.job_id)?;
            debug!("Recorded build context {}", self.cwd.display());
        }

        if plan.build {
            self.enter(Stage::Build);
            if !plan.init && spec.mode.reuses_workspace() {
                self.resume_context(&root);
            }
            self.inject_site_conf(&root)?;
            self.run_lines(Stage::Build).await?;
        }

        Ok(())
    }

    fn enter(&mut self, stage: Stage) {
        self.state = ExecutorState::for_stage(stage);
        info!("=== {} ===", stage);
    }

    /// Build where the last Init left off, when a marker records it
    fn resume_context(&mut self, root: &Path) {
        if let Some((dir, recorded)) = context::load(root) {
            info!(
                "Resuming in {} (recorded by job {} at {})",
                dir.display(),
                recorded.job_id,
                recorded.recorded_at
            );
            self.cwd = dir;
            self.resumed = true;
        }
    }

    async fn run_lines(&mut self, stage: Stage) -> Result<(), RunnerError> {
        let spec = self.spec;
        let lines = spec.recipe.lines(stage);
        if lines.is_empty() {
            info!("[{}] no command lines", stage);
            return Ok(());
        }

        for (index, line) in lines.iter().enumerate() {
            if index == 0
                && stage == Stage::Build
                && self.resumed
                && context::is_workdir_reset(line, &self.workspace.root, spec.recipe.workdir.as_deref())
            {
                info!("[{}] skipping `{}`: already in {}", stage, line, self.cwd.display());
                continue;
            }

            info!("[{}] $ {}", stage, line);
            let outcome = self.shell.run_line(line, &self.cwd).await?;
            if !outcome.success() {
                return Err(RunnerError::Execution {
                    stage: stage.to_string(),
                    command: line.clone(),
                    exit_code: outcome.exit_code,
                });
            }
            self.cwd = outcome.cwd;
        }
        Ok(())
    }

    /// Include the shared download/sstate configuration from the build's
    /// `conf/local.conf` when both exist.
    fn inject_site_conf(&self, root: &Path) -> Result<(), RunnerError> {
        let Some(site_conf) = self.site_conf.as_deref().filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(());
        };
        if !site_conf.is_file() {
            debug!("Site config {} not present; skipping", site_conf.display());
            return Ok(());
        }
        if !self.cwd.join("conf").is_dir() {
            debug!("No conf/ under {}; skipping site config", self.cwd.display());
            return Ok(());
        }
        let Some(relative) = context::relative_to(root, &self.cwd) else {
            return Ok(());
        };

        let edit = FileEdit::EnsureBlock {
            path: relative.join("conf").join("local.conf").to_string_lossy().into_owned(),
            marker: SITE_CONF_MARKER.to_string(),
            content: format!("include {}", site_conf.display()),
        };
        apply_file_edit(root, &edit)?;
        Ok(())
    }
}

/// Remove every top-level entry except the codebase metadata record
fn clear_workspace(root: &Path) -> io::Result<()> {
    fs::create_dir_all(root)?;
    let mut removed = 0;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_name() == CODEBASE_META_FILE {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed += 1;
    }
    if removed > 0 {
        info!("[clone] cleared {} existing entries from {}", removed, root.display());
    }
    Ok(())
}

/// Everything the pipeline needs besides the job itself
pub struct JobRun<'a> {
    pub config: &'a Config,
    pub manager: &'a WorkspaceManager,
    pub job_dir: &'a Path,
    pub log: &'a BuildLog,
}

impl JobRun<'_> {
    /// Credentials, workspace lock, stages, artifacts. The lock is held until
    /// this returns or the future is dropped.
    pub async fn execute(&self, spec: &JobSpec, workspace: &Workspace) -> Result<(), RunnerError> {
        let credentials = Credentials::prepare(&self.config.paths.token_root, &spec.owner, self.job_dir)?;

        let provider = workspace.lock_provider();
        let _lock = acquire_with_timeout(&provider, &workspace.lock_key, self.config.execution.lock_timeout()).await?;
        info!("Holding lock on {}", workspace.label());

        let created = self.manager.prepare(workspace, &spec.owner, &spec.job_id)?;

        let mut env = credentials.env();
        env.extend([
            ("AUTOBUILD_JOB_ID".to_string(), spec.job_id.clone()),
            ("AUTOBUILD_JOB_DIR".to_string(), self.job_dir.display().to_string()),
            ("AUTOBUILD_JOB_OWNER".to_string(), spec.owner.clone()),
            ("AUTOBUILD_WORKSPACE".to_string(), workspace.root.display().to_string()),
        ]);
        let shell = ShellRunner::new(&self.config.execution.shell, env, self.log.clone(), self.job_dir);

        let mut executor =
            Executor::new(spec, workspace, shell, self.config.paths.site_conf.clone()).checked_out(!created);
        let cwd = executor.run().await?;

        if spec.plan().build {
            collect_artifacts(
                &cwd,
                &self.config.artifacts,
                spec.machine(),
                &self.job_dir.join(ARTIFACTS_DIR),
            )?;
        }
        Ok(())
    }
}
