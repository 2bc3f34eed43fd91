use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::core::log::BuildLog;
use crate::error::RunnerError;

/// Variable naming the file the wrapper writes the final `pwd` into
const CWD_FILE_ENV: &str = "AUTOBUILD_CWD_FILE";

/// Result of one command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineOutcome {
    pub exit_code: i32,
    /// Working directory the line left behind
    pub cwd: PathBuf,
}

impl LineOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs recipe lines as independent `<shell> -c` processes
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    env: Vec<(String, String)>,
    log: BuildLog,
    cwd_file: PathBuf,
}

impl ShellRunner {
    /// `state_dir` holds the scratch file used to carry `cd` across lines
    pub fn new(shell: &str, env: Vec<(String, String)>, log: BuildLog, state_dir: &Path) -> Self {
        Self {
            shell: shell.to_string(),
            env,
            log,
            cwd_file: state_dir.join(".autobuild-cwd"),
        }
    }

    /// Run `line` in `cwd`, writing its output into the build log.
    ///
    /// The line gets its own process group; dropping the returned future
    /// (on a termination signal) takes the whole group down with it.
    pub async fn run_line(&self, line: &str, cwd: &Path) -> Result<LineOutcome, RunnerError> {
        let _ = fs::remove_file(&self.cwd_file);
        let script = format!(
            "{}\n__autobuild_rc=$?\npwd > \"${}\"\nexit $__autobuild_rc\n",
            line, CWD_FILE_ENV
        );

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(script)
            .current_dir(cwd)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(CWD_FILE_ENV, &self.cwd_file)
            .stdin(Stdio::null())
            .stdout(self.log.stdio()?)
            .stderr(self.log.stdio()?)
            .process_group(0)
            .kill_on_drop(true)
            .spawn()?;

        let mut group = ProcessGroup::new(child.id());
        let status = child.wait().await?;
        group.disarm();

        let exit_code = exit_code(status);
        let cwd = self.read_cwd().unwrap_or_else(|| cwd.to_path_buf());
        debug!("`{}` exited {} in {}", line, exit_code, cwd.display());
        Ok(LineOutcome { exit_code, cwd })
    }

    fn read_cwd(&self) -> Option<PathBuf> {
        let recorded = fs::read_to_string(&self.cwd_file).ok()?;
        let _ = fs::remove_file(&self.cwd_file);
        let path = PathBuf::from(recorded.trim_end_matches('\n'));
        (path.is_absolute() && path.is_dir()).then_some(path)
    }
}

/// Exit code as a shell would report it: signal deaths become `128 + sig`
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

/// Terminates a child's process group unless disarmed after a normal exit
struct ProcessGroup {
    pgid: Option<Pid>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()).map(Pid::from_raw),
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            warn!("Terminating process group {}", pgid);
            if let Err(e) = killpg(pgid, Signal::SIGTERM) {
                debug!("killpg({}) failed: {}", pgid, e);
            }
        }
    }
}
