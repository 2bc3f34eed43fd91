use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::atomic::write_json_atomic;
use crate::core::file_edit::normalize_relative;

/// Post-init working directory marker kept in the workspace root
pub const CONTEXT_FILE: &str = ".autobuild-context.json";

/// Where the last Init stage left the shell, relative to the workspace root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    pub cwd: PathBuf,
    pub job_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Record `cwd` after Init. Directories outside `root` are not recorded.
pub fn save(root: &Path, cwd: &Path, job_id: &str) -> io::Result<()> {
    let Some(relative) = relative_to(root, cwd) else {
        warn!(
            "Not recording build context: {} is outside {}",
            cwd.display(),
            root.display()
        );
        return Ok(());
    };
    let context = BuildContext {
        cwd: relative,
        job_id: job_id.to_string(),
        recorded_at: Utc::now(),
    };
    write_json_atomic(&root.join(CONTEXT_FILE), &context)
}

/// Absolute directory recorded by an earlier run, if it is still usable
pub fn load(root: &Path) -> Option<(PathBuf, BuildContext)> {
    let content = fs::read_to_string(root.join(CONTEXT_FILE)).ok()?;
    let context: BuildContext = match serde_json::from_str(&content) {
        Ok(context) => context,
        Err(e) => {
            warn!("Ignoring unparsable {}: {}", CONTEXT_FILE, e);
            return None;
        }
    };
    let relative = normalize_relative(&context.cwd.to_string_lossy()).ok()?;
    let dir = root.join(relative);
    if !dir.is_dir() {
        debug!("Recorded build directory {} no longer exists", dir.display());
        return None;
    }
    Some((dir, context))
}

/// Whether `line` is a plain `cd` back into the directory the run already
/// starts in, which a resumed build must not repeat.
pub fn is_workdir_reset(line: &str, root: &Path, workdir: Option<&Path>) -> bool {
    let Some(target) = line.trim().strip_prefix("cd ") else {
        return false;
    };
    let target = target.trim().trim_matches(|c| c == '"' || c == '\'');
    if target.is_empty() || target.contains(|c: char| c.is_whitespace() || c == ';' || c == '&' || c == '|') {
        return false;
    }

    let expected = match workdir {
        Some(workdir) => root.join(workdir),
        None => root.to_path_buf(),
    };
    let target = Path::new(target);
    if target.is_absolute() {
        return target == expected;
    }
    match normalize_relative(&target.to_string_lossy()) {
        Ok(relative) => root.join(relative) == expected,
        Err(_) => false,
    }
}

pub(crate) fn relative_to(root: &Path, cwd: &Path) -> Option<PathBuf> {
    if let Ok(relative) = cwd.strip_prefix(root) {
        return Some(relative.to_path_buf());
    }
    let root = root.canonicalize().ok()?;
    let cwd = cwd.canonicalize().ok()?;
    cwd.strip_prefix(&root).ok().map(Path::to_path_buf)
}
