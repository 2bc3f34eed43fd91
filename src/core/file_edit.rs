//! Idempotent file mutations applied inside a workspace.
//!
//! Both operations read the target (a missing file reads as empty), compute the
//! new bytes, and only write when something changed. Writes go through
//! [`write_atomic`], so a crash never leaves a half-written file behind.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::info;

use crate::core::atomic::write_atomic;
use crate::error::{ConfigurationError, RunnerError};
use crate::models::FileEdit;

/// What an applied edit did to its file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// `ensured` lines requested, `appended` of them were missing
    Lines { ensured: usize, appended: usize },
    /// Block was appended (`replaced == false`) or its interior rewritten
    Block { replaced: bool, changed: bool },
}

impl std::fmt::Display for EditOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditOutcome::Lines { ensured, appended } => {
                write!(f, "ensured {} lines (appended {})", ensured, appended)
            }
            EditOutcome::Block { replaced: true, changed } => {
                write!(f, "replaced block ({})", if *changed { "updated" } else { "unchanged" })
            }
            EditOutcome::Block { replaced: false, .. } => write!(f, "appended block"),
        }
    }
}

/// Lexically normalize a workspace-relative path, rejecting anything that could
/// leave the root: absolute paths, null bytes, and `..` that climbs above it.
pub fn normalize_relative(raw: &str) -> Result<PathBuf, ConfigurationError> {
    let unsafe_path = |reason| ConfigurationError::UnsafePath {
        path: raw.to_string(),
        reason,
    };
    if raw.contains('\0') {
        return Err(unsafe_path("contains a null byte"));
    }
    let path = Path::new(raw);
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(unsafe_path("escapes the workspace root"));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path("absolute paths are not allowed"));
            }
        }
    }
    Ok(normalized)
}

/// Resolve `raw` under `root`, following symlinks of whatever already exists,
/// and fail if the result lands outside `root`.
pub fn resolve_in_root(root: &Path, raw: &str) -> Result<PathBuf, ConfigurationError> {
    let relative = normalize_relative(raw)?;
    if relative.as_os_str().is_empty() {
        return Err(ConfigurationError::UnsafePath {
            path: raw.to_string(),
            reason: "does not name a file",
        });
    }
    let target = root.join(&relative);

    let canonical_root = root
        .canonicalize()
        .map_err(|e| ConfigurationError::ReadError(root.to_path_buf(), e))?;
    let mut existing = target.as_path();
    while !existing.exists() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => break,
        }
    }
    let canonical = existing
        .canonicalize()
        .map_err(|e| ConfigurationError::ReadError(existing.to_path_buf(), e))?;
    if !canonical.starts_with(&canonical_root) {
        return Err(ConfigurationError::UnsafePath {
            path: raw.to_string(),
            reason: "resolves outside the workspace root through a symlink",
        });
    }
    Ok(target)
}

/// Apply one edit relative to the workspace root
pub fn apply_file_edit(root: &Path, edit: &FileEdit) -> Result<EditOutcome, RunnerError> {
    let target = resolve_in_root(root, edit.path())?;
    let outcome = match edit {
        FileEdit::EnsureLines { lines, .. } => ensure_lines(&target, lines)?,
        FileEdit::EnsureBlock {
            marker, content, ..
        } => ensure_block(&target, marker, content)?,
    };
    info!("[edit] {} {}: {}", edit.action(), edit.path(), outcome);
    Ok(outcome)
}

/// Append each of `lines` that is not already an exact line of the file
pub fn ensure_lines(target: &Path, lines: &[String]) -> io::Result<EditOutcome> {
    let existing = read_or_empty(target)?;
    // Split on '\n' only so a trailing '\r' still counts as part of the line.
    let present: std::collections::HashSet<&str> = existing.split('\n').collect();

    let mut missing: Vec<&str> = Vec::new();
    for line in lines {
        if !present.contains(line.as_str()) && !missing.contains(&line.as_str()) {
            missing.push(line);
        }
    }

    if !missing.is_empty() {
        let mut updated = existing.clone();
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        for line in &missing {
            updated.push_str(line);
            updated.push('\n');
        }
        write_file(target, &updated)?;
    }

    Ok(EditOutcome::Lines {
        ensured: lines.len(),
        appended: missing.len(),
    })
}

/// True when a line of `content` would be read back as one of the block's delimiters
pub fn content_has_delimiter(marker: &str, content: &str) -> bool {
    let begin = format!("# BEGIN {}", marker);
    let end = format!("# END {}", marker);
    content
        .lines()
        .map(str::trim_end)
        .any(|line| line == begin || line == end)
}

/// Maintain a single `# BEGIN <marker>` / `# END <marker>` block holding `content`
pub fn ensure_block(target: &Path, marker: &str, content: &str) -> io::Result<EditOutcome> {
    if content_has_delimiter(marker, content) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("block content for `{}` contains its own delimiter line", marker),
        ));
    }
    let existing = read_or_empty(target)?;
    let begin = format!("# BEGIN {}", marker);
    let end = format!("# END {}", marker);

    let mut body = content.to_string();
    if !body.is_empty() && !body.ends_with('\n') {
        body.push('\n');
    }

    let lines: Vec<&str> = existing.split_inclusive('\n').collect();
    let is = |line: &str, delimiter: &str| line.trim_end_matches(['\n', '\r']) == delimiter;

    // Last BEGIN that is followed by an END; orphaned delimiters are left alone.
    let span = lines
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, line)| is(line, &begin))
        .find_map(|(b, _)| {
            lines[b + 1..]
                .iter()
                .position(|line| is(line, &end))
                .map(|offset| (b, b + 1 + offset))
        });

    let (updated, outcome) = match span {
        Some((b, e)) => {
            let mut updated: String = lines[..=b].concat();
            if !updated.ends_with('\n') {
                updated.push('\n');
            }
            updated.push_str(&body);
            updated.push_str(&lines[e..].concat());
            let changed = updated != existing;
            (updated, EditOutcome::Block { replaced: true, changed })
        }
        None => {
            let mut updated = existing.clone();
            if !updated.is_empty() && !updated.ends_with('\n') {
                updated.push('\n');
            }
            updated.push_str(&begin);
            updated.push('\n');
            updated.push_str(&body);
            updated.push_str(&end);
            updated.push('\n');
            (updated, EditOutcome::Block { replaced: false, changed: true })
        }
    };

    if updated != existing {
        write_file(target, &updated)?;
    }
    Ok(outcome)
}

fn read_or_empty(path: &Path) -> io::Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

fn write_file(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    write_atomic(path, content.as_bytes())
}
