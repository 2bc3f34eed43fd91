use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One phase of the staged executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Clone,
    Edit,
    Init,
    Build,
}

impl Stage {
    /// Execution order
    pub const ALL: [Stage; 4] = [Stage::Clone, Stage::Edit, Stage::Init, Stage::Build];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Clone => "clone",
            Stage::Edit => "edit",
            Stage::Init => "init",
            Stage::Build => "build",
        }
    }

    /// Recipe key holding this stage's command lines
    pub fn block_key(&self) -> &'static str {
        match self {
            Stage::Clone => "clone_block",
            Stage::Edit => "modify_block",
            Stage::Init => "init_block",
            Stage::Build => "build_block",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Declarative, idempotent mutation of a file inside the workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FileEdit {
    /// Append each line not already present, keeping recipe order
    EnsureLines { path: String, lines: Vec<String> },
    /// Keep exactly one `BEGIN <marker>` / `END <marker>` block holding `content`
    EnsureBlock {
        path: String,
        marker: String,
        content: String,
    },
}

impl FileEdit {
    pub fn path(&self) -> &str {
        match self {
            FileEdit::EnsureLines { path, .. } | FileEdit::EnsureBlock { path, .. } => path,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            FileEdit::EnsureLines { .. } => "ensure_lines",
            FileEdit::EnsureBlock { .. } => "ensure_block",
        }
    }
}

/// Validated recipe document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Recipe {
    pub id: Option<String>,
    pub display_name: Option<String>,
    /// Working directory relative to the workspace root
    pub workdir: Option<PathBuf>,
    /// Machine name qualifying the deploy-images directory
    pub machine: Option<String>,
    pub clone_lines: Vec<String>,
    pub init_lines: Vec<String>,
    pub modify_lines: Vec<String>,
    pub build_lines: Vec<String>,
    pub file_edits: Vec<FileEdit>,
    /// Per-recipe choice for running the edit stage in build_only mode
    pub edit_in_build_only: Option<bool>,
}

impl Recipe {
    /// Command lines for a stage
    pub fn lines(&self, stage: Stage) -> &[String] {
        match stage {
            Stage::Clone => &self.clone_lines,
            Stage::Edit => &self.modify_lines,
            Stage::Init => &self.init_lines,
            Stage::Build => &self.build_lines,
        }
    }
}
