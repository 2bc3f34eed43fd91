use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigurationError;
use crate::models::{FileEdit, Recipe, Stage};

/// Execution mode requested for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Clone, edit, init and build
    #[default]
    Full,
    /// Fresh checkout only
    CloneOnly,
    /// Rebuild an existing codebase
    BuildOnly,
    /// Apply edits to an existing codebase
    EditOnly,
}

impl JobMode {
    pub fn name(&self) -> &'static str {
        match self {
            JobMode::Full => "full",
            JobMode::CloneOnly => "clone_only",
            JobMode::BuildOnly => "build_only",
            JobMode::EditOnly => "edit_only",
        }
    }

    /// Modes that need a workspace left by an earlier job
    pub fn reuses_workspace(&self) -> bool {
        matches!(self, JobMode::BuildOnly | JobMode::EditOnly)
    }

    /// Which stages run in this mode
    pub fn plan(&self, edit_in_build_only: bool) -> StagePlan {
        match self {
            JobMode::Full => StagePlan {
                clone: true,
                edit: true,
                init: true,
                build: true,
            },
            JobMode::CloneOnly => StagePlan {
                clone: true,
                ..StagePlan::default()
            },
            JobMode::EditOnly => StagePlan {
                edit: true,
                ..StagePlan::default()
            },
            JobMode::BuildOnly => StagePlan {
                edit: edit_in_build_only,
                build: true,
                ..StagePlan::default()
            },
        }
    }
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for JobMode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "full" => Ok(JobMode::Full),
            "clone_only" => Ok(JobMode::CloneOnly),
            "build_only" => Ok(JobMode::BuildOnly),
            "edit_only" => Ok(JobMode::EditOnly),
            other => Err(ConfigurationError::InvalidMode(other.to_string())),
        }
    }
}

/// Stages selected for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StagePlan {
    pub clone: bool,
    pub edit: bool,
    pub init: bool,
    pub build: bool,
}

impl StagePlan {
    pub fn runs(&self, stage: Stage) -> bool {
        match stage {
            Stage::Clone => self.clone,
            Stage::Edit => self.edit,
            Stage::Init => self.init,
            Stage::Build => self.build,
        }
    }
}

/// Fully validated job: who, how, where, and what to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub job_id: String,
    pub owner: String,
    pub mode: JobMode,
    pub codebase_id: Option<String>,
    pub recipe_id: Option<String>,
    pub note: Option<String>,
    /// Machine name; overrides the recipe's
    pub machine: Option<String>,
    pub recipe: Recipe,
    /// Recipe edits followed by edits carried on the job spec
    pub file_edits: Vec<FileEdit>,
    pub edit_in_build_only: bool,
}

impl JobSpec {
    pub fn plan(&self) -> StagePlan {
        self.mode.plan(self.edit_in_build_only)
    }

    pub fn machine(&self) -> Option<&str> {
        self.machine.as_deref().or(self.recipe.machine.as_deref())
    }
}
