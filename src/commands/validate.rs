use crate::core::{load_job, Workspace, WorkspaceManager};
use crate::error::ConfigurationError;
use crate::models::{Config, FileEdit, JobSpec, Stage};

/// A job that passed validation and where it would run
#[derive(Debug)]
pub struct ValidationReport {
    pub spec: JobSpec,
    pub workspace: Workspace,
}

/// Parse and check a job without executing or creating anything
pub fn validate_job(config: &Config, job_id: &str) -> Result<ValidationReport, ConfigurationError> {
    let spec = load_job(config, job_id)?;
    let workspace = WorkspaceManager::new(config).resolve(&spec)?;
    Ok(ValidationReport { spec, workspace })
}

/// Print validation report
pub fn print_validation_report(report: &ValidationReport) {
    let spec = &report.spec;
    let plan = spec.plan();

    println!("=== Job {} ===\n", spec.job_id);
    println!("Owner:     {}", spec.owner);
    println!("Mode:      {}", spec.mode);
    if let Some(recipe_id) = &spec.recipe_id {
        println!("Recipe:    {}", recipe_id);
    }
    if let Some(machine) = spec.machine() {
        println!("Machine:   {}", machine);
    }
    println!(
        "Workspace: {} ({})",
        report.workspace.root.display(),
        report.workspace.label()
    );
    if let Some(workdir) = &spec.recipe.workdir {
        println!("Workdir:   {}", workdir.display());
    }

    println!("\nStages:");
    for stage in Stage::ALL {
        let state = if plan.runs(stage) { "run" } else { "skip" };
        println!(
            "  {:<6} {:<4} ({} lines)",
            stage.name(),
            state,
            spec.recipe.lines(stage).len()
        );
    }

    if !spec.file_edits.is_empty() {
        println!("\nFile edits:");
        for edit in &spec.file_edits {
            match edit {
                FileEdit::EnsureLines { path, lines } => {
                    println!("  ensure_lines {} ({} lines)", path, lines.len())
                }
                FileEdit::EnsureBlock { path, marker, .. } => {
                    println!("  ensure_block {} [{}]", path, marker)
                }
            }
        }
    }

    println!("\nJob is valid.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config(temp_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.paths.jobs_root = temp_dir.path().join("jobs");
        config.paths.workspaces_root = temp_dir.path().join("workspaces");
        config
    }

    #[test]
    fn test_validate_job_creates_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);
        let job_dir = temp_dir.path().join("jobs/3");
        fs::create_dir_all(&job_dir).unwrap();
        fs::write(job_dir.join("job.json"), r#"{"owner": "alice", "codebase_id": "demo"}"#).unwrap();
        fs::write(job_dir.join("recipe.yaml"), "clone_block: ['true']\nbuild_block: ['true']\n").unwrap();

        let report = validate_job(&config, "3").unwrap();

        assert_eq!(report.workspace.root, temp_dir.path().join("workspaces/demo"));
        assert!(!temp_dir.path().join("workspaces").exists());
        assert!(!job_dir.join("status.json").exists());
    }

    #[test]
    fn test_validate_reports_missing_codebase() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);
        let job_dir = temp_dir.path().join("jobs/4");
        fs::create_dir_all(&job_dir).unwrap();
        fs::write(
            job_dir.join("job.json"),
            r#"{"owner": "alice", "mode": "build_only", "codebase_id": "ghost"}"#,
        )
        .unwrap();
        fs::write(job_dir.join("recipe.yaml"), "build_block: ['true']\n").unwrap();

        let err = validate_job(&config, "4").unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingCodebase { .. }));
    }
}
