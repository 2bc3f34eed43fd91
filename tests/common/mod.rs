//! Common test utilities
#![allow(dead_code)]

use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use autobuild::models::Config;

pub const OWNER: &str = "alice";

/// Temp jobs/workspaces/tokens roots and a config pointing at them
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub config: Config,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path();

        let mut config = Config::default();
        config.paths.jobs_root = root.join("jobs");
        config.paths.workspaces_root = root.join("workspaces");
        config.paths.token_root = root.join("tokens");
        config.paths.site_conf = None;
        config.execution.shell = "sh".to_string();
        config.execution.lock_timeout_seconds = 30;

        fs::create_dir_all(&config.paths.jobs_root).expect("Failed to create jobs root");
        fs::create_dir_all(&config.paths.token_root).expect("Failed to create token root");
        fs::write(config.paths.token_root.join(format!("{}.token", OWNER)), "test-token\n")
            .expect("Failed to write token");

        Self { temp_dir, config }
    }

    /// Write `job.json` and (when given) `recipe.yaml` for a job
    pub fn write_job(&self, job_id: &str, spec: Value, recipe: Option<&str>) -> PathBuf {
        let job_dir = self.job_dir(job_id);
        fs::create_dir_all(&job_dir).expect("Failed to create job dir");
        fs::write(
            job_dir.join("job.json"),
            serde_json::to_string_pretty(&spec).expect("Failed to serialize spec"),
        )
        .expect("Failed to write job spec");
        if let Some(recipe) = recipe {
            fs::write(job_dir.join("recipe.yaml"), recipe).expect("Failed to write recipe");
        }
        job_dir
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.config.job_dir(job_id)
    }

    pub fn workspace(&self, codebase_id: &str) -> PathBuf {
        self.config.paths.workspaces_root.join(codebase_id)
    }

    pub fn read_json(&self, job_id: &str, file: &str) -> Value {
        let content = fs::read_to_string(self.job_dir(job_id).join(file)).expect("Failed to read record");
        serde_json::from_str(&content).expect("Failed to parse record")
    }

    pub fn status(&self, job_id: &str) -> Value {
        self.read_json(job_id, "status.json")
    }

    pub fn build_log(&self, job_id: &str) -> String {
        fs::read_to_string(self.job_dir(job_id).join("logs/build.log")).unwrap_or_default()
    }
}
