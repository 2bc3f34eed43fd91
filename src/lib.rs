//! autobuild - unattended Yocto/BitBake job runner
//!
//! Given a job id, the runner loads the job's recipe, locks the shared codebase
//! workspace it targets, runs the clone/edit/init/build stages its mode selects,
//! collects the built images and records the outcome in crash-safe status files.
//!
//! # Architecture
//!
//! - **commands**: CLI command implementations (run, validate, status, codebases)
//! - **core**: Engine (parser, file edits, workspaces and locks, credentials, executor, artifacts, job state)
//! - **models**: Data structures (config, job, recipe, status, codebase)
//! - **error**: Error types and exit codes

pub mod commands;
pub mod core;
pub mod error;
pub mod models;

pub use error::{ConfigurationError, Result, RunnerError};
