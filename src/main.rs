use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

use autobuild::commands::{list_codebases, print_validation_report, run_job_with, show_status, validate_job};
use autobuild::core::{load_config, BuildLog};
use autobuild::error::{EXIT_CONFIG, EXIT_INTERNAL};
use autobuild::models::{Config, ConfigOverrides};

/// autobuild - unattended Yocto/BitBake job runner
#[derive(Parser)]
#[command(name = "autobuild")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (defaults to /etc/autobuild/autobuild.toml when present)
    #[arg(long, global = true, env = "AUTOBUILD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job: clone, edit, init and build per its mode
    Run {
        /// Job id (directory name under the jobs root)
        job_id: String,

        /// Seconds to wait for another job holding the codebase lock
        #[arg(long)]
        lock_timeout: Option<u64>,

        /// Override the jobs root
        #[arg(long)]
        jobs_root: Option<PathBuf>,

        /// Override the workspaces root
        #[arg(long)]
        workspaces_root: Option<PathBuf>,
    },

    /// Validate a job's spec and recipe without running anything
    Validate {
        job_id: String,
    },

    /// Show a job's status record
    Status {
        job_id: String,
    },

    /// List shared codebases
    Codebases,
}

type FileLayer = Box<dyn Layer<Registry> + Send + Sync>;
type FileLayerHandle = reload::Handle<Option<FileLayer>, Registry>;

/// Log to stderr; the returned handle can later add the job's build log
fn init_logging(verbose: bool) -> FileLayerHandle {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file, handle) = reload::Layer::new(None::<FileLayer>);
    let stderr = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file)
        .with(filter)
        .with(stderr)
        .init();
    handle
}

/// Mirror runner lines into the build log alongside child output
fn attach_build_log(handle: &FileLayerHandle, log: &BuildLog) {
    let layer = fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(log.make_writer())
        .boxed();
    if let Err(e) = handle.modify(|file| *file = Some(layer)) {
        eprintln!("Warning: build log not attached to logging: {}", e);
    }
}

fn load_or_exit(config_path: Option<&PathBuf>, overrides: ConfigOverrides) -> Config {
    match load_config(config_path.map(PathBuf::as_path), overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(EXIT_CONFIG);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run {
            job_id,
            lock_timeout,
            jobs_root,
            workspaces_root,
        } => {
            let logging = init_logging(cli.verbose);
            let config = load_or_exit(
                cli.config.as_ref(),
                ConfigOverrides {
                    jobs_root,
                    workspaces_root,
                    lock_timeout,
                },
            );
            run_job_with(&config, &job_id, |log| attach_build_log(&logging, log)).await
        }

        Commands::Validate { job_id } => {
            init_logging(cli.verbose);
            let config = load_or_exit(cli.config.as_ref(), ConfigOverrides::default());
            match validate_job(&config, &job_id) {
                Ok(report) => {
                    print_validation_report(&report);
                    0
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    EXIT_CONFIG
                }
            }
        }

        Commands::Status { job_id } => {
            init_logging(cli.verbose);
            let config = load_or_exit(cli.config.as_ref(), ConfigOverrides::default());
            match show_status(&config, &job_id) {
                Ok(_) => 0,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    EXIT_INTERNAL
                }
            }
        }

        Commands::Codebases => {
            init_logging(cli.verbose);
            let config = load_or_exit(cli.config.as_ref(), ConfigOverrides::default());
            match list_codebases(&config) {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    EXIT_INTERNAL
                }
            }
        }
    };

    std::process::exit(code);
}
