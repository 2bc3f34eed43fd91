use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::ConfigurationError;
use crate::models::{Config, ConfigOverrides};

/// Environment variable naming the settings file
pub const CONFIG_ENV: &str = "AUTOBUILD_CONFIG";

/// Settings file used when neither `--config` nor the environment names one
pub const SYSTEM_CONFIG_PATH: &str = "/etc/autobuild/autobuild.toml";

/// Load configuration: explicit path, else `AUTOBUILD_CONFIG`, else the
/// system file if present, else defaults. Environment path variables and CLI
/// overrides are layered on top, in that order.
pub fn load_config(explicit: Option<&Path>, overrides: ConfigOverrides) -> Result<Config, ConfigurationError> {
    load_config_with(explicit, overrides, |key| std::env::var(key).ok(), Path::new(SYSTEM_CONFIG_PATH))
}

fn load_config_with<F>(
    explicit: Option<&Path>,
    overrides: ConfigOverrides,
    lookup: F,
    system_path: &Path,
) -> Result<Config, ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = resolve_config_path(explicit, &lookup, system_path);
    match &path {
        Some(path) => debug!("Loading settings from {}", path.display()),
        None => debug!("No settings file; using defaults"),
    }

    let config = Config::load_optional(path.as_deref())?
        .with_env(&lookup)
        .with_overrides(overrides);

    info!(
        "Configuration loaded: jobs_root={}, workspaces_root={}, layout={:?}, lock_timeout={}s",
        config.paths.jobs_root.display(),
        config.paths.workspaces_root.display(),
        config.workspace.layout,
        config.execution.lock_timeout_seconds
    );
    Ok(config)
}

fn resolve_config_path<F>(explicit: Option<&Path>, lookup: &F, system_path: &Path) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = lookup(CONFIG_ENV).filter(|v| !v.trim().is_empty()) {
        return Some(PathBuf::from(path));
    }
    system_path.is_file().then(|| system_path.to_path_buf())
}
