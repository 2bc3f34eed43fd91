use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::ArtifactsConfig;

/// Artifact directory inside a job directory
pub const ARTIFACTS_DIR: &str = "artifacts";

/// Copy built images from the deploy directory into `dest`.
///
/// With a machine name only `<deploy_dir>/<machine>` is scanned; without one,
/// the deploy directory and each machine directory directly below it. A
/// missing deploy directory is not an error.
pub fn collect_artifacts(
    cwd: &Path,
    config: &ArtifactsConfig,
    machine: Option<&str>,
    dest: &Path,
) -> io::Result<Vec<PathBuf>> {
    let mut deploy = cwd.join(&config.deploy_dir);
    if let Some(machine) = machine {
        deploy.push(machine);
    }
    if !deploy.is_dir() {
        info!(
            "[artifacts] No deploy directory at {}; nothing to collect",
            deploy.display()
        );
        return Ok(Vec::new());
    }

    let mut dirs = vec![deploy.clone()];
    if machine.is_none() {
        dirs.extend(subdirectories(&deploy)?);
    }

    let mut matches: Vec<(PathBuf, String, &str)> = Vec::new();
    for dir in &dirs {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if let Some(ext) = matching_extension(&name, &config.extensions) {
                matches.push((path, name, ext));
            }
        }
    }
    matches.sort_by(|a, b| a.0.cmp(&b.0));

    if matches.is_empty() {
        info!("[artifacts] No images matching {:?} in {}", config.extensions, deploy.display());
        return Ok(Vec::new());
    }

    fs::create_dir_all(dest)?;
    let mut copied = Vec::with_capacity(matches.len());
    for (source, name, ext) in matches {
        let target = unique_destination(dest, &name, ext);
        fs::copy(&source, &target)?;
        info!("[artifacts] {} -> {}", source.display(), target.display());
        copied.push(target);
    }
    info!("[artifacts] Collected {} file(s)", copied.len());
    Ok(copied)
}

fn subdirectories(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Longest configured extension `name` ends with (after a dot)
fn matching_extension<'a>(name: &str, extensions: &'a [String]) -> Option<&'a str> {
    extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.'))
        .filter(|ext| {
            !ext.is_empty()
                && name.len() > ext.len() + 1
                && name.ends_with(ext)
                && name.as_bytes()[name.len() - ext.len() - 1] == b'.'
        })
        .max_by_key(|ext| ext.len())
}

/// `dest/name`, or `dest/<stem>_<n>.<ext>` when that name is taken
fn unique_destination(dest: &Path, name: &str, ext: &str) -> PathBuf {
    let candidate = dest.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let stem = &name[..name.len() - ext.len() - 1];
    (1..)
        .map(|n| dest.join(format!("{}_{}.{}", stem, n, ext)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_collects_matching_images_for_machine() {
        let temp_dir = TempDir::new().unwrap();
        let deploy = temp_dir.path().join("build/tmp/deploy/images/qemuarm64");
        touch(&deploy.join("core-image.static.mtd"), "image");
        touch(&deploy.join("core-image.static.mtd.tar"), "tarball");
        touch(&deploy.join("core-image.manifest"), "manifest");
        let dest = temp_dir.path().join("artifacts");

        let copied = collect_artifacts(
            &temp_dir.path().join("build"),
            &ArtifactsConfig::default(),
            Some("qemuarm64"),
            &dest,
        )
        .unwrap();

        assert_eq!(copied.len(), 2);
        assert_eq!(fs::read_to_string(dest.join("core-image.static.mtd")).unwrap(), "image");
        assert!(dest.join("core-image.static.mtd.tar").exists());
        assert!(!dest.join("core-image.manifest").exists());
        assert!(deploy.join("core-image.static.mtd").exists(), "copy, not move");
    }

    #[test]
    fn test_missing_deploy_dir_is_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("artifacts");
        let copied = collect_artifacts(temp_dir.path(), &ArtifactsConfig::default(), None, &dest).unwrap();
        assert!(copied.is_empty());
        assert!(!dest.exists());
    }

    #[test]
    fn test_name_collisions_get_suffix() {
        let temp_dir = TempDir::new().unwrap();
        let images = temp_dir.path().join("tmp/deploy/images");
        touch(&images.join("a/fw.static.mtd"), "from a");
        touch(&images.join("b/fw.static.mtd"), "from b");
        let dest = temp_dir.path().join("artifacts");

        let copied = collect_artifacts(temp_dir.path(), &ArtifactsConfig::default(), None, &dest).unwrap();

        assert_eq!(copied.len(), 2);
        assert_eq!(fs::read_to_string(dest.join("fw.static.mtd")).unwrap(), "from a");
        assert_eq!(fs::read_to_string(dest.join("fw_1.static.mtd")).unwrap(), "from b");
    }

    #[test]
    fn test_matching_extension_prefers_longest() {
        let exts = vec!["static.mtd".to_string(), "static.mtd.tar".to_string()];
        assert_eq!(matching_extension("x.static.mtd.tar", &exts), Some("static.mtd.tar"));
        assert_eq!(matching_extension("x.static.mtd", &exts), Some("static.mtd"));
        assert_eq!(matching_extension("xstatic.mtd", &exts), None);
        assert_eq!(matching_extension("static.mtd", &exts), None);
    }
}
