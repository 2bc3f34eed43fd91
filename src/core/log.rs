use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

/// Append-only combined build log shared by the runner and its children
#[derive(Debug, Clone)]
pub struct BuildLog {
    path: PathBuf,
    file: Arc<File>,
}

impl BuildLog {
    /// Open (creating as needed) `<job_dir>/logs/build.log` in append mode
    pub fn open(job_dir: &Path) -> io::Result<Self> {
        let path = job_dir.join("logs").join("build.log");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Arc::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one raw line, bypassing the tracing formatter
    pub fn line(&self, text: &str) -> io::Result<()> {
        let mut file: &File = &self.file;
        writeln!(file, "{}", text)
    }

    /// Writer handle for a `tracing_subscriber` fmt layer
    pub fn make_writer(&self) -> Arc<File> {
        Arc::clone(&self.file)
    }

    /// Stdio handle so a child writes straight into the log
    pub fn stdio(&self) -> io::Result<Stdio> {
        Ok(Stdio::from(self.file.try_clone()?))
    }
}
