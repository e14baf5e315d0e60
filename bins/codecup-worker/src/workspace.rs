// Run-scoped scratch directory for the process engine.
// Uniquely named per run, removed when the guard drops, whatever the outcome.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const WORKSPACE_PREFIX: &str = "codecup-run-";

pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create under `root`, or the system temp dir when `None`
    pub fn create(root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let dir = match root {
            Some(root) => builder
                .tempdir_in(root)
                .with_context(|| format!("Failed to create workspace in {}", root.display()))?,
            None => builder.tempdir().context("Failed to create workspace")?,
        };
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, name: &str, content: impl AsRef<[u8]>) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}
