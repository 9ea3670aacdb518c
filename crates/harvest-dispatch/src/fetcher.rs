use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

use harvest_core::error::HarvestError;
use harvest_host::http::redact;

/// A fetched working tree. The directory is removed when the tree is
/// dropped or explicitly removed.
#[derive(Debug)]
pub struct WorkTree {
    dir: TempDir,
}

impl WorkTree {
    pub fn new(dir: TempDir) -> Self {
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Delete the tree now, reporting failures instead of ignoring them.
    pub fn remove(self) -> Result<(), HarvestError> {
        self.dir.close()?;
        Ok(())
    }
}

/// Produces a local working tree for one repository branch.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str, branch: &str) -> Result<WorkTree, HarvestError>;
}

/// Shallow, single-branch `git clone` into a scratch directory.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    program: String,
    scratch: Option<PathBuf>,
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self {
            program: "git".into(),
            scratch: None,
        }
    }
}

impl GitFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone below `dir` instead of the system temp directory.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch = Some(dir.into());
        self
    }

    fn scratch_dir(&self) -> Result<TempDir, HarvestError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("harvest-");
        let dir = match &self.scratch {
            Some(base) => {
                std::fs::create_dir_all(base)?;
                builder.tempdir_in(base)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(&self, url: &str, branch: &str) -> Result<WorkTree, HarvestError> {
        let dir = self.scratch_dir()?;
        let safe_url = redact(url);
        debug!(url = %safe_url, branch, dest = %dir.path().display(), "cloning");

        let output = Command::new(&self.program)
            .args(["clone", "--quiet", "--depth", "1", "--single-branch", "--branch", branch, url])
            .arg(dir.path())
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .map_err(|e| HarvestError::GitError {
                message: format!("failed to run {}: {e}", self.program),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).replace(url, &safe_url);
            return Err(HarvestError::GitError {
                message: format!("git clone {safe_url} ({branch}) failed: {}", stderr.trim()),
            });
        }
        Ok(WorkTree::new(dir))
    }
}
