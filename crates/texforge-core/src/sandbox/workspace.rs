//! Ephemeral per-build workspace.
//!
//! The workspace is the only host state a build mutates. It is removed when
//! the [`Workspace`] is dropped, so every exit path (success, error, timeout,
//! cancellation, unwinding) releases it.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::domain::{CompileError, Result, SourceFile};
use crate::metrics::METRICS;

/// Uniquely-named scratch directory exclusively owned by one build.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    /// Allocate a fresh workspace under `root`.
    pub fn create(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new().prefix("texforge-").tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        METRICS.inc_workspaces_created();
        debug!(workspace = %path.display(), "workspace created");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory name, used as a build identifier in logs.
    pub fn id(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Write every source file at its logical path, creating directories.
    pub async fn materialize(&self, files: &[SourceFile]) -> Result<()> {
        for file in files {
            let bytes = file.decoded_bytes()?;
            let dest = self.path.join(&file.path);
            if !dest.starts_with(&self.path) {
                return Err(CompileError::InvalidRequest(format!(
                    "file escapes workspace: {}",
                    file.path
                )));
            }
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, bytes).await?;
        }
        debug!(workspace = %self.path.display(), files = files.len(), "sources materialized");
        Ok(())
    }

    /// Read a file produced by the build; `None` if it does not exist.
    ///
    /// The build writes into this directory, so only a regular file that
    /// resolves inside the workspace is accepted. Symlinks and anything
    /// reached through a linked directory are refused and read as `None`.
    pub async fn read_output(&self, relative: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path.join(relative);
        let meta = match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !meta.file_type().is_file() {
            warn!(output = %relative, "refusing build output that is not a regular file");
            return Ok(None);
        }

        let root = tokio::fs::canonicalize(&self.path).await?;
        let resolved = tokio::fs::canonicalize(&path).await?;
        if !resolved.starts_with(&root) {
            warn!(output = %relative, "refusing build output outside the workspace");
            return Ok(None);
        }

        Ok(Some(tokio::fs::read(&resolved).await?))
    }

    /// `uid:gid` owning the workspace, so the container writes as the host user.
    pub fn owner(&self) -> Option<String> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            std::fs::metadata(&self.path)
                .ok()
                .map(|m| format!("{}:{}", m.uid(), m.gid()))
        }
        #[cfg(not(unix))]
        {
            None
        }
    }

    /// Remove the workspace now, reporting failures.
    pub fn close(mut self) -> Result<()> {
        match self.dir.take() {
            Some(dir) => {
                METRICS.inc_workspaces_removed();
                dir.close()?;
                debug!(workspace = %self.path.display(), "workspace removed");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            METRICS.inc_workspaces_removed();
            if let Err(e) = dir.close() {
                warn!(workspace = %self.path.display(), error = %e, "workspace removal failed");
            }
        }
    }
}
