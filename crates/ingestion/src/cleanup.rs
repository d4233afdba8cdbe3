//! Per-message scratch directories.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::Result;

/// A temporary directory that lives for exactly one message.
///
/// Every intermediate file a handler writes goes under [`CleanupScope::path`].
/// The directory is removed when the scope is closed (or dropped), whatever
/// the handler's outcome. Removal problems are logged and never propagated.
#[derive(Debug)]
pub struct CleanupScope {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl CleanupScope {
    /// Create a fresh scope under `root`.
    pub fn enter(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new().prefix("msg-").tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        debug!(path = %path.display(), "Entered cleanup scope");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path for a file inside the scope.
    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Remove the directory and everything in it.
    pub fn close(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => debug!(path = %self.path.display(), "Cleaned up scope"),
                Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to clean up scope"),
            }
        }
    }
}

impl Drop for CleanupScope {
    fn drop(&mut self) {
        self.remove();
    }
}
