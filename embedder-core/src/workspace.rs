use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::warn;

pub const WORKSPACE_PREFIX: &str = "embed-";

#[derive(Debug, Error)]
#[error("could not create workspace under {root}: {source}")]
pub struct WorkspaceError {
    pub root: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Scratch directory for one request, removed with everything in it when
/// dropped. Two requests for the same URL never share files.
#[derive(Debug)]
pub struct RequestWorkspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl RequestWorkspace {
    pub fn create<P: AsRef<Path>>(root: P) -> Result<Self, WorkspaceError> {
        let root = root.as_ref();
        let fail = |source| WorkspaceError {
            root: root.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(root).map_err(fail)?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(root)
            .map_err(fail)?;
        let path = dir.path().to_path_buf();
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory now, logging instead of failing.
    pub fn close(mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(error) = dir.close() {
                warn!(path = %self.path.display(), %error, "failed to remove request workspace");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspaces_are_distinct_and_removed() {
        let root = TempDir::new().unwrap();
        let first = RequestWorkspace::create(root.path()).unwrap();
        let second = RequestWorkspace::create(root.path()).unwrap();
        assert_ne!(first.path(), second.path());
        assert!(first
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(WORKSPACE_PREFIX));

        let first_path = first.path().to_path_buf();
        std::fs::write(first_path.join("leftover.mp4"), b"x").unwrap();
        first.close();
        assert!(!first_path.exists());

        let second_path = second.path().to_path_buf();
        drop(second);
        assert!(!second_path.exists());
    }

    #[test]
    fn missing_root_is_created() {
        let root = TempDir::new().unwrap();
        let nested = root.path().join("work").join("videos");
        let workspace = RequestWorkspace::create(&nested).unwrap();
        assert!(workspace.path().starts_with(&nested));
    }
}
