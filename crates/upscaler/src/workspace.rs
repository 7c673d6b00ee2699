use std::io;
use std::path::{Path, PathBuf};
use log::{debug, warn};
use tempfile::TempDir;

/// Scratch directory for one job's intermediate files.
///
/// Removed by `release`, or on drop if the job bails out early.
#[derive(Debug)]
pub struct JobWorkspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl JobWorkspace {
    /// Create a fresh directory under `root`, or the system temp dir
    pub fn create(root: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("vupscale-");
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        debug!("Created workspace {}", path.display());
        Ok(JobWorkspace { dir: Some(dir), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path for an intermediate file inside the workspace
    pub fn artifact(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Remove the directory and everything in it
    pub fn release(mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => {
                debug!("Removing workspace {}", self.path.display());
                dir.close()
            }
            None => Ok(()),
        }
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                warn!("Failed to remove workspace {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_release_removes_artifacts() {
        let root = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::create(Some(root.path())).unwrap();
        let artifact = ws.artifact("step-1.mp4");
        fs::write(&artifact, b"frames").unwrap();
        let dir = ws.path().to_path_buf();
        assert!(dir.starts_with(root.path()));
        assert!(dir.file_name().unwrap().to_string_lossy().starts_with("vupscale-"));

        ws.release().unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = {
            let ws = JobWorkspace::create(Some(root.path())).unwrap();
            fs::write(ws.artifact("partial.mp4"), b"x").unwrap();
            ws.path().to_path_buf()
        };
        assert!(!dir.exists());
    }

    #[test]
    fn test_missing_root_is_created() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("scratch").join("jobs");
        let ws = JobWorkspace::create(Some(&nested)).unwrap();
        assert!(ws.path().starts_with(&nested));
    }
}
