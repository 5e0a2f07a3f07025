use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

/// Temporary files or directories created for a run and removed when it ends.
///
/// Clones share the same list, so the loop's cleanup guard and the sandbox
/// see one registry.
#[derive(Debug, Clone, Default)]
pub struct ArtifactRegistry {
    paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut paths = self.lock();
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().clone()
    }

    /// Delete every registered artifact that still exists and clear the list.
    /// Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let paths = std::mem::take(&mut *self.lock());
        let mut removed = 0;
        for path in paths {
            match remove_path(&path) {
                Ok(true) => {
                    debug!(path = %path.display(), "removed artifact");
                    removed += 1;
                }
                Ok(false) => {}
                Err(error) => warn!(path = %path.display(), %error, "failed to remove artifact"),
            }
        }
        removed
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        match self.paths.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn remove_path(path: &Path) -> io::Result<bool> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(error) => return Err(error),
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(true)
}
