use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathGuardError {
    #[error("path must not be empty")]
    EmptyPath,
    #[error("sandbox root {path} is unavailable: {source}")]
    RootUnavailable { path: PathBuf, source: io::Error },
    #[error("sandbox root {0} is not a directory")]
    RootNotDirectory(PathBuf),
    #[error("path escapes sandbox root: {0}")]
    Escape(String),
    #[error("failed to resolve path {path}: {source}")]
    Resolve { path: PathBuf, source: io::Error },
}

/// Confines path resolution to one sandbox root.
///
/// Resolution is lexical first (`.` and `..` are folded without touching the
/// filesystem), then the deepest existing ancestor is canonicalized so that
/// symlinks pointing outside the root are caught. The returned path need not
/// exist yet.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, PathGuardError> {
        let root = root.as_ref();
        let canonical = root
            .canonicalize()
            .map_err(|source| PathGuardError::RootUnavailable {
                path: root.to_path_buf(),
                source,
            })?;
        if !canonical.is_dir() {
            return Err(PathGuardError::RootNotDirectory(canonical));
        }
        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` (relative to the root, or absolute) to a location that
    /// is the root itself or one of its descendants.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, PathGuardError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(PathGuardError::EmptyPath);
        }

        let candidate = Path::new(trimmed);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let normalized =
            normalize_lexically(&joined).ok_or_else(|| PathGuardError::Escape(trimmed.to_string()))?;
        if !normalized.starts_with(&self.root) {
            return Err(PathGuardError::Escape(trimmed.to_string()));
        }

        let resolved = canonicalize_existing_prefix(&normalized)?;
        if !resolved.starts_with(&self.root) {
            return Err(PathGuardError::Escape(trimmed.to_string()));
        }
        Ok(resolved)
    }

    /// Display form of `path` relative to the root.
    pub fn relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) if relative.as_os_str().is_empty() => ".".to_string(),
            Ok(relative) => relative.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }
}

fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                normalized.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
        }
    }
    Some(normalized)
}

fn canonicalize_existing_prefix(path: &Path) -> Result<PathBuf, PathGuardError> {
    for ancestor in path.ancestors() {
        if !ancestor.exists() {
            continue;
        }
        let canonical = ancestor
            .canonicalize()
            .map_err(|source| PathGuardError::Resolve {
                path: ancestor.to_path_buf(),
                source,
            })?;
        let remainder = path.strip_prefix(ancestor).unwrap_or(Path::new(""));
        return Ok(if remainder.as_os_str().is_empty() {
            canonical
        } else {
            canonical.join(remainder)
        });
    }
    Ok(path.to_path_buf())
}
