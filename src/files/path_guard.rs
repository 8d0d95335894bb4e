//! Confinement of user-supplied paths to a base directory

use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Why a requested path was refused
#[derive(Error, Debug)]
pub enum PathRejection {
    #[error("empty path")]
    Empty,

    #[error("absolute paths are not allowed")]
    Absolute,

    #[error("path contains a NUL byte")]
    InvalidCharacter,

    #[error("path escapes the base directory")]
    Escape,

    #[error("failed to resolve path: {0}")]
    Unresolvable(#[source] io::Error),
}

impl PathRejection {
    /// Rejections caused by the request itself rather than the filesystem
    pub fn is_client_error(&self) -> bool {
        !matches!(self, PathRejection::Unresolvable(_))
    }
}

/// Resolves relative paths against a canonical base directory
#[derive(Debug, Clone)]
pub struct PathGuard {
    base: PathBuf,
}

impl PathGuard {
    /// Create a guard rooted at `base`
    ///
    /// The base is canonicalized once. A base that does not exist yet is kept
    /// as an absolute path; every lookup under it then resolves to "not found".
    pub fn new(base: impl AsRef<Path>) -> io::Result<Self> {
        let base = base.as_ref();
        let base = match std::fs::canonicalize(base) {
            Ok(canonical) => canonical,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(
                    base = %base.display(),
                    "Base directory does not exist; all lookups will miss"
                );
                std::path::absolute(base)?
            }
            Err(e) => return Err(e),
        };
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Lexically normalize `user_path` into a relative path with no `.` or `..`
    ///
    /// `..` segments may only cancel segments that precede them; popping past
    /// the base is an escape. Both `/` and `\` separate segments.
    pub fn normalize(user_path: &str) -> Result<PathBuf, PathRejection> {
        if user_path.trim().is_empty() {
            return Err(PathRejection::Empty);
        }
        if user_path.contains('\0') {
            return Err(PathRejection::InvalidCharacter);
        }
        if user_path.starts_with('/') || user_path.starts_with('\\') {
            return Err(PathRejection::Absolute);
        }

        let mut segments: Vec<&str> = Vec::new();
        for segment in user_path.split(['/', '\\']) {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(PathRejection::Escape);
                    }
                }
                other => {
                    // Drive letters and similar prefixes only exist as the
                    // first component of an absolute path.
                    let mut components = Path::new(other).components();
                    if !matches!(components.next(), Some(Component::Normal(_)))
                        || components.next().is_some()
                    {
                        return Err(PathRejection::Absolute);
                    }
                    segments.push(other);
                }
            }
        }

        Ok(segments.iter().collect())
    }

    /// Check that an already canonical path is the base or lies beneath it
    ///
    /// `Path::starts_with` compares whole components, so `/srv/large2` is not
    /// inside `/srv/large`.
    pub fn contains(&self, canonical: &Path) -> bool {
        canonical.starts_with(&self.base)
    }

    /// Resolve `user_path` to an absolute path inside the base (blocking I/O)
    pub fn resolve(&self, user_path: &str) -> Result<PathBuf, PathRejection> {
        let joined = self.base.join(Self::normalize(user_path)?);
        self.confine(joined.clone(), std::fs::canonicalize(&joined))
    }

    /// Async variant of [`PathGuard::resolve`] for request handlers
    pub async fn resolve_async(&self, user_path: &str) -> Result<PathBuf, PathRejection> {
        let joined = self.base.join(Self::normalize(user_path)?);
        let canonical = tokio::fs::canonicalize(&joined).await;
        self.confine(joined, canonical)
    }

    fn confine(
        &self,
        joined: PathBuf,
        canonical: io::Result<PathBuf>,
    ) -> Result<PathBuf, PathRejection> {
        match canonical {
            Ok(canonical) if self.contains(&canonical) => Ok(canonical),
            // A symlink inside the base pointing outside of it.
            Ok(_) => Err(PathRejection::Escape),
            // Nothing to follow; the lexical join is already confined and
            // the caller's open() reports the miss.
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                ) =>
            {
                Ok(joined)
            }
            Err(e) => Err(PathRejection::Unresolvable(e)),
        }
    }
}
