//! Namespace / repository name validation and on-disk path resolution.
//!
//! This is the only place where caller-supplied namespace and repository
//! strings are turned into filesystem locations.  Every transport path runs
//! through [`resolve_repo_path`] before touching the disk or spawning `git`.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::GatewayError;

/// A validated bare-repository location of the form
/// `<root>/<namespace>/repos/<repo>.git`.
///
/// Only constructible through [`resolve_repo_path`], so holding one implies
/// both segments passed the traversal checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPath {
    namespace: String,
    repo: String,
    full: PathBuf,
}

impl RepoPath {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Absolute (root-joined) location of the bare repository.
    pub fn as_path(&self) -> &Path {
        &self.full
    }

    /// Location relative to the repository root: `<namespace>/repos/<repo>.git`.
    pub fn relative(&self) -> PathBuf {
        relative_path(&self.namespace, &self.repo)
    }
}

impl AsRef<Path> for RepoPath {
    fn as_ref(&self) -> &Path {
        &self.full
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full.display())
    }
}

/// Validate one caller-supplied path segment (a namespace slug or a
/// repository name).
///
/// Rejects empty segments, `.`, anything containing `..`, path separators,
/// NUL and other control characters.
pub fn validate_segment(segment: &str, label: &str) -> Result<(), GatewayError> {
    if segment.is_empty() {
        return Err(GatewayError::InvalidPath(format!("{label} must not be empty")));
    }
    if segment == "."
        || segment.contains("..")
        || segment.contains('/')
        || segment.contains('\\')
        || segment.chars().any(char::is_control)
    {
        return Err(GatewayError::InvalidPath(format!(
            "invalid {label}: {segment:?}"
        )));
    }
    Ok(())
}

/// Validate a namespace slug.
///
/// On top of [`validate_segment`], rejects slugs ending in `.db`: tenant
/// databases live next to the namespace directories as `<slug>.db`, so such
/// a slug would alias another namespace's store.
pub fn validate_namespace(namespace: &str) -> Result<(), GatewayError> {
    validate_segment(namespace, "namespace")?;
    if namespace.to_ascii_lowercase().ends_with(".db") {
        return Err(GatewayError::InvalidPath(format!(
            "invalid namespace: {namespace:?}"
        )));
    }
    Ok(())
}

/// Map `(namespace, repo)` to `<root>/<namespace>/repos/<repo>.git`.
///
/// Pure: performs no I/O.
pub fn resolve_repo_path(root: &Path, namespace: &str, repo: &str) -> Result<RepoPath, GatewayError> {
    validate_namespace(namespace)?;
    validate_segment(repo, "repository")?;
    Ok(RepoPath {
        namespace: namespace.to_string(),
        repo: repo.to_string(),
        full: root.join(relative_path(namespace, repo)),
    })
}

fn relative_path(namespace: &str, repo: &str) -> PathBuf {
    Path::new(namespace)
        .join("repos")
        .join(format!("{repo}.git"))
}
