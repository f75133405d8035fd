//! Bare Git repository lifecycle management.
//!
//! Repositories are materialised lazily: every transport operation calls
//! [`ensure_repo`] first, which is a no-op once the bare repository exists.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::error::GatewayError;

// ---------------------------------------------------------------------------
// Ensure
// ---------------------------------------------------------------------------

/// Make sure a bare repository exists at `path`.
///
/// If the directory already contains a `HEAD` file this returns `Ok(false)`
/// without running anything.  Otherwise the parent tree is created and
/// `git init --bare` is run; `Ok(true)` signals that a repository was
/// created.  If initialisation fails, a directory created by this call is
/// removed again so it is never mistaken for a usable repository.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn ensure_repo(git_bin: &Path, path: &Path) -> Result<bool, GatewayError> {
    if is_bare_repo(path).await {
        debug!("bare repo already exists; skipping init");
        return Ok(false);
    }

    let existed = tokio::fs::try_exists(path).await.unwrap_or(false);

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| GatewayError::RepoInit {
                path: path.to_path_buf(),
                reason: format!("failed to create parent directory {}: {e}", parent.display()),
            })?;
    }

    let output = Command::new(git_bin)
        .arg("init")
        .arg("--bare")
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    let failure = match output {
        Ok(output) if output.status.success() => None,
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Some(format!(
                "git init --bare failed (status {}): {}",
                output.status,
                stderr.trim(),
            ))
        }
        Err(e) => Some(format!("failed to spawn git init --bare: {e}")),
    };

    if let Some(reason) = failure {
        if !existed {
            discard_partial(path).await;
        }
        return Err(GatewayError::RepoInit {
            path: path.to_path_buf(),
            reason,
        });
    }

    info!("bare repo initialised");
    Ok(true)
}

/// Remove whatever a failed init left behind.
async fn discard_partial(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!("removed partially initialised repo directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(error = %e, "failed to remove partially initialised repo directory"),
    }
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

/// Check whether `path` looks like a bare Git repository.
///
/// A bare repo must be a directory that contains a `HEAD` file.  This is a
/// lightweight heuristic, not a full integrity check.
pub async fn is_bare_repo(path: &Path) -> bool {
    let is_dir = tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);

    if !is_dir {
        return false;
    }

    tokio::fs::metadata(path.join("HEAD"))
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fake_git, failing_git, init_count};

    #[tokio::test]
    async fn missing_path_is_not_a_repo() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!is_bare_repo(&tmp.path().join("nope.git")).await);
    }

    #[tokio::test]
    async fn directory_without_head_is_not_a_repo() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!is_bare_repo(tmp.path()).await);
    }

    #[tokio::test]
    async fn ensure_repo_creates_parents_and_initialises() {
        let tmp = tempfile::tempdir().unwrap();
        let git = fake_git(tmp.path());
        let repo = tmp.path().join("orgs/acme/repos/widgets.git");

        let created = ensure_repo(&git, &repo).await.unwrap();

        assert!(created);
        assert!(is_bare_repo(&repo).await);
        assert_eq!(init_count(tmp.path()), 1);
    }

    #[tokio::test]
    async fn ensure_repo_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let git = fake_git(tmp.path());
        let repo = tmp.path().join("orgs/acme/repos/widgets.git");

        assert!(ensure_repo(&git, &repo).await.unwrap());
        let head_before = std::fs::read(repo.join("HEAD")).unwrap();

        assert!(!ensure_repo(&git, &repo).await.unwrap());

        assert_eq!(init_count(tmp.path()), 1, "second call must not run git init");
        assert_eq!(std::fs::read(repo.join("HEAD")).unwrap(), head_before);
    }

    #[tokio::test]
    async fn failed_init_surfaces_stderr_and_leaves_nothing_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let git = failing_git(tmp.path());
        let repo = tmp.path().join("orgs/acme/repos/widgets.git");

        let err = ensure_repo(&git, &repo).await.unwrap_err();

        match err {
            GatewayError::RepoInit { path, reason } => {
                assert_eq!(path, repo);
                assert!(reason.contains("fatal: cannot init"), "{reason}");
            }
            other => panic!("expected RepoInit, got {other:?}"),
        }
        assert!(!repo.exists());
    }

    #[tokio::test]
    async fn missing_git_binary_is_a_repo_init_error() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("acme/repos/widgets.git");
        let err = ensure_repo(&tmp.path().join("no-such-git"), &repo)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RepoInit { .. }));
    }
}
