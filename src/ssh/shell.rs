//! `forgegate shell <user-id>`: the forced command run by `sshd`.
//!
//! Never offers an interactive shell.  The requested Git command is sent to
//! the gateway for a decision; on approval this process is replaced by git.

use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, instrument};

use super::authorize::{AuthorizeRequest, AuthorizeResponse};
use crate::config::Config;

/// Environment variable `sshd` sets to the client's requested command.
pub const ORIGINAL_COMMAND_ENV: &str = "SSH_ORIGINAL_COMMAND";

/// Ask the gateway whether `user_id` may run `original_command`.
///
/// Denials come back as `Ok` with `allowed: false`; only transport failures
/// and unreadable replies are errors.
#[instrument(skip_all, fields(%url, %user_id))]
pub async fn request_authorization(
    client: &reqwest::Client,
    url: &str,
    token: Option<&str>,
    user_id: &str,
    original_command: &str,
) -> Result<AuthorizeResponse> {
    let mut req = client.post(url).json(&AuthorizeRequest {
        user_id: Some(user_id.to_string()),
        original_command: Some(original_command.to_string()),
    });
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }

    let resp = req
        .send()
        .await
        .with_context(|| format!("authorize request to {url} failed"))?;
    let status = resp.status();
    let body = resp.bytes().await.context("failed to read authorize response")?;
    debug!(%status, bytes = body.len(), "authorize response received");

    serde_json::from_slice(&body)
        .with_context(|| format!("unexpected authorize response ({status})"))
}

/// Run the wrapper.  Returns the exit code for a refused command; an
/// approved command never returns because the process becomes git.
pub async fn run(config: &Config, user_id: &str) -> Result<i32> {
    let Some(original_command) = std::env::var(ORIGINAL_COMMAND_ENV)
        .ok()
        .filter(|c| !c.trim().is_empty())
    else {
        eprintln!("Interactive shell access is not available. Use git to push and pull.");
        return Ok(1);
    };

    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let token = config.ssh.api_token();
    let decision = request_authorization(
        &client,
        &config.ssh.authorize_url,
        token.as_deref(),
        user_id,
        &original_command,
    )
    .await?;

    if !decision.allowed {
        let reason = decision.error.as_deref().unwrap_or("access denied");
        eprintln!("forgegate: {reason}");
        return Ok(1);
    }

    let (Some(service), Some(repo_path)) = (decision.service, decision.repo_path) else {
        bail!("authorize response approved the command without a service and path");
    };

    info!(%user_id, %service, %repo_path, "executing git service");
    Err(exec_git(&config.git.binary, service.subcommand(), Path::new(&repo_path)))
}

/// Replace the current process with `git <subcommand> <repo_path>`.  Only
/// returns on failure.
fn exec_git(git_bin: &Path, subcommand: &str, repo_path: &Path) -> anyhow::Error {
    let err = Command::new(git_bin).arg(subcommand).arg(repo_path).exec();
    anyhow::Error::new(err).context(format!("failed to exec {}", git_bin.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::git::Service;
    use crate::http::create_router;
    use crate::tenant::NamespaceKind;
    use crate::test_support::fake_git;
    use crate::AppState;
    use std::sync::Arc;

    /// Serve the real router on an ephemeral port.
    async fn spawn_gateway(tmp: &tempfile::TempDir) -> (String, String) {
        let git = fake_git(tmp.path());
        let yaml = format!(
            "storage:\n  data_dir: {}\ngit:\n  binary: {}\n",
            tmp.path().join("data").display(),
            git.display(),
        );
        let state = Arc::new(AppState::new(parse_config(&yaml).unwrap()).unwrap());
        let alice = state.directory.create_user("alice", "alice@example.com").await.unwrap();
        state
            .directory
            .create_namespace("acme", NamespaceKind::User, Some(&alice.id), false)
            .await
            .unwrap();
        state
            .tenants
            .get_store("acme")
            .await
            .unwrap()
            .create_repository("widgets", None, false)
            .await
            .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });
        (format!("http://{addr}/api/ssh/authorize"), alice.id)
    }

    #[tokio::test]
    async fn approved_command_carries_service_and_path() {
        let tmp = tempfile::tempdir().unwrap();
        let (url, alice) = spawn_gateway(&tmp).await;

        let decision = request_authorization(
            &reqwest::Client::new(),
            &url,
            None,
            &alice,
            "git-upload-pack 'acme/widgets.git'",
        )
        .await
        .unwrap();

        assert!(decision.allowed);
        assert_eq!(decision.service, Some(Service::UploadPack));
        assert!(decision.repo_path.unwrap().ends_with("acme/repos/widgets.git"));
    }

    #[tokio::test]
    async fn refusal_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let (url, _) = spawn_gateway(&tmp).await;

        let decision = request_authorization(
            &reqwest::Client::new(),
            &url,
            None,
            "mallory",
            "git-receive-pack 'acme/widgets.git'",
        )
        .await
        .unwrap();

        assert!(!decision.allowed);
        assert!(decision.error.is_some());
    }

    #[tokio::test]
    async fn unreachable_gateway_is_an_error() {
        let result = request_authorization(
            &reqwest::Client::new(),
            "http://127.0.0.1:1/api/ssh/authorize",
            None,
            "u",
            "git-upload-pack 'a/b.git'",
        )
        .await;
        assert!(result.is_err());
    }
}
