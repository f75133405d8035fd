//! `GET /api/ssh/keys`: authorized-keys export for `sshd`'s
//! `AuthorizedKeysCommand`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::tenant::SshKey;
use crate::AppState;

const KEY_OPTIONS: &str = "no-port-forwarding,no-X11-forwarding,no-agent-forwarding,no-pty";

/// One forced-command line, or `None` when the key cannot be written safely.
pub fn authorized_keys_line(shell_command: &str, key: &SshKey) -> Option<String> {
    let unsafe_text = |s: &str| s.contains(['"', '\n', '\r']);
    if unsafe_text(&key.user_id) || unsafe_text(&key.public_key) || key.public_key.is_empty() {
        return None;
    }
    Some(format!(
        "command=\"{shell_command} {}\",{KEY_OPTIONS} {}",
        key.user_id, key.public_key
    ))
}

pub async fn handle_keys(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if !super::bearer_matches(&headers, state.ssh_api_token.as_deref()) {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    let keys = match state.directory.list_ssh_keys().await {
        Ok(keys) => keys,
        Err(e) => {
            error!(error = %e, "failed to list ssh keys");
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response();
        }
    };

    let mut body = String::new();
    for key in &keys {
        match authorized_keys_line(&state.config.ssh.shell_command, key) {
            Some(line) => {
                body.push_str(&line);
                body.push('\n');
            }
            None => warn!(key_id = %key.id, "skipping ssh key with unsafe characters"),
        }
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}
