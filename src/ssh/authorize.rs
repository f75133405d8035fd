//! `POST /api/ssh/authorize`: the decision point for SSH forced commands.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::auth::Requester;
use crate::error::GatewayError;
use crate::git::{ensure_repo, Service};
use crate::metrics::Transport;
use crate::AppState;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub user_id: Option<String>,
    pub original_command: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    pub allowed: bool,
    /// Absolute path of the bare repository to run the service against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
    /// `<namespace>/repos/<repo>.git`, relative to the orgs directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthorizeResponse {
    fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            error: Some(reason.into()),
            ..Self::default()
        }
    }
}

#[instrument(skip_all)]
pub async fn handle_authorize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AuthorizeRequest>,
) -> Response {
    if !super::bearer_matches(&headers, state.ssh_api_token.as_deref()) {
        warn!("rejected authorize call with a bad bearer token");
        return reply(StatusCode::UNAUTHORIZED, AuthorizeResponse::denied("unauthorized"));
    }

    let (Some(user_id), Some(command)) = (req.user_id, req.original_command) else {
        return reply(
            StatusCode::BAD_REQUEST,
            AuthorizeResponse::denied("userId and originalCommand are required"),
        );
    };
    if user_id.is_empty() {
        return reply(StatusCode::BAD_REQUEST, AuthorizeResponse::denied("userId is empty"));
    }

    let requester = Requester::User(user_id);
    let grant = match state.engine.authorize_command(&command, &requester).await {
        Ok(grant) => grant,
        Err(e) if e.is_client_error() => {
            info!(error = %e, "ssh command denied");
            return reply(StatusCode::OK, AuthorizeResponse::denied(e.to_string()));
        }
        Err(e) => return internal(e),
    };

    if let Err(e) = ensure_repo(state.bridge.git_bin(), grant.repo_path.as_path()).await {
        return internal(e);
    }
    state.metrics.metrics.record_request(grant.service, Transport::Ssh);

    reply(
        StatusCode::OK,
        AuthorizeResponse {
            allowed: true,
            repo_path: Some(grant.repo_path.to_string()),
            relative_path: Some(grant.repo_path.relative().display().to_string()),
            service: Some(grant.service),
            error: None,
        },
    )
}

fn internal(err: GatewayError) -> Response {
    error!(error = %err, "ssh authorization failed");
    reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        AuthorizeResponse::denied("internal server error"),
    )
}

fn reply(status: StatusCode, body: AuthorizeResponse) -> Response {
    (status, Json(body)).into_response()
}
