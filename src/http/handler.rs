//! Main axum router and HTTP request handlers for the gateway.
//!
//! Routes:
//! - `GET  /{namespace}/{repo}.git/info/refs?service=...` - ref advertisement
//! - `POST /{namespace}/{repo}.git/git-upload-pack`       - fetch / clone
//! - `POST /{namespace}/{repo}.git/git-receive-pack`      - push
//! - `GET  /{repo}.git/info/refs`, `POST /{repo}.git/...`  - same, against the root namespace
//! - `POST /api/ssh/authorize`                            - SSH forced-command authorization
//! - `GET  /api/ssh/keys`                                 - authorized-keys export
//! - `GET  /api/repos/check`                              - repository name availability
//! - `GET  /healthz`                                      - Health check
//! - `GET  /metrics`                                      - Prometheus metrics

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument, warn};

use super::encoding::{is_supported_encoding, request_body};
use crate::auth::{resolve_requester, Requester, TransportCommand};
use crate::error::GatewayError;
use crate::git::{ensure_repo, resolve_repo_path, ResponseStream, Service};
use crate::metrics::Transport;
use crate::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    // Root-namespace routes reuse `{namespace}` as the first parameter name
    // because sibling routes must agree on it; the value is the repository.
    let git = Router::new()
        .route("/{namespace}/{repo}/info/refs", get(handle_info_refs))
        .route("/{namespace}/{repo}/git-upload-pack", post(handle_upload_pack))
        .route("/{namespace}/{repo}/git-receive-pack", post(handle_receive_pack))
        .route("/{namespace}/info/refs", get(handle_root_info_refs))
        .route("/{namespace}/git-upload-pack", post(handle_root_upload_pack))
        .route("/{namespace}/git-receive-pack", post(handle_root_receive_pack))
        .layer(middleware::map_response_with_state(
            Arc::clone(&state),
            add_basic_challenge,
        ));

    Router::new()
        .merge(git)
        .route("/api/ssh/authorize", post(crate::ssh::authorize::handle_authorize))
        .route("/api/ssh/keys", get(crate::ssh::keys::handle_keys))
        .route("/api/repos/check", get(handle_repo_check))
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query parameter types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InfoRefsQuery {
    service: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoCheckQuery {
    namespace: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct RepoCheckResponse {
    available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

// ---------------------------------------------------------------------------
// Git Smart HTTP handlers
// ---------------------------------------------------------------------------

async fn handle_info_refs(
    State(state): State<Arc<AppState>>,
    Path((namespace, repo)): Path<(String, String)>,
    Query(query): Query<InfoRefsQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    serve_info_refs(&state, &namespace, &repo, query, &headers).await
}

async fn handle_root_info_refs(
    State(state): State<Arc<AppState>>,
    Path(repo): Path<String>,
    Query(query): Query<InfoRefsQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let namespace = root_namespace(&state)?;
    serve_info_refs(&state, namespace, &repo, query, &headers).await
}

async fn handle_upload_pack(
    State(state): State<Arc<AppState>>,
    Path((namespace, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    serve_service(&state, Service::UploadPack, &namespace, &repo, &headers, body).await
}

async fn handle_receive_pack(
    State(state): State<Arc<AppState>>,
    Path((namespace, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    serve_service(&state, Service::ReceivePack, &namespace, &repo, &headers, body).await
}

async fn handle_root_upload_pack(
    State(state): State<Arc<AppState>>,
    Path(repo): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let namespace = root_namespace(&state)?;
    serve_service(&state, Service::UploadPack, namespace, &repo, &headers, body).await
}

async fn handle_root_receive_pack(
    State(state): State<Arc<AppState>>,
    Path(repo): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let namespace = root_namespace(&state)?;
    serve_service(&state, Service::ReceivePack, namespace, &repo, &headers, body).await
}

/// `GET .../info/refs?service=git-upload-pack|git-receive-pack`
///
/// Emits the pkt-line service header followed by the subprocess's ref
/// advertisement.
#[instrument(skip_all, fields(%namespace, %repo))]
async fn serve_info_refs(
    state: &AppState,
    namespace: &str,
    repo: &str,
    query: InfoRefsQuery,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let service: Service = query
        .service
        .ok_or_else(|| AppError::BadRequest("service parameter required".into()))?
        .parse()?;
    let command = transport_command(state, service, namespace, repo)?;

    let requester = requester(state, headers).await?;
    let grant = state
        .engine
        .authorize(&command, &requester)
        .await
        .map_err(|e| challenge_anonymous(e, &requester))?;

    ensure_repo(state.bridge.git_bin(), grant.repo_path.as_path()).await?;
    state.metrics.metrics.record_request(service, Transport::Http);

    let stream = state
        .bridge
        .advertise_refs(service, &grant.repo_path, git_protocol(headers))?;
    Ok(git_response(service.advertisement_content_type(), stream))
}

/// `POST .../git-upload-pack` and `POST .../git-receive-pack`
#[instrument(skip_all, fields(%service, %namespace, %repo))]
async fn serve_service(
    state: &AppState,
    service: Service,
    namespace: &str,
    repo: &str,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let command = transport_command(state, service, namespace, repo)?;

    // Pushes never run anonymously; challenge before doing any work.
    if !service.is_read_only() && !headers.contains_key(header::AUTHORIZATION) {
        return Err(GatewayError::Unauthorized("authentication required to push".into()).into());
    }

    let requester = requester(state, headers).await?;
    let grant = state
        .engine
        .authorize(&command, &requester)
        .await
        .map_err(|e| challenge_anonymous(e, &requester))?;

    // The body is only read once the caller is allowed to run the service.
    if !is_supported_encoding(headers) {
        return Err(AppError::UnsupportedMediaType("unsupported Content-Encoding".into()));
    }
    ensure_repo(state.bridge.git_bin(), grant.repo_path.as_path()).await?;
    let body = request_body(headers, body).await?;
    state.metrics.metrics.record_request(service, Transport::Http);

    let stream = state
        .bridge
        .stateless_rpc(service, &grant.repo_path, git_protocol(headers), body)?;
    Ok(git_response(service.result_content_type(), stream))
}

// ---------------------------------------------------------------------------
// API handlers
// ---------------------------------------------------------------------------

/// `GET /api/repos/check?namespace=<slug>&name=<repo>`
async fn handle_repo_check(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RepoCheckQuery>,
) -> Response {
    let reply = |status: StatusCode, available: bool, error: Option<&str>| {
        (
            status,
            Json(RepoCheckResponse {
                available,
                error: error.map(str::to_string),
            }),
        )
            .into_response()
    };

    let (Some(namespace), Some(name)) = (query.namespace, query.name) else {
        return reply(StatusCode::BAD_REQUEST, false, Some("missing parameters"));
    };
    if let Err(e) = resolve_repo_path(state.tenants.orgs_dir(), &namespace, &name) {
        return reply(StatusCode::BAD_REQUEST, false, Some(e.to_string().as_str()));
    }

    let lookup = async {
        if state.directory.find_namespace(&namespace).await?.is_none() {
            return Ok(None);
        }
        let store = state.tenants.get_store(&namespace).await?;
        Ok::<_, GatewayError>(Some(store.find_repository(&name).await?.is_none()))
    };

    match lookup.await {
        Ok(Some(available)) => reply(StatusCode::OK, available, None),
        Ok(None) => reply(StatusCode::NOT_FOUND, false, Some("namespace not found")),
        Err(e) => {
            error!(error = %e, %namespace, "repository availability check failed");
            reply(StatusCode::INTERNAL_SERVER_ERROR, false, Some("internal server error"))
        }
    }
}

/// `GET /healthz`
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health_state = crate::health::HealthState {
        config: Arc::clone(&state.config),
        directory: Arc::clone(&state.directory),
    };
    crate::health::health_handler(State(health_state)).await
}

/// `GET /metrics`
///
/// Returns Prometheus metrics collected by the gateway.
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let buf = state
        .metrics
        .encode()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("metrics encoding failed: {e}")))?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn root_namespace(state: &AppState) -> Result<&str, AppError> {
    state
        .config
        .root_namespace
        .as_deref()
        .ok_or(AppError::NotFound)
}

/// Validate the URL segments and build the command the engine decides on.
fn transport_command(
    state: &AppState,
    service: Service,
    namespace: &str,
    repo: &str,
) -> Result<TransportCommand, GatewayError> {
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    // Traversal checks run here, before any lookup or filesystem access.
    resolve_repo_path(state.tenants.orgs_dir(), namespace, repo)?;
    Ok(TransportCommand {
        service,
        namespace: namespace.to_string(),
        repo: repo.to_string(),
    })
}

async fn requester(state: &AppState, headers: &HeaderMap) -> Result<Requester, GatewayError> {
    let header = match headers.get(header::AUTHORIZATION) {
        None => None,
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| GatewayError::Unauthorized("malformed authorization header".into()))?,
        ),
    };
    resolve_requester(&state.directory, header).await
}

/// A refusal for a caller who sent no credentials becomes a challenge, so
/// Git prompts for a username and token instead of giving up.
fn challenge_anonymous(err: GatewayError, requester: &Requester) -> GatewayError {
    match err {
        GatewayError::Forbidden if requester.is_anonymous() => {
            GatewayError::Unauthorized("authentication required".into())
        }
        other => other,
    }
}

/// The `Git-Protocol` header, when it only carries `key=value` pairs.
fn git_protocol(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("git-protocol")?.to_str().ok()?;
    let safe = !value.is_empty()
        && value.len() <= 256
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"=:,._-".contains(&b));
    if safe {
        Some(value)
    } else {
        warn!("ignoring Git-Protocol header with unexpected characters");
        None
    }
}

fn git_response(content_type: &'static str, stream: ResponseStream) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache"),
            (header::PRAGMA, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Attach `WWW-Authenticate: Basic realm="..."` to every 401 from the Git
/// routes.
async fn add_basic_challenge(State(state): State<Arc<AppState>>, mut response: Response) -> Response {
    if response.status() == StatusCode::UNAUTHORIZED
        && !response.headers().contains_key(header::WWW_AUTHENTICATE)
    {
        let challenge = format!("Basic realm=\"{}\"", state.config.server.realm);
        if let Ok(value) = HeaderValue::from_str(&challenge) {
            response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }
    }
    response
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Gateway(GatewayError),
    BadRequest(String),
    UnsupportedMediaType(String),
    NotFound,
    /// An unexpected internal error.
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Gateway(err) => gateway_response(err),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::UnsupportedMediaType(msg) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg).into_response()
            }
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            AppError::Internal(err) => {
                error!(error = %err, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

fn gateway_response(err: GatewayError) -> Response {
    use GatewayError as E;

    let status = match &err {
        E::InvalidPath(_) | E::InvalidService(_) | E::MalformedCommand(_) | E::InvalidRepoPath(_) => {
            StatusCode::BAD_REQUEST
        }
        E::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        E::Forbidden => StatusCode::FORBIDDEN,
        E::NamespaceNotFound(_) | E::RepositoryNotFound(_) => StatusCode::NOT_FOUND,
        E::SchemaInit { .. }
        | E::RepoInit { .. }
        | E::Store(_)
        | E::LockPoisoned
        | E::Spawn { .. }
        | E::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        // Details may name filesystem paths; keep them in the log.
        error!(error = %err, "request failed");
        return (status, "Internal server error").into_response();
    }
    (status, err.to_string()).into_response()
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::Gateway(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::tenant::NamespaceKind;
    use crate::test_support::fake_git;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use tower::ServiceExt;

    struct Harness {
        tmp: tempfile::TempDir,
        state: Arc<AppState>,
        owner_auth: String,
        stranger_auth: String,
    }

    async fn harness() -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let git = fake_git(tmp.path());
        let yaml = format!(
            "storage:\n  data_dir: {}\ngit:\n  binary: {}\nroot_namespace: acme\n",
            tmp.path().join("data").display(),
            git.display(),
        );
        let state = Arc::new(AppState::new(parse_config(&yaml).unwrap()).unwrap());

        let alice = state.directory.create_user("alice", "alice@example.com").await.unwrap();
        let bob = state.directory.create_user("bob", "bob@example.com").await.unwrap();
        state
            .directory
            .create_namespace("acme", NamespaceKind::Org, Some(&alice.id), false)
            .await
            .unwrap();
        let store = state.tenants.get_store("acme").await.unwrap();
        store.create_repository("widgets", None, false).await.unwrap();
        store.create_repository("secret", None, true).await.unwrap();

        let alice_token = state.directory.add_access_token(&alice.id, None).await.unwrap();
        let bob_token = state.directory.add_access_token(&bob.id, None).await.unwrap();

        Harness {
            tmp,
            state,
            owner_auth: basic("alice", &alice_token),
            stranger_auth: basic("bob", &bob_token),
        }
    }

    fn basic(user: &str, token: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{token}")))
    }

    async fn send(h: &Harness, req: axum::http::Request<Body>) -> Response {
        create_router(Arc::clone(&h.state)).oneshot(req).await.unwrap()
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn body_bytes(resp: Response) -> Vec<u8> {
        axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn info_refs_starts_with_the_service_header() {
        let h = harness().await;
        let resp = send(&h, get("/acme/widgets.git/info/refs?service=git-upload-pack")).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "application/x-git-upload-pack-advertisement"
        );
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-cache");
        let body = body_bytes(resp).await;
        assert!(body.starts_with(b"001e# service=git-upload-pack\n0000ADVERTISE upload-pack"));

        // The repository was materialised on first use.
        assert!(h
            .tmp
            .path()
            .join("data/orgs/acme/repos/widgets.git/HEAD")
            .is_file());
    }

    #[tokio::test]
    async fn info_refs_forwards_git_protocol() {
        let h = harness().await;
        let req = axum::http::Request::get("/acme/widgets.git/info/refs?service=git-upload-pack")
            .header("Git-Protocol", "version=2")
            .body(Body::empty())
            .unwrap();
        let body = body_bytes(send(&h, req).await).await;
        assert!(body.ends_with(b"ADVERTISE upload-pack version=2\n"));
    }

    #[tokio::test]
    async fn info_refs_requires_a_known_service() {
        let h = harness().await;
        let resp = send(&h, get("/acme/widgets.git/info/refs")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(&h, get("/acme/widgets.git/info/refs?service=git-upload-archive")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn traversal_is_rejected_before_any_io() {
        let h = harness().await;
        let resp = send(&h, get("/acme/..git/info/refs?service=git-upload-pack")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(!h.tmp.path().join("data/orgs/acme/repos").exists());
    }

    #[tokio::test]
    async fn unknown_repository_is_not_found() {
        let h = harness().await;
        let resp = send(&h, get("/acme/nope.git/info/refs?service=git-upload-pack")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = send(&h, get("/ghost/widgets.git/info/refs?service=git-upload-pack")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn anonymous_push_is_challenged_before_spawning() {
        let h = harness().await;
        let req = axum::http::Request::post("/acme/widgets.git/git-receive-pack")
            .body(Body::from("0000"))
            .unwrap();
        let resp = send(&h, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers()[header::WWW_AUTHENTICATE],
            "Basic realm=\"forgegate\""
        );
        assert!(!h.tmp.path().join("data/orgs/acme/repos/widgets.git").exists());
    }

    #[tokio::test]
    async fn anonymous_push_advertisement_is_challenged() {
        let h = harness().await;
        let resp = send(&h, get("/acme/widgets.git/info/refs?service=git-receive-pack")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn bad_credentials_are_unauthorized() {
        let h = harness().await;
        let req = axum::http::Request::post("/acme/widgets.git/git-receive-pack")
            .header(header::AUTHORIZATION, basic("alice", "wrong"))
            .body(Body::from("0000"))
            .unwrap();
        assert_eq!(send(&h, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn non_owner_push_is_forbidden() {
        let h = harness().await;
        let req = axum::http::Request::post("/acme/widgets.git/git-receive-pack")
            .header(header::AUTHORIZATION, &h.stranger_auth)
            .body(Body::from("0000"))
            .unwrap();
        assert_eq!(send(&h, req).await.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn owner_push_streams_the_result() {
        let h = harness().await;
        let payload = b"00a0 0000000000000000000000000000000000000000 refs/heads/main\n0000PACK".to_vec();
        let req = axum::http::Request::post("/acme/widgets.git/git-receive-pack")
            .header(header::AUTHORIZATION, &h.owner_auth)
            .header(header::CONTENT_TYPE, "application/x-git-receive-pack-request")
            .body(Body::from(payload.clone()))
            .unwrap();
        let resp = send(&h, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "application/x-git-receive-pack-result"
        );
        assert_eq!(body_bytes(resp).await, payload);
    }

    #[tokio::test]
    async fn anonymous_clone_of_public_repo_streams_the_result() {
        let h = harness().await;
        let req = axum::http::Request::post("/acme/widgets.git/git-upload-pack")
            .body(Body::from("0009done\n"))
            .unwrap();
        let resp = send(&h, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_bytes(resp).await, b"0009done\n");
    }

    #[tokio::test]
    async fn private_clone_needs_the_owner() {
        let h = harness().await;
        let resp = send(&h, get("/acme/secret.git/info/refs?service=git-upload-pack")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = axum::http::Request::get("/acme/secret.git/info/refs?service=git-upload-pack")
            .header(header::AUTHORIZATION, &h.stranger_auth)
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&h, req).await.status(), StatusCode::FORBIDDEN);

        let req = axum::http::Request::get("/acme/secret.git/info/refs?service=git-upload-pack")
            .header(header::AUTHORIZATION, &h.owner_auth)
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&h, req).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unsupported_content_encoding_is_415() {
        let h = harness().await;
        let req = axum::http::Request::post("/acme/widgets.git/git-upload-pack")
            .header(header::CONTENT_ENCODING, "br")
            .body(Body::from("x"))
            .unwrap();
        assert_eq!(send(&h, req).await.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    fn gzip_post(uri: &str, auth: Option<&str>, body: Vec<u8>) -> axum::http::Request<Body> {
        let mut req = axum::http::Request::post(uri).header(header::CONTENT_ENCODING, "gzip");
        if let Some(auth) = auth {
            req = req.header(header::AUTHORIZATION, auth);
        }
        req.body(Body::from(body)).unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        use std::io::Write;
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[tokio::test]
    async fn gzip_bodies_are_not_read_before_authorization() {
        let h = harness().await;
        let junk = b"not gzip at all".to_vec();

        let resp = send(&h, gzip_post("/acme/secret.git/git-upload-pack", None, junk.clone())).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));

        let resp = send(
            &h,
            gzip_post("/acme/secret.git/git-upload-pack", Some(&h.stranger_auth), junk.clone()),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = send(&h, gzip_post("/ghost/widgets.git/git-upload-pack", None, junk)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        assert!(!h.tmp.path().join("data/orgs/acme/repos/secret.git").exists());
    }

    #[tokio::test]
    async fn owner_gzip_body_is_inflated_into_the_subprocess() {
        let h = harness().await;
        let negotiation = b"0032want 0123456789abcdef0123456789abcdef01234567\n00000009done\n".to_vec();

        let resp = send(
            &h,
            gzip_post("/acme/secret.git/git-upload-pack", Some(&h.owner_auth), gzip(&negotiation)),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "application/x-git-upload-pack-result"
        );
        assert_eq!(body_bytes(resp).await, negotiation);
    }

    #[tokio::test]
    async fn authorized_corrupt_gzip_is_a_bad_request() {
        let h = harness().await;
        let resp = send(
            &h,
            gzip_post("/acme/widgets.git/git-upload-pack", None, b"not gzip at all".to_vec()),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn root_routes_serve_the_root_namespace() {
        let h = harness().await;
        let resp = send(&h, get("/widgets.git/info/refs?service=git-upload-pack")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_bytes(resp).await;
        assert!(body.starts_with(b"001e# service=git-upload-pack\n0000"));
    }

    #[tokio::test]
    async fn repo_check_reports_availability() {
        let h = harness().await;

        let resp = send(&h, get("/api/repos/check?namespace=acme&name=widgets")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_bytes(resp).await, br#"{"available":false}"#);

        let resp = send(&h, get("/api/repos/check?namespace=acme&name=gadgets")).await;
        assert_eq!(body_bytes(resp).await, br#"{"available":true}"#);

        let resp = send(&h, get("/api/repos/check?namespace=ghost&name=gadgets")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = send(&h, get("/api/repos/check?namespace=acme")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn metrics_count_served_requests() {
        let h = harness().await;
        let _ = body_bytes(send(&h, get("/acme/widgets.git/info/refs?service=git-upload-pack")).await).await;

        let text = body_bytes(send(&h, get("/metrics")).await).await;
        let text = String::from_utf8(text).unwrap();
        assert!(text.contains("forgegate_git_requests_total"));
        assert!(text.contains("transport=\"Http\""));
    }

    #[test]
    fn git_protocol_header_is_filtered() {
        let mut headers = HeaderMap::new();
        headers.insert("git-protocol", HeaderValue::from_static("version=2:object-format=sha1"));
        assert_eq!(git_protocol(&headers), Some("version=2:object-format=sha1"));

        headers.insert("git-protocol", HeaderValue::from_static("version=2; rm -rf"));
        assert_eq!(git_protocol(&headers), None);
    }
}
