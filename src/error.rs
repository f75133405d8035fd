//! Gateway error taxonomy.
//!
//! Every validation and authorization failure is expressed as a
//! [`GatewayError`] before any subprocess is spawned.  The HTTP layer maps
//! variants onto status codes in [`crate::http::handler::AppError`]; the SSH
//! authorize endpoint reports the display text in its JSON body.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// A namespace or repository name failed the traversal checks.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The requested Git service is not `git-upload-pack` / `git-receive-pack`.
    #[error("invalid service: {0}")]
    InvalidService(String),

    /// An SSH original command did not match the transport grammar.
    #[error("invalid command format: {0}")]
    MalformedCommand(String),

    /// The quoted path in a transport command is not `<namespace>/<repo>.git`.
    #[error("invalid repo path: {0}")]
    InvalidRepoPath(String),

    /// Credentials are missing or could not be verified.
    #[error("authentication required: {0}")]
    Unauthorized(String),

    /// The requester is known but lacks rights on the namespace.
    #[error("access denied")]
    Forbidden,

    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    /// The tenant bootstrap script was missing or failed.
    #[error("schema initialisation failed for namespace {namespace}: {reason}")]
    SchemaInit { namespace: String, reason: String },

    /// `git init --bare` (or the directory creation before it) failed.
    #[error("repository initialisation failed at {path}: {reason}")]
    RepoInit { path: PathBuf, reason: String },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("store connection lock poisoned")]
    LockPoisoned,

    #[error("failed to spawn git {service}: {source}")]
    Spawn {
        service: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl GatewayError {
    /// `true` for errors caused by the caller's input rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPath(_)
                | Self::InvalidService(_)
                | Self::MalformedCommand(_)
                | Self::InvalidRepoPath(_)
                | Self::Unauthorized(_)
                | Self::Forbidden
                | Self::NamespaceNotFound(_)
                | Self::RepositoryNotFound(_)
        )
    }
}
