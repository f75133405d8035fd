//! Transport authorization.
//!
//! Both front-ends (HTTP Smart protocol and the SSH authorize endpoint) come
//! through [`AccessEngine`], so a given requester gets the same answer for
//! the same repository regardless of transport.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use super::command::{parse_transport_command, TransportCommand};
use crate::error::GatewayError;
use crate::git::{resolve_repo_path, RepoPath, Service};
use crate::metrics::{MetricsRegistry, Outcome};
use crate::tenant::{Directory, Namespace, Repository, TenantRouter};

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requester {
    Anonymous,
    User(String),
}

impl Requester {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::User(id) => Some(id.as_str()),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

/// The access rule, independent of any lookup.
///
/// Fetching a public repository is open to everyone.  Everything else
/// (pushing anywhere, fetching a private repository) requires ownership of
/// the namespace.
pub fn is_permitted(
    service: Service,
    repository_is_private: bool,
    namespace: &Namespace,
    requester: &Requester,
) -> bool {
    if service.is_read_only() && !repository_is_private {
        return true;
    }
    requester
        .user_id()
        .is_some_and(|id| namespace.is_owned_by(id))
}

/// An approved transport operation.
///
/// `repo_path` was derived from validated input, so callers spawn against
/// it directly instead of rebuilding a path from the request.
#[derive(Debug, Clone)]
pub struct Grant {
    pub service: Service,
    pub repo_path: RepoPath,
    pub repository: Repository,
}

pub struct AccessEngine {
    directory: Arc<Directory>,
    tenants: Arc<TenantRouter>,
    metrics: MetricsRegistry,
}

impl AccessEngine {
    pub fn new(directory: Arc<Directory>, tenants: Arc<TenantRouter>, metrics: MetricsRegistry) -> Self {
        Self {
            directory,
            tenants,
            metrics,
        }
    }

    /// Parse a raw SSH transport command and authorize it.
    pub async fn authorize_command(&self, raw: &str, requester: &Requester) -> Result<Grant, GatewayError> {
        let command = match parse_transport_command(raw) {
            Ok(command) => command,
            Err(e) => {
                self.metrics.metrics.record_authorization(Outcome::Error);
                return Err(e);
            }
        };
        self.authorize(&command, requester).await
    }

    /// Decide whether `requester` may run `command`.
    #[instrument(skip(self, command), fields(command = %command))]
    pub async fn authorize(&self, command: &TransportCommand, requester: &Requester) -> Result<Grant, GatewayError> {
        let result = self.evaluate(command, requester).await;
        let outcome = match &result {
            Ok(_) => Outcome::Allowed,
            Err(GatewayError::Forbidden) => Outcome::Denied,
            Err(_) => Outcome::Error,
        };
        self.metrics.metrics.record_authorization(outcome);
        result
    }

    async fn evaluate(&self, command: &TransportCommand, requester: &Requester) -> Result<Grant, GatewayError> {
        // Validates both segments before anything is looked up.
        let repo_path = resolve_repo_path(self.tenants.orgs_dir(), &command.namespace, &command.repo)?;

        let namespace = self
            .directory
            .find_namespace(&command.namespace)
            .await?
            .ok_or_else(|| GatewayError::NamespaceNotFound(command.namespace.clone()))?;

        let store = self.tenants.get_store(&command.namespace).await?;
        let repository = store
            .find_repository(&command.repo)
            .await?
            .ok_or_else(|| {
                GatewayError::RepositoryNotFound(format!("{}/{}", command.namespace, command.repo))
            })?;

        if !is_permitted(command.service, repository.is_private, &namespace, requester) {
            info!(requester = ?requester, "transport access denied");
            return Err(GatewayError::Forbidden);
        }

        debug!(requester = ?requester, path = %repo_path, "transport access granted");
        Ok(Grant {
            service: command.service,
            repo_path,
            repository,
        })
    }
}
