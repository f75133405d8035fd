//! Smart Git transport gateway for a multi-tenant Git hosting service.
//!
//! Terminates Git's HTTP Smart protocol and authorizes SSH forced commands,
//! routes each namespace to its own tenant store, and bridges request and
//! response bytes to `git upload-pack` / `git receive-pack` subprocesses.

pub mod auth;
pub mod config;
pub mod error;
pub mod git;
pub mod health;
pub mod http;
pub mod metrics;
pub mod ssh;
pub mod tenant;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::auth::AccessEngine;
use crate::config::Config;
use crate::git::GitBridge;
use crate::metrics::MetricsRegistry;
use crate::tenant::{Directory, SchemaSource, TenantRouter};

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub directory: Arc<Directory>,
    pub tenants: Arc<TenantRouter>,
    pub engine: Arc<AccessEngine>,
    pub bridge: GitBridge,
    pub metrics: MetricsRegistry,
    /// Bearer secret guarding the `/api/ssh/*` endpoints, if configured.
    pub ssh_api_token: Option<String>,
}

impl AppState {
    /// Open the directory database, prepare the data tree and wire up the
    /// router, engine and bridge for `config`.
    pub fn new(config: Config) -> Result<Self> {
        let orgs_dir = config.storage.orgs_dir();
        std::fs::create_dir_all(&orgs_dir)
            .with_context(|| format!("failed to create data directory: {}", orgs_dir.display()))?;

        let metrics = MetricsRegistry::new();

        let main_db = config.storage.main_db_path();
        let directory = Arc::new(
            Directory::open(&main_db)
                .with_context(|| format!("failed to open directory database: {}", main_db.display()))?,
        );

        let tenants = Arc::new(TenantRouter::new(
            orgs_dir,
            SchemaSource::from_config(config.storage.tenant_schema.as_deref()),
            metrics.clone(),
        ));

        let engine = Arc::new(AccessEngine::new(
            Arc::clone(&directory),
            Arc::clone(&tenants),
            metrics.clone(),
        ));

        let bridge = GitBridge::new(
            config.git.binary.clone(),
            config.git.service_timeout_secs.map(Duration::from_secs),
            metrics.clone(),
        );

        let ssh_api_token = config.ssh.api_token();

        Ok(Self {
            config: Arc::new(config),
            directory,
            tenants,
            engine,
            bridge,
            metrics,
            ssh_api_token,
        })
    }
}
