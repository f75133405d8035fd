//! Tenant-routed data access.
//!
//! - [`Directory`]: the shared `main.db` with users, namespaces and
//!   credentials.
//! - [`TenantRouter`]: one lazily opened [`TenantStore`] per namespace.
//! - [`HandleCache`]: the keyed single-flight cache behind the router.

pub mod cache;
pub mod directory;
pub mod router;
pub mod store;

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::GatewayError;

pub use cache::HandleCache;
pub use directory::{Directory, Namespace, NamespaceKind, SshKey, User};
pub use router::{SchemaSource, TenantRouter};
pub use store::{Repository, TenantStore};

/// Run `f` against a shared SQLite connection on the blocking pool.
pub(crate) async fn with_conn<R, F>(conn: &Arc<Mutex<Connection>>, f: F) -> Result<R, GatewayError>
where
    R: Send + 'static,
    F: FnOnce(&Connection) -> Result<R, GatewayError> + Send + 'static,
{
    let conn = conn.clone();
    tokio::task::spawn_blocking(move || {
        let conn = conn.lock().map_err(|_| GatewayError::LockPoisoned)?;
        f(&conn)
    })
    .await?
}
