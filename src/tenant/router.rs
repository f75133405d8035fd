//! Namespace → tenant store routing.
//!
//! Every namespace has its own SQLite file at `<orgs>/<namespace>.db`.
//! [`TenantRouter::get_store`] opens it at most once per process and runs the
//! tenant bootstrap script when the file did not exist before.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::Connection;
use tracing::{debug, info, instrument, warn};

use super::cache::HandleCache;
use super::store::TenantStore;
use crate::error::GatewayError;
use crate::git::validate_namespace;
use crate::metrics::MetricsRegistry;

const BUILTIN_TENANT_SCHEMA: &str = include_str!("sql/tenant.sql");

/// Where the tenant bootstrap script comes from.
#[derive(Debug, Clone)]
pub enum SchemaSource {
    Builtin,
    File(PathBuf),
}

impl SchemaSource {
    pub fn from_config(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::File(path.to_path_buf()),
            None => Self::Builtin,
        }
    }

    fn load(&self, namespace: &str) -> Result<Cow<'static, str>, GatewayError> {
        match self {
            Self::Builtin => Ok(Cow::Borrowed(BUILTIN_TENANT_SCHEMA)),
            Self::File(path) => std::fs::read_to_string(path)
                .map(Cow::Owned)
                .map_err(|e| GatewayError::SchemaInit {
                    namespace: namespace.to_string(),
                    reason: format!("cannot read bootstrap script {}: {e}", path.display()),
                }),
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct TenantRouter {
    orgs_dir: PathBuf,
    schema: SchemaSource,
    cache: HandleCache<TenantStore>,
    /// Serialises file-level open/bootstrap per namespace, including opens
    /// whose caller has already gone away.
    open_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    bootstraps: Arc<AtomicU64>,
    metrics: MetricsRegistry,
}

impl TenantRouter {
    pub fn new(orgs_dir: impl Into<PathBuf>, schema: SchemaSource, metrics: MetricsRegistry) -> Self {
        Self {
            orgs_dir: orgs_dir.into(),
            schema,
            cache: HandleCache::new(),
            open_locks: Mutex::new(HashMap::new()),
            bootstraps: Arc::new(AtomicU64::new(0)),
            metrics,
        }
    }

    /// Root that holds tenant databases and repository trees.
    pub fn orgs_dir(&self) -> &Path {
        &self.orgs_dir
    }

    /// Return the store for `namespace`, opening (and on first creation
    /// bootstrapping) it if this process has not done so yet.
    ///
    /// Concurrent first calls for the same namespace share one open and one
    /// bootstrap.  A failed bootstrap removes the fresh file and caches
    /// nothing.
    #[instrument(skip(self))]
    pub async fn get_store(&self, namespace: &str) -> Result<Arc<TenantStore>, GatewayError> {
        validate_namespace(namespace)?;

        if let Some(store) = self.cache.get(namespace) {
            return Ok(store);
        }

        let store = self
            .cache
            .get_or_try_init(namespace, || self.open(namespace))
            .await?;
        self.metrics
            .metrics
            .tenant_stores_open
            .set(self.cache.len() as i64);
        Ok(store)
    }

    /// Drop the cached handle for `namespace`.  Returns `true` if one was
    /// cached.
    pub fn evict(&self, namespace: &str) -> bool {
        let evicted = self.cache.evict(namespace).is_some();
        self.metrics
            .metrics
            .tenant_stores_open
            .set(self.cache.len() as i64);
        evicted
    }

    /// Number of schema bootstraps run since this router was created.
    pub fn bootstrap_count(&self) -> u64 {
        self.bootstraps.load(Ordering::Relaxed)
    }

    async fn open(&self, namespace: &str) -> Result<TenantStore, GatewayError> {
        let orgs_dir = self.orgs_dir.clone();
        let schema = self.schema.clone();
        let ns = namespace.to_string();
        let lock = self.open_lock(namespace);
        let bootstraps = Arc::clone(&self.bootstraps);
        let metrics = self.metrics.clone();

        // The blocking task runs to completion even if this future is
        // dropped, so everything that must stay consistent with the file
        // happens inside it, under the namespace lock.
        let (store, bootstrapped) = tokio::task::spawn_blocking(move || {
            let _held = lock.lock().unwrap_or_else(PoisonError::into_inner);
            let (store, bootstrapped) = open_blocking(&orgs_dir, &ns, &schema)?;
            if bootstrapped {
                let total = bootstraps.fetch_add(1, Ordering::Relaxed) + 1;
                metrics.metrics.tenant_bootstraps_total.set(total as i64);
            }
            Ok::<_, GatewayError>((store, bootstrapped))
        })
        .await??;

        if bootstrapped {
            info!(%namespace, "tenant store bootstrapped");
        } else {
            debug!(%namespace, "opened existing tenant store");
        }
        Ok(store)
    }

    fn open_lock(&self, namespace: &str) -> Arc<Mutex<()>> {
        let mut locks = self.open_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(namespace.to_string()).or_default())
    }
}

fn open_blocking(
    orgs_dir: &Path,
    namespace: &str,
    schema: &SchemaSource,
) -> Result<(TenantStore, bool), GatewayError> {
    let schema_err = |reason: String| GatewayError::SchemaInit {
        namespace: namespace.to_string(),
        reason,
    };

    std::fs::create_dir_all(orgs_dir)
        .map_err(|e| schema_err(format!("cannot create {}: {e}", orgs_dir.display())))?;

    let path = orgs_dir.join(format!("{namespace}.db"));
    let fresh = !path.exists();
    let conn = Connection::open(&path)?;

    if !fresh {
        return Ok((TenantStore::new(namespace, conn), false));
    }

    let bootstrapped = schema.load(namespace).and_then(|sql| {
        conn.execute_batch(&sql)
            .map_err(|e| schema_err(format!("bootstrap script failed: {e}")))
    });

    if let Err(e) = bootstrapped {
        drop(conn);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), error = %err, "failed to remove unbootstrapped tenant store"),
        }
        return Err(e);
    }

    Ok((TenantStore::new(namespace, conn), true))
}
