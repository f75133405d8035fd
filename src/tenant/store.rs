//! Per-namespace tenant database handle.

use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::GatewayError;

/// Repository metadata as recorded in a tenant store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub default_branch: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Repository {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            is_private: row.get("is_private")?,
            default_branch: row.get("default_branch")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// An open connection to exactly one namespace's database.
///
/// Cheap to share: queries run on the blocking pool behind an internal
/// mutex, so the handle can be used from any task.
pub struct TenantStore {
    namespace: String,
    conn: Arc<Mutex<Connection>>,
}

impl TenantStore {
    pub(crate) fn new(namespace: impl Into<String>, conn: Connection) -> Self {
        Self {
            namespace: namespace.into(),
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn find_repository(&self, name: &str) -> Result<Option<Repository>, GatewayError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let repo = conn
                .query_row(
                    "SELECT id, name, description, is_private, default_branch, created_at, updated_at
                     FROM repositories WHERE name = ?1",
                    params![name],
                    Repository::from_row,
                )
                .optional()?;
            Ok(repo)
        })
        .await
    }

    /// Record a new repository.  Used by the provisioning layer; transport
    /// code never writes to the tenant store.
    #[instrument(skip(self, description), fields(namespace = %self.namespace))]
    pub async fn create_repository(
        &self,
        name: &str,
        description: Option<&str>,
        is_private: bool,
    ) -> Result<Repository, GatewayError> {
        crate::git::validate_segment(name, "repository")?;

        let now = chrono::Utc::now().timestamp();
        let repo = Repository {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.map(str::to_string),
            is_private,
            default_branch: "main".to_string(),
            created_at: now,
            updated_at: now,
        };

        let row = repo.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO repositories
                     (id, name, description, is_private, default_branch, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.id,
                    row.name,
                    row.description,
                    row.is_private,
                    row.default_branch,
                    row.created_at,
                    row.updated_at,
                ],
            )?;
            Ok(())
        })
        .await?;

        debug!(repo = %repo.name, "repository recorded");
        Ok(repo)
    }

    /// Number of repositories recorded for this namespace.
    pub async fn repository_count(&self) -> Result<u64, GatewayError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn with_conn<R, F>(&self, f: F) -> Result<R, GatewayError>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> Result<R, GatewayError> + Send + 'static,
    {
        super::with_conn(&self.conn, f).await
    }
}

impl std::fmt::Debug for TenantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
