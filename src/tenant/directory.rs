//! Read side of the shared directory database (`main.db`): users,
//! namespaces, SSH keys and HTTP access tokens.
//!
//! The gateway only looks things up here.  The `create_*` / `add_*` helpers
//! exist for the provisioning layer and for tests.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::error::GatewayError;

const MAIN_SCHEMA: &str = include_str!("sql/main.sql");

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    User,
    Org,
}

impl NamespaceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Org => "org",
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NamespaceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "org" => Ok(Self::Org),
            other => Err(format!("unknown namespace kind {other:?}")),
        }
    }
}

impl FromSql for NamespaceKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Namespace {
    pub id: String,
    pub slug: String,
    pub kind: NamespaceKind,
    pub owner_id: Option<String>,
    pub is_private: bool,
}

impl Namespace {
    /// Whether `user_id` holds owner rights on this namespace.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id.as_deref() == Some(user_id)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            slug: row.get("slug")?,
            kind: row.get("kind")?,
            owner_id: row.get("owner_id")?,
            is_private: row.get("is_private")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshKey {
    pub id: String,
    pub user_id: String,
    pub public_key: String,
    pub name: Option<String>,
    pub fingerprint: Option<String>,
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

pub struct Directory {
    conn: Arc<Mutex<Connection>>,
}

impl Directory {
    /// Open (creating if needed) the directory database at `path` and apply
    /// the idempotent schema.
    pub fn open(path: &Path) -> Result<Self, GatewayError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, GatewayError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, GatewayError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(MAIN_SCHEMA)?;
        info!("directory schema initialised");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<(), GatewayError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn find_namespace(&self, slug: &str) -> Result<Option<Namespace>, GatewayError> {
        let slug = slug.to_string();
        self.with_conn(move |conn| {
            let ns = conn
                .query_row(
                    "SELECT id, slug, kind, owner_id, is_private FROM namespaces WHERE slug = ?1",
                    params![slug],
                    Namespace::from_row,
                )
                .optional()?;
            Ok(ns)
        })
        .await
    }

    pub async fn list_ssh_keys(&self) -> Result<Vec<SshKey>, GatewayError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, public_key, name, fingerprint FROM ssh_keys ORDER BY created_at, id",
            )?;
            let keys = stmt
                .query_map([], |row| {
                    Ok(SshKey {
                        id: row.get("id")?,
                        user_id: row.get("user_id")?,
                        public_key: row.get("public_key")?,
                        name: row.get("name")?,
                        fingerprint: row.get("fingerprint")?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }

    /// Resolve an HTTP Basic `username:token` pair to a user id.
    ///
    /// Tokens are only ever stored as SHA-256 hashes.
    #[instrument(skip(self, token))]
    pub async fn verify_token(&self, username: &str, token: &str) -> Result<Option<String>, GatewayError> {
        let username = username.to_string();
        let hash = hash_token(token);
        self.with_conn(move |conn| {
            let user_id = conn
                .query_row(
                    "SELECT u.id FROM users u
                     JOIN access_tokens t ON t.user_id = u.id
                     WHERE u.name = ?1 AND t.token_hash = ?2",
                    params![username, hash],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(user_id)
        })
        .await
    }

    // -- provisioning -------------------------------------------------------

    pub async fn create_user(&self, name: &str, email: &str) -> Result<User, GatewayError> {
        let user = User {
            id: new_id(),
            name: name.to_string(),
            email: email.to_string(),
        };
        let row = user.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![row.id, row.name, row.email, now()],
            )?;
            Ok(())
        })
        .await?;
        debug!(user = %user.name, "user created");
        Ok(user)
    }

    pub async fn create_namespace(
        &self,
        slug: &str,
        kind: NamespaceKind,
        owner_id: Option<&str>,
        is_private: bool,
    ) -> Result<Namespace, GatewayError> {
        crate::git::validate_namespace(slug)?;

        let ns = Namespace {
            id: new_id(),
            slug: slug.to_string(),
            kind,
            owner_id: owner_id.map(str::to_string),
            is_private,
        };
        let row = ns.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO namespaces (id, slug, kind, owner_id, is_private, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![row.id, row.slug, row.kind.as_str(), row.owner_id, row.is_private, now()],
            )?;
            Ok(())
        })
        .await?;
        debug!(namespace = %ns.slug, kind = %ns.kind, "namespace created");
        Ok(ns)
    }

    pub async fn add_ssh_key(
        &self,
        user_id: &str,
        public_key: &str,
        name: Option<&str>,
    ) -> Result<SshKey, GatewayError> {
        let public_key = public_key.trim();
        let key = SshKey {
            id: new_id(),
            user_id: user_id.to_string(),
            public_key: public_key.to_string(),
            name: name.map(str::to_string),
            fingerprint: fingerprint(public_key),
        };
        let row = key.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO ssh_keys (id, user_id, public_key, name, fingerprint, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![row.id, row.user_id, row.public_key, row.name, row.fingerprint, now()],
            )?;
            Ok(())
        })
        .await?;
        Ok(key)
    }

    /// Mint a new access token for `user_id`.  The plaintext is returned
    /// exactly once; only its hash is stored.
    pub async fn add_access_token(&self, user_id: &str, name: Option<&str>) -> Result<String, GatewayError> {
        let token = format!("fgt_{}", uuid::Uuid::new_v4().simple());
        let hash = hash_token(&token);
        let user_id = user_id.to_string();
        let name = name.map(str::to_string);
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO access_tokens (id, user_id, token_hash, name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![new_id(), user_id, hash, name, now()],
            )?;
            Ok(())
        })
        .await?;
        Ok(token)
    }

    async fn with_conn<R, F>(&self, f: F) -> Result<R, GatewayError>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> Result<R, GatewayError> + Send + 'static,
    {
        super::with_conn(&self.conn, f).await
    }
}

/// Hex SHA-256 of an access token, as stored in `access_tokens.token_hash`.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// OpenSSH-style `SHA256:<base64>` fingerprint of an authorized-keys entry
/// (`<type> <base64-blob> [comment]`).  `None` if the blob does not decode.
pub fn fingerprint(public_key: &str) -> Option<String> {
    let blob = public_key.split_whitespace().nth(1)?;
    let raw = STANDARD.decode(blob).ok()?;
    Some(format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(&raw))))
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
