use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    /// Namespace served by the short `/<repo>.git/...` routes.  When unset
    /// those routes answer 404.
    #[serde(default)]
    pub root_namespace: Option<String>,
}

// ---------------------------------------------------------------------------
// HTTP server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address for the HTTP listener (e.g. `0.0.0.0:3000`).
    #[serde(default = "default_http_listen")]
    pub http_listen: String,
    /// Realm advertised in `WWW-Authenticate: Basic` challenges.
    #[serde(default = "default_realm")]
    pub realm: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_listen: default_http_listen(),
            realm: default_realm(),
        }
    }
}

fn default_http_listen() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_realm() -> String {
    "forgegate".to_string()
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root data directory.  Holds `main.db` and the `orgs/` tree with one
    /// tenant database and one `repos/` directory per namespace.
    pub data_dir: PathBuf,
    /// Optional tenant bootstrap script.  The built-in script is used when
    /// unset; when set, the file must exist at bootstrap time.
    #[serde(default)]
    pub tenant_schema: Option<PathBuf>,
}

impl StorageConfig {
    /// Path of the directory database holding users, namespaces and keys.
    pub fn main_db_path(&self) -> PathBuf {
        self.data_dir.join("main.db")
    }

    /// Root under which tenant databases and repositories live.
    pub fn orgs_dir(&self) -> PathBuf {
        self.data_dir.join("orgs")
    }
}

// ---------------------------------------------------------------------------
// Git toolchain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GitConfig {
    /// The `git` executable used for init, advertisement and pack services.
    #[serde(default = "default_git_binary")]
    pub binary: PathBuf,
    /// Wall-clock limit (seconds) for a single bridged subprocess.  Unset
    /// means no limit.
    #[serde(default)]
    pub service_timeout_secs: Option<u64>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            service_timeout_secs: None,
        }
    }
}

fn default_git_binary() -> PathBuf {
    PathBuf::from("git")
}

// ---------------------------------------------------------------------------
// SSH bridge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// Forced-command prefix written into authorized-keys lines.  The owning
    /// user id is appended as the final argument.
    #[serde(default = "default_shell_command")]
    pub shell_command: String,
    /// Authorize endpoint called by `forgegate shell`.
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    /// Name of the environment variable holding the bearer secret shared by
    /// the SSH API endpoints and the shell wrapper.
    #[serde(default = "default_api_token_env")]
    pub api_token_env: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            shell_command: default_shell_command(),
            authorize_url: default_authorize_url(),
            api_token_env: default_api_token_env(),
        }
    }
}

impl SshConfig {
    /// The shared secret, if the configured environment variable is set.
    pub fn api_token(&self) -> Option<String> {
        std::env::var(&self.api_token_env)
            .ok()
            .filter(|t| !t.is_empty())
    }
}

fn default_shell_command() -> String {
    "/usr/bin/forgegate --config /etc/forgegate/config.yaml shell".to_string()
}

fn default_authorize_url() -> String {
    "http://127.0.0.1:3000/api/ssh/authorize".to_string()
}

fn default_api_token_env() -> String {
    "FORGEGATE_SSH_API_TOKEN".to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_config(&contents)
        .with_context(|| format!("failed to load config file: {}", path.display()))
}

/// Parse and validate YAML config text.
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(contents).context("invalid YAML config")?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    config
        .server
        .http_listen
        .parse::<std::net::SocketAddr>()
        .with_context(|| format!("invalid http_listen address: {}", config.server.http_listen))?;
    anyhow::ensure!(
        !config.storage.data_dir.as_os_str().is_empty(),
        "storage.data_dir must not be empty"
    );
    anyhow::ensure!(
        config.git.service_timeout_secs != Some(0),
        "git.service_timeout_secs must be greater than zero when set"
    );
    if let Some(ns) = &config.root_namespace {
        crate::git::path::validate_namespace(ns)
            .map_err(|e| anyhow::anyhow!("invalid root_namespace: {e}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config("storage:\n  data_dir: /var/lib/forgegate\n").unwrap();
        assert_eq!(config.server.http_listen, "0.0.0.0:3000");
        assert_eq!(config.server.realm, "forgegate");
        assert_eq!(config.git.binary, PathBuf::from("git"));
        assert!(config.git.service_timeout_secs.is_none());
        assert!(config.root_namespace.is_none());
        assert_eq!(
            config.storage.main_db_path(),
            PathBuf::from("/var/lib/forgegate/main.db")
        );
        assert_eq!(
            config.storage.orgs_dir(),
            PathBuf::from("/var/lib/forgegate/orgs")
        );
    }

    #[test]
    fn full_config_parses() {
        let yaml = r#"
server:
  http_listen: "127.0.0.1:8080"
  realm: "Premo"
storage:
  data_dir: /data
  tenant_schema: /etc/forgegate/tenant.sql
git:
  binary: /usr/local/bin/git
  service_timeout_secs: 600
ssh:
  shell_command: "/usr/bin/forgegate shell"
  authorize_url: "http://localhost:8080/api/ssh/authorize"
  api_token_env: "SSH_SECRET"
root_namespace: nick
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.server.realm, "Premo");
        assert_eq!(config.git.service_timeout_secs, Some(600));
        assert_eq!(config.ssh.api_token_env, "SSH_SECRET");
        assert_eq!(config.root_namespace.as_deref(), Some("nick"));
        assert_eq!(
            config.storage.tenant_schema,
            Some(PathBuf::from("/etc/forgegate/tenant.sql"))
        );
    }

    #[test]
    fn rejects_bad_listen_address() {
        let yaml = "server:\n  http_listen: nope\nstorage:\n  data_dir: /data\n";
        assert!(parse_config(yaml).is_err());
    }

    #[test]
    fn rejects_zero_timeout() {
        let yaml = "storage:\n  data_dir: /data\ngit:\n  service_timeout_secs: 0\n";
        assert!(parse_config(yaml).is_err());
    }

    #[test]
    fn rejects_traversal_in_root_namespace() {
        let yaml = "storage:\n  data_dir: /data\nroot_namespace: \"../etc\"\n";
        assert!(parse_config(yaml).is_err());
    }

    #[test]
    fn missing_storage_section_is_an_error() {
        assert!(parse_config("server:\n  realm: x\n").is_err());
    }
}
