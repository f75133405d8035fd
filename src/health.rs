use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use tokio::process::Command;

use crate::config::Config;
use crate::tenant::Directory;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub directory: CheckResult,
    pub storage: CheckResult,
    pub git: CheckResult,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn healthy() -> Self {
        Self {
            ok: true,
            detail: None,
        }
    }

    fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state expected by the handler
// ---------------------------------------------------------------------------

/// Subset of `AppState` the health check needs.
#[derive(Clone)]
pub struct HealthState {
    pub config: Arc<Config>,
    pub directory: Arc<Directory>,
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

async fn check_directory(directory: &Directory) -> CheckResult {
    match directory.ping().await {
        Ok(()) => CheckResult::healthy(),
        Err(e) => CheckResult::unhealthy(format!("directory query failed: {e}")),
    }
}

async fn check_storage(orgs_dir: &Path) -> CheckResult {
    match tokio::fs::metadata(orgs_dir).await {
        Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => CheckResult::healthy(),
        Ok(_) => CheckResult::unhealthy(format!("{} is not a writable directory", orgs_dir.display())),
        Err(e) => CheckResult::unhealthy(format!("{}: {e}", orgs_dir.display())),
    }
}

async fn check_git(git_bin: &Path) -> CheckResult {
    match Command::new(git_bin).arg("--version").output().await {
        Ok(out) if out.status.success() => CheckResult {
            ok: true,
            detail: Some(String::from_utf8_lossy(&out.stdout).trim().to_string()),
        },
        Ok(out) => CheckResult::unhealthy(format!("git --version exited with {}", out.status)),
        Err(e) => CheckResult::unhealthy(format!("failed to run {}: {e}", git_bin.display())),
    }
}

// ---------------------------------------------------------------------------
// Aggregate status
// ---------------------------------------------------------------------------

fn aggregate_status(checks: &HealthChecks) -> HealthStatus {
    let all_ok = checks.directory.ok && checks.storage.ok && checks.git.ok;
    // Nothing can be authorized without the directory.
    let any_critical = !checks.directory.ok;

    if all_ok {
        HealthStatus::Ok
    } else if any_critical {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Degraded
    }
}

// ---------------------------------------------------------------------------
// Axum handler
// ---------------------------------------------------------------------------

/// `GET /healthz` handler.  Returns 200 on Ok/Degraded, 503 on Unhealthy.
pub async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let orgs_dir = state.config.storage.orgs_dir();
    let (directory, storage, git) = tokio::join!(
        check_directory(&state.directory),
        check_storage(&orgs_dir),
        check_git(&state.config.git.binary),
    );

    let checks = HealthChecks {
        directory,
        storage,
        git,
    };
    let status = aggregate_status(&checks);
    let body = HealthResponse { status, checks };

    let http_status = match status {
        HealthStatus::Ok | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(body))
}
