use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use forgegate::config::{self, Config};
use forgegate::{http, ssh, AppState};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "forgegate", about = "Smart Git transport gateway")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "FORGEGATE_CONFIG", default_value = "/etc/forgegate/config.yaml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP gateway (default).
    Serve,
    /// SSH forced-command wrapper: authorize `$SSH_ORIGINAL_COMMAND` and exec git.
    Shell {
        /// Id of the user whose key matched.
        user_id: String,
    },
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Config ----
    let config = config::load_config(&cli.config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, &cli.config).await,
        Command::Shell { user_id } => {
            // stdout belongs to the git protocol; logs go to stderr only.
            tracing_subscriber::registry()
                .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();

            let code = ssh::shell::run(&config, &user_id).await?;
            std::process::exit(code);
        }
    }
}

async fn serve(config: Config, config_path: &str) -> Result<()> {
    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(%config_path, "starting forgegate");

    let listen: SocketAddr = config
        .server
        .http_listen
        .parse()
        .with_context(|| format!("invalid server.http_listen: {}", config.server.http_listen))?;

    // ---- Application state ----
    let state = Arc::new(AppState::new(config)?);
    if state.ssh_api_token.is_none() {
        warn!(
            env = %state.config.ssh.api_token_env,
            "no SSH API token configured; /api/ssh endpoints are unauthenticated"
        );
    }

    info!(
        data_dir = %state.config.storage.data_dir.display(),
        git = %state.config.git.binary.display(),
        root_namespace = ?state.config.root_namespace,
        "gateway initialised"
    );

    // ---- HTTP server ----
    let app = http::create_router(Arc::clone(&state));
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen}"))?;
    info!(%listen, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("forgegate shut down");
    Ok(())
}
