//! Streaming bridge between a network peer and a `git <service>
//! --stateless-rpc` subprocess.
//!
//! Two independent tasks share one subprocess:
//!
//! - the *input* task drains the caller's request body into the child's
//!   stdin and closes it when the body ends;
//! - the *supervisor* task forwards stdout to the response channel as it
//!   arrives, then reaps the child.
//!
//! They coordinate only through a [`CancellationToken`]: whenever the output
//! side finishes (EOF, client disconnect, timeout) it cancels the input side.
//! A failed stdin write ends the input task and nothing else.  Stderr is
//! logged and never forwarded to the caller.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn, Instrument};

use super::path::RepoPath;
use super::pktline;
use super::service::Service;
use crate::error::GatewayError;
use crate::metrics::MetricsRegistry;

/// Request body chunks fed to the subprocess.
pub type RequestBody = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Response chunks produced by the subprocess, in order.
pub type ResponseStream = ReceiverStream<Result<Bytes, std::io::Error>>;

const READ_CHUNK: usize = 64 * 1024;
const CHANNEL_DEPTH: usize = 16;

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Spawns Git service subprocesses and streams their I/O.
#[derive(Clone)]
pub struct GitBridge {
    git_bin: PathBuf,
    timeout: Option<Duration>,
    metrics: MetricsRegistry,
}

impl GitBridge {
    pub fn new(git_bin: impl Into<PathBuf>, timeout: Option<Duration>, metrics: MetricsRegistry) -> Self {
        Self {
            git_bin: git_bin.into(),
            timeout,
            metrics,
        }
    }

    pub fn git_bin(&self) -> &Path {
        &self.git_bin
    }

    /// Run `git <service> --stateless-rpc --advertise-refs <repo>`.
    ///
    /// The returned stream yields the pkt-line service header first, then
    /// the subprocess's stdout verbatim.
    #[instrument(skip_all, fields(%service, repo = %repo))]
    pub fn advertise_refs(
        &self,
        service: Service,
        repo: &RepoPath,
        git_protocol: Option<&str>,
    ) -> Result<ResponseStream, GatewayError> {
        let mut child = self.spawn(service, repo, git_protocol, true)?;
        let (stdout, stderr) = take_output(&mut child, service)?;

        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        // The channel is empty, so the header always fits.
        let _ = tx.try_send(Ok(pktline::service_header(service)));

        self.supervise(child, stdout, stderr, tx, CancellationToken::new(), service);
        Ok(ReceiverStream::new(rx))
    }

    /// Run `git <service> --stateless-rpc <repo>`, feeding `body` to stdin
    /// while streaming stdout back.
    #[instrument(skip_all, fields(%service, repo = %repo))]
    pub fn stateless_rpc(
        &self,
        service: Service,
        repo: &RepoPath,
        git_protocol: Option<&str>,
        body: RequestBody,
    ) -> Result<ResponseStream, GatewayError> {
        let mut child = self.spawn(service, repo, git_protocol, false)?;
        let (stdout, stderr) = take_output(&mut child, service)?;
        let cancel = CancellationToken::new();

        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(forward_input(body, stdin, cancel.clone()).in_current_span());
        }

        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        self.supervise(child, stdout, stderr, tx, cancel, service);
        Ok(ReceiverStream::new(rx))
    }

    fn spawn(
        &self,
        service: Service,
        repo: &RepoPath,
        git_protocol: Option<&str>,
        advertise: bool,
    ) -> Result<Child, GatewayError> {
        let mut cmd = Command::new(&self.git_bin);
        cmd.arg(service.subcommand()).arg("--stateless-rpc");
        if advertise {
            cmd.arg("--advertise-refs");
        }
        cmd.arg(repo.as_path());

        if let Some(proto) = git_protocol {
            cmd.env("GIT_PROTOCOL", proto);
        }

        cmd.stdin(if advertise { Stdio::null() } else { Stdio::piped() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| GatewayError::Spawn {
            service: service.subcommand(),
            source,
        })?;
        debug!(pid = ?child.id(), advertise, "spawned git subprocess");
        Ok(child)
    }

    fn supervise(
        &self,
        child: Child,
        stdout: ChildStdout,
        stderr: ChildStderr,
        tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
        cancel: CancellationToken,
        service: Service,
    ) {
        let metrics = self.metrics.clone();
        let deadline = self.timeout.map(|t| Instant::now() + t);
        metrics.metrics.active_bridges.inc();

        tokio::spawn(
            async move {
                let stderr_task = tokio::spawn(log_stderr(stderr).in_current_span());
                let mut stdout = stdout;
                let mut child = child;

                let end = pump_stdout(&mut stdout, &tx, deadline).await;

                // Whatever ended the output side, the input side is done too.
                cancel.cancel();
                drop(tx);

                if end != StreamEnd::Eof {
                    if let Err(e) = child.start_kill() {
                        debug!(error = %e, "failed to kill git subprocess");
                    }
                }

                let status = child.wait().await;
                let _ = stderr_task.await;

                match (&end, status) {
                    (StreamEnd::Eof, Ok(status)) if status.success() => {
                        debug!("git subprocess finished");
                    }
                    (StreamEnd::Eof, Ok(status)) => {
                        warn!(%status, "git subprocess exited with non-zero status");
                        metrics.metrics.record_subprocess_failure(service);
                    }
                    (_, Ok(status)) => {
                        warn!(?end, %status, "git subprocess terminated early");
                        metrics.metrics.record_subprocess_failure(service);
                    }
                    (_, Err(e)) => {
                        warn!(?end, error = %e, "failed to wait on git subprocess");
                        metrics.metrics.record_subprocess_failure(service);
                    }
                }

                metrics.metrics.active_bridges.dec();
            }
            .in_current_span(),
        );
    }
}

fn take_output(child: &mut Child, service: Service) -> Result<(ChildStdout, ChildStderr), GatewayError> {
    let missing = |what: &str| GatewayError::Spawn {
        service: service.subcommand(),
        source: std::io::Error::other(format!("{what} was not captured")),
    };
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
    Ok((stdout, stderr))
}

// ---------------------------------------------------------------------------
// Output side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Eof,
    Disconnected,
    TimedOut,
    ReadError,
}

/// Forward stdout to `tx` until EOF, the receiver goes away, or the
/// deadline passes.
async fn pump_stdout(
    stdout: &mut ChildStdout,
    tx: &mpsc::Sender<Result<Bytes, std::io::Error>>,
    deadline: Option<Instant>,
) -> StreamEnd {
    let expired = async move {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(expired);

    let mut forwarded: u64 = 0;
    loop {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        tokio::select! {
            () = &mut expired => return StreamEnd::TimedOut,
            () = tx.closed() => return StreamEnd::Disconnected,
            read = stdout.read_buf(&mut buf) => match read {
                Ok(0) => {
                    debug!(bytes = forwarded, "git subprocess stdout closed");
                    return StreamEnd::Eof;
                }
                Ok(n) => forwarded += n as u64,
                Err(e) => {
                    debug!(error = %e, "error reading git subprocess stdout");
                    return StreamEnd::ReadError;
                }
            },
        }

        tokio::select! {
            () = &mut expired => return StreamEnd::TimedOut,
            sent = tx.send(Ok(buf.freeze())) => {
                if sent.is_err() {
                    return StreamEnd::Disconnected;
                }
            }
        }
    }
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).split(b'\n');
    loop {
        match lines.next_segment().await {
            Ok(Some(line)) => {
                let line = String::from_utf8_lossy(&line);
                let line = line.trim_end();
                if !line.is_empty() {
                    warn!(stderr = %line, "git subprocess stderr");
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "error reading git subprocess stderr");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Input side
// ---------------------------------------------------------------------------

async fn forward_input(mut body: RequestBody, mut stdin: ChildStdin, cancel: CancellationToken) {
    let mut forwarded: u64 = 0;
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = body.next() => next,
        };
        let chunk = match next {
            None => break,
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                warn!(error = %e, "request body failed; closing git stdin");
                break;
            }
        };

        let written = tokio::select! {
            () = cancel.cancelled() => break,
            written = stdin.write_all(&chunk) => written,
        };
        if let Err(e) = written {
            debug!(error = %e, "git stdin closed early; stopping input forwarding");
            break;
        }
        forwarded += chunk.len() as u64;
    }

    if let Err(e) = stdin.shutdown().await {
        debug!(error = %e, "failed to flush git stdin");
    }
    debug!(bytes = forwarded, "request body forwarded");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
