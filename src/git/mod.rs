//! Git-side plumbing: repository paths, bare repo lifecycle, the pkt-line
//! service header and the streaming subprocess bridge.
//!
//! Everything that runs `git` goes through `tokio::process::Command` so no
//! request ever blocks a runtime worker.

pub mod bare_repo;
pub mod bridge;
pub mod path;
pub mod pktline;
pub mod service;

pub use bare_repo::{ensure_repo, is_bare_repo};
pub use bridge::{GitBridge, RequestBody, ResponseStream};
pub use path::{resolve_repo_path, validate_namespace, validate_segment, RepoPath};
pub use service::Service;
