//! SSH front-end support.
//!
//! The gateway does not run an SSH daemon.  `sshd` is configured with
//! forced-command authorized-keys lines (served by [`keys`]); the forced
//! command is `forgegate shell <user-id>` ([`shell`]), which asks the
//! gateway's authorize endpoint ([`authorize`]) before exec'ing git.

pub mod authorize;
pub mod keys;
pub mod shell;

pub use authorize::{AuthorizeRequest, AuthorizeResponse};

use axum::http::{header, HeaderMap};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Check the `Authorization: Bearer` header against the configured secret.
/// Without a configured secret every request passes.
pub(crate) fn bearer_matches(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| secrets_match(token.trim(), expected))
}

/// Constant-time comparison.  Both sides are hashed first so the running
/// time does not depend on the secret's length either.
fn secrets_match(provided: &str, expected: &str) -> bool {
    let provided = Sha256::digest(provided.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    provided.as_slice().ct_eq(expected.as_slice()).into()
}
