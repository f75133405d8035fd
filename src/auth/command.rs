//! Grammar for the transport command an SSH client asks the server to run.
//!
//! ```text
//! command   = service SP "'" path "'"
//! service   = "git-upload-pack" / "git-receive-pack"
//! path      = ["/"] namespace "/" repo [".git"]
//! ```
//!
//! The string is attacker-controlled, so anything outside this grammar is
//! rejected rather than repaired.

use std::fmt;

use crate::error::GatewayError;
use crate::git::{validate_namespace, validate_segment, Service};

/// A parsed `<service> '<namespace>/<repo>.git'` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCommand {
    pub service: Service,
    pub namespace: String,
    pub repo: String,
}

impl fmt::Display for TransportCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}/{}.git'", self.service, self.namespace, self.repo)
    }
}

pub fn parse_transport_command(raw: &str) -> Result<TransportCommand, GatewayError> {
    let malformed = || GatewayError::MalformedCommand(truncate(raw));

    let (service, rest) = raw.split_once(' ').ok_or_else(malformed)?;
    let service: Service = service.parse().map_err(|_| malformed())?;

    let quoted = rest
        .strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .ok_or_else(malformed)?;
    if quoted.contains('\'') {
        return Err(malformed());
    }

    let (namespace, repo) = parse_repo_path(quoted)?;
    Ok(TransportCommand {
        service,
        namespace: namespace.to_string(),
        repo: repo.to_string(),
    })
}

/// Split `[/]<namespace>/<repo>[.git]` into its two segments.
fn parse_repo_path(path: &str) -> Result<(&str, &str), GatewayError> {
    let invalid = || GatewayError::InvalidRepoPath(truncate(path));

    let path = path.strip_prefix('/').unwrap_or(path);
    let mut segments = path.split('/');
    let (Some(namespace), Some(repo), None) = (segments.next(), segments.next(), segments.next())
    else {
        return Err(invalid());
    };

    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if namespace.is_empty() || repo.is_empty() {
        return Err(invalid());
    }

    validate_namespace(namespace)?;
    validate_segment(repo, "repository")?;
    Ok((namespace, repo))
}

/// Keep error messages (and the logs they end up in) bounded.
fn truncate(s: &str) -> String {
    const MAX: usize = 128;
    match s.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> TransportCommand {
        parse_transport_command(raw).unwrap()
    }

    #[test]
    fn parses_upload_pack_with_leading_slash() {
        let cmd = parse("git-upload-pack '/acme/widgets.git'");
        assert_eq!(cmd.service, Service::UploadPack);
        assert_eq!(cmd.namespace, "acme");
        assert_eq!(cmd.repo, "widgets");
    }

    #[test]
    fn parses_receive_pack_without_slash_or_suffix() {
        let cmd = parse("git-receive-pack 'acme/widgets'");
        assert_eq!(cmd.service, Service::ReceivePack);
        assert_eq!(cmd.namespace, "acme");
        assert_eq!(cmd.repo, "widgets");
    }

    #[test]
    fn display_is_canonical() {
        assert_eq!(
            parse("git-upload-pack 'acme/widgets'").to_string(),
            "git-upload-pack 'acme/widgets.git'"
        );
    }

    #[test]
    fn rejects_commands_outside_the_grammar() {
        for raw in [
            "",
            "ls -la",
            "git-upload-pack",
            "git-upload-pack acme/widgets.git",
            "git-upload-pack \"acme/widgets.git\"",
            "git-upload-archive 'acme/widgets.git'",
            "git-upload-pack  'acme/widgets.git'",
            "git-upload-pack 'acme/widgets.git' ; rm -rf /",
            "git-upload-pack 'acme/wid'gets.git'",
            " git-upload-pack 'acme/widgets.git'",
        ] {
            assert!(
                matches!(parse_transport_command(raw), Err(GatewayError::MalformedCommand(_))),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn rejects_paths_without_exactly_two_segments() {
        for raw in [
            "git-upload-pack 'widgets.git'",
            "git-upload-pack 'a/b/c.git'",
            "git-upload-pack '/'",
            "git-upload-pack 'acme/'",
            "git-upload-pack '/acme/.git'",
            "git-upload-pack ''",
        ] {
            assert!(
                matches!(parse_transport_command(raw), Err(GatewayError::InvalidRepoPath(_))),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn rejects_traversal_segments() {
        for raw in ["git-upload-pack '../widgets.git'", "git-receive-pack 'acme/...git'"] {
            assert!(
                matches!(parse_transport_command(raw), Err(GatewayError::InvalidPath(_))),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn long_input_is_truncated_in_errors() {
        let raw = format!("x{}", "y".repeat(1000));
        let err = parse_transport_command(&raw).unwrap_err();
        assert!(err.to_string().len() < 200);
    }
}
