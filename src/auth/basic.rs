//! HTTP Basic credentials: `Authorization: Basic base64(username:token)`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::debug;

use super::decision::Requester;
use crate::error::GatewayError;
use crate::tenant::Directory;

#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub token: String,
}

// Keep tokens out of logs.
impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Decode an `Authorization` header value.  The scheme name is matched
/// case-insensitively.
pub fn parse_basic(header: &str) -> Result<BasicCredentials, GatewayError> {
    let unauthorized = |why: &str| GatewayError::Unauthorized(why.to_string());

    let (scheme, encoded) = header
        .trim()
        .split_once(' ')
        .ok_or_else(|| unauthorized("malformed authorization header"))?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(unauthorized("unsupported authorization scheme"));
    }

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| unauthorized("credentials are not valid base64"))?;
    let decoded = String::from_utf8(decoded).map_err(|_| unauthorized("credentials are not UTF-8"))?;
    let (username, token) = decoded
        .split_once(':')
        .ok_or_else(|| unauthorized("credentials must be username:token"))?;

    if username.is_empty() || token.is_empty() {
        return Err(unauthorized("empty username or token"));
    }

    Ok(BasicCredentials {
        username: username.to_string(),
        token: token.to_string(),
    })
}

/// Turn an optional `Authorization` header into a [`Requester`].
///
/// No header means anonymous.  A header that is present but does not verify
/// is an error rather than a silent downgrade to anonymous.
pub async fn resolve_requester(directory: &Directory, header: Option<&str>) -> Result<Requester, GatewayError> {
    let Some(header) = header else {
        return Ok(Requester::Anonymous);
    };

    let creds = parse_basic(header)?;
    match directory.verify_token(&creds.username, &creds.token).await? {
        Some(user_id) => {
            debug!(username = %creds.username, "basic credentials verified");
            Ok(Requester::User(user_id))
        }
        None => Err(GatewayError::Unauthorized("invalid credentials".to_string())),
    }
}
