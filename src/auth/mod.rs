//! Transport authorization.
//!
//! - [`command`]: grammar for SSH transport commands.
//! - [`decision`]: the access rule and the engine both front-ends share.
//! - [`basic`]: HTTP Basic credentials checked against the directory.

pub mod basic;
pub mod command;
pub mod decision;

pub use basic::{parse_basic, resolve_requester, BasicCredentials};
pub use command::{parse_transport_command, TransportCommand};
pub use decision::{is_permitted, AccessEngine, Grant, Requester};
