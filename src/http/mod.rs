//! HTTP layer for the gateway.
//!
//! Serves Git's Smart HTTP protocol for every namespace, plus the small JSON
//! API used by the SSH front-end and the web application.

pub mod encoding;
pub mod handler;

pub use handler::create_router;
