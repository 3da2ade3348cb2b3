//! # homenode-adapter-api-tcp
//!
//! TCP transport for the remote command envelope.
//!
//! ## Wire format
//! - Request: a JSON array `[endpoint, arg1, ...]`, newline-terminated.
//! - Response: a single JSON value, newline-terminated.
//! - Errors from a *reachable* node are data, not transport failures:
//!   `{"ERROR": "<message>"}`.
//!
//! ## Responsibilities
//! - [`TcpApiClient`] — the outbound [`ApiClient`] port with a bounded
//!   round-trip timeout, so one unreachable peer cannot stall a caller
//! - [`serve`] — the inbound side, routing decoded requests through
//!   [`Node::dispatch`](homenode_app::node::Node::dispatch)
//!
//! ## Dependency rule
//! Depends on `homenode-app` (port traits, the node surface) and
//! `homenode-domain` only.
//!
//! [`ApiClient`]: homenode_app::ports::ApiClient

mod client;
mod server;

pub use client::TcpApiClient;
pub use server::serve;

/// The fixed service port nodes listen on when none is configured.
pub const DEFAULT_PORT: u16 = 8123;
