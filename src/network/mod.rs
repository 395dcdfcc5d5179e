//! Network Module
//!
//! Client-facing TCP front end of the proxy.
//!
//! ## Architecture
//! - Single non-blocking acceptor loop
//! - One thread per client connection, capped by `max_connections`
//! - Each connection owns a `QuorumClient` over the shared `RouterHandle`

mod server;
mod connection;

pub use server::Server;
pub use connection::Connection;
