//! Serve TLS and plaintext clients on a single listening socket.
//!
//! The [`DowngradingListener`] peeks at the first byte of every accepted
//! connection. A TLS Handshake record gets a server-side TLS session; anything
//! else is passed through with the peeked byte replayed to the reader.

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;
pub mod server;

#[cfg(test)]
mod test_support;

pub use config::schema::ServerConfig;
pub use lifecycle::Shutdown;
pub use net::{Classification, DowngradedStream, DowngradingListener};
pub use server::Server;
