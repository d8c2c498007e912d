//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, close, TLS routing policy)
//!     → detect.rs (one-byte peek under a deadline → Tls / Plain / Indeterminate)
//!     → peeked.rs (replays the peeked byte to the next reader)
//!     → tls.rs (lazy server-side TLS session, for Tls only)
//!     → Hand off to the application handler
//! ```
//!
//! # Design Decisions
//! - Classification never surfaces as an accept error
//! - Detection is bounded by a timeout scoped to the peek itself, so no
//!   deadline survives on the returned connection
//! - Every stream handed out implements [`Connection`], so callers can treat
//!   TLS, plain and undetected connections alike

pub mod connection;
pub mod detect;
pub mod listener;
pub mod peeked;
pub mod tls;

pub use connection::Connection;
pub use detect::{Classification, Detected};
pub use listener::{DowngradedStream, DowngradingListener, Listener, ListenerError};
pub use peeked::PeekedStream;
pub use tls::TlsSession;
