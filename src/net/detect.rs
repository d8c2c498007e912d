//! Protocol detection on a freshly accepted connection.
//!
//! Reads the first byte under a deadline and classifies it: a TLS record
//! always starts with its `ContentType`, and a client opens with a
//! Handshake record (`0x16`). Anything else is treated as plaintext.
//!
//! A client that says nothing within the deadline (or hangs up first) is
//! not an error. Some protocols wait for a server greeting before the
//! client speaks, so the connection is handed back untouched as
//! [`Detected::Indeterminate`].

use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::net::listener::DowngradedStream;
use crate::net::peeked::PeekedStream;
use crate::observability::metrics;

/// TLS record `ContentType` for Handshake records.
pub const TLS_HANDSHAKE_RECORD: u8 = 0x16;

/// How long a client gets to send its first byte.
pub const DEFAULT_DETECTION_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of protocol detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Tls,
    Plain,
    /// No byte arrived within the deadline, or the stream ended first.
    Indeterminate,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Tls => "tls",
            Classification::Plain => "plain",
            Classification::Indeterminate => "indeterminate",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a connection by its first byte.
pub fn classify_byte(first: u8) -> Classification {
    if first == TLS_HANDSHAKE_RECORD {
        Classification::Tls
    } else {
        Classification::Plain
    }
}

/// A connection tagged with its classification.
///
/// Classified connections carry the byte read during detection in a
/// [`PeekedStream`]; an indeterminate connection is returned as it was
/// accepted, with nothing consumed.
#[derive(Debug)]
pub enum Detected<C> {
    Tls(PeekedStream<C>),
    Plain(PeekedStream<C>),
    Indeterminate(C),
}

impl<C> Detected<C> {
    pub fn classification(&self) -> Classification {
        match self {
            Detected::Tls(_) => Classification::Tls,
            Detected::Plain(_) => Classification::Plain,
            Detected::Indeterminate(_) => Classification::Indeterminate,
        }
    }

    /// Drop the tag without wrapping TLS connections in a session.
    ///
    /// A connection detected as TLS comes back as a plain stream carrying the
    /// raw TLS bytes.
    pub fn into_stream(self) -> DowngradedStream<C> {
        match self {
            Detected::Tls(stream) | Detected::Plain(stream) => DowngradedStream::Plain(stream),
            Detected::Indeterminate(conn) => DowngradedStream::Undetected(conn),
        }
    }
}

/// Read one byte from `conn` within `timeout` and classify the connection.
///
/// The timeout only bounds this read. Once this returns, the connection has
/// no deadline attached to it.
pub async fn detect<C>(mut conn: C, timeout: Duration) -> Detected<C>
where
    C: AsyncRead + Unpin,
{
    let mut first = [0u8; 1];
    let detected = match tokio::time::timeout(timeout, conn.read(&mut first)).await {
        Ok(Ok(1)) => {
            let stream = PeekedStream::new(conn, first.to_vec());
            match classify_byte(first[0]) {
                Classification::Tls => Detected::Tls(stream),
                _ => Detected::Plain(stream),
            }
        }
        Ok(Ok(_)) => {
            tracing::debug!("Stream ended before the first byte");
            Detected::Indeterminate(conn)
        }
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Failed to read the first byte");
            Detected::Indeterminate(conn)
        }
        Err(_) => {
            tracing::debug!(timeout_ms = timeout.as_millis() as u64, "No data before detection deadline");
            Detected::Indeterminate(conn)
        }
    };

    metrics::record_classification(detected.classification());
    detected
}
