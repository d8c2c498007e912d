//! A listener that serves TLS and plaintext clients on one socket.
//!
//! # Responsibilities
//! - Accept connections from an underlying [`Listener`]
//! - Detect the protocol of each connection from its first byte
//! - Wrap TLS connections in a server session, pass others through
//! - Unblock pending accepts on close and release the underlying socket

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::net::connection::Connection;
use crate::net::detect::{detect, Classification, Detected, DEFAULT_DETECTION_TIMEOUT};
use crate::net::peeked::PeekedStream;
use crate::net::tls::TlsSession;
use crate::observability::metrics;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The underlying listener failed to accept.
    #[error("failed to accept: {0}")]
    Accept(#[from] io::Error),

    /// The listener was closed.
    #[error("listener closed")]
    Closed,
}

/// Something that accepts connections.
///
/// Dropping the listener closes it.
pub trait Listener: Send + Sync {
    type Conn: Connection;

    fn accept(&self) -> impl Future<Output = io::Result<(Self::Conn, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Listener for TcpListener {
    type Conn = tokio::net::TcpStream;

    fn accept(&self) -> impl Future<Output = io::Result<(Self::Conn, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// A listener that sniffs each connection and upgrades TLS clients.
///
/// Connections whose first byte is a TLS Handshake record are wrapped in a
/// [`TlsSession`]; all others are returned as they are, with the sniffed byte
/// replayed on the first read. A connection that stays silent past the
/// detection timeout is returned untouched and without an error.
pub struct DowngradingListener<L> {
    /// Emptied by `close`. In-flight accepts hold their own handle until they
    /// observe the close signal.
    inner: ArcSwapOption<L>,
    local_addr: Option<SocketAddr>,
    tls_config: ArcSwap<ServerConfig>,
    detection_timeout: Duration,
    closed: watch::Sender<bool>,
}

impl<L: Listener> DowngradingListener<L> {
    pub fn new(inner: L, tls_config: Arc<ServerConfig>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            local_addr: inner.local_addr().ok(),
            inner: ArcSwapOption::from_pointee(inner),
            tls_config: ArcSwap::new(tls_config),
            detection_timeout: DEFAULT_DETECTION_TIMEOUT,
            closed,
        }
    }

    /// Override how long a client gets to send its first byte.
    pub fn with_detection_timeout(mut self, timeout: Duration) -> Self {
        self.detection_timeout = timeout;
        self
    }

    pub fn detection_timeout(&self) -> Duration {
        self.detection_timeout
    }

    /// Replace the TLS configuration used for connections accepted from now on.
    pub fn set_tls_config(&self, config: Arc<ServerConfig>) {
        self.tls_config.store(config);
        tracing::info!("TLS configuration replaced");
    }

    /// Accept a connection, wrapping it in a TLS session if the client speaks TLS.
    pub async fn accept(&self) -> Result<(DowngradedStream<L::Conn>, SocketAddr), ListenerError> {
        let (detected, peer_addr) = self.accept_without_tls_wrapping().await?;

        let stream = match detected {
            Detected::Tls(stream) => {
                let acceptor = TlsAcceptor::from(self.tls_config.load_full());
                DowngradedStream::Tls(Box::new(TlsSession::new(stream, &acceptor)))
            }
            Detected::Plain(stream) => DowngradedStream::Plain(stream),
            // The accept itself succeeded; what to do with a connection that
            // has not spoken yet is up to the caller.
            Detected::Indeterminate(conn) => DowngradedStream::Undetected(conn),
        };

        Ok((stream, peer_addr))
    }

    /// Accept and classify a connection without applying the TLS policy.
    pub async fn accept_without_tls_wrapping(
        &self,
    ) -> Result<(Detected<L::Conn>, SocketAddr), ListenerError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(ListenerError::Closed);
        }
        let Some(inner) = self.inner.load_full() else {
            return Err(ListenerError::Closed);
        };

        let (conn, peer_addr) = tokio::select! {
            result = inner.accept() => result.map_err(|e| {
                metrics::record_accept_error();
                tracing::warn!(error = %e, "Accept failed");
                ListenerError::Accept(e)
            })?,
            _ = closed.wait_for(|closed| *closed) => return Err(ListenerError::Closed),
        };
        drop(inner);

        let detected = detect(conn, self.detection_timeout).await;
        tracing::debug!(
            peer_addr = %peer_addr,
            protocol = %detected.classification(),
            "Connection classified"
        );

        Ok((detected, peer_addr))
    }

    /// Close the listener and release the underlying socket.
    ///
    /// Pending and future accepts return [`ListenerError::Closed`]. Connections
    /// already accepted are not affected.
    pub fn close(&self) {
        self.closed.send_replace(true);
        if self.inner.swap(None).is_some() {
            tracing::info!(address = ?self.local_addr, "Listener closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// The bound address. Still reported after [`close`](Self::close).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self.inner.load().as_deref() {
            Some(inner) => inner.local_addr(),
            None => self.local_addr.ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "listener is closed")
            }),
        }
    }
}

/// A connection returned by [`DowngradingListener::accept`].
#[derive(Debug)]
pub enum DowngradedStream<C> {
    /// The client opened with a TLS Handshake record.
    Tls(Box<TlsSession<C>>),
    /// The client opened with something else.
    Plain(PeekedStream<C>),
    /// The client sent nothing within the detection timeout.
    Undetected(C),
}

impl<C> DowngradedStream<C> {
    pub fn classification(&self) -> Classification {
        match self {
            DowngradedStream::Tls(_) => Classification::Tls,
            DowngradedStream::Plain(_) => Classification::Plain,
            DowngradedStream::Undetected(_) => Classification::Indeterminate,
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, DowngradedStream::Tls(_))
    }
}

impl<C> AsyncRead for DowngradedStream<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DowngradedStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            DowngradedStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            DowngradedStream::Undetected(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl<C> AsyncWrite for DowngradedStream<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            DowngradedStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            DowngradedStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            DowngradedStream::Undetected(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DowngradedStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            DowngradedStream::Plain(s) => Pin::new(s).poll_flush(cx),
            DowngradedStream::Undetected(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DowngradedStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            DowngradedStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            DowngradedStream::Undetected(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

impl<C: Connection> Connection for DowngradedStream<C> {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            DowngradedStream::Tls(s) => s.local_addr(),
            DowngradedStream::Plain(s) => s.local_addr(),
            DowngradedStream::Undetected(s) => s.local_addr(),
        }
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            DowngradedStream::Tls(s) => s.peer_addr(),
            DowngradedStream::Plain(s) => s.peer_addr(),
            DowngradedStream::Undetected(s) => s.peer_addr(),
        }
    }
}
