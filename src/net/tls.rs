//! TLS configuration, certificate loading and server-side sessions.

use std::fmt;
use std::fs::File;
use std::future::Future;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::{server, Accept, TlsAcceptor};

use crate::net::connection::Connection;
use crate::net::peeked::PeekedStream;
use crate::observability::metrics;

/// Error type for TLS configuration.
#[derive(Debug, Error)]
pub enum TlsConfigError {
    #[error("file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates in {0:?}")]
    NoCertificates(PathBuf),

    #[error("no private key in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error("invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

/// A certificate chain together with its private key.
#[derive(Debug)]
pub struct CertificateKeyPair {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl Clone for CertificateKeyPair {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

/// Load a PEM certificate chain and private key from disk.
pub fn load_key_pair(cert_path: &Path, key_path: &Path) -> Result<CertificateKeyPair, TlsConfigError> {
    let cert_chain = rustls_pemfile::certs(&mut open(cert_path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsConfigError::Io {
            path: cert_path.to_path_buf(),
            source,
        })?;
    if cert_chain.is_empty() {
        return Err(TlsConfigError::NoCertificates(cert_path.to_path_buf()));
    }

    let key = rustls_pemfile::private_key(&mut open(key_path)?)
        .map_err(|source| TlsConfigError::Io {
            path: key_path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsConfigError::NoPrivateKey(key_path.to_path_buf()))?;

    Ok(CertificateKeyPair { cert_chain, key })
}

fn open(path: &Path) -> Result<BufReader<File>, TlsConfigError> {
    if !path.exists() {
        return Err(TlsConfigError::NotFound(path.to_path_buf()));
    }
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Build a server configuration presenting `pair` to every client.
pub fn server_config(pair: CertificateKeyPair) -> Result<Arc<ServerConfig>, TlsConfigError> {
    let config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(pair.cert_chain, pair.key)?;
    Ok(Arc::new(config))
}

enum SessionState<C> {
    Handshaking(Accept<PeekedStream<C>>),
    Established(Box<server::TlsStream<PeekedStream<C>>>),
    Failed,
}

/// A server-side TLS session over a detected connection.
///
/// The handshake is not performed on construction. It runs on the first
/// read, write or flush, or when [`TlsSession::handshake`] is awaited.
pub struct TlsSession<C> {
    state: SessionState<C>,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
}

impl<C: Connection> TlsSession<C> {
    /// Start a session over `stream`. Its addresses are recorded now, so they
    /// stay available after a failed handshake.
    pub fn new(stream: PeekedStream<C>, acceptor: &TlsAcceptor) -> Self {
        Self {
            local_addr: stream.local_addr().ok(),
            peer_addr: stream.peer_addr().ok(),
            state: SessionState::Handshaking(acceptor.accept(stream)),
        }
    }
}

impl<C> TlsSession<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{

    /// Drive the handshake to completion.
    pub async fn handshake(&mut self) -> io::Result<()> {
        std::future::poll_fn(|cx| self.poll_handshake(cx)).await
    }

    pub fn is_established(&self) -> bool {
        matches!(self.state, SessionState::Established(_))
    }

    /// The established TLS stream, once the handshake has completed.
    pub fn get_ref(&self) -> Option<&server::TlsStream<PeekedStream<C>>> {
        match &self.state {
            SessionState::Established(stream) => Some(stream),
            _ => None,
        }
    }

    fn poll_handshake(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let SessionState::Handshaking(accept) = &mut self.state else {
            return Poll::Ready(Ok(()));
        };

        match ready!(Pin::new(accept).poll(cx)) {
            Ok(stream) => {
                tracing::debug!(
                    protocol = ?stream.get_ref().1.protocol_version(),
                    "TLS handshake complete"
                );
                self.state = SessionState::Established(Box::new(stream));
                Poll::Ready(Ok(()))
            }
            Err(e) => {
                tracing::debug!(error = %e, "TLS handshake failed");
                metrics::record_handshake_failure();
                self.state = SessionState::Failed;
                Poll::Ready(Err(e))
            }
        }
    }

    fn established(&mut self) -> io::Result<&mut server::TlsStream<PeekedStream<C>>> {
        match &mut self.state {
            SessionState::Established(stream) => Ok(stream.as_mut()),
            _ => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "TLS session is not established",
            )),
        }
    }
}

impl<C> AsyncRead for TlsSession<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_handshake(cx))?;
        Pin::new(this.established()?).poll_read(cx, buf)
    }
}

impl<C> AsyncWrite for TlsSession<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_handshake(cx))?;
        Pin::new(this.established()?).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_handshake(cx))?;
        Pin::new(this.established()?).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match &mut this.state {
            SessionState::Established(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            SessionState::Handshaking(accept) => match accept.get_mut() {
                Some(io) => Pin::new(io).poll_shutdown(cx),
                None => Poll::Ready(Ok(())),
            },
            SessionState::Failed => Poll::Ready(Ok(())),
        }
    }
}

impl<C: Connection> Connection for TlsSession<C> {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.local_addr.ok_or_else(no_address)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.peer_addr.ok_or_else(no_address)
    }
}

fn no_address() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection had no address when the session started")
}

impl<C> fmt::Debug for TlsSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            SessionState::Handshaking(_) => "handshaking",
            SessionState::Established(_) => "established",
            SessionState::Failed => "failed",
        };
        f.debug_struct("TlsSession")
            .field("state", &state)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_certificate_is_reported_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");

        match load_key_pair(&cert, &key) {
            Err(TlsConfigError::NotFound(path)) => assert_eq!(path, cert),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn file_without_pem_blocks_has_no_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "not a certificate\n").unwrap();
        std::fs::write(&key, "not a key\n").unwrap();

        assert!(matches!(
            load_key_pair(&cert, &key),
            Err(TlsConfigError::NoCertificates(_))
        ));
    }
}
