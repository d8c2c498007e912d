//! Shared fixtures for unit tests.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use tokio::net::TcpStream;
use tokio_rustls::rustls::ServerConfig;

use crate::net::listener::Listener;
use crate::net::tls::{server_config as build_server_config, CertificateKeyPair};
use crate::security::certificate::{generate_certificate, DEFAULT_RSA_BITS};

/// A generated key pair, created once per test binary.
pub fn key_pair() -> CertificateKeyPair {
    static PAIR: OnceLock<CertificateKeyPair> = OnceLock::new();
    PAIR.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        generate_certificate(
            &dir.path().join("cert.pem"),
            &dir.path().join("key.pem"),
            "unit-test",
            DEFAULT_RSA_BITS,
        )
        .unwrap()
    })
    .clone()
}

pub fn server_config() -> Arc<ServerConfig> {
    build_server_config(key_pair()).unwrap()
}

/// A listener whose every accept fails with the same error.
pub struct FailingListener {
    pub kind: io::ErrorKind,
    pub message: &'static str,
}

impl Listener for FailingListener {
    type Conn = TcpStream;

    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        let error = io::Error::new(self.kind, self.message);
        async move { Err(error) }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 9)))
    }
}
