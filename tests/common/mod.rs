//! Shared utilities for integration tests.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{self, CryptoProvider};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;

use tls_downgrade::net::tls::{server_config, CertificateKeyPair};
use tls_downgrade::security::certificate::{generate_certificate, DEFAULT_RSA_BITS};
use tls_downgrade::DowngradingListener;

/// A self-signed pair generated once per test binary.
pub fn key_pair() -> CertificateKeyPair {
    static PAIR: OnceLock<CertificateKeyPair> = OnceLock::new();
    PAIR.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        generate_certificate(
            &dir.path().join("cert.pem"),
            &dir.path().join("key.pem"),
            "integration-test",
            DEFAULT_RSA_BITS,
        )
        .unwrap()
    })
    .clone()
}

/// Bind a downgrading listener on an ephemeral localhost port.
pub async fn bind_listener(detection_timeout: Duration) -> DowngradingListener<TcpListener> {
    let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
    DowngradingListener::new(inner, server_config(key_pair()).unwrap())
        .with_detection_timeout(detection_timeout)
}

/// A TLS connector that trusts exactly the test certificate.
#[allow(dead_code)]
pub fn connector() -> TlsConnector {
    let provider = Arc::new(crypto::ring::default_provider());
    let verifier = PinnedVerifier {
        pinned: key_pair().cert_chain[0].clone(),
        provider: Arc::clone(&provider),
    };
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

#[allow(dead_code)]
pub fn server_name() -> ServerName<'static> {
    ServerName::try_from("localhost").unwrap()
}

#[derive(Debug)]
struct PinnedVerifier {
    pinned: CertificateDer<'static>,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for PinnedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.pinned.as_ref() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General("unexpected server certificate".into()))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
