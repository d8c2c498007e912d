//! Startup orchestration.
//!
//! # Responsibilities
//! - Provision certificate material (load, or generate when allowed)
//! - Build the TLS server configuration
//! - Bind the downgrading listener
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The listener binds last, so traffic only arrives once TLS is ready

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_rustls::rustls::ServerConfig as RustlsServerConfig;

use crate::config::schema::{ListenerConfig, TlsConfig};
use crate::net::listener::DowngradingListener;
use crate::net::tls::{load_key_pair, server_config, TlsConfigError};
use crate::security::certificate::{load_or_generate, CertificateError, CertificateOptions};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("certificate provisioning failed: {0}")]
    Certificate(#[from] CertificateError),

    #[error("TLS configuration failed: {0}")]
    Tls(#[from] TlsConfigError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Load or generate the configured key pair and build a rustls configuration.
pub fn prepare_tls(config: &TlsConfig) -> Result<Arc<RustlsServerConfig>, StartupError> {
    let pair = if config.generate_if_missing {
        let options = CertificateOptions::new(config.common_name.as_str()).with_rsa_bits(config.rsa_bits);
        load_or_generate(&config.cert_path, &config.key_path, &options)?
    } else {
        load_key_pair(&config.cert_path, &config.key_path)?
    };
    Ok(server_config(pair)?)
}

/// Bind the shared listener.
pub async fn bind(
    config: &ListenerConfig,
    tls: Arc<RustlsServerConfig>,
) -> Result<DowngradingListener<TcpListener>, StartupError> {
    let inner = TcpListener::bind(&config.bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            address: config.bind_address.clone(),
            source,
        })?;

    let listener = DowngradingListener::new(inner, tls).with_detection_timeout(config.detection_timeout());

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(
            address = %addr,
            detection_timeout_ms = config.detection_timeout_ms,
            "Listener bound"
        );
    }
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_material_without_generation_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = TlsConfig {
            cert_path: dir.path().join("cert.pem"),
            key_path: dir.path().join("key.pem"),
            generate_if_missing: false,
            ..TlsConfig::default()
        };

        assert!(matches!(
            prepare_tls(&config),
            Err(StartupError::Tls(TlsConfigError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn bind_reports_address_on_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = taken.local_addr().unwrap().to_string();
        let config = ListenerConfig {
            bind_address: address.clone(),
            ..ListenerConfig::default()
        };

        match bind(&config, crate::test_support::server_config()).await {
            Err(StartupError::Bind { address: reported, .. }) => assert_eq!(reported, address),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("bind should fail"),
        }
    }
}
