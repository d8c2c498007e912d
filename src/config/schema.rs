//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files, and
//! every field has a default so an empty file is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::security::certificate::DEFAULT_RSA_BITS;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, detection, limits).
    pub listener: ListenerConfig,

    /// Certificate material for TLS clients.
    pub tls: TlsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Behaviour of the bundled line service.
    pub service: ServiceConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:22000").
    pub bind_address: String,

    /// How long a client gets to send its first byte, in milliseconds.
    pub detection_timeout_ms: u64,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// How long shutdown waits for connections to finish, in seconds.
    pub drain_timeout_secs: u64,
}

impl ListenerConfig {
    pub fn detection_timeout(&self) -> Duration {
        Duration::from_millis(self.detection_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:22000".to_string(),
            detection_timeout_ms: 1_000,
            max_connections: 10_000,
            drain_timeout_secs: 10,
        }
    }
}

/// TLS certificate configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,

    /// Generate a self-signed pair when the files do not exist.
    pub generate_if_missing: bool,

    /// Subject common name of a generated certificate.
    pub common_name: String,

    /// RSA modulus size of a generated key.
    pub rsa_bits: usize,

    /// Swap in rotated certificate files without restarting.
    pub reload_on_change: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from("cert.pem"),
            key_path: PathBuf::from("key.pem"),
            generate_if_missing: true,
            common_name: "tls-downgrade".to_string(),
            rsa_bits: DEFAULT_RSA_BITS,
            reload_on_change: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter, used when `RUST_LOG` is unset.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Address for the Prometheus exporter.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "tls_downgrade=info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Configuration of the line service answering accepted connections.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Line sent to clients that stay silent through detection.
    pub greeting: String,

    /// Close connections idle for this many seconds. Zero disables the limit.
    pub idle_timeout_secs: u64,
}

impl ServiceConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            greeting: "HELLO".to_string(),
            idle_timeout_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.detection_timeout(), Duration::from_secs(1));
        assert_eq!(config.tls.rsa_bits, DEFAULT_RSA_BITS);
        assert!(config.tls.generate_if_missing);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:4000"

            [observability]
            log_format = "json"

            [service]
            idle_timeout_secs = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:4000");
        assert_eq!(config.listener.max_connections, 10_000);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.service.idle_timeout(), None);
    }
}
