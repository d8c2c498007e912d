//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges and parseable addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>

use std::fmt;
use std::net::SocketAddr;

use tokio::sync::Semaphore;

use crate::config::schema::ServerConfig;

/// Smallest RSA key the TLS stack will sign with.
pub const MIN_RSA_BITS: usize = 2048;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {:?}", config.listener.bind_address),
        ));
    }
    if config.listener.detection_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "listener.detection_timeout_ms",
            "must be greater than zero",
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new(
            "listener.max_connections",
            "must be greater than zero",
        ));
    } else if config.listener.max_connections > Semaphore::MAX_PERMITS {
        errors.push(ValidationError::new(
            "listener.max_connections",
            format!("must be at most {}", Semaphore::MAX_PERMITS),
        ));
    }

    if config.tls.generate_if_missing {
        if config.tls.common_name.trim().is_empty() {
            errors.push(ValidationError::new("tls.common_name", "must not be empty"));
        }
        if config.tls.rsa_bits < MIN_RSA_BITS {
            errors.push(ValidationError::new(
                "tls.rsa_bits",
                format!("must be at least {MIN_RSA_BITS}"),
            ));
        }
    }
    if config.tls.cert_path == config.tls.key_path {
        errors.push(ValidationError::new(
            "tls.key_path",
            "must differ from tls.cert_path",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {:?}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&ServerConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_problem() {
        let mut config = ServerConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.listener.detection_timeout_ms = 0;
        config.tls.rsa_bits = 1024;
        config.tls.key_path = config.tls.cert_path.clone();

        let fields: Vec<_> = validate_config(&config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "listener.detection_timeout_ms",
                "tls.rsa_bits",
                "tls.key_path",
            ]
        );
    }

    #[test]
    fn connection_limit_must_fit_a_semaphore() {
        let mut config = ServerConfig::default();
        config.listener.max_connections = Semaphore::MAX_PERMITS;
        assert!(validate_config(&config).is_ok());

        config.listener.max_connections = Semaphore::MAX_PERMITS + 1;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "listener.max_connections");

        let config: ServerConfig = toml::from_str(
            r#"
            [listener]
            max_connections = 9223372036854775807
            "#,
        )
        .unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn key_size_ignored_when_not_generating() {
        let mut config = ServerConfig::default();
        config.tls.generate_if_missing = false;
        config.tls.rsa_bits = 0;
        assert!(validate_config(&config).is_ok());
    }
}
