//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     → certificate.rs (load existing PEM pair, or generate a self-signed one)
//!     → net::tls::server_config (rustls ServerConfig)
//!     → DowngradingListener
//! ```
//!
//! # Design Decisions
//! - Provisioning is fatal on any failure; no partial key pair is returned
//! - The private key file is readable by its owner only

pub mod certificate;

pub use certificate::{
    generate_certificate, load_or_generate, CertificateError, CertificateOptions,
};
