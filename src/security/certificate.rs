//! Self-signed certificate provisioning.
//!
//! Generates an RSA key and a self-signed certificate for the shared port,
//! persists both as PEM, and hands back the pair loaded from disk. Runs once
//! at startup.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SerialNumber, PKCS_RSA_SHA256,
};
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use thiserror::Error;
use time::macros::datetime;
use time::OffsetDateTime;
use tokio_rustls::rustls::pki_types::PrivatePkcs8KeyDer;

use crate::net::tls::{load_key_pair, CertificateKeyPair, TlsConfigError};

/// End of validity for generated certificates.
pub const DEFAULT_NOT_AFTER: OffsetDateTime = datetime!(2049-12-31 23:59:59 UTC);

pub const DEFAULT_RSA_BITS: usize = 2048;

/// Error type for certificate provisioning. Each variant names the failed step.
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("generate key: {0}")]
    GenerateKey(String),

    #[error("create cert: {0}")]
    CreateCertificate(#[source] rcgen::Error),

    #[error("save cert: {0}")]
    SaveCertificate(#[source] io::Error),

    #[error("save key: {0}")]
    SaveKey(#[source] io::Error),

    #[error("load key pair: {0}")]
    Load(#[from] TlsConfigError),
}

/// Parameters of a generated certificate.
#[derive(Debug, Clone)]
pub struct CertificateOptions {
    pub common_name: String,
    pub rsa_bits: usize,
    pub not_after: OffsetDateTime,
}

impl CertificateOptions {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            rsa_bits: DEFAULT_RSA_BITS,
            not_after: DEFAULT_NOT_AFTER,
        }
    }

    pub fn with_rsa_bits(mut self, bits: usize) -> Self {
        self.rsa_bits = bits;
        self
    }

    pub fn with_not_after(mut self, not_after: OffsetDateTime) -> Self {
        self.not_after = not_after;
        self
    }
}

/// Generate a self-signed certificate and key, write them as PEM, and load them back.
pub fn generate_certificate(
    cert_path: &Path,
    key_path: &Path,
    common_name: &str,
    rsa_bits: usize,
) -> Result<CertificateKeyPair, CertificateError> {
    let options = CertificateOptions::new(common_name).with_rsa_bits(rsa_bits);
    generate_with_options(cert_path, key_path, &options)
}

pub fn generate_with_options(
    cert_path: &Path,
    key_path: &Path,
    options: &CertificateOptions,
) -> Result<CertificateKeyPair, CertificateError> {
    let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, options.rsa_bits)
        .map_err(|e| CertificateError::GenerateKey(e.to_string()))?;
    let pkcs8 = private_key
        .to_pkcs8_der()
        .map_err(|e| CertificateError::GenerateKey(e.to_string()))?;
    let key_pair = KeyPair::from_pkcs8_der_and_sign_algo(
        &PrivatePkcs8KeyDer::from(pkcs8.as_bytes()),
        &PKCS_RSA_SHA256,
    )
    .map_err(CertificateError::CreateCertificate)?;

    let certificate = certificate_params(options)
        .self_signed(&key_pair)
        .map_err(CertificateError::CreateCertificate)?;

    write_certificate(cert_path, &certificate.pem()).map_err(CertificateError::SaveCertificate)?;

    let key_pem = private_key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| CertificateError::SaveKey(io::Error::new(io::ErrorKind::InvalidData, e.to_string())))?;
    write_private_key(key_path, key_pem.as_bytes()).map_err(CertificateError::SaveKey)?;

    tracing::info!(
        common_name = %options.common_name,
        rsa_bits = options.rsa_bits,
        cert_path = ?cert_path,
        key_path = ?key_path,
        "Generated self-signed certificate"
    );

    Ok(load_key_pair(cert_path, key_path)?)
}

/// Load the key pair at the given paths, generating it first if either file is missing.
pub fn load_or_generate(
    cert_path: &Path,
    key_path: &Path,
    options: &CertificateOptions,
) -> Result<CertificateKeyPair, CertificateError> {
    if cert_path.exists() && key_path.exists() {
        tracing::debug!(cert_path = ?cert_path, "Loading existing certificate");
        return Ok(load_key_pair(cert_path, key_path)?);
    }
    generate_with_options(cert_path, key_path, options)
}

fn certificate_params(options: &CertificateOptions) -> CertificateParams {
    let mut params = CertificateParams::default();

    let mut subject = DistinguishedName::new();
    subject.push(DnType::CommonName, options.common_name.as_str());
    params.distinguished_name = subject;

    params.serial_number = Some(random_serial());
    params.not_before = OffsetDateTime::now_utc();
    params.not_after = options.not_after;
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    params
}

/// A positive 63-bit serial from a non-cryptographic source.
// TODO: decide whether bootstrap certificates need CSPRNG serials before switching away from fastrand.
fn random_serial() -> SerialNumber {
    let bytes = fastrand::u64(1..=i64::MAX as u64).to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    SerialNumber::from_slice(&bytes[start..])
}

fn write_certificate(path: &Path, pem: &str) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(pem.as_bytes())?;
    file.sync_all()
}

fn write_private_key(path: &Path, pem: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        let file = options.open(path)?;
        // mode() only applies on creation
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        write_all_and_sync(file, pem)
    }
    #[cfg(not(unix))]
    {
        write_all_and_sync(options.open(path)?, pem)
    }
}

fn write_all_and_sync(mut file: File, data: &[u8]) -> io::Result<()> {
    file.write_all(data)?;
    file.sync_all()
}
