//! Connect to a tls-downgrade server as a plaintext or TLS client, send one
//! line and print the reply.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{self, CryptoProvider};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;

#[derive(Parser)]
#[command(name = "sniff-probe")]
#[command(about = "Probe a tls-downgrade server", long_about = None)]
struct Cli {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:22000")]
    addr: String,

    /// Connect with TLS
    #[arg(long)]
    tls: bool,

    /// Accept only this certificate (PEM). Without it the server certificate is not checked.
    #[arg(long)]
    pin: Option<PathBuf>,

    /// Server name sent in the ClientHello
    #[arg(long, default_value = "localhost")]
    server_name: String,

    /// Line to send
    #[arg(short, long, default_value = "PING")]
    message: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let tcp = TcpStream::connect(&cli.addr).await?;

    if cli.tls {
        let pinned = match &cli.pin {
            Some(path) => {
                let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
                let cert = rustls_pemfile::certs(&mut reader)
                    .next()
                    .ok_or("no certificate in pin file")??;
                Some(cert)
            }
            None => None,
        };
        let connector = TlsConnector::from(client_config(pinned)?);
        let server_name = ServerName::try_from(cli.server_name.clone())?;
        let stream = connector.connect(server_name, tcp).await?;
        exchange(stream, &cli.message).await?;
    } else {
        exchange(tcp, &cli.message).await?;
    }
    Ok(())
}

async fn exchange<S>(stream: S, message: &str) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    stream.write_all(format!("{message}\nQUIT\n").as_bytes()).await?;
    stream.flush().await?;

    let mut line = String::new();
    while stream.read_line(&mut line).await? > 0 {
        print!("{line}");
        line.clear();
    }
    Ok(())
}

fn client_config(pinned: Option<CertificateDer<'static>>) -> Result<Arc<ClientConfig>, rustls::Error> {
    let provider = Arc::new(crypto::ring::default_provider());
    let verifier = PinnedVerifier {
        pinned,
        provider: Arc::clone(&provider),
    };
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Self-signed servers carry no name a WebPKI check would accept, so the
/// probe either trusts one exact certificate or none at all.
#[derive(Debug)]
struct PinnedVerifier {
    pinned: Option<CertificateDer<'static>>,
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
        match &self.pinned {
            Some(pinned) if pinned.as_ref() != end_entity.as_ref() => Err(rustls::Error::General(
                "server certificate does not match the pinned one".into(),
            )),
            _ => Ok(ServerCertVerified::assertion()),
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
