//! Certificate file watcher for hot reload.
//!
//! Rotating the PEM files on disk swaps the TLS configuration of a running
//! listener without rebinding. A pair that fails to load (for instance while
//! only one of the two files has been rewritten) is logged and skipped; the
//! next change event retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_rustls::rustls::ServerConfig;

use crate::net::tls::{load_key_pair, server_config};

/// Watches a certificate and key pair and emits rebuilt server configurations.
pub struct CertificateWatcher {
    cert_path: PathBuf,
    key_path: PathBuf,
    update_tx: mpsc::UnboundedSender<Arc<ServerConfig>>,
}

impl CertificateWatcher {
    /// Create a new watcher.
    ///
    /// Returns the watcher and a receiver for rebuilt configurations.
    pub fn new(
        cert_path: &Path,
        key_path: &Path,
    ) -> (Self, mpsc::UnboundedReceiver<Arc<ServerConfig>>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                cert_path: cert_path.to_path_buf(),
                key_path: key_path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let cert_path = self.cert_path.clone();
        let key_path = self.key_path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match load_key_pair(&cert_path, &key_path).map(server_config) {
                        Ok(Ok(config)) => {
                            tracing::info!(cert_path = ?cert_path, "Certificate change detected, reloaded");
                            let _ = tx.send(config);
                        }
                        Ok(Err(e)) | Err(e) => {
                            tracing::warn!(error = %e, "Failed to reload certificate, keeping current one");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.cert_path, RecursiveMode::NonRecursive)?;
        watcher.watch(&self.key_path, RecursiveMode::NonRecursive)?;

        tracing::info!(cert_path = ?self.cert_path, key_path = ?self.key_path, "Certificate watcher started");
        Ok(watcher)
    }
}
