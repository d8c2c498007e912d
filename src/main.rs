//! tls-downgrade server
//!
//! Runs a line service on one port for both TLS and plaintext clients.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────┐
//!                         │                  tls-downgrade                   │
//!                         │                                                  │
//!     TCP client          │  ┌──────────┐   ┌──────────┐   ┌──────────────┐  │
//!     ────────────────────┼─▶│ listener │──▶│ detector │──▶│ TLS session  │──┼──▶ line service
//!                         │  │  accept  │   │ 1st byte │   │ or passthru  │  │
//!                         │  └──────────┘   └──────────┘   └──────────────┘  │
//!                         │                                                  │
//!                         │  config · certificate provisioning · lifecycle   │
//!                         │  logging · metrics                               │
//!                         └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use tls_downgrade::config::{load_config, watcher::CertificateWatcher, ServerConfig};
use tls_downgrade::lifecycle::{signals, startup, Shutdown};
use tls_downgrade::observability;
use tls_downgrade::Server;

#[derive(Parser)]
#[command(name = "tls-downgrade")]
#[command(about = "Serve TLS and plaintext clients on one port", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    observability::logging::init(&config.observability);
    tracing::info!("tls-downgrade v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        detection_timeout_ms = config.listener.detection_timeout_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            observability::metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let tls = startup::prepare_tls(&config.tls)?;
    let listener = Arc::new(startup::bind(&config.listener, tls).await?);

    // Keep the watcher alive for the lifetime of the server.
    let _watcher = if config.tls.reload_on_change {
        let (watcher, mut updates) = CertificateWatcher::new(&config.tls.cert_path, &config.tls.key_path);
        let listener = Arc::clone(&listener);
        tokio::spawn(async move {
            while let Some(tls) = updates.recv().await {
                listener.set_tls_config(tls);
            }
        });
        Some(watcher.run()?)
    } else {
        None
    };

    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    let server = Server::new(config.listener.clone(), config.service.clone());
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
