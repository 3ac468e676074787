//! least-conn-proxy
//!
//! An HTTP load balancer that sends each request to the healthy backend with
//! the fewest in-flight requests relative to its weight.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ dispatch ──▶ BackendPool (LoadHeap)
//!                          │                            ▲
//!                          │                            │ insert / remove
//!                          ▼                            │
//!     ◀────────────── streamed response         health monitor (periodic probes)
//!
//!     config file ──▶ loader ──▶ (optional) watcher ──▶ new backends registered
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use least_conn_proxy::config::{load_config, ConfigWatcher};
use least_conn_proxy::lifecycle::{signals, Shutdown};
use least_conn_proxy::observability::{logging, metrics};
use least_conn_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "least-conn-proxy")]
#[command(about = "Least-connections HTTP load balancer", long_about = None)]
struct Args {
    /// Path to the TOML or JSON configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Reload the configuration file when it changes.
    #[arg(short, long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    logging::init(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        path = ?args.config,
        backends = config.backends.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(signals::wait_for_signal(shutdown.clone()));

    // The watcher handle must outlive the server, or notifications stop.
    let (_watcher, updates) = if args.watch {
        let (watcher, updates) = ConfigWatcher::new(&args.config);
        (Some(watcher.run()?), updates)
    } else {
        let (_tx, updates) = mpsc::unbounded_channel();
        (None, updates)
    };

    HttpServer::new(config)
        .run(listener, updates, shutdown)
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
