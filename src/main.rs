//! Secure load balancer.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                  SECURE BALANCER                      │
//!                     │                                                      │
//!   Client Request    │  ┌────────┐   ┌──────────┐   ┌───────────────────┐  │
//!   ──────────────────┼─▶│  http  │──▶│ security │──▶│   load_balancer   │  │
//!                     │  │ server │   │ features │   │ registry+selector │  │
//!                     │  └────────┘   │ classify │   └─────────┬─────────┘  │
//!                     │       ▲       └────┬─────┘             │            │
//!                     │       │       403 ◀┘                   ▼            │
//!   Client Response   │  ┌────┴───────────────────────────────────────┐    │
//!   ◀─────────────────┼──│        engine (forward, 502/503)          │◀───┼── Backend
//!                     │  └────────────────────────────────────────────┘    │
//!                     │                                                      │
//!                     │  health supervisor · admin listener · request log    │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use secure_balancer::config::load_config;
use secure_balancer::lifecycle::{wait_for_termination, Shutdown};
use secure_balancer::observability::{logging, metrics};
use secure_balancer::HttpServer;

#[derive(Parser)]
#[command(name = "secure-balancer")]
#[command(about = "Load-balancing reverse proxy with request screening", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loaded = load_config(&args.config)?;
    let config = loaded.config;
    logging::init(&config.observability);
    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        algorithm = %config.load_balancer.algorithm,
        backends = config.backends.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start Prometheus exporter");
                }
            }
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_termination().await;
        trigger.trigger();
    });

    let server = HttpServer::new(config).await?;
    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
