//! # Balancer Binary Entry Point
//!
//! Thin wrapper that starts the fleet poller and the JSON API.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin balancer -- --config config/balancer.toml
//! ```
//!
//! The balancer will:
//! 1. Load servers, listener profiles and poller settings from the TOML file
//! 2. Start polling every backend in the background
//! 3. Serve dispatch decisions and summaries on the configured address

use clap::Parser;
use log::{info, LevelFilter};
use std::sync::Arc;

use sdr_balancer::common::config::{load_config, BalancerConfig};
use sdr_balancer::common::logging::init_logger;
use sdr_balancer::{server, LoadBalancer};

/// Command-line arguments for the balancer binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the balancer configuration file (TOML format)
    ///
    /// Example: config/balancer.toml
    #[arg(short, long)]
    config: String,

    /// Log at DEBUG level (includes the ranked candidate list of every decision)
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logger(if args.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    let config: BalancerConfig = load_config(&args.config)?;
    info!(
        "📋 Loaded {} server(s) and {} listener profile(s) from {}",
        config.servers.len(),
        config.profiles.len(),
        args.config
    );

    let balancer = Arc::new(LoadBalancer::start(&config).await);
    let app = server::router(balancer.clone());

    let listener = tokio::net::TcpListener::bind(&config.web.listen).await?;
    info!("🌐 Balancer API running on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
        })
        .await?;

    balancer.shutdown().await;
    Ok(())
}
