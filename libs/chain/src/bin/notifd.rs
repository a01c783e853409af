//! Notification publisher daemon
//!
//! Usage:
//!   notifd                          # default ports 2000 (UDP) / 2002 (TCP)
//!   notifd --config notifd.toml

use anyhow::{Context, Result};
use clap::Parser;
use notif_chain::{KeyComparator, NotifChainDb, NotifConfig, Publisher};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "notifd")]
#[command(about = "Notification chain publisher")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = match &args.config {
        Some(path) => NotifConfig::from_file(path).map_err(|e| {
            error!("Failed to load configuration: {}", e);
            e
        })?,
        None => NotifConfig::default(),
    };

    let db = Arc::new(NotifChainDb::with_settings(config.engine.clone()));
    for chain in &config.chains {
        let comparator: Option<KeyComparator> = if chain.compare_keys {
            Some(Arc::new(|a: &[u8], b: &[u8]| a.cmp(b)))
        } else {
            None
        };
        db.init(&chain.name, comparator, None)
            .with_context(|| format!("creating chain '{}'", chain.name))?;
    }

    let publisher = Publisher::start(db.clone(), &config.publisher)
        .await
        .context("starting publisher listeners")?;
    info!(chains = ?db.chain_names(), "notifd running");

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("Received shutdown signal");

    info!("Final subscriptions:\n{}", db.dump());
    publisher.shutdown().await?;
    Ok(())
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
