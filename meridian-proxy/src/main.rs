//! Meridian redirect server.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use meridian_config::{ConfigSeed, MemoryConfigStore};
use meridian_core::TracingAccessLog;
use meridian_proxy::config::ProxyConfig;
use meridian_proxy::error::ProxyError;
use meridian_proxy::{server, tls, Gateway};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "meridian", version, about = "CDN request router")]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Loads configuration, starts the background tasks and serves redirects until
/// interrupted.
#[tokio::main]
async fn main() -> Result<(), ProxyError> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ProxyConfig::load(path)?,
        None => ProxyConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    let seed = match &config.catalog {
        Some(path) => ConfigSeed::from_path(path)?,
        None => ConfigSeed::default(),
    };
    let store = MemoryConfigStore::from_seed(seed);

    let gateway = Gateway::new(&config, Arc::new(TracingAccessLog))?;
    let _feed = gateway.attach(&store);
    let _timers = gateway.spawn_timers();

    let tls_acceptor = config.tls.as_ref().map(tls::acceptor).transpose()?;
    let listener = TcpListener::bind(config.listen).await?;

    tokio::select! {
        result = server::serve(listener, tls_acceptor, gateway.server_state()) => {
            if let Err(err) = &result {
                error!(error = %err, "server failed");
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    Ok(())
}
