use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use prixagent_gateway::logging::{log_welcome, parse_log_level};
use prixagent_gateway::{setup_logging, Gateway, GatewayConfig};

#[derive(Parser, Debug)]
#[command(name = "prixagent-gateway")]
#[command(about = "PrixAgent conversation orchestrator gateway", version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.bind_address`
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level, overrides `logging.level`
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GatewayConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(level) = args.log_level {
        parse_log_level(&level)?;
        config.logging.level = level;
    }
    if args.json_logs {
        config.logging.json = true;
    }

    setup_logging(&config.logging)?;
    log_welcome(&config.logging.app_name, env!("CARGO_PKG_VERSION"));

    let gateway = Gateway::build(config).await.context("building gateway")?;
    let bind_address = gateway.config.server.bind_address.clone();
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {}", bind_address))?;
    info!("Listening on {}", bind_address);

    axum::serve(listener, gateway.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    gateway.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}
