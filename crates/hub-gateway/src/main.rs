//! hub-gateway: WebSocket message gateway.
//!
//! Runs an in-process fabric with the configured channels and serves clients
//! until SIGINT/SIGTERM.

use clap::Parser;
use hub_channel::ChannelRegistry;
use hub_core::LocalFabric;
use hub_gateway::{Gateway, GatewayConfig, GatewayEvent, Overrides};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// hub-gateway: WebSocket message gateway
#[derive(Parser, Debug)]
#[command(name = "hub-gateway", version, about = "WebSocket message gateway")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// URL path prefix for WebSocket upgrades
    #[arg(long)]
    path: Option<String>,

    /// Login timeout in milliseconds
    #[arg(long)]
    login_timeout: Option<u64>,

    /// Config file path
    #[arg(long, default_value = "~/.hubgate/config.toml")]
    config: String,

    /// Create a pub/sub channel (repeatable)
    #[arg(long = "channel")]
    channels: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting hub-gateway");

    // Load config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let config = match GatewayConfig::load(
        Some(&config_path),
        Overrides {
            port: cli.port,
            path: cli.path,
            login_timeout_ms: cli.login_timeout,
            channels: cli.channels,
        },
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let fabric = LocalFabric::new();
    let registry = ChannelRegistry::new(fabric.clone());
    for id in &config.channels {
        match registry.create_channel(id, None) {
            Ok(channel) => info!(channel = %channel.id(), "channel ready"),
            Err(e) => warn!(channel = %id, error = %e, "could not create channel"),
        }
    }

    let gateway = Gateway::new(config, fabric, None);
    let _events = gateway.subscribe(|event| match event {
        GatewayEvent::Connected { identity } => info!(identity = %identity, "client connected"),
        GatewayEvent::Disconnected { identity } => {
            info!(identity = ?identity, "client disconnected");
        }
        GatewayEvent::Error { message } => warn!(message = %message, "gateway error"),
        GatewayEvent::Started { .. } | GatewayEvent::Stopped => {}
    });

    if let Err(e) = gateway.start().await {
        error!(error = %e, "failed to start gateway");
        std::process::exit(1);
    }

    shutdown_signal().await;
    info!("received shutdown signal");
    gateway.stop().await;
    drop(registry);

    info!("hub-gateway stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!(error = %e, "cannot install SIGTERM handler");
                    let _ = ctrl_c.await;
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
