//! Seven-Segment Display Daemon
//!
//! Claims the display's GPIO lines and publishes them as a byte-stream device
//! on D-Bus. Lines are released in reverse order on shutdown.

mod config;
mod dbus;
mod lifecycle;
mod state;

use anyhow::{Context, Result};
use sevenseg_hw::PinRegistry;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use dbus::DbusPublisher;

/// Configuration used when no path is given on the command line.
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let config = Config::load(&path).context("Failed to load configuration")?;
            info!("Loaded configuration from: {}", path);
            config
        }
        None => Config::load_or_default(DEFAULT_CONFIG_PATH)
            .context("Failed to load configuration")?,
    };
    config.validate()?;

    info!("sevenseg: initializing {} lines", config.device.lines.len());

    // Acquire every line or none
    let provider = state::create_provider(&config);
    let registry = PinRegistry::acquire_all(provider, &config.device.lines, &config.device.label)
        .context("Failed to acquire GPIO lines")?;

    // Setup Unix signal handlers
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let signals = async move {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down");
            }
        }
    };

    let publisher = DbusPublisher {
        bus: config.dbus.bus,
    };
    lifecycle::run(registry, &config.device.name, &publisher, signals).await
}
