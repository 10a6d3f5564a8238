//! Doorway tracker - RFID crossing detection for a single doorway
//!
//! Fuses one UHF RFID reader with two mmWave presence sensors (inside and
//! outside the door) to log IN/OUT crossings of tagged assets.
//!
//! Module structure:
//! - `domain/` - Core types (records, directions, connection states)
//! - `io/` - External interfaces (serial devices, simulated devices, store, HTTP API)
//! - `services/` - Presence gating, pollers, ledger, doorway wiring
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use doorway_tracker::infra::config::DeviceMode;
use doorway_tracker::infra::{Config, Metrics};
use doorway_tracker::services::Doorway;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Doorway tracker - RFID asset crossing log
#[derive(Parser, Debug)]
#[command(name = "doorway-tracker", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,

    /// Run with simulated devices regardless of the configured mode
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging, level via RUST_LOG (default: info)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git_hash = %env!("GIT_HASH"), "doorway-tracker starting");

    let args = Args::parse();

    let mut config = Config::load_from_path(&args.config);
    if args.mock {
        config = config.with_device_mode(DeviceMode::Simulated);
    }

    info!(
        config_file = %config.config_file(),
        mode = %config.device_mode().as_str(),
        rfid_port = %config.rfid_port(),
        sensor_inside_port = %config.sensor_inside_port(),
        sensor_outside_port = %config.sensor_outside_port(),
        read_power_dbm = %config.rfid_read_power(),
        detection_range_m = %config.sensor_detection_range(),
        detection_timeout_secs = %config.detection_timeout().as_secs(),
        data_file = %config.data_file(),
        "config_loaded"
    );

    let addr: SocketAddr = format!("{}:{}", config.bind_address(), config.port())
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.bind_address(), config.port()))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let metrics_interval = config.metrics_interval_secs();
    let doorway = Arc::new(Doorway::from_config(config, metrics.clone()));
    doorway.start().await;

    // HTTP API
    let api_doorway = doorway.clone();
    let api_shutdown = shutdown_rx.clone();
    let api_task = tokio::spawn(async move {
        if let Err(e) =
            doorway_tracker::io::api::start_api_server(addr, api_doorway, api_shutdown).await
        {
            tracing::error!(error = %format!("{e:#}"), "api_server_error");
        }
    });

    // Periodic metrics log
    if metrics_interval > 0 {
        let mut reporter_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => metrics.report().log(),
                    _ = reporter_shutdown.changed() => break,
                }
            }
        });
    }

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    doorway.shutdown().await;
    let _ = api_task.await;

    info!("doorway-tracker shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_sources() {
        std::env::remove_var("CONFIG_FILE");
        let args = Args::try_parse_from(["doorway-tracker"]).unwrap();
        assert_eq!(args.config, "config/dev.toml");
        assert!(!args.mock);

        std::env::set_var("CONFIG_FILE", "config/mock.toml");
        let args = Args::try_parse_from(["doorway-tracker"]).unwrap();
        assert_eq!(args.config, "config/mock.toml");

        // Flag wins over the environment
        let args =
            Args::try_parse_from(["doorway-tracker", "--config", "config/lab.toml", "--mock"])
                .unwrap();
        assert_eq!(args.config, "config/lab.toml");
        assert!(args.mock);
        std::env::remove_var("CONFIG_FILE");
    }
}
