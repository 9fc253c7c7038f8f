//! # ft95-monitor
//!
//! Keeps an FT95 thermometer linked over Bluetooth LE, serves a live
//! dashboard, and mirrors the latest reading into a Google Sheet.
//!
//! ```bash
//! ft95-monitor [run] [config.toml]   # run the monitor
//! ft95-monitor scan [secs]           # list nearby BLE peripherals
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use ft95_monitor::ble::BtleplugTransport;
use ft95_monitor::{logging, Config, Monitor};
use tokio_util::sync::CancellationToken;
use tracing::info;

const DEFAULT_SCAN_SECS: u64 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);

    match args.next().as_deref() {
        None => run(None).await,
        Some("run") => run(args.next().map(PathBuf::from)).await,
        Some("scan") => {
            let secs = args
                .next()
                .map(|s| s.parse::<u64>())
                .transpose()
                .context("scan duration must be a whole number of seconds")?
                .unwrap_or(DEFAULT_SCAN_SECS);
            scan(Duration::from_secs(secs)).await
        }
        Some("-h" | "--help") => {
            println!("usage: ft95-monitor [run] [config.toml] | scan [secs]");
            Ok(())
        }
        Some(other) => bail!("unknown command '{other}', try --help"),
    }
}

async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::resolve(config_path.as_deref()).context("invalid configuration")?;
    logging::init(&config.logging)?;

    info!(
        "Starting ft95-monitor {} for {} ({})",
        env!("CARGO_PKG_VERSION"),
        config.device.label,
        config.device.address
    );
    if !config.sync_enabled() {
        info!("GOOGLE_SHEET_ID not set, spreadsheet sync disabled");
    }

    let monitor = Monitor::new(config);
    shutdown_on_signal(monitor.shutdown_token());
    monitor.run().await?;
    Ok(())
}

async fn scan(duration: Duration) -> anyhow::Result<()> {
    logging::init(&Config::default().logging)?;

    println!("Scanning for {}s...", duration.as_secs());
    let devices = BtleplugTransport::new().discover(duration).await?;
    if devices.is_empty() {
        println!("No devices found");
        return Ok(());
    }

    for device in devices {
        let rssi = device
            .rssi
            .map_or_else(|| "?".to_string(), |r| format!("{r} dBm"));
        println!(
            "{}  {:<24}  {}",
            device.address,
            device.name.as_deref().unwrap_or("(unnamed)"),
            rssi
        );
    }
    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM.
fn shutdown_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match (
                signal(SignalKind::interrupt()),
                signal(SignalKind::terminate()),
            ) {
                (Ok(mut sigint), Ok(mut sigterm)) => {
                    tokio::select! {
                        _ = sigint.recv() => info!("Received SIGINT, shutting down"),
                        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                    }
                }
                _ => {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received Ctrl+C, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down");
        }

        token.cancel();
    });
}
