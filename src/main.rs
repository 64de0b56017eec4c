//! # Balloon Ground
//!
//! Ground-station receiver for a high-altitude balloon.
//!
//! Listens on one or two serial radio links, reassembles the images the
//! balloon transmits and tracks its signal strength and position.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use balloon_ground::config::{Config, LoggingConfig};
use balloon_ground::serial::SerialOpener;
use balloon_ground::station::GroundStation;
use balloon_ground::telemetry::{DirectorySink, TelemetrySnapshot};

/// Configuration file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// File name prefix of the rolling diagnostic log
const LOG_FILE_PREFIX: &str = "balloon-ground.log";

/// Main entry point for the ground station
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, or `config/default.toml`)
///    - Set up logging to stdout and an optional daily rolling file
///    - Start the station with one serial worker per configured link
///
/// 2. **Main Loop**
///    - Poll a snapshot every `poll_interval_ms` and log a status line
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Stop every link worker and release the ports
///    - Log the final packet and image counts
///
/// # Examples
///
/// ```bash
/// balloon-ground config/default.toml
/// ```
///
/// Expected output:
/// ```text
/// INFO balloon_ground: Balloon Ground v0.1.0 starting...
/// INFO balloon_ground::serial: link 1 connected to /dev/ttyUSB0
/// INFO balloon_ground: Packets: 42 | Frame: 3 | link 1: Connected | RSSI: -64 dBm (excellent)
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let (config, config_note) = load_config(std::env::args().nth(1))?;
    let _log_guard = init_logging(&config.logging)?;

    info!("Balloon Ground v{} starting...", env!("CARGO_PKG_VERSION"));
    match config_note {
        Some(note) => warn!("{}", note),
        None => info!("Configuration loaded"),
    }

    let sink = DirectorySink::from_config(&config.output);
    let poll_interval = config.station.poll_interval();
    let station = GroundStation::start(config, Arc::new(SerialOpener), Box::new(sink))
        .context("Failed to start ground station")?;

    info!("Press Ctrl+C to exit");
    let mut poll = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = poll.tick() => match station.snapshot().await {
                Ok(snapshot) => info!("{}", status_report(&snapshot)),
                Err(e) => {
                    warn!("Station stopped unexpectedly: {}", e);
                    break;
                }
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    let last = station.stop().await?;
    info!("Total: {}", last.status_line());
    Ok(())
}

/// Load the configuration file
///
/// A missing file at the default path falls back to built-in defaults; the
/// returned note explains why. An explicit path must exist.
fn load_config(arg: Option<String>) -> Result<(Config, Option<String>)> {
    match arg {
        Some(path) => {
            let config = Config::load(&path).with_context(|| format!("Failed to load {}", path))?;
            Ok((config, None))
        }
        None if !Path::new(DEFAULT_CONFIG_PATH).exists() => Ok((
            Config::default(),
            Some(format!("{} not found, using defaults", DEFAULT_CONFIG_PATH)),
        )),
        None => {
            let config = Config::load(DEFAULT_CONFIG_PATH)
                .with_context(|| format!("Failed to load {}", DEFAULT_CONFIG_PATH))?;
            Ok((config, None))
        }
    }
}

/// Install the tracing subscriber
///
/// `RUST_LOG` overrides the configured level. The returned guard must be held
/// for the lifetime of the program so buffered file output is flushed.
fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Invalid log level")?;

    let (file_layer, guard) = if config.log_dir.is_empty() {
        (None, None)
    } else {
        let appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().with_writer(writer).with_ansi(false);
        (Some(layer), Some(guard))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

/// One-line status: packets, image sequence, link states and current RSSI
fn status_report(snapshot: &TelemetrySnapshot) -> String {
    let mut report = snapshot.status_line();

    for link in &snapshot.links {
        report.push_str(&format!(" | {}: {}", link.id, link.status));
    }

    match snapshot.rssi {
        Some(sample) => report.push_str(&format!(" | RSSI: {:.0} dBm ({})", sample.dbm, sample.quality())),
        None => report.push_str(" | RSSI: --"),
    }

    if snapshot.apogee_detected {
        report.push_str(" | APOGEE");
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use balloon_ground::config::HistoryConfig;
    use balloon_ground::protocol::frame::LinkId;
    use balloon_ground::telemetry::history::RssiSample;
    use balloon_ground::telemetry::state::{LinkStatus, TelemetryState};
    use chrono::Utc;

    #[test]
    fn test_default_config_path() {
        assert_eq!(DEFAULT_CONFIG_PATH, "config/default.toml");
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        assert!(load_config(Some("/nonexistent/balloon.toml".to_string())).is_err());
    }

    #[test]
    fn test_status_report_without_signal() {
        let state = TelemetryState::new(&["/dev/ttyUSB0"], &HistoryConfig::default());
        assert_eq!(
            status_report(&state.snapshot()),
            "Packets: 0 | Frame: 0 | link 1: Disconnected | RSSI: --"
        );
    }

    #[test]
    fn test_status_report_with_signal() {
        let mut state = TelemetryState::new(&["/dev/ttyUSB0", "/dev/ttyUSB1"], &HistoryConfig::default());
        state.links[1].status = LinkStatus::Connected;
        state.links[1].packets_received = 12;
        state.apogee_detected = true;
        state.rssi.observe(
            LinkId::Secondary,
            RssiSample {
                dbm: -78.0,
                observed_at: Utc::now(),
                link: LinkId::Secondary,
            },
            Utc::now(),
        );

        assert_eq!(
            status_report(&state.snapshot()),
            "Packets: 12 | Frame: 0 | link 1: Disconnected | link 2: Connected | RSSI: -78 dBm (good) | APOGEE"
        );
    }
}
