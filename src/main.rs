//! # SimLink
//!
//! Drive an RC vehicle from a sim-racing wheel and pedals via an ExpressLRS
//! transmitter module.
//!
//! Usage: `simlink [config.toml]`. Without a file the built-in defaults are
//! used, which transmit centered channels.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use simlink::config::Config;
use simlink::crsf::encoder::encode_device_ping;
use simlink::crsf::protocol::{Packet, CRSF_ADDRESS_RADIO_TRANSMITTER};
use simlink::input::channel_mapper::ChannelMapper;
use simlink::input::hid;
use simlink::input::source::{InputSource, NullInput};
use simlink::input::state::InputState;
use simlink::link::{run_session, TelemetryReceiver, TransmitScheduler};
use simlink::serial::CrsfSerial;
use simlink::telemetry::logger::TelemetryLogger;
use simlink::telemetry::TelemetrySnapshot;

/// Seconds between link status log lines
const STATUS_INTERVAL_SECS: u64 = 5;

/// Main entry point for SimLink
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Set up non-blocking logging
///    - Load configuration
///    - Open HID devices and the telemetry log
///
/// 2. **Link sessions**
///    - Open the serial port and ping the module
///    - Run the transmit scheduler and telemetry receiver
///    - Reconnect after `reconnect_interval_ms` when the link fails
///
/// 3. **Graceful Shutdown**
///    - Ctrl+C stops both tasks before their next tick/read
///
/// # Errors
///
/// Returns error if the configuration is invalid, a configured input device
/// cannot be opened or the telemetry log directory cannot be created
#[tokio::main]
async fn main() -> Result<()> {
    let (log_writer, _log_guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::fmt()
        .with_writer(log_writer)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("SimLink v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = load_config(std::env::args().nth(1))?;

    let mut input: Box<dyn InputSource> = if config.input.devices.is_empty() {
        warn!("No input devices configured, transmitting neutral channels");
        Box::new(NullInput)
    } else {
        let (input, readers) = hid::open_all(
            &config.input.devices,
            Duration::from_millis(config.input.reconnect_interval_ms),
        )
        .context("Failed to open input devices")?;
        info!("{} input reader(s) running", readers.len());
        Box::new(input)
    };

    let logger = if config.telemetry.enabled {
        let logger = TelemetryLogger::new(&config.telemetry)
            .context("Failed to set up telemetry log")?;
        Some(Arc::new(Mutex::new(logger)))
    } else {
        None
    };

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        } else {
            info!("Received Ctrl+C, shutting down...");
        }
        let _ = shutdown_tx.send(true);
    });

    let (telemetry_tx, telemetry_rx) = watch::channel(TelemetrySnapshot::default());
    let telemetry_tx = Arc::new(telemetry_tx);
    tokio::spawn(log_link_status(telemetry_rx, shutdown_rx.clone()));

    let reconnect_interval = Duration::from_millis(config.serial.reconnect_interval_ms);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let mut serial = match CrsfSerial::open(&config.serial.port, config.serial.baud_rate) {
            Ok(serial) => serial,
            Err(e) => {
                warn!("{}; retrying in {} ms", e, reconnect_interval.as_millis());
                if shutdown_during(&mut shutdown_rx, reconnect_interval).await {
                    break;
                }
                continue;
            }
        };

        if config.crsf.ping_on_connect {
            if let Err(e) = serial
                .send_packet(&encode_device_ping(CRSF_ADDRESS_RADIO_TRANSMITTER))
                .await
            {
                warn!("Failed to ping transmitter module: {}", e);
            }
        }

        let (read_half, write_half) = serial.into_split();

        let receiver = TelemetryReceiver::new(
            read_half,
            &config.crsf.sync_bytes,
            Duration::from_millis(config.serial.timeout_ms),
            Arc::clone(&telemetry_tx),
        );

        let scheduler = TransmitScheduler::new(
            write_half,
            input,
            ChannelMapper::from_config(&config.channels),
            InputState::new(config.input.smoothing_window)
                .with_dropout_threshold(config.input.dropout_threshold),
            &config.crsf,
        );

        let end = run_session(
            receiver,
            scheduler,
            shutdown_rx.clone(),
            packet_handler(logger.clone()),
        )
        .await;
        input = end.input;

        match end.result {
            Ok(()) => break,
            Err(e) => {
                error!("Link lost: {}; reconnecting in {} ms", e, reconnect_interval.as_millis());
                if shutdown_during(&mut shutdown_rx, reconnect_interval).await {
                    break;
                }
            }
        }
    }

    if let Some(logger) = logger {
        match logger.lock() {
            Ok(mut logger) => {
                if let Err(e) = logger.flush() {
                    warn!("Failed to flush telemetry log: {}", e);
                }
            }
            Err(_) => warn!("Telemetry log not flushed: lock poisoned"),
        }
    }

    info!("SimLink stopped");
    Ok(())
}

/// Load the configuration file named on the command line, or the defaults
fn load_config(path: Option<String>) -> Result<Config> {
    match path {
        Some(path) => {
            let config = Config::load(&path)
                .with_context(|| format!("Failed to load configuration from {}", path))?;
            info!("Loaded configuration from {}", path);
            Ok(config)
        }
        None => {
            info!("No configuration file given, using defaults");
            Ok(Config::default())
        }
    }
}

/// Per-packet callback for the receive task
fn packet_handler(logger: Option<Arc<Mutex<TelemetryLogger>>>) -> impl FnMut(&Packet) + Send {
    let mut poison_warned = false;

    move |packet| {
        if let Packet::DeviceInfo(info) = packet {
            info!(
                "Transmitter module: {} (firmware 0x{:08X})",
                info.name, info.firmware_id
            );
        }

        if let Some(logger) = &logger {
            match logger.lock() {
                Ok(mut logger) => {
                    if let Err(e) = logger.log_packet(packet) {
                        warn!("Failed to log telemetry: {}", e);
                    }
                }
                Err(_) => {
                    if !poison_warned {
                        warn!("Telemetry log unavailable after a panic, records are dropped");
                        poison_warned = true;
                    }
                }
            }
        }
    }
}

/// Periodically log the latest link statistics until shutdown
async fn log_link_status(
    telemetry: watch::Receiver<TelemetrySnapshot>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(STATUS_INTERVAL_SECS));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = telemetry.borrow().clone();
                match snapshot.link {
                    Some(link) if snapshot.link_up() => info!(
                        "Link: LQ {}%, RSSI {} dBm, SNR {} dB, TX {} mW",
                        link.uplink_lq,
                        link.active_rssi_dbm(),
                        link.uplink_snr,
                        link.uplink_tx_power_mw().unwrap_or(0)
                    ),
                    _ => warn!("No link to receiver"),
                }
                if let Some(battery) = snapshot.battery {
                    info!(
                        "Battery: {:.1} V, {:.1} A, {}%",
                        battery.voltage, battery.current, battery.remaining_percent
                    );
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Sleep for `delay`; `true` if shutdown was requested meanwhile
async fn shutdown_during(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
        _ = shutdown.changed() => true,
    }
}
