//! # Serial Communication Module
//!
//! Handles the serial link to the transmitter module.
//!
//! This module handles:
//! - Opening the serial port 8N1 without flow control at the configured baud
//! - Falling back to the common USB device paths
//! - Splitting the port into independent read and write halves

use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use crate::error::{Result, SimLinkError};

/// Default CRSF baud rate for ELRS modules
pub const CRSF_BAUD_RATE: u32 = 420_000;

/// Device paths tried after the configured one (in order of preference)
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyACM0", // USB CDC devices (most common for ELRS)
    "/dev/ttyUSB0", // USB-to-serial adapters
];

/// Serial connection to a CRSF transmitter module
pub struct CrsfSerial {
    port: SerialStream,
    device_path: String,
    baud_rate: u32,
}

impl std::fmt::Debug for CrsfSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrsfSerial")
            .field("device_path", &self.device_path)
            .field("baud_rate", &self.baud_rate)
            .finish_non_exhaustive()
    }
}

impl CrsfSerial {
    /// Open the configured port, falling back to the default device paths
    ///
    /// # Arguments
    ///
    /// * `port` - Preferred device path (e.g., "/dev/ttyACM0")
    /// * `baud_rate` - Line rate; must match the module's configured rate
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` listing every path tried
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use simlink::serial::{CrsfSerial, CRSF_BAUD_RATE};
    ///
    /// let serial = CrsfSerial::open("/dev/ttyACM0", CRSF_BAUD_RATE)?;
    /// println!("Connected to: {}", serial.device_path());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(port: &str, baud_rate: u32) -> Result<Self> {
        Self::open_with_paths(&candidate_paths(port), baud_rate)
    }

    /// Open the first path that works
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try in order
    /// * `baud_rate` - Line rate
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened transmitter module at {} ({} baud)", path, baud_rate);
                    return Ok(Self {
                        port,
                        device_path: path.to_string(),
                        baud_rate,
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                }
            }
        }

        Err(SimLinkError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port 8N1, no flow control
    fn open_port(path: &str, baud_rate: u32) -> Result<SerialStream> {
        tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| SimLinkError::Serial(format!("Failed to open {}: {}", path, e)))
    }

    /// Write one complete frame and flush it
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the write or flush fails
    pub async fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet).await?;
        self.port.flush().await?;

        debug!("Sent CRSF packet ({} bytes)", packet.len());
        Ok(())
    }

    /// Path of the opened device
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Split into read and write halves for the receive and transmit tasks
    pub fn into_split(self) -> (ReadHalf<SerialStream>, WriteHalf<SerialStream>) {
        tokio::io::split(self.port)
    }
}

/// Configured port first, then each default path not already listed
fn candidate_paths(port: &str) -> Vec<&str> {
    let mut paths = Vec::with_capacity(DEFAULT_DEVICE_PATHS.len() + 1);
    if !port.is_empty() {
        paths.push(port);
    }
    for default in DEFAULT_DEVICE_PATHS {
        if !paths.contains(default) {
            paths.push(*default);
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crsf::encoder::encode_rc_channels_frame;
    use crate::crsf::protocol::CRSF_CHANNEL_VALUE_CENTER;

    #[test]
    fn test_constants() {
        assert_eq!(CRSF_BAUD_RATE, 420_000);
        assert_eq!(DEFAULT_DEVICE_PATHS, &["/dev/ttyACM0", "/dev/ttyUSB0"]);
    }

    #[test]
    fn test_candidate_paths_configured_first() {
        assert_eq!(
            candidate_paths("/dev/ttyAMA0"),
            vec!["/dev/ttyAMA0", "/dev/ttyACM0", "/dev/ttyUSB0"]
        );
    }

    #[test]
    fn test_candidate_paths_no_duplicates() {
        assert_eq!(
            candidate_paths("/dev/ttyUSB0"),
            vec!["/dev/ttyUSB0", "/dev/ttyACM0"]
        );
    }

    #[test]
    fn test_candidate_paths_empty_port() {
        assert_eq!(candidate_paths(""), vec!["/dev/ttyACM0", "/dev/ttyUSB0"]);
    }

    #[test]
    fn test_open_with_invalid_paths_returns_error() {
        let invalid_paths = &["/dev/nonexistent0", "/dev/nonexistent1"];
        let result = CrsfSerial::open_with_paths(invalid_paths, CRSF_BAUD_RATE);

        match result {
            Err(SimLinkError::SerialPortNotFound(msg)) => {
                assert!(msg.contains("/dev/nonexistent0"));
                assert!(msg.contains("/dev/nonexistent1"));
            }
            other => panic!("Expected SerialPortNotFound error, got: {:?}", other),
        }
    }

    #[test]
    fn test_open_with_empty_paths_returns_error() {
        let result = CrsfSerial::open_with_paths(&[], CRSF_BAUD_RATE);
        assert!(matches!(result, Err(SimLinkError::SerialPortNotFound(_))));
    }

    #[test]
    fn test_open_port_with_invalid_path_returns_error() {
        let result = CrsfSerial::open_port("/dev/nonexistent_serial_device_12345", CRSF_BAUD_RATE);

        match result {
            Err(SimLinkError::Serial(msg)) => {
                assert!(msg.contains("/dev/nonexistent_serial_device_12345"));
                assert!(msg.contains("Failed to open"));
            }
            other => panic!("Expected Serial error, got: {:?}", other.map(|_| ())),
        }
    }

    // Only runs with a transmitter module connected
    #[tokio::test]
    #[ignore] // Run with: cargo test -- --ignored
    async fn test_send_packet_with_real_hardware() {
        if let Ok(mut serial) = CrsfSerial::open("/dev/ttyACM0", CRSF_BAUD_RATE) {
            let packet = encode_rc_channels_frame(&[CRSF_CHANNEL_VALUE_CENTER; 16]);
            let result = serial.send_packet(&packet).await;
            assert!(result.is_ok(), "Failed to send packet: {:?}", result);
        } else {
            println!("No transmitter module detected (skipping send test)");
        }
    }
}
