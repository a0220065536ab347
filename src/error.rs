//! # Error Types
//!
//! Custom error types for SimLink using `thiserror`.

use thiserror::Error;

/// Main error type for SimLink
#[derive(Debug, Error)]
pub enum SimLinkError {
    /// Channel value does not fit in 11 bits
    #[error("Channel {index} value {value} exceeds 11-bit range")]
    InvalidChannelValue { index: usize, value: u16 },

    /// Frame checksum mismatch
    #[error("CRC mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum { expected: u8, actual: u8 },

    /// Length byte outside 2..=62
    #[error("Frame length {0} out of range")]
    FrameLengthOutOfRange(u8),

    /// Frame body shorter than type + crc
    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    /// Known frame type with a truncated payload
    #[error("Payload for frame type 0x{frame_type:02X} too short: {len} bytes, need {expected}")]
    PayloadTooShort {
        frame_type: u8,
        len: usize,
        expected: usize,
    },

    /// Payload does not fit in a single frame
    #[error("Payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// I/O errors on the serial transport
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The transport reached end of stream
    #[error("Transport closed")]
    TransportClosed,

    /// Serial port setup errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate serial ports could be opened
    #[error("No serial port found (tried: {0})")]
    SerialPortNotFound(String),

    /// HID input errors
    #[error("Input error: {0}")]
    Input(String),

    /// No HID device matched vendor/product
    #[error("Input device {vendor_id:04x}:{product_id:04x} not found")]
    InputDeviceNotFound { vendor_id: u16, product_id: u16 },

    /// Configuration parse errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration values failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Telemetry record serialization errors
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] serde_json::Error),

    /// Telemetry log file errors
    #[error("Telemetry log error: {0}")]
    TelemetryLog(std::io::Error),
}

/// Result type alias for SimLink
pub type Result<T> = std::result::Result<T, SimLinkError>;
