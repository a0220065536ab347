//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) gives a working link that transmits neutral channels.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::crsf::protocol::{
    CRSF_CHANNEL_VALUE_HIGH, CRSF_CHANNEL_VALUE_LOW, CRSF_CHANNEL_VALUE_MAX, CRSF_NUM_CHANNELS,
};
use crate::crsf::reader::DEFAULT_SYNC_BYTES;
use crate::error::{Result, SimLinkError};

/// Baud rates accepted for the transmitter module link
pub const SUPPORTED_BAUD_RATES: [u32; 7] =
    [115200, 400000, 416666, 420000, 921600, 1870000, 3750000];

/// Packet rates accepted for the transmit scheduler
pub const SUPPORTED_PACKET_RATES_HZ: [u32; 5] = [50, 100, 150, 250, 500];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub crsf: CrsfConfig,
    pub input: InputConfig,
    pub channels: Vec<ChannelConfig>,
    pub telemetry: TelemetryConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Upper bound on a single receive wait
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

/// CRSF protocol configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CrsfConfig {
    #[serde(default = "default_packet_rate_hz")]
    pub packet_rate_hz: u32,

    /// Consecutive failed writes before the link is dropped
    #[serde(default = "default_max_consecutive_write_errors")]
    pub max_consecutive_write_errors: u32,

    /// Bytes accepted as the start of a received frame
    #[serde(default = "default_sync_bytes")]
    pub sync_bytes: Vec<u8>,

    /// Ask the module to identify itself when the link comes up
    #[serde(default = "default_ping_on_connect")]
    pub ping_on_connect: bool,
}

/// Input devices and smoothing
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct InputConfig {
    /// Moving-average window in samples
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,

    /// Reject a single zero reading after two readings above this value
    #[serde(default)]
    pub dropout_threshold: Option<i32>,

    /// Delay between attempts to reopen a lost device
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// One evdev input device
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct DeviceConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub vendor_id: u16,

    #[serde(default)]
    pub product_id: u16,

    /// Explicit `/dev/input/eventN` path, skips the vendor/product scan
    #[serde(default)]
    pub path: Option<String>,

    /// Axis name -> evdev `ABS_*` code
    #[serde(default)]
    pub axes: HashMap<String, u16>,

    /// Button name -> evdev `KEY_*` / `BTN_*` code
    #[serde(default)]
    pub buttons: HashMap<String, u16>,
}

/// One RC channel binding.
///
/// Exactly one of `axis`, `button` or `mix` must be set.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Channel index (0-15)
    pub index: usize,

    #[serde(default)]
    pub axis: Option<String>,

    #[serde(default)]
    pub button: Option<String>,

    #[serde(default)]
    pub mix: Vec<MixInputConfig>,

    /// Calibration for `axis`
    #[serde(default)]
    pub calibration: CalibrationConfig,

    /// Button pressed value
    #[serde(default = "default_switch_on")]
    pub on: u16,

    /// Button released value
    #[serde(default = "default_switch_off")]
    pub off: u16,

    /// Offset in channel units
    #[serde(default)]
    pub trim: i16,
}

/// One input of a mixed channel
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MixInputConfig {
    pub axis: String,

    #[serde(default)]
    pub calibration: CalibrationConfig,
}

/// Curve family for an axis
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CurveKind {
    Linear,
    #[default]
    Piecewise,
    Expo,
}

/// Raw-to-channel calibration for an axis
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct CalibrationConfig {
    #[serde(default = "default_raw_min")]
    pub min: i32,

    #[serde(default)]
    pub center: i32,

    #[serde(default = "default_raw_max")]
    pub max: i32,

    #[serde(default)]
    pub invert: bool,

    #[serde(default)]
    pub deadzone: i32,

    #[serde(default)]
    pub curve: CurveKind,

    /// Expo factor, used when `curve = "expo"`
    #[serde(default)]
    pub expo: f32,

    /// Fraction of travel to use (max throttle / max steer)
    #[serde(default = "default_limit")]
    pub limit: f32,
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    /// Minimum spacing of link statistics records
    #[serde(default = "default_log_interval_ms")]
    pub log_interval_ms: u64,

    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { 420000 }
fn default_timeout_ms() -> u64 { 100 }
fn default_reconnect_interval_ms() -> u64 { 1000 }

fn default_packet_rate_hz() -> u32 { 150 }
fn default_max_consecutive_write_errors() -> u32 { 50 }
fn default_sync_bytes() -> Vec<u8> { DEFAULT_SYNC_BYTES.to_vec() }
fn default_ping_on_connect() -> bool { true }

fn default_smoothing_window() -> usize { 5 }

fn default_switch_on() -> u16 { CRSF_CHANNEL_VALUE_HIGH }
fn default_switch_off() -> u16 { CRSF_CHANNEL_VALUE_LOW }

fn default_raw_min() -> i32 { i16::MIN as i32 }
fn default_raw_max() -> i32 { i16::MAX as i32 }
fn default_limit() -> f32 { 1.0 }

fn default_telemetry_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_log_interval_ms() -> u64 { 100 }
fn default_log_format() -> String { "jsonl".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

impl Default for CrsfConfig {
    fn default() -> Self {
        Self {
            packet_rate_hz: default_packet_rate_hz(),
            max_consecutive_write_errors: default_max_consecutive_write_errors(),
            sync_bytes: default_sync_bytes(),
            ping_on_connect: default_ping_on_connect(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            smoothing_window: default_smoothing_window(),
            dropout_threshold: None,
            reconnect_interval_ms: default_reconnect_interval_ms(),
            devices: Vec::new(),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min: default_raw_min(),
            center: 0,
            max: default_raw_max(),
            invert: false,
            deadzone: 0,
            curve: CurveKind::default(),
            expo: 0.0,
            limit: default_limit(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
            log_interval_ms: default_log_interval_ms(),
            format: default_log_format(),
        }
    }
}

fn invalid(message: impl Into<String>) -> SimLinkError {
    SimLinkError::InvalidConfig(message.into())
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use simlink::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| invalid(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns `Config` for malformed TOML and `InvalidConfig` for values
    /// out of range
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first value out of range
    pub fn validate(&self) -> Result<()> {
        self.validate_serial()?;
        self.validate_crsf()?;
        self.validate_input()?;
        self.validate_channels()?;
        self.validate_telemetry()
    }

    fn validate_serial(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {:?}",
                SUPPORTED_BAUD_RATES
            )));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 10000 {
            return Err(invalid("timeout_ms must be between 1 and 10000"));
        }

        if self.serial.reconnect_interval_ms == 0 || self.serial.reconnect_interval_ms > 60000 {
            return Err(invalid("reconnect_interval_ms must be between 1 and 60000"));
        }

        Ok(())
    }

    fn validate_crsf(&self) -> Result<()> {
        if !SUPPORTED_PACKET_RATES_HZ.contains(&self.crsf.packet_rate_hz) {
            return Err(invalid(format!(
                "packet_rate_hz must be one of: {:?}",
                SUPPORTED_PACKET_RATES_HZ
            )));
        }

        if self.crsf.max_consecutive_write_errors == 0 {
            return Err(invalid("max_consecutive_write_errors must be greater than 0"));
        }

        if self.crsf.sync_bytes.is_empty() {
            return Err(invalid("sync_bytes cannot be empty"));
        }

        Ok(())
    }

    fn validate_input(&self) -> Result<()> {
        if self.input.smoothing_window == 0 || self.input.smoothing_window > 100 {
            return Err(invalid("smoothing_window must be between 1 and 100"));
        }

        if self.input.reconnect_interval_ms == 0 || self.input.reconnect_interval_ms > 60000 {
            return Err(invalid("input reconnect_interval_ms must be between 1 and 60000"));
        }

        for device in &self.input.devices {
            if device.path.is_none() && (device.vendor_id == 0 || device.product_id == 0) {
                return Err(invalid(format!(
                    "input device '{}' needs a path or vendor_id and product_id",
                    device.name
                )));
            }

            if device.axes.is_empty() && device.buttons.is_empty() {
                return Err(invalid(format!(
                    "input device '{}' maps no axes or buttons",
                    device.name
                )));
            }
        }

        Ok(())
    }

    fn validate_channels(&self) -> Result<()> {
        let mut seen = HashSet::new();

        for channel in &self.channels {
            if channel.index >= CRSF_NUM_CHANNELS {
                return Err(invalid(format!(
                    "channel index {} is out of bounds (must be 0-15)",
                    channel.index
                )));
            }

            if !seen.insert(channel.index) {
                return Err(invalid(format!("channel {} is bound twice", channel.index)));
            }

            let sources = [
                channel.axis.is_some(),
                channel.button.is_some(),
                !channel.mix.is_empty(),
            ];
            if sources.iter().filter(|&&set| set).count() != 1 {
                return Err(invalid(format!(
                    "channel {} needs exactly one of axis, button or mix",
                    channel.index
                )));
            }

            if channel.on > CRSF_CHANNEL_VALUE_MAX || channel.off > CRSF_CHANNEL_VALUE_MAX {
                return Err(invalid(format!(
                    "channel {} on/off values must be at most 2047",
                    channel.index
                )));
            }

            if let Some(axis) = &channel.axis {
                self.check_axis_known(axis)?;
                channel.calibration.validate(channel.index)?;
            }

            if let Some(button) = &channel.button {
                self.check_button_known(button)?;
            }

            for input in &channel.mix {
                self.check_axis_known(&input.axis)?;
                input.calibration.validate(channel.index)?;
            }
        }

        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.log_interval_ms == 0 || self.telemetry.log_interval_ms > 60000 {
            return Err(invalid("log_interval_ms must be between 1 and 60000"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if self.telemetry.format != "jsonl" {
            return Err(invalid("log format must be 'jsonl' (only supported format)"));
        }

        Ok(())
    }

    /// Axis names must exist on some device once devices are configured
    fn check_axis_known(&self, axis: &str) -> Result<()> {
        if self.input.devices.is_empty()
            || self.input.devices.iter().any(|d| d.axes.contains_key(axis))
        {
            Ok(())
        } else {
            Err(invalid(format!("axis '{}' is not mapped by any input device", axis)))
        }
    }

    fn check_button_known(&self, button: &str) -> Result<()> {
        if self.input.devices.is_empty()
            || self.input.devices.iter().any(|d| d.buttons.contains_key(button))
        {
            Ok(())
        } else {
            Err(invalid(format!(
                "button '{}' is not mapped by any input device",
                button
            )))
        }
    }
}

impl CalibrationConfig {
    fn validate(&self, index: usize) -> Result<()> {
        if self.min >= self.max {
            return Err(invalid(format!(
                "channel {}: calibration min must be less than max",
                index
            )));
        }

        if self.center < self.min || self.center > self.max {
            return Err(invalid(format!(
                "channel {}: calibration center must be within min..max",
                index
            )));
        }

        if self.deadzone < 0 {
            return Err(invalid(format!("channel {}: deadzone cannot be negative", index)));
        }

        if !(0.0..=1.0).contains(&self.expo) {
            return Err(invalid(format!(
                "channel {}: expo must be between 0.0 and 1.0",
                index
            )));
        }

        if !(self.limit > 0.0 && self.limit <= 1.0) {
            return Err(invalid(format!(
                "channel {}: limit must be greater than 0.0 and at most 1.0",
                index
            )));
        }

        Ok(())
    }
}
