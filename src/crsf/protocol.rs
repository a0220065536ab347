//! # CRSF Protocol Constants and Types
//!
//! Core protocol definitions for CRSF (Crossfire) communication.
//!
//! ## Frame Layout
//!
//! ```text
//! [sync/address][len][type][payload ... ][crc8]
//!                    |<------ len bytes ------>|
//! ```
//!
//! `len` counts type + payload + crc. Extended frames (type >= 0x28) start
//! their payload with a destination and an origin address byte.

use bytes::Bytes;
use serde::Serialize;

use crate::error::{Result, SimLinkError};

/// CRSF frame sync byte, also the flight controller / receiver address
pub const CRSF_SYNC_BYTE: u8 = 0xC8;

/// Device addresses
pub const CRSF_ADDRESS_BROADCAST: u8 = 0x00;
pub const CRSF_ADDRESS_RADIO_TRANSMITTER: u8 = 0xEA;
pub const CRSF_ADDRESS_RECEIVER: u8 = 0xEC;
pub const CRSF_ADDRESS_TRANSMITTER_MODULE: u8 = 0xEE;

/// Frame types
pub const CRSF_FRAMETYPE_GPS: u8 = 0x02;
pub const CRSF_FRAMETYPE_BATTERY_SENSOR: u8 = 0x08;
pub const CRSF_FRAMETYPE_LINK_STATISTICS: u8 = 0x14;
pub const CRSF_FRAMETYPE_RC_CHANNELS_PACKED: u8 = 0x16;
pub const CRSF_FRAMETYPE_DEVICE_PING: u8 = 0x28;
pub const CRSF_FRAMETYPE_DEVICE_INFO: u8 = 0x29;
pub const CRSF_FRAMETYPE_RADIO_ID: u8 = 0x3A;

/// Radio id subtype carrying the module's frame timing
pub const CRSF_RADIO_ID_SUBTYPE_TIMING: u8 = 0x10;

/// Smallest valid length byte (type + crc)
pub const CRSF_FRAME_LENGTH_MIN: u8 = 2;

/// Largest valid length byte; a whole frame is at most 64 bytes
pub const CRSF_FRAME_LENGTH_MAX: u8 = 62;

/// Maximum CRSF frame size on the wire
pub const CRSF_MAX_FRAME_SIZE: usize = 64;

/// Maximum CRSF payload size (64 - sync - len - type - crc)
pub const CRSF_MAX_PAYLOAD_SIZE: usize = 60;

/// RC channels payload size (22 bytes for 16 channels × 11 bits)
pub const CRSF_RC_CHANNELS_PAYLOAD_SIZE: usize = 22;

/// RC channels frame length byte (type + payload + crc)
pub const CRSF_RC_CHANNELS_FRAME_LENGTH: u8 = 0x18; // 24 bytes

/// Complete RC channels frame size on the wire
pub const CRSF_RC_CHANNELS_FRAME_SIZE: usize = 26;

/// Number of RC channels
pub const CRSF_NUM_CHANNELS: usize = 16;

/// Bits per packed channel value
pub const CRSF_CHANNEL_BITS: usize = 11;

/// Wire range of a channel value (11-bit: 0-2047)
pub const CRSF_CHANNEL_VALUE_MIN: u16 = 0;
pub const CRSF_CHANNEL_VALUE_MAX: u16 = 2047;

/// Conventional endpoints and center used by receivers for range and failsafe
/// detection (988us / 1500us / 2012us)
pub const CRSF_CHANNEL_VALUE_LOW: u16 = 172;
pub const CRSF_CHANNEL_VALUE_CENTER: u16 = 992;
pub const CRSF_CHANNEL_VALUE_HIGH: u16 = 1811;

/// Link Statistics payload size
pub const CRSF_LINK_STATS_PAYLOAD_SIZE: usize = 10;

/// Battery Sensor payload size
pub const CRSF_BATTERY_SENSOR_PAYLOAD_SIZE: usize = 8;

/// GPS payload size
pub const CRSF_GPS_PAYLOAD_SIZE: usize = 15;

/// Radio id timing payload size (dest + origin + subtype + interval + phase)
pub const CRSF_RADIO_TIMING_PAYLOAD_SIZE: usize = 11;

/// RC channels array type (16 channels, 11-bit values)
pub type RcChannels = [u16; CRSF_NUM_CHANNELS];

/// TX power in mW, indexed by the link statistics power field
const TX_POWER_MW: [u16; 9] = [0, 10, 25, 100, 500, 1000, 2000, 250, 50];

/// Link statistics telemetry data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkStatistics {
    /// Uplink RSSI (antenna 1) in -dBm
    pub uplink_rssi_1: u8,

    /// Uplink RSSI (antenna 2) in -dBm (diversity)
    pub uplink_rssi_2: u8,

    /// Uplink link quality (0-100%)
    pub uplink_lq: u8,

    /// Uplink SNR in dB
    pub uplink_snr: i8,

    /// Active antenna (0 or 1)
    pub active_antenna: u8,

    /// RF mode / packet rate
    pub rf_mode: u8,

    /// Uplink TX power (enumerated, see [`LinkStatistics::uplink_tx_power_mw`])
    pub uplink_tx_power: u8,

    /// Downlink RSSI in -dBm
    pub downlink_rssi: u8,

    /// Downlink link quality (0-100%)
    pub downlink_lq: u8,

    /// Downlink SNR in dB
    pub downlink_snr: i8,
}

impl LinkStatistics {
    /// Uplink TX power in milliwatts, `None` for an unknown index.
    #[must_use]
    pub fn uplink_tx_power_mw(&self) -> Option<u16> {
        TX_POWER_MW.get(self.uplink_tx_power as usize).copied()
    }

    /// RSSI of the antenna currently in use, as a negative dBm value.
    #[must_use]
    pub fn active_rssi_dbm(&self) -> i16 {
        let rssi = if self.active_antenna == 0 {
            self.uplink_rssi_1
        } else {
            self.uplink_rssi_2
        };
        -(rssi as i16)
    }
}

/// Battery sensor telemetry data
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatterySensor {
    /// Battery voltage in volts
    pub voltage: f32,

    /// Current draw in amperes
    pub current: f32,

    /// Capacity used in mAh
    pub capacity_used: u32,

    /// Battery remaining percentage (0-100%)
    pub remaining_percent: u8,
}

/// GPS telemetry data
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsData {
    /// Latitude in degrees
    pub latitude: f64,

    /// Longitude in degrees
    pub longitude: f64,

    /// Ground speed in km/h
    pub ground_speed: f32,

    /// Heading in degrees
    pub heading: f32,

    /// Altitude in meters
    pub altitude: i32,

    /// Number of satellites
    pub satellites: u8,
}

/// Device information reported in answer to a device ping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub destination: u8,
    pub origin: u8,
    pub name: String,
    pub serial_number: u32,
    pub hardware_id: u32,
    pub firmware_id: u32,
    pub parameter_count: u8,
    pub parameter_version: u8,
}

/// Frame timing advertised by the transmitter module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RadioTiming {
    /// Frame interval in 0.1 µs units
    pub interval: u32,
    /// Phase offset in 0.1 µs units
    pub phase: i32,
}

impl RadioTiming {
    /// Frame interval in microseconds
    #[must_use]
    pub fn interval_us(&self) -> f64 {
        self.interval as f64 / 10.0
    }
}

/// A checksum-validated CRSF frame.
///
/// Values of this type only come out of the decoder, so holding one means
/// the CRC matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrsfFrame {
    address: u8,
    frame_type: u8,
    payload: Bytes,
}

impl CrsfFrame {
    /// Create a validated frame
    ///
    /// # Errors
    ///
    /// Returns error if payload exceeds CRSF_MAX_PAYLOAD_SIZE (60 bytes)
    pub(crate) fn new(address: u8, frame_type: u8, payload: Bytes) -> Result<Self> {
        if payload.len() > CRSF_MAX_PAYLOAD_SIZE {
            return Err(SimLinkError::PayloadTooLarge {
                size: payload.len(),
                max: CRSF_MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self {
            address,
            frame_type,
            payload,
        })
    }

    /// Sync or address byte the frame arrived with
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Frame type byte
    pub fn frame_type(&self) -> u8 {
        self.frame_type
    }

    /// Payload between the type byte and the CRC
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Frame length byte (type + payload + crc)
    ///
    /// This cannot overflow since payload is validated to be ≤ 60 bytes
    pub fn length(&self) -> u8 {
        (1 + self.payload.len() + 1) as u8
    }

    /// Whether the payload starts with destination/origin addresses
    pub fn is_extended(&self) -> bool {
        self.frame_type >= CRSF_FRAMETYPE_DEVICE_PING
    }
}

/// Typed record decoded from a validated frame
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Gps(GpsData),
    Battery(BatterySensor),
    LinkStatistics(LinkStatistics),
    RcChannels(RcChannels),
    DeviceInfo(DeviceInfo),
    RadioTiming(RadioTiming),
    /// Well-framed but not decoded here; kept for forward compatibility
    Unrecognized { frame_type: u8, payload: Bytes },
}

impl Packet {
    /// Frame type byte this packet was decoded from
    pub fn frame_type(&self) -> u8 {
        match self {
            Packet::Gps(_) => CRSF_FRAMETYPE_GPS,
            Packet::Battery(_) => CRSF_FRAMETYPE_BATTERY_SENSOR,
            Packet::LinkStatistics(_) => CRSF_FRAMETYPE_LINK_STATISTICS,
            Packet::RcChannels(_) => CRSF_FRAMETYPE_RC_CHANNELS_PACKED,
            Packet::DeviceInfo(_) => CRSF_FRAMETYPE_DEVICE_INFO,
            Packet::RadioTiming(_) => CRSF_FRAMETYPE_RADIO_ID,
            Packet::Unrecognized { frame_type, .. } => *frame_type,
        }
    }
}
