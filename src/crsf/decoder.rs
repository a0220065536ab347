//! # CRSF Packet Decoder
//!
//! Validates single frames and decodes telemetry payloads (Link Statistics,
//! Battery, GPS, Device Info, Radio Timing, RC Channels).

use bytes::Bytes;

use super::crc::crc8;
use super::protocol::*;
use crate::error::{Result, SimLinkError};

/// Validate one frame body
///
/// # Arguments
///
/// * `address` - Sync/address byte that preceded the length byte
/// * `body` - Exactly `len` bytes: type + payload + crc
///
/// # Returns
///
/// * `Result<CrsfFrame>` - Validated frame
///
/// # Errors
///
/// Returns error if:
/// - Body is shorter than type + crc (`FrameTooShort`)
/// - Body is longer than the 62-byte ceiling (`FrameLengthOutOfRange`)
/// - CRC over type + payload does not match the trailing byte (`Checksum`)
pub fn decode_frame(address: u8, body: &[u8]) -> Result<CrsfFrame> {
    if body.len() < CRSF_FRAME_LENGTH_MIN as usize {
        return Err(SimLinkError::FrameTooShort(body.len()));
    }
    if body.len() > CRSF_FRAME_LENGTH_MAX as usize {
        return Err(SimLinkError::FrameLengthOutOfRange(body.len().min(u8::MAX as usize) as u8));
    }

    let (data, crc) = body.split_at(body.len() - 1);
    let received_crc = crc[0];
    let calculated_crc = crc8(data);

    if calculated_crc != received_crc {
        return Err(SimLinkError::Checksum {
            expected: calculated_crc,
            actual: received_crc,
        });
    }

    CrsfFrame::new(address, data[0], Bytes::copy_from_slice(&data[1..]))
}

/// Validate a complete wire frame (sync + length + body)
///
/// Trailing bytes after the frame are ignored.
///
/// # Errors
///
/// Returns error if the frame is truncated, the length byte is out of range
/// or the CRC does not match
pub fn decode_wire_frame(frame: &[u8]) -> Result<CrsfFrame> {
    if frame.len() < 4 {
        return Err(SimLinkError::FrameTooShort(frame.len()));
    }

    let length = frame[1];
    if !(CRSF_FRAME_LENGTH_MIN..=CRSF_FRAME_LENGTH_MAX).contains(&length) {
        return Err(SimLinkError::FrameLengthOutOfRange(length));
    }

    let end = 2 + length as usize;
    if frame.len() < end {
        return Err(SimLinkError::FrameTooShort(frame.len()));
    }

    decode_frame(frame[0], &frame[2..end])
}

/// Decode a validated frame into its typed record
///
/// # Errors
///
/// Returns `PayloadTooShort` when a known frame type carries a truncated payload
pub fn decode_packet(frame: &CrsfFrame) -> Result<Packet> {
    let payload = frame.payload();

    let packet = match frame.frame_type() {
        CRSF_FRAMETYPE_GPS => Packet::Gps(decode_gps(payload)?),
        CRSF_FRAMETYPE_BATTERY_SENSOR => Packet::Battery(decode_battery_sensor(payload)?),
        CRSF_FRAMETYPE_LINK_STATISTICS => {
            Packet::LinkStatistics(decode_link_statistics(payload)?)
        }
        CRSF_FRAMETYPE_RC_CHANNELS_PACKED => Packet::RcChannels(decode_rc_channels(payload)?),
        CRSF_FRAMETYPE_DEVICE_INFO => Packet::DeviceInfo(decode_device_info(payload)?),
        CRSF_FRAMETYPE_RADIO_ID => match decode_radio_timing(payload)? {
            Some(timing) => Packet::RadioTiming(timing),
            None => unrecognized(frame),
        },
        _ => unrecognized(frame),
    };

    Ok(packet)
}

impl TryFrom<&CrsfFrame> for Packet {
    type Error = SimLinkError;

    fn try_from(frame: &CrsfFrame) -> Result<Self> {
        decode_packet(frame)
    }
}

fn unrecognized(frame: &CrsfFrame) -> Packet {
    Packet::Unrecognized {
        frame_type: frame.frame_type(),
        payload: frame.payload().clone(),
    }
}

fn require_len(frame_type: u8, payload: &[u8], expected: usize) -> Result<()> {
    if payload.len() < expected {
        return Err(SimLinkError::PayloadTooShort {
            frame_type,
            len: payload.len(),
            expected,
        });
    }
    Ok(())
}

/// Unpack the 22-byte RC channels payload into 16 channel values
///
/// # Errors
///
/// Returns `PayloadTooShort` for payloads under 22 bytes
pub fn decode_rc_channels(payload: &[u8]) -> Result<RcChannels> {
    require_len(
        CRSF_FRAMETYPE_RC_CHANNELS_PACKED,
        payload,
        CRSF_RC_CHANNELS_PAYLOAD_SIZE,
    )?;

    let mut channels = [0u16; CRSF_NUM_CHANNELS];
    let mut acc: u32 = 0;
    let mut pending_bits = 0;
    let mut bytes = payload.iter();

    for channel in channels.iter_mut() {
        while pending_bits < CRSF_CHANNEL_BITS {
            // Length checked above, 22 bytes carry exactly 176 bits
            let byte = bytes.next().copied().unwrap_or(0);
            acc |= u32::from(byte) << pending_bits;
            pending_bits += 8;
        }
        *channel = (acc as u16) & CRSF_CHANNEL_VALUE_MAX;
        acc >>= CRSF_CHANNEL_BITS;
        pending_bits -= CRSF_CHANNEL_BITS;
    }

    Ok(channels)
}

/// Decode Link Statistics telemetry packet
///
/// # Arguments
///
/// * `payload` - Link Statistics payload (10 bytes)
pub fn decode_link_statistics(payload: &[u8]) -> Result<LinkStatistics> {
    require_len(
        CRSF_FRAMETYPE_LINK_STATISTICS,
        payload,
        CRSF_LINK_STATS_PAYLOAD_SIZE,
    )?;

    Ok(LinkStatistics {
        uplink_rssi_1: payload[0],
        uplink_rssi_2: payload[1],
        uplink_lq: payload[2],
        uplink_snr: payload[3] as i8,
        active_antenna: payload[4],
        rf_mode: payload[5],
        uplink_tx_power: payload[6],
        downlink_rssi: payload[7],
        downlink_lq: payload[8],
        downlink_snr: payload[9] as i8,
    })
}

/// Decode Battery Sensor telemetry packet
///
/// # Arguments
///
/// * `payload` - Battery Sensor payload (8 bytes)
pub fn decode_battery_sensor(payload: &[u8]) -> Result<BatterySensor> {
    require_len(
        CRSF_FRAMETYPE_BATTERY_SENSOR,
        payload,
        CRSF_BATTERY_SENSOR_PAYLOAD_SIZE,
    )?;

    // Voltage: 2 bytes, big-endian, in deci-volts
    let voltage_dv = u16::from_be_bytes([payload[0], payload[1]]);

    // Current: 2 bytes, big-endian, in deci-amps
    let current_da = u16::from_be_bytes([payload[2], payload[3]]);

    // Capacity: 3 bytes, big-endian, in mAh
    let capacity_used = u32::from_be_bytes([0, payload[4], payload[5], payload[6]]);

    Ok(BatterySensor {
        voltage: voltage_dv as f32 / 10.0,
        current: current_da as f32 / 10.0,
        capacity_used,
        remaining_percent: payload[7],
    })
}

/// Decode GPS telemetry packet
///
/// # Arguments
///
/// * `payload` - GPS payload (15 bytes)
pub fn decode_gps(payload: &[u8]) -> Result<GpsData> {
    require_len(CRSF_FRAMETYPE_GPS, payload, CRSF_GPS_PAYLOAD_SIZE)?;

    // Latitude / longitude: 4 bytes each, big-endian, degrees × 10^7
    let lat_raw = i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let lon_raw = i32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);

    // Ground speed: km/h × 10
    let speed_raw = u16::from_be_bytes([payload[8], payload[9]]);

    // Heading: degrees × 100
    let heading_raw = u16::from_be_bytes([payload[10], payload[11]]);

    // Altitude: meters + 1000
    let altitude_raw = u16::from_be_bytes([payload[12], payload[13]]);

    Ok(GpsData {
        latitude: lat_raw as f64 / 10_000_000.0,
        longitude: lon_raw as f64 / 10_000_000.0,
        ground_speed: speed_raw as f32 / 10.0,
        heading: heading_raw as f32 / 100.0,
        altitude: altitude_raw as i32 - 1000,
        satellites: payload[14],
    })
}

/// Decode a Device Info answer (extended frame)
///
/// Layout: `[dest][origin][name...\0][serial u32][hw u32][fw u32][params u8][version u8]`
pub fn decode_device_info(payload: &[u8]) -> Result<DeviceInfo> {
    const FIXED_TAIL: usize = 14;

    // dest + origin + empty name terminator + fixed fields
    require_len(CRSF_FRAMETYPE_DEVICE_INFO, payload, 3 + FIXED_TAIL)?;

    let name_end = payload[2..]
        .iter()
        .position(|&b| b == 0)
        .map(|pos| pos + 2)
        .ok_or(SimLinkError::PayloadTooShort {
            frame_type: CRSF_FRAMETYPE_DEVICE_INFO,
            len: payload.len(),
            expected: payload.len() + 1,
        })?;

    require_len(
        CRSF_FRAMETYPE_DEVICE_INFO,
        payload,
        name_end + 1 + FIXED_TAIL,
    )?;
    let tail = &payload[name_end + 1..];

    let be_u32 = |at: usize| u32::from_be_bytes([tail[at], tail[at + 1], tail[at + 2], tail[at + 3]]);

    Ok(DeviceInfo {
        destination: payload[0],
        origin: payload[1],
        name: String::from_utf8_lossy(&payload[2..name_end]).into_owned(),
        serial_number: be_u32(0),
        hardware_id: be_u32(4),
        firmware_id: be_u32(8),
        parameter_count: tail[12],
        parameter_version: tail[13],
    })
}

/// Decode a Radio ID frame carrying module timing (extended frame)
///
/// Returns `Ok(None)` for radio id subtypes other than timing.
pub fn decode_radio_timing(payload: &[u8]) -> Result<Option<RadioTiming>> {
    require_len(CRSF_FRAMETYPE_RADIO_ID, payload, 3)?;

    if payload[2] != CRSF_RADIO_ID_SUBTYPE_TIMING {
        return Ok(None);
    }

    require_len(CRSF_FRAMETYPE_RADIO_ID, payload, CRSF_RADIO_TIMING_PAYLOAD_SIZE)?;

    Ok(Some(RadioTiming {
        interval: u32::from_be_bytes([payload[3], payload[4], payload[5], payload[6]]),
        phase: i32::from_be_bytes([payload[7], payload[8], payload[9], payload[10]]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crsf::encoder::{encode_frame, encode_rc_channels_frame};

    fn link_stats_payload() -> Vec<u8> {
        vec![
            100u8, // uplink_rssi_1
            95,    // uplink_rssi_2
            80,    // uplink_lq (80%)
            10,    // uplink_snr
            0,     // active_antenna
            5,     // rf_mode
            3,     // uplink_tx_power (100 mW)
            90,    // downlink_rssi
            85,    // downlink_lq
            12,    // downlink_snr
        ]
    }

    #[test]
    fn test_decode_frame_too_short() {
        assert!(matches!(
            decode_frame(CRSF_SYNC_BYTE, &[0x16]),
            Err(SimLinkError::FrameTooShort(1))
        ));
    }

    #[test]
    fn test_decode_frame_empty_payload() {
        // Type + crc only
        let body = [0x7A, crc8(&[0x7A])];
        let frame = decode_frame(CRSF_SYNC_BYTE, &body).unwrap();
        assert_eq!(frame.frame_type(), 0x7A);
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn test_decode_valid_rc_channels_frame() {
        let channels = [CRSF_CHANNEL_VALUE_CENTER; CRSF_NUM_CHANNELS];
        let wire = encode_rc_channels_frame(&channels);

        let frame = decode_wire_frame(&wire).unwrap();
        assert_eq!(frame.address(), CRSF_SYNC_BYTE);
        assert_eq!(frame.frame_type(), CRSF_FRAMETYPE_RC_CHANNELS_PACKED);
        assert_eq!(frame.payload().len(), 22);
    }

    #[test]
    fn test_decode_frame_crc_error() {
        let channels = [CRSF_CHANNEL_VALUE_CENTER; CRSF_NUM_CHANNELS];
        let mut wire = encode_rc_channels_frame(&channels);
        wire[25] ^= 0xFF;

        match decode_frame(wire[0], &wire[2..]) {
            Err(SimLinkError::Checksum { expected, actual }) => {
                assert_eq!(expected, 0xAD);
                assert_eq!(actual, 0xAD ^ 0xFF);
            }
            other => panic!("Expected Checksum error, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_wire_frame_bad_length() {
        let wire = [CRSF_SYNC_BYTE, 0x01, 0x16, 0x00];
        assert!(matches!(
            decode_wire_frame(&wire),
            Err(SimLinkError::FrameLengthOutOfRange(1))
        ));

        let wire = [CRSF_SYNC_BYTE, 0x3F, 0x16, 0x00];
        assert!(matches!(
            decode_wire_frame(&wire),
            Err(SimLinkError::FrameLengthOutOfRange(0x3F))
        ));
    }

    #[test]
    fn test_decode_wire_frame_truncated() {
        let wire = encode_rc_channels_frame(&[CRSF_CHANNEL_VALUE_CENTER; CRSF_NUM_CHANNELS]);
        assert!(matches!(
            decode_wire_frame(&wire[..20]),
            Err(SimLinkError::FrameTooShort(20))
        ));
    }

    #[test]
    fn test_rc_channels_round_trip() {
        let mut channels = [CRSF_CHANNEL_VALUE_CENTER; CRSF_NUM_CHANNELS];
        channels[0] = 0;
        channels[1] = 2047;
        channels[2] = 992;
        channels[3] = 172;
        channels[4] = 1811;
        channels[15] = 1;

        let wire = encode_rc_channels_frame(&channels);
        let frame = decode_wire_frame(&wire).unwrap();

        match decode_packet(&frame).unwrap() {
            Packet::RcChannels(decoded) => assert_eq!(decoded, channels),
            other => panic!("Expected RcChannels, got: {:?}", other),
        }
    }

    #[test]
    fn test_rc_channels_round_trip_every_bit_position() {
        // Walk a single set bit through every channel to catch cursor drift
        for index in 0..CRSF_NUM_CHANNELS {
            for bit in 0..CRSF_CHANNEL_BITS {
                let mut channels = [0u16; CRSF_NUM_CHANNELS];
                channels[index] = 1 << bit;
                let wire = encode_rc_channels_frame(&channels);
                let decoded = decode_rc_channels(&wire[3..25]).unwrap();
                assert_eq!(decoded, channels, "channel {} bit {}", index, bit);
            }
        }
    }

    #[test]
    fn test_rc_channels_clamped_value_decodes_as_max() {
        let mut channels = [CRSF_CHANNEL_VALUE_CENTER; CRSF_NUM_CHANNELS];
        channels[5] = 5000;

        let wire = encode_rc_channels_frame(&channels);
        let decoded = decode_rc_channels(&wire[3..25]).unwrap();

        assert_eq!(decoded[5], 2047);
        assert_eq!(decoded[4], CRSF_CHANNEL_VALUE_CENTER);
        assert_eq!(decoded[6], CRSF_CHANNEL_VALUE_CENTER);
    }

    #[test]
    fn test_decode_rc_channels_too_short() {
        assert!(matches!(
            decode_rc_channels(&[0u8; 21]),
            Err(SimLinkError::PayloadTooShort { len: 21, expected: 22, .. })
        ));
    }

    #[test]
    fn test_decode_link_statistics() {
        let stats = decode_link_statistics(&link_stats_payload()).unwrap();
        assert_eq!(stats.uplink_rssi_1, 100);
        assert_eq!(stats.uplink_lq, 80);
        assert_eq!(stats.uplink_snr, 10);
        assert_eq!(stats.uplink_tx_power_mw(), Some(100));
        assert_eq!(stats.downlink_rssi, 90);
        assert_eq!(stats.downlink_snr, 12);
    }

    #[test]
    fn test_decode_link_statistics_negative_snr() {
        let mut payload = link_stats_payload();
        payload[3] = 0xF6; // -10 dB
        let stats = decode_link_statistics(&payload).unwrap();
        assert_eq!(stats.uplink_snr, -10);
    }

    #[test]
    fn test_decode_link_statistics_too_short() {
        assert!(decode_link_statistics(&[100u8; 5]).is_err());
    }

    #[test]
    fn test_decode_link_statistics_wire_vector() {
        let wire = [
            0xC8, 0x0C, 0x14, 0x64, 0x5F, 0x50, 0x0A, 0x00, 0x05, 0x03, 0x5A, 0x55, 0x0C, 0x4A,
        ];
        let frame = decode_wire_frame(&wire).unwrap();
        match Packet::try_from(&frame).unwrap() {
            Packet::LinkStatistics(stats) => {
                assert_eq!(stats, decode_link_statistics(&link_stats_payload()).unwrap())
            }
            other => panic!("Expected LinkStatistics, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_battery_sensor() {
        let payload = vec![
            0x00, 0x7E, // Voltage: 126 dV = 12.6V
            0x00, 0x7D, // Current: 125 dA = 12.5A
            0x00, 0x03, 0xE8, // Capacity: 1000 mAh
            0x4B, // Remaining: 75%
        ];

        let battery = decode_battery_sensor(&payload).unwrap();
        assert!((battery.voltage - 12.6).abs() < 0.01);
        assert!((battery.current - 12.5).abs() < 0.01);
        assert_eq!(battery.capacity_used, 1000);
        assert_eq!(battery.remaining_percent, 75);
    }

    #[test]
    fn test_decode_battery_sensor_too_short() {
        assert!(decode_battery_sensor(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_decode_gps() {
        let lat_raw: i32 = 377_749_000; // 37.7749 × 10^7
        let lon_raw: i32 = -1_224_194_000; // -122.4194 × 10^7

        let mut payload = Vec::new();
        payload.extend_from_slice(&lat_raw.to_be_bytes());
        payload.extend_from_slice(&lon_raw.to_be_bytes());
        payload.extend_from_slice(&255u16.to_be_bytes()); // 25.5 km/h
        payload.extend_from_slice(&9000u16.to_be_bytes()); // 90.0°
        payload.extend_from_slice(&1100u16.to_be_bytes()); // 100 m
        payload.push(12);

        let gps = decode_gps(&payload).unwrap();
        assert!((gps.latitude - 37.7749).abs() < 0.0001);
        assert!((gps.longitude - (-122.4194)).abs() < 0.0001);
        assert!((gps.ground_speed - 25.5).abs() < 0.1);
        assert!((gps.heading - 90.0).abs() < 0.1);
        assert_eq!(gps.altitude, 100);
        assert_eq!(gps.satellites, 12);
    }

    #[test]
    fn test_decode_gps_below_sea_level() {
        let mut payload = vec![0u8; 15];
        payload[12..14].copy_from_slice(&900u16.to_be_bytes());
        assert_eq!(decode_gps(&payload).unwrap().altitude, -100);
    }

    #[test]
    fn test_decode_gps_too_short() {
        assert!(decode_gps(&[0u8; 10]).is_err());
    }

    fn device_info_payload(name: &str) -> Vec<u8> {
        let mut payload = vec![CRSF_ADDRESS_RADIO_TRANSMITTER, CRSF_ADDRESS_TRANSMITTER_MODULE];
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(b"ELRS");
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&0x0003_0400u32.to_be_bytes());
        payload.push(21);
        payload.push(0);
        payload
    }

    #[test]
    fn test_decode_device_info() {
        let info = decode_device_info(&device_info_payload("RM Ranger")).unwrap();
        assert_eq!(info.destination, 0xEA);
        assert_eq!(info.origin, 0xEE);
        assert_eq!(info.name, "RM Ranger");
        assert_eq!(info.serial_number, u32::from_be_bytes(*b"ELRS"));
        assert_eq!(info.firmware_id, 0x0003_0400);
        assert_eq!(info.parameter_count, 21);
    }

    #[test]
    fn test_decode_device_info_missing_terminator() {
        let payload = [0xEA, 0xEE, b'A', b'B', b'C', b'D', b'E', b'F', b'G', b'H', b'I', b'J',
            b'K', b'L', b'M', b'N', b'O', b'P'];
        assert!(decode_device_info(&payload).is_err());
    }

    #[test]
    fn test_decode_device_info_truncated_tail() {
        let mut payload = device_info_payload("A long module name");
        payload.truncate(payload.len() - 3);
        assert!(decode_device_info(&payload).is_err());
    }

    #[test]
    fn test_decode_radio_timing() {
        let mut payload = vec![0xEA, 0xEE, CRSF_RADIO_ID_SUBTYPE_TIMING];
        payload.extend_from_slice(&66_660u32.to_be_bytes()); // 6666.0 us (150 Hz)
        payload.extend_from_slice(&(-250i32).to_be_bytes());

        let timing = decode_radio_timing(&payload).unwrap().unwrap();
        assert_eq!(timing.interval, 66_660);
        assert!((timing.interval_us() - 6666.0).abs() < 0.01);
        assert_eq!(timing.phase, -250);
    }

    #[test]
    fn test_decode_radio_id_other_subtype_is_unrecognized() {
        let payload = [0xEA, 0xEE, 0x01, 0x00];
        let wire = encode_frame(0xEA, CRSF_FRAMETYPE_RADIO_ID, &payload).unwrap();
        let frame = decode_wire_frame(&wire).unwrap();

        match decode_packet(&frame).unwrap() {
            Packet::Unrecognized { frame_type, payload } => {
                assert_eq!(frame_type, CRSF_FRAMETYPE_RADIO_ID);
                assert_eq!(payload.as_ref(), &[0xEA, 0xEE, 0x01, 0x00]);
            }
            other => panic!("Expected Unrecognized, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_type_is_not_an_error() {
        let wire = encode_frame(CRSF_SYNC_BYTE, 0x7F, &[1, 2, 3]).unwrap();
        let frame = decode_wire_frame(&wire).unwrap();

        match decode_packet(&frame).unwrap() {
            Packet::Unrecognized { frame_type, payload } => {
                assert_eq!(frame_type, 0x7F);
                assert_eq!(payload.as_ref(), &[1, 2, 3]);
            }
            other => panic!("Expected Unrecognized, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_known_type_short_payload_fails() {
        let wire = encode_frame(CRSF_SYNC_BYTE, CRSF_FRAMETYPE_LINK_STATISTICS, &[1, 2, 3]).unwrap();
        let frame = decode_wire_frame(&wire).unwrap();
        assert!(matches!(
            decode_packet(&frame),
            Err(SimLinkError::PayloadTooShort { frame_type: 0x14, len: 3, expected: 10 })
        ));
    }
}
