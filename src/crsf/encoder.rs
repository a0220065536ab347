//! # CRSF Packet Encoder
//!
//! Encodes RC channels and outbound control frames into CRSF wire bytes.

use super::crc::crc8;
use super::protocol::*;
use crate::error::{Result, SimLinkError};

/// Encode RC channels into a complete CRSF frame
///
/// Channel values above 2047 are clamped to 2047 before packing. Clamping is
/// the documented policy: a corrupt frame is never transmitted, and the
/// caller may use [`out_of_range_channels`] to report it.
///
/// # Arguments
///
/// * `channels` - Array of 16 channel values (11-bit: 0-2047)
///
/// # Returns
///
/// * `[u8; 26]` - sync + length + type + 22-byte payload + crc
///
/// # Examples
///
/// ```
/// use simlink::crsf::encoder::encode_rc_channels_frame;
///
/// let channels = [992u16; 16]; // All channels at center
/// let frame = encode_rc_channels_frame(&channels);
/// assert_eq!(frame[0], 0xC8);
/// assert_eq!(frame[25], 0xAD);
/// ```
#[must_use]
pub fn encode_rc_channels_frame(channels: &RcChannels) -> [u8; CRSF_RC_CHANNELS_FRAME_SIZE] {
    let mut frame = [0u8; CRSF_RC_CHANNELS_FRAME_SIZE];
    frame[0] = CRSF_SYNC_BYTE;
    frame[1] = CRSF_RC_CHANNELS_FRAME_LENGTH;
    frame[2] = CRSF_FRAMETYPE_RC_CHANNELS_PACKED;
    frame[3..3 + CRSF_RC_CHANNELS_PAYLOAD_SIZE]
        .copy_from_slice(&encode_rc_channels_payload(channels));

    // CRC over Type + Payload
    frame[CRSF_RC_CHANNELS_FRAME_SIZE - 1] = crc8(&frame[2..CRSF_RC_CHANNELS_FRAME_SIZE - 1]);

    frame
}

/// Encode RC channels into payload (22 bytes)
///
/// Packs 16 channels (11 bits each) as one continuous little-endian
/// bitstream with no padding between channels.
///
/// # Algorithm
///
/// ```text
/// Byte 0: Ch1[0:7]
/// Byte 1: Ch1[8:10] | Ch2[0:4]
/// Byte 2: Ch2[5:10] | Ch3[0:1]
/// ...
/// ```
///
/// Bits accumulate in a 32-bit register; whole bytes are flushed as soon as
/// eight or more are pending. 176 bits divide evenly into 22 bytes, so the
/// register is empty when the loop ends.
#[must_use]
pub fn encode_rc_channels_payload(channels: &RcChannels) -> [u8; CRSF_RC_CHANNELS_PAYLOAD_SIZE] {
    let mut payload = [0u8; CRSF_RC_CHANNELS_PAYLOAD_SIZE];
    let mut acc: u32 = 0;
    let mut pending_bits = 0;
    let mut byte_index = 0;

    for &channel in channels.iter() {
        acc |= u32::from(clamp_channel_value(channel)) << pending_bits;
        pending_bits += CRSF_CHANNEL_BITS;

        while pending_bits >= 8 {
            payload[byte_index] = acc as u8;
            acc >>= 8;
            pending_bits -= 8;
            byte_index += 1;
        }
    }

    payload
}

/// Clamp a channel value to the 11-bit wire range (0-2047)
#[must_use]
pub fn clamp_channel_value(value: u16) -> u16 {
    value.min(CRSF_CHANNEL_VALUE_MAX)
}

/// Report channels that will be clamped by the encoder
///
/// Returns the first offending channel as an error so callers can log it.
///
/// # Errors
///
/// Returns `InvalidChannelValue` for the first value above 2047
pub fn out_of_range_channels(channels: &RcChannels) -> Result<()> {
    match channels
        .iter()
        .enumerate()
        .find(|(_, &value)| value > CRSF_CHANNEL_VALUE_MAX)
    {
        Some((index, &value)) => Err(SimLinkError::InvalidChannelValue { index, value }),
        None => Ok(()),
    }
}

/// Encode an arbitrary frame
///
/// # Arguments
///
/// * `address` - Sync or destination address byte
/// * `frame_type` - Frame type byte
/// * `payload` - Payload bytes (max 60)
///
/// # Errors
///
/// Returns `PayloadTooLarge` if the payload does not fit in one frame
pub fn encode_frame(address: u8, frame_type: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > CRSF_MAX_PAYLOAD_SIZE {
        return Err(SimLinkError::PayloadTooLarge {
            size: payload.len(),
            max: CRSF_MAX_PAYLOAD_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.push(address);
    frame.push((payload.len() + 2) as u8);
    frame.push(frame_type);
    frame.extend_from_slice(payload);
    frame.push(crc8(&frame[2..]));

    Ok(frame)
}

/// Encode a broadcast device ping
///
/// Devices on the link answer with a device info frame.
///
/// # Arguments
///
/// * `origin` - Address of the sender (normally the radio transmitter, 0xEA)
#[must_use]
pub fn encode_device_ping(origin: u8) -> [u8; 6] {
    let mut frame = [
        CRSF_SYNC_BYTE,
        4,
        CRSF_FRAMETYPE_DEVICE_PING,
        CRSF_ADDRESS_BROADCAST,
        origin,
        0,
    ];
    frame[5] = crc8(&frame[2..5]);
    frame
}
