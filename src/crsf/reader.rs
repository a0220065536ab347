//! # CRSF Frame Reader
//!
//! Incremental, resynchronizing frame parser for the receive direction.
//!
//! Bytes arrive in arbitrary chunks. The reader keeps partial frames across
//! calls and hunts for the next accepted sync byte whenever a candidate frame
//! turns out to be bogus.
//!
//! ## States
//!
//! ```text
//! Seeking ──sync byte──> ReadingLength ──len in 2..=62──> Accumulating { len }
//!    ^                        │                                │
//!    └──── drop sync byte ────┘ (bad len)     CRC ok: emit ────┤
//!    └──────────────────── drop sync byte (CRC mismatch) ──────┘
//! ```
//!
//! On any failure only the sync byte is dropped, so a real frame hiding
//! inside a false candidate is still found.

use bytes::{Buf, BytesMut};
use tracing::debug;

use super::decoder::decode_frame;
use super::protocol::{
    CrsfFrame, CRSF_ADDRESS_RADIO_TRANSMITTER, CRSF_ADDRESS_RECEIVER,
    CRSF_ADDRESS_TRANSMITTER_MODULE, CRSF_FRAME_LENGTH_MAX, CRSF_FRAME_LENGTH_MIN,
    CRSF_MAX_FRAME_SIZE, CRSF_SYNC_BYTE,
};
use crate::error::SimLinkError;

/// Sync/address bytes a frame may start with
pub const DEFAULT_SYNC_BYTES: [u8; 4] = [
    CRSF_SYNC_BYTE,
    CRSF_ADDRESS_RADIO_TRANSMITTER,
    CRSF_ADDRESS_RECEIVER,
    CRSF_ADDRESS_TRANSMITTER_MODULE,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Seeking,
    ReadingLength,
    Accumulating { len: usize },
}

/// Counters kept by the reader for diagnostics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReaderStats {
    /// Frames that passed validation
    pub frames: u64,
    /// Candidates rejected by CRC
    pub checksum_errors: u64,
    /// Sync bytes followed by an impossible length
    pub false_syncs: u64,
    /// Bytes skipped while seeking a sync byte
    pub discarded_bytes: u64,
}

/// Receive-side frame parser
#[derive(Debug)]
pub struct FrameReader {
    buffer: BytesMut,
    state: ReaderState,
    sync_bytes: Vec<u8>,
    stats: ReaderStats,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(&DEFAULT_SYNC_BYTES)
    }
}

impl FrameReader {
    /// Create a reader accepting the given sync/address bytes
    ///
    /// An empty set falls back to [`DEFAULT_SYNC_BYTES`].
    pub fn new(sync_bytes: &[u8]) -> Self {
        let sync_bytes = if sync_bytes.is_empty() {
            DEFAULT_SYNC_BYTES.to_vec()
        } else {
            sync_bytes.to_vec()
        };

        Self {
            buffer: BytesMut::with_capacity(CRSF_MAX_FRAME_SIZE * 2),
            state: ReaderState::Seeking,
            sync_bytes,
            stats: ReaderStats::default(),
        }
    }

    /// Feed received bytes, calling `on_frame` for every validated frame
    ///
    /// Frames are emitted in arrival order. Incomplete trailing data is kept
    /// for the next call.
    ///
    /// # Returns
    ///
    /// * `usize` - Number of frames emitted by this call
    pub fn push<F>(&mut self, data: &[u8], mut on_frame: F) -> usize
    where
        F: FnMut(CrsfFrame),
    {
        self.buffer.extend_from_slice(data);
        let mut emitted = 0;

        loop {
            match self.state {
                ReaderState::Seeking => {
                    match self.buffer.iter().position(|b| self.sync_bytes.contains(b)) {
                        Some(pos) => {
                            self.skip(pos);
                            self.state = ReaderState::ReadingLength;
                        }
                        None => {
                            let len = self.buffer.len();
                            self.skip(len);
                            break;
                        }
                    }
                }
                ReaderState::ReadingLength => {
                    if self.buffer.len() < 2 {
                        break;
                    }

                    let len = self.buffer[1];
                    if (CRSF_FRAME_LENGTH_MIN..=CRSF_FRAME_LENGTH_MAX).contains(&len) {
                        self.state = ReaderState::Accumulating { len: len as usize };
                    } else {
                        debug!("False sync 0x{:02X}: length {} out of range", self.buffer[0], len);
                        self.stats.false_syncs += 1;
                        self.drop_sync_byte();
                    }
                }
                ReaderState::Accumulating { len } => {
                    if self.buffer.len() < 2 + len {
                        break;
                    }

                    match decode_frame(self.buffer[0], &self.buffer[2..2 + len]) {
                        Ok(frame) => {
                            self.buffer.advance(2 + len);
                            self.state = ReaderState::Seeking;
                            self.stats.frames += 1;
                            emitted += 1;
                            on_frame(frame);
                        }
                        Err(SimLinkError::Checksum { expected, actual }) => {
                            debug!(
                                "Dropping candidate frame: CRC 0x{:02X} != 0x{:02X}",
                                actual, expected
                            );
                            self.stats.checksum_errors += 1;
                            self.drop_sync_byte();
                        }
                        Err(e) => {
                            debug!("Dropping candidate frame: {}", e);
                            self.stats.false_syncs += 1;
                            self.drop_sync_byte();
                        }
                    }
                }
            }
        }

        emitted
    }

    /// Discard any partial frame and return to seeking
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = ReaderState::Seeking;
    }

    /// Diagnostic counters since creation
    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Bytes currently held for an incomplete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn skip(&mut self, count: usize) {
        self.buffer.advance(count);
        self.stats.discarded_bytes += count as u64;
    }

    fn drop_sync_byte(&mut self) {
        self.skip(1);
        self.state = ReaderState::Seeking;
    }
}
