//! # Telemetry Receiver
//!
//! Reads the transport, feeds the [`FrameReader`] and dispatches decoded
//! packets to a callback and the latest-telemetry slot.
//!
//! Every read is bounded by the configured timeout so the task notices a
//! shutdown even on a silent link. End of stream or a read error ends the
//! task and is returned to the caller, which decides whether to reconnect.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::crsf::decoder::decode_packet;
use crate::crsf::protocol::Packet;
use crate::crsf::reader::{FrameReader, ReaderStats};
use crate::error::{Result, SimLinkError};
use crate::telemetry::TelemetrySnapshot;

const READ_BUFFER_SIZE: usize = 256;

/// Receive side of the link
pub struct TelemetryReceiver<R> {
    reader: R,
    frames: FrameReader,
    read_timeout: Duration,
    telemetry: Arc<watch::Sender<TelemetrySnapshot>>,
    packets: u64,
    decode_errors: u64,
}

impl<R> std::fmt::Debug for TelemetryReceiver<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryReceiver")
            .field("read_timeout", &self.read_timeout)
            .field("packets", &self.packets)
            .finish_non_exhaustive()
    }
}

impl<R: AsyncRead + Unpin> TelemetryReceiver<R> {
    /// Create a receiver over the transport read half
    ///
    /// # Arguments
    ///
    /// * `reader` - Transport read half
    /// * `sync_bytes` - Bytes accepted as the start of a frame
    /// * `read_timeout` - Upper bound on a single read
    /// * `telemetry` - Slot updated with every telemetry packet; shared so it
    ///   outlives reconnects
    pub fn new(
        reader: R,
        sync_bytes: &[u8],
        read_timeout: Duration,
        telemetry: Arc<watch::Sender<TelemetrySnapshot>>,
    ) -> Self {
        Self {
            reader,
            frames: FrameReader::new(sync_bytes),
            read_timeout,
            telemetry,
            packets: 0,
            decode_errors: 0,
        }
    }

    /// Receive until shutdown or transport failure
    ///
    /// `on_packet` is called for every decoded packet in arrival order,
    /// including unrecognized frame types.
    ///
    /// # Errors
    ///
    /// Returns `TransportClosed` at end of stream and `Transport` on a read
    /// error. Partial frame data is discarded either way.
    pub async fn run<F>(&mut self, mut shutdown: watch::Receiver<bool>, mut on_packet: F) -> Result<()>
    where
        F: FnMut(&Packet),
    {
        let mut buf = [0u8; READ_BUFFER_SIZE];

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            let read = tokio::select! {
                read = timeout(self.read_timeout, self.reader.read(&mut buf)) => read,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                    continue;
                }
            };

            match read {
                Err(_elapsed) => continue,
                Ok(Ok(0)) => break Err(SimLinkError::TransportClosed),
                Ok(Ok(n)) => self.process(&buf[..n], &mut on_packet),
                Ok(Err(e)) => break Err(e.into()),
            }
        };

        self.frames.reset();

        let stats = self.frames.stats();
        info!(
            "Receiver stopped: {} frames, {} checksum errors, {} false syncs, {} undecodable",
            stats.frames, stats.checksum_errors, stats.false_syncs, self.decode_errors
        );

        result
    }

    /// Decoded packets so far
    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn reader_stats(&self) -> ReaderStats {
        self.frames.stats()
    }

    fn process<F>(&mut self, data: &[u8], on_packet: &mut F)
    where
        F: FnMut(&Packet),
    {
        let telemetry = &self.telemetry;
        let packets = &mut self.packets;
        let decode_errors = &mut self.decode_errors;

        self.frames.push(data, |frame| match decode_packet(&frame) {
            Ok(packet) => {
                *packets += 1;
                telemetry.send_if_modified(|snapshot| snapshot.update(&packet));
                on_packet(&packet);
            }
            Err(e) => {
                *decode_errors += 1;
                debug!("Dropping frame type 0x{:02X}: {}", frame.frame_type(), e);
            }
        });
    }
}
