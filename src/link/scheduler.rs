//! # Transmit Scheduler
//!
//! Sends an RC channels frame at a fixed rate.
//!
//! Each tick drains pending input samples, maps them to a channel set,
//! encodes it and writes it to the transport. Input is read synchronously
//! inside the tick, so no other task ever holds channel values.
//!
//! Late ticks are skipped rather than queued: a burst of stale frames is worse
//! than a missing one. A failed write is logged and the next tick goes ahead;
//! only a run of `max_consecutive_write_errors` failures ends the scheduler.
//! A write that has not completed within [`WRITE_TIMEOUT_PERIODS`] tick
//! periods counts as failed, so a stalled transport cannot hold the task.

use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::CrsfConfig;
use crate::crsf::encoder::{encode_rc_channels_frame, out_of_range_channels};
use crate::crsf::protocol::RcChannels;
use crate::error::Result;
use crate::input::channel_mapper::ChannelMapper;
use crate::input::source::{InputSample, InputSource};
use crate::input::state::InputState;

/// Number of frames between status log messages
pub const LOG_INTERVAL_PACKETS: u64 = 1000;

/// A frame write may take this many tick periods before it is abandoned
pub const WRITE_TIMEOUT_PERIODS: u32 = 5;

/// Counters for one scheduler run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransmitStats {
    pub frames_sent: u64,
    pub write_errors: u64,
    /// Ticks that sent neutral channels because input was unavailable
    pub failsafe_ticks: u64,
}

/// Fixed-rate RC channels transmitter
pub struct TransmitScheduler<W, I> {
    writer: W,
    input: I,
    mapper: ChannelMapper,
    state: InputState,
    period: Duration,
    max_consecutive_write_errors: u32,
    consecutive_write_errors: u32,
    samples: Vec<InputSample>,
    clamp_warned: bool,
    input_failed: bool,
    stats: TransmitStats,
}

impl<W, I> std::fmt::Debug for TransmitScheduler<W, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransmitScheduler")
            .field("period", &self.period)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<W, I> TransmitScheduler<W, I>
where
    W: AsyncWrite + Unpin,
    I: InputSource,
{
    /// Create a scheduler that owns the transport write half
    ///
    /// # Arguments
    ///
    /// * `writer` - Transport write half
    /// * `input` - Source of raw input samples
    /// * `mapper` - Channel bindings
    /// * `state` - Smoothing state for raw samples
    /// * `config` - Packet rate and write error limit
    pub fn new(
        writer: W,
        input: I,
        mapper: ChannelMapper,
        state: InputState,
        config: &CrsfConfig,
    ) -> Self {
        let rate = u64::from(config.packet_rate_hz.max(1));

        Self {
            writer,
            input,
            mapper,
            state,
            period: Duration::from_micros(1_000_000 / rate),
            max_consecutive_write_errors: config.max_consecutive_write_errors.max(1),
            consecutive_write_errors: 0,
            samples: Vec::new(),
            clamp_warned: false,
            input_failed: false,
            stats: TransmitStats::default(),
        }
    }

    /// Tick period derived from the packet rate
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn stats(&self) -> TransmitStats {
        self.stats
    }

    fn write_timeout(&self) -> Duration {
        self.period * WRITE_TIMEOUT_PERIODS
    }

    /// Run one transmit tick
    ///
    /// # Errors
    ///
    /// Returns `Transport` once `max_consecutive_write_errors` writes in a row
    /// have failed; earlier failures are logged and swallowed
    pub async fn tick_once(&mut self) -> Result<()> {
        let channels = self.sample_channels();

        if let Err(e) = out_of_range_channels(&channels) {
            if !self.clamp_warned {
                warn!("Clamping channel values to 2047: {}", e);
                self.clamp_warned = true;
            }
        }

        let frame = encode_rc_channels_frame(&channels);

        // An abandoned write may leave a partial frame on the wire; the
        // module's parser resyncs on the next sync byte
        let written = match timeout(self.write_timeout(), write_frame(&mut self.writer, &frame)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "frame write timed out",
            )),
        };

        match written {
            Ok(()) => {
                self.consecutive_write_errors = 0;
                self.stats.frames_sent += 1;

                if self.stats.frames_sent % LOG_INTERVAL_PACKETS == 0 {
                    info!(
                        "Sent {} frames ({} write errors, {} failsafe ticks)",
                        self.stats.frames_sent, self.stats.write_errors, self.stats.failsafe_ticks
                    );
                }
                Ok(())
            }
            Err(e) => {
                self.stats.write_errors += 1;
                self.consecutive_write_errors += 1;

                if self.consecutive_write_errors >= self.max_consecutive_write_errors {
                    error!(
                        "{} consecutive write failures, giving up: {}",
                        self.consecutive_write_errors, e
                    );
                    return Err(e.into());
                }

                debug!("Failed to send frame: {}", e);
                Ok(())
            }
        }
    }

    /// Transmit until `shutdown` turns true
    ///
    /// Returns before the next tick once shutdown is signalled or the
    /// shutdown sender is dropped.
    ///
    /// # Errors
    ///
    /// Returns the transport error that ended the run
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<TransmitStats> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Starting CRSF transmission every {} us",
            self.period.as_micros()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => self.tick_once().await?,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Transmit scheduler stopped after {} frames", self.stats.frames_sent);
        Ok(self.stats)
    }

    /// Release the transport and hand back the input source
    pub fn into_input(self) -> I {
        self.input
    }

    /// Current channel set, or neutral channels while input is unavailable
    fn sample_channels(&mut self) -> RcChannels {
        self.samples.clear();

        match self.input.drain(&mut self.samples) {
            Ok(()) => {
                if self.input_failed {
                    info!("Input restored");
                    self.input_failed = false;
                }
                self.state.apply_all(&self.samples);
                self.mapper.map_to_channels(&self.state)
            }
            Err(e) => {
                if !self.input_failed {
                    warn!("Input unavailable, sending neutral channels: {}", e);
                    self.input_failed = true;
                }
                // Devices still connected keep their state current
                self.state.apply_all(&self.samples);
                self.stats.failsafe_ticks += 1;
                self.mapper.neutral_channels()
            }
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}
