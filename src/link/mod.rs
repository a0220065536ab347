//! # Link Module
//!
//! Runs the two halves of a CRSF link as separate tokio tasks.
//!
//! This module handles:
//! - Fixed-rate RC channel transmission ([`scheduler`])
//! - Telemetry reception and dispatch ([`receiver`])
//! - Stopping both halves together when either one fails
//!
//! The tasks share nothing but the split transport and the latest-telemetry
//! watch slot.

pub mod receiver;
pub mod scheduler;

pub use receiver::TelemetryReceiver;
pub use scheduler::{TransmitScheduler, TransmitStats};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::info;

use crate::crsf::protocol::Packet;
use crate::error::Result;
use crate::input::source::InputSource;

/// Outcome of one link session
#[derive(Debug)]
pub struct SessionEnd<I> {
    /// Input source, handed back for the next session
    pub input: I,
    pub stats: TransmitStats,
    /// Error that ended the session; `Ok` after a shutdown request
    pub result: Result<()>,
}

enum EndedBy {
    Receiver,
    Scheduler,
    Shutdown,
}

/// Run transmitter and receiver until shutdown or until either fails
///
/// Whichever task ends first stops the other before its next tick or read.
/// Both have released their transport half when this returns.
pub async fn run_session<R, W, I, F>(
    receiver: TelemetryReceiver<R>,
    scheduler: TransmitScheduler<W, I>,
    mut shutdown: watch::Receiver<bool>,
    on_packet: F,
) -> SessionEnd<I>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    I: InputSource + 'static,
    F: FnMut(&Packet) + Send + 'static,
{
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut rx_task = tokio::spawn({
        let stop = stop_rx.clone();
        async move {
            let mut receiver = receiver;
            receiver.run(stop, on_packet).await
        }
    });

    let mut tx_task = tokio::spawn(async move {
        let mut scheduler = scheduler;
        let result = scheduler.run(stop_rx).await.map(|_| ());
        let stats = scheduler.stats();
        (result, stats, scheduler.into_input())
    });

    let mut rx_done = None;
    let mut tx_done = None;

    let ended_by = tokio::select! {
        joined = &mut rx_task => {
            rx_done = Some(join(joined));
            EndedBy::Receiver
        }
        joined = &mut tx_task => {
            tx_done = Some(join(joined));
            EndedBy::Scheduler
        }
        _ = wait_for_shutdown(&mut shutdown) => EndedBy::Shutdown,
    };

    let _ = stop_tx.send(true);

    let rx_result = match rx_done {
        Some(result) => result,
        None => join(rx_task.await),
    };
    let (tx_result, stats, input) = match tx_done {
        Some(done) => done,
        None => join(tx_task.await),
    };

    let result = match ended_by {
        EndedBy::Receiver => rx_result.and(tx_result),
        EndedBy::Scheduler => tx_result.and(rx_result),
        EndedBy::Shutdown => Ok(()),
    };

    info!(
        "Link session ended: {} frames sent, {} write errors",
        stats.frames_sent, stats.write_errors
    );

    SessionEnd {
        input,
        stats,
        result,
    }
}

/// Resolves once shutdown is requested or its sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Link tasks are never aborted, so a join error is a panic to pass on
fn join<T>(joined: std::result::Result<T, JoinError>) -> T {
    match joined {
        Ok(value) => value,
        Err(e) => std::panic::resume_unwind(e.into_panic()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrsfConfig;
    use crate::crsf::encoder::encode_rc_channels_frame;
    use crate::crsf::reader::DEFAULT_SYNC_BYTES;
    use crate::error::SimLinkError;
    use crate::input::channel_mapper::ChannelMapper;
    use crate::input::source::NullInput;
    use crate::input::state::InputState;
    use crate::telemetry::TelemetrySnapshot;
    use std::sync::mpsc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    const LINK_STATS_FRAME: [u8; 14] = [
        0xC8, 0x0C, 0x14, 0x64, 0x5F, 0x50, 0x0A, 0x00, 0x05, 0x03, 0x5A, 0x55, 0x0C, 0x4A,
    ];

    struct Harness {
        receiver: TelemetryReceiver<ReadHalf<DuplexStream>>,
        scheduler: TransmitScheduler<WriteHalf<DuplexStream>, NullInput>,
        snapshot: watch::Receiver<TelemetrySnapshot>,
        module: DuplexStream,
    }

    fn harness() -> Harness {
        let (host, module) = tokio::io::duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(host);
        let (telemetry_tx, snapshot) = watch::channel(TelemetrySnapshot::default());

        let config = CrsfConfig {
            packet_rate_hz: 500,
            ..CrsfConfig::default()
        };

        Harness {
            receiver: TelemetryReceiver::new(
                read_half,
                &DEFAULT_SYNC_BYTES,
                Duration::from_millis(20),
                std::sync::Arc::new(telemetry_tx),
            ),
            scheduler: TransmitScheduler::new(
                write_half,
                NullInput,
                ChannelMapper::default(),
                InputState::default(),
                &config,
            ),
            snapshot,
            module,
        }
    }

    #[tokio::test]
    async fn test_session_runs_until_shutdown() {
        let Harness {
            receiver,
            scheduler,
            snapshot,
            mut module,
        } = harness();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (packet_tx, packet_rx) = mpsc::channel();

        let session = tokio::spawn(run_session(receiver, scheduler, shutdown_rx, move |packet| {
            let _ = packet_tx.send(packet.clone());
        }));

        // First frame on the wire is all channels centered
        let mut frame = [0u8; 26];
        module.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, encode_rc_channels_frame(&[992; 16]));

        module.write_all(&LINK_STATS_FRAME).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown_tx.send(true).unwrap();
        let end = session.await.unwrap();

        assert!(end.result.is_ok());
        assert!(end.stats.frames_sent >= 1);
        assert!(matches!(packet_rx.try_recv(), Ok(Packet::LinkStatistics(_))));
        assert!(snapshot.borrow().link_up());
    }

    #[tokio::test]
    async fn test_session_ends_when_module_disconnects() {
        let Harness {
            receiver,
            scheduler,
            module,
            ..
        } = harness();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        drop(module);

        let end = run_session(receiver, scheduler, shutdown_rx, |_| {}).await;
        assert!(matches!(end.result, Err(SimLinkError::TransportClosed)));
    }
}
