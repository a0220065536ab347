//! # Telemetry Module
//!
//! Handles telemetry received from the transmitter module.
//!
//! This module handles:
//! - Keeping the most recent value of every telemetry record
//! - Formatting as JSONL (JSON Lines)
//! - Writing to rotating log files
//! - Retaining only the last N files

pub mod logger;

use crate::crsf::protocol::{
    BatterySensor, DeviceInfo, GpsData, LinkStatistics, Packet, RadioTiming,
};

/// Latest telemetry, published through a `tokio::sync::watch` slot.
///
/// Readers only ever see the newest value; nothing is queued.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySnapshot {
    pub link: Option<LinkStatistics>,
    pub battery: Option<BatterySensor>,
    pub gps: Option<GpsData>,
    pub device: Option<DeviceInfo>,
    pub timing: Option<RadioTiming>,
    /// Telemetry packets applied so far
    pub packets: u64,
}

impl TelemetrySnapshot {
    /// Fold a decoded packet into the snapshot
    ///
    /// # Returns
    ///
    /// `true` if the packet carried telemetry, `false` for RC channel echoes
    /// and unrecognized frames
    pub fn update(&mut self, packet: &Packet) -> bool {
        match packet {
            Packet::LinkStatistics(stats) => self.link = Some(*stats),
            Packet::Battery(battery) => self.battery = Some(*battery),
            Packet::Gps(gps) => self.gps = Some(*gps),
            Packet::DeviceInfo(info) => self.device = Some(info.clone()),
            Packet::RadioTiming(timing) => self.timing = Some(*timing),
            Packet::RcChannels(_) | Packet::Unrecognized { .. } => return false,
        }
        self.packets += 1;
        true
    }

    /// Link considered up when the last report shows any uplink quality
    pub fn link_up(&self) -> bool {
        self.link.map_or(false, |link| link.uplink_lq > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn link(lq: u8) -> LinkStatistics {
        LinkStatistics {
            uplink_rssi_1: 60,
            uplink_rssi_2: 62,
            uplink_lq: lq,
            uplink_snr: 8,
            active_antenna: 0,
            rf_mode: 5,
            uplink_tx_power: 2,
            downlink_rssi: 70,
            downlink_lq: 100,
            downlink_snr: 7,
        }
    }

    #[test]
    fn test_snapshot_starts_empty() {
        let snapshot = TelemetrySnapshot::default();
        assert!(snapshot.link.is_none());
        assert!(!snapshot.link_up());
        assert_eq!(snapshot.packets, 0);
    }

    #[test]
    fn test_snapshot_keeps_latest() {
        let mut snapshot = TelemetrySnapshot::default();
        assert!(snapshot.update(&Packet::LinkStatistics(link(50))));
        assert!(snapshot.update(&Packet::LinkStatistics(link(99))));

        assert_eq!(snapshot.link.map(|l| l.uplink_lq), Some(99));
        assert!(snapshot.link_up());
        assert_eq!(snapshot.packets, 2);
    }

    #[test]
    fn test_snapshot_link_down() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.update(&Packet::LinkStatistics(link(0)));
        assert!(!snapshot.link_up());
    }

    #[test]
    fn test_snapshot_ignores_non_telemetry() {
        let mut snapshot = TelemetrySnapshot::default();
        assert!(!snapshot.update(&Packet::RcChannels([992; 16])));
        assert!(!snapshot.update(&Packet::Unrecognized {
            frame_type: 0x7F,
            payload: Bytes::new(),
        }));
        assert_eq!(snapshot, TelemetrySnapshot::default());
    }

    #[test]
    fn test_snapshot_records_each_kind() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.update(&Packet::Battery(BatterySensor {
            voltage: 7.4,
            current: 3.1,
            capacity_used: 120,
            remaining_percent: 88,
        }));
        snapshot.update(&Packet::RadioTiming(RadioTiming {
            interval: 66_660,
            phase: 0,
        }));

        assert_eq!(snapshot.battery.map(|b| b.remaining_percent), Some(88));
        assert_eq!(snapshot.timing.map(|t| t.interval), Some(66_660));
        assert_eq!(snapshot.packets, 2);
    }
}
