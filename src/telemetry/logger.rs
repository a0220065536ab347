//! # Telemetry Logger
//!
//! Writes decoded telemetry to rotating JSONL files.
//!
//! Each line is one record:
//!
//! ```text
//! {"timestamp":"2024-05-01T12:00:00.123Z","kind":"link_statistics","data":{...}}
//! ```
//!
//! A new file is started after `max_records_per_file` records and only the
//! newest `max_files_to_keep` files are kept. Link statistics arrive many
//! times per second, so they are throttled to one record per
//! `log_interval_ms`; every other record kind is written as it arrives.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::TelemetryConfig;
use crate::crsf::protocol::Packet;
use crate::error::{Result, SimLinkError};

const FILE_PREFIX: &str = "telemetry_";
const FILE_EXTENSION: &str = "jsonl";

#[derive(Serialize)]
struct Record<'a, T: Serialize> {
    timestamp: String,
    kind: &'a str,
    data: &'a T,
}

/// Rotating JSONL telemetry writer
pub struct TelemetryLogger {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    log_interval: Duration,
    writer: Option<BufWriter<File>>,
    current_path: Option<PathBuf>,
    records_in_file: usize,
    file_seq: u64,
    last_link_record: Option<Instant>,
}

impl std::fmt::Debug for TelemetryLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryLogger")
            .field("dir", &self.dir)
            .field("current_path", &self.current_path)
            .field("records_in_file", &self.records_in_file)
            .finish_non_exhaustive()
    }
}

impl TelemetryLogger {
    /// Create the log directory and a logger writing into it
    ///
    /// No file is created until the first record is written.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryLog` if the directory cannot be created
    pub fn new(config: &TelemetryConfig) -> Result<Self> {
        let dir = PathBuf::from(&config.log_dir);
        fs::create_dir_all(&dir).map_err(SimLinkError::TelemetryLog)?;

        info!("Telemetry log directory: {}", dir.display());

        Ok(Self {
            dir,
            max_records_per_file: config.max_records_per_file.max(1),
            max_files_to_keep: config.max_files_to_keep.max(1),
            log_interval: Duration::from_millis(config.log_interval_ms),
            writer: None,
            current_path: None,
            records_in_file: 0,
            file_seq: 0,
            last_link_record: None,
        })
    }

    /// Log a decoded packet
    ///
    /// # Returns
    ///
    /// `true` if a record was written, `false` if the packet was throttled or
    /// carries nothing worth logging
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the file write fails
    pub fn log_packet(&mut self, packet: &Packet) -> Result<bool> {
        match packet {
            Packet::LinkStatistics(stats) => {
                let now = Instant::now();
                if let Some(last) = self.last_link_record {
                    if now.duration_since(last) < self.log_interval {
                        return Ok(false);
                    }
                }
                self.last_link_record = Some(now);
                self.write_record("link_statistics", stats)?;
            }
            Packet::Battery(battery) => self.write_record("battery", battery)?,
            Packet::Gps(gps) => self.write_record("gps", gps)?,
            Packet::DeviceInfo(info) => self.write_record("device_info", info)?,
            Packet::RadioTiming(timing) => self.write_record("radio_timing", timing)?,
            Packet::RcChannels(_) | Packet::Unrecognized { .. } => return Ok(false),
        }
        Ok(true)
    }

    /// Path of the file currently being written
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    /// Flush buffered records to disk
    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().map_err(SimLinkError::TelemetryLog)?;
        }
        Ok(())
    }

    fn write_record<T: Serialize>(&mut self, kind: &str, data: &T) -> Result<()> {
        let record = Record {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            kind,
            data,
        };
        let line = serde_json::to_string(&record)?;

        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{}", line).map_err(SimLinkError::TelemetryLog)?;
            self.records_in_file += 1;
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        self.flush()?;

        let path = self.dir.join(format!(
            "{}{}_{:04}.{}",
            FILE_PREFIX,
            Utc::now().format("%Y%m%dT%H%M%SZ"),
            self.file_seq,
            FILE_EXTENSION
        ));
        self.file_seq += 1;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(SimLinkError::TelemetryLog)?;

        debug!("Telemetry log rotated to {}", path.display());

        self.writer = Some(BufWriter::new(file));
        self.current_path = Some(path);
        self.records_in_file = 0;

        self.prune()
    }

    /// Delete the oldest log files beyond `max_files_to_keep`
    ///
    /// The file being written always counts as one of the kept files.
    fn prune(&self) -> Result<()> {
        let current = self.current_path();
        let mut files: Vec<_> = log_files(&self.dir)?
            .into_iter()
            .filter(|path| Some(path.as_path()) != current)
            .collect();

        let keep = self.max_files_to_keep - 1;
        if files.len() <= keep {
            return Ok(());
        }

        // Names embed a UTC timestamp and sequence number, so name order is age order
        files.sort();
        let excess = files.len() - keep;
        for path in files.into_iter().take(excess) {
            debug!("Removing old telemetry log {}", path.display());
            fs::remove_file(&path).map_err(SimLinkError::TelemetryLog)?;
        }
        Ok(())
    }
}

impl Drop for TelemetryLogger {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Telemetry log files in `dir`
fn log_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(SimLinkError::TelemetryLog)?;

    Ok(entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            let is_log = path.extension().map_or(false, |ext| ext == FILE_EXTENSION);
            let has_prefix = path
                .file_name()
                .map_or(false, |name| name.to_string_lossy().starts_with(FILE_PREFIX));
            is_log && has_prefix
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crsf::protocol::{BatterySensor, LinkStatistics};
    use bytes::Bytes;
    use tempfile::TempDir;

    fn config(dir: &TempDir, max_records: usize, max_files: usize) -> TelemetryConfig {
        TelemetryConfig {
            enabled: true,
            log_dir: dir.path().to_string_lossy().to_string(),
            max_records_per_file: max_records,
            max_files_to_keep: max_files,
            log_interval_ms: 60_000,
            format: "jsonl".to_string(),
        }
    }

    fn battery(percent: u8) -> Packet {
        Packet::Battery(BatterySensor {
            voltage: 12.6,
            current: 1.5,
            capacity_used: 250,
            remaining_percent: percent,
        })
    }

    fn link() -> Packet {
        Packet::LinkStatistics(LinkStatistics {
            uplink_rssi_1: 50,
            uplink_rssi_2: 52,
            uplink_lq: 100,
            uplink_snr: 9,
            active_antenna: 0,
            rf_mode: 5,
            uplink_tx_power: 3,
            downlink_rssi: 48,
            downlink_lq: 100,
            downlink_snr: 10,
        })
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_no_file_until_first_record() {
        let dir = TempDir::new().unwrap();
        let logger = TelemetryLogger::new(&config(&dir, 10, 3)).unwrap();
        assert!(logger.current_path().is_none());
        assert!(log_files(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, 10, 3);
        cfg.log_dir = dir.path().join("nested/logs").to_string_lossy().to_string();

        TelemetryLogger::new(&cfg).unwrap();
        assert!(dir.path().join("nested/logs").is_dir());
    }

    #[test]
    fn test_writes_jsonl_records() {
        let dir = TempDir::new().unwrap();
        let mut logger = TelemetryLogger::new(&config(&dir, 10, 3)).unwrap();

        assert!(logger.log_packet(&battery(80)).unwrap());
        assert!(logger.log_packet(&link()).unwrap());
        logger.flush().unwrap();

        let lines = read_lines(logger.current_path().unwrap());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "battery");
        assert_eq!(lines[0]["data"]["remaining_percent"], 80);
        assert_eq!(lines[1]["kind"], "link_statistics");
        assert_eq!(lines[1]["data"]["uplink_lq"], 100);
        assert!(lines[0]["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_link_statistics_throttled() {
        let dir = TempDir::new().unwrap();
        let mut logger = TelemetryLogger::new(&config(&dir, 10, 3)).unwrap();

        assert!(logger.log_packet(&link()).unwrap());
        assert!(!logger.log_packet(&link()).unwrap());
        // Other kinds are never throttled
        assert!(logger.log_packet(&battery(70)).unwrap());
        assert!(logger.log_packet(&battery(69)).unwrap());
    }

    #[test]
    fn test_non_telemetry_not_logged() {
        let dir = TempDir::new().unwrap();
        let mut logger = TelemetryLogger::new(&config(&dir, 10, 3)).unwrap();

        assert!(!logger.log_packet(&Packet::RcChannels([992; 16])).unwrap());
        assert!(!logger
            .log_packet(&Packet::Unrecognized {
                frame_type: 0x7F,
                payload: Bytes::new(),
            })
            .unwrap());
        assert!(logger.current_path().is_none());
    }

    #[test]
    fn test_rotation_keeps_newest_files() {
        let dir = TempDir::new().unwrap();
        let mut logger = TelemetryLogger::new(&config(&dir, 2, 3)).unwrap();

        // 9 records at 2 per file = 5 files, of which 3 are kept
        for percent in 0..9 {
            logger.log_packet(&battery(percent)).unwrap();
        }
        logger.flush().unwrap();

        let mut files = log_files(dir.path()).unwrap();
        files.sort();
        assert_eq!(files.len(), 3);
        assert_eq!(files.last().map(PathBuf::as_path), logger.current_path());

        // The newest file holds the last record only
        let lines = read_lines(files.last().unwrap());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["data"]["remaining_percent"], 8);

        // The oldest kept file starts at record 4
        let lines = read_lines(&files[0]);
        assert_eq!(lines[0]["data"]["remaining_percent"], 4);
    }

    #[test]
    fn test_prune_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        let mut logger = TelemetryLogger::new(&config(&dir, 1, 1)).unwrap();
        logger.log_packet(&battery(1)).unwrap();
        logger.log_packet(&battery(2)).unwrap();

        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(log_files(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_prune_never_removes_current_file() {
        let dir = TempDir::new().unwrap();
        // Sorts after anything this logger creates
        let stray = dir.path().join("telemetry_99991231T235959Z_0000.jsonl");
        fs::write(&stray, "").unwrap();

        let mut logger = TelemetryLogger::new(&config(&dir, 10, 1)).unwrap();
        logger.log_packet(&battery(50)).unwrap();
        logger.flush().unwrap();

        let current = logger.current_path().unwrap().to_path_buf();
        assert!(current.exists());
        assert!(!stray.exists());
        assert_eq!(read_lines(&current).len(), 1);
    }

    #[test]
    fn test_file_names_use_utc() {
        let dir = TempDir::new().unwrap();
        let mut logger = TelemetryLogger::new(&config(&dir, 10, 3)).unwrap();
        logger.log_packet(&battery(50)).unwrap();

        let name = logger
            .current_path()
            .and_then(Path::file_name)
            .unwrap()
            .to_string_lossy()
            .to_string();
        assert!(name.starts_with(FILE_PREFIX));
        assert!(name.ends_with("Z_0000.jsonl"));
    }
}
