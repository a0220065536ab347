//! # HID Device Module
//!
//! Reads wheels, pedals and button boxes through the Linux evdev interface.
//!
//! ## Device Detection
//!
//! A device is opened from an explicit `/dev/input/eventN` path when one is
//! configured, otherwise by scanning `/dev/input/event*` for the first device
//! whose vendor and product ids match.
//!
//! ## Event Translation
//!
//! Configuration maps names to evdev codes:
//!
//! ```toml
//! [input.devices.axes]
//! steering = 0   # ABS_X
//!
//! [input.devices.buttons]
//! arm = 288      # BTN_TRIGGER
//! ```
//!
//! `EV_ABS` events with a mapped code become [`InputSample::Axis`], `EV_KEY`
//! events become [`InputSample::Button`]. Everything else is ignored.
//!
//! ## Reconnection
//!
//! When a device read fails its reader reports the device lost, then tries
//! to open it again every `input.reconnect_interval_ms`. Once it succeeds the
//! reader reports it restored, followed by the current position of every
//! mapped axis and button.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use evdev::{AbsoluteAxisType, Device, InputEvent, InputEventKind, Key};
use tracing::{debug, error, info};

use super::source::{ChannelInput, InputSample, SampleMessage};
use crate::config::DeviceConfig;
use crate::error::{Result, SimLinkError};

/// Translates raw evdev events into named samples
#[derive(Debug, Clone, Default)]
pub struct EventTranslator {
    axes: HashMap<u16, String>,
    buttons: HashMap<u16, String>,
}

impl EventTranslator {
    /// Builds the code → name lookup from name → code tables
    pub fn new(axes: &HashMap<String, u16>, buttons: &HashMap<String, u16>) -> Self {
        let invert = |table: &HashMap<String, u16>| {
            table
                .iter()
                .map(|(name, &code)| (code, name.clone()))
                .collect::<HashMap<_, _>>()
        };

        Self {
            axes: invert(axes),
            buttons: invert(buttons),
        }
    }

    /// Named sample for a mapped event, `None` for anything else
    pub fn translate(&self, event: &InputEvent) -> Option<InputSample> {
        match event.kind() {
            InputEventKind::AbsAxis(axis) => self
                .axes
                .get(&axis.0)
                .map(|name| InputSample::axis(name.clone(), event.value())),
            InputEventKind::Key(key) => self
                .buttons
                .get(&key.code())
                .map(|name| InputSample::button(name.clone(), event.value() != 0)),
            _ => None,
        }
    }

    /// Samples for every mapped axis and button the device reports a state
    /// for, ordered by name
    pub fn state_samples<A, B>(&self, axis_value: A, button_pressed: B) -> Vec<InputSample>
    where
        A: Fn(u16) -> Option<i32>,
        B: Fn(u16) -> Option<bool>,
    {
        let mut samples: Vec<_> = self
            .axes
            .iter()
            .filter_map(|(&code, name)| axis_value(code).map(|v| InputSample::axis(name.clone(), v)))
            .chain(self.buttons.iter().filter_map(|(&code, name)| {
                button_pressed(code).map(|pressed| InputSample::button(name.clone(), pressed))
            }))
            .collect();

        samples.sort_by(|a, b| sample_name(a).cmp(sample_name(b)));
        samples
    }
}

fn sample_name(sample: &InputSample) -> &str {
    match sample {
        InputSample::Axis { name, .. } | InputSample::Button { name, .. } => name,
    }
}

/// An opened evdev device with its event translation
pub struct HidDevice {
    device: Device,
    device_path: PathBuf,
    label: String,
    translator: EventTranslator,
    config: DeviceConfig,
}

impl HidDevice {
    /// Open the device described by `config`
    ///
    /// # Errors
    ///
    /// - `InputDeviceNotFound`: no device matched vendor/product
    /// - `Input`: the configured path could not be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use simlink::config::Config;
    /// use simlink::input::hid::HidDevice;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// let device = HidDevice::open(&config.input.devices[0])?;
    /// println!("Reading {}", device.device_path().display());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(config: &DeviceConfig) -> Result<Self> {
        let (device, device_path) = match &config.path {
            Some(path) => {
                let device = Device::open(path)
                    .map_err(|e| input_error(&format!("Failed to open {}", path), e))?;
                (device, PathBuf::from(path))
            }
            None => find_device(config.vendor_id, config.product_id)?,
        };

        let label = if config.name.is_empty() {
            device.name().unwrap_or("input device").to_string()
        } else {
            config.name.clone()
        };

        info!("Opened {} at {}", label, device_path.display());

        Ok(Self {
            device,
            device_path,
            label,
            translator: EventTranslator::new(&config.axes, &config.buttons),
            config: config.clone(),
        })
    }

    /// Path of the `/dev/input/eventN` node in use
    pub fn device_path(&self) -> &Path {
        &self.device_path
    }

    /// Block until events arrive, then append the mapped samples to `out`
    ///
    /// # Errors
    ///
    /// Returns `Input` if the device was disconnected
    pub fn fetch_samples(&mut self, out: &mut Vec<InputSample>) -> Result<()> {
        let translator = &self.translator;
        let events = self
            .device
            .fetch_events()
            .map_err(|e| input_error(&self.label, e))?;

        out.extend(events.filter_map(|event| translator.translate(&event)));
        Ok(())
    }

    /// Append the current position of every mapped axis and button
    ///
    /// # Errors
    ///
    /// Returns `Input` if the state could not be queried
    pub fn current_samples(&self, out: &mut Vec<InputSample>) -> Result<()> {
        let query_failed = |e| input_error(&self.label, e);
        let abs = self.device.get_abs_state().map_err(query_failed)?;
        let keys = self.device.get_key_state().map_err(query_failed)?;

        let supported_axes = self.device.supported_absolute_axes();
        let supported_keys = self.device.supported_keys();

        out.extend(self.translator.state_samples(
            |code| {
                supported_axes
                    .filter(|axes| axes.contains(AbsoluteAxisType(code)))
                    .and_then(|_| abs.get(usize::from(code)))
                    .map(|info| info.value)
            },
            |code| {
                supported_keys
                    .filter(|supported| supported.contains(Key::new(code)))
                    .map(|_| keys.contains(Key::new(code)))
            },
        ));
        Ok(())
    }

    /// Move the device onto its own reader thread
    ///
    /// The thread forwards samples until the receiving side is dropped. A
    /// failed read is reported as [`SampleMessage::Lost`] and the device is
    /// reopened every `retry_interval` until that succeeds.
    ///
    /// # Arguments
    ///
    /// * `id` - Identifies this reader in lost/restored reports
    /// * `tx` - Sample channel
    /// * `retry_interval` - Delay between reopen attempts
    pub fn spawn(
        self,
        id: usize,
        tx: Sender<SampleMessage>,
        retry_interval: Duration,
    ) -> Result<JoinHandle<()>> {
        let name = format!("hid-{}", self.label);

        thread::Builder::new()
            .name(name)
            .spawn(move || read_loop(self, id, tx, retry_interval))
            .map_err(|e| input_error("Failed to start input reader", e))
    }
}

fn read_loop(mut device: HidDevice, id: usize, tx: Sender<SampleMessage>, retry_interval: Duration) {
    let mut samples = Vec::new();
    if let Err(e) = device.current_samples(&mut samples) {
        debug!("No initial state: {}", e);
    }

    loop {
        if !forward(&tx, &mut samples) {
            break;
        }

        if let Err(e) = device.fetch_samples(&mut samples) {
            error!(
                "Input device lost: {}; reopening every {} ms",
                e,
                retry_interval.as_millis()
            );
            let lost = SampleMessage::Lost {
                device: id,
                reason: e.to_string(),
            };
            if tx.send(lost).is_err() {
                break;
            }

            device = reopen(&device.config, retry_interval);
            if tx.send(SampleMessage::Restored { device: id }).is_err() {
                break;
            }

            samples.clear();
            if let Err(e) = device.current_samples(&mut samples) {
                debug!("No state after reconnect: {}", e);
            }
        }
    }

    debug!("{} reader stopping", device.label);
}

/// Device-side I/O failures are input errors, never transport errors
fn input_error(context: &str, e: std::io::Error) -> SimLinkError {
    SimLinkError::Input(format!("{}: {}", context, e))
}

/// Send and clear `samples`; `false` once the receiving side is gone
fn forward(tx: &Sender<SampleMessage>, samples: &mut Vec<InputSample>) -> bool {
    samples
        .drain(..)
        .all(|sample| tx.send(SampleMessage::Sample(sample)).is_ok())
}

fn reopen(config: &DeviceConfig, retry_interval: Duration) -> HidDevice {
    loop {
        thread::sleep(retry_interval);
        match HidDevice::open(config) {
            Ok(device) => return device,
            Err(e) => debug!("Reopen failed: {}", e),
        }
    }
}

/// Open every configured device and start its reader thread
///
/// # Arguments
///
/// * `devices` - Device configurations; a device's index is its reader id
/// * `retry_interval` - Delay between attempts to reopen a lost device
///
/// # Returns
///
/// The combined [`ChannelInput`] and the reader thread handles
///
/// # Errors
///
/// Fails if any configured device cannot be opened at startup
pub fn open_all(
    devices: &[DeviceConfig],
    retry_interval: Duration,
) -> Result<(ChannelInput, Vec<JoinHandle<()>>)> {
    let (tx, rx) = mpsc::channel();
    let mut handles = Vec::with_capacity(devices.len());

    for (id, config) in devices.iter().enumerate() {
        let device = HidDevice::open(config)?;
        handles.push(device.spawn(id, tx.clone(), retry_interval)?);
    }

    Ok((ChannelInput::new(rx), handles))
}

/// Scan `/dev/input/event*` for a vendor/product match
fn find_device(vendor_id: u16, product_id: u16) -> Result<(Device, PathBuf)> {
    let input_dir = Path::new("/dev/input");

    let mut entries: Vec<_> = std::fs::read_dir(input_dir)
        .map_err(|e| input_error("Failed to read /dev/input", e))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().starts_with("event"))
                .unwrap_or(false)
        })
        .collect();

    // Deterministic choice when several identical devices are plugged in
    entries.sort();

    for path in entries {
        match Device::open(&path) {
            Ok(device) => {
                let id = device.input_id();
                debug!(
                    "Found input device: {} (vendor: 0x{:04x}, product: 0x{:04x})",
                    path.display(),
                    id.vendor(),
                    id.product()
                );

                if id.vendor() == vendor_id && id.product() == product_id {
                    return Ok((device, path));
                }
            }
            Err(e) => {
                // Permission denied or other errors - skip device
                debug!("Could not open {}: {}", path.display(), e);
            }
        }
    }

    Err(SimLinkError::InputDeviceNotFound {
        vendor_id,
        product_id,
    })
}
