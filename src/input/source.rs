//! # Input Source
//!
//! The seam between HID readers and the transmit path.
//!
//! HID devices are read on their own OS threads (evdev reads block). Each
//! thread forwards named samples over an `std::sync::mpsc` channel, and the
//! transmit scheduler drains that channel synchronously inside its tick.
//! Readers also report when their device is lost and when it comes back.

use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, TryRecvError};

use crate::error::{Result, SimLinkError};

/// One raw reading from an input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSample {
    /// Absolute axis position in device units
    Axis { name: String, value: i32 },
    /// Button state change
    Button { name: String, pressed: bool },
}

impl InputSample {
    pub fn axis(name: impl Into<String>, value: i32) -> Self {
        InputSample::Axis {
            name: name.into(),
            value,
        }
    }

    pub fn button(name: impl Into<String>, pressed: bool) -> Self {
        InputSample::Button {
            name: name.into(),
            pressed,
        }
    }
}

/// Anything that can hand the scheduler its pending samples
#[cfg_attr(test, mockall::automock)]
pub trait InputSource: Send {
    /// Move every pending sample into `out` without blocking
    ///
    /// # Errors
    ///
    /// Returns error once the underlying device is gone; the caller should
    /// command neutral channel values while this persists
    fn drain(&mut self, out: &mut Vec<InputSample>) -> Result<()>;
}

impl<S: InputSource + ?Sized> InputSource for Box<S> {
    fn drain(&mut self, out: &mut Vec<InputSample>) -> Result<()> {
        (**self).drain(out)
    }
}

/// [`InputSource`] with no devices behind it; never yields a sample
#[derive(Debug, Clone, Copy, Default)]
pub struct NullInput;

impl InputSource for NullInput {
    fn drain(&mut self, _out: &mut Vec<InputSample>) -> Result<()> {
        Ok(())
    }
}

/// Item sent by HID reader threads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleMessage {
    Sample(InputSample),
    /// Reader `device` stopped delivering events and is trying to reopen it
    Lost { device: usize, reason: String },
    /// Reader `device` has its device open again
    Restored { device: usize },
}

/// [`InputSource`] backed by the HID reader threads' channel.
///
/// Drains fail while any reader has reported its device lost, and succeed
/// again once that reader reports it restored. Samples from the remaining
/// devices are still delivered meanwhile. A closed channel is permanent.
pub struct ChannelInput {
    rx: Receiver<SampleMessage>,
    lost: BTreeMap<usize, String>,
    closed: bool,
}

impl ChannelInput {
    pub fn new(rx: Receiver<SampleMessage>) -> Self {
        Self {
            rx,
            lost: BTreeMap::new(),
            closed: false,
        }
    }
}

impl InputSource for ChannelInput {
    fn drain(&mut self, out: &mut Vec<InputSample>) -> Result<()> {
        while !self.closed {
            match self.rx.try_recv() {
                Ok(SampleMessage::Sample(sample)) => out.push(sample),
                Ok(SampleMessage::Lost { device, reason }) => {
                    self.lost.insert(device, reason);
                }
                Ok(SampleMessage::Restored { device }) => {
                    self.lost.remove(&device);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.closed = true,
            }
        }

        if self.closed {
            return Err(SimLinkError::Input("all input readers stopped".to_string()));
        }

        match self.lost.values().next() {
            Some(reason) => Err(SimLinkError::Input(reason.clone())),
            None => Ok(()),
        }
    }
}
