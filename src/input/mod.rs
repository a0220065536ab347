//! # Input Module
//!
//! HID wheel, pedal and button input handling.
//!
//! This module handles:
//! - Device detection and reading via evdev
//! - Smoothing raw axis readings
//! - Calibrating raw readings into the CRSF channel range
//! - Mapping inputs to RC channels

pub mod calibration;
pub mod channel_mapper;
pub mod hid;
pub mod source;
pub mod state;
