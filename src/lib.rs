//! # SimLink Library
//!
//! Drive an RC vehicle from a sim-racing wheel and pedals via CRSF.
//!
//! This library provides the core functionality for bridging HID wheel,
//! pedal and button input to the CRSF (Crossfire) protocol spoken by
//! ExpressLRS transmitter modules, and for decoding the telemetry the module
//! sends back.

pub mod config;
pub mod crsf;
pub mod error;
pub mod input;
pub mod link;
pub mod serial;
pub mod telemetry;
