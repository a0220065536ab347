//! # Calibration Module
//!
//! Maps raw device readings into the 11-bit CRSF channel range.
//!
//! Every device quirk (raw range, resting position, direction) lives in an
//! [`AxisCalibration`]. Supporting a new wheel or pedal set means writing new
//! calibration values, never new protocol code.
//!
//! ## Pipeline
//!
//! 1. Clamp the raw reading to `[min, max]`
//! 2. Treat readings within `deadzone` of `center` as center, rescaling the
//!    remaining travel so the endpoints are still reached
//! 3. Shape with the configured [`Curve`]
//! 4. Apply `invert` and `limit`
//! 5. Convert to a channel value around 992 (172 ... 1811 at full travel)
//!
//! ## Curves
//!
//! - `Piecewise`: two linear segments split at `center`, each side using its
//!   own span. A side with zero span (e.g. a pedal resting at `min`) yields 0.
//! - `Linear`: one segment from `min` (172) to `max` (1811). `center` only
//!   anchors the deadzone.
//! - `Expo`: piecewise followed by `output = (1 - expo) * input + expo * input³`
//!
//! ## Usage
//!
//! ```
//! use simlink::input::calibration::AxisCalibration;
//!
//! let cal = AxisCalibration::new(-32768, 0, 32767);
//!
//! assert_eq!(cal.normalize(0), 992);
//! assert_eq!(cal.normalize(-32768), 172);
//! assert_eq!(cal.normalize(32767), 1811);
//! ```

use crate::config::{CalibrationConfig, CurveKind};
use crate::crsf::protocol::{
    CRSF_CHANNEL_VALUE_CENTER, CRSF_CHANNEL_VALUE_HIGH, CRSF_CHANNEL_VALUE_LOW,
    CRSF_CHANNEL_VALUE_MAX,
};

/// Channel units from center to the high endpoint (1811 - 992)
const SPAN_HIGH: f32 = (CRSF_CHANNEL_VALUE_HIGH - CRSF_CHANNEL_VALUE_CENTER) as f32;

/// Channel units from the low endpoint to center (992 - 172)
const SPAN_LOW: f32 = (CRSF_CHANNEL_VALUE_CENTER - CRSF_CHANNEL_VALUE_LOW) as f32;

/// Transfer curve applied after the deadzone
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Curve {
    /// Single segment from `min` to `max`
    Linear,
    /// Two segments split at `center`
    #[default]
    Piecewise,
    /// Piecewise with an exponential curve (0.0 to 1.0)
    Expo { factor: f32 },
}

impl Curve {
    /// Exponential curve, factor clamped to 0.0..=1.0
    #[must_use]
    pub fn expo(factor: f32) -> Self {
        Curve::Expo {
            factor: factor.clamp(0.0, 1.0),
        }
    }
}

/// Calibration for one raw axis.
///
/// Raw values are device units (`i32` covers every evdev axis).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisCalibration {
    /// Raw value mapped to 992
    pub center: i32,
    /// Raw value mapped to 172
    pub min: i32,
    /// Raw value mapped to 1811
    pub max: i32,
    /// Reverse direction
    pub invert: bool,
    /// Raw distance around `center` treated as center
    pub deadzone: i32,
    pub curve: Curve,
    /// Fraction of the output travel to use (0.0 exclusive to 1.0)
    pub limit: f32,
}

impl Default for AxisCalibration {
    fn default() -> Self {
        Self::new(i16::MIN as i32, 0, i16::MAX as i32)
    }
}

impl AxisCalibration {
    /// Creates a piecewise calibration with no deadzone.
    ///
    /// `min` and `max` are swapped if given in reverse order and `center` is
    /// clamped between them.
    ///
    /// # Examples
    ///
    /// ```
    /// use simlink::input::calibration::AxisCalibration;
    ///
    /// // 8-bit stick resting at 128
    /// let cal = AxisCalibration::new(0, 128, 255);
    /// assert_eq!(cal.normalize(128), 992);
    /// ```
    #[must_use]
    pub fn new(min: i32, center: i32, max: i32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };

        Self {
            center: center.clamp(min, max),
            min,
            max,
            invert: false,
            deadzone: 0,
            curve: Curve::Piecewise,
            limit: 1.0,
        }
    }

    /// Sets the deadzone in raw units (negative values become 0).
    #[must_use]
    pub fn with_deadzone(mut self, deadzone: i32) -> Self {
        self.deadzone = deadzone.max(0);
        self
    }

    #[must_use]
    pub fn with_curve(mut self, curve: Curve) -> Self {
        self.curve = curve;
        self
    }

    #[must_use]
    pub fn inverted(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    /// Sets the travel limit, clamped to 0.0..=1.0.
    #[must_use]
    pub fn with_limit(mut self, limit: f32) -> Self {
        self.limit = limit.clamp(0.0, 1.0);
        self
    }

    /// Maps a raw reading to a channel value (0-2047).
    ///
    /// # Arguments
    ///
    /// * `raw` - Raw device reading
    ///
    /// # Returns
    ///
    /// Channel value; 992 at center, 172 and 1811 at full travel before `limit`.
    ///
    /// # Examples
    ///
    /// ```
    /// use simlink::input::calibration::{AxisCalibration, Curve};
    ///
    /// // Pedal: released at 0, fully pressed at 255
    /// let pedal = AxisCalibration::new(0, 0, 255).with_curve(Curve::Linear);
    /// assert_eq!(pedal.normalize(0), 172);
    /// assert_eq!(pedal.normalize(255), 1811);
    /// ```
    #[must_use]
    pub fn normalize(&self, raw: i32) -> u16 {
        match self.curve {
            Curve::Linear => self.position_to_channel(self.linear_position(raw)),
            Curve::Piecewise => self.deflection_to_channel(self.deflection(raw)),
            Curve::Expo { factor } => {
                let deflection = self.deflection(raw);
                let shaped = apply_expo(deflection.abs(), factor);
                self.deflection_to_channel(deflection.signum() * shaped)
            }
        }
    }

    /// Channel value for the resting position (used before any sample arrives).
    #[must_use]
    pub fn neutral(&self) -> u16 {
        self.normalize(self.center)
    }

    /// Deflection from center in -1.0..=1.0, deadzone applied.
    ///
    /// Offsets and spans are taken in i64 so the full i32 range is usable.
    fn deflection(&self, raw: i32) -> f32 {
        let raw = i64::from(raw.clamp(self.min, self.max));
        let (min, center, max) = self.bounds();
        let deadzone = i64::from(self.deadzone);
        let offset = raw - center;

        if offset.abs() <= deadzone {
            return 0.0;
        }

        let (span, past_deadzone, sign) = if offset > 0 {
            (max - center, offset - deadzone, 1.0)
        } else {
            (center - min, -offset - deadzone, -1.0)
        };

        let usable = span - deadzone;
        if usable <= 0 {
            return 0.0;
        }

        sign * (past_deadzone as f64 / usable as f64).min(1.0) as f32
    }

    /// Position along `min..=max` in 0.0..=1.0, deadzone snapped to center.
    fn linear_position(&self, raw: i32) -> f32 {
        let (min, center, max) = self.bounds();
        let range = (max - min) as f64;
        if range <= 0.0 {
            return 0.0;
        }

        let center_position = ((center - min) as f64 / range) as f32;
        let deflection = self.deflection(raw);

        if deflection >= 0.0 {
            center_position + deflection * (1.0 - center_position)
        } else {
            center_position + deflection * center_position
        }
    }

    fn bounds(&self) -> (i64, i64, i64) {
        (
            i64::from(self.min),
            i64::from(self.center),
            i64::from(self.max),
        )
    }

    fn deflection_to_channel(&self, deflection: f32) -> u16 {
        let mut d = deflection.clamp(-1.0, 1.0);
        if self.invert {
            d = -d;
        }
        d *= self.limit;

        let value = if d >= 0.0 {
            CRSF_CHANNEL_VALUE_CENTER as f32 + d * SPAN_HIGH
        } else {
            CRSF_CHANNEL_VALUE_CENTER as f32 + d * SPAN_LOW
        };

        to_channel(value)
    }

    fn position_to_channel(&self, position: f32) -> u16 {
        let mut t = position.clamp(0.0, 1.0);
        if self.invert {
            t = 1.0 - t;
        }
        t *= self.limit;

        to_channel(CRSF_CHANNEL_VALUE_LOW as f32 + t * (SPAN_LOW + SPAN_HIGH))
    }
}

/// Applies exponential curve to a value in range 0..1.
///
/// Formula: output = (1 - expo) * input + expo * input³
#[inline]
fn apply_expo(input: f32, expo: f32) -> f32 {
    if expo == 0.0 {
        input
    } else {
        let linear = (1.0 - expo) * input;
        let cubic = expo * input * input * input;
        linear + cubic
    }
}

impl From<&CalibrationConfig> for AxisCalibration {
    fn from(config: &CalibrationConfig) -> Self {
        let curve = match config.curve {
            CurveKind::Linear => Curve::Linear,
            CurveKind::Piecewise => Curve::Piecewise,
            CurveKind::Expo => Curve::expo(config.expo),
        };

        AxisCalibration::new(config.min, config.center, config.max)
            .with_deadzone(config.deadzone)
            .with_curve(curve)
            .inverted(config.invert)
            .with_limit(config.limit)
    }
}

#[inline]
fn to_channel(value: f32) -> u16 {
    value.round().clamp(0.0, CRSF_CHANNEL_VALUE_MAX as f32) as u16
}
