//! # RC Channel Mapper Module
//!
//! Builds the 16-channel set from the current [`InputState`].
//!
//! Each configured [`ChannelBinding`] names where a channel's value comes from:
//!
//! | Source | Value |
//! |--------|-------|
//! | Axis | normalized axis (see [`AxisCalibration`]) |
//! | Button | `on` while pressed, `off` otherwise |
//! | Mix | 992 plus the sum of each input's offset from 992 |
//!
//! A mix combines throttle and brake pedals on one channel: throttle pushes
//! the value up from center, brake pulls it down.
//!
//! Channels without a binding sit at 992. A mix or trim can push a value past
//! 2047; the encoder clamps it.
//!
//! ## Usage
//!
//! ```
//! use simlink::input::calibration::AxisCalibration;
//! use simlink::input::channel_mapper::{AxisInput, ChannelBinding, ChannelMapper, ChannelSource};
//! use simlink::input::source::InputSample;
//! use simlink::input::state::InputState;
//!
//! let mapper = ChannelMapper::new(vec![ChannelBinding::new(
//!     0,
//!     ChannelSource::Axis(AxisInput::new("steering", AxisCalibration::new(0, 1280, 2560))),
//! )]);
//!
//! let mut state = InputState::new(1);
//! state.apply(&InputSample::axis("steering", 2560));
//!
//! let channels = mapper.map_to_channels(&state);
//! assert_eq!(channels[0], 1811);
//! assert_eq!(channels[1], 992);
//! ```

use super::calibration::AxisCalibration;
use super::state::InputState;
use crate::config::ChannelConfig;
use crate::crsf::protocol::{
    RcChannels, CRSF_CHANNEL_VALUE_CENTER, CRSF_CHANNEL_VALUE_HIGH, CRSF_CHANNEL_VALUE_LOW,
    CRSF_NUM_CHANNELS,
};

/// CRSF value for switch ON state.
pub const SWITCH_ON: u16 = CRSF_CHANNEL_VALUE_HIGH;

/// CRSF value for switch OFF state.
pub const SWITCH_OFF: u16 = CRSF_CHANNEL_VALUE_LOW;

/// A named axis with its calibration
#[derive(Debug, Clone, PartialEq)]
pub struct AxisInput {
    pub axis: String,
    pub calibration: AxisCalibration,
}

impl AxisInput {
    pub fn new(axis: impl Into<String>, calibration: AxisCalibration) -> Self {
        Self {
            axis: axis.into(),
            calibration,
        }
    }

    /// Normalized value, or the calibration's neutral before the first sample
    fn value(&self, state: &InputState) -> u16 {
        match state.axis(&self.axis) {
            Some(raw) => self.calibration.normalize(raw),
            None => self.calibration.neutral(),
        }
    }
}

/// Where a channel takes its value from
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSource {
    Axis(AxisInput),
    Button { name: String, on: u16, off: u16 },
    Mix(Vec<AxisInput>),
}

impl ChannelSource {
    /// Button source with the default switch values (1811 / 172)
    pub fn button(name: impl Into<String>) -> Self {
        ChannelSource::Button {
            name: name.into(),
            on: SWITCH_ON,
            off: SWITCH_OFF,
        }
    }
}

/// One channel's binding
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelBinding {
    /// Channel index (0-15)
    pub index: usize,
    pub source: ChannelSource,
    /// Offset in channel units added after mapping
    pub trim: i16,
}

impl ChannelBinding {
    pub fn new(index: usize, source: ChannelSource) -> Self {
        Self {
            index,
            source,
            trim: 0,
        }
    }

    #[must_use]
    pub fn with_trim(mut self, trim: i16) -> Self {
        self.trim = trim;
        self
    }

    fn value(&self, state: &InputState) -> u16 {
        let raw = match &self.source {
            ChannelSource::Axis(input) => i32::from(input.value(state)),
            ChannelSource::Button { name, on, off } => {
                i32::from(if state.button(name) { *on } else { *off })
            }
            ChannelSource::Mix(inputs) => {
                let center = i32::from(CRSF_CHANNEL_VALUE_CENTER);
                center
                    + inputs
                        .iter()
                        .map(|input| i32::from(input.value(state)) - center)
                        .sum::<i32>()
            }
        };

        // Values above 2047 are left for the encoder to clamp and report
        (raw + i32::from(self.trim)).clamp(0, i32::from(u16::MAX)) as u16
    }
}

impl From<&ChannelConfig> for ChannelBinding {
    /// An `axis` takes precedence over a `button`, which takes precedence
    /// over a `mix`
    fn from(config: &ChannelConfig) -> Self {
        let source = if let Some(axis) = &config.axis {
            ChannelSource::Axis(AxisInput::new(axis.clone(), (&config.calibration).into()))
        } else if let Some(button) = &config.button {
            ChannelSource::Button {
                name: button.clone(),
                on: config.on,
                off: config.off,
            }
        } else {
            ChannelSource::Mix(
                config
                    .mix
                    .iter()
                    .map(|input| AxisInput::new(input.axis.clone(), (&input.calibration).into()))
                    .collect(),
            )
        };

        ChannelBinding::new(config.index, source).with_trim(config.trim)
    }
}

/// Maps input state to CRSF RC channels.
#[derive(Debug, Clone, Default)]
pub struct ChannelMapper {
    bindings: Vec<ChannelBinding>,
}

impl ChannelMapper {
    /// Creates a mapper; bindings with an index above 15 are ignored.
    ///
    /// When two bindings share an index the later one wins.
    #[must_use]
    pub fn new(bindings: Vec<ChannelBinding>) -> Self {
        let bindings = bindings
            .into_iter()
            .filter(|binding| {
                let valid = binding.index < CRSF_NUM_CHANNELS;
                if !valid {
                    tracing::warn!("Ignoring binding for channel index {}", binding.index);
                }
                valid
            })
            .collect();

        Self { bindings }
    }

    /// Creates a mapper from the `[[channels]]` configuration
    pub fn from_config(channels: &[ChannelConfig]) -> Self {
        Self::new(channels.iter().map(ChannelBinding::from).collect())
    }

    /// Configured bindings
    pub fn bindings(&self) -> &[ChannelBinding] {
        &self.bindings
    }

    /// Maps input state to 16 RC channels.
    ///
    /// # Arguments
    ///
    /// * `state` - Current input state
    ///
    /// # Returns
    ///
    /// Array of 16 channel values (0-2047).
    #[must_use]
    pub fn map_to_channels(&self, state: &InputState) -> RcChannels {
        let mut channels = [CRSF_CHANNEL_VALUE_CENTER; CRSF_NUM_CHANNELS];

        for binding in &self.bindings {
            channels[binding.index] = binding.value(state);
        }

        channels
    }

    /// Channel set commanded while input is unavailable.
    ///
    /// Every bound channel takes its neutral value: axes at their calibrated
    /// rest position and buttons off. Trim still applies.
    #[must_use]
    pub fn neutral_channels(&self) -> RcChannels {
        self.map_to_channels(&InputState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::calibration::Curve;
    use crate::input::source::InputSample;

    fn steering() -> AxisInput {
        AxisInput::new("steering", AxisCalibration::new(0, 1280, 2560))
    }

    fn pedal(name: &str, invert: bool) -> AxisInput {
        AxisInput::new(name, AxisCalibration::new(0, 0, 255).inverted(invert))
    }

    fn drive_mapper() -> ChannelMapper {
        ChannelMapper::new(vec![
            ChannelBinding::new(0, ChannelSource::Axis(steering())),
            ChannelBinding::new(
                1,
                ChannelSource::Mix(vec![pedal("throttle", false), pedal("brake", true)]),
            ),
            ChannelBinding::new(4, ChannelSource::button("arm")),
        ])
    }

    fn state_with(samples: &[InputSample]) -> InputState {
        let mut state = InputState::new(1);
        state.apply_all(samples);
        state
    }

    #[test]
    fn test_unbound_channels_centered() {
        let mapper = ChannelMapper::default();
        let channels = mapper.map_to_channels(&InputState::default());
        assert_eq!(channels, [CRSF_CHANNEL_VALUE_CENTER; CRSF_NUM_CHANNELS]);
    }

    #[test]
    fn test_no_samples_yields_neutral() {
        let channels = drive_mapper().map_to_channels(&InputState::default());
        assert_eq!(channels[0], 992);
        assert_eq!(channels[1], 992);
        assert_eq!(channels[4], SWITCH_OFF);
    }

    #[test]
    fn test_axis_mapping() {
        let mapper = drive_mapper();
        assert_eq!(
            mapper.map_to_channels(&state_with(&[InputSample::axis("steering", 0)]))[0],
            172
        );
        assert_eq!(
            mapper.map_to_channels(&state_with(&[InputSample::axis("steering", 2560)]))[0],
            1811
        );
    }

    #[test]
    fn test_button_mapping() {
        let mapper = drive_mapper();
        let channels = mapper.map_to_channels(&state_with(&[InputSample::button("arm", true)]));
        assert_eq!(channels[4], SWITCH_ON);
    }

    #[test]
    fn test_button_custom_values() {
        let mapper = ChannelMapper::new(vec![ChannelBinding::new(
            7,
            ChannelSource::Button {
                name: "mode".into(),
                on: 2000,
                off: 1000,
            },
        )]);
        assert_eq!(mapper.map_to_channels(&InputState::default())[7], 1000);
        assert_eq!(
            mapper.map_to_channels(&state_with(&[InputSample::button("mode", true)]))[7],
            2000
        );
    }

    #[test]
    fn test_mix_throttle_and_brake() {
        let mapper = drive_mapper();

        let full_throttle = state_with(&[
            InputSample::axis("throttle", 255),
            InputSample::axis("brake", 0),
        ]);
        assert_eq!(mapper.map_to_channels(&full_throttle)[1], 1811);

        let full_brake = state_with(&[
            InputSample::axis("throttle", 0),
            InputSample::axis("brake", 255),
        ]);
        assert_eq!(mapper.map_to_channels(&full_brake)[1], 172);

        let both = state_with(&[
            InputSample::axis("throttle", 255),
            InputSample::axis("brake", 255),
        ]);
        // +819 and -820 cancel out
        assert_eq!(mapper.map_to_channels(&both)[1], 991);
    }

    #[test]
    fn test_mix_can_exceed_wire_range() {
        let mapper = ChannelMapper::new(vec![ChannelBinding::new(
            2,
            ChannelSource::Mix(vec![pedal("a", false), pedal("b", false), pedal("c", false)]),
        )]);
        let state = state_with(&[
            InputSample::axis("a", 255),
            InputSample::axis("b", 255),
            InputSample::axis("c", 255),
        ]);
        // 992 + 3 * 819
        assert_eq!(mapper.map_to_channels(&state)[2], 3449);
    }

    #[test]
    fn test_trim() {
        let mapper = ChannelMapper::new(vec![
            ChannelBinding::new(0, ChannelSource::Axis(steering())).with_trim(-12),
            ChannelBinding::new(1, ChannelSource::Axis(steering())).with_trim(i16::MIN),
        ]);
        let channels = mapper.map_to_channels(&state_with(&[InputSample::axis("steering", 1280)]));
        assert_eq!(channels[0], 980);
        assert_eq!(channels[1], 0);
    }

    #[test]
    fn test_linear_pedal_rests_low() {
        let mapper = ChannelMapper::new(vec![ChannelBinding::new(
            2,
            ChannelSource::Axis(AxisInput::new(
                "throttle",
                AxisCalibration::new(0, 0, 255).with_curve(Curve::Linear),
            )),
        )]);
        assert_eq!(mapper.neutral_channels()[2], 172);
    }

    #[test]
    fn test_out_of_range_index_ignored() {
        let mapper = ChannelMapper::new(vec![
            ChannelBinding::new(16, ChannelSource::button("arm")),
            ChannelBinding::new(3, ChannelSource::button("arm")),
        ]);
        assert_eq!(mapper.bindings().len(), 1);
        assert_eq!(mapper.bindings()[0].index, 3);
    }

    #[test]
    fn test_later_binding_wins() {
        let mapper = ChannelMapper::new(vec![
            ChannelBinding::new(5, ChannelSource::button("a")),
            ChannelBinding::new(
                5,
                ChannelSource::Button {
                    name: "b".into(),
                    on: 1811,
                    off: 1500,
                },
            ),
        ]);
        assert_eq!(mapper.map_to_channels(&InputState::default())[5], 1500);
    }

    #[test]
    fn test_neutral_channels_ignores_inputs() {
        let mapper = drive_mapper();
        let neutral = mapper.neutral_channels();
        assert_eq!(neutral[0], 992);
        assert_eq!(neutral[1], 992);
        assert_eq!(neutral[4], SWITCH_OFF);
    }

    #[test]
    fn test_from_config() {
        let config = crate::config::Config::from_toml(
            r#"
[[channels]]
index = 0
axis = "steering"
trim = 3
[channels.calibration]
min = 0
center = 1280
max = 2560

[[channels]]
index = 1
[[channels.mix]]
axis = "throttle"
[channels.mix.calibration]
min = 0
max = 255
[[channels.mix]]
axis = "brake"
[channels.mix.calibration]
min = 0
max = 255
invert = true

[[channels]]
index = 4
button = "arm"
on = 1700
"#,
        )
        .unwrap();

        let mapper = ChannelMapper::from_config(&config.channels);
        assert_eq!(mapper.bindings().len(), 3);
        assert_eq!(mapper.bindings()[0].trim, 3);
        assert_eq!(
            mapper.bindings()[0].source,
            ChannelSource::Axis(AxisInput::new(
                "steering",
                AxisCalibration::new(0, 1280, 2560)
            ))
        );
        assert_eq!(
            mapper.bindings()[2].source,
            ChannelSource::Button {
                name: "arm".into(),
                on: 1700,
                off: SWITCH_OFF,
            }
        );

        let state = state_with(&[
            InputSample::axis("steering", 2560),
            InputSample::axis("throttle", 255),
            InputSample::axis("brake", 0),
            InputSample::button("arm", true),
        ]);
        let channels = mapper.map_to_channels(&state);
        assert_eq!(channels[0], 1814);
        assert_eq!(channels[1], 1811);
        assert_eq!(channels[4], 1700);
    }
}
