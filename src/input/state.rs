//! # Input State Module
//!
//! Latest value of every named axis and button.
//!
//! Axes are smoothed with a moving average over the last `window` samples.
//! Optionally, a reading of exactly zero is rejected when the previous two
//! readings were both well above zero; some pedal sets drop to zero for a
//! single report because of a hardware fault.
//!
//! ## Usage
//!
//! ```
//! use simlink::input::source::InputSample;
//! use simlink::input::state::InputState;
//!
//! let mut state = InputState::new(2);
//! state.apply(&InputSample::axis("steering", 100));
//! state.apply(&InputSample::axis("steering", 200));
//!
//! assert_eq!(state.axis("steering"), Some(150));
//! assert_eq!(state.axis("throttle"), None);
//! ```

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use super::source::InputSample;

/// Moving average over the most recent samples of one axis
#[derive(Debug, Clone)]
struct AxisFilter {
    samples: VecDeque<i32>,
    sum: i64,
    /// Last two accepted readings, newest first
    recent: [Option<i32>; 2],
    /// The previous reading was replaced as a dropout
    rejected: bool,
}

impl AxisFilter {
    fn new(window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window),
            sum: 0,
            recent: [None, None],
            rejected: false,
        }
    }

    fn push(&mut self, value: i32, window: usize) {
        if self.samples.len() == window {
            if let Some(oldest) = self.samples.pop_front() {
                self.sum -= i64::from(oldest);
            }
        }
        self.samples.push_back(value);
        self.sum += i64::from(value);
        self.recent = [Some(value), self.recent[0]];
    }

    fn average(&self) -> Option<i32> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.sum.div_euclid(self.samples.len() as i64) as i32)
    }

    /// Replaces a one-report dropout to zero with the last reading.
    ///
    /// Only a single report is replaced; a second zero in a row is genuine.
    fn filter_dropout(&mut self, value: i32, threshold: i32) -> i32 {
        let dropout = value == 0
            && !self.rejected
            && self
                .recent
                .iter()
                .all(|v| v.map_or(false, |v| v > threshold));

        self.rejected = dropout;
        match (dropout, self.recent[0]) {
            (true, Some(last)) => last,
            _ => value,
        }
    }
}

/// Current input state, updated from drained samples
#[derive(Debug, Clone)]
pub struct InputState {
    axes: HashMap<String, AxisFilter>,
    buttons: HashMap<String, bool>,
    window: usize,
    dropout_threshold: Option<i32>,
}

impl Default for InputState {
    fn default() -> Self {
        Self::new(5)
    }
}

impl InputState {
    /// Creates an empty state with a moving-average window (0 is treated as 1)
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            axes: HashMap::new(),
            buttons: HashMap::new(),
            window: window.max(1),
            dropout_threshold: None,
        }
    }

    /// Rejects zero readings that follow two readings above `threshold`
    #[must_use]
    pub fn with_dropout_threshold(mut self, threshold: Option<i32>) -> Self {
        self.dropout_threshold = threshold;
        self
    }

    /// Applies one sample
    pub fn apply(&mut self, sample: &InputSample) {
        match sample {
            InputSample::Axis { name, value } => {
                let window = self.window;
                let filter = self
                    .axes
                    .entry(name.clone())
                    .or_insert_with(|| AxisFilter::new(window));

                let value = match self.dropout_threshold {
                    Some(threshold) => {
                        let filtered = filter.filter_dropout(*value, threshold);
                        if filtered != *value {
                            debug!("Ignoring zero dropout on axis {}", name);
                        }
                        filtered
                    }
                    None => *value,
                };

                filter.push(value, window);
            }
            InputSample::Button { name, pressed } => {
                self.buttons.insert(name.clone(), *pressed);
            }
        }
    }

    /// Applies every sample in order
    pub fn apply_all(&mut self, samples: &[InputSample]) {
        for sample in samples {
            self.apply(sample);
        }
    }

    /// Smoothed axis value, `None` before the first sample
    #[must_use]
    pub fn axis(&self, name: &str) -> Option<i32> {
        self.axes.get(name).and_then(AxisFilter::average)
    }

    /// Button state, released before the first sample
    #[must_use]
    pub fn button(&self, name: &str) -> bool {
        self.buttons.get(name).copied().unwrap_or(false)
    }

    /// Forgets every value
    pub fn clear(&mut self) {
        self.axes.clear();
        self.buttons.clear();
    }
}
