// src/tcode/mod.rs - Wire protocol: commands, intervals and frames
//!
//! A frame is a space-separated list of `<Axis><3-digit value>[I<4-digit ms>]`
//! tokens. The transport layer terminates each frame with a newline.

pub mod decoder;
pub mod encoder;

pub use decoder::{DecodeError, DecodedToken, DeviceState, parse_frame};
pub use encoder::{AxisRange, Encoder, OutputRange, axis_token, encode_values, interval_token};

use crate::axis::{Axis, AxisMap};
use std::fmt;
use std::time::Duration;

/// How long the device should take to reach the commanded values.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Interval {
    #[default]
    None,
    Uniform(Duration),
    PerAxis(AxisMap<Duration>),
}

/// Fractional milliseconds as a `Duration`, rounded to the microsecond.
/// Negative and NaN inputs give zero.
pub fn duration_from_ms(ms: f64) -> Duration {
    if ms.is_nan() || ms <= 0.0 {
        Duration::ZERO
    } else {
        Duration::from_micros((ms * 1000.0).round() as u64)
    }
}

impl Interval {
    pub fn from_millis_f64(ms: f64) -> Self {
        Interval::Uniform(duration_from_ms(ms))
    }

    pub fn for_axis(&self, axis: Axis) -> Option<Duration> {
        match self {
            Interval::None => None,
            Interval::Uniform(d) => Some(*d),
            Interval::PerAxis(map) => map.get(axis).copied(),
        }
    }

    /// Raise every interval to at least `floor`; axes without one get `floor`.
    pub fn floored(&self, values: &AxisMap<f64>, floor: Duration) -> Interval {
        match self {
            Interval::None => Interval::Uniform(floor),
            Interval::Uniform(d) => Interval::Uniform((*d).max(floor)),
            Interval::PerAxis(map) => Interval::PerAxis(
                values
                    .axes()
                    .map(|axis| (axis, map.get(axis).copied().unwrap_or(floor).max(floor)))
                    .collect(),
            ),
        }
    }
}

/// Raw 0-1000 axis targets plus the time to reach them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MotionCommand {
    pub values: AxisMap<f64>,
    pub interval: Interval,
}

impl MotionCommand {
    pub fn new(values: AxisMap<f64>, interval: Interval) -> Self {
        Self { values, interval }
    }
}

/// One encoded protocol message, without the trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(String);

impl Frame {
    pub fn new(line: String) -> Self {
        Self(line)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_line(self) -> String {
        let mut line = self.0;
        line.push('\n');
        line
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
