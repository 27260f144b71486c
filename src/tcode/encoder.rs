// src/tcode/encoder.rs - Axis range scaling and fixed-width frame encoding
use super::{Frame, Interval, MotionCommand};
use crate::axis::{Axis, AxisMap};
use std::fmt::Write as _;
use std::time::Duration;

pub const MAX_VALUE: u16 = 999;
pub const MIN_INTERVAL_MS: u128 = 1;
pub const MAX_INTERVAL_MS: u128 = 9999;

/// Device output sub-range for one axis, in the neutral 0-1000 domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

impl Default for AxisRange {
    fn default() -> Self {
        Self { min: 0.0, max: 1000.0 }
    }
}

/// Per-axis ranges plus the global intensity percentage.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRange {
    pub ranges: AxisMap<AxisRange>,
    pub intensity: f64,
}

impl Default for OutputRange {
    fn default() -> Self {
        Self {
            ranges: AxisMap::new(),
            intensity: 100.0,
        }
    }
}

impl OutputRange {
    pub fn range(&self, axis: Axis) -> AxisRange {
        self.ranges.get(axis).copied().unwrap_or_default()
    }

    /// Scale one raw 0-1000 value into the device range for `axis`.
    pub fn scale(&self, axis: Axis, raw: f64) -> u16 {
        let AxisRange { min, max } = self.range(axis);
        let span = max - min;
        let scaled = (raw / 1000.0 - 0.5) * span * self.intensity / 100.0 + span / 2.0;
        clamp_floor(scaled, 0.0, 1000.0) as u16
    }

    /// Scale every present axis; absent axes stay absent.
    pub fn scale_axes(&self, values: &AxisMap<f64>) -> AxisMap<u16> {
        values.map(|axis, raw| self.scale(axis, *raw))
    }
}

fn clamp_floor(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() || value <= min {
        min
    } else if value >= max {
        max
    } else {
        value.floor()
    }
}

/// `<Axis><3-digit value>`, value clamped to 0..=999.
pub fn axis_token(axis: Axis, value: f64) -> String {
    let value = clamp_floor(value, 0.0, MAX_VALUE as f64) as u16;
    format!("{}{:03}", axis, value)
}

/// `I<4-digit milliseconds>`, clamped to 1..=9999.
pub fn interval_token(interval: Duration) -> String {
    let ms = interval.as_millis().clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS);
    format!("I{:04}", ms)
}

/// Encode already-scaled values into one frame. Returns `None` when no axis is present.
pub fn encode_values(values: &AxisMap<f64>, interval: &Interval) -> Option<Frame> {
    if values.is_empty() {
        return None;
    }
    let mut line = String::new();
    for (axis, value) in values.iter() {
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(&axis_token(axis, *value));
        let axis_interval = match interval {
            Interval::None => None,
            Interval::Uniform(d) => Some(*d),
            Interval::PerAxis(per_axis) => per_axis.get(axis).copied(),
        };
        if let Some(d) = axis_interval {
            let _ = write!(line, "{}", interval_token(d));
        }
    }
    Some(Frame::new(line))
}

/// Turns producer commands into device frames using the current output range.
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    range: OutputRange,
}

impl Encoder {
    pub fn new(range: OutputRange) -> Self {
        Self { range }
    }

    pub fn set_range(&mut self, range: OutputRange) {
        self.range = range;
    }

    pub fn range(&self) -> &OutputRange {
        &self.range
    }

    pub fn encode(&self, command: &MotionCommand) -> Option<Frame> {
        let scaled = self.range.scale_axes(&command.values).map(|_, v| *v as f64);
        encode_values(&scaled, &command.interval)
    }
}
