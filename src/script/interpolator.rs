// src/script/interpolator.rs - Script cursor advancement and per-axis target computation
//!
//! Every tick plans into a look-ahead window `[start, start + width]` of media
//! time. If the next keyframe lies beyond the window the axis is interpolated
//! to the window end; otherwise it snaps straight to that keyframe so no local
//! extremum is ever smoothed away, and the next tick is pulled in to land just
//! after the keyframe.

use super::{MotionScript, ScriptError};
use crate::axis::Axis;

/// How far past a snapped keyframe the next tick is scheduled, so it lands
/// after the keyframe even when the tick cost is subtracted.
pub const SNAP_OVERSHOOT_MS: f64 = 2.0;

/// The media-time span one tick plans into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanningWindow {
    pub start: f64,
    pub width: f64,
    /// Wall time per media time; scales snapped intervals.
    pub rate: f64,
}

impl PlanningWindow {
    pub fn new(start: f64, width: f64) -> Self {
        Self {
            start,
            width,
            rate: 1.0,
        }
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    pub fn end(&self) -> f64 {
        self.start + self.width
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    Interpolated,
    Snapped,
}

/// Target for one axis on one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisSample {
    /// 0..=1000 target value.
    pub value: f64,
    /// Time the device should take to reach `value`, in milliseconds.
    pub interval_ms: f64,
    /// Latest the next tick should run, in milliseconds.
    pub proposed_delay_ms: f64,
    pub mode: SampleMode,
}

/// Position of one axis inside its script: the last keyframe at or before now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AxisCursor {
    prev_offset: usize,
}

impl AxisCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prev_offset(&self) -> usize {
        self.prev_offset
    }

    pub fn reset(&mut self) {
        self.prev_offset = 0;
    }

    /// Advance through `script` to `window.start` and compute this tick's target.
    ///
    /// Returns `Ok(None)` once the script has ended: the axis holds its last
    /// value and contributes nothing to the frame.
    pub fn evaluate(
        &mut self,
        axis: Axis,
        script: &MotionScript,
        window: PlanningWindow,
    ) -> Result<Option<AxisSample>, ScriptError> {
        let actions = &script.actions;
        let len = actions.len();
        if len == 0 {
            return Err(ScriptError::Empty(axis));
        }
        let now = window.start;

        let mut prev = self.prev_offset;
        let prev_keyframe = actions.get(prev).ok_or(ScriptError::CursorOutOfRange {
            axis,
            offset: prev,
            len,
        })?;
        if prev_keyframe.at as f64 > now && prev > 0 {
            tracing::debug!("{}: retracing script cursor (did the media skip back?)", axis);
            prev = 0;
        }

        let mut next = prev + 1;
        while next < len && (actions[next].at as f64) < now {
            next += 1;
        }
        prev = next - 1;
        self.prev_offset = prev;

        if next >= len {
            return Ok(None);
        }
        if actions[prev].at as f64 > now {
            // script has not reached its first keyframe yet
            next = prev;
        }

        let prev_keyframe = &actions[prev];
        let next_keyframe = &actions[next];
        let prev_val = script.scaled_value(prev_keyframe);
        let next_val = script.scaled_value(next_keyframe);
        let delta = next_keyframe.at as f64 - now;

        if delta > window.width {
            let fraction = if prev != next {
                (window.end() - prev_keyframe.at as f64)
                    / (next_keyframe.at - prev_keyframe.at) as f64
            } else {
                0.5
            };
            Ok(Some(AxisSample {
                value: (1.0 - fraction) * prev_val + fraction * next_val,
                interval_ms: window.width,
                proposed_delay_ms: window.width,
                mode: SampleMode::Interpolated,
            }))
        } else {
            let interval_ms = delta.max(0.0) * window.rate;
            Ok(Some(AxisSample {
                value: next_val,
                interval_ms,
                proposed_delay_ms: interval_ms + SNAP_OVERSHOOT_MS,
                mode: SampleMode::Snapped,
            }))
        }
    }
}
