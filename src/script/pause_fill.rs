// src/script/pause_fill.rs - Synthetic idle motion for long high holds on the primary axis
//!
//! When the primary axis sits above [`HIGH_THRESHOLD`] for longer than
//! [`PAUSE_THRESHOLD_MS`], the static hold is replaced by a slow triangular
//! oscillation. When the script moves below the threshold again the output
//! blends back to the real value over [`RECOVERY_MS`], so the motion never
//! jumps.

pub const HIGH_THRESHOLD: f64 = 850.0;
pub const PAUSE_THRESHOLD_MS: f64 = 2000.0;
pub const RECOVERY_MS: f64 = 600.0;
pub const RECOVERED_DEGREE: f64 = 0.95;
const OSCILLATION_PERIOD: f64 = 2000.0;
const OSCILLATION_SCALE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PauseFill {
    #[default]
    Idle,
    /// Value has been high since `since`.
    Watching { since: f64 },
    /// Blending back to the script since `since`.
    Recovering { since: f64 },
}

/// What the state machine did to the value this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillEffect {
    Unchanged,
    Oscillating,
    Holding,
    Recovering { degree: f64 },
}

/// Triangular wave in `[0, 800]` for `elapsed` ms into a pause.
pub fn oscillation(elapsed: f64) -> f64 {
    (1000.0 - (elapsed / 4.0).rem_euclid(OSCILLATION_PERIOD)).abs() * OSCILLATION_SCALE
}

impl PauseFill {
    pub fn reset(&mut self) {
        *self = PauseFill::Idle;
    }

    /// Feed the computed `value` at media time `now`; `last_position` is the
    /// value emitted on the previous tick. Returns the value to emit.
    pub fn apply(&mut self, value: f64, now: f64, last_position: f64) -> (f64, FillEffect) {
        if value > HIGH_THRESHOLD {
            match *self {
                PauseFill::Watching { since } => {
                    let held = now - since;
                    if held > PAUSE_THRESHOLD_MS {
                        (oscillation(held - PAUSE_THRESHOLD_MS), FillEffect::Oscillating)
                    } else {
                        (value, FillEffect::Unchanged)
                    }
                }
                PauseFill::Idle | PauseFill::Recovering { .. } => {
                    *self = PauseFill::Watching { since: now };
                    (value, FillEffect::Unchanged)
                }
            }
        } else {
            match *self {
                PauseFill::Recovering { since } => {
                    let degree = ((now - since) / RECOVERY_MS).clamp(0.0, 1.0);
                    if degree > RECOVERED_DEGREE {
                        *self = PauseFill::Idle;
                    }
                    (
                        degree * value + (1.0 - degree) * last_position,
                        FillEffect::Recovering { degree },
                    )
                }
                PauseFill::Watching { since } => {
                    if now - since > PAUSE_THRESHOLD_MS {
                        tracing::debug!("Pause ended, recovering to script position");
                        *self = PauseFill::Recovering { since: now };
                        (last_position, FillEffect::Holding)
                    } else {
                        *self = PauseFill::Idle;
                        (value, FillEffect::Unchanged)
                    }
                }
                PauseFill::Idle => (value, FillEffect::Unchanged),
            }
        }
    }
}
