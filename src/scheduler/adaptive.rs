// src/scheduler/adaptive.rs - Self-correcting tick scheduler
//! Each tick proposes how long to wait before the next one; the scheduler
//! subtracts what the tick itself cost so the long-run tick rate stays on the
//! nominal window. Delays never drop below [`MIN_DELAY_MS`].
//!
//! A delay that only reached the floor because the tick took too long is
//! counted as *starved*. Starvation is an observability signal, not an error.

use std::time::Duration;

pub const MIN_DELAY_MS: u64 = 1;
/// Consecutive starved ticks after which a warning is logged (and then every
/// further multiple of it).
pub const STARVATION_WARN_AFTER: u64 = 10;

/// Delay until the next tick. Always at least [`MIN_DELAY_MS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleDecision {
    pub delay_ms: u64,
    pub starved: bool,
}

impl ScheduleDecision {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub starved_ticks: u64,
    pub consecutive_starved: u64,
    pub last_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct TickScheduler {
    name: &'static str,
    stats: SchedulerStats,
}

/// Runtime-corrected delay, floored at [`MIN_DELAY_MS`].
pub fn corrected_delay(proposed_ms: f64, elapsed_ms: f64) -> u64 {
    let delay = (proposed_ms - elapsed_ms).floor();
    if delay.is_nan() || delay < MIN_DELAY_MS as f64 {
        MIN_DELAY_MS
    } else {
        delay as u64
    }
}

impl TickScheduler {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            stats: SchedulerStats::default(),
        }
    }

    /// Close out a tick that proposed `proposed_ms` and took `elapsed`.
    pub fn finish(&mut self, proposed_ms: f64, elapsed: Duration) -> ScheduleDecision {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let delay_ms = corrected_delay(proposed_ms, elapsed_ms);
        let starved = proposed_ms > MIN_DELAY_MS as f64 && proposed_ms - elapsed_ms < MIN_DELAY_MS as f64;

        self.stats.ticks += 1;
        self.stats.last_delay_ms = delay_ms;
        if starved {
            self.stats.starved_ticks += 1;
            self.stats.consecutive_starved += 1;
            tracing::debug!(
                "{}: tick took {:.2}ms of a {:.2}ms budget",
                self.name,
                elapsed_ms,
                proposed_ms
            );
            if self.stats.consecutive_starved % STARVATION_WARN_AFTER == 0 {
                tracing::warn!(
                    "{}: performance issues, {} consecutive ticks hit the {}ms floor",
                    self.name,
                    self.stats.consecutive_starved,
                    MIN_DELAY_MS
                );
            }
        } else {
            self.stats.consecutive_starved = 0;
        }

        ScheduleDecision { delay_ms, starved }
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }
}
