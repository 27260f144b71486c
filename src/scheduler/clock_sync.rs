// src/scheduler/clock_sync.rs - Media clock / local clock synchronization
//!
//! The externally reported media position is jittery (roughly ±10 ms at the
//! usual reporting cadence). Instead of trusting every sample we keep our own
//! skew between the local monotonic clock and the media clock, and only move
//! it in bounded steps unless the two clearly diverged (seek, pause, rewind).

/// Skew difference above which the media clock is considered discontinuous.
pub const RESET_THRESHOLD_MS: i64 = 50;
/// Skew difference above which the skew is nudged by one millisecond.
pub const NUDGE_THRESHOLD_MS: i64 = 12;

/// What a clock report did to the stored skew.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Discontinuity: skew jumped straight to the raw delta.
    Reset { previous: i64, skew: i64 },
    /// Moderate drift: skew moved by +1 or -1.
    Nudged { step: i64, skew: i64 },
    /// Within noise tolerance.
    Stable { skew: i64 },
}

#[derive(Debug, Clone, Default)]
pub struct ClockSync {
    skew: i64,
    last_media_ms: Option<i64>,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skew(&self) -> i64 {
        self.skew
    }

    pub fn last_media_ms(&self) -> Option<i64> {
        self.last_media_ms
    }

    /// Fold one media clock sample, taken at local time `local_now`, into the skew.
    pub fn report(&mut self, media_ms: f64, local_now: i64) -> SyncOutcome {
        let media_now = media_ms.floor() as i64;
        let raw_delta = local_now - media_now;
        let diff = raw_delta - self.skew;
        self.last_media_ms = Some(media_now);

        if diff.abs() > RESET_THRESHOLD_MS {
            let previous = self.skew;
            self.skew = raw_delta;
            tracing::info!(
                "Media clock out of sync by {}ms, resetting skew to {}",
                diff,
                raw_delta
            );
            SyncOutcome::Reset {
                previous,
                skew: self.skew,
            }
        } else if diff.abs() > NUDGE_THRESHOLD_MS {
            let step = diff.signum();
            self.skew += step;
            tracing::trace!("Skewing media clock by {} (skew now {})", step, self.skew);
            SyncOutcome::Nudged {
                step,
                skew: self.skew,
            }
        } else {
            SyncOutcome::Stable { skew: self.skew }
        }
    }

    /// Media-clock time corresponding to local time `local_now`.
    pub fn corrected_now(&self, local_now: i64) -> i64 {
        local_now - self.skew
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synced(skew: i64) -> ClockSync {
        let mut sync = ClockSync::new();
        sync.report(0.0, skew);
        assert_eq!(sync.skew(), skew);
        sync
    }

    #[test]
    fn test_large_difference_resets_skew() {
        let mut sync = synced(1000);
        // raw delta 1060 differs by 60ms
        let outcome = sync.report(5000.0, 6060);
        assert_eq!(outcome, SyncOutcome::Reset { previous: 1000, skew: 1060 });
        assert_eq!(sync.skew(), 1060);
    }

    #[test]
    fn test_moderate_difference_nudges_by_one() {
        let mut sync = synced(1000);
        sync.report(5000.0, 6020);
        assert_eq!(sync.skew(), 1001);
        sync.report(5000.0, 5980);
        assert_eq!(sync.skew(), 1000);
    }

    #[test]
    fn test_small_difference_is_ignored() {
        let mut sync = synced(1000);
        let outcome = sync.report(5000.0, 6005);
        assert_eq!(outcome, SyncOutcome::Stable { skew: 1000 });
    }

    #[test]
    fn test_thresholds_are_exclusive() {
        let mut sync = synced(1000);
        assert!(matches!(sync.report(0.0, 1050), SyncOutcome::Nudged { .. }));
        let mut sync = synced(1000);
        assert!(matches!(sync.report(0.0, 1012), SyncOutcome::Stable { .. }));
    }

    #[test]
    fn test_corrected_now_and_fractional_media_time() {
        let mut sync = ClockSync::new();
        sync.report(1999.7, 3000);
        assert_eq!(sync.skew(), 1001);
        assert_eq!(sync.corrected_now(3100), 2099);
        assert_eq!(sync.last_media_ms(), Some(1999));
    }
}
