// src/player/script_player.rs - Script playback synchronized to an external media clock
//!
//! [`ScriptPlayer`] is the plain state machine: it folds clock reports into
//! its skew and, once per tick, plans a [`MotionCommand`] plus how long to
//! wait before the next tick. [`spawn`] runs it as a task that re-arms its
//! own timer after every tick while staying responsive to control messages.

use crate::axis::{Axis, AxisMap};
use crate::config::PlayerConfig;
use crate::output::OutputHandle;
use crate::scheduler::{ClockSync, SchedulerStats, SyncOutcome, TickScheduler, TimeInterface};
use crate::script::{AxisCursor, FillEffect, PauseFill, PlanningWindow, ScriptSet};
use crate::tcode::{Interval, MotionCommand, duration_from_ms};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Neutral primary-axis position after new scripts are loaded.
pub const NEUTRAL_POSITION: f64 = 500.0;
/// Delay before the first tick after the task starts.
pub const FIRST_TICK_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerParameters {
    pub running: bool,
    /// Wall time per media time; `2.0` plays at half speed.
    pub playback_rate: f64,
    pub pause_fill: bool,
    /// Output latency to compensate for, in media milliseconds.
    pub latency_ms: i64,
    /// Nominal look-ahead window.
    pub time_window_ms: f64,
}

impl Default for PlayerParameters {
    fn default() -> Self {
        Self::from(&PlayerConfig::default())
    }
}

impl From<&PlayerConfig> for PlayerParameters {
    fn from(config: &PlayerConfig) -> Self {
        Self {
            running: false,
            playback_rate: config.playback_rate,
            pause_fill: config.pause_fill,
            latency_ms: config.latency_ms,
            time_window_ms: config.time_window_ms as f64,
        }
    }
}

/// Partial parameter update; `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct ParameterUpdate {
    pub scripts: Option<Arc<ScriptSet>>,
    pub running: Option<bool>,
    pub playback_rate: Option<f64>,
    pub pause_fill: Option<bool>,
    pub latency_ms: Option<i64>,
}

impl ParameterUpdate {
    pub fn scripts(mut self, scripts: ScriptSet) -> Self {
        self.scripts = Some(Arc::new(scripts));
        self
    }

    pub fn running(mut self, running: bool) -> Self {
        self.running = Some(running);
        self
    }

    pub fn playback_rate(mut self, rate: f64) -> Self {
        self.playback_rate = Some(rate);
        self
    }

    pub fn pause_fill(mut self, enabled: bool) -> Self {
        self.pause_fill = Some(enabled);
        self
    }

    pub fn latency_ms(mut self, latency: i64) -> Self {
        self.latency_ms = Some(latency);
        self
    }
}

/// Output of one planning pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TickPlan {
    pub command: Option<MotionCommand>,
    pub proposed_delay_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatus {
    pub parameters: PlayerParameters,
    pub skew_ms: i64,
    pub last_media_ms: Option<i64>,
    pub axes: Vec<Axis>,
    pub cursors: AxisMap<usize>,
    pub position: AxisMap<f64>,
    pub pause_fill: PauseFill,
    pub scheduler: SchedulerStats,
}

pub struct ScriptPlayer {
    params: PlayerParameters,
    scripts: Arc<ScriptSet>,
    clock: ClockSync,
    cursors: AxisMap<AxisCursor>,
    pause_fill: PauseFill,
    position: AxisMap<f64>,
    scheduler: TickScheduler,
}

impl ScriptPlayer {
    pub fn new(params: PlayerParameters) -> Self {
        Self {
            params,
            scripts: Arc::new(ScriptSet::new()),
            clock: ClockSync::new(),
            cursors: AxisMap::new(),
            pause_fill: PauseFill::default(),
            position: neutral_position(),
            scheduler: TickScheduler::new("script player"),
        }
    }

    pub fn parameters(&self) -> &PlayerParameters {
        &self.params
    }

    pub fn apply(&mut self, update: ParameterUpdate) {
        if let Some(scripts) = update.scripts {
            tracing::info!(
                "Scripts loaded for {} axes ({} ms)",
                scripts.len(),
                scripts.duration_ms()
            );
            self.cursors = scripts.axes().map(|axis| (axis, AxisCursor::new())).collect();
            self.position = neutral_position();
            self.pause_fill.reset();
            self.scripts = scripts;
        }
        if let Some(running) = update.running {
            if running != self.params.running {
                tracing::info!("Script playback {}", if running { "started" } else { "stopped" });
            }
            self.params.running = running;
        }
        if let Some(rate) = update.playback_rate {
            if rate > 0.0 {
                self.params.playback_rate = rate;
            } else {
                tracing::warn!("Ignoring non-positive playback rate {}", rate);
            }
        }
        if let Some(enabled) = update.pause_fill {
            self.params.pause_fill = enabled;
            if !enabled {
                self.pause_fill.reset();
            }
        }
        if let Some(latency) = update.latency_ms {
            self.params.latency_ms = latency;
        }
    }

    /// Fold a media clock sample taken at local time `local_now`.
    pub fn report_clock(&mut self, media_ms: f64, local_now: i64) -> SyncOutcome {
        let outcome = self.clock.report(media_ms, local_now);
        tracing::trace!(
            "smoothed time: {}, skew: {}",
            self.clock.corrected_now(local_now),
            self.clock.skew()
        );
        outcome
    }

    /// Look-ahead window for a tick at local time `local_now`.
    pub fn window(&self, local_now: i64) -> PlanningWindow {
        let rate = self.params.playback_rate;
        let width = self.params.time_window_ms * rate;
        let start = self.clock.corrected_now(local_now) as f64 - self.params.latency_ms as f64 * rate + width;
        PlanningWindow::new(start, width).with_rate(rate)
    }

    /// Plan one tick: the command to send and the proposed delay to the next tick.
    pub fn plan(&mut self, local_now: i64) -> TickPlan {
        if !self.params.running {
            return TickPlan {
                command: None,
                proposed_delay_ms: self.params.time_window_ms,
            };
        }

        let window = self.window(local_now);
        let mut next_delay = window.width;
        let last_primary = self.position.get(Axis::PRIMARY).copied().unwrap_or(NEUTRAL_POSITION);
        self.position.clear();
        self.position.insert(Axis::PRIMARY, last_primary);
        let mut intervals: AxisMap<Duration> = AxisMap::new();

        let scripts = self.scripts.clone();
        for (axis, script) in scripts.iter() {
            if self.cursors.get(axis).is_none() {
                self.cursors.insert(axis, AxisCursor::new());
            }
            let Some(cursor) = self.cursors.get_mut(axis) else {
                continue;
            };
            let sample = match cursor.evaluate(axis, script, window) {
                Ok(Some(sample)) => sample,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("{}: skipping axis this tick: {}", axis, e);
                    continue;
                }
            };

            let mut value = sample.value;
            let mut interval_ms = sample.interval_ms;
            next_delay = next_delay.min(sample.proposed_delay_ms);

            if axis == Axis::PRIMARY && self.params.pause_fill {
                let (filled, effect) = self.pause_fill.apply(value, window.start, last_primary);
                value = filled;
                if effect == FillEffect::Oscillating {
                    interval_ms = self.params.time_window_ms;
                }
            }

            self.position.insert(axis, value.floor());
            intervals.insert(axis, duration_from_ms(interval_ms));
        }

        let default_interval = duration_from_ms(self.params.time_window_ms);
        for axis in self.position.axes() {
            if !intervals.contains(axis) {
                intervals.insert(axis, default_interval);
            }
        }

        TickPlan {
            command: Some(MotionCommand::new(
                self.position.clone(),
                Interval::PerAxis(intervals),
            )),
            proposed_delay_ms: next_delay,
        }
    }

    /// Close the tick out with its measured cost; returns the delay to the next tick.
    pub fn finish_tick(&mut self, proposed_delay_ms: f64, elapsed: Duration) -> Duration {
        self.scheduler.finish(proposed_delay_ms, elapsed).delay()
    }

    pub fn status(&self) -> PlayerStatus {
        PlayerStatus {
            parameters: self.params.clone(),
            skew_ms: self.clock.skew(),
            last_media_ms: self.clock.last_media_ms(),
            axes: self.scripts.axes().collect(),
            cursors: self.cursors.map(|_, cursor| cursor.prev_offset()),
            position: self.position.clone(),
            pause_fill: self.pause_fill,
            scheduler: self.scheduler.stats().clone(),
        }
    }
}

fn neutral_position() -> AxisMap<f64> {
    [(Axis::PRIMARY, NEUTRAL_POSITION)].into_iter().collect()
}

/// Messages accepted by the script player task.
#[derive(Debug)]
pub enum PlayerRequest {
    SetParameters(ParameterUpdate),
    ReportClockPosition(f64),
    Status {
        respond_to: oneshot::Sender<PlayerStatus>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct ScriptPlayerHandle {
    tx: mpsc::Sender<PlayerRequest>,
}

impl ScriptPlayerHandle {
    pub async fn set_parameters(&self, update: ParameterUpdate) -> bool {
        self.tx.send(PlayerRequest::SetParameters(update)).await.is_ok()
    }

    /// Push a media clock sample. Dropped when the player is busy or gone.
    pub fn report_clock_position(&self, media_ms: f64) {
        if let Err(e) = self.tx.try_send(PlayerRequest::ReportClockPosition(media_ms)) {
            tracing::debug!("Clock report dropped: {}", e);
        }
    }

    pub async fn status(&self) -> Option<PlayerStatus> {
        let (respond_to, response) = oneshot::channel();
        self.tx.send(PlayerRequest::Status { respond_to }).await.ok()?;
        response.await.ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(PlayerRequest::Shutdown).await;
    }
}

/// Run `player` as a task feeding `output`, reading local time from `time`.
pub fn spawn(
    player: ScriptPlayer,
    output: OutputHandle,
    time: Arc<dyn TimeInterface>,
) -> (ScriptPlayerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(64);
    let task = tokio::spawn(run(player, rx, output, time));
    (ScriptPlayerHandle { tx }, task)
}

async fn run(
    mut player: ScriptPlayer,
    mut rx: mpsc::Receiver<PlayerRequest>,
    output: OutputHandle,
    time: Arc<dyn TimeInterface>,
) {
    let mut next_tick = Instant::now() + FIRST_TICK_DELAY;
    loop {
        tokio::select! {
            request = rx.recv() => match request {
                Some(PlayerRequest::SetParameters(update)) => player.apply(update),
                Some(PlayerRequest::ReportClockPosition(media_ms)) => {
                    player.report_clock(media_ms, time.now_ms());
                }
                Some(PlayerRequest::Status { respond_to }) => {
                    let _ = respond_to.send(player.status());
                }
                Some(PlayerRequest::Shutdown) | None => break,
            },
            _ = tokio::time::sleep_until(next_tick) => {
                let started = Instant::now();
                let plan = player.plan(time.now_ms());
                if let Some(command) = plan.command {
                    output.dispatch(command);
                }
                next_tick = Instant::now() + player.finish_tick(plan.proposed_delay_ms, started.elapsed());
            }
        }
    }
    tracing::debug!("Script player stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{Keyframe, MotionScript};

    fn linear_set() -> ScriptSet {
        let mut set = ScriptSet::new();
        set.insert(
            Axis::L0,
            MotionScript::new(vec![Keyframe::new(0, 0.0), Keyframe::new(10_000, 100.0)], false),
        );
        set
    }

    fn running_player(set: ScriptSet) -> ScriptPlayer {
        let mut player = ScriptPlayer::new(PlayerParameters::default());
        player.apply(ParameterUpdate::default().scripts(set).running(true));
        player
    }

    #[test]
    fn test_stopped_player_only_reschedules() {
        let mut player = ScriptPlayer::new(PlayerParameters::default());
        let plan = player.plan(1000);
        assert!(plan.command.is_none());
        assert_eq!(plan.proposed_delay_ms, 150.0);
    }

    #[test]
    fn test_window_projection() {
        let mut player = running_player(linear_set());
        player.report_clock(1000.0, 5000);
        player.apply(ParameterUpdate::default().latency_ms(40));
        let window = player.window(5100);
        // media now 1100, minus latency, plus one window
        assert_eq!(window.start, 1100.0 - 40.0 + 150.0);
        assert_eq!(window.width, 150.0);

        player.apply(ParameterUpdate::default().playback_rate(2.0));
        let window = player.window(5100);
        assert_eq!(window.width, 300.0);
        assert_eq!(window.start, 1100.0 - 80.0 + 300.0);
    }

    #[test]
    fn test_plan_interpolates_primary_axis() {
        let mut player = running_player(linear_set());
        player.report_clock(4700.0, 10_000);
        let plan = player.plan(10_000);
        let command = plan.command.unwrap();
        // window ends at 4700 + 150 + 150 = 5000 -> midpoint
        assert_eq!(command.values.get(Axis::L0), Some(&500.0));
        assert_eq!(
            command.interval.for_axis(Axis::L0),
            Some(Duration::from_millis(150))
        );
        assert_eq!(plan.proposed_delay_ms, 150.0);
    }

    #[test]
    fn test_secondary_axis_snaps_and_shortens_delay() {
        let mut set = linear_set();
        set.insert(
            Axis::R0,
            MotionScript::new(
                vec![Keyframe::new(0, 0.0), Keyframe::new(1240, 80.0), Keyframe::new(3000, 0.0)],
                false,
            ),
        );
        let mut player = running_player(set);
        player.report_clock(1000.0, 2000);
        let plan = player.plan(2000);
        let command = plan.command.unwrap();
        // window starts at 1150, keyframe at 1240 is inside it
        assert_eq!(command.values.get(Axis::R0), Some(&800.0));
        assert_eq!(command.interval.for_axis(Axis::R0), Some(Duration::from_millis(90)));
        assert_eq!(plan.proposed_delay_ms, 92.0);
        assert!(command.values.contains(Axis::L0));
    }

    #[test]
    fn test_tick_after_snap_lands_past_the_keyframe() {
        let mut set = linear_set();
        set.insert(
            Axis::R0,
            MotionScript::new(
                vec![Keyframe::new(0, 0.0), Keyframe::new(1240, 80.0), Keyframe::new(3000, 0.0)],
                false,
            ),
        );
        let mut player = running_player(set);
        player.report_clock(1000.0, 2000);
        let first = player.plan(2000);
        assert_eq!(first.command.unwrap().values.get(Axis::R0), Some(&800.0));

        let delay = player.finish_tick(first.proposed_delay_ms, Duration::from_micros(50));
        assert_eq!(delay, Duration::from_millis(91));

        // window now starts at 1241, one past the keyframe
        let second = player.plan(2000 + delay.as_millis() as i64);
        let command = second.command.unwrap();
        let r0 = *command.values.get(Axis::R0).unwrap();
        assert!(r0 < 800.0, "R0 repeated the keyframe: {}", r0);
        assert_eq!(command.interval.for_axis(Axis::R0), Some(Duration::from_millis(150)));
        assert_eq!(player.status().cursors.get(Axis::R0), Some(&1));
    }

    #[test]
    fn test_snapped_interval_follows_playback_rate() {
        let mut set = linear_set();
        set.insert(
            Axis::R0,
            MotionScript::new(
                vec![Keyframe::new(0, 0.0), Keyframe::new(1450, 80.0), Keyframe::new(3000, 0.0)],
                false,
            ),
        );
        let mut player = running_player(set);
        player.apply(ParameterUpdate::default().playback_rate(2.0));
        player.report_clock(1000.0, 2000);
        let plan = player.plan(2000);
        let command = plan.command.unwrap();
        // window starts at 1300 and is 300 media ms wide
        assert_eq!(command.values.get(Axis::R0), Some(&800.0));
        assert_eq!(command.interval.for_axis(Axis::R0), Some(Duration::from_millis(300)));
        // the primary window is no longer than the snap
        assert_eq!(plan.proposed_delay_ms, 300.0);
    }

    #[test]
    fn test_empty_axis_is_skipped() {
        let mut set = linear_set();
        set.insert(Axis::R0, MotionScript::default());
        let mut player = running_player(set);
        player.report_clock(4700.0, 10_000);
        let plan = player.plan(10_000);
        let command = plan.command.unwrap();
        assert_eq!(command.values.get(Axis::L0), Some(&500.0));
        assert!(!command.values.contains(Axis::R0));
        assert_eq!(plan.proposed_delay_ms, 150.0);
    }

    #[test]
    fn test_primary_axis_holds_without_script() {
        let mut set = ScriptSet::new();
        set.insert(
            Axis::R1,
            MotionScript::new(vec![Keyframe::new(0, 0.0), Keyframe::new(10_000, 100.0)], false),
        );
        let mut player = running_player(set);
        player.report_clock(0.0, 0);
        let command = player.plan(0).command.unwrap();
        assert_eq!(command.values.get(Axis::L0), Some(&NEUTRAL_POSITION));
        assert_eq!(
            command.interval.for_axis(Axis::L0),
            Some(Duration::from_millis(150))
        );
        assert!(command.values.contains(Axis::R1));
    }

    #[test]
    fn test_ended_script_holds_last_value() {
        let mut set = linear_set();
        set.insert(
            Axis::R0,
            MotionScript::new(vec![Keyframe::new(0, 0.0), Keyframe::new(100, 100.0)], false),
        );
        let mut player = running_player(set);
        player.report_clock(5000.0, 5000);
        let command = player.plan(5000).command.unwrap();
        assert!(!command.values.contains(Axis::R0));
        assert!(command.values.contains(Axis::L0));
    }

    #[test]
    fn test_new_scripts_reset_cursors_and_position() {
        let mut player = running_player(linear_set());
        player.report_clock(8000.0, 8000);
        player.plan(8000);
        assert!(player.status().position.get(Axis::L0).copied().unwrap_or(0.0) > 700.0);
        assert!(player.status().cursors.get(Axis::L0).is_some());

        player.apply(ParameterUpdate::default().scripts(linear_set()));
        let status = player.status();
        assert_eq!(status.position.get(Axis::L0), Some(&NEUTRAL_POSITION));
        assert_eq!(status.cursors.get(Axis::L0), Some(&0));
    }

    #[test]
    fn test_pause_fill_oscillates_long_high_holds() {
        let mut set = ScriptSet::new();
        set.insert(
            Axis::L0,
            MotionScript::new(vec![Keyframe::new(0, 95.0), Keyframe::new(60_000, 95.0)], false),
        );
        let mut player = running_player(set);
        player.apply(ParameterUpdate::default().pause_fill(true));
        player.report_clock(0.0, 0);

        let mut t = 0;
        let mut values = Vec::new();
        while t < 8000 {
            let command = player.plan(t).command.unwrap();
            values.push(*command.values.get(Axis::L0).unwrap());
            t += 150;
        }
        // first ~2 s hold the script value, then oscillate inside [0, 800]
        assert_eq!(values[0], 950.0);
        let tail = &values[20..];
        assert!(tail.iter().all(|v| (0.0..=800.0).contains(v)));
        assert!(tail.windows(2).any(|w| w[0] != w[1]));
    }
}
