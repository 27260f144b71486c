// src/stroke.rs - Random stroke generator and queue feeder
//!
//! A [`StrokePattern`] is a short list of waypoints. The generator samples an
//! eased path from wherever the last job ended through the waypoints of the
//! chosen pattern, one destination per `step_ms`, and packages it as a
//! [`StrokeJob`]. The feeder task enqueues a new job every time the stroke
//! player asks for more material.

use crate::axis::{Axis, AxisMap};
use crate::config::StrokeConfig;
use crate::output::ChannelState;
use crate::player::{StrokeJob, StrokePlayerHandle};
use futures_util::StreamExt;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Assumed value for an axis that has never been commanded.
pub const DEFAULT_START: f64 = 500.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    pub targets: AxisMap<f64>,
    /// Time to reach `targets` at 100% speed.
    pub duration_ms: f64,
}

impl Waypoint {
    pub fn new(targets: &[(Axis, f64)], duration_ms: f64) -> Self {
        Self {
            targets: targets.iter().copied().collect(),
            duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrokePattern {
    pub name: String,
    pub waypoints: Vec<Waypoint>,
    pub enabled: bool,
}

impl StrokePattern {
    pub fn new(name: &str, waypoints: Vec<Waypoint>) -> Self {
        Self {
            name: name.to_string(),
            waypoints,
            enabled: true,
        }
    }
}

pub fn builtin_patterns() -> Vec<StrokePattern> {
    vec![
        StrokePattern::new(
            "full stroke",
            vec![
                Waypoint::new(&[(Axis::L0, 0.0)], 600.0),
                Waypoint::new(&[(Axis::L0, 1000.0)], 600.0),
            ],
        ),
        StrokePattern::new(
            "short top",
            vec![
                Waypoint::new(&[(Axis::L0, 600.0)], 300.0),
                Waypoint::new(&[(Axis::L0, 1000.0)], 300.0),
                Waypoint::new(&[(Axis::L0, 600.0)], 300.0),
                Waypoint::new(&[(Axis::L0, 1000.0)], 300.0),
            ],
        ),
        StrokePattern::new(
            "short bottom",
            vec![
                Waypoint::new(&[(Axis::L0, 400.0)], 300.0),
                Waypoint::new(&[(Axis::L0, 0.0)], 300.0),
                Waypoint::new(&[(Axis::L0, 400.0)], 300.0),
                Waypoint::new(&[(Axis::L0, 0.0)], 300.0),
            ],
        ),
        StrokePattern::new(
            "twist stroke",
            vec![
                Waypoint::new(&[(Axis::L0, 0.0), (Axis::R0, 200.0)], 700.0),
                Waypoint::new(&[(Axis::L0, 1000.0), (Axis::R0, 800.0)], 700.0),
            ],
        ),
        StrokePattern::new(
            "pulse",
            vec![
                Waypoint::new(&[(Axis::L0, 450.0), (Axis::V0, 800.0)], 200.0),
                Waypoint::new(&[(Axis::L0, 550.0), (Axis::V0, 0.0)], 200.0),
                Waypoint::new(&[(Axis::L0, 450.0), (Axis::V0, 800.0)], 200.0),
                Waypoint::new(&[(Axis::L0, 550.0), (Axis::V0, 0.0)], 200.0),
            ],
        ),
    ]
}

/// Cosine ease-in-out on `0..=1`.
pub fn ease(t: f64) -> f64 {
    (1.0 - (PI * t.clamp(0.0, 1.0)).cos()) / 2.0
}

/// Sample the eased path from `start` through `waypoints`, one destination per `step_ms`.
/// Each destination holds only the axes of the waypoint being approached.
pub fn sample_path(start: &AxisMap<f64>, waypoints: &[Waypoint], step_ms: u64, speed: u32) -> Vec<AxisMap<f64>> {
    let step = step_ms.max(1) as f64;
    let scale = 100.0 / speed.max(1) as f64;
    let mut current = start.clone();
    let mut actions = Vec::new();
    for waypoint in waypoints {
        let duration = waypoint.duration_ms * scale;
        let steps = (duration / step).ceil().max(1.0) as usize;
        let from = waypoint
            .targets
            .map(|axis, _| current.get(axis).copied().unwrap_or(DEFAULT_START));
        for i in 1..=steps {
            let eased = ease(i as f64 / steps as f64);
            actions.push(waypoint.targets.map(|axis, to| {
                let from = from.get(axis).copied().unwrap_or(DEFAULT_START);
                (from + (to - from) * eased).clamp(0.0, 1000.0)
            }));
        }
        current.merge(&waypoint.targets);
    }
    actions
}

pub struct StrokeGenerator {
    patterns: Vec<StrokePattern>,
    current: Option<usize>,
    last_target: AxisMap<f64>,
    step_ms: u64,
    speed: u32,
    randomness: u32,
    rng: StdRng,
}

impl StrokeGenerator {
    pub fn new(config: &StrokeConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    pub fn with_seed(config: &StrokeConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &StrokeConfig, rng: StdRng) -> Self {
        Self {
            patterns: builtin_patterns(),
            current: None,
            last_target: AxisMap::new(),
            step_ms: config.step_ms,
            speed: config.speed,
            randomness: config.randomness,
            rng,
        }
    }

    pub fn patterns(&self) -> &[StrokePattern] {
        &self.patterns
    }

    /// Returns false when no pattern has that name.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.patterns.iter_mut().find(|p| p.name == name) {
            Some(pattern) => {
                pattern.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn set_speed(&mut self, speed: u32) {
        self.speed = speed.max(1);
    }

    pub fn set_randomness(&mut self, randomness: u32) {
        self.randomness = randomness.min(100);
    }

    /// Position the next job starts from.
    pub fn set_last_target(&mut self, target: AxisMap<f64>) {
        self.last_target = target;
    }

    pub fn last_target(&self) -> &AxisMap<f64> {
        &self.last_target
    }

    fn choose_pattern(&mut self) -> Option<usize> {
        let current_enabled = self
            .current
            .is_some_and(|i| self.patterns.get(i).is_some_and(|p| p.enabled));
        let switch = !current_enabled || self.rng.random_range(0..100) < self.randomness;
        if !switch {
            return self.current;
        }
        let enabled: Vec<usize> = self
            .patterns
            .iter()
            .enumerate()
            .filter(|(_, p)| p.enabled)
            .map(|(i, _)| i)
            .collect();
        let chosen = enabled.choose(&mut self.rng).copied();
        self.current = chosen;
        chosen
    }

    /// Build the next job. `None` when every pattern is disabled.
    pub fn next_job(&mut self) -> Option<StrokeJob> {
        let index = self.choose_pattern()?;
        let pattern = self.patterns.get(index)?;
        let actions = sample_path(&self.last_target, &pattern.waypoints, self.step_ms, self.speed);
        if let Some(last) = actions.last() {
            self.last_target.merge(last);
        }
        Some(StrokeJob::new(pattern.name.clone(), self.step_ms, self.speed, actions))
    }
}

/// Enqueue a new job whenever the player requests a refill while the output
/// is connected. Ends when the player's progress channel closes.
pub fn spawn_feeder(
    mut generator: StrokeGenerator,
    player: StrokePlayerHandle,
    output_state: watch::Receiver<ChannelState>,
) -> JoinHandle<()> {
    let updates = player.progress_stream();
    tokio::spawn(async move {
        let mut updates = std::pin::pin!(updates);
        while let Some(update) = updates.next().await {
            if !update.refill_requested {
                continue;
            }
            if *output_state.borrow() != ChannelState::Connected {
                tracing::debug!("Refill requested while disconnected, skipping");
                continue;
            }
            let Some(job) = generator.next_job() else {
                tracing::warn!("No stroke patterns enabled");
                continue;
            };
            tracing::info!("Next stroke: {} ({}ms)", job.name, job.remaining_ms());
            if !player.enqueue(job).await {
                break;
            }
        }
        tracing::debug!("Stroke feeder stopped");
    })
}
