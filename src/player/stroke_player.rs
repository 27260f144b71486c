// src/player/stroke_player.rs - Queue player for procedurally generated strokes
//!
//! Jobs are consumed one destination per tick, `step_ms` apart. When the head
//! job gets close to running dry a single refill request goes out with the
//! progress notification so a producer can enqueue the next job in time.

use crate::axis::AxisMap;
use crate::config::StrokeConfig;
use crate::output::OutputHandle;
use crate::scheduler::{SchedulerStats, TickScheduler, TimeInterface};
use crate::tcode::{Interval, MotionCommand};
use futures_core::Stream;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// Tick period while idle.
pub const IDLE_DELAY_MS: u64 = 250;
const PROGRESS_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct StrokeJob {
    pub id: Uuid,
    pub name: String,
    pub step_ms: u64,
    pub speed: u32,
    pub actions: VecDeque<AxisMap<f64>>,
    refill_requested: bool,
}

impl StrokeJob {
    pub fn new(name: impl Into<String>, step_ms: u64, speed: u32, actions: Vec<AxisMap<f64>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            step_ms: step_ms.max(1),
            speed,
            actions: actions.into(),
            refill_requested: false,
        }
    }

    pub fn remaining_ms(&self) -> u64 {
        self.actions.len() as u64 * self.step_ms
    }

    pub fn refill_requested(&self) -> bool {
        self.refill_requested
    }
}

/// Progress notification for whoever keeps the queue fed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub remaining_ms: u64,
    pub name: String,
    pub refill_requested: bool,
}

impl ProgressUpdate {
    pub fn idle(running: bool) -> Self {
        Self {
            remaining_ms: 0,
            name: String::new(),
            refill_requested: running,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub command: Option<MotionCommand>,
    pub progress: Option<ProgressUpdate>,
    pub proposed_delay_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub running: bool,
    pub jobs: usize,
    pub current: Option<String>,
    pub remaining_ms: u64,
    pub scheduler: SchedulerStats,
}

/// FIFO of jobs plus the refill and progress bookkeeping.
#[derive(Debug)]
pub struct StrokeQueue {
    jobs: VecDeque<StrokeJob>,
    running: bool,
    refill_threshold_ms: u64,
    progress_interval_ms: i64,
    last_progress: Option<i64>,
}

impl StrokeQueue {
    pub fn new(refill_threshold_ms: u64, progress_interval_ms: u64) -> Self {
        Self {
            jobs: VecDeque::new(),
            running: false,
            refill_threshold_ms,
            progress_interval_ms: progress_interval_ms as i64,
            last_progress: None,
        }
    }

    pub fn from_config(config: &StrokeConfig) -> Self {
        Self::new(config.refill_threshold_ms, config.progress_interval_ms)
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn enqueue(&mut self, job: StrokeJob) {
        self.jobs.push_back(job);
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn front(&self) -> Option<&StrokeJob> {
        self.jobs.front()
    }

    /// Consume one step at local time `now_ms`.
    pub fn step(&mut self, now_ms: i64) -> StepOutcome {
        while let Some(job) = self.jobs.front() {
            if !job.actions.is_empty() {
                break;
            }
            tracing::debug!("Dropping empty stroke job '{}'", job.name);
            self.jobs.pop_front();
        }

        if !self.running {
            return self.idle();
        }
        let refill_threshold_ms = self.refill_threshold_ms;
        let Some(job) = self.jobs.front_mut() else {
            return self.idle();
        };
        let Some(destination) = job.actions.pop_front() else {
            return self.idle();
        };
        let remaining_ms = job.remaining_ms();
        let request_refill = remaining_ms < refill_threshold_ms && !job.refill_requested;
        if request_refill {
            job.refill_requested = true;
        }
        let job_name = job.name.clone();
        let step_ms = job.step_ms;
        let finished = job.actions.is_empty();

        if finished {
            self.jobs.pop_front();
        }

        let progress_due = match self.last_progress {
            Some(last) => now_ms - last > self.progress_interval_ms,
            None => true,
        };
        let progress = if progress_due || request_refill {
            self.last_progress = Some(now_ms);
            Some(ProgressUpdate {
                remaining_ms,
                name: job_name,
                refill_requested: request_refill,
            })
        } else {
            None
        };

        StepOutcome {
            command: Some(MotionCommand::new(
                destination,
                Interval::Uniform(Duration::from_millis(step_ms)),
            )),
            progress,
            proposed_delay_ms: step_ms as f64,
        }
    }

    fn idle(&self) -> StepOutcome {
        StepOutcome {
            command: None,
            progress: Some(ProgressUpdate::idle(self.running)),
            proposed_delay_ms: IDLE_DELAY_MS as f64,
        }
    }
}

/// Messages accepted by the stroke player task.
#[derive(Debug)]
pub enum StrokeRequest {
    SetRunning(bool),
    Enqueue(StrokeJob),
    Clear,
    Status {
        respond_to: oneshot::Sender<QueueStatus>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct StrokePlayerHandle {
    tx: mpsc::Sender<StrokeRequest>,
    progress: broadcast::Sender<ProgressUpdate>,
}

impl StrokePlayerHandle {
    /// Start or stop playback. Also asks the output channel to smooth the switch.
    pub async fn set_running(&self, running: bool) -> bool {
        self.tx.send(StrokeRequest::SetRunning(running)).await.is_ok()
    }

    pub async fn enqueue(&self, job: StrokeJob) -> bool {
        self.tx.send(StrokeRequest::Enqueue(job)).await.is_ok()
    }

    pub async fn clear(&self) -> bool {
        self.tx.send(StrokeRequest::Clear).await.is_ok()
    }

    pub async fn status(&self) -> Option<QueueStatus> {
        let (respond_to, response) = oneshot::channel();
        self.tx.send(StrokeRequest::Status { respond_to }).await.ok()?;
        response.await.ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(StrokeRequest::Shutdown).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.progress.subscribe()
    }

    pub fn progress_stream(&self) -> impl Stream<Item = ProgressUpdate> + use<> {
        progress_stream(self.subscribe())
    }
}

/// Turn a progress subscription into a stream. Lagged updates are skipped.
pub fn progress_stream(
    mut rx: broadcast::Receiver<ProgressUpdate>,
) -> impl Stream<Item = ProgressUpdate> {
    async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(update) => yield update,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Progress subscriber lagged by {} updates", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

pub fn spawn(
    queue: StrokeQueue,
    output: OutputHandle,
    time: Arc<dyn TimeInterface>,
) -> (StrokePlayerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(64);
    let (progress, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
    let task = tokio::spawn(run(queue, rx, progress.clone(), output, time));
    (StrokePlayerHandle { tx, progress }, task)
}

async fn run(
    mut queue: StrokeQueue,
    mut rx: mpsc::Receiver<StrokeRequest>,
    progress: broadcast::Sender<ProgressUpdate>,
    output: OutputHandle,
    time: Arc<dyn TimeInterface>,
) {
    let mut scheduler = TickScheduler::new("stroke player");
    let mut next_tick = Instant::now() + Duration::from_millis(10);
    loop {
        tokio::select! {
            request = rx.recv() => match request {
                Some(StrokeRequest::SetRunning(running)) => {
                    tracing::info!("Stroke playback {}", if running { "started" } else { "stopped" });
                    queue.set_running(running);
                    if let Err(e) = output.enable_temp_smoothing().await {
                        tracing::warn!("Could not enable smoothing: {}", e);
                    }
                }
                Some(StrokeRequest::Enqueue(job)) => {
                    tracing::debug!(
                        "Enqueued stroke '{}' ({} steps of {}ms)",
                        job.name,
                        job.actions.len(),
                        job.step_ms
                    );
                    queue.enqueue(job);
                }
                Some(StrokeRequest::Clear) => queue.clear(),
                Some(StrokeRequest::Status { respond_to }) => {
                    let _ = respond_to.send(QueueStatus {
                        running: queue.is_running(),
                        jobs: queue.len(),
                        current: queue.front().map(|job| job.name.clone()),
                        remaining_ms: queue.front().map(StrokeJob::remaining_ms).unwrap_or(0),
                        scheduler: scheduler.stats().clone(),
                    });
                }
                Some(StrokeRequest::Shutdown) | None => break,
            },
            _ = tokio::time::sleep_until(next_tick) => {
                let started = Instant::now();
                let outcome = queue.step(time.now_ms());
                if let Some(command) = outcome.command {
                    output.dispatch(command);
                }
                if let Some(update) = outcome.progress {
                    // no subscribers is fine
                    let _ = progress.send(update);
                }
                let decision = scheduler.finish(outcome.proposed_delay_ms, started.elapsed());
                next_tick = Instant::now() + decision.delay();
            }
        }
    }
    tracing::debug!("Stroke player stopped");
}
