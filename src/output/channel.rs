// src/output/channel.rs - Output channel actor: connection lifecycle and frame dispatch
//!
//! The channel is the single owner of the device connection. Producers talk
//! to it through a cloneable [`OutputHandle`]; every command goes through the
//! same encoder and, when connected, the same writer task.
//!
//! Teardown always runs in the same order: cancel the reader, wait for it,
//! close the writer queue, wait for it to flush, then close the port.

use super::transport::{Connector, Transport, TransportError};
use crate::axis::{Axis, AxisMap};
use crate::tcode::{Encoder, Interval, MotionCommand, OutputRange};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Request queue depth between producers and the channel.
pub const REQUEST_QUEUE_DEPTH: usize = 64;
/// How long the writer gets to flush on disconnect.
pub const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);
/// Interval used for the neutral position sent before disconnecting.
pub const PARK_INTERVAL: Duration = Duration::from_secs(1);
/// Axes moved to their midpoint when parking.
pub const PARK_AXES: [Axis; 6] = [Axis::L0, Axis::L1, Axis::L2, Axis::R0, Axis::R1, Axis::R2];

const READ_BUFFER_SIZE: usize = 256;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Output channel is no longer running")]
    ActorGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub transport_errors: u64,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub park_on_disconnect: bool,
    pub smoothing: Duration,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            park_on_disconnect: true,
            smoothing: Duration::from_secs(1),
        }
    }
}

impl From<&crate::config::OutputConfig> for OutputSettings {
    fn from(config: &crate::config::OutputConfig) -> Self {
        Self {
            park_on_disconnect: config.park_on_disconnect,
            smoothing: config.smoothing(),
        }
    }
}

/// Messages accepted by the output channel.
#[derive(Debug)]
pub enum OutputRequest {
    Connect {
        respond_to: oneshot::Sender<Result<(), OutputError>>,
    },
    Disconnect {
        respond_to: oneshot::Sender<()>,
    },
    Dispatch(MotionCommand),
    SetOutputRange(OutputRange),
    EnableTempSmoothing,
    GetStats {
        respond_to: oneshot::Sender<OutputStats>,
    },
    Shutdown,
}

/// Sent by the reader or writer task of connection `generation`. Travels on
/// its own unbounded queue so a busy request queue can never swallow it.
#[derive(Debug)]
struct TransportFailure {
    generation: u64,
    reason: String,
}

/// Neutral target: every parked axis at its midpoint.
pub fn park_command() -> MotionCommand {
    MotionCommand::new(
        PARK_AXES.iter().map(|axis| (*axis, 500.0)).collect(),
        Interval::Uniform(PARK_INTERVAL),
    )
}

/// Cloneable front end of the output channel.
#[derive(Clone)]
pub struct OutputHandle {
    tx: mpsc::Sender<OutputRequest>,
    state: watch::Receiver<ChannelState>,
    target: watch::Receiver<AxisMap<f64>>,
}

impl OutputHandle {
    /// Fire-and-forget. Dropped with a warning when the request queue is full.
    pub fn dispatch(&self, command: MotionCommand) {
        match self.tx.try_send(OutputRequest::Dispatch(command)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Output queue full, dropping command");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Output channel gone, dropping command");
            }
        }
    }

    pub async fn connect(&self) -> Result<(), OutputError> {
        let (respond_to, response) = oneshot::channel();
        self.send(OutputRequest::Connect { respond_to }).await?;
        response.await.map_err(|_| OutputError::ActorGone)?
    }

    /// Gracefully disconnect. Completes once the port is released.
    pub async fn disconnect(&self) -> Result<(), OutputError> {
        let (respond_to, response) = oneshot::channel();
        self.send(OutputRequest::Disconnect { respond_to }).await?;
        response.await.map_err(|_| OutputError::ActorGone)
    }

    pub async fn set_output_range(&self, range: OutputRange) -> Result<(), OutputError> {
        self.send(OutputRequest::SetOutputRange(range)).await
    }

    pub async fn enable_temp_smoothing(&self) -> Result<(), OutputError> {
        self.send(OutputRequest::EnableTempSmoothing).await
    }

    pub async fn stats(&self) -> Result<OutputStats, OutputError> {
        let (respond_to, response) = oneshot::channel();
        self.send(OutputRequest::GetStats { respond_to }).await?;
        response.await.map_err(|_| OutputError::ActorGone)
    }

    /// Disconnect if needed and stop the channel task.
    pub async fn shutdown(&self) -> Result<(), OutputError> {
        self.send(OutputRequest::Shutdown).await
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Merged last-dispatched raw destination per axis.
    pub fn target(&self) -> AxisMap<f64> {
        self.target.borrow().clone()
    }

    pub fn subscribe_target(&self) -> watch::Receiver<AxisMap<f64>> {
        self.target.clone()
    }

    async fn send(&self, request: OutputRequest) -> Result<(), OutputError> {
        self.tx.send(request).await.map_err(|_| OutputError::ActorGone)
    }
}

/// Resources held while connected. Dropping aborts whatever tasks are left,
/// so an interrupted teardown never leaks a reader or writer.
struct Connection {
    generation: u64,
    transport: Arc<dyn Transport>,
    reader: Option<JoinHandle<()>>,
    writer_tx: Option<mpsc::UnboundedSender<String>>,
    writer: Option<JoinHandle<()>>,
}

impl Connection {
    fn send_line(&self, line: String) -> bool {
        self.writer_tx
            .as_ref()
            .map(|tx| tx.send(line).is_ok())
            .unwrap_or(false)
    }

    async fn teardown(mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            match reader.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::warn!("Device reader ended abnormally: {}", e),
            }
        }

        if let Some(writer_tx) = self.writer_tx.take() {
            drop(writer_tx);
            if let Some(mut writer) = self.writer.take() {
                match tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut writer).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!("Device writer ended abnormally: {}", e),
                    Err(_) => {
                        tracing::warn!("Device writer did not flush within {:?}", WRITER_FLUSH_TIMEOUT);
                        writer.abort();
                    }
                }
            }
        }

        if let Err(e) = self.transport.close().await {
            tracing::warn!("Failed to close {}: {}", self.transport.name(), e);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

pub struct OutputChannel {
    connector: Arc<dyn Connector>,
    encoder: Encoder,
    settings: OutputSettings,
    connection: Option<Connection>,
    generation: u64,
    smoothing_until: Option<Instant>,
    stats: Arc<Mutex<OutputStats>>,
    state_tx: watch::Sender<ChannelState>,
    target_tx: watch::Sender<AxisMap<f64>>,
    failures: mpsc::UnboundedSender<TransportFailure>,
}

impl OutputChannel {
    /// Start the channel task.
    pub fn spawn(
        connector: Arc<dyn Connector>,
        range: OutputRange,
        settings: OutputSettings,
    ) -> (OutputHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let (target_tx, target_rx) = watch::channel(AxisMap::new());
        let (failures, failures_rx) = mpsc::unbounded_channel();
        let channel = OutputChannel {
            connector,
            encoder: Encoder::new(range),
            settings,
            connection: None,
            generation: 0,
            smoothing_until: None,
            stats: Arc::new(Mutex::new(OutputStats::default())),
            state_tx,
            target_tx,
            failures,
        };
        let task = tokio::spawn(channel.run(rx, failures_rx));
        let handle = OutputHandle {
            tx,
            state: state_rx,
            target: target_rx,
        };
        (handle, task)
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<OutputRequest>,
        mut failures: mpsc::UnboundedReceiver<TransportFailure>,
    ) {
        tracing::debug!("Output channel started ({})", self.connector.describe());
        loop {
            tokio::select! {
                request = rx.recv() => match request {
                    Some(request) => {
                        if !self.handle(request).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(failure) = failures.recv() => {
                    self.transport_failed(failure.generation, failure.reason).await;
                }
            }
        }
        self.disconnect().await;
        tracing::debug!("Output channel stopped");
    }

    /// Returns false once the channel should stop.
    async fn handle(&mut self, request: OutputRequest) -> bool {
        match request {
            OutputRequest::Connect { respond_to } => {
                let result = self.connect().await;
                let _ = respond_to.send(result);
            }
            OutputRequest::Disconnect { respond_to } => {
                self.disconnect().await;
                let _ = respond_to.send(());
            }
            OutputRequest::Dispatch(command) => self.dispatch(command).await,
            OutputRequest::SetOutputRange(range) => {
                tracing::info!("Output range updated (intensity {}%)", range.intensity);
                self.encoder.set_range(range);
            }
            OutputRequest::EnableTempSmoothing => {
                tracing::debug!("Temporary smoothing for {:?}", self.settings.smoothing);
                self.smoothing_until = Some(Instant::now() + self.settings.smoothing);
            }
            OutputRequest::GetStats { respond_to } => {
                let stats = self.stats.lock().await.clone();
                let _ = respond_to.send(stats);
            }
            OutputRequest::Shutdown => return false,
        }
        true
    }

    async fn connect(&mut self) -> Result<(), OutputError> {
        if self.connection.is_some() {
            tracing::warn!("Port already open");
            return Ok(());
        }
        self.state_tx.send_replace(ChannelState::Connecting);
        let transport = match self.connector.open().await {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!("Connecting to {} failed: {}", self.connector.describe(), e);
                self.stats.lock().await.transport_errors += 1;
                self.state_tx.send_replace(ChannelState::Disconnected);
                return Err(e.into());
            }
        };

        self.generation += 1;
        let generation = self.generation;
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(run_reader(
            transport.clone(),
            self.stats.clone(),
            self.failures.clone(),
            generation,
        ));
        let writer = tokio::spawn(run_writer(
            transport.clone(),
            writer_rx,
            self.stats.clone(),
            self.failures.clone(),
            generation,
        ));
        tracing::info!("Connected to {}", transport.name());
        self.connection = Some(Connection {
            generation,
            transport,
            reader: Some(reader),
            writer_tx: Some(writer_tx),
            writer: Some(writer),
        });
        self.state_tx.send_replace(ChannelState::Connected);
        Ok(())
    }

    async fn disconnect(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        if self.settings.park_on_disconnect {
            if let Some(frame) = self.encoder.encode(&park_command()) {
                tracing::debug!("device <- {} (park)", frame);
                connection.send_line(frame.into_line());
            }
        }
        let name = connection.transport.name().to_string();
        connection.teardown().await;
        self.state_tx.send_replace(ChannelState::Disconnected);
        tracing::info!("Disconnected from {}", name);
    }

    async fn transport_failed(&mut self, generation: u64, reason: String) {
        let current = self.connection.as_ref().map(|c| c.generation);
        if current != Some(generation) {
            tracing::debug!("Ignoring failure of stale connection {}", generation);
            return;
        }
        tracing::warn!("Device connection lost: {}", reason);
        self.stats.lock().await.transport_errors += 1;
        if let Some(connection) = self.connection.take() {
            connection.teardown().await;
        }
        self.state_tx.send_replace(ChannelState::Disconnected);
    }

    async fn dispatch(&mut self, command: MotionCommand) {
        if command.values.is_empty() {
            return;
        }
        self.target_tx.send_if_modified(|target| {
            let before = target.clone();
            target.merge(&command.values);
            *target != before
        });

        if self.connection.is_none() {
            tracing::warn!("Disconnected, skipping stream write");
            self.stats.lock().await.frames_dropped += 1;
            return;
        }

        let command = match self.smoothing_remaining() {
            Some(remaining) => MotionCommand {
                interval: command.interval.floored(&command.values, remaining),
                values: command.values,
            },
            None => command,
        };
        let Some(frame) = self.encoder.encode(&command) else {
            return;
        };
        let Some(connection) = self.connection.as_ref() else {
            return;
        };
        tracing::debug!("device <- {}", frame);
        if !connection.send_line(frame.into_line()) {
            let generation = connection.generation;
            tracing::warn!("Device writer closed, dropping frame");
            self.stats.lock().await.frames_dropped += 1;
            self.transport_failed(generation, "device writer closed".to_string()).await;
        }
    }

    fn smoothing_remaining(&mut self) -> Option<Duration> {
        let until = self.smoothing_until?;
        let now = Instant::now();
        if now >= until {
            self.smoothing_until = None;
            return None;
        }
        Some(until - now)
    }
}

fn report_failure(failures: &mpsc::UnboundedSender<TransportFailure>, generation: u64, reason: String) {
    if failures.send(TransportFailure { generation, reason }).is_err() {
        tracing::debug!("Output channel gone, transport failure not reported");
    }
}

async fn run_reader(
    transport: Arc<dyn Transport>,
    stats: Arc<Mutex<OutputStats>>,
    failures: mpsc::UnboundedSender<TransportFailure>,
    generation: u64,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match transport.read(&mut buf).await {
            Ok(0) => {
                tracing::info!("Device closed the connection");
                report_failure(&failures, generation, "device closed the connection".to_string());
                break;
            }
            Ok(n) => {
                tracing::debug!("device -> {}", String::from_utf8_lossy(&buf[..n]).trim_end());
                stats.lock().await.bytes_received += n as u64;
            }
            Err(e) => {
                tracing::error!("Device read error: {}", e);
                report_failure(&failures, generation, e.to_string());
                break;
            }
        }
    }
}

async fn run_writer(
    transport: Arc<dyn Transport>,
    mut lines: mpsc::UnboundedReceiver<String>,
    stats: Arc<Mutex<OutputStats>>,
    failures: mpsc::UnboundedSender<TransportFailure>,
    generation: u64,
) {
    while let Some(line) = lines.recv().await {
        match transport.write_all(line.as_bytes()).await {
            Ok(()) => {
                let mut stats = stats.lock().await;
                stats.frames_sent += 1;
                stats.bytes_sent += line.len() as u64;
            }
            Err(e) => {
                tracing::error!("Device write error: {}", e);
                report_failure(&failures, generation, e.to_string());
                break;
            }
        }
    }
    tracing::debug!("Device writer finished");
}
