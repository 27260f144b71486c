// src/session.rs - One playback session: output channel plus its producers
//!
//! A session owns the output channel and whichever producers were started on
//! it. Shutdown stops the producers first so nothing is dispatched after the
//! parking frame, then disconnects and stops the channel.

use crate::config::{Config, ConfigError};
use crate::output::{Connector, OutputChannel, OutputError, OutputHandle, OutputSettings, TransportError};
use crate::player::{
    PlayerParameters, ScriptPlayer, ScriptPlayerHandle, StrokePlayerHandle, StrokeQueue, script_player,
    stroke_player,
};
use crate::scheduler::{TimeInterface, TokioTimeSync};
use crate::script::ScriptError;
use crate::stroke::{StrokeGenerator, spawn_feeder};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Cadence of the stand-in media clock.
pub const MEDIA_CLOCK_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),
    #[error("Output error: {0}")]
    Output(#[from] OutputError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub struct Session {
    config: Config,
    time: Arc<dyn TimeInterface>,
    output: OutputHandle,
    output_task: JoinHandle<()>,
    script_player: Option<ScriptPlayerHandle>,
    stroke_player: Option<StrokePlayerHandle>,
    tasks: Vec<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

impl Session {
    /// Validate `config` and start the output channel on `connector`.
    pub fn start(config: Config, connector: Arc<dyn Connector>) -> Result<Self, SessionError> {
        Self::with_time(config, connector, Arc::new(TokioTimeSync::new()))
    }

    pub fn with_time(
        config: Config,
        connector: Arc<dyn Connector>,
        time: Arc<dyn TimeInterface>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let range = config.output.output_range()?;
        tracing::info!("Starting session on {}", connector.describe());
        let (output, output_task) =
            OutputChannel::spawn(connector, range, OutputSettings::from(&config.output));
        Ok(Self {
            config,
            time,
            output,
            output_task,
            script_player: None,
            stroke_player: None,
            tasks: Vec::new(),
            background: Vec::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn output(&self) -> &OutputHandle {
        &self.output
    }

    pub async fn connect(&self) -> Result<(), SessionError> {
        self.output.connect().await?;
        Ok(())
    }

    /// Start the script player, or return the one already running.
    pub fn script_player(&mut self) -> ScriptPlayerHandle {
        if let Some(handle) = &self.script_player {
            return handle.clone();
        }
        let player = ScriptPlayer::new(PlayerParameters::from(&self.config.player));
        let (handle, task) = script_player::spawn(player, self.output.clone(), self.time.clone());
        self.tasks.push(task);
        self.script_player = Some(handle.clone());
        handle
    }

    /// Start the stroke player, plus a feeder when a generator is given.
    pub fn stroke_player(&mut self, generator: Option<StrokeGenerator>) -> StrokePlayerHandle {
        if let Some(handle) = &self.stroke_player {
            return handle.clone();
        }
        let queue = StrokeQueue::from_config(&self.config.stroke);
        let (handle, task) = stroke_player::spawn(queue, self.output.clone(), self.time.clone());
        self.tasks.push(task);
        if let Some(mut generator) = generator {
            generator.set_last_target(self.output.target());
            let feeder = spawn_feeder(generator, handle.clone(), self.output.subscribe_state());
            self.background.push(feeder);
        }
        self.stroke_player = Some(handle.clone());
        handle
    }

    /// Report a local stand-in media position to the script player every
    /// [`MEDIA_CLOCK_PERIOD`], advancing at `1 / playback_rate` media ms per ms.
    pub fn spawn_media_clock(&mut self, start_ms: f64) {
        let player = self.script_player();
        let rate = self.config.player.playback_rate;
        let clock = tokio::spawn(async move {
            let origin = Instant::now();
            let mut ticker = tokio::time::interval(MEDIA_CLOCK_PERIOD);
            loop {
                ticker.tick().await;
                let position = start_ms + origin.elapsed().as_secs_f64() * 1000.0 / rate;
                player.report_clock_position(position);
            }
        });
        self.background.push(clock);
    }

    /// Stop producers, disconnect (parking if configured) and stop the channel.
    pub async fn shutdown(self) -> Result<(), SessionError> {
        for task in &self.background {
            task.abort();
        }
        if let Some(player) = &self.script_player {
            player.shutdown().await;
        }
        if let Some(player) = &self.stroke_player {
            player.shutdown().await;
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!("Producer task ended abnormally: {}", e);
            }
        }

        let disconnected = self.output.disconnect().await;
        let _ = self.output.shutdown().await;
        if let Err(e) = self.output_task.await {
            tracing::warn!("Output channel task ended abnormally: {}", e);
        }
        tracing::info!("Session closed");
        disconnected.map_err(SessionError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::LoopbackConnector;

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.player.time_window_ms = 0;
        let result = Session::start(config, Arc::new(LoopbackConnector::new()));
        assert!(matches!(result, Err(SessionError::Config(ConfigError::Invalid(_)))));
    }

    #[tokio::test]
    async fn test_players_are_started_once() {
        let mut session = Session::start(Config::default(), Arc::new(LoopbackConnector::new())).unwrap();
        session.script_player();
        session.script_player();
        session.stroke_player(None);
        session.stroke_player(None);
        assert_eq!(session.tasks.len(), 2);
        session.shutdown().await.unwrap();
    }
}
