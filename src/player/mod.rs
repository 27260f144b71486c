// src/player/mod.rs - Motion producers feeding the output channel
pub mod script_player;
pub mod stroke_player;

pub use script_player::{
    ParameterUpdate, PlayerParameters, PlayerRequest, PlayerStatus, ScriptPlayer, ScriptPlayerHandle, TickPlan,
};
pub use stroke_player::{
    ProgressUpdate, QueueStatus, StepOutcome, StrokeJob, StrokePlayerHandle, StrokeQueue, StrokeRequest,
    progress_stream,
};
