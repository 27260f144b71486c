// src/lib.rs - Crate root
//! Host-side motion playback for T-code devices.
//!
//! Two producers feed one output channel: the script player follows an
//! external media clock through per-axis keyframe scripts, the stroke player
//! drains a queue of generated strokes. Both hand [`MotionCommand`]s to the
//! output channel, which encodes them into T-code frames for the device.

pub mod axis;
pub mod config;
pub mod output;
pub mod player;
pub mod scheduler;
pub mod script;
pub mod session;
pub mod stroke;
pub mod tcode;

pub use crate::axis::{Axis, AxisMap};
pub use crate::config::{Config, ConfigError, load_config};
pub use crate::output::{ChannelState, OutputError, OutputHandle};
pub use crate::session::{Session, SessionError};
pub use crate::tcode::{Frame, Interval, MotionCommand};
