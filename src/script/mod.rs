// src/script/mod.rs - Per-axis timed position scripts
//!
//! A [`MotionScript`] is the keyframe list for one axis, stored in the usual
//! funscript JSON layout:
//!
//! ```json
//! {"inverted": false, "actions": [{"at": 0, "pos": 10}, {"at": 500, "pos": 90}]}
//! ```
//!
//! A media file `clip.mp4` is accompanied by one script per axis, named by
//! suffix (`clip.funscript` for the primary axis, `clip.twist.funscript` for
//! R0, and so on). See [`COMPANION_SUFFIXES`].

pub mod interpolator;
pub mod pause_fill;

pub use interpolator::{AxisCursor, AxisSample, PlanningWindow, SampleMode};
pub use pause_fill::{FillEffect, PauseFill};

use crate::axis::{Axis, AxisMap};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("IO error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Script for {0} has no keyframes")]
    Empty(Axis),
    #[error("Cursor for {axis} at offset {offset} is outside a script of {len} keyframes")]
    CursorOutOfRange { axis: Axis, offset: usize, len: usize },
    #[error("Keyframe {index} has a negative timestamp ({at})")]
    NegativeTimestamp { index: usize, at: i64 },
    #[error("No scripts found for '{0}'")]
    NothingFound(PathBuf),
}

/// Script suffixes and the axis each one drives. Longest suffixes first so a
/// plain `.funscript` match is only tried last.
pub const COMPANION_SUFFIXES: [(Axis, &str); 6] = [
    (Axis::R2, ".pitch.funscript"),
    (Axis::R1, ".roll.funscript"),
    (Axis::R0, ".twist.funscript"),
    (Axis::L1, ".forward.funscript"),
    (Axis::A1, ".suck.funscript"),
    (Axis::L0, ".funscript"),
];

/// Default half-width of the editor's "delete around playhead" operation.
pub const EDIT_REMOVE_RADIUS_MS: i64 = 1500;

/// A timestamped target position, `pos` nominally in 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub at: i64,
    pub pos: f64,
}

impl Keyframe {
    pub fn new(at: i64, pos: f64) -> Self {
        Self { at, pos }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionScript {
    #[serde(default)]
    pub inverted: bool,
    #[serde(default)]
    pub actions: Vec<Keyframe>,
}

impl MotionScript {
    /// Build a script, sorting keyframes by time (stable for equal timestamps).
    pub fn new(actions: Vec<Keyframe>, inverted: bool) -> Self {
        let mut script = Self { inverted, actions };
        script.sort();
        script
    }

    pub fn from_json(json: &str) -> Result<Self, ScriptError> {
        let mut script: MotionScript = serde_json::from_str(json)?;
        if let Some((index, keyframe)) = script.actions.iter().enumerate().find(|(_, k)| k.at < 0) {
            return Err(ScriptError::NegativeTimestamp {
                index,
                at: keyframe.at,
            });
        }
        script.sort();
        Ok(script)
    }

    pub fn from_file(path: &Path) -> Result<Self, ScriptError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn to_json(&self) -> Result<String, ScriptError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Timestamp of the last keyframe.
    pub fn duration_ms(&self) -> i64 {
        self.actions.last().map(|k| k.at).unwrap_or(0)
    }

    /// Add a keyframe and restore time order.
    pub fn insert(&mut self, at: i64, pos: f64) {
        self.actions.push(Keyframe::new(at.max(0), pos));
        self.sort();
    }

    /// Remove every keyframe within `[at - radius_ms, at + radius_ms]`.
    /// Returns how many were removed.
    pub fn remove_around(&mut self, at: i64, radius_ms: i64) -> usize {
        let before = self.actions.len();
        self.actions
            .retain(|k| k.at < at - radius_ms || k.at > at + radius_ms);
        before - self.actions.len()
    }

    /// Scaled 0..=1000 value of a keyframe, honouring `inverted`.
    pub fn scaled_value(&self, keyframe: &Keyframe) -> f64 {
        let value = (keyframe.pos.clamp(0.0, 100.0) * 10.0).floor();
        if self.inverted { 1000.0 - value } else { value }
    }

    fn sort(&mut self) {
        self.actions.sort_by_key(|k| k.at);
    }
}

/// One optional script per axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptSet {
    scripts: AxisMap<MotionScript>,
}

impl ScriptSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, axis: Axis, script: MotionScript) -> Option<MotionScript> {
        self.scripts.insert(axis, script)
    }

    pub fn get(&self, axis: Axis) -> Option<&MotionScript> {
        self.scripts.get(axis)
    }

    pub fn get_mut(&mut self, axis: Axis) -> Option<&mut MotionScript> {
        self.scripts.get_mut(axis)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Axis, &MotionScript)> {
        self.scripts.iter()
    }

    pub fn axes(&self) -> impl Iterator<Item = Axis> + '_ {
        self.scripts.axes()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Longest script duration across all axes.
    pub fn duration_ms(&self) -> i64 {
        self.iter().map(|(_, s)| s.duration_ms()).max().unwrap_or(0)
    }

    /// Load every companion script of `path`.
    ///
    /// `path` may be the media file (`clip.mp4`) or any of its scripts
    /// (`clip.twist.funscript`). Companions that fail to parse are logged and
    /// skipped; it is only an error when nothing could be loaded.
    pub fn load_for(path: &Path) -> Result<Self, ScriptError> {
        let base = script_base(path);
        let mut set = ScriptSet::new();
        for (axis, suffix) in COMPANION_SUFFIXES {
            let candidate = PathBuf::from(format!("{}{}", base.display(), suffix));
            if !candidate.is_file() {
                continue;
            }
            match MotionScript::from_file(&candidate) {
                Ok(script) => {
                    tracing::info!(
                        "Loaded {} script '{}' ({} keyframes)",
                        axis,
                        candidate.display(),
                        script.len()
                    );
                    set.insert(axis, script);
                }
                Err(e) => {
                    tracing::warn!("Skipping {} script '{}': {}", axis, candidate.display(), e);
                }
            }
        }
        if set.is_empty() {
            return Err(ScriptError::NothingFound(path.to_path_buf()));
        }
        Ok(set)
    }
}

/// Axis a script file drives, judged by its suffix.
pub fn axis_for_script(path: &Path) -> Option<Axis> {
    let name = path.file_name()?.to_str()?;
    COMPANION_SUFFIXES
        .iter()
        .find(|(_, suffix)| name.ends_with(suffix))
        .map(|(axis, _)| *axis)
}

/// Path prefix shared by a media file and its scripts (`dir/clip`).
fn script_base(path: &Path) -> PathBuf {
    let as_string = path.display().to_string();
    if let Some((_, suffix)) = COMPANION_SUFFIXES
        .iter()
        .find(|(_, suffix)| as_string.ends_with(suffix))
    {
        return PathBuf::from(&as_string[..as_string.len() - suffix.len()]);
    }
    path.with_extension("")
}
