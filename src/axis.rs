// src/axis.rs - Closed axis enumeration and the enum-indexed sparse map
//! Device axes and [`AxisMap`], a fixed-size per-axis map with explicit presence.
//!
//! Every producer in the crate speaks in `AxisMap`s: an axis that is `None`
//! is "absent" and is left out of the encoded frame entirely.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One independently controllable degree of motion on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    /// Primary stroke axis.
    L0,
    L1,
    L2,
    R0,
    R1,
    R2,
    V0,
    V1,
    V2,
    A0,
    A1,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown axis: {0}")]
pub struct UnknownAxis(pub String);

impl Axis {
    pub const COUNT: usize = 11;

    pub const ALL: [Axis; Axis::COUNT] = [
        Axis::L0,
        Axis::L1,
        Axis::L2,
        Axis::R0,
        Axis::R1,
        Axis::R2,
        Axis::V0,
        Axis::V1,
        Axis::V2,
        Axis::A0,
        Axis::A1,
    ];

    /// The axis that pause-fill and the neutral reset apply to.
    pub const PRIMARY: Axis = Axis::L0;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Axis::L0 => "L0",
            Axis::L1 => "L1",
            Axis::L2 => "L2",
            Axis::R0 => "R0",
            Axis::R1 => "R1",
            Axis::R2 => "R2",
            Axis::V0 => "V0",
            Axis::V1 => "V1",
            Axis::V2 => "V2",
            Axis::A0 => "A0",
            Axis::A1 => "A1",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Axis {
    type Err = UnknownAxis;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Axis::ALL
            .iter()
            .copied()
            .find(|axis| axis.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownAxis(s.to_string()))
    }
}

/// Sparse map keyed by [`Axis`]. Iteration always follows enum order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    bound(serialize = "T: Serialize + Clone", deserialize = "T: Deserialize<'de>"),
    into = "std::collections::BTreeMap<Axis, T>",
    from = "std::collections::BTreeMap<Axis, T>"
)]
pub struct AxisMap<T> {
    slots: [Option<T>; Axis::COUNT],
}

impl<T> Default for AxisMap<T> {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }
}

impl<T> AxisMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, axis: Axis) -> Option<&T> {
        self.slots[axis.index()].as_ref()
    }

    pub fn get_mut(&mut self, axis: Axis) -> Option<&mut T> {
        self.slots[axis.index()].as_mut()
    }

    /// Insert a value, returning the previous one if the axis was present.
    pub fn insert(&mut self, axis: Axis, value: T) -> Option<T> {
        self.slots[axis.index()].replace(value)
    }

    pub fn remove(&mut self, axis: Axis) -> Option<T> {
        self.slots[axis.index()].take()
    }

    pub fn contains(&self, axis: Axis) -> bool {
        self.slots[axis.index()].is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Axis, &T)> {
        Axis::ALL
            .iter()
            .zip(self.slots.iter())
            .filter_map(|(axis, slot)| slot.as_ref().map(|v| (*axis, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Axis, &mut T)> {
        Axis::ALL
            .iter()
            .zip(self.slots.iter_mut())
            .filter_map(|(axis, slot)| slot.as_mut().map(|v| (*axis, v)))
    }

    pub fn axes(&self) -> impl Iterator<Item = Axis> + '_ {
        self.iter().map(|(axis, _)| axis)
    }

    /// Apply `f` to every present value, keeping presence as-is.
    pub fn map<U>(&self, mut f: impl FnMut(Axis, &T) -> U) -> AxisMap<U> {
        let mut out = AxisMap::new();
        for (axis, value) in self.iter() {
            out.insert(axis, f(axis, value));
        }
        out
    }
}

impl<T: Clone> AxisMap<T> {
    /// Overlay every present value of `other` onto `self`.
    pub fn merge(&mut self, other: &AxisMap<T>) {
        for (axis, value) in other.iter() {
            self.insert(axis, value.clone());
        }
    }
}

impl<T> FromIterator<(Axis, T)> for AxisMap<T> {
    fn from_iter<I: IntoIterator<Item = (Axis, T)>>(iter: I) -> Self {
        let mut map = AxisMap::new();
        for (axis, value) in iter {
            map.insert(axis, value);
        }
        map
    }
}

impl<T> From<std::collections::BTreeMap<Axis, T>> for AxisMap<T> {
    fn from(value: std::collections::BTreeMap<Axis, T>) -> Self {
        value.into_iter().collect()
    }
}

impl<T: Clone> From<AxisMap<T>> for std::collections::BTreeMap<Axis, T> {
    fn from(value: AxisMap<T>) -> Self {
        value.iter().map(|(axis, v)| (axis, v.clone())).collect()
    }
}
