// src/tcode/decoder.rs - Frame parsing (device side of the protocol)
//!
//! Used by the visualizer transport and by tests to read back what was sent.

use crate::axis::{Axis, AxisMap};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Token too short: '{0}'")]
    TooShort(String),
    #[error("Unknown axis in token '{0}'")]
    UnknownAxis(String),
    #[error("Invalid number in token '{0}'")]
    InvalidNumber(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedToken {
    pub axis: Axis,
    pub value: u16,
    pub interval_ms: Option<u16>,
}

pub fn parse_token(token: &str) -> Result<DecodedToken, DecodeError> {
    if token.len() < 3 || !token.is_char_boundary(2) {
        return Err(DecodeError::TooShort(token.to_string()));
    }
    let (axis_part, rest) = token.split_at(2);
    let axis = axis_part
        .parse::<Axis>()
        .map_err(|_| DecodeError::UnknownAxis(token.to_string()))?;

    let (value_part, interval_part) = match rest.split_once(['I', 'i']) {
        Some((value, interval)) => (value, Some(interval)),
        None => (rest, None),
    };
    let value = value_part
        .parse::<u16>()
        .map_err(|_| DecodeError::InvalidNumber(token.to_string()))?;
    let interval_ms = interval_part
        .map(|s| s.parse::<u16>())
        .transpose()
        .map_err(|_| DecodeError::InvalidNumber(token.to_string()))?;

    Ok(DecodedToken {
        axis,
        value,
        interval_ms,
    })
}

/// Parse one newline-less frame into its tokens.
pub fn parse_frame(line: &str) -> Result<Vec<DecodedToken>, DecodeError> {
    line.split_whitespace().map(parse_token).collect()
}

/// Device-side view of the frames it received: the last commanded value per axis.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    pub positions: AxisMap<u16>,
    pub frames: u64,
}

impl DeviceState {
    pub fn apply(&mut self, line: &str) -> Result<(), DecodeError> {
        for token in parse_frame(line.trim())? {
            self.positions.insert(token.axis, token.value);
        }
        self.frames += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame() {
        let tokens = parse_frame("L0500I0150 R0250 V0999I0001").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(
            tokens[0],
            DecodedToken { axis: Axis::L0, value: 500, interval_ms: Some(150) }
        );
        assert_eq!(tokens[1].interval_ms, None);
        assert_eq!(tokens[2].value, 999);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_token("L0"), Err(DecodeError::TooShort(_))));
        assert!(matches!(parse_token("Q9123"), Err(DecodeError::UnknownAxis(_))));
        assert!(matches!(parse_token("L0abc"), Err(DecodeError::InvalidNumber(_))));
        assert!(matches!(parse_token("L0100Ixx"), Err(DecodeError::InvalidNumber(_))));
    }

    #[test]
    fn test_device_state_tracks_last_value() {
        let mut device = DeviceState::default();
        device.apply("L0100I0100 R0500\n").unwrap();
        device.apply("L0900I0100").unwrap();
        assert_eq!(device.positions.get(Axis::L0), Some(&900));
        assert_eq!(device.positions.get(Axis::R0), Some(&500));
        assert_eq!(device.frames, 2);
    }
}
