//! Fixed-layout radio frames exchanged with the master.
//!
//! Both frames are packed little-endian structs with no header or length
//! prefix: the transport delivers exactly one frame per datagram.
//!
//! ```text
//! ActionFrame       { i32 action, f32 value }          8 bytes
//! TemperatureFrame  { i32 action = 2001, f32 sens[9] } 40 bytes
//! ```

use crate::{error::FrameError, types::NUM_SENSORS};

pub const ACTION_FRAME_LEN: usize = 8;
pub const TEMPERATURE_FRAME_LEN: usize = 4 + 4 * NUM_SENSORS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ConnectionTest,
    StartLogging,
    StopLogging,
    TempRequest,
    TempResponse,
    HardReset,
}

impl Action {
    pub const fn code(self) -> i32 {
        match self {
            Self::ConnectionTest => 1001,
            Self::StartLogging => 1002,
            Self::StopLogging => 1003,
            Self::TempResponse => 2001,
            Self::TempRequest => 3001,
            Self::HardReset => 8362,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1001 => Some(Self::ConnectionTest),
            1002 => Some(Self::StartLogging),
            1003 => Some(Self::StopLogging),
            2001 => Some(Self::TempResponse),
            3001 => Some(Self::TempRequest),
            8362 => Some(Self::HardReset),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionTest => "CONNECTION_TEST",
            Self::StartLogging => "START_LOGGING",
            Self::StopLogging => "STOP_LOGGING",
            Self::TempRequest => "TEMP_REQUEST",
            Self::TempResponse => "TEMP_RESPONSE",
            Self::HardReset => "HARD_RESET",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionFrame {
    pub code: i32,
    pub value: f32,
}

impl ActionFrame {
    pub fn new(action: Action, value: f32) -> Self {
        Self {
            code: action.code(),
            value,
        }
    }

    pub fn action(&self) -> Option<Action> {
        Action::from_code(self.code)
    }

    pub fn encode(&self) -> [u8; ACTION_FRAME_LEN] {
        let mut buf = [0_u8; ACTION_FRAME_LEN];
        buf[..4].copy_from_slice(&self.code.to_le_bytes());
        buf[4..].copy_from_slice(&self.value.to_le_bytes());
        buf
    }

    /// Decodes an inbound control frame.
    ///
    /// A sensor-data code arriving in control shape is rejected rather than
    /// treated as an unknown action.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let buf: &[u8; ACTION_FRAME_LEN] =
            bytes.try_into().map_err(|_| FrameError::WrongLength {
                expected: ACTION_FRAME_LEN,
                actual: bytes.len(),
            })?;

        let code = read_i32(buf, 0);
        if code == Action::TempResponse.code() {
            return Err(FrameError::ShapeMismatch { code });
        }

        Ok(Self {
            code,
            value: read_f32(buf, 4),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureFrame {
    pub sens: [f32; NUM_SENSORS],
}

impl TemperatureFrame {
    pub fn new(sens: [f32; NUM_SENSORS]) -> Self {
        Self { sens }
    }

    pub fn encode(&self) -> [u8; TEMPERATURE_FRAME_LEN] {
        let mut buf = [0_u8; TEMPERATURE_FRAME_LEN];
        buf[..4].copy_from_slice(&Action::TempResponse.code().to_le_bytes());
        for (index, value) in self.sens.iter().enumerate() {
            let start = 4 + index * 4;
            buf[start..start + 4].copy_from_slice(&value.to_le_bytes());
        }
        buf
    }

    /// Master-side decode, used by the probe tool and tests.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() != TEMPERATURE_FRAME_LEN {
            return Err(FrameError::WrongLength {
                expected: TEMPERATURE_FRAME_LEN,
                actual: bytes.len(),
            });
        }

        let code = read_i32(bytes, 0);
        if code != Action::TempResponse.code() {
            return Err(FrameError::ShapeMismatch { code });
        }

        let mut sens = [0.0_f32; NUM_SENSORS];
        for (index, value) in sens.iter_mut().enumerate() {
            *value = read_f32(bytes, 4 + index * 4);
        }
        Ok(Self { sens })
    }
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    let mut word = [0_u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    i32::from_le_bytes(word)
}

fn read_f32(bytes: &[u8], offset: usize) -> f32 {
    let mut word = [0_u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    f32::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn action_frame_layout_matches_packed_struct() {
        let frame = ActionFrame::new(Action::TempRequest, 1.5);
        let bytes = frame.encode();

        assert_eq!(&bytes[..4], &3001_i32.to_le_bytes());
        assert_eq!(&bytes[4..], &1.5_f32.to_le_bytes());
        assert_eq!(ActionFrame::decode(&bytes), Ok(frame));
    }

    #[test]
    fn short_buffer_is_malformed() {
        let bytes = ActionFrame::new(Action::ConnectionTest, 0.0).encode();
        assert_eq!(
            ActionFrame::decode(&bytes[..7]),
            Err(FrameError::WrongLength {
                expected: ACTION_FRAME_LEN,
                actual: 7
            })
        );
        assert!(ActionFrame::decode(&[]).is_err());
    }

    #[test]
    fn oversized_buffer_is_malformed() {
        let bytes = TemperatureFrame::new([20.0; NUM_SENSORS]).encode();
        assert!(matches!(
            ActionFrame::decode(&bytes),
            Err(FrameError::WrongLength { actual: 40, .. })
        ));
    }

    #[test]
    fn sensor_data_code_in_control_shape_is_rejected() {
        let bytes = ActionFrame {
            code: 2001,
            value: 0.0,
        }
        .encode();
        assert_eq!(
            ActionFrame::decode(&bytes),
            Err(FrameError::ShapeMismatch { code: 2001 })
        );
    }

    #[test]
    fn unknown_codes_still_decode() {
        let bytes = ActionFrame {
            code: 4242,
            value: 0.0,
        }
        .encode();
        let frame = ActionFrame::decode(&bytes).unwrap();
        assert_eq!(frame.action(), None);
    }

    #[test]
    fn temperature_frame_carries_channels_in_order() {
        let mut sens = [0.0_f32; NUM_SENSORS];
        for (index, value) in sens.iter_mut().enumerate() {
            *value = index as f32 + 0.25;
        }
        let bytes = TemperatureFrame::new(sens).encode();

        assert_eq!(bytes.len(), 40);
        assert_eq!(&bytes[..4], &2001_i32.to_le_bytes());
        assert_eq!(&bytes[36..], &8.25_f32.to_le_bytes());
        assert_eq!(TemperatureFrame::decode(&bytes).unwrap().sens, sens);
    }

    #[test]
    fn action_codes_are_stable() {
        for action in [
            Action::ConnectionTest,
            Action::StartLogging,
            Action::StopLogging,
            Action::TempRequest,
            Action::TempResponse,
            Action::HardReset,
        ] {
            assert_eq!(Action::from_code(action.code()), Some(action));
        }
        assert_eq!(Action::StartLogging.code(), 1002);
        assert_eq!(Action::HardReset.as_str(), "HARD_RESET");
    }
}
