//! Calibration record layout as stored in the pod EEPROM.
//!
//! Two records live on each pod, factory and user. The coefficients are
//! floating point gain and offset errors; conversion to the fixed-point
//! form the gateware consumes happens on the host.

pub use byte_struct::{ByteStruct, ByteStructLen, ByteStructUnspecifiedByteOrder};

use crate::{GainRange, CHANNEL_COUNT};

/// Coefficient slots per record: channel x gain x (gain error, offset).
pub const COEFFICIENT_COUNT: usize = CHANNEL_COUNT * 2 * 2;

#[derive(ByteStruct, Clone, Copy, Debug, Default, PartialEq)]
#[byte_struct_le]
pub struct CalibrationRecord {
    /// Record tag written by the calibration tool
    pub id: u8,

    /// Calibration time, unix seconds
    pub date: u32,

    /// `[channel][gain (low, high)][gain error, offset volts]`, flattened
    pub cal: [f32; COEFFICIENT_COUNT],
}

impl CalibrationRecord {
    pub const LEN: usize = Self::BYTE_LEN;

    /// Decode a record, or `None` if the slice is short or the
    /// EEPROM page is still erased.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::LEN)?;
        if is_erased(bytes) {
            return None;
        }
        Some(Self::read_bytes(bytes))
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut bytes = [0_u8; Self::LEN];
        self.write_bytes(&mut bytes);
        bytes
    }

    fn slot(channel: usize, gain: GainRange) -> usize {
        (channel * 2 + gain.index()) * 2
    }

    /// `(gain error, offset)` for one channel and range.
    pub fn coefficient(&self, channel: usize, gain: GainRange) -> (f32, f32) {
        let i = Self::slot(channel, gain);
        (self.cal[i], self.cal[i + 1])
    }

    pub fn set_coefficient(&mut self, channel: usize, gain: GainRange, gain_error: f32, offset: f32) {
        let i = Self::slot(channel, gain);
        self.cal[i] = gain_error;
        self.cal[i + 1] = offset;
    }
}

/// Erased EEPROM reads back as all ones.
pub fn is_erased(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| *b == 0xFF)
}
