//! Front-end adapters: the Zmod Scope and AWG configuration IP.

use std::collections::BTreeMap;

use crate::ZmodError;
use crate::calibration::CalibrationCoefficients;
use crate::config::ChannelConfig;

pub mod awg;
pub mod scope;
#[cfg(feature = "uio")]
pub mod uio;

pub use awg::AwgRegisters;
pub use scope::ScopeRegisters;
#[cfg(feature = "uio")]
pub use uio::UioRegisters;

/// HLS block-level control register.
pub const AP_CONTROL: usize = 0x00;
pub const AP_START: u32 = 0x01;
pub const AP_IDLE: u32 = 0x04;
pub const AP_AUTO_RESTART: u32 = 0x80;

/// Polls of the control register before a handshake is declared stuck.
pub const DEFAULT_MAX_POLLS: usize = 100_000;

/// Status reported by a front end after its stream starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusFlags {
    pub reset_busy: bool,
    pub init_done: bool,
    pub config_error: bool,
    pub data_overflow: bool,
}

impl StatusFlags {
    pub fn is_healthy(&self) -> bool {
        !self.config_error && !self.data_overflow
    }
}

/// Capabilities the capture and playback controllers need from a front end.
pub trait FrontEnd {
    /// Select gain and coupling relays; takes effect before the stream starts.
    fn set_channel_config(&mut self, channel: usize, config: ChannelConfig) -> Result<(), ZmodError>;

    fn upload_calibration(&mut self, coefficients: &CalibrationCoefficients) -> Result<(), ZmodError>;

    /// Start producing (scope) or consuming (AWG) samples.
    fn start_stream(&mut self) -> Result<(), ZmodError>;

    /// Stop the stream and leave outputs disabled.
    fn stop_stream(&mut self) -> Result<(), ZmodError>;

    fn status_flags(&mut self) -> Result<StatusFlags, ZmodError>;
}

/// 32-bit register window of one AXI-Lite peripheral.
pub trait Registers {
    fn read32(&mut self, offset: usize) -> Result<u32, ZmodError>;

    fn write32(&mut self, offset: usize, value: u32) -> Result<(), ZmodError>;

    fn modify32(&mut self, offset: usize, clear: u32, set: u32) -> Result<(), ZmodError> {
        let v = self.read32(offset)?;
        self.write32(offset, (v & !clear) | set)
    }
}

/// Latch register writes into an HLS block and wait for it to go idle.
pub fn issue_ap_start<R: Registers>(regs: &mut R, max_polls: usize) -> Result<(), ZmodError> {
    regs.write32(AP_CONTROL, AP_START)?;
    for _ in 0..max_polls {
        if regs.read32(AP_CONTROL)? & AP_IDLE != 0 {
            return Ok(());
        }
    }
    Err(ZmodError::RegisterTimeout {
        offset: AP_CONTROL,
        polls: max_polls,
    })
}

/// Plain memory standing in for a register window.
///
/// Bits registered with [`MemoryRegisters::with_sticky`] always read back
/// set, which is how a block that is permanently idle looks.
#[derive(Clone, Debug, Default)]
pub struct MemoryRegisters {
    words: BTreeMap<usize, u32>,
    sticky: BTreeMap<usize, u32>,
    writes: Vec<(usize, u32)>,
}

impl MemoryRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// An HLS block that finishes every `ap_start` instantly.
    pub fn hls_block() -> Self {
        Self::new().with_sticky(AP_CONTROL, AP_IDLE)
    }

    pub fn with_sticky(mut self, offset: usize, bits: u32) -> Self {
        *self.sticky.entry(offset).or_default() |= bits;
        self
    }

    /// Every write so far, in order.
    pub fn writes(&self) -> &[(usize, u32)] {
        &self.writes
    }

    pub fn peek(&self, offset: usize) -> u32 {
        self.words.get(&offset).copied().unwrap_or(0)
    }

    pub fn poke(&mut self, offset: usize, value: u32) {
        self.words.insert(offset, value);
    }
}

impl Registers for MemoryRegisters {
    fn read32(&mut self, offset: usize) -> Result<u32, ZmodError> {
        Ok(self.peek(offset) | self.sticky.get(&offset).copied().unwrap_or(0))
    }

    fn write32(&mut self, offset: usize, value: u32) -> Result<(), ZmodError> {
        self.writes.push((offset, value));
        self.words.insert(offset, value);
        Ok(())
    }
}

/// Coefficient register offsets, `[channel][gain (low, high)][mult, add]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CoefficientMap(pub [[[usize; 2]; 2]; 2]);

impl Default for CoefficientMap {
    fn default() -> Self {
        // CH1 HG mult 0x10, LG mult 0x18, HG add 0x20, LG add 0x28; CH2 +0x20
        Self([
            [[0x18, 0x28], [0x10, 0x20]],
            [[0x38, 0x48], [0x30, 0x40]],
        ])
    }
}

impl CoefficientMap {
    pub fn write<R: Registers>(&self, regs: &mut R, coefficients: &CalibrationCoefficients) -> Result<(), ZmodError> {
        let words = coefficients.register_words();
        for (ch, per_gain) in self.0.iter().enumerate() {
            for (g, [mult_off, add_off]) in per_gain.iter().enumerate() {
                let [mult, add] = words[ch][g];
                regs.write32(*mult_off, mult)?;
                regs.write32(*add_off, add)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CoefficientPair, Fixed18};
    use zmod_shared::GainRange;

    #[test]
    fn test_ap_start_handshake() {
        let mut regs = MemoryRegisters::hls_block();
        issue_ap_start(&mut regs, 4).unwrap();
        assert_eq!(regs.writes(), &[(AP_CONTROL, AP_START)]);

        let mut stuck = MemoryRegisters::new();
        assert!(matches!(
            issue_ap_start(&mut stuck, 4),
            Err(ZmodError::RegisterTimeout { offset: 0, polls: 4 })
        ));
    }

    #[test]
    fn test_coefficient_map_layout() {
        let mut c = CalibrationCoefficients::default();
        c.set(
            1,
            GainRange::Low,
            CoefficientPair {
                multiplicative: Fixed18::new(0x1_2345).unwrap(),
                additive: Fixed18::new(-2).unwrap(),
            },
        );
        let mut regs = MemoryRegisters::new();
        CoefficientMap::default().write(&mut regs, &c).unwrap();

        assert_eq!(regs.peek(0x10), 0x1_0000, "CH1 HG mult");
        assert_eq!(regs.peek(0x28), 0, "CH1 LG add");
        assert_eq!(regs.peek(0x38), 0x1_2345, "CH2 LG mult");
        assert_eq!(regs.peek(0x48), 0x3FFFE, "CH2 LG add is 18-bit two's complement");
        assert_eq!(regs.writes().len(), 8);
    }
}
