//! Zmod Scope configuration IP.

use tracing::{info, warn};

use zmod_shared::{Coupling, GainRange};

use super::{CoefficientMap, DEFAULT_MAX_POLLS, FrontEnd, Registers, StatusFlags, issue_ap_start};
use crate::ZmodError;
use crate::calibration::CalibrationCoefficients;
use crate::config::ChannelConfig;

pub const CONFIG: usize = 0x50;
pub const STATUS: usize = 0x58;

pub const CONFIG_CH1_GAIN: u32 = 0x01;
pub const CONFIG_CH2_GAIN: u32 = 0x02;
pub const CONFIG_CH1_COUPLING: u32 = 0x04;
pub const CONFIG_CH2_COUPLING: u32 = 0x08;
pub const CONFIG_TEST_MODE: u32 = 0x10;
pub const CONFIG_ENABLE_ACQUISITION: u32 = 0x20;
pub const CONFIG_RESETN: u32 = 0x40;
/// Bits software may change while the stream is configured
pub const CONFIG_SOFTWARE_BITS: u32 = 0x1f;

pub const STATUS_RESET_BUSY: u32 = 0x01;
pub const STATUS_INIT_DONE_ADC: u32 = 0x02;
pub const STATUS_CONFIG_ERROR: u32 = 0x04;
pub const STATUS_INIT_DONE_RELAY: u32 = 0x08;
pub const STATUS_DATA_OVERFLOW: u32 = 0x10;

/// Decode the scope status register.
pub fn decode_status(word: u32) -> StatusFlags {
    StatusFlags {
        reset_busy: word & STATUS_RESET_BUSY != 0,
        init_done: word & STATUS_INIT_DONE_ADC != 0 && word & STATUS_INIT_DONE_RELAY != 0,
        config_error: word & STATUS_CONFIG_ERROR != 0,
        data_overflow: word & STATUS_DATA_OVERFLOW != 0,
    }
}

/// Register-level driver for the scope front end.
#[derive(Debug)]
pub struct ScopeRegisters<R: Registers> {
    regs: R,
    coefficients: CoefficientMap,
    max_polls: usize,
}

impl<R: Registers> ScopeRegisters<R> {
    /// Wrap a register window and load unity calibration.
    pub fn new(regs: R) -> Result<Self, ZmodError> {
        let mut scope = Self {
            regs,
            coefficients: CoefficientMap::default(),
            max_polls: DEFAULT_MAX_POLLS,
        };
        scope.upload_calibration(&CalibrationCoefficients::default())?;
        Ok(scope)
    }

    pub fn with_max_polls(mut self, max_polls: usize) -> Self {
        self.max_polls = max_polls;
        self
    }

    fn commit(&mut self) -> Result<(), ZmodError> {
        issue_ap_start(&mut self.regs, self.max_polls)
    }

    /// Update software-owned config bits, leaving reset and enable alone.
    fn set_config_bits(&mut self, clear: u32, set: u32) -> Result<(), ZmodError> {
        self.regs
            .modify32(CONFIG, clear & CONFIG_SOFTWARE_BITS, set & CONFIG_SOFTWARE_BITS)?;
        self.commit()
    }

    /// Route a ramp instead of ADC data into the stream.
    pub fn set_test_mode(&mut self, enabled: bool) -> Result<(), ZmodError> {
        let bit = if enabled { CONFIG_TEST_MODE } else { 0 };
        self.set_config_bits(CONFIG_TEST_MODE, bit)
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }
}

impl<R: Registers> FrontEnd for ScopeRegisters<R> {
    fn set_channel_config(&mut self, channel: usize, config: ChannelConfig) -> Result<(), ZmodError> {
        let (gain_bit, coupling_bit) = match channel {
            0 => (CONFIG_CH1_GAIN, CONFIG_CH1_COUPLING),
            1 => (CONFIG_CH2_GAIN, CONFIG_CH2_COUPLING),
            _ => {
                return Err(ZmodError::InvalidConfig(format!(
                    "scope has no channel {}",
                    channel + 1
                )));
            }
        };
        let mut set = 0;
        if config.gain == GainRange::High {
            set |= gain_bit;
        }
        if config.coupling == Coupling::Dc {
            set |= coupling_bit;
        }
        self.set_config_bits(gain_bit | coupling_bit, set)
    }

    fn upload_calibration(&mut self, coefficients: &CalibrationCoefficients) -> Result<(), ZmodError> {
        self.coefficients.write(&mut self.regs, coefficients)?;
        self.commit()
    }

    fn start_stream(&mut self) -> Result<(), ZmodError> {
        // Release reset first so the ADC and relays initialize
        self.regs.modify32(CONFIG, 0, CONFIG_RESETN)?;
        self.commit()?;

        let flags = decode_status(self.regs.read32(STATUS)?);
        if flags.reset_busy {
            warn!("Scope still in reset after release");
        }
        if flags.config_error {
            warn!("Scope reports a configuration error; check the pod on this port");
        }

        self.regs.modify32(CONFIG, 0, CONFIG_ENABLE_ACQUISITION)?;
        self.commit()?;
        info!("Scope acquisition enabled");
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), ZmodError> {
        self.regs.modify32(CONFIG, CONFIG_ENABLE_ACQUISITION, 0)?;
        self.commit()
    }

    fn status_flags(&mut self) -> Result<StatusFlags, ZmodError> {
        self.commit()?;
        Ok(decode_status(self.regs.read32(STATUS)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::MemoryRegisters;

    fn scope() -> ScopeRegisters<MemoryRegisters> {
        ScopeRegisters::new(MemoryRegisters::hls_block()).unwrap()
    }

    #[test]
    fn test_new_loads_unity_coefficients() {
        let s = scope();
        for off in [0x10, 0x18, 0x30, 0x38] {
            assert_eq!(s.registers().peek(off), 1 << 16, "mult at 0x{off:02x}");
        }
        for off in [0x20, 0x28, 0x40, 0x48] {
            assert_eq!(s.registers().peek(off), 0, "add at 0x{off:02x}");
        }
    }

    #[test]
    fn test_channel_config_bits() {
        let mut s = scope();
        s.set_channel_config(
            1,
            ChannelConfig {
                gain: GainRange::High,
                coupling: Coupling::Dc,
            },
        )
        .unwrap();
        assert_eq!(s.registers().peek(CONFIG), CONFIG_CH2_GAIN | CONFIG_CH2_COUPLING);

        s.set_channel_config(
            0,
            ChannelConfig {
                gain: GainRange::Low,
                coupling: Coupling::Dc,
            },
        )
        .unwrap();
        s.set_channel_config(
            1,
            ChannelConfig {
                gain: GainRange::Low,
                coupling: Coupling::Ac,
            },
        )
        .unwrap();
        assert_eq!(s.registers().peek(CONFIG), CONFIG_CH1_COUPLING);
        assert!(s.set_channel_config(2, ChannelConfig::default()).is_err());
    }

    #[test]
    fn test_start_releases_reset_before_enabling() {
        let mut s = scope();
        s.set_test_mode(true).unwrap();
        s.start_stream().unwrap();
        let config_writes: Vec<u32> = s
            .registers()
            .writes()
            .iter()
            .filter(|(off, _)| *off == CONFIG)
            .map(|(_, v)| *v)
            .collect();
        assert_eq!(
            config_writes,
            vec![
                CONFIG_TEST_MODE,
                CONFIG_TEST_MODE | CONFIG_RESETN,
                CONFIG_TEST_MODE | CONFIG_RESETN | CONFIG_ENABLE_ACQUISITION,
            ]
        );

        s.stop_stream().unwrap();
        assert_eq!(s.registers().peek(CONFIG), CONFIG_TEST_MODE | CONFIG_RESETN);
    }

    #[test]
    fn test_status_decoding() {
        let regs = MemoryRegisters::hls_block()
            .with_sticky(STATUS, STATUS_INIT_DONE_ADC | STATUS_INIT_DONE_RELAY | STATUS_DATA_OVERFLOW);
        let mut s = ScopeRegisters::new(regs).unwrap();
        let flags = s.status_flags().unwrap();
        assert!(flags.init_done && flags.data_overflow);
        assert!(!flags.reset_busy && !flags.config_error);
        assert!(!flags.is_healthy());

        assert!(!decode_status(STATUS_INIT_DONE_ADC).init_done, "relays must also be ready");
    }
}
