//! Zmod AWG configuration IP.

use serde::{Deserialize, Serialize};
use tracing::info;

use zmod_shared::GainRange;

use super::{CoefficientMap, DEFAULT_MAX_POLLS, FrontEnd, Registers, StatusFlags, issue_ap_start};
use crate::ZmodError;
use crate::calibration::CalibrationCoefficients;
use crate::config::ChannelConfig;

/// Register layout of the AWG block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwgRegisterMap {
    pub coefficients: CoefficientMap,
    pub control: usize,
    pub status: usize,
    pub dac_enable: u32,
    /// High-range select, CH1 then CH2
    pub scale: [u32; 2],
    pub test_mode: u32,
    pub init_done: u32,
}

impl Default for AwgRegisterMap {
    fn default() -> Self {
        Self {
            coefficients: CoefficientMap::default(),
            control: 0x50,
            status: 0x58,
            dac_enable: 0x01,
            scale: [0x02, 0x04],
            test_mode: 0x08,
            init_done: 0x01,
        }
    }
}

/// Register-level driver for the AWG front end.
#[derive(Debug)]
pub struct AwgRegisters<R: Registers> {
    regs: R,
    map: AwgRegisterMap,
    /// Control word minus the enable bit
    control: u32,
    max_polls: usize,
}

impl<R: Registers> AwgRegisters<R> {
    pub fn new(regs: R, map: AwgRegisterMap) -> Result<Self, ZmodError> {
        let mut awg = Self {
            regs,
            map,
            control: 0,
            max_polls: DEFAULT_MAX_POLLS,
        };
        awg.upload_calibration(&CalibrationCoefficients::default())?;
        awg.write_control(false)?;
        Ok(awg)
    }

    fn write_control(&mut self, enabled: bool) -> Result<(), ZmodError> {
        let enable = if enabled { self.map.dac_enable } else { 0 };
        self.regs.write32(self.map.control, self.control | enable)?;
        issue_ap_start(&mut self.regs, self.max_polls)
    }

    /// Route the built-in test pattern instead of DMA data. Output stays
    /// off until the next [`FrontEnd::start_stream`].
    pub fn set_test_mode(&mut self, enabled: bool) -> Result<(), ZmodError> {
        if enabled {
            self.control |= self.map.test_mode;
        } else {
            self.control &= !self.map.test_mode;
        }
        self.write_control(false)
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }
}

impl<R: Registers> FrontEnd for AwgRegisters<R> {
    fn set_channel_config(&mut self, channel: usize, config: ChannelConfig) -> Result<(), ZmodError> {
        let bit = *self.map.scale.get(channel).ok_or_else(|| {
            ZmodError::InvalidConfig(format!("AWG has no channel {}", channel + 1))
        })?;
        match config.gain {
            GainRange::High => self.control |= bit,
            GainRange::Low => self.control &= !bit,
        }
        // Relays switch with the output off
        self.write_control(false)
    }

    fn upload_calibration(&mut self, coefficients: &CalibrationCoefficients) -> Result<(), ZmodError> {
        self.map.coefficients.write(&mut self.regs, coefficients)?;
        issue_ap_start(&mut self.regs, self.max_polls)
    }

    fn start_stream(&mut self) -> Result<(), ZmodError> {
        self.write_control(true)?;
        info!("AWG output enabled");
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), ZmodError> {
        self.write_control(false)?;
        info!("AWG output disabled");
        Ok(())
    }

    fn status_flags(&mut self) -> Result<StatusFlags, ZmodError> {
        issue_ap_start(&mut self.regs, self.max_polls)?;
        let word = self.regs.read32(self.map.status)?;
        Ok(StatusFlags {
            init_done: word & self.map.init_done != 0,
            ..Default::default()
        })
    }
}
