//! Trigger detector and manual trigger peripherals.
//!
//! The detector sits between the scope stream and the S2MM DMA. Once
//! started it forwards `prebuffer` beats unconditionally, then forwards
//! until an enabled trigger input fires, then forwards `trigger_to_last`
//! more beats, the last one carrying TLAST, and goes idle.

use serde::{Deserialize, Serialize};

use crate::ZmodError;
use crate::frontend::{DEFAULT_MAX_POLLS, Registers, issue_ap_start};

/// Trigger cause bit driven by the manual trigger peripheral.
pub const MANUAL_TRIGGER_CAUSE: u32 = 0x01;

pub trait TriggerDetector {
    /// Split a buffer of `buffer_len` beats around the trigger at `trigger_offset`.
    fn set_position(&mut self, buffer_len: u32, trigger_offset: u32) -> Result<(), ZmodError>;

    /// Which trigger inputs may end the wait.
    fn set_enable_mask(&mut self, mask: u32) -> Result<(), ZmodError>;

    /// Begin prebuffering.
    fn start(&mut self) -> Result<(), ZmodError>;

    /// Raw idle status bit. Its sense is configured by
    /// [`crate::config::IdlePolarity`].
    fn idle_bit(&mut self) -> Result<bool, ZmodError>;

    /// Enabled trigger inputs that fired during the last capture.
    fn detected_cause_mask(&mut self) -> Result<u32, ZmodError>;
}

pub trait ManualTrigger {
    /// Fire a single software trigger event.
    fn issue_pulse(&mut self) -> Result<(), ZmodError>;
}

/// Register layout of the trigger detector block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRegisterMap {
    pub status: usize,
    pub idle_mask: u32,
    pub control: usize,
    pub start_mask: u32,
    pub prebuffer_beats: usize,
    pub trigger_to_last_beats: usize,
    pub trigger_enable: usize,
    pub trigger_detected: usize,
    pub detected_mask: u32,
}

impl Default for TriggerRegisterMap {
    fn default() -> Self {
        Self {
            status: 0x10,
            idle_mask: 0x01,
            control: 0x18,
            start_mask: 0x01,
            prebuffer_beats: 0x20,
            trigger_to_last_beats: 0x28,
            trigger_enable: 0x30,
            trigger_detected: 0x38,
            detected_mask: 0xFFFF_FFFF,
        }
    }
}

/// Register-level driver for the trigger detector.
///
/// Every access is bracketed by an `ap_start` so the HLS block latches
/// inputs and refreshes outputs.
#[derive(Debug)]
pub struct TriggerRegisters<R: Registers> {
    regs: R,
    map: TriggerRegisterMap,
    max_polls: usize,
}

impl<R: Registers> TriggerRegisters<R> {
    pub fn new(regs: R, map: TriggerRegisterMap) -> Self {
        Self {
            regs,
            map,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    fn commit(&mut self) -> Result<(), ZmodError> {
        issue_ap_start(&mut self.regs, self.max_polls)
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }
}

impl<R: Registers> TriggerDetector for TriggerRegisters<R> {
    fn set_position(&mut self, buffer_len: u32, trigger_offset: u32) -> Result<(), ZmodError> {
        let trigger_to_last = buffer_len.checked_sub(trigger_offset).ok_or_else(|| {
            ZmodError::InvalidConfig(format!(
                "trigger offset {trigger_offset} is past the end of a {buffer_len}-beat buffer"
            ))
        })?;
        self.regs.write32(self.map.trigger_to_last_beats, trigger_to_last)?;
        self.regs.write32(self.map.prebuffer_beats, trigger_offset)?;
        self.commit()
    }

    fn set_enable_mask(&mut self, mask: u32) -> Result<(), ZmodError> {
        self.regs.write32(self.map.trigger_enable, mask)?;
        self.commit()
    }

    fn start(&mut self) -> Result<(), ZmodError> {
        self.regs.write32(self.map.control, self.map.start_mask)?;
        self.commit()?;
        self.regs.write32(self.map.control, 0)?;
        self.commit()
    }

    fn idle_bit(&mut self) -> Result<bool, ZmodError> {
        self.commit()?;
        Ok(self.regs.read32(self.map.status)? & self.map.idle_mask != 0)
    }

    fn detected_cause_mask(&mut self) -> Result<u32, ZmodError> {
        self.commit()?;
        Ok(self.regs.read32(self.map.trigger_detected)? & self.map.detected_mask)
    }
}

/// Register-level driver for the manual trigger block.
#[derive(Debug)]
pub struct ManualTriggerRegister<R: Registers> {
    regs: R,
    /// Offset of the trigger register
    trigger: usize,
    max_polls: usize,
}

impl<R: Registers> ManualTriggerRegister<R> {
    pub fn new(regs: R, trigger: usize) -> Self {
        Self {
            regs,
            trigger,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }
}

impl<R: Registers> ManualTrigger for ManualTriggerRegister<R> {
    fn issue_pulse(&mut self) -> Result<(), ZmodError> {
        self.regs.write32(self.trigger, 1)?;
        issue_ap_start(&mut self.regs, self.max_polls)?;
        self.regs.write32(self.trigger, 0)?;
        issue_ap_start(&mut self.regs, self.max_polls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{AP_CONTROL, AP_START, MemoryRegisters};

    #[test]
    fn test_position_split() {
        let map = TriggerRegisterMap::default();
        let mut t = TriggerRegisters::new(MemoryRegisters::hls_block(), map);
        t.set_position(4096, 1024).unwrap();
        assert_eq!(t.registers().peek(map.prebuffer_beats), 1024);
        assert_eq!(t.registers().peek(map.trigger_to_last_beats), 3072);
        assert!(matches!(
            t.set_position(16, 17),
            Err(ZmodError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_start_is_a_pulse() {
        let map = TriggerRegisterMap::default();
        let mut t = TriggerRegisters::new(MemoryRegisters::hls_block(), map);
        t.start().unwrap();
        assert_eq!(
            t.registers().writes(),
            &[
                (map.control, map.start_mask),
                (AP_CONTROL, AP_START),
                (map.control, 0),
                (AP_CONTROL, AP_START),
            ]
        );
    }

    #[test]
    fn test_idle_and_cause() {
        let map = TriggerRegisterMap::default();
        let regs = MemoryRegisters::hls_block().with_sticky(map.status, map.idle_mask);
        let mut t = TriggerRegisters::new(regs, map);
        assert!(t.idle_bit().unwrap());
        assert_eq!(t.detected_cause_mask().unwrap(), 0);
    }

    #[test]
    fn test_manual_pulse_returns_low() {
        let mut m = ManualTriggerRegister::new(MemoryRegisters::hls_block(), 0x10);
        m.issue_pulse().unwrap();
        let trigger_writes: Vec<u32> = m
            .registers()
            .writes()
            .iter()
            .filter(|(off, _)| *off == 0x10)
            .map(|(_, v)| *v)
            .collect();
        assert_eq!(trigger_writes, vec![1, 0]);
        assert_eq!(m.registers().peek(0x10), 0);
    }
}
