//! Register windows mapped through a Linux UIO device.

use std::fs::File;
use std::path::Path;

use memmap::{MmapMut, MmapOptions};

use super::Registers;
use crate::ZmodError;

/// A UIO map exposing one AXI-Lite peripheral.
#[derive(Debug)]
pub struct UioRegisters {
    map: MmapMut,
}

impl UioRegisters {
    /// Map `len` bytes of map 0 of a UIO device such as `/dev/uio3`.
    pub fn open(path: &Path, len: usize) -> Result<Self, ZmodError> {
        let file = File::options().read(true).write(true).open(path)?;
        let map = unsafe { MmapOptions::new().len(len).map_mut(&file)? };
        Ok(Self { map })
    }

    fn check(&self, offset: usize) -> Result<(), ZmodError> {
        if offset % 4 != 0 || offset + 4 > self.map.len() {
            return Err(ZmodError::InvalidConfig(format!(
                "register offset 0x{offset:x} outside a {}-byte window",
                self.map.len()
            )));
        }
        Ok(())
    }
}

impl Registers for UioRegisters {
    fn read32(&mut self, offset: usize) -> Result<u32, ZmodError> {
        self.check(offset)?;
        let p = self.map.as_ptr() as *const u32;
        // Offset is word aligned and inside the mapping
        Ok(unsafe { std::ptr::read_volatile(p.add(offset / 4)) })
    }

    fn write32(&mut self, offset: usize, value: u32) -> Result<(), ZmodError> {
        self.check(offset)?;
        let p = self.map.as_mut_ptr() as *mut u32;
        unsafe { std::ptr::write_volatile(p.add(offset / 4), value) };
        Ok(())
    }
}
