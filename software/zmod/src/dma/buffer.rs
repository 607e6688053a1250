//! Sample memory shared between the CPU and a DMA master.
//!
//! Buffers are addressed by word index. The physical base address is only
//! used to fill descriptors and to map completed descriptors back to an
//! index, so no pointer arithmetic escapes this module.

use std::sync::{Arc, Mutex, MutexGuard};

#[cfg(feature = "uio")]
use std::{fs::File, path::Path};

use crate::ZmodError;

/// Bytes in one packed sample word.
pub const WORD_BYTES: usize = 4;

/// Bus-side view of a buffer: where the DMA engine sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferRegion {
    pub phys_addr: u64,
    pub len_bytes: usize,
}

impl BufferRegion {
    /// Byte offset of a bus address inside this region, if it lies inside.
    ///
    /// The one-past-the-end address is accepted so that `addr + length` of
    /// the final block resolves to `len_bytes`.
    pub fn offset_of(&self, addr: u64) -> Option<usize> {
        let offset = usize::try_from(addr.checked_sub(self.phys_addr)?).ok()?;
        (offset <= self.len_bytes).then_some(offset)
    }

    pub fn len_words(&self) -> usize {
        self.len_bytes / WORD_BYTES
    }
}

#[derive(Debug)]
enum Storage {
    Heap(Vec<u32>),
    #[cfg(feature = "uio")]
    Mapped(memmap::MmapMut),
}

impl Storage {
    fn len_words(&self) -> usize {
        match self {
            Storage::Heap(v) => v.len(),
            #[cfg(feature = "uio")]
            Storage::Mapped(m) => m.len() / WORD_BYTES,
        }
    }

    fn read(&self, start: usize, out: &mut [u32]) {
        match self {
            Storage::Heap(v) => out.copy_from_slice(&v[start..start + out.len()]),
            #[cfg(feature = "uio")]
            Storage::Mapped(m) => {
                let p = m.as_ptr() as *const u32;
                for (i, w) in out.iter_mut().enumerate() {
                    // Bounds checked by the caller against len_words
                    *w = unsafe { std::ptr::read_volatile(p.add(start + i)) };
                }
            }
        }
    }

    fn write(&mut self, start: usize, data: &[u32]) {
        match self {
            Storage::Heap(v) => v[start..start + data.len()].copy_from_slice(data),
            #[cfg(feature = "uio")]
            Storage::Mapped(m) => {
                let p = m.as_mut_ptr() as *mut u32;
                for (i, w) in data.iter().enumerate() {
                    unsafe { std::ptr::write_volatile(p.add(start + i), *w) };
                }
            }
        }
    }
}

/// Handle to a DMA-able sample buffer.
///
/// Clones share the same memory; one clone is typically held by the
/// controller and one by whatever models or owns the DMA master.
#[derive(Clone, Debug)]
pub struct DmaBuffer {
    phys_addr: u64,
    len_words: usize,
    storage: Arc<Mutex<Storage>>,
}

impl DmaBuffer {
    /// Zeroed heap-backed buffer that the bus sees at `phys_addr`.
    pub fn new(phys_addr: u64, len_words: usize) -> Self {
        Self {
            phys_addr,
            len_words,
            storage: Arc::new(Mutex::new(Storage::Heap(vec![0; len_words]))),
        }
    }

    /// Map a contiguous kernel buffer (e.g. a u-dma-buf device node).
    ///
    /// `phys_addr` is the bus address the driver reports for the buffer.
    #[cfg(feature = "uio")]
    pub fn map_device(path: &Path, phys_addr: u64, len_words: usize) -> Result<Self, ZmodError> {
        let file = File::options().read(true).write(true).open(path)?;
        let map = unsafe {
            memmap::MmapOptions::new()
                .len(len_words * WORD_BYTES)
                .map_mut(&file)?
        };
        Ok(Self {
            phys_addr,
            len_words,
            storage: Arc::new(Mutex::new(Storage::Mapped(map))),
        })
    }

    pub fn len(&self) -> usize {
        self.len_words
    }

    pub fn is_empty(&self) -> bool {
        self.len_words == 0
    }

    pub fn phys_addr(&self) -> u64 {
        self.phys_addr
    }

    pub fn region(&self) -> BufferRegion {
        BufferRegion {
            phys_addr: self.phys_addr,
            len_bytes: self.len_words * WORD_BYTES,
        }
    }

    /// Region covering the first `len_words` words only.
    pub fn sub_region(&self, len_words: usize) -> Result<BufferRegion, ZmodError> {
        if len_words > self.len_words {
            return Err(ZmodError::BufferTooSmall {
                len: self.len_words,
                needed: len_words,
            });
        }
        Ok(BufferRegion {
            phys_addr: self.phys_addr,
            len_bytes: len_words * WORD_BYTES,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Storage>, ZmodError> {
        self.storage.lock().map_err(|_| ZmodError::Poisoned)
    }

    fn check(&self, start: usize, n: usize) -> Result<(), ZmodError> {
        match start.checked_add(n) {
            Some(end) if end <= self.len_words => Ok(()),
            _ => Err(ZmodError::BufferTooSmall {
                len: self.len_words,
                needed: start.saturating_add(n),
            }),
        }
    }

    /// Copy words out starting at `start`.
    pub fn read(&self, start: usize, out: &mut [u32]) -> Result<(), ZmodError> {
        self.check(start, out.len())?;
        let storage = self.lock()?;
        debug_assert!(storage.len_words() >= self.len_words);
        storage.read(start, out);
        Ok(())
    }

    /// Copy words in starting at `start`.
    pub fn write(&self, start: usize, data: &[u32]) -> Result<(), ZmodError> {
        self.check(start, data.len())?;
        self.lock()?.write(start, data);
        Ok(())
    }

    pub fn word(&self, index: usize) -> Result<u32, ZmodError> {
        let mut w = [0_u32];
        self.read(index, &mut w)?;
        Ok(w[0])
    }

    pub fn to_vec(&self) -> Result<Vec<u32>, ZmodError> {
        let mut out = vec![0; self.len_words];
        self.read(0, &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_of_bounds() {
        let r = BufferRegion {
            phys_addr: 0x1000_0000,
            len_bytes: 64,
        };
        assert_eq!(r.offset_of(0x1000_0000), Some(0));
        assert_eq!(r.offset_of(0x1000_0040), Some(64), "one past the end is allowed");
        assert_eq!(r.offset_of(0x1000_0044), None);
        assert_eq!(r.offset_of(0x0FFF_FFFC), None);
        assert_eq!(r.len_words(), 16);
    }

    #[test]
    fn test_clones_share_memory() {
        let a = DmaBuffer::new(0x2000, 8);
        let b = a.clone();
        a.write(6, &[7, 8]).unwrap();
        assert_eq!(b.word(7).unwrap(), 8);
        assert!(matches!(
            b.write(7, &[1, 2]),
            Err(ZmodError::BufferTooSmall { len: 8, needed: 9 })
        ));
        assert!(matches!(
            a.sub_region(9),
            Err(ZmodError::BufferTooSmall { .. })
        ));
        assert_eq!(a.sub_region(4).unwrap().len_bytes, 16);
    }
}
