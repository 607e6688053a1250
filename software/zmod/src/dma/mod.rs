//! Scatter-gather DMA: the descriptor model, the engine primitive it is
//! handed to, and the ring that keeps descriptors flowing.

pub mod buffer;
pub mod ring;

pub use buffer::{BufferRegion, DmaBuffer, WORD_BYTES};
pub use ring::DescriptorRing;

use crate::ZmodError;

/// Start-of-frame marker in the descriptor control word.
pub const CTRL_SOF: u32 = 1 << 27;

/// End-of-frame marker in the descriptor control word.
pub const CTRL_EOF: u32 = 1 << 26;

/// Descriptor has been processed by the engine.
pub const STS_COMPLETE: u32 = 1 << 31;

/// Receive block began a stream frame.
pub const STS_RXSOF: u32 = 1 << 27;

/// Receive block ended a stream frame (TLAST seen).
pub const STS_RXEOF: u32 = 1 << 26;

/// Transferred byte count field of the status word.
pub const STS_LENGTH_MASK: u32 = (1 << 26) - 1;

/// Direction of a DMA channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Stream to memory (capture)
    S2mm,
    /// Memory to stream (playback)
    Mm2s,
}

/// One scatter-gather buffer descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Descriptor {
    /// Position in descriptor storage
    pub slot: usize,

    /// Bus address of the data block
    pub buf_addr: u64,

    /// Block length minus one; the engine moves `length_field + 1` bytes
    pub length_field: u32,

    /// SOF/EOF markers
    pub control: u32,

    /// Written back by the engine on completion
    pub status: u32,

    /// Software tag, untouched by hardware
    pub id: u32,
}

impl Descriptor {
    /// Bytes this descriptor asks the engine to move.
    pub fn block_bytes(&self) -> usize {
        self.length_field as usize + 1
    }

    pub fn set_block_bytes(&mut self, bytes: usize) {
        debug_assert!(bytes > 0, "descriptor blocks are never empty");
        self.length_field = (bytes - 1) as u32;
    }

    pub fn is_sof(&self) -> bool {
        self.control & CTRL_SOF != 0
    }

    pub fn is_eof(&self) -> bool {
        self.control & CTRL_EOF != 0
    }

    pub fn is_complete(&self) -> bool {
        self.status & STS_COMPLETE != 0
    }

    /// Hardware saw TLAST while filling this block.
    pub fn is_rx_eof(&self) -> bool {
        self.status & STS_RXEOF != 0
    }

    /// Bytes the engine actually moved.
    pub fn transferred_bytes(&self) -> usize {
        (self.status & STS_LENGTH_MASK) as usize
    }
}

/// Primitive operations of one DMA channel.
///
/// Interrupts are never used; every wait is a poll through
/// [`DmaEngine::reclaim_finished`] or [`DmaEngine::read_descriptor`].
pub trait DmaEngine {
    fn direction(&self) -> Direction;

    /// Reset the channel with interrupts disabled and report the largest
    /// block a single descriptor may carry.
    fn configure(&mut self) -> Result<usize, ZmodError>;

    /// Reserve storage for `count` descriptors laid out as one ring.
    fn create_descriptors(&mut self, count: usize) -> Result<(), ZmodError>;

    /// Release descriptor storage.
    fn free_descriptors(&mut self);

    /// Queue descriptors to hardware in order.
    fn submit(&mut self, descriptors: &[Descriptor]) -> Result<(), ZmodError>;

    /// Take back at most `max` completed descriptors, oldest first.
    fn reclaim_finished(&mut self, max: usize) -> Vec<Descriptor>;

    /// Current contents of a descriptor slot as the hardware left it.
    fn read_descriptor(&mut self, slot: usize) -> Option<Descriptor>;

    /// Let the engine loop over the ring without software resubmission.
    fn set_cyclic(&mut self, cyclic: bool);

    fn start(&mut self) -> Result<(), ZmodError>;

    fn halt(&mut self) -> Result<(), ZmodError>;

    /// Write back CPU caches covering `region` so the engine reads fresh data.
    fn cache_flush(&mut self, region: BufferRegion);

    /// Drop CPU cache lines covering `region` so the CPU reads what the engine wrote.
    fn cache_invalidate(&mut self, region: BufferRegion);
}
