//! Descriptor ring covering one sample buffer.
//!
//! The ring partitions a buffer into fixed-size blocks, one descriptor per
//! block, and moves descriptors between software and the engine. It is
//! single-owner: whichever controller holds the ring is the only writer.

use tracing::{debug, info};

use super::{BufferRegion, CTRL_EOF, CTRL_SOF, Descriptor, DmaEngine, WORD_BYTES};
use crate::ZmodError;

/// Descriptor ring bound to one DMA channel.
#[derive(Debug)]
pub struct DescriptorRing<E: DmaEngine> {
    engine: E,

    /// Bytes per full block
    block_bytes: usize,

    /// Descriptors the engine has storage for
    capacity: usize,

    /// Descriptors in the current ring layout
    len: usize,

    /// Descriptors not currently owned by hardware
    free: usize,

    /// Next slot handed out by allocation
    next_slot: usize,

    cyclic: bool,
    region: Option<BufferRegion>,

    /// An end-of-frame descriptor has come back since the last start
    eof_reclaimed: bool,
}

impl<E: DmaEngine> DescriptorRing<E> {
    /// Configure the engine and bind a ring to it.
    ///
    /// Blocks are at most `max_block_bytes`, further limited by what the
    /// engine reports and rounded down to whole sample words.
    pub fn new(mut engine: E, max_block_bytes: usize) -> Result<Self, ZmodError> {
        let hw_max = engine.configure()?;
        let block_bytes = max_block_bytes.min(hw_max) / WORD_BYTES * WORD_BYTES;
        if block_bytes == 0 {
            return Err(ZmodError::InvalidConfig(format!(
                "descriptor block of {max_block_bytes} bytes (engine max {hw_max}) holds no samples"
            )));
        }
        debug!("{:?} ring using {block_bytes}-byte blocks", engine.direction());

        Ok(Self {
            engine,
            block_bytes,
            capacity: 0,
            len: 0,
            free: 0,
            next_slot: 0,
            cyclic: false,
            region: None,
            eof_reclaimed: false,
        })
    }

    /// Number of descriptors needed to cover `len_bytes`.
    pub fn descriptors_for(&self, len_bytes: usize) -> usize {
        len_bytes.div_ceil(self.block_bytes)
    }

    /// Lay out a ring sized for a buffer of `buffer_len_bytes`.
    ///
    /// Descriptor storage is only reallocated when the current storage is
    /// too small. Must not be called while a transfer is in flight.
    pub fn create_ring(&mut self, buffer_len_bytes: usize) -> Result<(), ZmodError> {
        let count = self.descriptors_for(buffer_len_bytes);
        if count == 0 {
            return Err(ZmodError::InvalidConfig(
                "cannot build a ring for an empty buffer".to_string(),
            ));
        }

        if count > self.capacity {
            if self.capacity > 0 {
                self.engine.free_descriptors();
                self.capacity = 0;
                self.len = 0;
                self.free = 0;
            }
            self.engine
                .create_descriptors(count)
                .map_err(|e| match e {
                    ZmodError::AllocationFailed { .. } => e,
                    other => {
                        debug!("descriptor allocation failed: {other}");
                        ZmodError::AllocationFailed { descriptors: count }
                    }
                })?;
            self.capacity = count;
            info!("Allocated {count} descriptors");
        }

        self.len = count;
        self.free = count;
        self.next_slot = 0;
        self.region = None;
        self.eof_reclaimed = false;
        self.set_cyclic_mode(false);
        Ok(())
    }

    /// Enable or disable cyclic operation on the ring and the engine together.
    fn set_cyclic_mode(&mut self, cyclic: bool) {
        self.engine.set_cyclic(cyclic);
        self.cyclic = cyclic;
    }

    fn alloc_slot(&mut self) -> usize {
        let slot = self.next_slot;
        self.next_slot = (self.next_slot + 1) % self.len;
        slot
    }

    /// Partition `region` into blocks, queue them and start the engine.
    ///
    /// In cyclic mode the buffer must fill the ring exactly with full blocks.
    pub fn start_transfer(&mut self, region: BufferRegion, cyclic: bool) -> Result<(), ZmodError> {
        if self.len == 0 {
            return Err(ZmodError::RingNotCreated);
        }

        let needed = self.descriptors_for(region.len_bytes);
        if needed == 0 {
            return Err(ZmodError::InvalidConfig(
                "cannot transfer an empty buffer".to_string(),
            ));
        }
        if cyclic {
            if region.len_bytes % self.block_bytes != 0 {
                return Err(ZmodError::MisalignedBuffer {
                    len_bytes: region.len_bytes,
                    block_bytes: self.block_bytes,
                });
            }
            if needed != self.len {
                return Err(ZmodError::InvalidConfig(format!(
                    "cyclic transfer spans {needed} descriptors but the ring holds {}",
                    self.len
                )));
            }
        }
        if needed > self.free {
            return Err(ZmodError::InsufficientDescriptors {
                needed,
                free: self.free,
            });
        }

        // Build the whole set before touching hardware or ring counters
        let first_slot = if cyclic { 0 } else { self.next_slot };
        let descriptors: Vec<Descriptor> = (0..needed)
            .map(|i| {
                let offset = i * self.block_bytes;
                let mut d = Descriptor {
                    slot: (first_slot + i) % self.len,
                    buf_addr: region.phys_addr + offset as u64,
                    id: i as u32,
                    ..Default::default()
                };
                d.set_block_bytes(self.block_bytes.min(region.len_bytes - offset));
                if i == 0 {
                    d.control |= CTRL_SOF;
                }
                if i == needed - 1 {
                    d.control |= CTRL_EOF;
                }
                d
            })
            .collect();

        match self.engine.direction() {
            super::Direction::Mm2s => self.engine.cache_flush(region),
            super::Direction::S2mm => self.engine.cache_invalidate(region),
        }

        self.set_cyclic_mode(cyclic);
        if let Err(e) = self.engine.submit(&descriptors) {
            self.set_cyclic_mode(false);
            return Err(e);
        }
        self.free -= needed;
        self.next_slot = (first_slot + needed) % self.len;
        self.region = Some(region);
        self.eof_reclaimed = false;

        self.engine.start()?;
        debug!(
            "Started {:?} transfer of {} bytes over {needed} descriptors (cyclic: {cyclic})",
            self.engine.direction(),
            region.len_bytes
        );
        Ok(())
    }

    /// Re-queue every block the engine has finished with.
    ///
    /// Returns the number of blocks reclaimed; zero means nothing has
    /// finished yet and the ring is unchanged.
    pub fn resubmit(&mut self) -> Result<usize, ZmodError> {
        self.resubmit_at_most(usize::MAX)
    }

    /// Like [`DescriptorRing::resubmit`], but re-queue no more than `limit` blocks.
    pub fn resubmit_at_most(&mut self, limit: usize) -> Result<usize, ZmodError> {
        if self.cyclic {
            return self.cyclic_resubmit();
        }
        if limit == 0 {
            return Ok(0);
        }

        let finished = self.engine.reclaim_finished(limit);
        let n = finished.len();
        if n == 0 {
            return Ok(0);
        }

        // Free the finished descriptors, then allocate the same number of
        // fresh ones carrying the same block
        self.free += n;
        let fresh: Vec<Descriptor> = finished
            .iter()
            .map(|d| Descriptor {
                slot: self.alloc_slot(),
                buf_addr: d.buf_addr,
                length_field: d.length_field,
                control: d.control,
                status: 0,
                id: d.id,
            })
            .collect();
        self.free -= n;

        if let Err(e) = self.engine.submit(&fresh) {
            // Descriptors are back in software hands
            self.free += n;
            return Err(e);
        }
        Ok(n)
    }

    /// Hand finished descriptors straight back to a cyclic engine.
    pub fn cyclic_resubmit(&mut self) -> Result<usize, ZmodError> {
        let finished = self.engine.reclaim_finished(usize::MAX);
        if finished.is_empty() {
            return Ok(0);
        }
        let requeue: Vec<Descriptor> = finished
            .into_iter()
            .map(|d| Descriptor { status: 0, ..d })
            .collect();
        self.engine.submit(&requeue)?;
        Ok(requeue.len())
    }

    /// Whether the descriptor carrying the end-of-frame marker has come back.
    ///
    /// Undefined for a cyclic ring, which has no end.
    pub fn transfer_done(&mut self) -> Result<bool, ZmodError> {
        if self.cyclic {
            return Err(ZmodError::CyclicModeQuery);
        }
        if self.eof_reclaimed {
            return Ok(true);
        }

        let finished = self.engine.reclaim_finished(usize::MAX);
        self.free += finished.len();
        if finished.iter().any(Descriptor::is_eof) {
            self.eof_reclaimed = true;
        }
        Ok(self.eof_reclaimed)
    }

    /// Find the descriptor the engine marked with a received end of frame.
    pub fn find_end_of_frame(&mut self) -> Option<Descriptor> {
        (0..self.len)
            .filter_map(|slot| self.engine.read_descriptor(slot))
            .find(Descriptor::is_rx_eof)
    }

    /// Stop the engine and leave both sides out of cyclic mode.
    pub fn halt(&mut self) -> Result<(), ZmodError> {
        let res = self.engine.halt();
        self.set_cyclic_mode(false);
        res
    }

    /// Release descriptor storage. Calling it again is a no-op.
    ///
    /// The engine must already be halted.
    pub fn destroy(&mut self) {
        if self.capacity == 0 {
            return;
        }
        self.set_cyclic_mode(false);
        self.engine.free_descriptors();
        self.capacity = 0;
        self.len = 0;
        self.free = 0;
        self.next_slot = 0;
        self.region = None;
        debug!("Descriptor ring destroyed");
    }

    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// Descriptors in the current layout.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_count(&self) -> usize {
        self.free
    }

    pub fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    /// Buffer of the most recent transfer.
    pub fn region(&self) -> Option<BufferRegion> {
        self.region
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::{DmaBuffer, Direction};
    use crate::sim::SimBoard;

    const BLOCK: usize = 1024;

    fn ring(board: &SimBoard, direction: Direction) -> DescriptorRing<crate::sim::SimDma> {
        DescriptorRing::new(board.dma(direction), BLOCK).unwrap()
    }

    #[test]
    fn test_partition_counts_and_lengths() {
        let board = SimBoard::new();
        let mut r = ring(&board, Direction::Mm2s);
        for len_bytes in [4_usize, 1020, 1024, 1028, 4096, 5000, 65536 + 12] {
            let buf = DmaBuffer::new(0x1000_0000, len_bytes.div_ceil(4));
            let region = BufferRegion {
                phys_addr: buf.phys_addr(),
                len_bytes,
            };
            r.create_ring(len_bytes).unwrap();
            r.start_transfer(region, false).unwrap();
            r.halt().unwrap();

            let queued = board.queued_descriptors(Direction::Mm2s);
            assert_eq!(queued.len(), len_bytes.div_ceil(BLOCK), "count for {len_bytes}");
            let total: usize = queued.iter().map(Descriptor::block_bytes).sum();
            assert_eq!(total, len_bytes, "block lengths must sum to the buffer length");
            assert!(queued[0].is_sof());
            assert!(queued.last().unwrap().is_eof());
            assert_eq!(queued.iter().filter(|d| d.is_eof()).count(), 1);
            assert!(
                queued[..queued.len() - 1].iter().all(|d| d.block_bytes() == BLOCK),
                "only the last block may be short"
            );
            board.clear_queues();
        }
    }

    #[test]
    fn test_ring_grows_but_never_shrinks_storage() {
        let board = SimBoard::new();
        let mut r = ring(&board, Direction::Mm2s);
        r.create_ring(4 * BLOCK).unwrap();
        assert_eq!((r.len(), r.capacity()), (4, 4));
        r.create_ring(2 * BLOCK).unwrap();
        assert_eq!((r.len(), r.capacity()), (2, 4), "smaller buffers reuse storage");
        r.create_ring(8 * BLOCK).unwrap();
        assert_eq!((r.len(), r.capacity()), (8, 8));
        assert_eq!(board.descriptor_allocations(Direction::Mm2s), 2);
    }

    #[test]
    fn test_allocation_failure_leaves_no_ring() {
        let board = SimBoard::new();
        board.limit_descriptor_space(Direction::S2mm, 3);
        let mut r = ring(&board, Direction::S2mm);
        assert!(matches!(
            r.create_ring(4 * BLOCK),
            Err(ZmodError::AllocationFailed { descriptors: 4 })
        ));
        assert_eq!(r.capacity(), 0);
        let region = BufferRegion {
            phys_addr: 0,
            len_bytes: BLOCK,
        };
        assert!(matches!(
            r.start_transfer(region, false),
            Err(ZmodError::RingNotCreated)
        ));
    }

    #[test]
    fn test_insufficient_descriptors() {
        let board = SimBoard::new();
        let mut r = ring(&board, Direction::Mm2s);
        r.create_ring(2 * BLOCK).unwrap();
        let region = BufferRegion {
            phys_addr: 0x4000,
            len_bytes: 3 * BLOCK,
        };
        assert!(matches!(
            r.start_transfer(region, false),
            Err(ZmodError::InsufficientDescriptors { needed: 3, free: 2 })
        ));
        assert_eq!(r.free_count(), 2, "rejected call must not consume descriptors");
        assert!(board.queued_descriptors(Direction::Mm2s).is_empty());
    }

    #[test]
    fn test_cyclic_requires_whole_blocks() {
        let board = SimBoard::new();
        let mut r = ring(&board, Direction::S2mm);
        r.create_ring(BLOCK + 8).unwrap();
        let region = BufferRegion {
            phys_addr: 0x4000,
            len_bytes: BLOCK + 8,
        };
        assert!(matches!(
            r.start_transfer(region, true),
            Err(ZmodError::MisalignedBuffer { .. })
        ));
        assert!(!r.is_cyclic());
        assert!(!board.engine_cyclic(Direction::S2mm));
    }

    #[test]
    fn test_cyclic_mode_set_and_cleared_together() {
        let board = SimBoard::new();
        let mut r = ring(&board, Direction::S2mm);
        r.create_ring(4 * BLOCK).unwrap();
        let region = BufferRegion {
            phys_addr: 0x4000,
            len_bytes: 4 * BLOCK,
        };
        r.start_transfer(region, true).unwrap();
        assert!(r.is_cyclic() && board.engine_cyclic(Direction::S2mm));
        assert!(matches!(r.transfer_done(), Err(ZmodError::CyclicModeQuery)));
        r.halt().unwrap();
        assert!(!r.is_cyclic() && !board.engine_cyclic(Direction::S2mm));
    }

    #[test]
    fn test_resubmit_with_nothing_finished() {
        let board = SimBoard::new();
        board.set_beats_per_poll(0);
        let mut r = ring(&board, Direction::Mm2s);
        r.create_ring(4 * BLOCK).unwrap();
        let buf = DmaBuffer::new(0x8000, BLOCK);
        board.attach(&buf);
        r.start_transfer(buf.region(), false).unwrap();

        let free = r.free_count();
        let queued = board.queued_descriptors(Direction::Mm2s);
        assert_eq!(r.resubmit().unwrap(), 0);
        assert_eq!(r.free_count(), free);
        assert_eq!(board.queued_descriptors(Direction::Mm2s), queued);
    }

    #[test]
    fn test_transfer_done_after_eof() {
        let board = SimBoard::new();
        board.set_beats_per_poll(BLOCK / 4);
        let mut r = ring(&board, Direction::Mm2s);
        let buf = DmaBuffer::new(0x8000, 3 * BLOCK / 4);
        board.attach(&buf);
        r.create_ring(3 * BLOCK).unwrap();
        r.start_transfer(buf.region(), false).unwrap();

        let mut polls = 0;
        while !r.transfer_done().unwrap() {
            polls += 1;
            assert!(polls < 10, "transfer never completed");
        }
        assert_eq!(polls, 2, "one block per poll, done when the third returns");
        assert_eq!(r.free_count(), 3);
        assert!(r.transfer_done().unwrap(), "completion is sticky");
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let board = SimBoard::new();
        let mut r = ring(&board, Direction::Mm2s);
        r.create_ring(2 * BLOCK).unwrap();
        r.destroy();
        r.destroy();
        assert_eq!(r.capacity(), 0);
        assert_eq!(board.descriptor_frees(Direction::Mm2s), 1);
    }
}
