//! Triggered acquisition into a cyclic S2MM ring.
//!
//! The scope streams continuously into a ring that the DMA engine loops
//! over. The trigger detector lets `trigger_offset` samples through, waits
//! for an enabled trigger input, lets the rest of the buffer through and
//! marks the final beat with TLAST. Because the ring wraps, the oldest
//! sample sits wherever the engine happened to be when TLAST arrived;
//! [`CaptureWindow`] recovers that position from the end-of-frame
//! descriptor.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::ZmodError;
use crate::calibration::CalibrationCoefficients;
use crate::config::{ChannelConfig, TriggerConfig};
use crate::dma::{BufferRegion, Descriptor, DescriptorRing, DmaBuffer, DmaEngine, WORD_BYTES};
use crate::frontend::FrontEnd;
use crate::trigger::{ManualTrigger, TriggerDetector};

/// Where a capture stands, as far as software has observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    /// Nothing armed
    Idle,
    /// Armed; the detector is filling the pre-trigger portion
    Prebuffering,
    /// Software is waiting on a trigger
    Awaiting,
    /// The detector went idle; the data is in memory but not yet collected
    Capturing,
    /// A window has been handed out
    Done,
}

#[derive(Clone, Copy, Debug)]
struct ArmedCapture {
    region: BufferRegion,
    trigger_offset: usize,
}

/// Drives the scope, trigger detector and S2MM ring through one capture
/// at a time.
pub struct CaptureController<E: DmaEngine, T: TriggerDetector, F: FrontEnd> {
    ring: DescriptorRing<E>,
    trigger: T,
    manual: Option<Box<dyn ManualTrigger>>,
    front_end: F,
    config: TriggerConfig,
    buffer: Option<DmaBuffer>,
    armed: Option<ArmedCapture>,
    state: CaptureState,
}

impl<E: DmaEngine, T: TriggerDetector, F: FrontEnd> CaptureController<E, T, F> {
    pub fn new(ring: DescriptorRing<E>, trigger: T, front_end: F, config: TriggerConfig) -> Self {
        Self {
            ring,
            trigger,
            manual: None,
            front_end,
            config,
            buffer: None,
            armed: None,
            state: CaptureState::Idle,
        }
    }

    /// Attach the peripheral used by [`CaptureController::trigger_manually`].
    pub fn with_manual_trigger(mut self, manual: Box<dyn ManualTrigger>) -> Self {
        self.manual = Some(manual);
        self
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    fn is_busy(&self) -> bool {
        matches!(
            self.state,
            CaptureState::Prebuffering | CaptureState::Awaiting | CaptureState::Capturing
        )
    }

    fn ensure_idle(&self, what: &str) -> Result<(), ZmodError> {
        if self.is_busy() {
            return Err(ZmodError::InvalidConfig(format!(
                "cannot {what} while a capture is in progress"
            )));
        }
        Ok(())
    }

    pub fn configure_channels(&mut self, channels: &[ChannelConfig; 2]) -> Result<(), ZmodError> {
        self.ensure_idle("change channel settings")?;
        for (ch, cfg) in channels.iter().enumerate() {
            self.front_end.set_channel_config(ch, *cfg)?;
        }
        Ok(())
    }

    pub fn upload_calibration(&mut self, coefficients: &CalibrationCoefficients) -> Result<(), ZmodError> {
        self.ensure_idle("change calibration")?;
        self.front_end.upload_calibration(coefficients)
    }

    /// Hand over the sample buffer and lay out a ring covering it.
    pub fn attach_buffer(&mut self, buffer: DmaBuffer) -> Result<(), ZmodError> {
        self.ensure_idle("replace the buffer")?;
        self.ring.create_ring(buffer.region().len_bytes)?;
        info!(
            "Capture buffer of {} samples at 0x{:08x} over {} descriptors",
            buffer.len(),
            buffer.phys_addr(),
            self.ring.len()
        );
        self.buffer = Some(buffer);
        Ok(())
    }

    /// Start a capture of `buffer_len` samples with the trigger landing at
    /// `trigger_offset`, ending the wait on any input in `enable_mask`.
    ///
    /// The ring starts first so the engine is ready for data, then the
    /// detector, then the scope stream.
    pub fn arm(&mut self, buffer_len: usize, trigger_offset: usize, enable_mask: u32) -> Result<(), ZmodError> {
        self.ensure_idle("arm")?;
        let buffer = self.buffer.as_ref().ok_or(ZmodError::RingNotCreated)?;
        if buffer_len == 0 || trigger_offset >= buffer_len {
            return Err(ZmodError::InvalidConfig(format!(
                "trigger offset {trigger_offset} must lie inside a buffer of {buffer_len} samples"
            )));
        }
        let len_beats = u32::try_from(buffer_len)
            .map_err(|_| ZmodError::InvalidConfig(format!("{buffer_len} samples is too long to capture")))?;
        let region = buffer.sub_region(buffer_len)?;
        if enable_mask == 0 {
            warn!("Arming with an empty trigger mask; only a level input already enabled can fire");
        }

        if let Err(e) = self.start_chain(region, len_beats, trigger_offset as u32, enable_mask) {
            self.shutdown();
            self.armed = None;
            self.state = CaptureState::Idle;
            return Err(e);
        }

        self.armed = Some(ArmedCapture {
            region,
            trigger_offset,
        });
        self.state = CaptureState::Prebuffering;
        info!("Armed capture of {buffer_len} samples, trigger at {trigger_offset}, mask 0x{enable_mask:x}");
        Ok(())
    }

    fn start_chain(&mut self, region: BufferRegion, len: u32, offset: u32, mask: u32) -> Result<(), ZmodError> {
        // Re-lay the ring in case this capture is shorter than the buffer
        self.ring.create_ring(region.len_bytes)?;
        self.ring.start_transfer(region, true)?;

        self.trigger.set_position(len, offset)?;
        self.trigger.set_enable_mask(mask)?;
        self.trigger.start()?;

        self.front_end.start_stream()?;
        let flags = self.front_end.status_flags()?;
        if flags.config_error {
            return Err(ZmodError::ConfigError(flags));
        }
        if flags.reset_busy {
            warn!("Front end still in reset after stream start: {flags:?}");
        }
        Ok(())
    }

    /// Fire the software trigger.
    ///
    /// A pulse issued while the detector is still prebuffering is ignored
    /// by the hardware.
    pub fn trigger_manually(&mut self) -> Result<(), ZmodError> {
        if !matches!(self.state, CaptureState::Prebuffering | CaptureState::Awaiting) {
            return Err(ZmodError::NotArmed);
        }
        let manual = self
            .manual
            .as_mut()
            .ok_or_else(|| ZmodError::InvalidConfig("no manual trigger attached".to_string()))?;
        manual.issue_pulse()?;
        debug!("Manual trigger issued");
        self.state = CaptureState::Awaiting;
        Ok(())
    }

    /// Check the detector once without blocking.
    pub fn poll(&mut self) -> Result<CaptureState, ZmodError> {
        match self.state {
            CaptureState::Idle => return Err(ZmodError::NotArmed),
            CaptureState::Prebuffering | CaptureState::Awaiting => {}
            CaptureState::Capturing | CaptureState::Done => return Ok(self.state),
        }
        let bit = self.trigger.idle_bit()?;
        if self.config.idle_polarity.is_idle(bit) {
            self.state = CaptureState::Capturing;
        }
        Ok(self.state)
    }

    /// Block until the detector reports idle again.
    ///
    /// On [`ZmodError::TriggerTimeout`] the capture stays armed; wait again,
    /// trigger manually or [`CaptureController::abort`].
    pub fn wait_for_trigger(&mut self) -> Result<(), ZmodError> {
        if self.state == CaptureState::Prebuffering {
            self.state = CaptureState::Awaiting;
        }
        let deadline = self.config.timeout().map(|t| Instant::now() + t);
        let interval = self.config.poll_interval();
        loop {
            if self.poll()? != CaptureState::Awaiting {
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("Timed out waiting for trigger");
                return Err(ZmodError::TriggerTimeout);
            }
            if interval.is_zero() {
                std::hint::spin_loop();
            } else {
                std::thread::sleep(interval);
            }
        }
    }

    /// Collect the window of a capture whose detector has gone idle.
    pub fn finish(&mut self) -> Result<CaptureWindow, ZmodError> {
        match self.state {
            CaptureState::Capturing => {}
            CaptureState::Idle | CaptureState::Done => return Err(ZmodError::NotArmed),
            CaptureState::Prebuffering | CaptureState::Awaiting => return Err(ZmodError::TriggerPending),
        }
        let armed = self.armed.take().ok_or(ZmodError::NotArmed)?;
        let buffer = self.buffer.clone().ok_or(ZmodError::RingNotCreated)?;

        self.front_end.stop_stream()?;
        self.ring.halt()?;
        self.state = CaptureState::Idle;

        let flags = self.front_end.status_flags()?;
        if flags.data_overflow {
            warn!("Samples were dropped during capture: {flags:?}");
            return Err(ZmodError::DataOverflow(flags));
        }

        self.ring.engine_mut().cache_invalidate(armed.region);
        let eof = self.ring.find_end_of_frame().ok_or_else(|| {
            warn!("No descriptor carries the end of frame");
            ZmodError::CaptureIncomplete
        })?;
        let cause = self.trigger.detected_cause_mask()?;

        let window = CaptureWindow::from_end_of_frame(buffer, armed.region, &eof, armed.trigger_offset, cause)?;
        self.state = CaptureState::Done;
        info!(
            "Capture complete: start index {}, trigger cause 0x{cause:x}",
            window.start_index()
        );
        Ok(window)
    }

    /// Wait for the trigger, then collect the window.
    pub fn capture(&mut self) -> Result<CaptureWindow, ZmodError> {
        self.wait_for_trigger()?;
        self.finish()
    }

    /// Stop the stream and the engine and drop the armed capture.
    pub fn abort(&mut self) -> Result<(), ZmodError> {
        let stopped = self.front_end.stop_stream();
        let halted = self.ring.halt();
        self.armed = None;
        self.state = CaptureState::Idle;
        info!("Capture aborted");
        stopped.and(halted)
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.front_end.stop_stream() {
            warn!("Failed to stop front end: {e}");
        }
        if let Err(e) = self.ring.halt() {
            warn!("Failed to halt DMA: {e}");
        }
    }

    pub fn ring(&self) -> &DescriptorRing<E> {
        &self.ring
    }

    pub fn front_end(&self) -> &F {
        &self.front_end
    }

    pub fn front_end_mut(&mut self) -> &mut F {
        &mut self.front_end
    }

    pub fn trigger_mut(&mut self) -> &mut T {
        &mut self.trigger
    }
}

impl<E: DmaEngine, T: TriggerDetector, F: FrontEnd> Drop for CaptureController<E, T, F> {
    fn drop(&mut self) {
        if self.is_busy() {
            self.shutdown();
        }
        self.ring.destroy();
    }
}

/// A completed capture: a wrapped buffer plus where its oldest sample sits.
#[derive(Clone, Debug)]
pub struct CaptureWindow {
    buffer: DmaBuffer,
    buffer_base: u64,
    len: usize,
    start_index: usize,
    trigger_position_index: usize,
    trigger_cause_mask: u32,
}

impl CaptureWindow {
    /// Locate the oldest sample from the descriptor that received TLAST.
    ///
    /// The sample after the last one written is the oldest, so the start
    /// index is the end of the EOF block's transferred data, wrapped.
    pub fn from_end_of_frame(
        buffer: DmaBuffer,
        region: BufferRegion,
        eof: &Descriptor,
        trigger_offset: usize,
        trigger_cause_mask: u32,
    ) -> Result<Self, ZmodError> {
        let len = region.len_words();
        let end_bytes = region
            .offset_of(eof.buf_addr)
            .map(|off| off + eof.transferred_bytes())
            .filter(|end| *end <= region.len_bytes)
            .ok_or(ZmodError::CaptureIncomplete)?;
        if len == 0 || trigger_offset >= len || len > buffer.len() {
            return Err(ZmodError::InvalidConfig(format!(
                "window of {len} samples with trigger at {trigger_offset} does not fit a buffer of {}",
                buffer.len()
            )));
        }
        Ok(Self {
            buffer_base: region.phys_addr,
            buffer,
            len,
            start_index: (end_bytes / WORD_BYTES) % len,
            trigger_position_index: trigger_offset,
            trigger_cause_mask,
        })
    }

    pub fn buffer_base(&self) -> u64 {
        self.buffer_base
    }

    /// Samples in the window.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Physical index of the oldest sample.
    pub fn start_index(&self) -> usize {
        self.start_index
    }

    /// Logical index of the trigger sample.
    pub fn trigger_position_index(&self) -> usize {
        self.trigger_position_index
    }

    pub fn trigger_cause_mask(&self) -> u32 {
        self.trigger_cause_mask
    }

    /// Buffer index holding logical sample `i`.
    pub fn physical_index(&self, i: usize) -> usize {
        (self.start_index + i) % self.len
    }

    pub fn sample(&self, i: usize) -> Result<u32, ZmodError> {
        if i >= self.len {
            return Err(ZmodError::BufferTooSmall {
                len: self.len,
                needed: i + 1,
            });
        }
        self.buffer.word(self.physical_index(i))
    }

    /// The trigger sample.
    pub fn trigger_sample(&self) -> Result<u32, ZmodError> {
        self.sample(self.trigger_position_index)
    }

    /// Every sample, oldest first.
    pub fn read_ordered(&self) -> Result<Vec<u32>, ZmodError> {
        let mut out = vec![0; self.len];
        let (tail, head) = out.split_at_mut(self.len - self.start_index);
        self.buffer.read(self.start_index, tail)?;
        self.buffer.read(0, head)?;
        Ok(out)
    }

    pub fn iter(&self) -> Result<std::vec::IntoIter<u32>, ZmodError> {
        Ok(self.read_ordered()?.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdlePolarity;
    use crate::dma::{Direction, STS_COMPLETE, STS_RXEOF};
    use crate::sim::{SimBoard, SimDma, SimScope, SimTrigger};
    use crate::trigger::MANUAL_TRIGGER_CAUSE;

    const BLOCK: usize = 1024;

    fn controller(board: &SimBoard, config: TriggerConfig) -> CaptureController<SimDma, SimTrigger, SimScope> {
        let ring = DescriptorRing::new(board.dma(Direction::S2mm), BLOCK).unwrap();
        CaptureController::new(ring, board.trigger(), board.scope(), config)
            .with_manual_trigger(Box::new(board.manual_trigger()))
    }

    fn quick() -> TriggerConfig {
        TriggerConfig {
            poll_interval_us: 0,
            timeout_ms: Some(2_000),
            ..Default::default()
        }
    }

    #[test]
    fn test_manual_trigger_lands_at_offset() {
        let board = SimBoard::new();
        let mut ctl = controller(&board, quick());
        ctl.attach_buffer(board.alloc_buffer(4096)).unwrap();

        ctl.arm(4096, 1024, 0b00011).unwrap();
        assert_eq!(ctl.state(), CaptureState::Prebuffering);
        assert_eq!(board.start_order(), vec!["dma_s2mm", "trigger", "scope"]);

        // Fill the pre-trigger portion and idle a while before firing
        board.advance(2000);
        ctl.trigger_manually().unwrap();
        let window = ctl.capture().unwrap();

        assert_eq!(ctl.state(), CaptureState::Done);
        assert_eq!(window.trigger_position_index(), 1024);
        assert_eq!(window.trigger_cause_mask(), MANUAL_TRIGGER_CAUSE);
        assert_eq!(window.len(), 4096);

        // 1024 prebuffered + 976 waiting + 3072 from the trigger on
        let produced = 1024 + 976 + 3072;
        assert_eq!(window.start_index(), produced % 4096);
        let samples = window.read_ordered().unwrap();
        let first = samples[0];
        for (i, s) in samples.iter().enumerate() {
            assert_eq!(*s, first + i as u32, "sample {i} out of order");
        }
        assert_eq!(window.trigger_sample().unwrap(), 2000, "first post-trigger sample");
        assert!(!board.scope_streaming());
        assert!(!board.engine_running(Direction::S2mm));
        assert!(board.cache_invalidations() >= 2);
    }

    #[test]
    fn test_level_trigger_and_active_low_idle() {
        let board = SimBoard::new();
        board.set_idle_polarity(IdlePolarity::ActiveLow);
        let config = TriggerConfig {
            idle_polarity: IdlePolarity::ActiveLow,
            ..quick()
        };
        let mut ctl = controller(&board, config);
        ctl.attach_buffer(board.alloc_buffer(2048)).unwrap();
        ctl.arm(2048, 0, 0b100).unwrap();
        board.set_trigger_inputs(0b110);

        let window = ctl.capture().unwrap();
        assert_eq!(window.trigger_cause_mask(), 0b100, "disabled inputs are not reported");
        assert_eq!(window.trigger_position_index(), 0);
        assert_eq!(window.trigger_sample().unwrap(), 0, "fires on the first beat");
        assert_eq!(window.start_index(), 0, "exactly one pass through the ring");
    }

    #[test]
    fn test_shorter_capture_reuses_buffer() {
        let board = SimBoard::new();
        let mut ctl = controller(&board, quick());
        ctl.attach_buffer(board.alloc_buffer(4096)).unwrap();
        ctl.arm(1024, 512, MANUAL_TRIGGER_CAUSE).unwrap();
        assert_eq!(ctl.ring().len(), 4);

        board.advance(600);
        ctl.trigger_manually().unwrap();
        let window = ctl.capture().unwrap();
        assert_eq!(window.len(), 1024);
        assert_eq!(window.start_index(), (600 + 512) % 1024);
        assert_eq!(window.trigger_sample().unwrap(), 600);
    }

    #[test]
    fn test_timeout_keeps_capture_armed() {
        let board = SimBoard::new();
        let config = TriggerConfig {
            timeout_ms: Some(20),
            ..quick()
        };
        let mut ctl = controller(&board, config);
        ctl.attach_buffer(board.alloc_buffer(1024)).unwrap();
        ctl.arm(1024, 256, 0b10).unwrap();

        assert!(matches!(ctl.wait_for_trigger(), Err(ZmodError::TriggerTimeout)));
        assert_eq!(ctl.state(), CaptureState::Awaiting);
        assert!(matches!(ctl.arm(1024, 256, 0b10), Err(ZmodError::InvalidConfig(_))));

        board.set_trigger_inputs(0b10);
        let window = ctl.capture().unwrap();
        assert_eq!(window.trigger_cause_mask(), 0b10);
    }

    #[test]
    fn test_abort_then_rearm() {
        let board = SimBoard::new();
        let mut ctl = controller(&board, quick());
        ctl.attach_buffer(board.alloc_buffer(1024)).unwrap();
        ctl.arm(1024, 256, 0b10).unwrap();
        ctl.abort().unwrap();
        assert_eq!(ctl.state(), CaptureState::Idle);
        assert!(!board.scope_streaming());
        assert!(matches!(ctl.finish(), Err(ZmodError::NotArmed)));

        ctl.arm(1024, 256, MANUAL_TRIGGER_CAUSE).unwrap();
        board.advance(300);
        ctl.trigger_manually().unwrap();
        assert!(ctl.capture().is_ok());
    }

    #[test]
    fn test_config_error_aborts_arm() {
        let board = SimBoard::new();
        board.inject_config_error(true);
        let mut ctl = controller(&board, quick());
        ctl.attach_buffer(board.alloc_buffer(1024)).unwrap();
        assert!(matches!(
            ctl.arm(1024, 0, 1),
            Err(ZmodError::ConfigError(flags)) if flags.config_error
        ));
        assert_eq!(ctl.state(), CaptureState::Idle);
        assert!(!board.scope_streaming());
        assert!(!board.engine_running(Direction::S2mm));
    }

    #[test]
    fn test_overflow_fails_the_capture() {
        let board = SimBoard::new();
        let mut ctl = controller(&board, quick());
        ctl.attach_buffer(board.alloc_buffer(1024)).unwrap();
        ctl.arm(1024, 256, MANUAL_TRIGGER_CAUSE).unwrap();
        board.advance(300);
        board.inject_overflow();
        ctl.trigger_manually().unwrap();

        assert!(matches!(
            ctl.capture(),
            Err(ZmodError::DataOverflow(flags)) if flags.data_overflow
        ));
        assert_eq!(ctl.state(), CaptureState::Idle);
        assert!(!board.scope_streaming());
        assert!(!board.engine_running(Direction::S2mm));

        // The next stream start clears the flag
        ctl.arm(1024, 256, MANUAL_TRIGGER_CAUSE).unwrap();
        board.advance(300);
        ctl.trigger_manually().unwrap();
        assert!(ctl.capture().is_ok());
    }

    #[test]
    fn test_missing_end_of_frame_is_incomplete() {
        // Software expects an active-low idle bit; the detector drives it active-high
        let board = SimBoard::new();
        let config = TriggerConfig {
            idle_polarity: IdlePolarity::ActiveLow,
            ..quick()
        };
        let mut ctl = controller(&board, config);
        ctl.attach_buffer(board.alloc_buffer(1024)).unwrap();
        ctl.arm(1024, 256, 0b10).unwrap();

        assert!(matches!(ctl.capture(), Err(ZmodError::CaptureIncomplete)));
        assert_eq!(ctl.state(), CaptureState::Idle);
        assert!(!board.scope_streaming());
    }

    #[test]
    fn test_finish_before_trigger_is_pending() {
        let board = SimBoard::new();
        let mut ctl = controller(&board, quick());
        ctl.attach_buffer(board.alloc_buffer(1024)).unwrap();
        ctl.arm(1024, 256, 0b10).unwrap();
        assert!(matches!(ctl.finish(), Err(ZmodError::TriggerPending)));
        assert_eq!(ctl.state(), CaptureState::Prebuffering, "still armed");

        board.set_trigger_inputs(0b10);
        assert!(ctl.capture().is_ok());
    }

    #[test]
    fn test_arm_rejects_bad_geometry() {
        let board = SimBoard::new();
        let mut ctl = controller(&board, quick());
        assert!(matches!(ctl.arm(1024, 0, 1), Err(ZmodError::RingNotCreated)));
        ctl.attach_buffer(board.alloc_buffer(1024)).unwrap();
        assert!(matches!(ctl.arm(1024, 1024, 1), Err(ZmodError::InvalidConfig(_))));
        assert!(matches!(ctl.arm(2048, 0, 1), Err(ZmodError::BufferTooSmall { .. })));
        // 1000 samples is not a whole number of 1024-byte blocks
        assert!(matches!(ctl.arm(1000, 0, 1), Err(ZmodError::MisalignedBuffer { .. })));
        assert_eq!(ctl.state(), CaptureState::Idle);
    }

    #[test]
    fn test_window_start_follows_eof() {
        let len = 1024;
        let buffer = DmaBuffer::new(0x2000_0000, len);
        let region = buffer.region();
        let block_words = BLOCK / WORD_BYTES;

        for k in [0, 1, 255, 256, 700, len - 1] {
            // Oldest sample written right after index k
            let data: Vec<u32> = (0..len).map(|i| ((i + len - (k + 1)) % len) as u32).collect();
            buffer.write(0, &data).unwrap();
            let block = k / block_words;
            let eof = Descriptor {
                slot: block,
                buf_addr: region.phys_addr + (block * BLOCK) as u64,
                status: STS_COMPLETE | STS_RXEOF | (((k % block_words) + 1) * WORD_BYTES) as u32,
                ..Default::default()
            };
            let window = CaptureWindow::from_end_of_frame(buffer.clone(), region, &eof, 10, 1).unwrap();
            assert_eq!(window.start_index(), (k + 1) % len, "EOF at {k}");
            let ordered: Vec<u32> = window.iter().unwrap().collect();
            assert_eq!(ordered, (0..len as u32).collect::<Vec<_>>(), "EOF at {k}");
            assert_eq!(window.sample(10).unwrap(), 10);
        }
    }

    #[test]
    fn test_window_rejects_foreign_descriptor() {
        let buffer = DmaBuffer::new(0x2000_0000, 256);
        let eof = Descriptor {
            buf_addr: 0x3000_0000,
            status: STS_COMPLETE | STS_RXEOF | 4,
            ..Default::default()
        };
        assert!(matches!(
            CaptureWindow::from_end_of_frame(buffer.clone(), buffer.region(), &eof, 0, 0),
            Err(ZmodError::CaptureIncomplete)
        ));
    }
}
