//! Waveform playback through the MM2S ring.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::{Receiver, TryRecvError};
use tracing::{debug, info, warn};

use crate::ZmodError;
use crate::calibration::CalibrationCoefficients;
use crate::config::ChannelConfig;
use crate::dma::{BufferRegion, DescriptorRing, DmaBuffer, DmaEngine};
use crate::frontend::FrontEnd;

/// Checked between ring services during continuous playback.
pub trait StopSignal {
    fn should_stop(&mut self) -> bool;
}

impl StopSignal for &AtomicBool {
    fn should_stop(&mut self) -> bool {
        self.load(Ordering::Acquire)
    }
}

impl StopSignal for Arc<AtomicBool> {
    fn should_stop(&mut self) -> bool {
        self.load(Ordering::Acquire)
    }
}

/// Stops on a message or when every sender is gone.
impl StopSignal for Receiver<()> {
    fn should_stop(&mut self) -> bool {
        !matches!(self.try_recv(), Err(TryRecvError::Empty))
    }
}

/// Adapts a closure into a [`StopSignal`].
pub struct StopWhen<F: FnMut() -> bool>(pub F);

impl<F: FnMut() -> bool> StopSignal for StopWhen<F> {
    fn should_stop(&mut self) -> bool {
        (self.0)()
    }
}

/// What a playback call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Complete passes over the waveform handed to the engine
    pub passes: usize,

    /// Blocks re-queued after their first pass
    pub blocks_resubmitted: usize,
}

/// Plays a loaded waveform out of the AWG.
pub struct GenerateController<E: DmaEngine, F: FrontEnd> {
    ring: DescriptorRing<E>,
    front_end: F,
    waveform: Option<BufferRegion>,
    buffer: Option<DmaBuffer>,
    poll_interval: Duration,
    playing: bool,
}

impl<E: DmaEngine, F: FrontEnd> GenerateController<E, F> {
    pub fn new(ring: DescriptorRing<E>, front_end: F) -> Self {
        Self {
            ring,
            front_end,
            waveform: None,
            buffer: None,
            poll_interval: Duration::ZERO,
            playing: false,
        }
    }

    /// Sleep this long when a service pass finds nothing finished.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn ensure_stopped(&self) -> Result<(), ZmodError> {
        if self.playing {
            return Err(ZmodError::InvalidConfig(
                "playback in progress".to_string(),
            ));
        }
        Ok(())
    }

    pub fn configure_channels(&mut self, channels: &[ChannelConfig; 2]) -> Result<(), ZmodError> {
        self.ensure_stopped()?;
        for (ch, cfg) in channels.iter().enumerate() {
            self.front_end.set_channel_config(ch, *cfg)?;
        }
        Ok(())
    }

    pub fn upload_calibration(&mut self, coefficients: &CalibrationCoefficients) -> Result<(), ZmodError> {
        self.ensure_stopped()?;
        self.front_end.upload_calibration(coefficients)
    }

    /// Take the first `len_samples` words of `buffer` as the waveform and
    /// lay out a ring for it.
    ///
    /// The buffer must already hold packed sample words.
    pub fn load_waveform(&mut self, buffer: DmaBuffer, len_samples: usize) -> Result<(), ZmodError> {
        self.ensure_stopped()?;
        let region = buffer.sub_region(len_samples)?;
        self.ring.create_ring(region.len_bytes)?;
        info!(
            "Loaded waveform of {len_samples} samples over {} descriptors",
            self.ring.len()
        );
        self.waveform = Some(region);
        self.buffer = Some(buffer);
        Ok(())
    }

    pub fn waveform_buffer(&self) -> Option<&DmaBuffer> {
        self.buffer.as_ref()
    }

    fn idle(&self) {
        if self.poll_interval.is_zero() {
            std::hint::spin_loop();
        } else {
            std::thread::sleep(self.poll_interval);
        }
    }

    fn begin(&mut self, cyclic: bool) -> Result<BufferRegion, ZmodError> {
        self.ensure_stopped()?;
        let region = self.waveform.ok_or(ZmodError::NoWaveform)?;
        // Descriptor state from the previous run is discarded
        self.ring.create_ring(region.len_bytes)?;
        self.front_end.start_stream()?;
        self.playing = true;
        self.ring.start_transfer(region, cyclic)?;
        Ok(region)
    }

    /// Play the waveform one time.
    pub fn play_once(&mut self) -> Result<PlaybackReport, ZmodError> {
        self.play_repeated(1)
    }

    /// Play the waveform `times` times back to back.
    ///
    /// Finished blocks are re-queued until `times - 1` further passes have
    /// been handed to the engine; then the call waits for the last pass.
    pub fn play_repeated(&mut self, times: usize) -> Result<PlaybackReport, ZmodError> {
        if times == 0 {
            return Err(ZmodError::InvalidConfig(
                "playback needs at least one pass".to_string(),
            ));
        }
        let res = self.run_repeated(times);
        let stopped = self.stop();
        let report = res?;
        stopped?;
        info!("Played waveform {times} times");
        Ok(report)
    }

    fn run_repeated(&mut self, times: usize) -> Result<PlaybackReport, ZmodError> {
        self.begin(false)?;
        let target = (times - 1) * self.ring.len();
        let mut resubmitted = 0;
        while resubmitted < target {
            let n = self.ring.resubmit_at_most(target - resubmitted)?;
            resubmitted += n;
            if n == 0 {
                self.idle();
            }
        }
        while !self.ring.transfer_done()? {
            self.idle();
        }
        Ok(PlaybackReport {
            passes: times,
            blocks_resubmitted: resubmitted,
        })
    }

    /// Loop the waveform in cyclic mode until `stop` fires.
    pub fn play_continuous(&mut self, mut stop: impl StopSignal) -> Result<PlaybackReport, ZmodError> {
        let res = self.run_continuous(&mut stop);
        let stopped = self.stop();
        let report = res?;
        stopped?;
        info!("Continuous playback stopped after {} passes", report.passes);
        Ok(report)
    }

    fn run_continuous(&mut self, stop: &mut impl StopSignal) -> Result<PlaybackReport, ZmodError> {
        self.begin(true)?;
        let mut blocks = 0;
        loop {
            let n = self.ring.cyclic_resubmit()?;
            blocks += n;
            if stop.should_stop() {
                break;
            }
            if n == 0 {
                self.idle();
            }
        }
        debug!("Cyclic playback serviced {blocks} blocks");
        Ok(PlaybackReport {
            passes: blocks / self.ring.len().max(1),
            blocks_resubmitted: blocks,
        })
    }

    /// Halt the engine and disable the output.
    pub fn stop(&mut self) -> Result<(), ZmodError> {
        let halted = self.ring.halt();
        let disabled = self.front_end.stop_stream();
        if self.playing {
            debug!("Playback stopped");
        }
        self.playing = false;
        halted.and(disabled)
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
}

impl<E: DmaEngine, F: FrontEnd> Drop for GenerateController<E, F> {
    fn drop(&mut self) {
        if self.playing {
            if let Err(e) = self.stop() {
                warn!("Failed to stop playback: {e}");
            }
        }
        self.ring.destroy();
    }
}
