//! Hardware-out-of-the-loop board.
//!
//! Models the pieces of a Zmod design the controllers talk to: both DMA
//! channels, the trigger detector, the manual trigger, a scope that emits
//! a counting sample stream, an AWG that records what it is fed, and the
//! pod EEPROM. Simulated time only moves when software polls, so runs are
//! deterministic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::warn;

use zmod_shared::calibration::CalibrationRecord;
use zmod_shared::{CHANNEL_COUNT, ZmodPort};

use crate::ZmodError;
use crate::calibration::{CalibrationCoefficients, CalibrationReader, ProductIdentity};
use crate::config::{ChannelConfig, IdlePolarity};
use crate::dma::{
    BufferRegion, Descriptor, Direction, DmaBuffer, DmaEngine, STS_COMPLETE, STS_RXEOF, WORD_BYTES,
};
use crate::frontend::{FrontEnd, StatusFlags};
use crate::trigger::{MANUAL_TRIGGER_CAUSE, ManualTrigger, TriggerDetector};

/// Largest block the simulated engines accept.
pub const SIM_MAX_BLOCK_BYTES: usize = 1 << 23;

/// Beats simulated per software poll unless changed.
pub const DEFAULT_BEATS_PER_POLL: usize = 256;

/// First bus address handed out by [`SimBoard::alloc_buffer`].
const SIM_DDR_BASE: u64 = 0x1000_0000;

#[derive(Debug, Default)]
struct ChannelModel {
    space_limit: Option<usize>,
    capacity: usize,
    slots: Vec<Descriptor>,
    /// Hardware queue outside cyclic mode
    queue: VecDeque<Descriptor>,
    /// Slot order walked in cyclic mode
    cycle: Vec<usize>,
    cursor: usize,
    completed: VecDeque<Descriptor>,
    cyclic: bool,
    running: bool,
    /// Bytes moved into the current block
    progress: usize,
    allocations: usize,
    frees: usize,
}

impl ChannelModel {
    fn current(&self) -> Option<Descriptor> {
        if !self.running {
            return None;
        }
        if self.cyclic {
            self.cycle.get(self.cursor).map(|&slot| self.slots[slot])
        } else {
            self.queue.front().copied()
        }
    }

    /// Close out the current block.
    fn finish(&mut self, rx_eof: bool) {
        let mut status = STS_COMPLETE | self.progress as u32;
        if rx_eof {
            status |= STS_RXEOF;
        }
        self.progress = 0;

        if self.cyclic {
            let slot = self.cycle[self.cursor];
            self.slots[slot].status = status;
            if !self.completed.iter().any(|d| d.slot == slot) {
                self.completed.push_back(self.slots[slot]);
            }
            self.cursor = (self.cursor + 1) % self.cycle.len();
        } else if let Some(mut d) = self.queue.pop_front() {
            d.status = status;
            self.slots[d.slot] = d;
            self.completed.push_back(d);
        }
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.cycle.clear();
        self.completed.clear();
        self.cursor = 0;
        self.progress = 0;
        self.running = false;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TriggerState {
    Unarmed,
    Prebuffering(u32),
    Awaiting,
    Capturing(u32),
    Done,
}

/// What the trigger detector does with one incoming beat.
enum Accept {
    /// Not started; the stream stalls and the scope loses the sample
    Backpressure,
    /// Capture finished; beats are discarded
    Discard,
    Forward { last: bool },
}

#[derive(Debug)]
struct TriggerModel {
    state: TriggerState,
    prebuffer: u32,
    trigger_to_last: u32,
    enable: u32,
    /// Level-sensitive trigger inputs
    level: u32,
    /// Inputs asserted for the next beat only
    pulse: u32,
    detected: u32,
    polarity: IdlePolarity,
}

impl Default for TriggerModel {
    fn default() -> Self {
        Self {
            state: TriggerState::Unarmed,
            prebuffer: 0,
            trigger_to_last: 0,
            enable: 0,
            level: 0,
            pulse: 0,
            detected: 0,
            polarity: IdlePolarity::ActiveHigh,
        }
    }
}

impl TriggerModel {
    fn start(&mut self) {
        self.detected = 0;
        self.state = if self.prebuffer > 0 {
            TriggerState::Prebuffering(self.prebuffer)
        } else {
            TriggerState::Awaiting
        };
    }

    fn count_down(&mut self, remaining: u32) -> Accept {
        if remaining <= 1 {
            self.state = TriggerState::Done;
            Accept::Forward { last: true }
        } else {
            self.state = TriggerState::Capturing(remaining - 1);
            Accept::Forward { last: false }
        }
    }

    fn accept(&mut self) -> Accept {
        match self.state {
            TriggerState::Unarmed => Accept::Backpressure,
            TriggerState::Done => Accept::Discard,
            TriggerState::Prebuffering(n) => {
                self.state = if n <= 1 {
                    TriggerState::Awaiting
                } else {
                    TriggerState::Prebuffering(n - 1)
                };
                Accept::Forward { last: false }
            }
            TriggerState::Awaiting => {
                let fired = (self.level | self.pulse) & self.enable;
                if fired != 0 {
                    self.detected = fired;
                    self.count_down(self.trigger_to_last)
                } else {
                    Accept::Forward { last: false }
                }
            }
            TriggerState::Capturing(n) => self.count_down(n),
        }
    }

    fn idle_bit(&self) -> bool {
        let idle = matches!(self.state, TriggerState::Unarmed | TriggerState::Done);
        match self.polarity {
            IdlePolarity::ActiveHigh => idle,
            IdlePolarity::ActiveLow => !idle,
        }
    }
}

#[derive(Debug, Default)]
struct ScopeModel {
    streaming: bool,
    channels: [ChannelConfig; CHANNEL_COUNT],
    calibration: Option<CalibrationCoefficients>,
    overflow: bool,
    config_error: bool,
}

#[derive(Debug, Default)]
struct AwgModel {
    enabled: bool,
    channels: [ChannelConfig; CHANNEL_COUNT],
    calibration: Option<CalibrationCoefficients>,
    output: Vec<u32>,
}

#[derive(Debug)]
struct BoardState {
    beats_per_poll: usize,
    memory: Vec<DmaBuffer>,
    next_phys: u64,
    s2mm: ChannelModel,
    mm2s: ChannelModel,
    trigger: TriggerModel,
    scope: ScopeModel,
    awg: AwgModel,
    /// Next value the scope emits
    counter: u32,
    bus_errors: usize,
    cache_flushes: usize,
    cache_invalidations: usize,
    /// Order in which components were started
    events: Vec<&'static str>,
}

impl Default for BoardState {
    fn default() -> Self {
        Self {
            beats_per_poll: DEFAULT_BEATS_PER_POLL,
            memory: Vec::new(),
            next_phys: SIM_DDR_BASE,
            s2mm: ChannelModel::default(),
            mm2s: ChannelModel::default(),
            trigger: TriggerModel::default(),
            scope: ScopeModel::default(),
            awg: AwgModel::default(),
            counter: 0,
            bus_errors: 0,
            cache_flushes: 0,
            cache_invalidations: 0,
            events: Vec::new(),
        }
    }
}

impl BoardState {
    fn channel(&mut self, direction: Direction) -> &mut ChannelModel {
        match direction {
            Direction::S2mm => &mut self.s2mm,
            Direction::Mm2s => &mut self.mm2s,
        }
    }

    fn locate(&self, addr: u64) -> Option<(&DmaBuffer, usize)> {
        self.memory.iter().find_map(|buf| {
            let region = buf.region();
            region
                .offset_of(addr)
                .filter(|off| *off + WORD_BYTES <= region.len_bytes)
                .map(|off| (buf, off / WORD_BYTES))
        })
    }

    fn read_word(&mut self, addr: u64) -> u32 {
        let word = self.locate(addr).map(|(buf, i)| buf.word(i));
        match word {
            Some(Ok(w)) => w,
            _ => {
                self.bus_errors += 1;
                0
            }
        }
    }

    fn write_word(&mut self, addr: u64, word: u32) {
        let written = self.locate(addr).map(|(buf, i)| buf.write(i, &[word]));
        if !matches!(written, Some(Ok(()))) {
            self.bus_errors += 1;
        }
    }

    fn advance(&mut self, beats: usize) {
        for _ in 0..beats {
            self.beat();
        }
    }

    fn beat(&mut self) {
        // Playback
        if let Some(d) = self.mm2s.current() {
            let word = self.read_word(d.buf_addr + self.mm2s.progress as u64);
            if self.awg.enabled {
                self.awg.output.push(word);
            }
            self.mm2s.progress += WORD_BYTES;
            if self.mm2s.progress >= d.block_bytes() {
                self.mm2s.finish(false);
            }
        }

        // Capture
        if self.scope.streaming {
            let sample = self.counter;
            self.counter = self.counter.wrapping_add(1);
            match self.trigger.accept() {
                Accept::Backpressure => self.scope.overflow = true,
                Accept::Discard => {}
                Accept::Forward { last } => match self.s2mm.current() {
                    None => self.scope.overflow = true,
                    Some(d) => {
                        self.write_word(d.buf_addr + self.s2mm.progress as u64, sample);
                        self.s2mm.progress += WORD_BYTES;
                        if last || self.s2mm.progress >= d.block_bytes() {
                            self.s2mm.finish(last);
                        }
                    }
                },
            }
        }
        self.trigger.pulse = 0;
    }

    fn poll(&mut self) {
        let beats = self.beats_per_poll;
        self.advance(beats);
    }
}

/// Shared handle to a simulated board. Clones see the same board.
#[derive(Clone, Debug, Default)]
pub struct SimBoard {
    state: Arc<Mutex<BoardState>>,
}

impl SimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut BoardState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn dma(&self, direction: Direction) -> SimDma {
        SimDma {
            board: self.clone(),
            direction,
        }
    }

    pub fn trigger(&self) -> SimTrigger {
        SimTrigger { board: self.clone() }
    }

    pub fn manual_trigger(&self) -> SimManualTrigger {
        SimManualTrigger { board: self.clone() }
    }

    pub fn scope(&self) -> SimScope {
        SimScope { board: self.clone() }
    }

    pub fn awg(&self) -> SimAwg {
        SimAwg { board: self.clone() }
    }

    /// Make a buffer reachable by the simulated DMA engines.
    pub fn attach(&self, buffer: &DmaBuffer) {
        self.with(|s| s.memory.push(buffer.clone()));
    }

    /// Allocate and attach a zeroed buffer at the next free bus address.
    pub fn alloc_buffer(&self, len_words: usize) -> DmaBuffer {
        self.with(|s| {
            let buf = DmaBuffer::new(s.next_phys, len_words);
            // Keep buffers page aligned
            let bytes = (len_words * WORD_BYTES) as u64;
            s.next_phys += bytes.div_ceil(4096).max(1) * 4096;
            s.memory.push(buf.clone());
            buf
        })
    }

    pub fn set_beats_per_poll(&self, beats: usize) {
        self.with(|s| s.beats_per_poll = beats);
    }

    /// Run the board for `beats` clock beats.
    pub fn advance(&self, beats: usize) {
        self.with(|s| s.advance(beats));
    }

    /// Drive the level-sensitive trigger inputs.
    pub fn set_trigger_inputs(&self, bits: u32) {
        self.with(|s| s.trigger.level = bits);
    }

    pub fn set_idle_polarity(&self, polarity: IdlePolarity) {
        self.with(|s| s.trigger.polarity = polarity);
    }

    /// Make the scope report a configuration error, as with the wrong pod fitted.
    pub fn inject_config_error(&self, error: bool) {
        self.with(|s| s.scope.config_error = error);
    }

    /// Drop samples in the scope FIFO, as when DDR cannot keep up. Cleared
    /// by the next stream start.
    pub fn inject_overflow(&self) {
        self.with(|s| s.scope.overflow = true);
    }

    pub fn limit_descriptor_space(&self, direction: Direction, max: usize) {
        self.with(|s| s.channel(direction).space_limit = Some(max));
    }

    /// Descriptors waiting in the hardware queue, in order.
    pub fn queued_descriptors(&self, direction: Direction) -> Vec<Descriptor> {
        self.with(|s| s.channel(direction).queue.iter().copied().collect())
    }

    pub fn clear_queues(&self) {
        self.with(|s| {
            s.s2mm.clear();
            s.mm2s.clear();
        });
    }

    pub fn engine_cyclic(&self, direction: Direction) -> bool {
        self.with(|s| s.channel(direction).cyclic)
    }

    pub fn engine_running(&self, direction: Direction) -> bool {
        self.with(|s| s.channel(direction).running)
    }

    pub fn descriptor_allocations(&self, direction: Direction) -> usize {
        self.with(|s| s.channel(direction).allocations)
    }

    pub fn descriptor_frees(&self, direction: Direction) -> usize {
        self.with(|s| s.channel(direction).frees)
    }

    /// Words the AWG has emitted while enabled.
    pub fn awg_output(&self) -> Vec<u32> {
        self.with(|s| s.awg.output.clone())
    }

    pub fn awg_enabled(&self) -> bool {
        self.with(|s| s.awg.enabled)
    }

    pub fn scope_streaming(&self) -> bool {
        self.with(|s| s.scope.streaming)
    }

    pub fn scope_channels(&self) -> [ChannelConfig; CHANNEL_COUNT] {
        self.with(|s| s.scope.channels)
    }

    pub fn awg_channels(&self) -> [ChannelConfig; CHANNEL_COUNT] {
        self.with(|s| s.awg.channels)
    }

    pub fn scope_calibration(&self) -> Option<CalibrationCoefficients> {
        self.with(|s| s.scope.calibration)
    }

    pub fn awg_calibration(&self) -> Option<CalibrationCoefficients> {
        self.with(|s| s.awg.calibration)
    }

    /// Samples the scope has produced so far.
    pub fn samples_produced(&self) -> u32 {
        self.with(|s| s.counter)
    }

    pub fn bus_errors(&self) -> usize {
        self.with(|s| s.bus_errors)
    }

    pub fn cache_flushes(&self) -> usize {
        self.with(|s| s.cache_flushes)
    }

    pub fn cache_invalidations(&self) -> usize {
        self.with(|s| s.cache_invalidations)
    }

    /// Component start events, oldest first.
    pub fn start_order(&self) -> Vec<&'static str> {
        self.with(|s| s.events.clone())
    }
}

/// One simulated AXI DMA channel.
#[derive(Debug)]
pub struct SimDma {
    board: SimBoard,
    direction: Direction,
}

impl DmaEngine for SimDma {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn configure(&mut self) -> Result<usize, ZmodError> {
        let direction = self.direction;
        self.board.with(|s| {
            let ch = s.channel(direction);
            ch.clear();
            ch.cyclic = false;
        });
        Ok(SIM_MAX_BLOCK_BYTES)
    }

    fn create_descriptors(&mut self, count: usize) -> Result<(), ZmodError> {
        let direction = self.direction;
        self.board.with(|s| {
            let ch = s.channel(direction);
            if ch.space_limit.is_some_and(|max| count > max) {
                return Err(ZmodError::AllocationFailed { descriptors: count });
            }
            ch.clear();
            ch.capacity = count;
            ch.slots = (0..count)
                .map(|slot| Descriptor {
                    slot,
                    ..Default::default()
                })
                .collect();
            ch.allocations += 1;
            Ok(())
        })
    }

    fn free_descriptors(&mut self) {
        let direction = self.direction;
        self.board.with(|s| {
            let ch = s.channel(direction);
            ch.clear();
            ch.capacity = 0;
            ch.slots.clear();
            ch.frees += 1;
        });
    }

    fn submit(&mut self, descriptors: &[Descriptor]) -> Result<(), ZmodError> {
        let direction = self.direction;
        self.board.with(|s| {
            let ch = s.channel(direction);
            if let Some(bad) = descriptors.iter().find(|d| d.slot >= ch.capacity) {
                return Err(ZmodError::InvalidConfig(format!(
                    "descriptor slot {} outside ring of {}",
                    bad.slot, ch.capacity
                )));
            }
            for d in descriptors {
                let d = Descriptor { status: 0, ..*d };
                ch.slots[d.slot] = d;
                // A running cyclic engine already walks every slot
                if !(ch.cyclic && ch.running) {
                    ch.queue.push_back(d);
                }
            }
            Ok(())
        })
    }

    fn reclaim_finished(&mut self, max: usize) -> Vec<Descriptor> {
        let direction = self.direction;
        self.board.with(|s| {
            s.poll();
            let ch = s.channel(direction);
            let n = max.min(ch.completed.len());
            ch.completed.drain(..n).collect()
        })
    }

    fn read_descriptor(&mut self, slot: usize) -> Option<Descriptor> {
        let direction = self.direction;
        self.board.with(|s| s.channel(direction).slots.get(slot).copied())
    }

    fn set_cyclic(&mut self, cyclic: bool) {
        let direction = self.direction;
        self.board.with(|s| s.channel(direction).cyclic = cyclic);
    }

    fn start(&mut self) -> Result<(), ZmodError> {
        let direction = self.direction;
        self.board.with(|s| {
            let ch = s.channel(direction);
            if ch.cyclic {
                if ch.queue.is_empty() {
                    return Err(ZmodError::RingNotCreated);
                }
                ch.cycle = ch.queue.drain(..).map(|d| d.slot).collect();
                ch.cursor = 0;
            }
            ch.running = true;
            s.events.push(match direction {
                Direction::S2mm => "dma_s2mm",
                Direction::Mm2s => "dma_mm2s",
            });
            Ok(())
        })
    }

    fn halt(&mut self) -> Result<(), ZmodError> {
        let direction = self.direction;
        self.board.with(|s| {
            let ch = s.channel(direction);
            ch.running = false;
            ch.progress = 0;
        });
        Ok(())
    }

    fn cache_flush(&mut self, _region: BufferRegion) {
        self.board.with(|s| s.cache_flushes += 1);
    }

    fn cache_invalidate(&mut self, _region: BufferRegion) {
        self.board.with(|s| s.cache_invalidations += 1);
    }
}

#[derive(Debug)]
pub struct SimTrigger {
    board: SimBoard,
}

impl TriggerDetector for SimTrigger {
    fn set_position(&mut self, buffer_len: u32, trigger_offset: u32) -> Result<(), ZmodError> {
        let trigger_to_last = buffer_len.checked_sub(trigger_offset).ok_or_else(|| {
            ZmodError::InvalidConfig(format!(
                "trigger offset {trigger_offset} is past the end of a {buffer_len}-beat buffer"
            ))
        })?;
        self.board.with(|s| {
            s.trigger.prebuffer = trigger_offset;
            s.trigger.trigger_to_last = trigger_to_last;
        });
        Ok(())
    }

    fn set_enable_mask(&mut self, mask: u32) -> Result<(), ZmodError> {
        self.board.with(|s| s.trigger.enable = mask);
        Ok(())
    }

    fn start(&mut self) -> Result<(), ZmodError> {
        self.board.with(|s| {
            s.trigger.start();
            s.events.push("trigger");
        });
        Ok(())
    }

    fn idle_bit(&mut self) -> Result<bool, ZmodError> {
        Ok(self.board.with(|s| {
            s.poll();
            s.trigger.idle_bit()
        }))
    }

    fn detected_cause_mask(&mut self) -> Result<u32, ZmodError> {
        Ok(self.board.with(|s| s.trigger.detected))
    }
}

#[derive(Debug)]
pub struct SimManualTrigger {
    board: SimBoard,
}

impl ManualTrigger for SimManualTrigger {
    fn issue_pulse(&mut self) -> Result<(), ZmodError> {
        self.board.with(|s| s.trigger.pulse |= MANUAL_TRIGGER_CAUSE);
        Ok(())
    }
}

fn check_channel(channel: usize) -> Result<(), ZmodError> {
    if channel >= CHANNEL_COUNT {
        return Err(ZmodError::InvalidConfig(format!("no channel {}", channel + 1)));
    }
    Ok(())
}

#[derive(Debug)]
pub struct SimScope {
    board: SimBoard,
}

impl FrontEnd for SimScope {
    fn set_channel_config(&mut self, channel: usize, config: ChannelConfig) -> Result<(), ZmodError> {
        check_channel(channel)?;
        self.board.with(|s| s.scope.channels[channel] = config);
        Ok(())
    }

    fn upload_calibration(&mut self, coefficients: &CalibrationCoefficients) -> Result<(), ZmodError> {
        self.board.with(|s| s.scope.calibration = Some(*coefficients));
        Ok(())
    }

    fn start_stream(&mut self) -> Result<(), ZmodError> {
        self.board.with(|s| {
            s.scope.streaming = true;
            s.scope.overflow = false;
            s.events.push("scope");
        });
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), ZmodError> {
        self.board.with(|s| s.scope.streaming = false);
        Ok(())
    }

    fn status_flags(&mut self) -> Result<StatusFlags, ZmodError> {
        Ok(self.board.with(|s| StatusFlags {
            reset_busy: false,
            init_done: !s.scope.config_error,
            config_error: s.scope.config_error,
            data_overflow: s.scope.overflow,
        }))
    }
}

#[derive(Debug)]
pub struct SimAwg {
    board: SimBoard,
}

impl FrontEnd for SimAwg {
    fn set_channel_config(&mut self, channel: usize, config: ChannelConfig) -> Result<(), ZmodError> {
        check_channel(channel)?;
        self.board.with(|s| s.awg.channels[channel] = config);
        Ok(())
    }

    fn upload_calibration(&mut self, coefficients: &CalibrationCoefficients) -> Result<(), ZmodError> {
        self.board.with(|s| s.awg.calibration = Some(*coefficients));
        Ok(())
    }

    fn start_stream(&mut self) -> Result<(), ZmodError> {
        self.board.with(|s| {
            s.awg.enabled = true;
            s.events.push("awg");
        });
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), ZmodError> {
        self.board.with(|s| s.awg.enabled = false);
        Ok(())
    }

    fn status_flags(&mut self) -> Result<StatusFlags, ZmodError> {
        Ok(StatusFlags {
            init_done: true,
            ..Default::default()
        })
    }
}

/// Pod EEPROM holding DNA strings and calibration records.
#[derive(Clone, Debug)]
pub struct SimEeprom {
    identity: ProductIdentity,
    factory: Vec<u8>,
    user: Vec<u8>,
}

impl SimEeprom {
    /// A pod on port A; missing records read back erased.
    pub fn new(model: &str, factory: Option<CalibrationRecord>, user: Option<CalibrationRecord>) -> Self {
        let encode = |rec: Option<CalibrationRecord>| match rec {
            Some(r) => r.encode().to_vec(),
            None => vec![0xFF; CalibrationRecord::LEN],
        };
        Self {
            identity: ProductIdentity {
                model: model.to_string(),
                serial: "SIM0001".to_string(),
                port: ZmodPort::A,
            },
            factory: encode(factory),
            user: encode(user),
        }
    }
}

impl CalibrationReader for SimEeprom {
    fn read_device_descriptor(&mut self) -> Result<ProductIdentity, ZmodError> {
        Ok(self.identity.clone())
    }

    fn read_calibration(&mut self) -> Result<(Vec<u8>, Vec<u8>), ZmodError> {
        if self.factory.len() < CalibrationRecord::LEN {
            warn!("Simulated EEPROM holds a truncated factory record");
        }
        Ok((self.factory.clone(), self.user.clone()))
    }
}
