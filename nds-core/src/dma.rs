//! NDS DMA channels and their bus timing model
//!
//! Each CPU core owns four channels, serviced in fixed priority order
//! (channel 0 highest). Channels on a core share that core's bus clock and
//! both cores share main RAM, which is arbitrated outside this module: a
//! unit that touches main RAM is never performed here directly, it is
//! recorded in a per-core tracking slot and resumed when the arbitration
//! layer grants the access.
//!
//! Start modes:
//! - ARM9: immediate, VBlank, HBlank, display start, display FIFO, DS cart
//!   slot, GBA cart slot (unimplemented), GX FIFO
//! - ARM7: immediate, VBlank, DS cart slot, wireless (unimplemented)

pub mod timing;

use crate::bus::{CpuCore, DmaBus, MainRamRequest, MemBank, RegionTable, UnitWidth};
use crate::interrupts::{InterruptRegisters, InterruptType};
use crate::scheduler::{Scheduler, SchedulerEvent};
use bincode::{Decode, Encode};
use proc_bitfield::bitfield;
use std::io::{Read, Write};
use std::{array, mem};
use thiserror::Error;

/// GX-FIFO-paced transfers are sliced so the 3D command FIFO is refilled at
/// most half a FIFO (112 entries) at a time.
const GX_FIFO_UNITS_PER_SLICE: u32 = 112;

const GX_FIFO_ADDR: u32 = 0x0400_0400;

/// Display FIFO DMA feeds the 2D engine 256 pixels (512 bytes) per trigger.
const DISPLAY_FIFO_BYTES: u32 = 256 * 2;

bitfield! {
    /// DMACNT: the per-channel 32-bit control word.
    ///
    /// The low bits hold the unit count; its width differs per core and
    /// channel and is masked via [`DmaChannel::count_mask`].
    #[derive(Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
    pub struct DmaCnt(pub u32): Debug {
        pub dst_mode_bits: u8 @ 21..=22,
        pub src_mode_bits: u8 @ 23..=24,
        pub repeat: bool @ 25,
        pub word_units: bool @ 26,
        pub arm9_start_bits: u8 @ 27..=29,
        pub arm7_start_bits: u8 @ 28..=29,
        pub irq_enabled: bool @ 30,
        pub enabled: bool @ 31,
    }
}

impl DmaCnt {
    fn unit_width(self) -> UnitWidth {
        if self.word_units() { UnitWidth::Word } else { UnitWidth::Halfword }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum AddressMode {
    #[default]
    Increment = 0,
    Decrement = 1,
    Fixed = 2,
    IncrementReload = 3,
}

impl AddressMode {
    fn from_dst_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => Self::Increment,
            1 => Self::Decrement,
            2 => Self::Fixed,
            3 => Self::IncrementReload,
            _ => unreachable!("value & 3 is always <= 3"),
        }
    }

    /// Source decode: encoding 3 is reserved and behaves as increment.
    fn from_src_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => Self::Increment,
            1 => Self::Decrement,
            2 => Self::Fixed,
            3 => {
                log::warn!("Reserved DMA source address mode 3, treating as increment");
                Self::Increment
            }
            _ => unreachable!("value & 3 is always <= 3"),
        }
    }

    fn step(self) -> i32 {
        match self {
            Self::Increment | Self::IncrementReload => 1,
            Self::Decrement => -1,
            Self::Fixed => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum StartMode {
    #[default]
    Immediate,
    VBlank,
    HBlank,
    DisplayStart,
    DisplayFifo,
    DsCartSlot,
    // ARM9 mode 6; never fires
    GbaCartSlot,
    GxFifo,
    // ARM7 mode 3; never fires
    Wireless,
}

impl StartMode {
    fn from_arm9_bits(bits: u8) -> Self {
        match bits & 7 {
            0 => Self::Immediate,
            1 => Self::VBlank,
            2 => Self::HBlank,
            3 => Self::DisplayStart,
            4 => Self::DisplayFifo,
            5 => Self::DsCartSlot,
            6 => Self::GbaCartSlot,
            7 => Self::GxFifo,
            _ => unreachable!("value & 7 is always <= 7"),
        }
    }

    fn from_arm7_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => Self::Immediate,
            1 => Self::VBlank,
            2 => Self::DsCartSlot,
            3 => Self::Wireless,
            _ => unreachable!("value & 3 is always <= 3"),
        }
    }

    fn implemented(self) -> bool {
        !matches!(self, Self::GbaCartSlot | Self::Wireless)
    }

    /// Whether the mode's trigger event legitimately refires while a
    /// previous transfer on the channel is still in flight. A start request
    /// for such a mode is queued rather than discarded.
    fn retriggers(self) -> bool {
        !matches!(self, Self::Immediate | Self::GbaCartSlot | Self::Wireless)
    }
}

/// The channel's run/burst-position marker.
///
/// Hardware tracks this as a bare 0-3 counter that is decremented after
/// every unit; [`RunState::advance`] is that decrement, flooring at
/// `BurstContinuing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum RunState {
    #[default]
    Idle = 0,
    /// Mid-burst: the previous unit on this bank was sequential.
    BurstContinuing = 1,
    /// Mid-burst, but the run was interrupted; the next unit pays
    /// non-sequential penalties.
    BurstInterrupted = 2,
    /// Just started; the first unit is always non-sequential.
    JustStarted = 3,
}

impl RunState {
    #[must_use]
    pub fn is_running(self) -> bool {
        self != Self::Idle
    }

    fn advance(self) -> Self {
        match self {
            Self::Idle => Self::Idle,
            Self::JustStarted => Self::BurstInterrupted,
            Self::BurstInterrupted | Self::BurstContinuing => Self::BurstContinuing,
        }
    }
}

/// How a call into the channel's run routine ended. The engine only
/// suspends by returning; re-entry comes from the scheduler tick or, for
/// `AwaitingMainRam`, from the arbitration layer's grant callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceOutcome {
    /// `remaining_count` reached zero and completion effects were applied.
    Completed,
    /// The slice's unit quota was consumed; the transfer waits for its next
    /// trigger event.
    Paused,
    /// The core's cycle budget ran out mid-slice; the channel stays running
    /// and is resumed on the next tick.
    BudgetExhausted,
    /// The next unit touches main RAM; a tracking record was left in the
    /// core's arbitration slot.
    AwaitingMainRam,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct DmaChannel {
    core: CpuCore,
    num: u8,
    count_mask: u32,
    src_addr: u32,
    dst_addr: u32,
    cnt: DmaCnt,
    start_mode: StartMode,
    src_mode: AddressMode,
    dst_mode: AddressMode,
    cur_src_addr: u32,
    cur_dst_addr: u32,
    rem_count: u32,
    iter_count: u32,
    src_step: i32,
    dst_step: i32,
    run_state: RunState,
    in_progress: bool,
    queued: bool,
    gx_fifo_transfer: bool,
}

impl DmaChannel {
    fn new(core: CpuCore, num: u8) -> Self {
        let count_mask = match core {
            CpuCore::Arm9 => 0x001F_FFFF,
            CpuCore::Arm7 => {
                if num == 3 {
                    0x0000_FFFF
                } else {
                    0x0000_3FFF
                }
            }
        };

        Self {
            core,
            num,
            count_mask,
            src_addr: 0,
            dst_addr: 0,
            cnt: DmaCnt::default(),
            start_mode: StartMode::default(),
            src_mode: AddressMode::default(),
            dst_mode: AddressMode::default(),
            cur_src_addr: 0,
            cur_dst_addr: 0,
            rem_count: 0,
            iter_count: 0,
            src_step: 0,
            dst_step: 0,
            run_state: RunState::default(),
            in_progress: false,
            queued: false,
            gx_fifo_transfer: false,
        }
    }

    fn reset(&mut self) {
        *self = Self::new(self.core, self.num);
    }

    #[must_use]
    pub fn read_cnt(&self) -> u32 {
        self.cnt.0
    }

    #[must_use]
    pub fn remaining_count(&self) -> u32 {
        self.rem_count
    }

    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    #[must_use]
    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    #[must_use]
    pub fn is_gx_fifo_transfer(&self) -> bool {
        self.gx_fifo_transfer
    }
}

/// Cross-channel burst bookkeeping, one per core.
///
/// `banks` remembers the (source, destination) bank pair of the most recent
/// incrementing unit so a newly started channel can append to the bank's
/// burst run. `main_ram_position` is the position within the current
/// main-RAM burst row. Best-effort heuristic state, not a resource.
#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
struct BurstTracker {
    banks: Option<(MemBank, MemBank)>,
    main_ram_position: u32,
}

/// External collaborators handed into every engine entry point.
pub struct DmaContext<'a, B> {
    pub bus: &'a mut B,
    pub scheduler: &'a mut Scheduler,
    /// Interrupt registers, indexed by [`CpuCore::index`].
    pub interrupts: &'a mut [InterruptRegisters; 2],
}

#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("failed to encode DMA state: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode DMA state: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// The per-console channel set: 2 cores x 4 channels, plus the shared
/// main-RAM arbitration slots and burst trackers.
#[derive(Debug, Clone, Encode, Decode)]
pub struct DmaEngine {
    channels: [[DmaChannel; 4]; 2],
    burst: [BurstTracker; 2],
    main_ram_track: [Option<MainRamRequest>; 2],
    arm9_regions: RegionTable,
    arm7_regions: RegionTable,
}

impl DmaEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: [
                array::from_fn(|num| DmaChannel::new(CpuCore::Arm7, num as u8)),
                array::from_fn(|num| DmaChannel::new(CpuCore::Arm9, num as u8)),
            ],
            burst: [BurstTracker::default(); 2],
            main_ram_track: [None; 2],
            arm9_regions: RegionTable::nds_arm9(),
            arm7_regions: RegionTable::nds_arm7(),
        }
    }

    pub fn reset(&mut self) {
        for core_channels in &mut self.channels {
            for channel in core_channels {
                channel.reset();
            }
        }
        self.burst = [BurstTracker::default(); 2];
        self.main_ram_track = [None; 2];
    }

    #[must_use]
    pub fn channel(&self, core: CpuCore, num: usize) -> &DmaChannel {
        &self.channels[core.index()][num]
    }

    fn regions(&self, core: CpuCore) -> &RegionTable {
        match core {
            CpuCore::Arm9 => &self.arm9_regions,
            CpuCore::Arm7 => &self.arm7_regions,
        }
    }

    // DMAxSAD: source base address
    pub fn write_src_addr(&mut self, core: CpuCore, num: usize, value: u32) {
        let channel = &mut self.channels[core.index()][num];
        channel.src_addr = value & 0x0FFF_FFFF;

        log::trace!("{} DMA{num} source address: {:08X}", core.name(), channel.src_addr);
    }

    // DMAxDAD: destination base address
    pub fn write_dst_addr(&mut self, core: CpuCore, num: usize, value: u32) {
        let channel = &mut self.channels[core.index()][num];
        channel.dst_addr = value & 0x0FFF_FFFF;

        log::trace!("{} DMA{num} destination address: {:08X}", core.name(), channel.dst_addr);
    }

    #[must_use]
    pub fn read_src_addr(&self, core: CpuCore, num: usize) -> u32 {
        self.channels[core.index()][num].src_addr
    }

    #[must_use]
    pub fn read_dst_addr(&self, core: CpuCore, num: usize) -> u32 {
        self.channels[core.index()][num].dst_addr
    }

    #[must_use]
    pub fn read_cnt(&self, core: CpuCore, num: usize) -> u32 {
        self.channels[core.index()][num].cnt.0
    }

    // DMAxCNT: control word. An enable-bit 0->1 edge latches working
    // addresses, decodes the transfer configuration, and either starts the
    // channel immediately or leaves it armed for its trigger event.
    pub fn write_cnt<B: DmaBus>(
        &mut self,
        core: CpuCore,
        num: usize,
        value: u32,
        ctx: &mut DmaContext<'_, B>,
    ) {
        let channel = &mut self.channels[core.index()][num];
        let old_cnt = channel.cnt;
        channel.cnt = DmaCnt(value);

        log::debug!("{} DMA{num} control write: {value:08X}", core.name());

        if channel.cnt.enabled() && !old_cnt.enabled() {
            channel.cur_src_addr = channel.src_addr;
            channel.cur_dst_addr = channel.dst_addr;

            channel.dst_mode = AddressMode::from_dst_bits(channel.cnt.dst_mode_bits());
            channel.src_mode = AddressMode::from_src_bits(channel.cnt.src_mode_bits());
            channel.src_step = channel.src_mode.step();
            channel.dst_step = channel.dst_mode.step();

            channel.start_mode = match core {
                CpuCore::Arm9 => StartMode::from_arm9_bits(channel.cnt.arm9_start_bits()),
                CpuCore::Arm7 => StartMode::from_arm7_bits(channel.cnt.arm7_start_bits()),
            };

            if !channel.start_mode.implemented() {
                log::warn!(
                    "Unimplemented {} DMA{num} start mode {:?}, {:08X} -> {:08X}",
                    core.name(),
                    channel.start_mode,
                    channel.src_addr,
                    channel.dst_addr
                );
                return;
            }

            match channel.start_mode {
                StartMode::Immediate => self.start_channel(core, num, ctx),
                // The FIFO consumer decides whether it wants data right away
                StartMode::GxFifo => ctx.bus.notify_fifo_dma_eligible(core),
                _ => {}
            }
        } else if !channel.cnt.enabled() && old_cnt.enabled() {
            // Disabling stops scheduling but preserves in-flight progress;
            // remaining_count/in_progress survive a later re-enable.
            channel.queued = false;
            if channel.run_state.is_running() {
                channel.run_state = RunState::Idle;
                ctx.bus.resume_cpu(core, 1 << num);
            }
        }
    }

    /// Fire the given trigger event: starts every enabled channel on `core`
    /// armed with this start mode.
    pub fn trigger<B: DmaBus>(
        &mut self,
        core: CpuCore,
        mode: StartMode,
        ctx: &mut DmaContext<'_, B>,
    ) {
        for num in 0..4 {
            let channel = &self.channels[core.index()][num];
            let armed = channel.cnt.enabled() && channel.start_mode == mode;
            if armed && mode.implemented() {
                self.start_channel(core, num, ctx);
            }
        }
    }

    fn start_channel<B: DmaBus>(&mut self, core: CpuCore, num: usize, ctx: &mut DmaContext<'_, B>) {
        let ci = core.index();

        // Display FIFO refills bypass the channel state machine entirely:
        // the 2D engine consumes 256 pixels straight from the source.
        if self.channels[ci][num].start_mode == StartMode::DisplayFifo {
            let channel = &mut self.channels[ci][num];
            ctx.bus.display_fifo_dma(channel.cur_src_addr);
            channel.cur_src_addr = channel.cur_src_addr.wrapping_add(DISPLAY_FIFO_BYTES);
            return;
        }

        let Self { channels, burst, arm9_regions, arm7_regions, .. } = self;
        let regions = match core {
            CpuCore::Arm9 => &*arm9_regions,
            CpuCore::Arm7 => &*arm7_regions,
        };
        let burst = &mut burst[ci];
        let channel = &mut channels[ci][num];

        if channel.run_state.is_running() {
            if channel.start_mode.retriggers() {
                // The trigger will be honored the instant the in-flight
                // transfer completes
                channel.queued = true;
            }
            return;
        }

        if !channel.in_progress {
            channel.rem_count = channel.cnt.0 & channel.count_mask;
            if channel.rem_count == 0 {
                channel.rem_count = channel.count_mask + 1;
            }
        }

        channel.iter_count =
            if channel.start_mode == StartMode::GxFifo && channel.rem_count > GX_FIFO_UNITS_PER_SLICE {
                GX_FIFO_UNITS_PER_SLICE
            } else {
                channel.rem_count
            };

        if channel.dst_mode == AddressMode::IncrementReload {
            channel.cur_dst_addr = channel.dst_addr;
        }

        let src_bank = regions.classify(channel.cur_src_addr).bank;
        let dst_bank = regions.classify(channel.cur_dst_addr).bank;

        channel.gx_fifo_transfer = core == CpuCore::Arm9
            && src_bank == MemBank::MainRam
            && channel.cur_dst_addr == GX_FIFO_ADDR
            && channel.dst_mode == AddressMode::Fixed;

        // A fresh start may append to the bank's existing burst run if the
        // previous incrementing unit used the same bank pairing
        let continues_burst =
            burst.banks == Some((src_bank, dst_bank)) && channel.src_step > 0 && channel.dst_step >= 0;
        channel.run_state =
            if continues_burst { RunState::BurstContinuing } else { RunState::JustStarted };
        if !continues_burst {
            *burst = BurstTracker::default();
        }

        channel.in_progress = true;
        ctx.bus.stall_cpu(core, 1 << num);

        log::trace!(
            "{} DMA{num} start: {:?} {:08X} -> {:08X}, {} units",
            core.name(),
            channel.start_mode,
            channel.cur_src_addr,
            channel.cur_dst_addr,
            channel.rem_count
        );

        // Hardware burst tracking is per bank: a higher-priority start
        // breaks the sequential run of every lower-priority channel
        for lower in num + 1..4 {
            let other = &mut channels[ci][lower];
            if other.run_state.is_running() {
                other.run_state = RunState::BurstInterrupted;
            }
        }

        ctx.scheduler
            .min_or_push_event(SchedulerEvent::dma_tick(core, ctx.scheduler.cpu_cycle_counter()));
    }

    /// Service the core's channels in priority order until every live
    /// channel has yielded or the core's cycle budget is spent.
    pub fn run<B: DmaBus>(&mut self, core: CpuCore, ctx: &mut DmaContext<'_, B>) {
        let ci = core.index();

        let mut num = 0;
        while num < 4 {
            let channel = &self.channels[ci][num];
            if !channel.cnt.enabled() || !channel.run_state.is_running() {
                num += 1;
                continue;
            }

            match self.run_channel_slice(core, num, ctx) {
                SliceOutcome::Completed => {
                    let channel = &mut self.channels[ci][num];
                    // A queued trigger only survives completion if repeat
                    // kept the channel enabled
                    if mem::take(&mut channel.queued) && channel.cnt.enabled() {
                        // Re-start immediately and re-service this channel
                        // before anything of lower priority
                        self.start_channel(core, num, ctx);
                    } else {
                        num += 1;
                    }
                }
                SliceOutcome::Paused => num += 1,
                SliceOutcome::BudgetExhausted | SliceOutcome::AwaitingMainRam => break,
            }
        }

        self.maybe_schedule_tick(core, ctx);
    }

    /// The tracking record currently occupying the core's main-RAM
    /// arbitration slot, if any.
    #[must_use]
    pub fn main_ram_request(&self, core: CpuCore) -> Option<MainRamRequest> {
        self.main_ram_track[core.index()]
    }

    /// Called by the arbitration layer when it grants the pending main-RAM
    /// request: performs exactly that unit at the burst-table cost, clears
    /// the slot, then resumes normal servicing.
    pub fn grant_main_ram<B: DmaBus>(&mut self, core: CpuCore, ctx: &mut DmaContext<'_, B>) {
        let ci = core.index();
        let Some(request) = self.main_ram_track[ci].take() else {
            return;
        };

        {
            let Self { channels, burst, arm9_regions, arm7_regions, .. } = &mut *self;
            let regions = match core {
                CpuCore::Arm9 => &*arm9_regions,
                CpuCore::Arm7 => &*arm7_regions,
            };
            let burst = &mut burst[ci];
            let channel = &mut channels[ci][usize::from(request.channel)];

            // The requester may have been stopped while the request was
            // parked; the stale request is dropped but the other channels
            // still get serviced below
            if channel.run_state.is_running() && channel.iter_count > 0 {
                let src_timing = regions.classify(channel.cur_src_addr);
                let dst_timing = regions.classify(channel.cur_dst_addr);

                let position = burst.main_ram_position;
                ctx.bus.add_cycles(core, timing::main_ram_unit_cost(request.width, position));
                channel.run_state = channel.run_state.advance();

                transfer_unit(channel, request.width, core, ctx.bus);

                // The burst row keeps building only while the main-RAM side
                // of the transfer keeps incrementing
                let incrementing = (src_timing.bank == MemBank::MainRam && channel.src_step > 0)
                    || (dst_timing.bank == MemBank::MainRam && channel.dst_step > 0);
                burst.main_ram_position = if incrementing { position + 1 } else { 0 };
                burst.banks = (channel.src_step > 0 && channel.dst_step >= 0)
                    .then_some((src_timing.bank, dst_timing.bank));
            }
        }

        // The granted unit may be followed by more work (possibly another
        // main-RAM unit, which re-occupies the slot)
        self.run(core, ctx);
    }

    /// Called when a non-DMA requester (CPU, display engine) accesses main
    /// RAM; this breaks any burst run DMA had built up on that bank.
    pub fn external_main_ram_access(&mut self, core: CpuCore) {
        self.burst[core.index()] = BurstTracker::default();
    }

    fn run_channel_slice<B: DmaBus>(
        &mut self,
        core: CpuCore,
        num: usize,
        ctx: &mut DmaContext<'_, B>,
    ) -> SliceOutcome {
        let ci = core.index();
        let Self { channels, burst, main_ram_track, arm9_regions, arm7_regions } = self;
        let regions = match core {
            CpuCore::Arm9 => &*arm9_regions,
            CpuCore::Arm7 => &*arm7_regions,
        };
        let burst = &mut burst[ci];
        let track = &mut main_ram_track[ci];
        let channel = &mut channels[ci][num];

        if channel.iter_count > 0
            && ctx.bus.current_timestamp(core) >= ctx.bus.target_timestamp(core)
        {
            return SliceOutcome::BudgetExhausted;
        }

        let width = channel.cnt.unit_width();

        while channel.iter_count > 0 {
            let src_timing = regions.classify(channel.cur_src_addr);
            let dst_timing = regions.classify(channel.cur_dst_addr);

            if src_timing.bank == MemBank::MainRam || dst_timing.bank == MemBank::MainRam {
                // Main RAM is shared between the cores and arbitrated by the
                // bus layer; record the request and yield. Counts are not
                // touched until the access is granted.
                if track.is_none() {
                    *track = Some(MainRamRequest { channel: num as u8, width });
                }
                return SliceOutcome::AwaitingMainRam;
            }

            let cost = match (core, width) {
                (CpuCore::Arm9, UnitWidth::Halfword) => timing::arm9_unit_cost_16(
                    regions,
                    channel.cur_src_addr,
                    channel.cur_dst_addr,
                    channel.run_state,
                ),
                (CpuCore::Arm9, UnitWidth::Word) => timing::arm9_unit_cost_32(
                    regions,
                    channel.cur_src_addr,
                    channel.cur_dst_addr,
                    channel.run_state,
                ),
                (CpuCore::Arm7, UnitWidth::Halfword) => timing::arm7_unit_cost_16(
                    regions,
                    channel.cur_src_addr,
                    channel.cur_dst_addr,
                    channel.run_state,
                ),
                (CpuCore::Arm7, UnitWidth::Word) => timing::arm7_unit_cost_32(
                    regions,
                    channel.cur_src_addr,
                    channel.cur_dst_addr,
                    channel.run_state,
                ),
            };
            ctx.bus.add_cycles(core, cost);
            channel.run_state = channel.run_state.advance();

            transfer_unit(channel, width, core, ctx.bus);

            // Units performed here never touch main RAM, so any main-RAM
            // burst row is over; the bank pairing feeds inter-channel
            // burst continuation
            burst.main_ram_position = 0;
            burst.banks = (channel.src_step > 0 && channel.dst_step >= 0)
                .then_some((src_timing.bank, dst_timing.bank));

            if channel.iter_count > 0
                && ctx.bus.current_timestamp(core) >= ctx.bus.target_timestamp(core)
            {
                // Cut off mid-burst; the next unit pays the non-sequential
                // penalty when the slice resumes
                channel.run_state = RunState::BurstInterrupted;
                return SliceOutcome::BudgetExhausted;
            }
        }

        if channel.rem_count > 0 {
            // Slice boundary, not transfer boundary: the burst ran
            // uninterrupted to its cap. Only this channel's stall bit is
            // released.
            channel.run_state = RunState::Idle;
            ctx.bus.resume_cpu(core, 1 << num);

            if channel.start_mode == StartMode::GxFifo {
                ctx.bus.notify_fifo_dma_eligible(core);
            }

            return SliceOutcome::Paused;
        }

        // Transfer complete
        if !channel.cnt.repeat() {
            channel.cnt.set_enabled(false);
        }

        channel.run_state = RunState::Idle;
        channel.in_progress = false;

        ctx.bus.add_cycles(core, 2);
        ctx.bus.resume_cpu(core, 1 << num);

        if channel.cnt.irq_enabled() {
            ctx.interrupts[ci].set_interrupt_flag(InterruptType::dma(num as u8));
        }

        log::trace!("{} DMA{num} complete", core.name());

        SliceOutcome::Completed
    }

    fn maybe_schedule_tick<B: DmaBus>(&self, core: CpuCore, ctx: &mut DmaContext<'_, B>) {
        let ci = core.index();

        if self.main_ram_track[ci].is_some() {
            // The arbitration layer's grant callback re-enters the engine
            return;
        }

        let any_live = self.channels[ci]
            .iter()
            .any(|channel| channel.cnt.enabled() && channel.run_state.is_running());
        if any_live {
            ctx.scheduler.min_or_push_event(SchedulerEvent::dma_tick(
                core,
                ctx.scheduler.cpu_cycle_counter() + 1,
            ));
        }
    }

    pub fn save_state<W: Write>(&self, writer: &mut W) -> Result<(), SaveStateError> {
        bincode::encode_into_std_write(self, writer, bincode::config::standard())?;
        Ok(())
    }

    pub fn load_state<R: Read>(reader: &mut R) -> Result<Self, SaveStateError> {
        let engine = bincode::decode_from_std_read(reader, bincode::config::standard())?;
        Ok(engine)
    }
}

impl Default for DmaEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn transfer_unit<B: DmaBus>(channel: &mut DmaChannel, width: UnitWidth, core: CpuCore, bus: &mut B) {
    match width {
        UnitWidth::Halfword => {
            let value = bus.read_16(core, channel.cur_src_addr);
            bus.write_16(core, channel.cur_dst_addr, value);
        }
        UnitWidth::Word => {
            let value = bus.read_32(core, channel.cur_src_addr);
            bus.write_32(core, channel.cur_dst_addr, value);
        }
    }

    let byte_len = width.byte_len() as i32;
    channel.cur_src_addr = channel.cur_src_addr.wrapping_add_signed(channel.src_step * byte_len);
    channel.cur_dst_addr = channel.cur_dst_addr.wrapping_add_signed(channel.dst_step * byte_len);
    channel.iter_count -= 1;
    channel.rem_count -= 1;
}
