//! The DMA engine's seam to the rest of the system: the CPU/bus collaborator
//! trait and the per-core memory region classifier tables.
//!
//! DMA never owns a memory map of its own. Unit reads/writes, CPU
//! stall/resume, and cycle budgets all go through [`DmaBus`]; what DMA keeps
//! locally is the region classification needed to price an access and to
//! detect main-RAM units that must be arbitrated externally.

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum CpuCore {
    Arm7 = 0,
    Arm9 = 1,
}

impl CpuCore {
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Arm7 => "ARM7",
            Self::Arm9 => "ARM9",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum UnitWidth {
    #[default]
    Halfword = 0,
    Word = 1,
}

impl UnitWidth {
    #[must_use]
    pub fn byte_len(self) -> u32 {
        match self {
            Self::Halfword => 2,
            Self::Word => 4,
        }
    }
}

/// Tracking record written into a per-core slot when a DMA unit touches main
/// RAM. The main-RAM arbitration layer services the slot and calls back into
/// the engine; only one requester may occupy a core's slot at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct MainRamRequest {
    pub channel: u8,
    pub width: UnitWidth,
}

/// Bus/CPU collaborator contract.
///
/// All methods are invoked synchronously from within the DMA run/start
/// routines; implementations must not re-enter the DMA engine from them.
pub trait DmaBus {
    fn read_16(&mut self, core: CpuCore, address: u32) -> u16;
    fn read_32(&mut self, core: CpuCore, address: u32) -> u32;
    fn write_16(&mut self, core: CpuCore, address: u32, value: u16);
    fn write_32(&mut self, core: CpuCore, address: u32, value: u32);

    /// Block instruction execution on the given core for the channels set in
    /// `channel_mask` (bit N = channel N).
    fn stall_cpu(&mut self, core: CpuCore, channel_mask: u8);
    /// Unblock instruction execution for the channels set in `channel_mask`.
    fn resume_cpu(&mut self, core: CpuCore, channel_mask: u8);

    /// The core's current bus timestamp, in that core's cycle domain.
    fn current_timestamp(&self, core: CpuCore) -> u64;
    /// The timestamp at which the core's current scheduling slice ends.
    fn target_timestamp(&self, core: CpuCore) -> u64;
    /// Advance the core's bus timestamp by `cycles`.
    fn add_cycles(&mut self, core: CpuCore, cycles: u32);

    /// Called after a slice boundary on a GX-FIFO-paced channel so the FIFO
    /// consumer can pull more data if it has room.
    fn notify_fifo_dma_eligible(&mut self, core: CpuCore);

    /// Display FIFO refill (ARM9 start mode 4): hand `source_addr` to the 2D
    /// engine, which consumes 256 pixels from it.
    fn display_fifo_dma(&mut self, source_addr: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum MemBank {
    MainRam,
    Wram,
    Io,
    Palette,
    Vram,
    Oam,
    GbaRom,
    GbaRam,
    Bios,
    #[default]
    Unmapped,
}

/// Per-region access costs in bus cycles: non-sequential and sequential, for
/// 16-bit and 32-bit units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct AccessTiming {
    pub bank: MemBank,
    pub n16: u32,
    pub s16: u32,
    pub n32: u32,
    pub s32: u32,
}

impl AccessTiming {
    const fn flat(bank: MemBank, cycles: u32) -> Self {
        Self { bank, n16: cycles, s16: cycles, n32: cycles, s32: cycles }
    }
}

const UNMAPPED: AccessTiming = AccessTiming::flat(MemBank::Unmapped, 1);

/// Region classifier for one core: a precomputed table indexed by
/// `address >> shift`.
///
/// The cycle values are measured 33 MHz bus costs and are carried as data;
/// do not re-derive them.
#[derive(Debug, Clone, Encode, Decode)]
pub struct RegionTable {
    shift: u32,
    entries: Vec<AccessTiming>,
}

impl RegionTable {
    /// ARM9 bus map at 16 MB granularity.
    #[must_use]
    pub fn nds_arm9() -> Self {
        let mut entries = vec![UNMAPPED; 256];

        entries[0x02] = AccessTiming { bank: MemBank::MainRam, n16: 9, s16: 1, n32: 10, s32: 2 };
        entries[0x03] = AccessTiming::flat(MemBank::Wram, 1);
        entries[0x04] = AccessTiming::flat(MemBank::Io, 1);
        entries[0x05] = AccessTiming { bank: MemBank::Palette, n16: 1, s16: 1, n32: 2, s32: 2 };
        entries[0x06] = AccessTiming { bank: MemBank::Vram, n16: 1, s16: 1, n32: 2, s32: 2 };
        entries[0x07] = AccessTiming::flat(MemBank::Oam, 1);
        entries[0x08] = AccessTiming { bank: MemBank::GbaRom, n16: 10, s16: 6, n32: 18, s32: 12 };
        entries[0x09] = entries[0x08];
        entries[0x0A] = AccessTiming::flat(MemBank::GbaRam, 10);
        entries[0xFF] = AccessTiming::flat(MemBank::Bios, 1);

        Self { shift: 24, entries }
    }

    /// ARM7 bus map at 8 MB granularity.
    #[must_use]
    pub fn nds_arm7() -> Self {
        let mut entries = vec![UNMAPPED; 512];

        let mut set = |top_byte: usize, timing: AccessTiming| {
            entries[top_byte << 1] = timing;
            entries[(top_byte << 1) | 1] = timing;
        };

        set(0x00, AccessTiming::flat(MemBank::Bios, 1));
        set(0x02, AccessTiming { bank: MemBank::MainRam, n16: 9, s16: 1, n32: 10, s32: 2 });
        set(0x03, AccessTiming::flat(MemBank::Wram, 1));
        set(0x04, AccessTiming::flat(MemBank::Io, 1));
        set(0x06, AccessTiming { bank: MemBank::Vram, n16: 1, s16: 1, n32: 2, s32: 2 });
        set(0x08, AccessTiming { bank: MemBank::GbaRom, n16: 10, s16: 6, n32: 18, s32: 12 });
        set(0x09, AccessTiming { bank: MemBank::GbaRom, n16: 10, s16: 6, n32: 18, s32: 12 });
        set(0x0A, AccessTiming::flat(MemBank::GbaRam, 10));

        Self { shift: 23, entries }
    }

    #[must_use]
    pub fn classify(&self, address: u32) -> AccessTiming {
        let idx = (address >> self.shift) as usize;
        self.entries.get(idx).copied().unwrap_or(UNMAPPED)
    }
}
