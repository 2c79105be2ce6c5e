//! DMA unit transfer timing
//!
//! One cost function per core per unit width, plus the main-RAM burst
//! pattern tables. The same-bank/cross-bank branch below reproduces measured
//! hardware behavior; the structure is deliberate and must not be collapsed
//! even where two arms look equivalent for the current table values.

use crate::bus::{AccessTiming, RegionTable, UnitWidth};
use crate::dma::RunState;

// Main-RAM burst rows: cost per unit position, position 0 being the
// non-sequential lead-in. Crossing a row boundary pays the lead-in again.
const MAIN_RAM_BURST_16: [u32; 16] = [9, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1];
const MAIN_RAM_BURST_32: [u32; 8] = [10, 2, 2, 2, 2, 2, 2, 2];

/// Cost of the unit at `position` within a main-RAM burst run. Both cores
/// share main RAM, so the pattern depends only on the unit width.
#[must_use]
pub fn main_ram_unit_cost(width: UnitWidth, position: u32) -> u32 {
    match width {
        UnitWidth::Halfword => MAIN_RAM_BURST_16[(position as usize) % MAIN_RAM_BURST_16.len()],
        UnitWidth::Word => MAIN_RAM_BURST_32[(position as usize) % MAIN_RAM_BURST_32.len()],
    }
}

fn unit_cost(src: AccessTiming, dst: AccessTiming, width: UnitWidth, state: RunState) -> u32 {
    let (src_s, src_n, dst_s, dst_n) = match width {
        UnitWidth::Halfword => (src.s16, src.n16, dst.s16, dst.n16),
        UnitWidth::Word => (src.s32, src.n32, dst.s32, dst.n32),
    };

    if src.bank == dst.bank {
        // Same physical bank: the bus turns around between the read and the
        // write, costing one extra cycle unless this unit genuinely continues
        // the previous unit's burst.
        if state == RunState::BurstContinuing { src_s + dst_s } else { src_s + dst_s + 1 }
    } else if state == RunState::BurstInterrupted {
        // The previous unit ended on a non-sequential boundary, so both
        // sides are priced as first accesses.
        src_n + dst_n
    } else {
        src_s + dst_s
    }
}

/// Cost of one 16-bit unit on the ARM9 bus.
#[must_use]
pub fn arm9_unit_cost_16(regions: &RegionTable, src: u32, dst: u32, state: RunState) -> u32 {
    unit_cost(regions.classify(src), regions.classify(dst), UnitWidth::Halfword, state)
}

/// Cost of one 32-bit unit on the ARM9 bus.
#[must_use]
pub fn arm9_unit_cost_32(regions: &RegionTable, src: u32, dst: u32, state: RunState) -> u32 {
    unit_cost(regions.classify(src), regions.classify(dst), UnitWidth::Word, state)
}

/// Cost of one 16-bit unit on the ARM7 bus.
#[must_use]
pub fn arm7_unit_cost_16(regions: &RegionTable, src: u32, dst: u32, state: RunState) -> u32 {
    unit_cost(regions.classify(src), regions.classify(dst), UnitWidth::Halfword, state)
}

/// Cost of one 32-bit unit on the ARM7 bus.
#[must_use]
pub fn arm7_unit_cost_32(regions: &RegionTable, src: u32, dst: u32, state: RunState) -> u32 {
    unit_cost(regions.classify(src), regions.classify(dst), UnitWidth::Word, state)
}
