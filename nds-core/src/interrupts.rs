//! NDS interrupt registers (IME/IE/IF), one set per CPU core

use crate::num::U32Ext;
use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptType {
    VBlank,
    HBlank,
    Dma0,
    Dma1,
    Dma2,
    Dma3,
}

impl InterruptType {
    /// The DMA interrupt source for the given channel number (0-3).
    #[must_use]
    pub fn dma(channel: u8) -> Self {
        match channel {
            0 => Self::Dma0,
            1 => Self::Dma1,
            2 => Self::Dma2,
            3 => Self::Dma3,
            _ => panic!("DMA channel should always be 0-3, was {channel}"),
        }
    }

    const fn bit_mask(self) -> u32 {
        match self {
            Self::VBlank => 1,
            Self::HBlank => 1 << 1,
            Self::Dma0 => 1 << 8,
            Self::Dma1 => 1 << 9,
            Self::Dma2 => 1 << 10,
            Self::Dma3 => 1 << 11,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct InterruptRegisters {
    master_enable: bool,
    interrupt_enable: u32,
    interrupt_flags: u32,
}

impl InterruptRegisters {
    #[must_use]
    pub fn new() -> Self {
        Self { master_enable: false, interrupt_enable: 0, interrupt_flags: 0 }
    }

    pub fn read_ime(&self) -> u32 {
        self.master_enable.into()
    }

    pub fn write_ime(&mut self, value: u32) {
        self.master_enable = value.bit(0);

        log::debug!("IME write: {}", self.master_enable);
    }

    pub fn read_ie(&self) -> u32 {
        self.interrupt_enable
    }

    pub fn write_ie(&mut self, value: u32) {
        self.interrupt_enable = value;

        log::debug!("IE write: {value:08X}");
    }

    pub fn read_if(&self) -> u32 {
        self.interrupt_flags
    }

    pub fn write_if(&mut self, value: u32) {
        // Writing 1 to a bit acknowledges (clears) it
        self.interrupt_flags &= !value;

        log::debug!("IF write: {value:08X}");
    }

    pub fn set_interrupt_flag(&mut self, interrupt: InterruptType) {
        self.interrupt_flags |= interrupt.bit_mask();

        log::debug!("Set interrupt flag: {interrupt:?}");
    }

    #[must_use]
    pub fn read_interrupt_flag(&self, interrupt: InterruptType) -> bool {
        self.interrupt_flags & interrupt.bit_mask() != 0
    }

    #[must_use]
    pub fn interrupt_pending(&self) -> bool {
        self.master_enable && self.interrupt_enable & self.interrupt_flags != 0
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for InterruptRegisters {
    fn default() -> Self {
        Self::new()
    }
}
