//! System-wide discrete-event queue
//!
//! The DMA engine registers its per-core tick events here and re-arms them
//! while any channel on that core is live. Display events (VBlank/HBlank)
//! are pushed by the video glue and fan out to DMA start-mode triggers.

use crate::bus::CpuCore;
use bincode::{Decode, Encode};
use std::array;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum SchedulerEventType {
    Dma9Tick,
    Dma7Tick,
    VBlank,
    HBlank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct SchedulerEvent {
    pub event_type: SchedulerEventType,
    pub cpu_cycles: u64,
}

impl SchedulerEvent {
    #[must_use]
    pub fn dma_tick(core: CpuCore, cpu_cycles: u64) -> Self {
        let event_type = match core {
            CpuCore::Arm9 => SchedulerEventType::Dma9Tick,
            CpuCore::Arm7 => SchedulerEventType::Dma7Tick,
        };
        Self { event_type, cpu_cycles }
    }

    #[must_use]
    pub fn vblank(cpu_cycles: u64) -> Self {
        Self { event_type: SchedulerEventType::VBlank, cpu_cycles }
    }

    #[must_use]
    pub fn hblank(cpu_cycles: u64) -> Self {
        Self { event_type: SchedulerEventType::HBlank, cpu_cycles }
    }
}

impl Default for SchedulerEvent {
    fn default() -> Self {
        Self { event_type: SchedulerEventType::VBlank, cpu_cycles: u64::MAX }
    }
}

impl PartialOrd for SchedulerEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SchedulerEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cpu_cycles.cmp(&other.cpu_cycles)
    }
}

const EVENT_CAPACITY: usize = 8;

/// Fixed-capacity event queue keyed on the system cycle counter.
///
/// The live event count stays in the single digits, so events are stored in
/// an unordered array and the next-due event is found by a linear scan.
#[derive(Debug, Clone, Encode, Decode)]
pub struct Scheduler {
    cpu_cycle_counter: u64,
    events: [SchedulerEvent; EVENT_CAPACITY],
    len: usize,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cpu_cycle_counter: 0,
            events: array::from_fn(|_| SchedulerEvent::default()),
            len: 0,
        }
    }

    #[must_use]
    pub fn cpu_cycle_counter(&self) -> u64 {
        self.cpu_cycle_counter
    }

    pub fn increment_cpu_cycles(&mut self, cpu_cycles: u64) {
        self.cpu_cycle_counter += cpu_cycles;
    }

    fn next_due_idx(&self) -> Option<usize> {
        self.events[..self.len]
            .iter()
            .enumerate()
            .min_by_key(|(_, event)| event.cpu_cycles)
            .map(|(i, _)| i)
    }

    #[must_use]
    pub fn is_event_ready(&self) -> bool {
        self.next_due_idx()
            .is_some_and(|i| self.events[i].cpu_cycles <= self.cpu_cycle_counter)
    }

    fn push(&mut self, event: SchedulerEvent) {
        assert!(self.len < EVENT_CAPACITY, "Push while event queue is at capacity");

        self.events[self.len] = event;
        self.len += 1;
    }

    /// Insert the event, replacing any existing event of the same type.
    pub fn update_or_push_event(&mut self, event: SchedulerEvent) {
        log::debug!(
            "Scheduled event of type {:?} at cycles {}, current {}",
            event.event_type,
            event.cpu_cycles,
            self.cpu_cycle_counter
        );

        match self.events[..self.len].iter().position(|e| e.event_type == event.event_type) {
            Some(i) => self.events[i] = event,
            None => self.push(event),
        }
    }

    /// Insert the event, keeping whichever of the new/existing event of this
    /// type is due sooner.
    pub fn min_or_push_event(&mut self, event: SchedulerEvent) {
        match self.events[..self.len].iter().position(|e| e.event_type == event.event_type) {
            Some(i) => {
                if event.cpu_cycles < self.events[i].cpu_cycles {
                    self.events[i] = event;
                }
            }
            None => self.push(event),
        }
    }

    pub fn remove_event(&mut self, event_type: SchedulerEventType) {
        if let Some(i) = self.events[..self.len].iter().position(|e| e.event_type == event_type) {
            self.len -= 1;
            self.events.swap(i, self.len);
            self.events[self.len] = SchedulerEvent::default();
        }
    }

    pub fn pop_ready_event(&mut self) -> Option<SchedulerEvent> {
        let i = self.next_due_idx()?;
        if self.events[i].cpu_cycles > self.cpu_cycle_counter {
            return None;
        }

        let event = self.events[i];
        self.len -= 1;
        self.events.swap(i, self.len);
        self.events[self.len] = SchedulerEvent::default();

        Some(event)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
