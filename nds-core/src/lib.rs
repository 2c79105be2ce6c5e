//! NDS core components, currently centered on the DMA subsystem: the
//! per-core channel sets, the bus timing model they implement, and the
//! scheduler/interrupt glue that drives them.

pub mod bus;
pub mod dma;
pub mod interrupts;
mod num;
pub mod scheduler;
