//! Guest physical memory for the x86pc machine.
//!
//! The CPU core, interrupt delivery and device models all reach memory through
//! [`MemoryBus`]. Firmware images are placed with the fallible block primitives
//! on [`PhysicalMemory`] before the first instruction executes.
#![forbid(unsafe_code)]

mod bus;
mod phys;

pub use bus::MemoryBus;
pub use phys::{MemoryError, PhysicalMemory, REAL_MODE_SPAN};
