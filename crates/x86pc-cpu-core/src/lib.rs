//! x86 16/32-bit CPU core.
//!
//! The core executes one pre-decoded instruction per [`CpuCore::cycle`] against
//! an explicit [`CpuState`] and a [`CpuBus`] that combines guest memory with the
//! I/O port router. Nothing here owns global state; the surrounding machine
//! owns the core, the memory and the port map and drives the stepping loop.
#![forbid(unsafe_code)]

pub mod alu;
pub mod cpu;
pub mod exception;
pub mod flags;
pub mod interp;
pub mod interrupts;
pub mod io;
pub mod mem;
pub mod segmentation;
pub mod stack;
pub mod state;

pub use cpu::{CpuCore, CycleExit};
pub use exception::Exception;
pub use flags::Flags;
pub use interrupts::{InterruptLatch, InterruptSink};
pub use io::{IoPortBus, PortIoDevice};
pub use mem::{CpuBus, SystemBus};
pub use segmentation::{Descriptor, SegmentRegister};
pub use state::{CpuState, TableRegister, CR0_PE};

pub use x86pc_decoder as decoder;
