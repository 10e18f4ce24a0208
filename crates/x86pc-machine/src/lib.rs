//! A minimal PC: one x86 core, flat RAM and a port map, driven by an
//! explicit stepping loop.
//!
//! [`Machine`] owns every piece of state; nothing is global. Devices attach
//! through [`Machine::io_mut`] and raise interrupts through the
//! [`InterruptLatch`] handed out by [`Machine::interrupt_latch`].
#![forbid(unsafe_code)]

mod config;
mod debugcon;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};
use x86pc_cpu_core::decoder::SegReg;
use x86pc_cpu_core::{
    CpuCore, CpuState, CycleExit, Exception, InterruptLatch, IoPortBus, SegmentRegister,
    SystemBus,
};
use x86pc_memory::{MemoryError, PhysicalMemory, REAL_MODE_SPAN};

pub use config::{FaultPolicy, MachineConfig, ResetVector};
pub use debugcon::{DebugCon, DEBUGCON_PORT};

/// Physical address the video BIOS option ROM is loaded at.
pub const VGA_BIOS_BASE: u32 = 0xC_0000;

/// Errors returned when constructing or setting up a [`Machine`].
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("invalid memory size {size:#x}: must be between 1 MiB and 4 GiB")]
    InvalidMemorySize { size: usize },
    #[error("{what} image of {len:#x} bytes does not fit below 1 MiB")]
    ImageTooLarge { what: &'static str, len: usize },
    #[error("{what} image is empty")]
    EmptyImage { what: &'static str },
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Why [`Machine::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The instruction budget ran out.
    Completed { executed: u64 },
    /// The core executed HLT, or was already halted with nothing to service.
    Halted { executed: u64 },
    /// The run/stop gate was closed.
    Stopped { executed: u64 },
    /// CS:EIP reached a breakpoint; the instruction there has not executed.
    Breakpoint { addr: u32, executed: u64 },
    /// An instruction faulted and the fault policy did not absorb it.
    Exception { exception: Exception, executed: u64 },
}

impl RunExit {
    /// Cycles completed in this run: instructions plus interrupt deliveries.
    pub fn executed(&self) -> u64 {
        match *self {
            RunExit::Completed { executed }
            | RunExit::Halted { executed }
            | RunExit::Stopped { executed }
            | RunExit::Breakpoint { executed, .. }
            | RunExit::Exception { executed, .. } => executed,
        }
    }
}

/// Run/stop gate checked between cycles.
///
/// Clones share the gate, so a UI or watchdog thread can stop a running
/// machine; the loop notices before its next instruction.
#[derive(Debug, Clone)]
pub struct RunControl {
    running: Arc<AtomicBool>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl RunControl {
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct Machine {
    cfg: MachineConfig,
    cpu: CpuCore,
    bus: SystemBus,
    breakpoints: BTreeSet<u32>,
    run_control: RunControl,
}

impl Machine {
    /// Build a machine with zeroed RAM, no devices and the core at the reset
    /// vector.
    pub fn new(cfg: MachineConfig) -> Result<Self, MachineError> {
        let size = cfg.memory_size;
        if size < MachineConfig::MIN_MEMORY_SIZE || u32::try_from(size - 1).is_err() {
            return Err(MachineError::InvalidMemorySize { size });
        }
        let mut machine = Self {
            cfg,
            cpu: CpuCore::new(),
            bus: SystemBus::new(PhysicalMemory::new(size), IoPortBus::new()),
            breakpoints: BTreeSet::new(),
            run_control: RunControl::default(),
        };
        machine.reset();
        Ok(machine)
    }

    pub fn config(&self) -> &MachineConfig {
        &self.cfg
    }

    pub fn set_fault_policy(&mut self, policy: FaultPolicy) {
        self.cfg.fault_policy = policy;
    }

    /// Power-on reset of the core and all attached devices. RAM, and with
    /// it any loaded firmware, is left alone.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.bus.io.reset();

        let vector = self.cfg.reset_vector;
        let mut cs = SegmentRegister::real_mode(vector.segment);
        cs.descriptor.is_code = true;
        self.cpu.state.set_segment(SegReg::Cs, cs);
        self.cpu.state.set_eip(u32::from(vector.offset));
        debug!(
            cs = vector.segment,
            ip = vector.offset,
            "machine reset"
        );
    }

    pub fn cpu(&self) -> &CpuState {
        &self.cpu.state
    }

    pub fn cpu_mut(&mut self) -> &mut CpuState {
        &mut self.cpu.state
    }

    pub fn memory(&self) -> &PhysicalMemory {
        &self.bus.memory
    }

    pub fn memory_mut(&mut self) -> &mut PhysicalMemory {
        &mut self.bus.memory
    }

    /// The port map; register device models here.
    pub fn io_mut(&mut self) -> &mut IoPortBus {
        &mut self.bus.io
    }

    pub fn bus_mut(&mut self) -> &mut SystemBus {
        &mut self.bus
    }

    pub fn interrupt_latch(&self) -> InterruptLatch {
        self.cpu.interrupt_latch()
    }

    pub fn request_interrupt(&self, vector: u8) {
        self.cpu.request_interrupt(vector);
    }

    pub fn run_control(&self) -> RunControl {
        self.run_control.clone()
    }

    /// Copy `image` into guest RAM at `addr`.
    pub fn load_image(&mut self, addr: u32, image: &[u8]) -> Result<(), MachineError> {
        self.bus.memory.block_write(u64::from(addr), image)?;
        Ok(())
    }

    /// Place the system BIOS so that its last byte lands at 0xFFFFF, under
    /// the reset vector.
    pub fn load_bios(&mut self, image: &[u8]) -> Result<(), MachineError> {
        let what = "BIOS";
        if image.is_empty() {
            return Err(MachineError::EmptyImage { what });
        }
        if image.len() > REAL_MODE_SPAN {
            return Err(MachineError::ImageTooLarge {
                what,
                len: image.len(),
            });
        }
        let base = (REAL_MODE_SPAN - image.len()) as u32;
        self.load_image(base, image)?;
        debug!(base, len = image.len(), "system BIOS loaded");
        Ok(())
    }

    /// Place the video BIOS option ROM at 0xC0000.
    pub fn load_vga_bios(&mut self, image: &[u8]) -> Result<(), MachineError> {
        let what = "VGA BIOS";
        if image.is_empty() {
            return Err(MachineError::EmptyImage { what });
        }
        if VGA_BIOS_BASE as usize + image.len() > REAL_MODE_SPAN {
            return Err(MachineError::ImageTooLarge {
                what,
                len: image.len(),
            });
        }
        self.load_image(VGA_BIOS_BASE, image)?;
        debug!(base = VGA_BIOS_BASE, len = image.len(), "video BIOS loaded");
        Ok(())
    }

    /// Stop runs before executing the instruction at linear address `addr`.
    pub fn add_breakpoint(&mut self, addr: u32) {
        self.breakpoints.insert(addr);
    }

    pub fn remove_breakpoint(&mut self, addr: u32) -> bool {
        self.breakpoints.remove(&addr)
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    /// Linear address of CS:EIP.
    pub fn current_address(&self) -> u32 {
        let state = &self.cpu.state;
        state.resolve_linear_address(SegReg::Cs, state.eip())
    }

    /// One cycle: deliver a latched interrupt, idle while halted, or fetch,
    /// decode and execute the instruction at CS:EIP.
    pub fn step(&mut self) -> Result<CycleExit, Exception> {
        self.cpu.step(&mut self.bus)
    }

    /// Step until `max_insts` cycles completed, the core halts, a breakpoint
    /// is reached, the gate closes or a fault ends the run.
    pub fn run(&mut self, max_insts: u64) -> RunExit {
        let mut executed = 0u64;
        let mut first = true;
        while executed < max_insts {
            if !self.run_control.is_running() {
                return RunExit::Stopped { executed };
            }
            let addr = self.current_address();
            if !first && self.breakpoints.contains(&addr) {
                debug!(addr, executed, "breakpoint hit");
                return RunExit::Breakpoint { addr, executed };
            }
            first = false;

            match self.step() {
                Ok(CycleExit::Retired | CycleExit::Branched) => executed += 1,
                Ok(CycleExit::Interrupted { vector }) => {
                    trace!(vector, "interrupt serviced");
                    executed += 1;
                }
                Ok(CycleExit::Halted) => {
                    return RunExit::Halted {
                        executed: executed + 1,
                    }
                }
                Ok(CycleExit::Idle) => return RunExit::Halted { executed },
                Err(exception) => match self.handle_fault(exception) {
                    Ok(()) => executed += 1,
                    Err(exception) => return RunExit::Exception { exception, executed },
                },
            }
        }
        RunExit::Completed { executed }
    }

    /// Apply the fault policy. `Err` means the run has to end with that fault.
    fn handle_fault(&mut self, fault: Exception) -> Result<(), Exception> {
        debug!(
            %fault,
            cs = self.cpu.state.selector(SegReg::Cs),
            eip = self.cpu.state.eip(),
            "instruction faulted"
        );
        if self.cfg.fault_policy != FaultPolicy::DeliverToGuest {
            return Err(fault);
        }
        if self.cpu.deliver_fault(&mut self.bus, fault)? {
            Ok(())
        } else {
            Err(fault)
        }
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("cfg", &self.cfg)
            .field("cpu", &self.cpu)
            .field("memory", &self.bus.memory)
            .field("io", &self.bus.io)
            .field("breakpoints", &self.breakpoints)
            .finish()
    }
}
