use x86pc_memory::REAL_MODE_SPAN;

/// What [`crate::Machine::run`] does when an instruction faults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FaultPolicy {
    /// End the run and report the fault.
    #[default]
    Stop,
    /// Deliver faults that have an architectural vector through the guest's
    /// interrupt table and keep running. Faults without one still stop.
    DeliverToGuest,
}

/// CS:IP loaded by [`crate::Machine::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetVector {
    pub segment: u16,
    pub offset: u16,
}

impl Default for ResetVector {
    fn default() -> Self {
        Self {
            segment: 0xF000,
            offset: 0xFFF0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    /// Guest RAM size in bytes. At least 1 MiB, so the whole real-mode
    /// address space including the BIOS area is backed, and no more than a
    /// 32-bit physical address can reach.
    pub memory_size: usize,
    pub fault_policy: FaultPolicy,
    pub reset_vector: ResetVector,
}

impl MachineConfig {
    pub const DEFAULT_MEMORY_SIZE: usize = 16 * 1024 * 1024;
    pub const MIN_MEMORY_SIZE: usize = REAL_MODE_SPAN;
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            memory_size: Self::DEFAULT_MEMORY_SIZE,
            fault_policy: FaultPolicy::default(),
            reset_vector: ResetVector::default(),
        }
    }
}
