//! The per-instruction cycle: interrupt check, halt check, execute, retire.

use tracing::{debug, trace};
use x86pc_decoder::{decode, DecodeMode, DecodedInst, SegReg, MAX_INST_LEN};

use crate::exception::Exception;
use crate::interp::{exec_decoded, ExecOutcome};
use crate::interrupts::{InterruptLatch, InterruptSink};
use crate::mem::CpuBus;
use crate::state::CpuState;

/// How one cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleExit {
    /// The instruction completed and EIP moved past it.
    Retired,
    /// The instruction completed and redirected CS:EIP itself.
    Branched,
    /// HLT retired; the core is parked until an interrupt arrives.
    Halted,
    /// The core is halted and nothing was latched.
    Idle,
    /// A latched interrupt was delivered instead of executing anything.
    Interrupted { vector: u8 },
}

/// Register state plus the interrupt latch devices post into.
#[derive(Debug, Default)]
pub struct CpuCore {
    pub state: CpuState,
    latch: InterruptLatch,
}

impl CpuCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back to the power-on register state. Anything latched is dropped.
    pub fn reset(&mut self) {
        self.state.reset();
        self.latch.clear();
    }

    /// A handle devices can keep to raise interrupts, from any thread.
    pub fn interrupt_latch(&self) -> InterruptLatch {
        self.latch.clone()
    }

    pub fn request_interrupt(&self, vector: u8) {
        self.latch.request_interrupt(vector);
    }

    pub fn pending_interrupt(&self) -> Option<u8> {
        self.latch.pending()
    }

    /// Deliver the latched interrupt, if any, with the current EIP as the
    /// return address.
    ///
    /// The latch is only cleared once delivery succeeded, and only if no
    /// newer request replaced the delivered vector meanwhile.
    pub fn service_pending_interrupt<B: CpuBus>(
        &mut self,
        bus: &mut B,
    ) -> Result<Option<u8>, Exception> {
        let Some(vector) = self.latch.pending() else {
            return Ok(None);
        };
        let eip = self.state.eip();
        self.state.deliver_interrupt(bus, vector, eip)?;
        self.latch.acknowledge(vector);
        Ok(Some(vector))
    }

    /// Run one pre-decoded instruction through the full cycle: a latched
    /// interrupt preempts it, a halted core ignores it.
    pub fn cycle<B: CpuBus>(
        &mut self,
        bus: &mut B,
        inst: &DecodedInst,
    ) -> Result<CycleExit, Exception> {
        if let Some(vector) = self.service_pending_interrupt(bus)? {
            return Ok(CycleExit::Interrupted { vector });
        }
        if self.state.halted {
            return Ok(CycleExit::Idle);
        }
        self.execute(bus, inst)
    }

    /// Like [`CpuCore::cycle`], but fetches and decodes the instruction at
    /// CS:EIP itself.
    pub fn step<B: CpuBus>(&mut self, bus: &mut B) -> Result<CycleExit, Exception> {
        if let Some(vector) = self.service_pending_interrupt(bus)? {
            return Ok(CycleExit::Interrupted { vector });
        }
        if self.state.halted {
            return Ok(CycleExit::Idle);
        }
        let inst = self.fetch_decode(bus)?;
        self.execute(bus, &inst)
    }

    /// Fetch at CS:EIP and decode with the width of the current code segment.
    pub fn fetch_decode<B: CpuBus>(&self, bus: &mut B) -> Result<DecodedInst, Exception> {
        let eip = self.state.eip();
        let addr = self.state.code_address(eip)?;
        let mut bytes = [0u8; MAX_INST_LEN];
        bus.fetch(addr, &mut bytes);

        let mode = if self.state.segment(SegReg::Cs).descriptor.is_32bit {
            DecodeMode::Bits32
        } else {
            DecodeMode::Bits16
        };
        decode(&bytes, mode, eip).map_err(|err| {
            debug!(
                cs = self.state.selector(SegReg::Cs),
                eip,
                %err,
                "undecodable instruction"
            );
            Exception::InvalidOpcode
        })
    }

    /// Execute and retire one instruction. On a fault EIP still points at it.
    pub fn execute<B: CpuBus>(
        &mut self,
        bus: &mut B,
        inst: &DecodedInst,
    ) -> Result<CycleExit, Exception> {
        let state = &mut self.state;
        let next_ip = state.eip().wrapping_add(u32::from(inst.len)) & state.ip_mask();
        trace!(
            cs = state.selector(SegReg::Cs),
            eip = state.eip(),
            op = ?inst.op,
            "execute"
        );

        match exec_decoded(state, bus, inst, next_ip)? {
            ExecOutcome::Continue => {
                state.set_eip(next_ip);
                Ok(CycleExit::Retired)
            }
            ExecOutcome::Branch => Ok(CycleExit::Branched),
            ExecOutcome::Halt => {
                state.set_eip(next_ip);
                state.halted = true;
                Ok(CycleExit::Halted)
            }
        }
    }

    /// Inject `fault` into the guest through its interrupt table entry, with
    /// the faulting instruction as the return address.
    ///
    /// Returns `Ok(false)` for faults that have no architectural vector.
    pub fn deliver_fault<B: CpuBus>(
        &mut self,
        bus: &mut B,
        fault: Exception,
    ) -> Result<bool, Exception> {
        let Some(vector) = fault.vector() else {
            return Ok(false);
        };
        debug!(vector, %fault, "delivering fault to guest");
        let eip = self.state.eip();
        self.state.deliver_interrupt(bus, vector, eip)?;
        Ok(true)
    }
}

impl std::ops::Deref for CpuCore {
    type Target = CpuState;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl std::ops::DerefMut for CpuCore {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state
    }
}
