use x86pc_decoder::{
    DecodedInst, MemRef, Operand, OperandKind, OperandSize, Reg, RegClass, SegReg,
};

use crate::exception::Exception;
use crate::mem::CpuBus;
use crate::state::CpuState;

/// A materialized operand: where the value lives for this instruction.
///
/// Memory locations are frozen when located, so writes land where the read
/// came from even if an earlier write changed a base register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Reg(Reg),
    Mem { seg: SegReg, offset: u32 },
    Imm(u32),
}

/// `base + index * scale + displacement`, wrapped to the address size.
pub fn effective_offset(state: &CpuState, inst: &DecodedInst, mem: &MemRef) -> u32 {
    let mut offset = mem.displacement;
    if let Some(base) = mem.base {
        offset = offset.wrapping_add(state.read_gpr32(base));
    }
    if let Some(index) = mem.index {
        offset = offset.wrapping_add(state.read_gpr32(index).wrapping_mul(u32::from(mem.scale)));
    }
    offset & inst.address_size.mask()
}

pub(crate) fn operand(inst: &DecodedInst, index: usize) -> Result<&Operand, Exception> {
    inst.operand(index).ok_or(Exception::InvalidOpcode)
}

pub(crate) fn locate(state: &CpuState, inst: &DecodedInst, op: &Operand) -> Location {
    match op.kind {
        OperandKind::Register(reg) => Location::Reg(reg),
        OperandKind::Memory(mem) => Location::Mem {
            seg: mem.segment(),
            offset: effective_offset(state, inst, &mem),
        },
        OperandKind::Immediate(value) => Location::Imm(value & op.size.mask()),
    }
}

/// Segment and offset of a memory operand; anything else is #UD.
pub(crate) fn memory_location(
    state: &CpuState,
    inst: &DecodedInst,
    index: usize,
) -> Result<(SegReg, u32), Exception> {
    match locate(state, inst, operand(inst, index)?) {
        Location::Mem { seg, offset } => Ok((seg, offset)),
        _ => Err(Exception::InvalidOpcode),
    }
}

pub(crate) fn load<B: CpuBus>(
    state: &CpuState,
    bus: &mut B,
    loc: Location,
    size: OperandSize,
) -> u32 {
    match loc {
        Location::Reg(reg) => state.read_reg(reg),
        Location::Mem { seg, offset } => state.read_mem(bus, seg, offset, size),
        Location::Imm(value) => value,
    }
}

pub(crate) fn store<B: CpuBus>(
    state: &mut CpuState,
    bus: &mut B,
    loc: Location,
    size: OperandSize,
    value: u32,
) -> Result<(), Exception> {
    match loc {
        Location::Reg(reg) if reg.class == RegClass::Segment => {
            match reg.segment() {
                // CS is only loaded by far control transfers.
                Some(SegReg::Cs) | None => Err(Exception::InvalidOpcode),
                Some(seg) => state.set_selector(bus, seg, value as u16),
            }
        }
        Location::Reg(reg) => {
            if state.write_reg(reg, value) {
                Ok(())
            } else {
                Err(Exception::InvalidOpcode)
            }
        }
        Location::Mem { seg, offset } => {
            state.write_mem(bus, seg, offset, size, value);
            Ok(())
        }
        Location::Imm(_) => Err(Exception::InvalidOpcode),
    }
}

/// Read operand `index` at its own width.
pub(crate) fn read_op<B: CpuBus>(
    state: &CpuState,
    bus: &mut B,
    inst: &DecodedInst,
    index: usize,
) -> Result<u32, Exception> {
    let op = operand(inst, index)?;
    Ok(load(state, bus, locate(state, inst, op), op.size))
}

/// Write operand `index` at its own width.
pub(crate) fn write_op<B: CpuBus>(
    state: &mut CpuState,
    bus: &mut B,
    inst: &DecodedInst,
    index: usize,
    value: u32,
) -> Result<(), Exception> {
    let op = *operand(inst, index)?;
    let loc = locate(state, inst, &op);
    store(state, bus, loc, op.size, value)
}

/// Read a `offset:selector` far pointer from memory operand `index`. The
/// offset is 16 or 32 bits according to the operand size.
pub(crate) fn read_far_pointer<B: CpuBus>(
    state: &CpuState,
    bus: &mut B,
    inst: &DecodedInst,
    index: usize,
) -> Result<(u16, u32), Exception> {
    let (seg, offset) = memory_location(state, inst, index)?;
    let size = inst.operand_size;
    let target = state.read_mem(bus, seg, offset, size);
    let selector_offset = offset.wrapping_add(size.bytes()) & inst.address_size.mask();
    let selector = state.read_mem(bus, seg, selector_offset, OperandSize::Bits16) as u16;
    Ok((selector, target))
}
