use x86pc_decoder::{AddressSize, DecodedInst, Gpr, Op, OperandKind, OperandSize, SegReg};

use super::operand::{operand, read_far_pointer, read_op};
use super::{cond_holds, ExecOutcome};
use crate::exception::Exception;
use crate::flags::Flags;
use crate::mem::CpuBus;
use crate::state::CpuState;

const VECTOR_BREAKPOINT: u8 = 3;
const VECTOR_OVERFLOW: u8 = 4;

pub fn exec<B: CpuBus>(
    state: &mut CpuState,
    bus: &mut B,
    inst: &DecodedInst,
    next_ip: u32,
) -> Result<ExecOutcome, Exception> {
    match inst.op {
        Op::Jmp => {
            let target = near_target(state, bus, inst)?;
            state.near_transfer(target)?;
        }
        Op::JmpFar => {
            let (selector, offset) = far_target(state, bus, inst)?;
            state.far_transfer(bus, selector, offset)?;
        }
        Op::Jcc(cond) => {
            if !cond_holds(state.flags, cond) {
                return Ok(ExecOutcome::Continue);
            }
            let target = read_op(state, bus, inst, 0)?;
            state.near_transfer(target)?;
        }
        Op::Jcxz => {
            if state.read_gpr(Gpr::Ecx, count_size(inst)) != 0 {
                return Ok(ExecOutcome::Continue);
            }
            let target = read_op(state, bus, inst, 0)?;
            state.near_transfer(target)?;
        }
        Op::Loop | Op::Loope | Op::Loopne => {
            let size = count_size(inst);
            let count = state.read_gpr(Gpr::Ecx, size).wrapping_sub(1) & size.mask();
            let zf = state.flag(Flags::ZF);
            let taken = count != 0
                && match inst.op {
                    Op::Loope => zf,
                    Op::Loopne => !zf,
                    _ => true,
                };
            if taken {
                let target = read_op(state, bus, inst, 0)?;
                state.near_transfer(target)?;
            }
            state.write_gpr(Gpr::Ecx, size, count);
            if !taken {
                return Ok(ExecOutcome::Continue);
            }
        }
        Op::Call => {
            let target = near_target(state, bus, inst)?;
            state.near_transfer(target)?;
            state.push(bus, next_ip, inst.operand_size);
        }
        Op::CallFar => {
            let (selector, offset) = far_target(state, bus, inst)?;
            let return_cs = state.selector(SegReg::Cs);
            state.far_transfer(bus, selector, offset)?;
            state.push(bus, u32::from(return_cs), inst.operand_size);
            state.push(bus, next_ip, inst.operand_size);
        }
        Op::Ret => {
            let size = inst.operand_size;
            let target = state.peek(bus, 0, size);
            state.near_transfer(target)?;
            state.adjust_stack((size.bytes() + release_bytes(inst)) as i32);
        }
        Op::RetFar => {
            let size = inst.operand_size;
            let offset = state.peek(bus, 0, size);
            let selector = state.peek(bus, size.bytes(), size) as u16;
            state.far_transfer(bus, selector, offset)?;
            state.adjust_stack((2 * size.bytes() + release_bytes(inst)) as i32);
        }
        Op::Int => {
            let vector = read_op(state, bus, inst, 0)? as u8;
            state.deliver_interrupt(bus, vector, next_ip)?;
        }
        Op::Int3 => state.deliver_interrupt(bus, VECTOR_BREAKPOINT, next_ip)?,
        Op::Into => {
            if !state.flag(Flags::OF) {
                return Ok(ExecOutcome::Continue);
            }
            state.deliver_interrupt(bus, VECTOR_OVERFLOW, next_ip)?;
        }
        Op::Iret => state.return_from_interrupt(bus, inst.operand_size)?,
        Op::Enter => {
            exec_enter(state, bus, inst)?;
            return Ok(ExecOutcome::Continue);
        }
        Op::Leave => {
            let sp_size = stack_size(state);
            let frame = state.read_gpr(Gpr::Ebp, sp_size);
            state.write_gpr(Gpr::Esp, sp_size, frame);
            let bp = state.pop(bus, inst.operand_size);
            state.write_gpr(Gpr::Ebp, inst.operand_size, bp);
            return Ok(ExecOutcome::Continue);
        }
        _ => return Err(Exception::InvalidOpcode),
    }
    Ok(ExecOutcome::Branch)
}

/// Target of a near JMP/CALL: a decoded absolute offset or an indirect
/// register/memory operand at the operand size.
fn near_target<B: CpuBus>(
    state: &CpuState,
    bus: &mut B,
    inst: &DecodedInst,
) -> Result<u32, Exception> {
    let target = read_op(state, bus, inst, 0)?;
    match operand(inst, 0)?.kind {
        OperandKind::Immediate(_) => Ok(target),
        _ => Ok(target & inst.operand_size.mask()),
    }
}

/// `(selector, offset)` of a far JMP/CALL, from `ptr16:16/32` immediates or
/// an `m16:16/32` memory operand.
fn far_target<B: CpuBus>(
    state: &CpuState,
    bus: &mut B,
    inst: &DecodedInst,
) -> Result<(u16, u32), Exception> {
    match operand(inst, 0)?.kind {
        OperandKind::Immediate(offset) => {
            let selector = read_op(state, bus, inst, 1)? as u16;
            Ok((selector, offset))
        }
        _ => read_far_pointer(state, bus, inst, 0),
    }
}

/// Extra bytes released by `RET imm16`.
fn release_bytes(inst: &DecodedInst) -> u32 {
    match inst.operand(0).map(|op| op.kind) {
        Some(OperandKind::Immediate(bytes)) => bytes & 0xFFFF,
        _ => 0,
    }
}

/// CX or ECX, chosen by the address size.
fn count_size(inst: &DecodedInst) -> OperandSize {
    match inst.address_size {
        AddressSize::Bits16 => OperandSize::Bits16,
        AddressSize::Bits32 => OperandSize::Bits32,
    }
}

fn stack_size(state: &CpuState) -> OperandSize {
    if state.stack_is_32bit() {
        OperandSize::Bits32
    } else {
        OperandSize::Bits16
    }
}

fn exec_enter<B: CpuBus>(
    state: &mut CpuState,
    bus: &mut B,
    inst: &DecodedInst,
) -> Result<(), Exception> {
    let size = inst.operand_size;
    let alloc = read_op(state, bus, inst, 0)? & 0xFFFF;
    let level = read_op(state, bus, inst, 1)? & 0x1F;
    let sp_size = stack_size(state);

    let bp = state.read_gpr(Gpr::Ebp, size);
    state.push(bus, bp, size);
    let frame = state.stack_top();

    if level > 0 {
        let mut outer = state.read_gpr(Gpr::Ebp, sp_size);
        for _ in 1..level {
            outer = outer.wrapping_sub(size.bytes()) & sp_size.mask();
            let link = state.read_mem(bus, SegReg::Ss, outer, size);
            state.push(bus, link, size);
        }
        state.push(bus, frame, size);
    }

    state.write_gpr(Gpr::Ebp, size, frame);
    state.adjust_stack(-(alloc as i32));
    Ok(())
}
