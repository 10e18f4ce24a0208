use x86pc_decoder::{DecodedInst, Gpr, Op, OperandKind, OperandSize, RegClass, SegReg};

use super::operand::{
    effective_offset, load, locate, operand, read_far_pointer, read_op, store, write_op,
};
use super::ExecOutcome;
use crate::exception::Exception;
use crate::flags::Flags;
use crate::mem::CpuBus;
use crate::state::CpuState;

/// FLAGS bits LAHF/SAHF transfer through AH.
const AH_FLAGS: Flags = Flags::SF
    .union(Flags::ZF)
    .union(Flags::AF)
    .union(Flags::PF)
    .union(Flags::CF);

pub fn exec<B: CpuBus>(
    state: &mut CpuState,
    bus: &mut B,
    inst: &DecodedInst,
    _next_ip: u32,
) -> Result<ExecOutcome, Exception> {
    match inst.op {
        Op::Mov => {
            let value = read_op(state, bus, inst, 1)?;
            write_op(state, bus, inst, 0, value)?;
        }
        Op::Movzx | Op::Movsx => {
            let src = *operand(inst, 1)?;
            let value = read_op(state, bus, inst, 1)?;
            let value = if inst.op == Op::Movsx {
                sign_extend(value, src.size)
            } else {
                value & src.size.mask()
            };
            write_op(state, bus, inst, 0, value)?;
        }
        Op::Xchg => {
            let a = *operand(inst, 0)?;
            let b = *operand(inst, 1)?;
            let loc_a = locate(state, inst, &a);
            let loc_b = locate(state, inst, &b);
            let va = load(state, bus, loc_a, a.size);
            let vb = load(state, bus, loc_b, b.size);
            store(state, bus, loc_a, a.size, vb)?;
            store(state, bus, loc_b, b.size, va)?;
        }
        Op::Lea => {
            let src = operand(inst, 1)?;
            let OperandKind::Memory(mem) = src.kind else {
                return Err(Exception::InvalidOpcode);
            };
            let offset = effective_offset(state, inst, &mem);
            write_op(state, bus, inst, 0, offset)?;
        }
        Op::Push => {
            let value = read_op(state, bus, inst, 0)?;
            state.push(bus, value, inst.operand_size);
        }
        Op::Pop => exec_pop(state, bus, inst)?,
        Op::Pusha => {
            let size = inst.operand_size;
            let original_sp = state.read_gpr(Gpr::Esp, size);
            for gpr in Gpr::ALL {
                let value = if gpr == Gpr::Esp {
                    original_sp
                } else {
                    state.read_gpr(gpr, size)
                };
                state.push(bus, value, size);
            }
        }
        Op::Popa => {
            let size = inst.operand_size;
            for gpr in Gpr::ALL.into_iter().rev() {
                let value = state.pop(bus, size);
                if gpr != Gpr::Esp {
                    state.write_gpr(gpr, size, value);
                }
            }
        }
        Op::Pushf => {
            let image = (state.flags - (Flags::VM | Flags::RF)).to_image();
            state.push(bus, image, inst.operand_size);
        }
        Op::Popf => {
            let image = state.pop(bus, inst.operand_size);
            let image = match inst.operand_size {
                OperandSize::Bits32 => image,
                _ => (state.flags.bits() & 0xFFFF_0000) | (image & 0xFFFF),
            };
            let preserved = state.flags & (Flags::VM | Flags::RF);
            state.flags = (Flags::from_image(image) - (Flags::VM | Flags::RF)) | preserved;
        }
        Op::Lahf => state.set_ah((state.flags & AH_FLAGS).to_image() as u8),
        Op::Sahf => {
            let ah = Flags::from_image(u32::from(state.ah())) & AH_FLAGS;
            state.flags = (state.flags - AH_FLAGS) | ah;
        }
        Op::Lds | Op::Les | Op::Lfs | Op::Lgs | Op::Lss => {
            let seg = match inst.op {
                Op::Lds => SegReg::Ds,
                Op::Les => SegReg::Es,
                Op::Lfs => SegReg::Fs,
                Op::Lgs => SegReg::Gs,
                _ => SegReg::Ss,
            };
            let (selector, offset) = read_far_pointer(state, bus, inst, 1)?;
            state.set_selector(bus, seg, selector)?;
            write_op(state, bus, inst, 0, offset)?;
        }
        Op::Xlat => {
            let seg = inst.prefixes.segment.unwrap_or(SegReg::Ds);
            let mask = inst.address_size.mask();
            let offset = (state.ebx() & mask).wrapping_add(u32::from(state.al())) & mask;
            let value = state.read_mem(bus, seg, offset, OperandSize::Bits8);
            state.set_al(value as u8);
        }
        _ => return Err(Exception::InvalidOpcode),
    }
    Ok(ExecOutcome::Continue)
}

fn exec_pop<B: CpuBus>(
    state: &mut CpuState,
    bus: &mut B,
    inst: &DecodedInst,
) -> Result<(), Exception> {
    let size = inst.operand_size;
    let dst = *operand(inst, 0)?;
    let value = state.peek(bus, 0, size);
    let is_segment = matches!(dst.kind, OperandKind::Register(reg) if reg.class == RegClass::Segment);
    if is_segment {
        // A rejected selector must leave SP where it was.
        let loc = locate(state, inst, &dst);
        store(state, bus, loc, OperandSize::Bits16, value)?;
        state.adjust_stack(size.bytes() as i32);
    } else {
        // ESP-based destinations see the already incremented pointer.
        state.adjust_stack(size.bytes() as i32);
        let loc = locate(state, inst, &dst);
        store(state, bus, loc, dst.size, value)?;
    }
    Ok(())
}

fn sign_extend(value: u32, size: OperandSize) -> u32 {
    match size {
        OperandSize::Bits8 => value as u8 as i8 as i32 as u32,
        OperandSize::Bits16 => value as u16 as i16 as i32 as u32,
        OperandSize::Bits32 => value,
    }
}
