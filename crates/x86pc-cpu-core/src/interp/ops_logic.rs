use x86pc_decoder::{DecodedInst, Op, OperandKind, OperandSize};

use super::operand::{load, locate, operand, read_op, store, write_op, Location};
use super::{cond_holds, ExecOutcome};
use crate::alu::{self, RotateKind, ShiftKind};
use crate::exception::Exception;
use crate::flags::Flags;
use crate::mem::CpuBus;
use crate::state::CpuState;

pub fn exec<B: CpuBus>(
    state: &mut CpuState,
    bus: &mut B,
    inst: &DecodedInst,
    _next_ip: u32,
) -> Result<ExecOutcome, Exception> {
    let dst = *operand(inst, 0)?;
    let loc = locate(state, inst, &dst);
    let a = load(state, bus, loc, dst.size);

    if inst.op == Op::Not {
        store(state, bus, loc, dst.size, !a)?;
        return Ok(ExecOutcome::Continue);
    }

    let b = read_op(state, bus, inst, 1)?;
    let result = match inst.op {
        Op::And | Op::Test => a & b,
        Op::Or => a | b,
        Op::Xor => a ^ b,
        _ => return Err(Exception::InvalidOpcode),
    };
    let result = alu::logic(&mut state.flags, result, dst.size);
    if inst.op != Op::Test {
        store(state, bus, loc, dst.size, result)?;
    }
    Ok(ExecOutcome::Continue)
}

pub fn exec_shift<B: CpuBus>(
    state: &mut CpuState,
    bus: &mut B,
    inst: &DecodedInst,
    _next_ip: u32,
) -> Result<ExecOutcome, Exception> {
    let dst = *operand(inst, 0)?;
    let loc = locate(state, inst, &dst);
    let value = load(state, bus, loc, dst.size);
    // The D0-D3 forms have an implicit count of one.
    let count = if inst.operands.len() > 1 {
        read_op(state, bus, inst, 1)?
    } else {
        1
    };

    let flags = &mut state.flags;
    let result = match inst.op {
        Op::Shl => alu::shift(flags, ShiftKind::Shl, value, count, dst.size),
        Op::Shr => alu::shift(flags, ShiftKind::Shr, value, count, dst.size),
        Op::Sar => alu::shift(flags, ShiftKind::Sar, value, count, dst.size),
        Op::Rol => alu::rotate(flags, RotateKind::Rol, value, count, dst.size),
        Op::Ror => alu::rotate(flags, RotateKind::Ror, value, count, dst.size),
        Op::Rcl => alu::rotate(flags, RotateKind::Rcl, value, count, dst.size),
        Op::Rcr => alu::rotate(flags, RotateKind::Rcr, value, count, dst.size),
        _ => return Err(Exception::InvalidOpcode),
    };
    store(state, bus, loc, dst.size, result)?;
    Ok(ExecOutcome::Continue)
}

pub fn exec_bit<B: CpuBus>(
    state: &mut CpuState,
    bus: &mut B,
    inst: &DecodedInst,
    _next_ip: u32,
) -> Result<ExecOutcome, Exception> {
    match inst.op {
        Op::Setcc(cond) => {
            let value = u32::from(cond_holds(state.flags, cond));
            write_op(state, bus, inst, 0, value)?;
        }
        Op::Bt | Op::Bts | Op::Btr | Op::Btc => exec_bit_test(state, bus, inst)?,
        Op::Bsf | Op::Bsr => {
            let size = operand(inst, 0)?.size;
            let src = read_op(state, bus, inst, 1)? & size.mask();
            if src == 0 {
                state.set_flag(Flags::ZF, true);
                return Ok(ExecOutcome::Continue);
            }
            let index = if inst.op == Op::Bsf {
                src.trailing_zeros()
            } else {
                31 - src.leading_zeros()
            };
            state.set_flag(Flags::ZF, false);
            write_op(state, bus, inst, 0, index)?;
        }
        _ => return Err(Exception::InvalidOpcode),
    }
    Ok(ExecOutcome::Continue)
}

/// BT/BTS/BTR/BTC. A register bit offset against a memory operand is a
/// signed index that can reach outside the addressed word.
fn exec_bit_test<B: CpuBus>(
    state: &mut CpuState,
    bus: &mut B,
    inst: &DecodedInst,
) -> Result<(), Exception> {
    let base = *operand(inst, 0)?;
    let size = base.size;
    let bits = size.bits();
    let offset_op = *operand(inst, 1)?;
    let raw_offset = read_op(state, bus, inst, 1)?;

    let mut loc = locate(state, inst, &base);
    let bit = match (loc, offset_op.kind) {
        (Location::Mem { seg, offset }, OperandKind::Register(_)) => {
            let signed = sign_extend(raw_offset, offset_op.size);
            let word = signed.div_euclid(bits as i32);
            let displacement = word.wrapping_mul(size.bytes() as i32) as u32;
            loc = Location::Mem {
                seg,
                offset: offset.wrapping_add(displacement) & inst.address_size.mask(),
            };
            signed.rem_euclid(bits as i32) as u32
        }
        _ => raw_offset % bits,
    };

    let value = load(state, bus, loc, size);
    let mask = 1u32 << bit;
    state.set_flag(Flags::CF, value & mask != 0);
    let updated = match inst.op {
        Op::Bts => value | mask,
        Op::Btr => value & !mask,
        Op::Btc => value ^ mask,
        _ => return Ok(()),
    };
    store(state, bus, loc, size, updated)
}

fn sign_extend(value: u32, size: OperandSize) -> i32 {
    match size {
        OperandSize::Bits8 => value as u8 as i8 as i32,
        OperandSize::Bits16 => value as u16 as i16 as i32,
        OperandSize::Bits32 => value as i32,
    }
}
