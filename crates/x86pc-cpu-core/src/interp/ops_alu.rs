use x86pc_decoder::{DecodedInst, Gpr, Op, OperandSize};

use super::operand::{load, locate, operand, read_op, store};
use super::ExecOutcome;
use crate::alu;
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
    match inst.op {
        Op::Add | Op::Adc | Op::Sub | Op::Sbb | Op::Cmp => {
            let dst = *operand(inst, 0)?;
            let size = dst.size;
            let loc = locate(state, inst, &dst);
            let a = load(state, bus, loc, size);
            let b = read_op(state, bus, inst, 1)?;
            let carry = state.flag(Flags::CF);
            let flags = &mut state.flags;
            let result = match inst.op {
                Op::Add => alu::add(flags, a, b, false, size),
                Op::Adc => alu::add(flags, a, b, carry, size),
                Op::Sub | Op::Cmp => alu::sub(flags, a, b, false, size),
                _ => alu::sub(flags, a, b, carry, size),
            };
            if inst.op != Op::Cmp {
                store(state, bus, loc, size, result)?;
            }
        }
        Op::Inc | Op::Dec | Op::Neg => {
            let dst = *operand(inst, 0)?;
            let loc = locate(state, inst, &dst);
            let value = load(state, bus, loc, dst.size);
            let result = match inst.op {
                Op::Inc => alu::inc(&mut state.flags, value, dst.size),
                Op::Dec => alu::dec(&mut state.flags, value, dst.size),
                _ => alu::neg(&mut state.flags, value, dst.size),
            };
            store(state, bus, loc, dst.size, result)?;
        }
        Op::Mul => {
            let size = operand(inst, 0)?.size;
            let src = read_op(state, bus, inst, 0)?;
            let acc = state.read_gpr(Gpr::Eax, size);
            let (low, high) = alu::mul(&mut state.flags, acc, src, size);
            write_wide_product(state, size, low, high);
        }
        Op::Imul => exec_imul(state, bus, inst)?,
        Op::Div | Op::Idiv => {
            let size = operand(inst, 0)?.size;
            let divisor = read_op(state, bus, inst, 0)?;
            let dividend = wide_dividend(state, size);
            let (quotient, remainder) = if inst.op == Op::Div {
                alu::div(dividend, divisor, size)?
            } else {
                alu::idiv(dividend, divisor, size)?
            };
            match size {
                OperandSize::Bits8 => {
                    state.set_al(quotient as u8);
                    state.set_ah(remainder as u8);
                }
                OperandSize::Bits16 => {
                    state.set_ax(quotient as u16);
                    state.set_dx(remainder as u16);
                }
                OperandSize::Bits32 => {
                    state.set_eax(quotient);
                    state.set_edx(remainder);
                }
            }
        }
        Op::Cbw => match inst.operand_size {
            OperandSize::Bits32 => state.set_eax(state.ax() as i16 as i32 as u32),
            _ => state.set_ax(state.al() as i8 as i16 as u16),
        },
        Op::Cwd => match inst.operand_size {
            OperandSize::Bits32 => state.set_edx(((state.eax() as i32) >> 31) as u32),
            _ => state.set_dx(((state.ax() as i16) >> 15) as u16),
        },
        _ => return Err(Exception::InvalidOpcode),
    }
    Ok(ExecOutcome::Continue)
}

/// AX, DX:AX or EDX:EAX as a single dividend.
fn wide_dividend(state: &CpuState, size: OperandSize) -> u64 {
    match size {
        OperandSize::Bits8 => u64::from(state.ax()),
        OperandSize::Bits16 => (u64::from(state.dx()) << 16) | u64::from(state.ax()),
        OperandSize::Bits32 => (u64::from(state.edx()) << 32) | u64::from(state.eax()),
    }
}

/// Store a one-operand MUL/IMUL product into AX, DX:AX or EDX:EAX.
fn write_wide_product(state: &mut CpuState, size: OperandSize, low: u32, high: u32) {
    match size {
        OperandSize::Bits8 => state.set_ax(((high << 8) | low) as u16),
        OperandSize::Bits16 => {
            state.set_ax(low as u16);
            state.set_dx(high as u16);
        }
        OperandSize::Bits32 => {
            state.set_eax(low);
            state.set_edx(high);
        }
    }
}

fn exec_imul<B: CpuBus>(
    state: &mut CpuState,
    bus: &mut B,
    inst: &DecodedInst,
) -> Result<(), Exception> {
    match inst.operands.len() {
        1 => {
            let size = operand(inst, 0)?.size;
            let src = read_op(state, bus, inst, 0)?;
            let acc = state.read_gpr(Gpr::Eax, size);
            let (low, high) = alu::imul(&mut state.flags, acc, src, size);
            write_wide_product(state, size, low, high);
        }
        2 | 3 => {
            let dst = *operand(inst, 0)?;
            let (a, b) = if inst.operands.len() == 2 {
                (read_op(state, bus, inst, 0)?, read_op(state, bus, inst, 1)?)
            } else {
                (read_op(state, bus, inst, 1)?, read_op(state, bus, inst, 2)?)
            };
            let (low, _) = alu::imul(&mut state.flags, a, b, dst.size);
            let loc = locate(state, inst, &dst);
            store(state, bus, loc, dst.size, low)?;
        }
        _ => return Err(Exception::InvalidOpcode),
    }
    Ok(())
}

pub fn exec_decimal<B: CpuBus>(
    state: &mut CpuState,
    bus: &mut B,
    inst: &DecodedInst,
    _next_ip: u32,
) -> Result<ExecOutcome, Exception> {
    match inst.op {
        Op::Daa => {
            let al = state.al();
            let al = alu::daa(&mut state.flags, al);
            state.set_al(al);
        }
        Op::Das => {
            let al = state.al();
            let al = alu::das(&mut state.flags, al);
            state.set_al(al);
        }
        Op::Aaa => {
            let ax = state.ax();
            let ax = alu::aaa(&mut state.flags, ax);
            state.set_ax(ax);
        }
        Op::Aas => {
            let ax = state.ax();
            let ax = alu::aas(&mut state.flags, ax);
            state.set_ax(ax);
        }
        Op::Aam => {
            let base = adjust_base(state, bus, inst)?;
            let al = state.al();
            let ax = alu::aam(&mut state.flags, al, base)?;
            state.set_ax(ax);
        }
        Op::Aad => {
            let base = adjust_base(state, bus, inst)?;
            let ax = state.ax();
            let ax = alu::aad(&mut state.flags, ax, base);
            state.set_ax(ax);
        }
        _ => return Err(Exception::InvalidOpcode),
    }
    Ok(ExecOutcome::Continue)
}

/// AAM/AAD number base: the immediate byte, 10 when omitted.
fn adjust_base<B: CpuBus>(
    state: &CpuState,
    bus: &mut B,
    inst: &DecodedInst,
) -> Result<u8, Exception> {
    if inst.operands.is_empty() {
        return Ok(10);
    }
    Ok(read_op(state, bus, inst, 0)? as u8)
}
