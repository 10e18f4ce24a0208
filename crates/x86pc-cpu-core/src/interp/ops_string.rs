//! MOVS, CMPS, STOS, LODS, SCAS, INS and OUTS with their REP forms.
//!
//! SI/DI/CX are used at the address size and wrap within it. A segment
//! override only redirects the source (DS:SI); ES:DI is fixed.

use x86pc_decoder::{AddressSize, DecodedInst, Gpr, Op, OperandSize, RepPrefix, SegReg};

use super::ExecOutcome;
use crate::alu;
use crate::exception::Exception;
use crate::flags::Flags;
use crate::mem::CpuBus;
use crate::state::CpuState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RepMode {
    None,
    Rep,
    Repe,
    Repne,
}

fn effective_rep_mode(op: Op, rep: Option<RepPrefix>) -> RepMode {
    let compares = matches!(op, Op::Cmps | Op::Scas);
    match rep {
        None => RepMode::None,
        Some(RepPrefix::Rep) if compares => RepMode::Repe,
        Some(RepPrefix::Repne) if compares => RepMode::Repne,
        Some(_) => RepMode::Rep,
    }
}

fn index_size(inst: &DecodedInst) -> OperandSize {
    match inst.address_size {
        AddressSize::Bits16 => OperandSize::Bits16,
        AddressSize::Bits32 => OperandSize::Bits32,
    }
}

fn src_segment(inst: &DecodedInst) -> SegReg {
    inst.prefixes.segment.unwrap_or(SegReg::Ds)
}

fn advance(state: &mut CpuState, gpr: Gpr, size: OperandSize, elem: OperandSize) {
    let delta = if state.flag(Flags::DF) {
        elem.bytes().wrapping_neg()
    } else {
        elem.bytes()
    };
    let value = state.read_gpr(gpr, size).wrapping_add(delta);
    state.write_gpr(gpr, size, value);
}

pub fn exec<B: CpuBus>(
    state: &mut CpuState,
    bus: &mut B,
    inst: &DecodedInst,
    _next_ip: u32,
) -> Result<ExecOutcome, Exception> {
    let rep_mode = effective_rep_mode(inst.op, inst.prefixes.rep);
    let size = index_size(inst);

    if rep_mode == RepMode::None {
        step(state, bus, inst, size)?;
        return Ok(ExecOutcome::Continue);
    }

    let mut count = state.read_gpr(Gpr::Ecx, size);
    while count != 0 {
        step(state, bus, inst, size)?;
        count -= 1;
        state.write_gpr(Gpr::Ecx, size, count);

        let zf = state.flag(Flags::ZF);
        match rep_mode {
            RepMode::Repe if !zf => break,
            RepMode::Repne if zf => break,
            _ => {}
        }
    }
    Ok(ExecOutcome::Continue)
}

/// One element of the string operation.
fn step<B: CpuBus>(
    state: &mut CpuState,
    bus: &mut B,
    inst: &DecodedInst,
    size: OperandSize,
) -> Result<(), Exception> {
    let elem = inst.data_size;
    let si = state.read_gpr(Gpr::Esi, size);
    let di = state.read_gpr(Gpr::Edi, size);
    let src_seg = src_segment(inst);

    match inst.op {
        Op::Movs => {
            let value = state.read_mem(bus, src_seg, si, elem);
            state.write_mem(bus, SegReg::Es, di, elem, value);
            advance(state, Gpr::Esi, size, elem);
            advance(state, Gpr::Edi, size, elem);
        }
        Op::Cmps => {
            let a = state.read_mem(bus, src_seg, si, elem);
            let b = state.read_mem(bus, SegReg::Es, di, elem);
            alu::sub(&mut state.flags, a, b, false, elem);
            advance(state, Gpr::Esi, size, elem);
            advance(state, Gpr::Edi, size, elem);
        }
        Op::Stos => {
            let value = state.read_gpr(Gpr::Eax, elem);
            state.write_mem(bus, SegReg::Es, di, elem, value);
            advance(state, Gpr::Edi, size, elem);
        }
        Op::Lods => {
            let value = state.read_mem(bus, src_seg, si, elem);
            state.write_gpr(Gpr::Eax, elem, value);
            advance(state, Gpr::Esi, size, elem);
        }
        Op::Scas => {
            let a = state.read_gpr(Gpr::Eax, elem);
            let b = state.read_mem(bus, SegReg::Es, di, elem);
            alu::sub(&mut state.flags, a, b, false, elem);
            advance(state, Gpr::Edi, size, elem);
        }
        Op::Ins => {
            let value = bus.io_read(state.dx(), elem.bytes() as u8);
            state.write_mem(bus, SegReg::Es, di, elem, value);
            advance(state, Gpr::Edi, size, elem);
        }
        Op::Outs => {
            let value = state.read_mem(bus, src_seg, si, elem);
            bus.io_write(state.dx(), elem.bytes() as u8, value);
            advance(state, Gpr::Esi, size, elem);
        }
        _ => return Err(Exception::InvalidOpcode),
    }
    Ok(())
}
