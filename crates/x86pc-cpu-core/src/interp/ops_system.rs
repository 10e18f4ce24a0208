use tracing::debug;
use x86pc_decoder::{DecodedInst, Op, OperandSize};

use super::operand::{memory_location, read_op, write_op};
use super::ExecOutcome;
use crate::exception::Exception;
use crate::flags::Flags;
use crate::mem::CpuBus;
use crate::state::{CpuState, TableRegister, CR0_PE};

/// CR0 bits visible to LMSW/SMSW (PE, MP, EM, TS).
const MSW_MASK: u32 = 0xF;

pub fn exec<B: CpuBus>(
    state: &mut CpuState,
    bus: &mut B,
    inst: &DecodedInst,
    _next_ip: u32,
) -> Result<ExecOutcome, Exception> {
    match inst.op {
        Op::Hlt => {
            if !state.flag(Flags::IF) {
                return Err(Exception::HaltWithInterruptsDisabled);
            }
            return Ok(ExecOutcome::Halt);
        }
        Op::Nop => {}
        Op::Lgdt | Op::Lidt => {
            let table = read_table_register(state, bus, inst)?;
            if inst.op == Op::Lgdt {
                debug!(base = table.base, limit = table.limit, "GDTR loaded");
                state.gdtr = table;
            } else {
                debug!(base = table.base, limit = table.limit, "IDTR loaded");
                state.idtr = table;
            }
        }
        Op::Sgdt | Op::Sidt => {
            let table = if inst.op == Op::Sgdt {
                state.gdtr
            } else {
                state.idtr
            };
            let (seg, offset) = memory_location(state, inst, 0)?;
            let base_offset = offset.wrapping_add(2) & inst.address_size.mask();
            state.write_mem(bus, seg, offset, OperandSize::Bits16, u32::from(table.limit));
            state.write_mem(bus, seg, base_offset, OperandSize::Bits32, table.base);
        }
        Op::Lmsw => {
            let msw = read_op(state, bus, inst, 0)? & MSW_MASK;
            // LMSW can set PE but never clear it.
            let keep_pe = state.cr[0] & CR0_PE;
            state.cr[0] = (state.cr[0] & !MSW_MASK) | msw | keep_pe;
        }
        Op::Smsw => {
            let msw = state.cr[0] & 0xFFFF;
            write_op(state, bus, inst, 0, msw)?;
        }
        _ => return Err(Exception::InvalidOpcode),
    }
    Ok(ExecOutcome::Continue)
}

/// Read the 6-byte `limit:base` operand of LGDT/LIDT. With a 16-bit operand
/// size only 24 bits of the base are used.
fn read_table_register<B: CpuBus>(
    state: &CpuState,
    bus: &mut B,
    inst: &DecodedInst,
) -> Result<TableRegister, Exception> {
    let (seg, offset) = memory_location(state, inst, 0)?;
    let limit = state.read_mem(bus, seg, offset, OperandSize::Bits16) as u16;
    let base_offset = offset.wrapping_add(2) & inst.address_size.mask();
    let base = state.read_mem(bus, seg, base_offset, OperandSize::Bits32);
    let base = match inst.operand_size {
        OperandSize::Bits16 => base & 0x00FF_FFFF,
        _ => base,
    };
    Ok(TableRegister { base, limit })
}
