use x86pc_decoder::{DecodedInst, Op};

use super::operand::{operand, read_op, write_op};
use super::ExecOutcome;
use crate::exception::Exception;
use crate::mem::CpuBus;
use crate::state::CpuState;

/// IN and OUT. The port is an 8-bit immediate or DX; the access width is
/// the width of the accumulator operand.
pub fn exec<B: CpuBus>(
    state: &mut CpuState,
    bus: &mut B,
    inst: &DecodedInst,
    _next_ip: u32,
) -> Result<ExecOutcome, Exception> {
    match inst.op {
        Op::In => {
            let width = operand(inst, 0)?.size.bytes() as u8;
            let port = read_op(state, bus, inst, 1)? as u16;
            let value = bus.io_read(port, width);
            write_op(state, bus, inst, 0, value)?;
        }
        Op::Out => {
            let width = operand(inst, 1)?.size.bytes() as u8;
            let port = read_op(state, bus, inst, 0)? as u16;
            let value = read_op(state, bus, inst, 1)?;
            bus.io_write(port, width, value);
        }
        _ => return Err(Exception::InvalidOpcode),
    }
    Ok(ExecOutcome::Continue)
}
