use x86pc_decoder::{DecodedInst, Op};

use super::ExecOutcome;
use crate::exception::Exception;
use crate::flags::Flags;
use crate::mem::CpuBus;
use crate::state::CpuState;

pub fn exec<B: CpuBus>(
    state: &mut CpuState,
    _bus: &mut B,
    inst: &DecodedInst,
    _next_ip: u32,
) -> Result<ExecOutcome, Exception> {
    match inst.op {
        Op::Clc => state.set_flag(Flags::CF, false),
        Op::Stc => state.set_flag(Flags::CF, true),
        Op::Cmc => state.flags.toggle(Flags::CF),
        Op::Cld => state.set_flag(Flags::DF, false),
        Op::Std => state.set_flag(Flags::DF, true),
        Op::Cli => state.set_flag(Flags::IF, false),
        Op::Sti => state.set_flag(Flags::IF, true),
        _ => return Err(Exception::InvalidOpcode),
    }
    Ok(ExecOutcome::Continue)
}
