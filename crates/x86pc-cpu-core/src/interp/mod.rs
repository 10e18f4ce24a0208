//! Instruction execution, dispatched by instruction category.
//!
//! Each category has one handler module; [`exec_decoded`] indexes a table of
//! handlers with the descriptor's [`InstCategory`]. Handlers validate before
//! they write, so a fault leaves architectural state untouched.

mod operand;
mod ops_alu;
mod ops_cf;
mod ops_data;
mod ops_flags;
mod ops_io;
mod ops_logic;
mod ops_string;
mod ops_system;

use x86pc_decoder::{Cond, DecodedInst, InstCategory};

use crate::exception::Exception;
use crate::flags::Flags;
use crate::mem::CpuBus;
use crate::state::CpuState;

pub use operand::{effective_offset, Location};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Fall through to the next instruction.
    Continue,
    /// EIP (and possibly CS) was already redirected.
    Branch,
    /// HLT accepted; the caller advances EIP and parks the core.
    Halt,
}

/// Category handler: `(state, bus, instruction, next_ip)`.
pub type Handler<B> =
    fn(&mut CpuState, &mut B, &DecodedInst, u32) -> Result<ExecOutcome, Exception>;

fn handlers<B: CpuBus>() -> [Handler<B>; InstCategory::COUNT] {
    // Order follows the `InstCategory` discriminants.
    [
        ops_cf::exec::<B>,
        ops_alu::exec::<B>,
        ops_alu::exec_decimal::<B>,
        ops_logic::exec::<B>,
        ops_logic::exec_shift::<B>,
        ops_logic::exec_bit::<B>,
        ops_data::exec::<B>,
        ops_string::exec::<B>,
        ops_io::exec::<B>,
        ops_flags::exec::<B>,
        ops_system::exec::<B>,
    ]
}

/// Execute one decoded instruction. `next_ip` is the offset of the following
/// instruction, already wrapped to the code segment size.
pub fn exec_decoded<B: CpuBus>(
    state: &mut CpuState,
    bus: &mut B,
    inst: &DecodedInst,
    next_ip: u32,
) -> Result<ExecOutcome, Exception> {
    let handler = handlers::<B>()[inst.category as usize];
    handler(state, bus, inst, next_ip)
}

pub fn cond_holds(flags: Flags, cond: Cond) -> bool {
    let cf = flags.contains(Flags::CF);
    let zf = flags.contains(Flags::ZF);
    let sf = flags.contains(Flags::SF);
    let of = flags.contains(Flags::OF);
    let pf = flags.contains(Flags::PF);
    match cond {
        Cond::O => of,
        Cond::No => !of,
        Cond::B => cf,
        Cond::Ae => !cf,
        Cond::E => zf,
        Cond::Ne => !zf,
        Cond::Be => cf || zf,
        Cond::A => !cf && !zf,
        Cond::S => sf,
        Cond::Ns => !sf,
        Cond::P => pf,
        Cond::Np => !pf,
        Cond::L => sf != of,
        Cond::Ge => sf == of,
        Cond::Le => zf || sf != of,
        Cond::G => !zf && sf == of,
    }
}
