use iced_x86::{Decoder, DecoderError, DecoderOptions, Instruction, MemorySize, Mnemonic, OpKind, Register};
use thiserror::Error;

use crate::inst::{
    AddressSize, Cond, DecodedInst, Gpr, MemRef, Op, Operand, OperandSize, Operands, Prefixes,
    Reg, RegClass, RepPrefix, SegReg,
};

/// Maximum x86 instruction length (architectural limit).
pub const MAX_INST_LEN: usize = 15;

/// Default code size, taken from the D bit of the current code segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeMode {
    Bits16,
    Bits32,
}

impl DecodeMode {
    #[inline]
    pub const fn bitness(self) -> u32 {
        match self {
            DecodeMode::Bits16 => 16,
            DecodeMode::Bits32 => 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of instruction bytes")]
    UnexpectedEof,
    #[error("instruction exceeds 15-byte length limit")]
    TooLong,
    #[error("invalid instruction encoding")]
    Invalid,
    #[error("instruction {0:?} is outside the emulated integer instruction set")]
    Unsupported(Mnemonic),
}

/// Decode a single instruction from the start of `bytes`.
///
/// `ip` is the offset of the first byte within the code segment. Relative
/// branch operands come back as absolute target offsets.
pub fn decode(bytes: &[u8], mode: DecodeMode, ip: u32) -> Result<DecodedInst, DecodeError> {
    let (prefixes, prefix_len) = scan_prefixes(bytes)?;

    let window = &bytes[..bytes.len().min(MAX_INST_LEN)];
    let mut decoder = Decoder::with_ip(mode.bitness(), window, u64::from(ip), DecoderOptions::NONE);
    let instr = decoder.decode();
    if instr.is_invalid() {
        return Err(match decoder.last_error() {
            DecoderError::NoMoreBytes => DecodeError::UnexpectedEof,
            _ => DecodeError::Invalid,
        });
    }
    if instr.len() > MAX_INST_LEN {
        return Err(DecodeError::TooLong);
    }
    debug_assert!(prefix_len < instr.len());

    let operand_size = effective_operand_size(mode, prefixes);
    let address_size = effective_address_size(mode, prefixes);

    let op = classify(&instr)?;
    let mut operands = Operands::default();
    let mut data_size = operand_size;
    match op {
        Op::Movs | Op::Cmps | Op::Stos | Op::Lods | Op::Scas | Op::Ins | Op::Outs => {
            data_size = string_width(instr.mnemonic());
        }
        // Implicit `[BX + AL]`; the core forms the address itself.
        Op::Xlat => data_size = OperandSize::Bits8,
        _ => {
            for i in 0..instr.op_count() {
                convert_operand(&instr, i, prefixes, operand_size, &mut operands)?;
            }
            if let Some(first) = operands.get(0) {
                data_size = first.size;
            }
        }
    }

    Ok(DecodedInst {
        op,
        category: op.category(),
        operands,
        prefixes,
        operand_size,
        address_size,
        data_size,
        len: instr.len() as u8,
    })
}

fn scan_prefixes(bytes: &[u8]) -> Result<(Prefixes, usize), DecodeError> {
    let mut idx = 0usize;
    let mut prefixes = Prefixes::default();

    while idx < bytes.len() && idx < MAX_INST_LEN {
        let seg = match bytes[idx] {
            0x26 => Some(SegReg::Es),
            0x2E => Some(SegReg::Cs),
            0x36 => Some(SegReg::Ss),
            0x3E => Some(SegReg::Ds),
            0x64 => Some(SegReg::Fs),
            0x65 => Some(SegReg::Gs),
            _ => None,
        };
        if seg.is_some() {
            // Last segment override wins.
            prefixes.segment = seg;
            idx += 1;
            continue;
        }

        match bytes[idx] {
            0xF0 => prefixes.lock = true,
            0xF2 => prefixes.rep = Some(RepPrefix::Repne),
            0xF3 => prefixes.rep = Some(RepPrefix::Rep),
            0x66 => prefixes.operand_size_override = true,
            0x67 => prefixes.address_size_override = true,
            _ => break,
        }
        idx += 1;
    }

    if idx >= MAX_INST_LEN {
        return Err(DecodeError::TooLong);
    }
    if idx >= bytes.len() {
        return Err(DecodeError::UnexpectedEof);
    }

    Ok((prefixes, idx))
}

fn effective_operand_size(mode: DecodeMode, prefixes: Prefixes) -> OperandSize {
    match (mode, prefixes.operand_size_override) {
        (DecodeMode::Bits16, false) | (DecodeMode::Bits32, true) => OperandSize::Bits16,
        (DecodeMode::Bits16, true) | (DecodeMode::Bits32, false) => OperandSize::Bits32,
    }
}

fn effective_address_size(mode: DecodeMode, prefixes: Prefixes) -> AddressSize {
    match (mode, prefixes.address_size_override) {
        (DecodeMode::Bits16, false) | (DecodeMode::Bits32, true) => AddressSize::Bits16,
        (DecodeMode::Bits16, true) | (DecodeMode::Bits32, false) => AddressSize::Bits32,
    }
}

fn is_far_pointer(instr: &Instruction) -> bool {
    matches!(
        instr.op0_kind(),
        OpKind::FarBranch16 | OpKind::FarBranch32
    ) || (instr.op0_kind() == OpKind::Memory
        && matches!(instr.memory_size(), MemorySize::SegPtr16 | MemorySize::SegPtr32))
}

fn is_string_form(instr: &Instruction) -> bool {
    (0..instr.op_count()).any(|i| {
        matches!(
            instr.op_kind(i),
            OpKind::MemorySegSI
                | OpKind::MemorySegESI
                | OpKind::MemoryESDI
                | OpKind::MemoryESEDI
        )
    })
}

fn string_width(mnemonic: Mnemonic) -> OperandSize {
    use Mnemonic as M;
    match mnemonic {
        M::Movsb | M::Cmpsb | M::Stosb | M::Lodsb | M::Scasb | M::Insb | M::Outsb => {
            OperandSize::Bits8
        }
        M::Movsw | M::Cmpsw | M::Stosw | M::Lodsw | M::Scasw | M::Insw | M::Outsw => {
            OperandSize::Bits16
        }
        _ => OperandSize::Bits32,
    }
}

fn classify(instr: &Instruction) -> Result<Op, DecodeError> {
    use Mnemonic as M;
    let mnemonic = instr.mnemonic();
    let op = match mnemonic {
        M::Add => Op::Add,
        M::Adc => Op::Adc,
        M::Sub => Op::Sub,
        M::Sbb => Op::Sbb,
        M::Cmp => Op::Cmp,
        M::Inc => Op::Inc,
        M::Dec => Op::Dec,
        M::Neg => Op::Neg,
        M::Mul => Op::Mul,
        M::Imul => Op::Imul,
        M::Div => Op::Div,
        M::Idiv => Op::Idiv,
        M::Cbw | M::Cwde => Op::Cbw,
        M::Cwd | M::Cdq => Op::Cwd,

        M::Daa => Op::Daa,
        M::Das => Op::Das,
        M::Aaa => Op::Aaa,
        M::Aas => Op::Aas,
        M::Aam => Op::Aam,
        M::Aad => Op::Aad,

        M::And => Op::And,
        M::Or => Op::Or,
        M::Xor => Op::Xor,
        M::Not => Op::Not,
        M::Test => Op::Test,

        M::Shl | M::Sal => Op::Shl,
        M::Shr => Op::Shr,
        M::Sar => Op::Sar,
        M::Rol => Op::Rol,
        M::Ror => Op::Ror,
        M::Rcl => Op::Rcl,
        M::Rcr => Op::Rcr,

        M::Seto => Op::Setcc(Cond::O),
        M::Setno => Op::Setcc(Cond::No),
        M::Setb => Op::Setcc(Cond::B),
        M::Setae => Op::Setcc(Cond::Ae),
        M::Sete => Op::Setcc(Cond::E),
        M::Setne => Op::Setcc(Cond::Ne),
        M::Setbe => Op::Setcc(Cond::Be),
        M::Seta => Op::Setcc(Cond::A),
        M::Sets => Op::Setcc(Cond::S),
        M::Setns => Op::Setcc(Cond::Ns),
        M::Setp => Op::Setcc(Cond::P),
        M::Setnp => Op::Setcc(Cond::Np),
        M::Setl => Op::Setcc(Cond::L),
        M::Setge => Op::Setcc(Cond::Ge),
        M::Setle => Op::Setcc(Cond::Le),
        M::Setg => Op::Setcc(Cond::G),
        M::Bt => Op::Bt,
        M::Bts => Op::Bts,
        M::Btr => Op::Btr,
        M::Btc => Op::Btc,
        M::Bsf => Op::Bsf,
        M::Bsr => Op::Bsr,

        M::Mov => Op::Mov,
        M::Movzx => Op::Movzx,
        M::Movsx => Op::Movsx,
        M::Xchg => Op::Xchg,
        M::Lea => Op::Lea,
        M::Push => Op::Push,
        M::Pop => Op::Pop,
        M::Pusha | M::Pushad => Op::Pusha,
        M::Popa | M::Popad => Op::Popa,
        M::Pushf | M::Pushfd => Op::Pushf,
        M::Popf | M::Popfd => Op::Popf,
        M::Lahf => Op::Lahf,
        M::Sahf => Op::Sahf,
        M::Lds => Op::Lds,
        M::Les => Op::Les,
        M::Lfs => Op::Lfs,
        M::Lgs => Op::Lgs,
        M::Lss => Op::Lss,
        M::Xlatb => Op::Xlat,

        M::Jmp if is_far_pointer(instr) => Op::JmpFar,
        M::Jmp => Op::Jmp,
        M::Call if is_far_pointer(instr) => Op::CallFar,
        M::Call => Op::Call,
        M::Jo => Op::Jcc(Cond::O),
        M::Jno => Op::Jcc(Cond::No),
        M::Jb => Op::Jcc(Cond::B),
        M::Jae => Op::Jcc(Cond::Ae),
        M::Je => Op::Jcc(Cond::E),
        M::Jne => Op::Jcc(Cond::Ne),
        M::Jbe => Op::Jcc(Cond::Be),
        M::Ja => Op::Jcc(Cond::A),
        M::Js => Op::Jcc(Cond::S),
        M::Jns => Op::Jcc(Cond::Ns),
        M::Jp => Op::Jcc(Cond::P),
        M::Jnp => Op::Jcc(Cond::Np),
        M::Jl => Op::Jcc(Cond::L),
        M::Jge => Op::Jcc(Cond::Ge),
        M::Jle => Op::Jcc(Cond::Le),
        M::Jg => Op::Jcc(Cond::G),
        M::Jcxz | M::Jecxz => Op::Jcxz,
        M::Loop => Op::Loop,
        M::Loope => Op::Loope,
        M::Loopne => Op::Loopne,
        M::Ret => Op::Ret,
        M::Retf => Op::RetFar,
        M::Int => Op::Int,
        M::Int3 => Op::Int3,
        M::Into => Op::Into,
        M::Iret | M::Iretd => Op::Iret,
        M::Enter => Op::Enter,
        M::Leave => Op::Leave,

        // MOVSD/CMPSD share mnemonics with the SSE2 scalar forms.
        M::Movsb | M::Movsw | M::Movsd if is_string_form(instr) => Op::Movs,
        M::Cmpsb | M::Cmpsw | M::Cmpsd if is_string_form(instr) => Op::Cmps,
        M::Stosb | M::Stosw | M::Stosd => Op::Stos,
        M::Lodsb | M::Lodsw | M::Lodsd => Op::Lods,
        M::Scasb | M::Scasw | M::Scasd => Op::Scas,
        M::Insb | M::Insw | M::Insd => Op::Ins,
        M::Outsb | M::Outsw | M::Outsd => Op::Outs,

        M::In => Op::In,
        M::Out => Op::Out,

        M::Clc => Op::Clc,
        M::Stc => Op::Stc,
        M::Cmc => Op::Cmc,
        M::Cld => Op::Cld,
        M::Std => Op::Std,
        M::Cli => Op::Cli,
        M::Sti => Op::Sti,

        M::Hlt => Op::Hlt,
        M::Nop | M::Wait | M::Pause => Op::Nop,
        M::Lgdt => Op::Lgdt,
        M::Lidt => Op::Lidt,
        M::Sgdt => Op::Sgdt,
        M::Sidt => Op::Sidt,
        M::Lmsw => Op::Lmsw,
        M::Smsw => Op::Smsw,

        other => return Err(DecodeError::Unsupported(other)),
    };
    Ok(op)
}

fn convert_operand(
    instr: &Instruction,
    i: u32,
    prefixes: Prefixes,
    operand_size: OperandSize,
    out: &mut Operands,
) -> Result<(), DecodeError> {
    let unsupported = DecodeError::Unsupported(instr.mnemonic());
    let operand = match instr.op_kind(i) {
        OpKind::Register => Operand::reg(map_register(instr.op_register(i)).ok_or(unsupported)?),
        OpKind::NearBranch16 => Operand::imm(u32::from(instr.near_branch16()), OperandSize::Bits16),
        OpKind::NearBranch32 => Operand::imm(instr.near_branch32(), OperandSize::Bits32),
        OpKind::FarBranch16 => {
            out.push(Operand::imm(u32::from(instr.far_branch16()), OperandSize::Bits16));
            Operand::imm(u32::from(instr.far_branch_selector()), OperandSize::Bits16)
        }
        OpKind::FarBranch32 => {
            out.push(Operand::imm(instr.far_branch32(), OperandSize::Bits32));
            Operand::imm(u32::from(instr.far_branch_selector()), OperandSize::Bits16)
        }
        OpKind::Immediate8 => Operand::imm(u32::from(instr.immediate8()), OperandSize::Bits8),
        OpKind::Immediate8_2nd => {
            Operand::imm(u32::from(instr.immediate8_2nd()), OperandSize::Bits8)
        }
        OpKind::Immediate16 => Operand::imm(u32::from(instr.immediate16()), OperandSize::Bits16),
        OpKind::Immediate32 => Operand::imm(instr.immediate32(), OperandSize::Bits32),
        OpKind::Immediate8to16 => {
            Operand::imm(u32::from(instr.immediate8to16() as u16), OperandSize::Bits16)
        }
        OpKind::Immediate8to32 => Operand::imm(instr.immediate8to32() as u32, OperandSize::Bits32),
        OpKind::Memory => {
            let mem = memory_operand(instr, prefixes).ok_or(unsupported)?;
            let size = OperandSize::from_bytes(instr.memory_size().size() as u32)
                .unwrap_or(operand_size);
            Operand::mem(mem, size)
        }
        _ => return Err(unsupported),
    };
    out.push(operand);
    Ok(())
}

fn memory_operand(instr: &Instruction, prefixes: Prefixes) -> Option<MemRef> {
    let base = match instr.memory_base() {
        Register::None => None,
        reg => Some(map_gpr(reg)?),
    };
    let index = match instr.memory_index() {
        Register::None => None,
        reg => Some(map_gpr(reg)?),
    };
    let mut mem = match base {
        Some(base) => MemRef::based(base, instr.memory_displacement32()),
        None => MemRef::absolute(instr.memory_displacement32()),
    };
    mem.index = index;
    mem.scale = instr.memory_index_scale() as u8;
    mem.segment_override = prefixes.segment;
    Some(mem)
}

fn map_gpr(reg: Register) -> Option<Gpr> {
    let r = map_register(reg)?;
    match (r.class, r.size) {
        (RegClass::General, OperandSize::Bits16 | OperandSize::Bits32) => Some(r.gpr_slot().0),
        _ => None,
    }
}

fn map_register(reg: Register) -> Option<Reg> {
    use OperandSize::{Bits16, Bits32, Bits8};
    use Register as R;
    let mapped = match reg {
        R::AL => Reg::gpr(0, Bits8),
        R::CL => Reg::gpr(1, Bits8),
        R::DL => Reg::gpr(2, Bits8),
        R::BL => Reg::gpr(3, Bits8),
        R::AH => Reg::gpr(4, Bits8),
        R::CH => Reg::gpr(5, Bits8),
        R::DH => Reg::gpr(6, Bits8),
        R::BH => Reg::gpr(7, Bits8),
        R::AX => Reg::gpr(0, Bits16),
        R::CX => Reg::gpr(1, Bits16),
        R::DX => Reg::gpr(2, Bits16),
        R::BX => Reg::gpr(3, Bits16),
        R::SP => Reg::gpr(4, Bits16),
        R::BP => Reg::gpr(5, Bits16),
        R::SI => Reg::gpr(6, Bits16),
        R::DI => Reg::gpr(7, Bits16),
        R::EAX => Reg::gpr(0, Bits32),
        R::ECX => Reg::gpr(1, Bits32),
        R::EDX => Reg::gpr(2, Bits32),
        R::EBX => Reg::gpr(3, Bits32),
        R::ESP => Reg::gpr(4, Bits32),
        R::EBP => Reg::gpr(5, Bits32),
        R::ESI => Reg::gpr(6, Bits32),
        R::EDI => Reg::gpr(7, Bits32),
        R::ES => Reg::seg(SegReg::Es),
        R::CS => Reg::seg(SegReg::Cs),
        R::SS => Reg::seg(SegReg::Ss),
        R::DS => Reg::seg(SegReg::Ds),
        R::FS => Reg::seg(SegReg::Fs),
        R::GS => Reg::seg(SegReg::Gs),
        R::CR0 => Reg::control(0),
        R::CR2 => Reg::control(2),
        R::CR3 => Reg::control(3),
        R::CR4 => Reg::control(4),
        R::DR0 | R::DR1 | R::DR2 | R::DR3 | R::DR6 | R::DR7 => Reg {
            class: RegClass::Debug,
            index: (reg as u32 - R::DR0 as u32) as u8,
            size: Bits32,
        },
        _ => return None,
    };
    Some(mapped)
}
