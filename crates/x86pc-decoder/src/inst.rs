//! Decoded-instruction descriptor shared between the decoder and the CPU core.
//!
//! A [`DecodedInst`] is transient: the machine builds one per fetched
//! instruction and the core consumes it in a single cycle.

/// Segment registers, in x86 encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SegReg {
    Es = 0,
    Cs = 1,
    Ss = 2,
    Ds = 3,
    Fs = 4,
    Gs = 5,
}

impl SegReg {
    pub const ALL: [SegReg; 6] = [
        SegReg::Es,
        SegReg::Cs,
        SegReg::Ss,
        SegReg::Ds,
        SegReg::Fs,
        SegReg::Gs,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn from_index(index: u8) -> Option<SegReg> {
        match index {
            0 => Some(SegReg::Es),
            1 => Some(SegReg::Cs),
            2 => Some(SegReg::Ss),
            3 => Some(SegReg::Ds),
            4 => Some(SegReg::Fs),
            5 => Some(SegReg::Gs),
            _ => None,
        }
    }
}

/// 32-bit general purpose registers, in x86 encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Gpr {
    Eax = 0,
    Ecx = 1,
    Edx = 2,
    Ebx = 3,
    Esp = 4,
    Ebp = 5,
    Esi = 6,
    Edi = 7,
}

impl Gpr {
    pub const ALL: [Gpr; 8] = [
        Gpr::Eax,
        Gpr::Ecx,
        Gpr::Edx,
        Gpr::Ebx,
        Gpr::Esp,
        Gpr::Ebp,
        Gpr::Esi,
        Gpr::Edi,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn from_index(index: u8) -> Gpr {
        Gpr::ALL[(index & 7) as usize]
    }
}

/// Width of a data operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandSize {
    Bits8,
    Bits16,
    Bits32,
}

impl OperandSize {
    #[inline]
    pub const fn bits(self) -> u32 {
        match self {
            OperandSize::Bits8 => 8,
            OperandSize::Bits16 => 16,
            OperandSize::Bits32 => 32,
        }
    }

    #[inline]
    pub const fn bytes(self) -> u32 {
        self.bits() / 8
    }

    #[inline]
    pub const fn mask(self) -> u32 {
        match self {
            OperandSize::Bits8 => 0xFF,
            OperandSize::Bits16 => 0xFFFF,
            OperandSize::Bits32 => 0xFFFF_FFFF,
        }
    }

    #[inline]
    pub const fn sign_bit(self) -> u32 {
        1 << (self.bits() - 1)
    }

    pub const fn from_bytes(bytes: u32) -> Option<OperandSize> {
        match bytes {
            1 => Some(OperandSize::Bits8),
            2 => Some(OperandSize::Bits16),
            4 => Some(OperandSize::Bits32),
            _ => None,
        }
    }
}

/// Width of an effective address computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSize {
    Bits16,
    Bits32,
}

impl AddressSize {
    #[inline]
    pub const fn mask(self) -> u32 {
        match self {
            AddressSize::Bits16 => 0xFFFF,
            AddressSize::Bits32 => 0xFFFF_FFFF,
        }
    }
}

/// Register file a register operand belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    General,
    Segment,
    Control,
    Debug,
}

/// A register operand.
///
/// For 8-bit general registers `index` keeps the hardware encoding, so 4-7
/// name AH/CH/DH/BH rather than SP/BP/SI/DI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg {
    pub class: RegClass,
    pub index: u8,
    pub size: OperandSize,
}

impl Reg {
    pub const fn gpr(index: u8, size: OperandSize) -> Reg {
        Reg {
            class: RegClass::General,
            index,
            size,
        }
    }

    pub const fn seg(seg: SegReg) -> Reg {
        Reg {
            class: RegClass::Segment,
            index: seg as u8,
            size: OperandSize::Bits16,
        }
    }

    pub const fn control(index: u8) -> Reg {
        Reg {
            class: RegClass::Control,
            index,
            size: OperandSize::Bits32,
        }
    }

    /// Backing 32-bit register and whether this names bits 8..16 of it.
    pub const fn gpr_slot(self) -> (Gpr, bool) {
        match self.size {
            OperandSize::Bits8 if self.index >= 4 => (Gpr::from_index(self.index - 4), true),
            _ => (Gpr::from_index(self.index), false),
        }
    }

    pub const fn segment(self) -> Option<SegReg> {
        match self.class {
            RegClass::Segment => SegReg::from_index(self.index),
            _ => None,
        }
    }
}

/// A memory operand: `segment:[base + index*scale + displacement]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemRef {
    /// Segment implied by the addressing form (SS for BP/SP based forms).
    pub default_segment: SegReg,
    pub segment_override: Option<SegReg>,
    pub base: Option<Gpr>,
    pub index: Option<Gpr>,
    pub scale: u8,
    pub displacement: u32,
}

impl MemRef {
    pub const fn absolute(displacement: u32) -> MemRef {
        MemRef {
            default_segment: SegReg::Ds,
            segment_override: None,
            base: None,
            index: None,
            scale: 1,
            displacement,
        }
    }

    pub const fn based(base: Gpr, displacement: u32) -> MemRef {
        let default_segment = match base {
            Gpr::Esp | Gpr::Ebp => SegReg::Ss,
            _ => SegReg::Ds,
        };
        MemRef {
            default_segment,
            segment_override: None,
            base: Some(base),
            index: None,
            scale: 1,
            displacement,
        }
    }

    /// Segment used for the access once overrides are applied.
    #[inline]
    pub fn segment(&self) -> SegReg {
        self.segment_override.unwrap_or(self.default_segment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    Register(Reg),
    Memory(MemRef),
    /// Literal value, already sign-extended to the operand width. Near branch
    /// operands carry the absolute target offset.
    Immediate(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand {
    pub kind: OperandKind,
    pub size: OperandSize,
}

impl Operand {
    pub const fn reg(reg: Reg) -> Operand {
        Operand {
            kind: OperandKind::Register(reg),
            size: reg.size,
        }
    }

    pub const fn mem(mem: MemRef, size: OperandSize) -> Operand {
        Operand {
            kind: OperandKind::Memory(mem),
            size,
        }
    }

    pub const fn imm(value: u32, size: OperandSize) -> Operand {
        Operand {
            kind: OperandKind::Immediate(value),
            size,
        }
    }
}

pub const MAX_OPERANDS: usize = 3;

/// Fixed-capacity operand list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operands {
    items: [Operand; MAX_OPERANDS],
    len: u8,
}

impl Default for Operands {
    fn default() -> Self {
        Self {
            items: [Operand::imm(0, OperandSize::Bits8); MAX_OPERANDS],
            len: 0,
        }
    }
}

impl Operands {
    pub fn from_slice(ops: &[Operand]) -> Self {
        let mut out = Self::default();
        for op in ops {
            out.push(*op);
        }
        out
    }

    /// Append an operand. Operands past the third are ignored.
    pub fn push(&mut self, op: Operand) {
        if let Some(slot) = self.items.get_mut(self.len as usize) {
            *slot = op;
            self.len += 1;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Operand> {
        self.as_slice().get(index)
    }

    #[inline]
    pub fn as_slice(&self) -> &[Operand] {
        &self.items[..self.len as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepPrefix {
    /// `F3`: REP, or REPE for CMPS/SCAS.
    Rep,
    /// `F2`: REPNE.
    Repne,
}

/// Legacy prefixes seen before the opcode. They only apply to this instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Prefixes {
    pub segment: Option<SegReg>,
    pub operand_size_override: bool,
    pub address_size_override: bool,
    pub rep: Option<RepPrefix>,
    pub lock: bool,
}

/// Jcc/SETcc condition, in encoding order of the low opcode nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    O,
    No,
    B,
    Ae,
    E,
    Ne,
    Be,
    A,
    S,
    Ns,
    P,
    Np,
    L,
    Ge,
    Le,
    G,
}

/// Dispatch category. The discriminant indexes the core's handler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InstCategory {
    ControlTransfer = 0,
    Arithmetic,
    Decimal,
    Logic,
    ShiftRotate,
    BitByte,
    DataTransfer,
    String,
    InOut,
    FlagControl,
    System,
}

impl InstCategory {
    pub const COUNT: usize = 11;
}

/// Operation performed by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    // arithmetic
    Add,
    Adc,
    Sub,
    Sbb,
    Cmp,
    Inc,
    Dec,
    Neg,
    Mul,
    Imul,
    Div,
    Idiv,
    /// CBW or CWDE, by operand size.
    Cbw,
    /// CWD or CDQ, by operand size.
    Cwd,
    // decimal
    Daa,
    Das,
    Aaa,
    Aas,
    Aam,
    Aad,
    // logic
    And,
    Or,
    Xor,
    Not,
    Test,
    // shift/rotate
    Shl,
    Shr,
    Sar,
    Rol,
    Ror,
    Rcl,
    Rcr,
    // bit/byte
    Setcc(Cond),
    Bt,
    Bts,
    Btr,
    Btc,
    Bsf,
    Bsr,
    // data transfer
    Mov,
    Movzx,
    Movsx,
    Xchg,
    Lea,
    Push,
    Pop,
    Pusha,
    Popa,
    Pushf,
    Popf,
    Lahf,
    Sahf,
    Lds,
    Les,
    Lfs,
    Lgs,
    Lss,
    Xlat,
    // control transfer
    Jmp,
    JmpFar,
    Jcc(Cond),
    Jcxz,
    Loop,
    Loope,
    Loopne,
    Call,
    CallFar,
    Ret,
    RetFar,
    Int,
    Int3,
    Into,
    Iret,
    Enter,
    Leave,
    // string
    Movs,
    Cmps,
    Stos,
    Lods,
    Scas,
    Ins,
    Outs,
    // port I/O
    In,
    Out,
    // flag control
    Clc,
    Stc,
    Cmc,
    Cld,
    Std,
    Cli,
    Sti,
    // system
    Hlt,
    Nop,
    Lgdt,
    Lidt,
    Sgdt,
    Sidt,
    Lmsw,
    Smsw,
}

impl Op {
    pub const fn category(self) -> InstCategory {
        use Op::*;
        match self {
            Add | Adc | Sub | Sbb | Cmp | Inc | Dec | Neg | Mul | Imul | Div | Idiv | Cbw | Cwd => {
                InstCategory::Arithmetic
            }
            Daa | Das | Aaa | Aas | Aam | Aad => InstCategory::Decimal,
            And | Or | Xor | Not | Test => InstCategory::Logic,
            Shl | Shr | Sar | Rol | Ror | Rcl | Rcr => InstCategory::ShiftRotate,
            Setcc(_) | Bt | Bts | Btr | Btc | Bsf | Bsr => InstCategory::BitByte,
            Mov | Movzx | Movsx | Xchg | Lea | Push | Pop | Pusha | Popa | Pushf | Popf | Lahf
            | Sahf | Lds | Les | Lfs | Lgs | Lss | Xlat => InstCategory::DataTransfer,
            Jmp | JmpFar | Jcc(_) | Jcxz | Loop | Loope | Loopne | Call | CallFar | Ret
            | RetFar | Int | Int3 | Into | Iret | Enter | Leave => InstCategory::ControlTransfer,
            Movs | Cmps | Stos | Lods | Scas | Ins | Outs => InstCategory::String,
            In | Out => InstCategory::InOut,
            Clc | Stc | Cmc | Cld | Std | Cli | Sti => InstCategory::FlagControl,
            Hlt | Nop | Lgdt | Lidt | Sgdt | Sidt | Lmsw | Smsw => InstCategory::System,
        }
    }
}

/// One decoded instruction, ready for a single execution cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecodedInst {
    pub op: Op,
    pub category: InstCategory,
    pub operands: Operands,
    pub prefixes: Prefixes,
    /// Effective operand size (16 or 32) after the 0x66 prefix is applied.
    pub operand_size: OperandSize,
    /// Effective address size after the 0x67 prefix is applied.
    pub address_size: AddressSize,
    /// Element width for operations without an explicit sized operand
    /// (string ops, `CBW`, `PUSHA`, ...).
    pub data_size: OperandSize,
    /// Encoded length in bytes, prefixes included.
    pub len: u8,
}

impl DecodedInst {
    /// Build a descriptor with 16-bit defaults and no prefixes.
    pub fn new(op: Op, operands: &[Operand], len: u8) -> Self {
        Self {
            op,
            category: op.category(),
            operands: Operands::from_slice(operands),
            prefixes: Prefixes::default(),
            operand_size: OperandSize::Bits16,
            address_size: AddressSize::Bits16,
            data_size: OperandSize::Bits16,
            len,
        }
    }

    #[inline]
    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }
}
