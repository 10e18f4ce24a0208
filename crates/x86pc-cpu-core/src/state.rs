use tracing::debug;
use x86pc_decoder::{Gpr, OperandSize, Reg, RegClass, SegReg};

use crate::flags::Flags;
use crate::segmentation::SegmentRegister;

/// CR0 protection enable.
pub const CR0_PE: u32 = 1 << 0;

/// Slot of EIP in the register array, after the eight GPRs.
const EIP: usize = 8;

/// GDTR/IDTR contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableRegister {
    pub base: u32,
    pub limit: u16,
}

impl TableRegister {
    /// IDTR after reset: a 256-entry real-mode IVT at physical 0.
    pub const REAL_MODE_IVT: TableRegister = TableRegister {
        base: 0,
        limit: 0x3FF,
    };
}

/// Architectural register state of one processor.
///
/// General registers are stored once as 32-bit values; the 16-bit and 8-bit
/// names are shift/mask views over the same slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuState {
    regs: [u32; 9],
    segments: [SegmentRegister; 6],
    pub flags: Flags,
    pub cr: [u32; 5],
    pub dr: [u32; 8],
    pub gdtr: TableRegister,
    pub idtr: TableRegister,
    pub halted: bool,
    /// Interrupt nesting depth: incremented on delivery, decremented by IRET.
    pub interrupt_level: u32,
    protected: bool,
}

macro_rules! gpr_views {
    ($gpr:ident, $r32:ident, $set32:ident, $r16:ident, $set16:ident) => {
        #[inline]
        pub fn $r32(&self) -> u32 {
            self.regs[Gpr::$gpr.index()]
        }

        #[inline]
        pub fn $set32(&mut self, value: u32) {
            self.regs[Gpr::$gpr.index()] = value;
        }

        #[inline]
        pub fn $r16(&self) -> u16 {
            self.regs[Gpr::$gpr.index()] as u16
        }

        #[inline]
        pub fn $set16(&mut self, value: u16) {
            self.write_gpr(Gpr::$gpr, OperandSize::Bits16, u32::from(value));
        }
    };
    ($gpr:ident, $r32:ident, $set32:ident, $r16:ident, $set16:ident,
     $lo:ident, $set_lo:ident, $hi:ident, $set_hi:ident) => {
        gpr_views!($gpr, $r32, $set32, $r16, $set16);

        #[inline]
        pub fn $lo(&self) -> u8 {
            self.regs[Gpr::$gpr.index()] as u8
        }

        #[inline]
        pub fn $set_lo(&mut self, value: u8) {
            self.write_gpr(Gpr::$gpr, OperandSize::Bits8, u32::from(value));
        }

        #[inline]
        pub fn $hi(&self) -> u8 {
            (self.regs[Gpr::$gpr.index()] >> 8) as u8
        }

        #[inline]
        pub fn $set_hi(&mut self, value: u8) {
            let slot = &mut self.regs[Gpr::$gpr.index()];
            *slot = (*slot & !0xFF00) | (u32::from(value) << 8);
        }
    };
}

impl Default for CpuState {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuState {
    /// A processor in its reset state: real mode, CS:EIP = 0000:0000,
    /// FLAGS = ZF|IF, everything else zero.
    pub fn new() -> Self {
        Self {
            regs: [0; 9],
            segments: [SegmentRegister::real_mode(0); 6],
            flags: Flags::RESET,
            cr: [0; 5],
            dr: [0; 8],
            gdtr: TableRegister::default(),
            idtr: TableRegister::REAL_MODE_IVT,
            halted: false,
            interrupt_level: 0,
            protected: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    gpr_views!(Eax, eax, set_eax, ax, set_ax, al, set_al, ah, set_ah);
    gpr_views!(Ecx, ecx, set_ecx, cx, set_cx, cl, set_cl, ch, set_ch);
    gpr_views!(Edx, edx, set_edx, dx, set_dx, dl, set_dl, dh, set_dh);
    gpr_views!(Ebx, ebx, set_ebx, bx, set_bx, bl, set_bl, bh, set_bh);
    gpr_views!(Esp, esp, set_esp, sp, set_sp);
    gpr_views!(Ebp, ebp, set_ebp, bp, set_bp);
    gpr_views!(Esi, esi, set_esi, si, set_si);
    gpr_views!(Edi, edi, set_edi, di, set_di);

    #[inline]
    pub fn eip(&self) -> u32 {
        self.regs[EIP]
    }

    #[inline]
    pub fn set_eip(&mut self, value: u32) {
        self.regs[EIP] = value;
    }

    #[inline]
    pub fn ip(&self) -> u16 {
        self.regs[EIP] as u16
    }

    #[inline]
    pub fn set_ip(&mut self, value: u16) {
        self.regs[EIP] = (self.regs[EIP] & !0xFFFF) | u32::from(value);
    }

    /// Low `size` bits of a general register (never a high-byte view).
    #[inline]
    pub fn read_gpr(&self, gpr: Gpr, size: OperandSize) -> u32 {
        self.regs[gpr.index()] & size.mask()
    }

    /// Replace the low `size` bits of a general register, keeping the rest.
    #[inline]
    pub fn write_gpr(&mut self, gpr: Gpr, size: OperandSize, value: u32) {
        let mask = size.mask();
        let slot = &mut self.regs[gpr.index()];
        *slot = (*slot & !mask) | (value & mask);
    }

    #[inline]
    pub fn read_gpr32(&self, gpr: Gpr) -> u32 {
        self.regs[gpr.index()]
    }

    /// Read any register operand. Segment registers yield their selector.
    pub fn read_reg(&self, reg: Reg) -> u32 {
        match reg.class {
            RegClass::General => {
                let (gpr, high) = reg.gpr_slot();
                if high {
                    (self.regs[gpr.index()] >> 8) & 0xFF
                } else {
                    self.read_gpr(gpr, reg.size)
                }
            }
            RegClass::Segment => reg
                .segment()
                .map_or(0, |seg| u32::from(self.segments[seg.index()].selector)),
            RegClass::Control => self.cr.get(reg.index as usize).copied().unwrap_or(0),
            RegClass::Debug => self.dr.get(reg.index as usize).copied().unwrap_or(0),
        }
    }

    /// Write a general, control or debug register. Returns `false` for
    /// registers that cannot be written this way (segment registers need a
    /// descriptor load, CR1 does not exist).
    pub fn write_reg(&mut self, reg: Reg, value: u32) -> bool {
        match reg.class {
            RegClass::General => {
                let (gpr, high) = reg.gpr_slot();
                if high {
                    let slot = &mut self.regs[gpr.index()];
                    *slot = (*slot & !0xFF00) | ((value & 0xFF) << 8);
                } else {
                    self.write_gpr(gpr, reg.size, value);
                }
                true
            }
            RegClass::Control if matches!(reg.index, 0 | 2 | 3 | 4) => {
                self.cr[reg.index as usize] = value;
                true
            }
            RegClass::Debug => match self.dr.get_mut(reg.index as usize) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    #[inline]
    pub fn flag(&self, flag: Flags) -> bool {
        self.flags.contains(flag)
    }

    #[inline]
    pub fn set_flag(&mut self, flag: Flags, value: bool) {
        self.flags.set(flag, value);
    }

    #[inline]
    pub fn segment(&self, seg: SegReg) -> &SegmentRegister {
        &self.segments[seg.index()]
    }

    #[inline]
    pub fn selector(&self, seg: SegReg) -> u16 {
        self.segments[seg.index()].selector
    }

    /// Install a selector together with an already resolved descriptor.
    #[inline]
    pub fn set_segment(&mut self, seg: SegReg, reg: SegmentRegister) {
        self.segments[seg.index()] = reg;
    }

    /// Mode the engine currently operates in, as last sampled from CR0.PE.
    #[inline]
    pub fn protected_mode(&self) -> bool {
        self.protected
    }

    /// Sample CR0.PE. Control transfers call this before choosing real or
    /// protected mode semantics.
    pub fn sync_mode(&mut self) {
        let pe = self.cr[0] & CR0_PE != 0;
        if pe != self.protected {
            debug!(
                protected = pe,
                cs = self.selector(SegReg::Cs),
                eip = self.eip(),
                "processor mode changed"
            );
            self.protected = pe;
        }
    }

    /// Mask applied to EIP: 16 bits unless CS is a 32-bit segment.
    #[inline]
    pub fn ip_mask(&self) -> u32 {
        if self.segment(SegReg::Cs).descriptor.is_32bit {
            u32::MAX
        } else {
            0xFFFF
        }
    }

    /// Whether the stack is addressed through ESP rather than SP.
    #[inline]
    pub fn stack_is_32bit(&self) -> bool {
        self.segment(SegReg::Ss).descriptor.is_32bit
    }
}
