//! Segment descriptors and (segment, offset) to linear address resolution.

use tracing::debug;
use x86pc_decoder::{OperandSize, SegReg};

use crate::exception::Exception;
use crate::mem::CpuBus;
use crate::state::CpuState;

const ACCESS_ACCESSED: u8 = 1 << 0;
const ACCESS_RW: u8 = 1 << 1;
const ACCESS_CODE: u8 = 1 << 3;
const ACCESS_USER: u8 = 1 << 4;
const ACCESS_PRESENT: u8 = 1 << 7;
const FLAG_DB: u8 = 1 << 2;
const FLAG_GRANULARITY: u8 = 1 << 3;

/// Selector bits that address the descriptor table (index and TI).
const SELECTOR_TABLE_MASK: u16 = !0x7;
const SELECTOR_TI: u16 = 1 << 2;

/// Cached segment descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub base: u32,
    /// Byte granular limit (already scaled when G=1).
    pub limit: u32,
    pub is_code: bool,
    /// Writable for data segments, readable for code segments.
    pub is_writable: bool,
    pub is_32bit: bool,
    pub accessed: bool,
    pub present: bool,
    /// Code/data descriptor, as opposed to a system descriptor (TSS, LDT, gate).
    pub is_user: bool,
    pub dpl: u8,
}

impl Descriptor {
    /// Flat 64 KiB window synthesized for real-mode selector loads.
    pub const fn real_mode(selector: u16) -> Self {
        Self {
            base: (selector as u32) << 4,
            limit: 0xFFFF,
            is_code: false,
            is_writable: true,
            is_32bit: false,
            accessed: true,
            present: true,
            is_user: true,
            dpl: 0,
        }
    }

    /// What a null selector loads in protected mode; any use of it is a bug
    /// in the guest.
    pub const NULL: Descriptor = Descriptor {
        base: 0,
        limit: 0,
        is_code: false,
        is_writable: false,
        is_32bit: false,
        accessed: false,
        present: false,
        is_user: false,
        dpl: 0,
    };

    /// Decode an 8-byte GDT entry.
    pub fn from_raw(raw: u64) -> Self {
        let limit_low = (raw & 0xFFFF) as u32;
        let base_low = ((raw >> 16) & 0xFF_FFFF) as u32;
        let access = ((raw >> 40) & 0xFF) as u8;
        let limit_high = ((raw >> 48) & 0xF) as u32;
        let flags = ((raw >> 52) & 0xF) as u8;
        let base_high = ((raw >> 56) & 0xFF) as u32;

        let mut limit = limit_low | (limit_high << 16);
        if flags & FLAG_GRANULARITY != 0 {
            limit = (limit << 12) | 0xFFF;
        }

        let is_user = access & ACCESS_USER != 0;
        let is_code = is_user && access & ACCESS_CODE != 0;
        Self {
            base: base_low | (base_high << 24),
            limit,
            is_code,
            is_writable: is_user && access & ACCESS_RW != 0,
            is_32bit: flags & FLAG_DB != 0,
            accessed: access & ACCESS_ACCESSED != 0,
            present: access & ACCESS_PRESENT != 0,
            is_user,
            dpl: (access >> 5) & 0b11,
        }
    }
}

/// A segment register: the visible selector and its hidden descriptor cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentRegister {
    pub selector: u16,
    pub descriptor: Descriptor,
}

impl SegmentRegister {
    pub const fn real_mode(selector: u16) -> Self {
        Self {
            selector,
            descriptor: Descriptor::real_mode(selector),
        }
    }
}

impl CpuState {
    /// Linear address of `seg:offset`, using the cached descriptor base.
    ///
    /// In real mode the cached base is always `selector << 4`.
    #[inline]
    pub fn resolve_linear_address(&self, seg: SegReg, offset: u32) -> u32 {
        self.segment(seg).descriptor.base.wrapping_add(offset)
    }

    /// Linear address of an instruction fetch at `CS:offset`.
    pub fn code_address(&self, offset: u32) -> Result<u32, Exception> {
        let cs = self.segment(SegReg::Cs);
        if offset > cs.descriptor.limit {
            return Err(Exception::gp(0, "instruction fetch beyond CS limit"));
        }
        Ok(cs.descriptor.base.wrapping_add(offset))
    }

    pub fn read_mem<B: CpuBus>(
        &self,
        bus: &mut B,
        seg: SegReg,
        offset: u32,
        size: OperandSize,
    ) -> u32 {
        bus.read_sized(self.resolve_linear_address(seg, offset), size)
    }

    pub fn write_mem<B: CpuBus>(
        &self,
        bus: &mut B,
        seg: SegReg,
        offset: u32,
        size: OperandSize,
        value: u32,
    ) {
        bus.write_sized(self.resolve_linear_address(seg, offset), size, value)
    }

    /// Assign a selector and re-derive its descriptor for the current mode.
    ///
    /// In protected mode null selectors are accepted for data segments only;
    /// everything else must name a present GDT entry of a suitable type.
    pub fn set_selector<B: CpuBus>(
        &mut self,
        bus: &mut B,
        seg: SegReg,
        selector: u16,
    ) -> Result<(), Exception> {
        if !self.protected_mode() {
            let mut reg = SegmentRegister::real_mode(selector);
            reg.descriptor.is_code = seg == SegReg::Cs;
            self.set_segment(seg, reg);
            return Ok(());
        }

        if selector & SELECTOR_TABLE_MASK == 0 {
            if matches!(seg, SegReg::Cs | SegReg::Ss) {
                return Err(Exception::gp(selector, "null selector"));
            }
            self.set_segment(
                seg,
                SegmentRegister {
                    selector,
                    descriptor: Descriptor::NULL,
                },
            );
            return Ok(());
        }

        let descriptor = self.load_descriptor(bus, selector)?;
        let acceptable = match seg {
            SegReg::Cs => descriptor.is_code,
            SegReg::Ss => descriptor.is_user && !descriptor.is_code && descriptor.is_writable,
            _ => descriptor.is_user && (!descriptor.is_code || descriptor.is_writable),
        };
        if !acceptable {
            return Err(Exception::gp(selector, "descriptor type not valid for segment"));
        }
        if !descriptor.present {
            return Err(Exception::SegmentNotPresent { selector });
        }

        debug!(
            ?seg,
            selector,
            base = descriptor.base,
            limit = descriptor.limit,
            "loaded protected-mode segment"
        );
        self.set_segment(
            seg,
            SegmentRegister {
                selector,
                descriptor,
            },
        );
        Ok(())
    }

    /// Fetch a GDT entry and mark it accessed.
    pub fn load_descriptor<B: CpuBus>(
        &self,
        bus: &mut B,
        selector: u16,
    ) -> Result<Descriptor, Exception> {
        if selector & SELECTOR_TI != 0 {
            return Err(Exception::gp(selector, "local descriptor tables are not supported"));
        }
        let offset = u32::from(selector & SELECTOR_TABLE_MASK);
        if offset + 7 > u32::from(self.gdtr.limit) {
            return Err(Exception::gp(selector, "selector beyond GDT limit"));
        }

        let addr = self.gdtr.base.wrapping_add(offset);
        let low = bus.read_u32(addr);
        let high = bus.read_u32(addr.wrapping_add(4));
        let mut descriptor = Descriptor::from_raw(u64::from(low) | (u64::from(high) << 32));

        if descriptor.is_user && descriptor.present && !descriptor.accessed {
            let access_addr = addr.wrapping_add(5);
            let access = bus.read_u8(access_addr);
            bus.write_u8(access_addr, access | ACCESS_ACCESSED);
            descriptor.accessed = true;
        }
        Ok(descriptor)
    }

    /// Load CS:EIP for a far control transfer.
    ///
    /// Samples CR0.PE first. Protected-mode targets must be present code
    /// descriptors and `offset` must lie within the new limit.
    pub fn far_transfer<B: CpuBus>(
        &mut self,
        bus: &mut B,
        selector: u16,
        offset: u32,
    ) -> Result<(), Exception> {
        self.sync_mode();
        if !self.protected_mode() {
            self.set_selector(bus, SegReg::Cs, selector)?;
            self.set_eip(offset & 0xFFFF);
            return Ok(());
        }

        if selector & SELECTOR_TABLE_MASK == 0 {
            return Err(Exception::gp(selector, "far transfer through null selector"));
        }
        let descriptor = self.load_descriptor(bus, selector)?;
        if !descriptor.is_code {
            return Err(Exception::gp(selector, "far transfer target is not a code segment"));
        }
        if !descriptor.present {
            return Err(Exception::SegmentNotPresent { selector });
        }
        let offset = if descriptor.is_32bit {
            offset
        } else {
            offset & 0xFFFF
        };
        if offset > descriptor.limit {
            return Err(Exception::gp(selector, "far transfer beyond CS limit"));
        }

        self.set_segment(
            SegReg::Cs,
            SegmentRegister {
                selector,
                descriptor,
            },
        );
        self.set_eip(offset);
        Ok(())
    }

    /// Near control transfer within the current code segment.
    pub fn near_transfer(&mut self, target: u32) -> Result<(), Exception> {
        self.sync_mode();
        let target = target & self.ip_mask();
        if self.protected_mode() && target > self.segment(SegReg::Cs).descriptor.limit {
            return Err(Exception::gp(0, "near transfer beyond CS limit"));
        }
        self.set_eip(target);
        Ok(())
    }
}
