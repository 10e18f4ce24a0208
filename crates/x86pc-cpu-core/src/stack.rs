//! SS-relative push and pop.
//!
//! The stack pointer is SP or ESP depending on the B bit of the cached SS
//! descriptor; the element width comes from the instruction's operand size.

use x86pc_decoder::{Gpr, OperandSize, SegReg};

use crate::mem::CpuBus;
use crate::state::CpuState;

impl CpuState {
    #[inline]
    fn stack_pointer_size(&self) -> OperandSize {
        if self.stack_is_32bit() {
            OperandSize::Bits32
        } else {
            OperandSize::Bits16
        }
    }

    /// Current top of stack as an SS offset.
    #[inline]
    pub fn stack_top(&self) -> u32 {
        self.read_gpr(Gpr::Esp, self.stack_pointer_size())
    }

    /// Move the stack pointer by `delta` bytes, wrapping within SP when the
    /// stack is 16-bit.
    pub fn adjust_stack(&mut self, delta: i32) {
        let sp_size = self.stack_pointer_size();
        let sp = self.read_gpr(Gpr::Esp, sp_size).wrapping_add(delta as u32);
        self.write_gpr(Gpr::Esp, sp_size, sp);
    }

    pub fn push<B: CpuBus>(&mut self, bus: &mut B, value: u32, size: OperandSize) {
        self.adjust_stack(-(size.bytes() as i32));
        let top = self.stack_top();
        self.write_mem(bus, SegReg::Ss, top, size, value);
    }

    pub fn pop<B: CpuBus>(&mut self, bus: &mut B, size: OperandSize) -> u32 {
        let value = self.read_mem(bus, SegReg::Ss, self.stack_top(), size);
        self.adjust_stack(size.bytes() as i32);
        value
    }

    /// Read the stack slot `offset` bytes above the top without popping.
    pub fn peek<B: CpuBus>(&self, bus: &mut B, offset: u32, size: OperandSize) -> u32 {
        let mask = self.stack_pointer_size().mask();
        let addr = self.stack_top().wrapping_add(offset) & mask;
        self.read_mem(bus, SegReg::Ss, addr, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::SystemBus;

    #[test]
    fn sixteen_bit_stack_wraps_inside_sp() {
        let mut bus = SystemBus::with_ram(0x2_0000);
        let mut state = CpuState::new();
        state.set_esp(0xABCD_0000);

        state.push(&mut bus, 0xBEEF, OperandSize::Bits16);
        assert_eq!(state.esp(), 0xABCD_FFFE);
        assert_eq!(bus.read_u16(0xFFFE), 0xBEEF);

        assert_eq!(state.pop(&mut bus, OperandSize::Bits16), 0xBEEF);
        assert_eq!(state.esp(), 0xABCD_0000);
    }

    #[test]
    fn dword_push_in_real_mode_moves_sp_by_four() {
        let mut bus = SystemBus::with_ram(0x2_0000);
        let mut state = CpuState::new();
        state.set_sp(0x100);

        state.push(&mut bus, 0x1122_3344, OperandSize::Bits32);
        assert_eq!(state.sp(), 0xFC);
        assert_eq!(state.peek(&mut bus, 0, OperandSize::Bits16), 0x3344);
        assert_eq!(state.peek(&mut bus, 2, OperandSize::Bits16), 0x1122);
        assert_eq!(state.pop(&mut bus, OperandSize::Bits32), 0x1122_3344);
    }
}
