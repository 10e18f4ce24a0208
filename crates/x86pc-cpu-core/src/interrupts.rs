//! Interrupt latch and delivery.
//!
//! Devices raise interrupts through an [`InterruptSink`]; the core samples the
//! latch only at cycle boundaries. Delivery uses the real-mode IVT or, once the
//! engine has observed CR0.PE, same-privilege IDT interrupt/trap gates.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;
use x86pc_decoder::{OperandSize, SegReg};

use crate::exception::Exception;
use crate::flags::Flags;
use crate::mem::CpuBus;
use crate::state::CpuState;

/// Receiver of interrupt requests from device models.
pub trait InterruptSink {
    fn request_interrupt(&self, vector: u8);
}

/// A single-slot interrupt latch shared between the core and its devices.
///
/// Cloning yields another handle to the same latch, so a device running on a
/// different thread can hold one. A request made while another is still
/// latched replaces it.
#[derive(Debug, Clone, Default)]
pub struct InterruptLatch {
    pending: Arc<Mutex<Option<u8>>>,
}

impl InterruptLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<u8> {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear the latch and return what it held.
    pub fn take(&self) -> Option<u8> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Clear the latch only if it still holds `vector`. A request that
    /// replaced it in the meantime stays latched.
    pub fn acknowledge(&self, vector: u8) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if *pending == Some(vector) {
            *pending = None;
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        self.take();
    }
}

impl InterruptSink for InterruptLatch {
    fn request_interrupt(&self, vector: u8) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(vector);
    }
}

const GATE_PRESENT: u32 = 1 << 15;
const GATE_INT16: u32 = 0x6;
const GATE_TRAP16: u32 = 0x7;
const GATE_INT32: u32 = 0xE;
const GATE_TRAP32: u32 = 0xF;

impl CpuState {
    /// Transfer control to the handler for `vector`, saving FLAGS, CS and
    /// `return_eip` on the stack.
    ///
    /// Clears the halted state and bumps the nesting level. On error nothing
    /// has been pushed.
    pub fn deliver_interrupt<B: CpuBus>(
        &mut self,
        bus: &mut B,
        vector: u8,
        return_eip: u32,
    ) -> Result<(), Exception> {
        self.sync_mode();
        if self.protected_mode() {
            self.deliver_through_gate(bus, vector, return_eip)?;
        } else {
            self.deliver_real_mode(bus, vector, return_eip)?;
        }
        self.halted = false;
        self.interrupt_level = self.interrupt_level.saturating_add(1);
        debug!(
            vector,
            cs = self.selector(SegReg::Cs),
            eip = self.eip(),
            level = self.interrupt_level,
            "interrupt delivered"
        );
        Ok(())
    }

    fn deliver_real_mode<B: CpuBus>(
        &mut self,
        bus: &mut B,
        vector: u8,
        return_eip: u32,
    ) -> Result<(), Exception> {
        let entry = u32::from(vector) * 4;
        if entry + 3 > u32::from(self.idtr.limit) {
            return Err(Exception::gp(0, "vector beyond IVT limit"));
        }
        let entry = self.idtr.base.wrapping_add(entry);
        let offset = bus.read_u16(entry);
        let segment = bus.read_u16(entry.wrapping_add(2));

        let image = self.flags.to_image();
        let cs = self.selector(SegReg::Cs);
        self.push(bus, image, OperandSize::Bits16);
        self.push(bus, u32::from(cs), OperandSize::Bits16);
        self.push(bus, return_eip, OperandSize::Bits16);
        self.flags.remove(Flags::IF | Flags::TF | Flags::AC);

        self.set_selector(bus, SegReg::Cs, segment)?;
        self.set_eip(u32::from(offset));
        Ok(())
    }

    fn deliver_through_gate<B: CpuBus>(
        &mut self,
        bus: &mut B,
        vector: u8,
        return_eip: u32,
    ) -> Result<(), Exception> {
        let offset = u32::from(vector) * 8;
        let error_selector = (offset + 2) as u16;
        if offset + 7 > u32::from(self.idtr.limit) {
            return Err(Exception::gp(error_selector, "vector beyond IDT limit"));
        }
        let entry = self.idtr.base.wrapping_add(offset);
        let low = bus.read_u32(entry);
        let high = bus.read_u32(entry.wrapping_add(4));

        let gate_type = (high >> 8) & 0x1F;
        let frame = match gate_type {
            GATE_INT16 | GATE_TRAP16 => OperandSize::Bits16,
            GATE_INT32 | GATE_TRAP32 => OperandSize::Bits32,
            _ => return Err(Exception::gp(error_selector, "unsupported IDT gate type")),
        };
        if high & GATE_PRESENT == 0 {
            return Err(Exception::SegmentNotPresent {
                selector: error_selector,
            });
        }
        let selector = (low >> 16) as u16;
        let target = (high & 0xFFFF_0000) | (low & 0xFFFF);
        let is_interrupt_gate = matches!(gate_type, GATE_INT16 | GATE_INT32);

        // Validate the target before touching the stack.
        let saved_cs = *self.segment(SegReg::Cs);
        let saved_eip = self.eip();
        self.far_transfer(bus, selector, target)?;
        let new_cs = *self.segment(SegReg::Cs);
        let new_eip = self.eip();
        self.set_segment(SegReg::Cs, saved_cs);
        self.set_eip(saved_eip);

        let image = self.flags.to_image();
        self.push(bus, image, frame);
        self.push(bus, u32::from(saved_cs.selector), frame);
        self.push(bus, return_eip, frame);

        self.flags.remove(Flags::TF | Flags::NT | Flags::RF);
        if is_interrupt_gate {
            self.flags.remove(Flags::IF);
        }
        self.set_segment(SegReg::Cs, new_cs);
        self.set_eip(new_eip);
        Ok(())
    }

    /// IRET/IRETD: pop EIP, CS and FLAGS and unwind one nesting level.
    pub fn return_from_interrupt<B: CpuBus>(
        &mut self,
        bus: &mut B,
        size: OperandSize,
    ) -> Result<(), Exception> {
        let step = size.bytes();
        let eip = self.peek(bus, 0, size);
        let cs = self.peek(bus, step, size) as u16;
        let image = self.peek(bus, 2 * step, size);

        self.far_transfer(bus, cs, eip)?;
        self.adjust_stack(3 * step as i32);

        let image = match size {
            OperandSize::Bits32 => image,
            _ => (self.flags.bits() & 0xFFFF_0000) | (image & 0xFFFF),
        };
        // IRET does not change VM or RF from the stacked image in this model.
        let preserved = self.flags & (Flags::VM | Flags::RF);
        self.flags = (Flags::from_image(image) - (Flags::VM | Flags::RF)) | preserved;

        self.interrupt_level = self.interrupt_level.saturating_sub(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::SystemBus;
    use crate::state::{TableRegister, CR0_PE};

    #[test]
    fn latch_handles_share_one_slot() {
        let latch = InterruptLatch::new();
        let device_side = latch.clone();
        device_side.request_interrupt(0x08);
        device_side.request_interrupt(0x09);
        assert_eq!(latch.pending(), Some(0x09));
        assert_eq!(latch.take(), Some(0x09));
        assert_eq!(device_side.pending(), None);
    }

    #[test]
    fn latch_can_cross_threads() {
        let latch = InterruptLatch::new();
        let remote = latch.clone();
        std::thread::spawn(move || remote.request_interrupt(0x70))
            .join()
            .unwrap();
        assert_eq!(latch.take(), Some(0x70));
    }

    #[test]
    fn acknowledge_keeps_a_newer_request() {
        let latch = InterruptLatch::new();
        latch.request_interrupt(0x08);
        let seen = latch.pending();
        latch.request_interrupt(0x09);
        assert!(!latch.acknowledge(0x08));
        assert_eq!(seen, Some(0x08));
        assert_eq!(latch.pending(), Some(0x09));
        assert!(latch.acknowledge(0x09));
        assert_eq!(latch.pending(), None);
    }

    #[test]
    fn real_mode_delivery_pushes_frame_and_loads_ivt() {
        let mut bus = SystemBus::with_ram(0x2_0000);
        bus.write_u16(0x21 * 4, 0x0100);
        bus.write_u16(0x21 * 4 + 2, 0xF000);

        let mut state = CpuState::new();
        state.set_selector(&mut bus, SegReg::Cs, 0x1000).unwrap();
        state.set_sp(0x8000);
        state.flags.insert(Flags::TF | Flags::CF);
        state.halted = true;

        state.deliver_interrupt(&mut bus, 0x21, 0x0042).unwrap();

        assert_eq!(state.selector(SegReg::Cs), 0xF000);
        assert_eq!(state.eip(), 0x0100);
        assert_eq!(state.sp(), 0x7FFA);
        assert_eq!(bus.read_u16(0x7FFA), 0x0042);
        assert_eq!(bus.read_u16(0x7FFC), 0x1000);
        assert_eq!(bus.read_u16(0x7FFE) as u32, (Flags::RESET | Flags::TF | Flags::CF).to_image());
        assert!(!state.flag(Flags::IF) && !state.flag(Flags::TF));
        assert!(state.flag(Flags::CF));
        assert!(!state.halted);
        assert_eq!(state.interrupt_level, 1);

        state
            .return_from_interrupt(&mut bus, OperandSize::Bits16)
            .unwrap();
        assert_eq!(state.selector(SegReg::Cs), 0x1000);
        assert_eq!(state.eip(), 0x0042);
        assert_eq!(state.sp(), 0x8000);
        assert!(state.flag(Flags::IF) && state.flag(Flags::TF));
        assert_eq!(state.interrupt_level, 0);
    }

    const GDT: u32 = 0x0800;
    const IDT: u32 = 0x1000;
    const IDT_VECTORS: u32 = 0x24;

    fn write_u64(bus: &mut SystemBus, addr: u32, value: u64) {
        bus.write_u32(addr, value as u32);
        bus.write_u32(addr + 4, (value >> 32) as u32);
    }

    fn gate(selector: u16, offset: u32, gate_type: u32, present: bool) -> u64 {
        let low = (u32::from(selector) << 16) | (offset & 0xFFFF);
        let mut high = (offset & 0xFFFF_0000) | (gate_type << 8);
        if present {
            high |= GATE_PRESENT;
        }
        (u64::from(high) << 32) | u64::from(low)
    }

    /// Flat 32-bit code (0x08) and data (0x10), a 16-bit code segment
    /// (0x18), CS:EIP = 08:2000 and SS:ESP = 10:9000.
    fn protected_state(bus: &mut SystemBus) -> CpuState {
        write_u64(bus, GDT, 0);
        write_u64(bus, GDT + 0x08, 0x00CF_9A00_0000_FFFF);
        write_u64(bus, GDT + 0x10, 0x00CF_9200_0000_FFFF);
        write_u64(bus, GDT + 0x18, 0x0000_9A00_0000_FFFF);

        let mut state = CpuState::new();
        state.gdtr = TableRegister {
            base: GDT,
            limit: 4 * 8 - 1,
        };
        state.idtr = TableRegister {
            base: IDT,
            limit: (IDT_VECTORS * 8 - 1) as u16,
        };
        state.cr[0] |= CR0_PE;
        state.far_transfer(bus, 0x08, 0x2000).unwrap();
        state.set_selector(bus, SegReg::Ss, 0x10).unwrap();
        state.set_esp(0x9000);
        state
    }

    #[test]
    fn interrupt_gate_pushes_dword_frame_and_iretd_unwinds_it() {
        let mut bus = SystemBus::with_ram(0x1_0000);
        write_u64(&mut bus, IDT + 0x21 * 8, gate(0x08, 0x3000, GATE_INT32, true));
        let mut state = protected_state(&mut bus);
        assert!(state.flag(Flags::IF));

        state.deliver_interrupt(&mut bus, 0x21, 0x2002).unwrap();
        assert_eq!(state.selector(SegReg::Cs), 0x08);
        assert_eq!(state.eip(), 0x3000);
        assert_eq!(state.esp(), 0x8FF4);
        assert_eq!(bus.read_u32(0x8FF4), 0x2002);
        assert_eq!(bus.read_u32(0x8FF8), 0x08);
        assert_eq!(bus.read_u32(0x8FFC), Flags::RESET.to_image());
        assert!(!state.flag(Flags::IF));
        assert_eq!(state.interrupt_level, 1);

        state
            .return_from_interrupt(&mut bus, OperandSize::Bits32)
            .unwrap();
        assert_eq!(state.selector(SegReg::Cs), 0x08);
        assert_eq!(state.eip(), 0x2002);
        assert_eq!(state.esp(), 0x9000);
        assert!(state.flag(Flags::IF));
        assert_eq!(state.interrupt_level, 0);
    }

    #[test]
    fn trap_gate_keeps_if_and_sixteen_bit_gate_pushes_words() {
        let mut bus = SystemBus::with_ram(0x1_0000);
        write_u64(&mut bus, IDT + 0x22 * 8, gate(0x18, 0x0100, GATE_TRAP16, true));
        let mut state = protected_state(&mut bus);

        state.deliver_interrupt(&mut bus, 0x22, 0x2002).unwrap();
        assert_eq!(state.selector(SegReg::Cs), 0x18);
        assert_eq!(state.eip(), 0x0100);
        assert_eq!(state.ip_mask(), 0xFFFF);
        assert_eq!(state.esp(), 0x8FFA);
        assert_eq!(bus.read_u16(0x8FFA), 0x2002);
        assert_eq!(bus.read_u16(0x8FFC), 0x08);
        assert_eq!(u32::from(bus.read_u16(0x8FFE)), Flags::RESET.to_image());
        assert!(state.flag(Flags::IF));

        state
            .return_from_interrupt(&mut bus, OperandSize::Bits16)
            .unwrap();
        assert_eq!(state.selector(SegReg::Cs), 0x08);
        assert_eq!(state.eip(), 0x2002);
        assert_eq!(state.esp(), 0x9000);
    }

    #[test]
    fn bad_gates_fault_before_anything_is_pushed() {
        let mut bus = SystemBus::with_ram(0x1_0000);
        // Task gate: not handled.
        write_u64(&mut bus, IDT + 0x20 * 8, gate(0x08, 0x3000, 0x5, true));
        write_u64(&mut bus, IDT + 0x23 * 8, gate(0x08, 0x3000, GATE_INT32, false));
        let mut state = protected_state(&mut bus);

        assert!(matches!(
            state.deliver_interrupt(&mut bus, 0x30, 0x2002),
            Err(Exception::GeneralProtection {
                selector: 0x182,
                ..
            })
        ));
        assert!(matches!(
            state.deliver_interrupt(&mut bus, 0x20, 0x2002),
            Err(Exception::GeneralProtection {
                selector: 0x102,
                ..
            })
        ));
        assert_eq!(
            state.deliver_interrupt(&mut bus, 0x23, 0x2002),
            Err(Exception::SegmentNotPresent { selector: 0x11A })
        );

        assert_eq!(state.esp(), 0x9000);
        assert_eq!((state.selector(SegReg::Cs), state.eip()), (0x08, 0x2000));
        assert_eq!(state.interrupt_level, 0);
    }
}
