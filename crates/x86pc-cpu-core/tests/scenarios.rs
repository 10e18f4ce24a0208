//! Whole-instruction scenarios, decoded from machine code.

use x86pc_cpu_core::decoder::{decode, DecodeMode, SegReg};
use x86pc_cpu_core::{CpuBus, CpuCore, CpuState, CycleExit, Exception, Flags, SystemBus};

fn run(cpu: &mut CpuCore, bus: &mut SystemBus, code: &[u8]) -> Result<CycleExit, Exception> {
    let inst = decode(code, DecodeMode::Bits16, cpu.state.eip()).expect("decodable");
    cpu.cycle(bus, &inst)
}

#[test]
fn reset_state() {
    let mut state = CpuState::new();
    state.set_eax(0xDEAD_BEEF);
    state.halted = true;
    state.reset();
    assert_eq!(state.eip(), 0);
    assert_eq!(state.selector(SegReg::Cs), 0);
    assert_eq!(state.flags, Flags::ZF | Flags::IF);
    assert!(!state.halted);
}

#[test]
fn push_then_pop_at_top_of_segment() {
    let mut bus = SystemBus::with_ram(0x2_0000);
    let mut cpu = CpuCore::new();
    cpu.state.set_sp(0xFFFE);
    cpu.state.set_ax(0x1234);

    // push ax
    run(&mut cpu, &mut bus, &[0x50]).unwrap();
    assert_eq!(cpu.state.sp(), 0xFFFC);
    assert_eq!(bus.read_u8(0xFFFC), 0x34);
    assert_eq!(bus.read_u8(0xFFFD), 0x12);

    // pop bx
    run(&mut cpu, &mut bus, &[0x5B]).unwrap();
    assert_eq!(cpu.state.bx(), 0x1234);
    assert_eq!(cpu.state.sp(), 0xFFFE);
}

#[test]
fn reset_vector_resolves_to_ffff0() {
    let mut bus = SystemBus::with_ram(0x10_0000);
    let mut state = CpuState::new();
    state.set_selector(&mut bus, SegReg::Cs, 0xF000).unwrap();
    assert_eq!(state.resolve_linear_address(SegReg::Cs, 0xFFF0), 0xF_FFF0);
}

#[test]
fn hlt_then_interrupt_runs_handler() {
    let mut bus = SystemBus::with_ram(0x2_0000);
    // IVT[0x30] = 0000:0800, handler is `inc ax`.
    bus.write_u16(0x30 * 4, 0x0800);
    bus.write_u8(0x0800, 0x40);
    let mut cpu = CpuCore::new();
    cpu.state.set_sp(0x2000);

    assert_eq!(run(&mut cpu, &mut bus, &[0xF4]), Ok(CycleExit::Halted));
    assert!(cpu.state.halted);

    cpu.request_interrupt(0x30);
    assert_eq!(
        cpu.step(&mut bus),
        Ok(CycleExit::Interrupted { vector: 0x30 })
    );
    assert!(!cpu.state.halted);
    assert_eq!(cpu.state.interrupt_level, 1);
    assert_eq!(cpu.step(&mut bus), Ok(CycleExit::Retired));
    assert_eq!(cpu.state.ax(), 1);
}

#[test]
fn hlt_with_interrupts_disabled_is_fatal() {
    let mut bus = SystemBus::with_ram(0x1000);
    let mut cpu = CpuCore::new();
    // cli
    run(&mut cpu, &mut bus, &[0xFA]).unwrap();
    assert_eq!(
        run(&mut cpu, &mut bus, &[0xF4]),
        Err(Exception::HaltWithInterruptsDisabled)
    );
    assert!(!cpu.state.halted);
}

#[test]
fn divide_faults_leave_registers_untouched() {
    let mut bus = SystemBus::with_ram(0x1000);
    let mut cpu = CpuCore::new();

    // div bl with bl = 0
    cpu.state.set_ax(0x1234);
    cpu.state.set_bl(0);
    assert_eq!(run(&mut cpu, &mut bus, &[0xF6, 0xF3]), Err(Exception::DivideError));
    assert_eq!(cpu.state.ax(), 0x1234);

    // div bx with a quotient that does not fit in 16 bits
    cpu.state.set_dx(0x0002);
    cpu.state.set_ax(0x0000);
    cpu.state.set_bx(0x0001);
    assert_eq!(run(&mut cpu, &mut bus, &[0xF7, 0xF3]), Err(Exception::DivideError));
    assert_eq!((cpu.state.dx(), cpu.state.ax()), (0x0002, 0x0000));

    // div ebx over edx:eax
    cpu.state.set_edx(0x10);
    cpu.state.set_eax(0);
    cpu.state.set_ebx(0x10);
    assert_eq!(
        run(&mut cpu, &mut bus, &[0x66, 0xF7, 0xF3]),
        Err(Exception::DivideError)
    );
    assert_eq!((cpu.state.edx(), cpu.state.eax()), (0x10, 0));
    assert_eq!(cpu.state.eip(), 0);
}

#[test]
fn idiv_truncates_toward_zero() {
    let mut bus = SystemBus::with_ram(0x1000);
    let mut cpu = CpuCore::new();
    // ax = -7, idiv bl with bl = 2
    cpu.state.set_ax((-7i16) as u16);
    cpu.state.set_bl(2);
    run(&mut cpu, &mut bus, &[0xF6, 0xFB]).unwrap();
    assert_eq!(cpu.state.al() as i8, -3);
    assert_eq!(cpu.state.ah() as i8, -1);
}

#[test]
fn io_echo_round_trip() {
    use std::cell::Cell;
    use std::rc::Rc;

    let mut bus = SystemBus::with_ram(0x1000);
    let latched = Rc::new(Cell::new(0u32));
    let (r, w) = (latched.clone(), latched.clone());
    bus.io
        .register_fn(&[0x3F8], move |_, _| r.get(), move |_, _, v| w.set(v));
    let mut cpu = CpuCore::new();

    cpu.state.set_dx(0x3F8);
    cpu.state.set_al(0xA5);
    // out dx, al ; mov al, 0 ; in al, dx
    run(&mut cpu, &mut bus, &[0xEE]).unwrap();
    run(&mut cpu, &mut bus, &[0xB0, 0x00]).unwrap();
    run(&mut cpu, &mut bus, &[0xEC]).unwrap();
    assert_eq!(cpu.state.al(), 0xA5);

    // Unmapped ports read 0xFFFF cut to the operand width.
    cpu.state.set_dx(0x1234);
    run(&mut cpu, &mut bus, &[0xED]).unwrap();
    assert_eq!(cpu.state.ax(), 0xFFFF);
    run(&mut cpu, &mut bus, &[0x66, 0xED]).unwrap();
    assert_eq!(cpu.state.eax(), 0x0000_FFFF);
}

#[test]
fn decimal_adjust_after_packed_add() {
    let mut bus = SystemBus::with_ram(0x1000);
    let mut cpu = CpuCore::new();
    // mov al, 0x38 ; add al, 0x45 ; daa
    run(&mut cpu, &mut bus, &[0xB0, 0x38]).unwrap();
    run(&mut cpu, &mut bus, &[0x04, 0x45]).unwrap();
    run(&mut cpu, &mut bus, &[0x27]).unwrap();
    assert_eq!(cpu.state.al(), 0x83);
    assert!(!cpu.state.flag(Flags::CF));
}

#[test]
fn high_byte_registers_alias_the_word() {
    let mut bus = SystemBus::with_ram(0x1000);
    let mut cpu = CpuCore::new();
    // mov ax, 0x1122 ; mov ah, 0x33 ; mov bh, al
    run(&mut cpu, &mut bus, &[0xB8, 0x22, 0x11]).unwrap();
    run(&mut cpu, &mut bus, &[0xB4, 0x33]).unwrap();
    run(&mut cpu, &mut bus, &[0x88, 0xC7]).unwrap();
    assert_eq!(cpu.state.ax(), 0x3322);
    assert_eq!(cpu.state.bx(), 0x2200);
}

#[test]
fn segment_override_prefix_redirects_memory_operand() {
    let mut bus = SystemBus::with_ram(0x3_0000);
    bus.write_u16(0x2_0010, 0xCAFE);
    let mut cpu = CpuCore::new();
    cpu.state.set_selector(&mut bus, SegReg::Es, 0x2000).unwrap();
    // mov ax, es:[0x10]
    run(&mut cpu, &mut bus, &[0x26, 0xA1, 0x10, 0x00]).unwrap();
    assert_eq!(cpu.state.ax(), 0xCAFE);
    assert_eq!(cpu.state.eip(), 4);
}
