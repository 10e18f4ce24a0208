mod common;

use common::{boot_machine, debugcon_text, BOOT_ADDR};
use x86pc_cpu_core::decoder::SegReg;
use x86pc_machine::{MachineConfig, RunExit};

const GDT_ADDR: u32 = 0x7D00;
const GDT_DESC_ADDR: u32 = 0x7D20;

fn gdt() -> Vec<u8> {
    let mut gdt = vec![0u8; 8];
    // 0x08: flat 4 GiB 32-bit code, 0x10: flat 4 GiB data.
    gdt.extend_from_slice(&[0xFF, 0xFF, 0x00, 0x00, 0x00, 0x9A, 0xCF, 0x00]);
    gdt.extend_from_slice(&[0xFF, 0xFF, 0x00, 0x00, 0x00, 0x92, 0xCF, 0x00]);
    gdt
}

fn switch_code() -> Vec<u8> {
    let [desc_lo, desc_hi] = (GDT_DESC_ADDR as u16).to_le_bytes();
    let mut code = vec![
        0xFA, // cli
        0x0F, 0x01, 0x16, desc_lo, desc_hi, // lgdt [gdt_desc]
        0x0F, 0x20, 0xC0, // mov eax,cr0
        0x0C, 0x01, // or al,1
        0x0F, 0x22, 0xC0, // mov cr0,eax
    ];
    let pm_entry = BOOT_ADDR + code.len() as u32 + 8;
    code.extend_from_slice(&[0x66, 0xEA]); // jmp dword 0x08:pm_entry
    code.extend_from_slice(&pm_entry.to_le_bytes());
    code.extend_from_slice(&[0x08, 0x00]);
    code.extend_from_slice(&[
        0x66, 0xB8, 0x10, 0x00, // mov ax,0x10
        0x8E, 0xD8, // mov ds,ax
        0x8E, 0xD0, // mov ss,ax
        0xBC, 0x00, 0x90, 0x00, 0x00, // mov esp,0x9000
        0xC7, 0x05, 0x00, 0x80, 0x00, 0x00, 0xBE, 0xBA, 0xFE, 0xCA, // mov dword [0x8000],0xcafebabe
        0x68, 0x78, 0x56, 0x34, 0x12, // push 0x12345678
        0xB0, b'P', // mov al,'P'
        0xE6, 0xE9, // out 0xe9,al
        0xFB, // sti
        0xF4, // hlt
    ]);
    code
}

#[test]
fn real_to_protected_mode_switch() {
    let (mut machine, con) = boot_machine(MachineConfig::default(), &switch_code(), &[]);
    machine.load_image(GDT_ADDR, &gdt()).unwrap();
    let mut desc = 0x17u16.to_le_bytes().to_vec();
    desc.extend_from_slice(&GDT_ADDR.to_le_bytes());
    machine.load_image(GDT_DESC_ADDR, &desc).unwrap();

    let exit = machine.run(1_000);
    assert!(matches!(exit, RunExit::Halted { .. }), "{exit:?}");

    let cpu = machine.cpu();
    assert!(cpu.protected_mode());
    assert_eq!(cpu.gdtr.base, GDT_ADDR);
    assert_eq!(cpu.gdtr.limit, 0x17);
    assert_eq!(cpu.selector(SegReg::Cs), 0x08);
    assert!(cpu.segment(SegReg::Cs).descriptor.is_32bit);
    assert_eq!(cpu.segment(SegReg::Cs).descriptor.limit, 0xFFFF_FFFF);
    assert_eq!(cpu.selector(SegReg::Ss), 0x10);
    assert_eq!(cpu.esp(), 0x9000 - 4);

    let mem = machine.memory().as_slice();
    assert_eq!(&mem[0x8000..0x8004], &0xCAFE_BABEu32.to_le_bytes());
    assert_eq!(&mem[0x8FFC..0x9000], &0x1234_5678u32.to_le_bytes());
    // Descriptor loads mark the GDT entries accessed.
    assert_eq!(mem[GDT_ADDR as usize + 8 + 5], 0x9B);
    assert_eq!(debugcon_text(&con), "P");
}

#[test]
fn far_jump_through_null_selector_faults_in_protected_mode() {
    let [desc_lo, desc_hi] = (GDT_DESC_ADDR as u16).to_le_bytes();
    let code = [
        0xFA, // cli
        0x0F, 0x01, 0x16, desc_lo, desc_hi, // lgdt [gdt_desc]
        0x0F, 0x20, 0xC0, // mov eax,cr0
        0x0C, 0x01, // or al,1
        0x0F, 0x22, 0xC0, // mov cr0,eax
        0xEA, 0x00, 0x00, 0x00, 0x00, // jmp 0x0000:0x0000
    ];
    let (mut machine, _con) = boot_machine(MachineConfig::default(), &code, &[]);
    machine.load_image(GDT_ADDR, &gdt()).unwrap();
    let mut desc = 0x17u16.to_le_bytes().to_vec();
    desc.extend_from_slice(&GDT_ADDR.to_le_bytes());
    machine.load_image(GDT_DESC_ADDR, &desc).unwrap();

    let exit = machine.run(1_000);
    let RunExit::Exception { exception, executed } = exit else {
        panic!("expected a fault, got {exit:?}");
    };
    assert_eq!(exception.vector(), Some(13));
    assert_eq!(executed, 6);
    // EIP still names the faulting jump.
    assert_eq!(machine.current_address(), BOOT_ADDR + 14);
}
