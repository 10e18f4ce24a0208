#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use x86pc_machine::{DebugCon, Machine, MachineConfig, DEBUGCON_PORT};

pub const BOOT_ADDR: u32 = 0x7C00;

/// 64 KiB system BIOS whose reset vector jumps to 0000:7C00. `handlers`
/// places extra code at offsets within the F000 segment.
pub fn bios_image(handlers: &[(u16, &[u8])]) -> Vec<u8> {
    let mut image = vec![0xF4; 0x1_0000];
    // jmp 0000:7C00
    image[0xFFF0..0xFFF5].copy_from_slice(&[0xEA, 0x00, 0x7C, 0x00, 0x00]);
    for (offset, code) in handlers {
        let start = usize::from(*offset);
        image[start..start + code.len()].copy_from_slice(code);
    }
    image
}

/// A machine that boots `code` from 0x7C00, with a debug console attached.
pub fn boot_machine(
    cfg: MachineConfig,
    code: &[u8],
    handlers: &[(u16, &[u8])],
) -> (Machine, Rc<RefCell<DebugCon>>) {
    let mut machine = Machine::new(cfg).unwrap();
    machine.load_bios(&bios_image(handlers)).unwrap();
    machine.load_image(BOOT_ADDR, code).unwrap();

    let con = DebugCon::shared();
    machine.io_mut().register_ports(&[DEBUGCON_PORT], con.clone());
    (machine, con)
}

/// Point IVT entry `vector` at `F000:offset`.
pub fn set_ivt_to_bios(machine: &mut Machine, vector: u8, offset: u16) {
    let entry = u32::from(vector) * 4;
    let [lo, hi] = offset.to_le_bytes();
    machine.load_image(entry, &[lo, hi, 0x00, 0xF0]).unwrap();
}

pub fn debugcon_text(con: &Rc<RefCell<DebugCon>>) -> String {
    String::from_utf8(con.borrow().output().to_vec()).unwrap()
}
