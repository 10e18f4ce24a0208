use std::cell::RefCell;
use std::rc::Rc;

use x86pc_cpu_core::PortIoDevice;

/// Bochs/QEMU style debug console port.
pub const DEBUGCON_PORT: u16 = 0xE9;

/// Collects bytes the guest writes to the debug console port.
///
/// Reads return `0xE9`, which is how guests detect that the port exists.
#[derive(Debug, Default)]
pub struct DebugCon {
    output: Vec<u8>,
}

impl DebugCon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Hand over everything written since the last call.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    /// A shared handle, ready for [`x86pc_cpu_core::IoPortBus::register_ports`].
    pub fn shared() -> Rc<RefCell<DebugCon>> {
        Rc::new(RefCell::new(Self::new()))
    }
}

impl PortIoDevice for DebugCon {
    fn read(&mut self, _port: u16, _size: u8) -> u32 {
        u32::from(DEBUGCON_PORT as u8)
    }

    fn write(&mut self, _port: u16, _size: u8, value: u32) {
        self.output.push(value as u8);
    }

    fn reset(&mut self) {
        self.output.clear();
    }
}
