//! I/O port router.
//!
//! Devices are external collaborators; the core only knows them through
//! [`PortIoDevice`]. Accesses to ports nobody claimed float high on reads and
//! are ignored on writes, so firmware probing for absent hardware keeps going.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

pub trait PortIoDevice {
    /// `size` is the access width in bytes (1, 2 or 4).
    fn read(&mut self, port: u16, size: u8) -> u32;
    fn write(&mut self, port: u16, size: u8, value: u32);

    /// Return the device to its power-on state.
    fn reset(&mut self) {}
}

/// Forwards one port of a device that answers several ports.
struct SharedPort<D: ?Sized> {
    device: Rc<RefCell<D>>,
}

impl<D: PortIoDevice + ?Sized> PortIoDevice for SharedPort<D> {
    fn read(&mut self, port: u16, size: u8) -> u32 {
        self.device.borrow_mut().read(port, size)
    }

    fn write(&mut self, port: u16, size: u8, value: u32) {
        self.device.borrow_mut().write(port, size, value)
    }

    fn reset(&mut self) {
        self.device.borrow_mut().reset()
    }
}

/// A device made of a read callback and a write callback.
pub struct PortFn<R, W> {
    read: R,
    write: W,
}

impl<R, W> PortFn<R, W>
where
    R: FnMut(u16, u8) -> u32,
    W: FnMut(u16, u8, u32),
{
    pub fn new(read: R, write: W) -> Self {
        Self { read, write }
    }
}

impl<R, W> PortIoDevice for PortFn<R, W>
where
    R: FnMut(u16, u8) -> u32,
    W: FnMut(u16, u8, u32),
{
    fn read(&mut self, port: u16, size: u8) -> u32 {
        (self.read)(port, size)
    }

    fn write(&mut self, port: u16, size: u8, value: u32) {
        (self.write)(port, size, value)
    }
}

/// Value seen on an unclaimed port: 0xFFFF truncated to the access width.
/// A dword read still only floats the low word.
pub const fn open_bus(size: u8) -> u32 {
    match size {
        1 => 0xFF,
        _ => 0xFFFF,
    }
}

#[derive(Default)]
pub struct IoPortBus {
    devices: HashMap<u16, Box<dyn PortIoDevice>>,
}

impl std::fmt::Debug for IoPortBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ports: Vec<_> = self.devices.keys().copied().collect();
        ports.sort_unstable();
        f.debug_struct("IoPortBus").field("ports", &ports).finish()
    }
}

impl IoPortBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a single port. A previous owner of the port is replaced.
    pub fn register(&mut self, port: u16, device: Box<dyn PortIoDevice>) {
        self.devices.insert(port, device);
    }

    /// Claim every port in `ports` for one shared device.
    pub fn register_ports<D>(&mut self, ports: &[u16], device: Rc<RefCell<D>>)
    where
        D: PortIoDevice + 'static,
    {
        for &port in ports {
            self.register(
                port,
                Box::new(SharedPort {
                    device: device.clone(),
                }),
            );
        }
    }

    /// Claim `ports` with a `(read, write)` callback pair.
    pub fn register_fn<R, W>(&mut self, ports: &[u16], read: R, write: W)
    where
        R: FnMut(u16, u8) -> u32 + 'static,
        W: FnMut(u16, u8, u32) + 'static,
    {
        self.register_ports(ports, Rc::new(RefCell::new(PortFn::new(read, write))));
    }

    pub fn unregister(&mut self, port: u16) -> Option<Box<dyn PortIoDevice>> {
        self.devices.remove(&port)
    }

    pub fn is_mapped(&self, port: u16) -> bool {
        self.devices.contains_key(&port)
    }

    pub fn read(&mut self, port: u16, size: u8) -> u32 {
        if !matches!(size, 1 | 2 | 4) {
            return open_bus(4);
        }
        match self.devices.get_mut(&port) {
            Some(device) => {
                let value = device.read(port, size);
                trace!(port, size, value, "port read");
                value
            }
            None => {
                trace!(port, size, "read from unmapped port");
                open_bus(size)
            }
        }
    }

    pub fn write(&mut self, port: u16, size: u8, value: u32) {
        if !matches!(size, 1 | 2 | 4) {
            return;
        }
        match self.devices.get_mut(&port) {
            Some(device) => {
                trace!(port, size, value, "port write");
                device.write(port, size, value);
            }
            None => trace!(port, size, value, "write to unmapped port dropped"),
        }
    }

    pub fn reset(&mut self) {
        for device in self.devices.values_mut() {
            device.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct Latch {
        value: u32,
        resets: u32,
    }

    impl PortIoDevice for Latch {
        fn read(&mut self, _port: u16, size: u8) -> u32 {
            match size {
                1 => self.value & 0xFF,
                2 => self.value & 0xFFFF,
                _ => self.value,
            }
        }

        fn write(&mut self, _port: u16, _size: u8, value: u32) {
            self.value = value;
        }

        fn reset(&mut self) {
            self.value = 0;
            self.resets += 1;
        }
    }

    #[test]
    fn unmapped_ports_float_the_low_word() {
        let mut bus = IoPortBus::new();
        assert_eq!(bus.read(0x1234, 1), 0xFF);
        assert_eq!(bus.read(0x1234, 2), 0xFFFF);
        assert_eq!(bus.read(0x1234, 4), 0x0000_FFFF);
        bus.write(0x1234, 2, 0xBEEF);
        assert!(!bus.is_mapped(0x1234));
    }

    #[test]
    fn write_then_read_echoes_through_mapped_device() {
        let mut bus = IoPortBus::new();
        bus.register(0x80, Box::new(Latch::default()));
        bus.write(0x80, 2, 0xCAFE);
        assert_eq!(bus.read(0x80, 2), 0xCAFE);
        assert_eq!(bus.read(0x80, 1), 0xFE);
    }

    #[test]
    fn shared_device_sees_all_of_its_ports() {
        let mut bus = IoPortBus::new();
        let latch = Rc::new(RefCell::new(Latch::default()));
        bus.register_ports(&[0x60, 0x64], latch.clone());

        bus.write(0x60, 1, 0x12);
        assert_eq!(bus.read(0x64, 1), 0x12);

        bus.reset();
        assert_eq!(latch.borrow().value, 0);
        assert_eq!(latch.borrow().resets, 2);

        assert!(bus.unregister(0x60).is_some());
        assert_eq!(bus.read(0x60, 1), 0xFF);
    }

    #[test]
    fn callback_pair_receives_port_and_width() {
        let seen = Rc::new(Cell::new((0u16, 0u8, 0u32)));
        let mut bus = IoPortBus::new();
        bus.register_fn(
            &[0x3F8, 0x3F9],
            |port, size| u32::from(port) + u32::from(size),
            {
                let seen = seen.clone();
                move |port, size, value| seen.set((port, size, value))
            },
        );

        assert_eq!(bus.read(0x3F9, 1), 0x3FA);
        bus.write(0x3F8, 1, 0x41);
        assert_eq!(seen.get(), (0x3F8, 1, 0x41));
    }
}
