use x86pc_decoder::OperandSize;
use x86pc_memory::{MemoryBus, PhysicalMemory};

use crate::io::IoPortBus;

/// Everything an executing instruction can touch outside the register file.
///
/// Addresses are linear; with paging out of scope they are also physical.
pub trait CpuBus {
    fn read_u8(&mut self, addr: u32) -> u8;
    fn read_u16(&mut self, addr: u32) -> u16;
    fn read_u32(&mut self, addr: u32) -> u32;
    fn write_u8(&mut self, addr: u32, value: u8);
    fn write_u16(&mut self, addr: u32, value: u16);
    fn write_u32(&mut self, addr: u32, value: u32);

    /// Copy instruction bytes starting at `addr`.
    fn fetch(&mut self, addr: u32, buf: &mut [u8]);

    fn io_read(&mut self, port: u16, size: u8) -> u32;
    fn io_write(&mut self, port: u16, size: u8, value: u32);

    fn read_sized(&mut self, addr: u32, size: OperandSize) -> u32 {
        match size {
            OperandSize::Bits8 => u32::from(self.read_u8(addr)),
            OperandSize::Bits16 => u32::from(self.read_u16(addr)),
            OperandSize::Bits32 => self.read_u32(addr),
        }
    }

    fn write_sized(&mut self, addr: u32, size: OperandSize, value: u32) {
        match size {
            OperandSize::Bits8 => self.write_u8(addr, value as u8),
            OperandSize::Bits16 => self.write_u16(addr, value as u16),
            OperandSize::Bits32 => self.write_u32(addr, value),
        }
    }
}

/// Guest memory plus the port map, as seen by the CPU.
#[derive(Debug)]
pub struct SystemBus<M = PhysicalMemory> {
    pub memory: M,
    pub io: IoPortBus,
}

impl<M> SystemBus<M> {
    pub fn new(memory: M, io: IoPortBus) -> Self {
        Self { memory, io }
    }
}

impl SystemBus<PhysicalMemory> {
    /// Zeroed RAM of `size` bytes and an empty port map.
    pub fn with_ram(size: usize) -> Self {
        Self::new(PhysicalMemory::new(size), IoPortBus::new())
    }
}

impl<M: MemoryBus> CpuBus for SystemBus<M> {
    #[inline]
    fn read_u8(&mut self, addr: u32) -> u8 {
        self.memory.read_u8(u64::from(addr))
    }

    #[inline]
    fn read_u16(&mut self, addr: u32) -> u16 {
        self.memory.read_u16(u64::from(addr))
    }

    #[inline]
    fn read_u32(&mut self, addr: u32) -> u32 {
        self.memory.read_u32(u64::from(addr))
    }

    #[inline]
    fn write_u8(&mut self, addr: u32, value: u8) {
        self.memory.write_u8(u64::from(addr), value)
    }

    #[inline]
    fn write_u16(&mut self, addr: u32, value: u16) {
        self.memory.write_u16(u64::from(addr), value)
    }

    #[inline]
    fn write_u32(&mut self, addr: u32, value: u32) {
        self.memory.write_u32(u64::from(addr), value)
    }

    fn fetch(&mut self, addr: u32, buf: &mut [u8]) {
        self.memory.read_bytes(u64::from(addr), buf)
    }

    fn io_read(&mut self, port: u16, size: u8) -> u32 {
        self.io.read(port, size)
    }

    fn io_write(&mut self, port: u16, size: u8, value: u32) {
        self.io.write(port, size, value)
    }
}
