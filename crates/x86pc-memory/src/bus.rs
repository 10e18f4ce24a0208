/// Guest physical address space as seen by the CPU core and firmware loader.
///
/// Every access completes. Bytes with no backing storage read as open bus
/// (0xFF) and writes to them vanish, so a multi-byte access straddling the top
/// of RAM returns a mix of real and floating bytes. Scalars are little-endian.
pub trait MemoryBus {
    fn read_bytes(&mut self, addr: u64, buf: &mut [u8]);
    fn write_bytes(&mut self, addr: u64, buf: &[u8]);

    fn read_u8(&mut self, addr: u64) -> u8 {
        read_le::<_, 1>(self, addr)[0]
    }

    fn read_u16(&mut self, addr: u64) -> u16 {
        u16::from_le_bytes(read_le(self, addr))
    }

    fn read_u32(&mut self, addr: u64) -> u32 {
        u32::from_le_bytes(read_le(self, addr))
    }

    fn write_u8(&mut self, addr: u64, value: u8) {
        self.write_bytes(addr, &[value]);
    }

    fn write_u16(&mut self, addr: u64, value: u16) {
        self.write_bytes(addr, &value.to_le_bytes());
    }

    fn write_u32(&mut self, addr: u64, value: u32) {
        self.write_bytes(addr, &value.to_le_bytes());
    }
}

fn read_le<M: MemoryBus + ?Sized, const N: usize>(bus: &mut M, addr: u64) -> [u8; N] {
    let mut raw = [0u8; N];
    bus.read_bytes(addr, &mut raw);
    raw
}

impl<T: MemoryBus + ?Sized> MemoryBus for &mut T {
    fn read_bytes(&mut self, addr: u64, buf: &mut [u8]) {
        (**self).read_bytes(addr, buf)
    }

    fn write_bytes(&mut self, addr: u64, buf: &[u8]) {
        (**self).write_bytes(addr, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records the last access and answers reads with the low address byte.
    #[derive(Default)]
    struct Recorder {
        last_write: Option<(u64, Vec<u8>)>,
    }

    impl MemoryBus for Recorder {
        fn read_bytes(&mut self, addr: u64, buf: &mut [u8]) {
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = addr.wrapping_add(i as u64) as u8;
            }
        }

        fn write_bytes(&mut self, addr: u64, buf: &[u8]) {
            self.last_write = Some((addr, buf.to_vec()));
        }
    }

    #[test]
    fn scalars_go_through_one_block_access() {
        let mut bus = Recorder::default();
        assert_eq!(bus.read_u32(0x10), 0x1312_1110);
        assert_eq!(bus.read_u16(0xFF), 0x00FF);

        fn store<M: MemoryBus>(mut bus: M) {
            bus.write_u16(0x40, 0xBEEF);
        }
        store(&mut bus);
        assert_eq!(bus.last_write, Some((0x40, vec![0xEF, 0xBE])));
    }
}
