use thiserror::Error;

use crate::MemoryBus;

/// Size of the real-mode addressable window (`0xFFFF << 4` rounded up).
pub const REAL_MODE_SPAN: usize = 0x10_0000;

/// Value returned for reads that fall outside installed RAM.
const OPEN_BUS: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("guest memory access out of range: addr=0x{addr:x} len={len} size=0x{size:x}")]
    OutOfRange { addr: u64, len: usize, size: usize },
}

/// A single contiguous block of guest RAM starting at physical address 0.
#[derive(Clone)]
pub struct PhysicalMemory {
    data: Vec<u8>,
}

impl PhysicalMemory {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Zero all of RAM.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    fn check_range(&self, addr: u64, len: usize) -> Result<usize, MemoryError> {
        let err = MemoryError::OutOfRange {
            addr,
            len,
            size: self.data.len(),
        };
        let start = usize::try_from(addr).map_err(|_| err)?;
        let end = start.checked_add(len).ok_or(err)?;
        if end > self.data.len() {
            return Err(err);
        }
        Ok(start)
    }

    /// Copy `buf.len()` bytes starting at `addr` into `buf`.
    pub fn block_read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        let start = self.check_range(addr, buf.len())?;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    /// Copy `buf` into guest RAM at `addr`. The whole range must be backed.
    pub fn block_write(&mut self, addr: u64, buf: &[u8]) -> Result<(), MemoryError> {
        let start = self.check_range(addr, buf.len())?;
        self.data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

impl std::fmt::Debug for PhysicalMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalMemory")
            .field("size", &self.data.len())
            .finish()
    }
}

impl MemoryBus for PhysicalMemory {
    fn read_bytes(&mut self, addr: u64, buf: &mut [u8]) {
        if let Ok(start) = self.check_range(addr, buf.len()) {
            buf.copy_from_slice(&self.data[start..start + buf.len()]);
            return;
        }
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = usize::try_from(addr.wrapping_add(i as u64))
                .ok()
                .and_then(|a| self.data.get(a).copied())
                .unwrap_or(OPEN_BUS);
        }
    }

    fn write_bytes(&mut self, addr: u64, buf: &[u8]) {
        if let Ok(start) = self.check_range(addr, buf.len()) {
            self.data[start..start + buf.len()].copy_from_slice(buf);
            return;
        }
        for (i, &byte) in buf.iter().enumerate() {
            let slot = usize::try_from(addr.wrapping_add(i as u64))
                .ok()
                .and_then(|a| self.data.get_mut(a));
            if let Some(slot) = slot {
                *slot = byte;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_accesses_are_little_endian() {
        let mut mem = PhysicalMemory::new(0x100);
        mem.write_u32(0x10, 0x1122_3344);
        assert_eq!(&mem.as_slice()[0x10..0x14], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(mem.read_u16(0x11), 0x2233);
        assert_eq!(mem.read_u8(0x13), 0x11);
    }

    #[test]
    fn reads_past_end_float_high_and_writes_are_dropped() {
        let mut mem = PhysicalMemory::new(0x10);
        mem.write_u8(0x0F, 0xAB);
        assert_eq!(mem.read_u16(0x0F), 0xFFAB);
        assert_eq!(mem.read_u32(0x1000), 0xFFFF_FFFF);

        mem.write_u16(0x0F, 0x1234);
        assert_eq!(mem.as_slice()[0x0F], 0x34);
        assert_eq!(mem.size(), 0x10);
    }

    #[test]
    fn block_write_rejects_partial_ranges() {
        let mut mem = PhysicalMemory::new(0x10);
        let err = mem.block_write(0x0C, &[0; 8]).unwrap_err();
        assert_eq!(
            err,
            MemoryError::OutOfRange {
                addr: 0x0C,
                len: 8,
                size: 0x10
            }
        );
        assert!(mem.as_slice().iter().all(|&b| b == 0));

        mem.block_write(0x08, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut out = [0u8; 4];
        mem.block_read(0x0A, &mut out).unwrap();
        assert_eq!(out, [3, 4, 5, 6]);
    }
}
