use bitflags::bitflags;

bitflags! {
    /// EFLAGS.
    ///
    /// Bit 1 is architecturally reserved and always reads as one; it is not
    /// stored here and is only materialized by [`Flags::to_image`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u32 {
        const CF = 1 << 0;
        const PF = 1 << 2;
        const AF = 1 << 4;
        const ZF = 1 << 6;
        const SF = 1 << 7;
        const TF = 1 << 8;
        const IF = 1 << 9;
        const DF = 1 << 10;
        const OF = 1 << 11;
        /// Two-bit I/O privilege level field.
        const IOPL = 0b11 << 12;
        const NT = 1 << 14;
        const RF = 1 << 16;
        const VM = 1 << 17;
        const AC = 1 << 18;
        const VIF = 1 << 19;
        const VIP = 1 << 20;
        const ID = 1 << 21;
    }
}

const RESERVED_ONE: u32 = 1 << 1;
const IOPL_SHIFT: u32 = 12;

impl Flags {
    /// Arithmetic status flags written by ALU operations.
    pub const STATUS: Flags = Flags::CF
        .union(Flags::PF)
        .union(Flags::AF)
        .union(Flags::ZF)
        .union(Flags::SF)
        .union(Flags::OF);

    /// Value after processor reset.
    pub const RESET: Flags = Flags::ZF.union(Flags::IF);

    pub const fn iopl(self) -> u8 {
        ((self.bits() >> IOPL_SHIFT) & 0b11) as u8
    }

    pub fn set_iopl(&mut self, level: u8) {
        *self = Flags::from_bits_truncate(
            (self.bits() & !Flags::IOPL.bits()) | (u32::from(level & 0b11) << IOPL_SHIFT),
        );
    }

    /// The image stored by PUSHF and interrupt frames.
    pub const fn to_image(self) -> u32 {
        self.bits() | RESERVED_ONE
    }

    /// Decode a stored image, dropping reserved bits.
    pub const fn from_image(image: u32) -> Flags {
        Flags::from_bits_truncate(image)
    }
}

/// Even parity of the low byte, as reported by PF.
#[inline]
pub fn parity(byte: u8) -> bool {
    byte.count_ones() % 2 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iopl_is_a_two_bit_field() {
        let mut flags = Flags::RESET;
        flags.set_iopl(3);
        assert_eq!(flags.iopl(), 3);
        assert_eq!(flags.bits() & 0x3000, 0x3000);
        flags.set_iopl(1);
        assert_eq!(flags.iopl(), 1);
        assert!(flags.contains(Flags::RESET));
    }

    #[test]
    fn setting_if_leaves_overflow_alone() {
        let mut flags = Flags::empty();
        flags.set(Flags::IF, true);
        assert_eq!(flags, Flags::IF);
        assert!(!flags.contains(Flags::OF));
        flags.set(Flags::IF, false);
        assert!(flags.is_empty());
    }

    #[test]
    fn image_has_reserved_bit_set() {
        assert_eq!(Flags::RESET.to_image(), 0x0242);
        assert_eq!(Flags::from_image(0xFFFF_FFFF).bits() & 0b10, 0);
    }
}
