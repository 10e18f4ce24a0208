#![cfg(not(target_arch = "wasm32"))]

use proptest::prelude::*;
use x86pc_cpu_core::alu;
use x86pc_cpu_core::decoder::OperandSize;
use x86pc_cpu_core::flags::{parity, Flags};

fn narrow_size() -> impl Strategy<Value = OperandSize> {
    prop_oneof![Just(OperandSize::Bits8), Just(OperandSize::Bits16)]
}

fn sized_pair() -> impl Strategy<Value = (OperandSize, u32, u32)> {
    narrow_size().prop_flat_map(|size| {
        let max = size.mask();
        (Just(size), 0..=max, 0..=max)
    })
}

proptest! {
    #[test]
    fn sub_undoes_add((size, a, b) in sized_pair()) {
        let mut flags = Flags::empty();
        let sum = alu::add(&mut flags, a, b, false, size);
        let back = alu::sub(&mut flags, sum, b, false, size);
        prop_assert_eq!(back, a);
    }

    #[test]
    fn results_stay_within_operand_width((size, a, b) in sized_pair()) {
        let mut flags = Flags::empty();
        let max = size.mask();
        prop_assert!(alu::add(&mut flags, a, b, true, size) <= max);
        prop_assert!(alu::sub(&mut flags, a, b, true, size) <= max);
        prop_assert!(alu::logic(&mut flags, a & b, size) <= max);
        prop_assert!(alu::logic(&mut flags, a | b, size) <= max);
        prop_assert!(alu::logic(&mut flags, a ^ b, size) <= max);
    }

    #[test]
    fn inc_then_dec_restores_value_and_carry((size, a, _b) in sized_pair(), carry in any::<bool>()) {
        let mut flags = Flags::empty();
        flags.set(Flags::CF, carry);
        let up = alu::inc(&mut flags, a, size);
        prop_assert_eq!(flags.contains(Flags::CF), carry);
        let down = alu::dec(&mut flags, up, size);
        prop_assert_eq!(down, a);
        prop_assert_eq!(flags.contains(Flags::CF), carry);
    }

    #[test]
    fn add_carry_matches_unsigned_overflow((size, a, b) in sized_pair()) {
        let mut flags = Flags::empty();
        alu::add(&mut flags, a, b, false, size);
        prop_assert_eq!(flags.contains(Flags::CF), a + b > size.mask());
        alu::sub(&mut flags, a, b, false, size);
        prop_assert_eq!(flags.contains(Flags::CF), a < b);
    }
}

#[test]
fn parity_flag_tracks_even_bit_count_for_every_byte() {
    for byte in 0..=255u8 {
        let expected = byte.count_ones() % 2 == 0;
        assert_eq!(parity(byte), expected, "byte {byte:#04x}");

        let mut flags = Flags::empty();
        alu::logic(&mut flags, u32::from(byte) | 0x100, OperandSize::Bits16);
        assert_eq!(flags.contains(Flags::PF), expected, "byte {byte:#04x}");
    }
}

#[test]
fn and_defines_parity_like_or_and_xor() {
    let mut flags = Flags::empty();
    alu::logic(&mut flags, 0x0F & 0x03, OperandSize::Bits8);
    assert!(flags.contains(Flags::PF));
    alu::logic(&mut flags, 0x0F & 0x01, OperandSize::Bits8);
    assert!(!flags.contains(Flags::PF));
}
