//! Flag-exact integer arithmetic.
//!
//! Every function takes operands already truncated or truncates them to
//! `size`, returns the truncated result and updates only the flags the
//! instruction defines. Flags the architecture leaves undefined are left
//! untouched.

use x86pc_decoder::OperandSize;

use crate::exception::Exception;
use crate::flags::{parity, Flags};

#[inline]
fn msb(value: u32, size: OperandSize) -> bool {
    value & size.sign_bit() != 0
}

fn sign_extend(value: u32, size: OperandSize) -> i64 {
    let shift = 64 - size.bits();
    (((value as u64) << shift) as i64) >> shift
}

/// Set SF, ZF and PF from a truncated result.
pub fn set_szp(flags: &mut Flags, result: u32, size: OperandSize) {
    flags.set(Flags::ZF, result & size.mask() == 0);
    flags.set(Flags::SF, msb(result, size));
    flags.set(Flags::PF, parity(result as u8));
}

pub fn add(flags: &mut Flags, dst: u32, src: u32, carry_in: bool, size: OperandSize) -> u32 {
    let mask = size.mask();
    let dst = dst & mask;
    let src = src & mask;
    let full = u64::from(dst) + u64::from(src) + u64::from(carry_in);
    let result = full as u32 & mask;

    flags.set(Flags::CF, full > u64::from(mask));
    flags.set(Flags::OF, msb((dst ^ result) & (src ^ result), size));
    flags.set(Flags::AF, (dst ^ src ^ result) & 0x10 != 0);
    set_szp(flags, result, size);
    result
}

pub fn sub(flags: &mut Flags, dst: u32, src: u32, borrow_in: bool, size: OperandSize) -> u32 {
    let mask = size.mask();
    let dst = dst & mask;
    let src = src & mask;
    let subtrahend = u64::from(src) + u64::from(borrow_in);
    let result = u64::from(dst).wrapping_sub(subtrahend) as u32 & mask;

    flags.set(Flags::CF, u64::from(dst) < subtrahend);
    flags.set(Flags::OF, msb((dst ^ src) & (dst ^ result), size));
    flags.set(Flags::AF, (dst ^ src ^ result) & 0x10 != 0);
    set_szp(flags, result, size);
    result
}

/// Flags for AND/OR/XOR/TEST: CF and OF cleared, SF/ZF/PF from the result.
pub fn logic(flags: &mut Flags, result: u32, size: OperandSize) -> u32 {
    let result = result & size.mask();
    flags.remove(Flags::CF | Flags::OF);
    set_szp(flags, result, size);
    result
}

/// INC leaves CF alone.
pub fn inc(flags: &mut Flags, value: u32, size: OperandSize) -> u32 {
    let cf = flags.contains(Flags::CF);
    let result = add(flags, value, 1, false, size);
    flags.set(Flags::CF, cf);
    result
}

/// DEC leaves CF alone.
pub fn dec(flags: &mut Flags, value: u32, size: OperandSize) -> u32 {
    let cf = flags.contains(Flags::CF);
    let result = sub(flags, value, 1, false, size);
    flags.set(Flags::CF, cf);
    result
}

pub fn neg(flags: &mut Flags, value: u32, size: OperandSize) -> u32 {
    let result = sub(flags, 0, value, false, size);
    flags.set(Flags::CF, value & size.mask() != 0);
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftKind {
    Shl,
    Shr,
    Sar,
}

/// SHL/SAL, SHR and SAR.
///
/// The count is masked to five bits. A masked count of zero changes nothing.
/// OF is written only for a count of one.
pub fn shift(flags: &mut Flags, kind: ShiftKind, value: u32, count: u32, size: OperandSize) -> u32 {
    let count = count & 0x1F;
    let mask = size.mask();
    let original = value & mask;
    if count == 0 {
        return original;
    }

    let sign = size.sign_bit();
    let mut result = original;
    let mut cf = false;
    for _ in 0..count {
        match kind {
            ShiftKind::Shl => {
                cf = result & sign != 0;
                result = (result << 1) & mask;
            }
            ShiftKind::Shr => {
                cf = result & 1 != 0;
                result >>= 1;
            }
            ShiftKind::Sar => {
                cf = result & 1 != 0;
                result = (result >> 1) | (result & sign);
            }
        }
    }

    flags.set(Flags::CF, cf);
    if count == 1 {
        let of = match kind {
            ShiftKind::Shl => msb(result, size) != cf,
            ShiftKind::Shr => msb(original, size),
            ShiftKind::Sar => false,
        };
        flags.set(Flags::OF, of);
    }
    set_szp(flags, result, size);
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateKind {
    Rol,
    Ror,
    Rcl,
    Rcr,
}

/// ROL, ROR, RCL and RCR. Only CF and (for a count of one) OF change.
pub fn rotate(
    flags: &mut Flags,
    kind: RotateKind,
    value: u32,
    count: u32,
    size: OperandSize,
) -> u32 {
    let count = count & 0x1F;
    let mask = size.mask();
    let bits = size.bits();
    let value = value & mask;
    if count == 0 {
        return value;
    }

    let wide = u64::from(value);
    let (result, cf) = match kind {
        RotateKind::Rol => {
            let n = count % bits;
            let r = ((wide << n) | (wide >> ((bits - n) % bits))) as u32 & mask;
            (r, r & 1 != 0)
        }
        RotateKind::Ror => {
            let n = count % bits;
            let r = ((wide >> n) | (wide << ((bits - n) % bits))) as u32 & mask;
            (r, msb(r, size))
        }
        RotateKind::Rcl | RotateKind::Rcr => {
            let n = count % (bits + 1);
            let mut r = value;
            let mut cf = flags.contains(Flags::CF);
            for _ in 0..n {
                if kind == RotateKind::Rcl {
                    let out = msb(r, size);
                    r = ((r << 1) | u32::from(cf)) & mask;
                    cf = out;
                } else {
                    let out = r & 1 != 0;
                    r = (r >> 1) | (u32::from(cf) << (bits - 1));
                    cf = out;
                }
            }
            (r, cf)
        }
    };

    if count == 1 {
        let of = match kind {
            RotateKind::Rol | RotateKind::Rcl => msb(result, size) != cf,
            RotateKind::Ror | RotateKind::Rcr => {
                msb(result, size) != (result & (size.sign_bit() >> 1) != 0)
            }
        };
        flags.set(Flags::OF, of);
    }
    flags.set(Flags::CF, cf);
    result
}

/// Unsigned multiply. Returns `(low, high)` halves of the double-width
/// product; CF=OF=1 iff the high half is nonzero.
pub fn mul(flags: &mut Flags, a: u32, b: u32, size: OperandSize) -> (u32, u32) {
    let mask = size.mask();
    let product = u64::from(a & mask) * u64::from(b & mask);
    let low = product as u32 & mask;
    let high = (product >> size.bits()) as u32 & mask;
    flags.set(Flags::CF | Flags::OF, high != 0);
    (low, high)
}

/// Signed multiply. CF=OF=1 iff the product does not fit in `size` bits.
pub fn imul(flags: &mut Flags, a: u32, b: u32, size: OperandSize) -> (u32, u32) {
    let product = sign_extend(a, size) * sign_extend(b, size);
    let mask = size.mask();
    let low = product as u32 & mask;
    let high = (product >> size.bits()) as u32 & mask;
    flags.set(Flags::CF | Flags::OF, sign_extend(low, size) != product);
    (low, high)
}

/// Unsigned divide of a double-width dividend. Returns `(quotient, remainder)`.
pub fn div(dividend: u64, divisor: u32, size: OperandSize) -> Result<(u32, u32), Exception> {
    let divisor = u64::from(divisor & size.mask());
    if divisor == 0 {
        return Err(Exception::DivideError);
    }
    let quotient = dividend / divisor;
    if quotient > u64::from(size.mask()) {
        return Err(Exception::DivideError);
    }
    Ok((quotient as u32, (dividend % divisor) as u32))
}

/// Signed divide, truncating toward zero. The dividend is `2 * size` bits.
pub fn idiv(dividend: u64, divisor: u32, size: OperandSize) -> Result<(u32, u32), Exception> {
    let wide_bits = 2 * size.bits();
    let dividend = if wide_bits == 64 {
        dividend as i64
    } else {
        ((dividend << (64 - wide_bits)) as i64) >> (64 - wide_bits)
    };
    let divisor = sign_extend(divisor, size);
    if divisor == 0 {
        return Err(Exception::DivideError);
    }
    let quotient = dividend
        .checked_div(divisor)
        .ok_or(Exception::DivideError)?;
    let remainder = dividend
        .checked_rem(divisor)
        .ok_or(Exception::DivideError)?;

    let max = i64::from(size.sign_bit()) - 1;
    let min = -i64::from(size.sign_bit());
    if quotient > max || quotient < min {
        return Err(Exception::DivideError);
    }
    let mask = size.mask();
    Ok((quotient as u32 & mask, remainder as u32 & mask))
}

pub fn daa(flags: &mut Flags, al: u8) -> u8 {
    let old_al = al;
    let old_cf = flags.contains(Flags::CF);
    let mut al = al;
    let mut cf = false;

    if al & 0x0F > 9 || flags.contains(Flags::AF) {
        let (sum, carry) = al.overflowing_add(6);
        al = sum;
        cf = old_cf || carry;
        flags.insert(Flags::AF);
    } else {
        flags.remove(Flags::AF);
    }
    if old_al > 0x99 || old_cf {
        al = al.wrapping_add(0x60);
        cf = true;
    }

    flags.set(Flags::CF, cf);
    set_szp(flags, u32::from(al), OperandSize::Bits8);
    al
}

pub fn das(flags: &mut Flags, al: u8) -> u8 {
    let old_al = al;
    let old_cf = flags.contains(Flags::CF);
    let mut al = al;
    let mut cf = false;

    if al & 0x0F > 9 || flags.contains(Flags::AF) {
        let (diff, borrow) = al.overflowing_sub(6);
        al = diff;
        cf = old_cf || borrow;
        flags.insert(Flags::AF);
    } else {
        flags.remove(Flags::AF);
    }
    if old_al > 0x99 || old_cf {
        al = al.wrapping_sub(0x60);
        cf = true;
    }

    flags.set(Flags::CF, cf);
    set_szp(flags, u32::from(al), OperandSize::Bits8);
    al
}

/// ASCII adjust after addition, on AX.
pub fn aaa(flags: &mut Flags, ax: u16) -> u16 {
    let adjust = (ax & 0x0F) > 9 || flags.contains(Flags::AF);
    let ax = if adjust { ax.wrapping_add(0x106) } else { ax };
    flags.set(Flags::AF | Flags::CF, adjust);
    ax & 0xFF0F
}

/// ASCII adjust after subtraction, on AX.
pub fn aas(flags: &mut Flags, ax: u16) -> u16 {
    let adjust = (ax & 0x0F) > 9 || flags.contains(Flags::AF);
    let ax = if adjust {
        let al = (ax as u8).wrapping_sub(6);
        let ah = ((ax >> 8) as u8).wrapping_sub(1);
        (u16::from(ah) << 8) | u16::from(al)
    } else {
        ax
    };
    flags.set(Flags::AF | Flags::CF, adjust);
    ax & 0xFF0F
}

/// ASCII adjust after multiply: AH = AL / base, AL = AL % base.
pub fn aam(flags: &mut Flags, al: u8, base: u8) -> Result<u16, Exception> {
    if base == 0 {
        return Err(Exception::DivideError);
    }
    let ah = al / base;
    let al = al % base;
    set_szp(flags, u32::from(al), OperandSize::Bits8);
    Ok((u16::from(ah) << 8) | u16::from(al))
}

/// ASCII adjust before division: AL = AL + AH * base, AH = 0.
pub fn aad(flags: &mut Flags, ax: u16, base: u8) -> u16 {
    let al = (ax as u8).wrapping_add(((ax >> 8) as u8).wrapping_mul(base));
    set_szp(flags, u32::from(al), OperandSize::Bits8);
    u16::from(al)
}
