//! Arithmetic/logic unit.
//!
//! Every operation is a pure function over 32-bit signed operands returning
//! `(result, flags)`. The flag rules reproduce the hardware contract:
//!
//! - `Z`: result is zero. `N`: sign bit of the result.
//! - `add`: `C` and `O` on two's-complement wraparound (operand signs agree,
//!   result sign differs).
//! - `sub`: `C` is the unsigned borrow (`a < b` unsigned); `O` when operand
//!   signs differ and the result sign differs from the first operand's.
//! - `mul`: computed in 64 bits; `C = O` = result does not fit in 32 bits.
//! - `div`: `O` only for `i32::MIN / -1`; division by zero is an error.
//! - `shl`/`shr`: `C` is the last bit shifted out; counts taken mod 32.
//! - Bitwise ops never set `C` or `O`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Condition flags produced by an ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Flags {
    /// Result is zero.
    pub z: bool,
    /// Result is negative.
    pub n: bool,
    /// Carry / borrow / shifted-out bit.
    pub c: bool,
    /// Signed overflow.
    pub o: bool,
}

impl Flags {
    fn from_result(result: i32) -> Self {
        Self {
            z: result == 0,
            n: result < 0,
            c: false,
            o: false,
        }
    }
}

/// Errors raised by ALU operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AluError {
    #[error("division by zero")]
    DivisionByZero,
}

pub fn add(a: i32, b: i32) -> (i32, Flags) {
    let result = a.wrapping_add(b);
    let mut flags = Flags::from_result(result);
    // Both operands non-negative with a negative sum, or both negative with
    // a non-negative sum: the sum wrapped.
    let wrapped = (a >= 0 && b >= 0 && result < 0) || (a < 0 && b < 0 && result >= 0);
    flags.c = wrapped;
    flags.o = wrapped;
    (result, flags)
}

pub fn sub(a: i32, b: i32) -> (i32, Flags) {
    let result = a.wrapping_sub(b);
    let mut flags = Flags::from_result(result);
    flags.c = (a as u32) < (b as u32);
    flags.o = (a < 0) != (b < 0) && (result < 0) != (a < 0);
    (result, flags)
}

pub fn mul(a: i32, b: i32) -> (i32, Flags) {
    let wide = a as i64 * b as i64;
    let result = wide as i32;
    let mut flags = Flags::from_result(result);
    let truncated = wide != result as i64;
    flags.c = truncated;
    flags.o = truncated;
    (result, flags)
}

pub fn div(a: i32, b: i32) -> Result<(i32, Flags), AluError> {
    if b == 0 {
        return Err(AluError::DivisionByZero);
    }
    let result = a.wrapping_div(b);
    let mut flags = Flags::from_result(result);
    flags.o = a == i32::MIN && b == -1;
    Ok((result, flags))
}

pub fn and(a: i32, b: i32) -> (i32, Flags) {
    let result = a & b;
    (result, Flags::from_result(result))
}

pub fn or(a: i32, b: i32) -> (i32, Flags) {
    let result = a | b;
    (result, Flags::from_result(result))
}

pub fn xor(a: i32, b: i32) -> (i32, Flags) {
    let result = a ^ b;
    (result, Flags::from_result(result))
}

pub fn not(a: i32) -> (i32, Flags) {
    let result = !a;
    (result, Flags::from_result(result))
}

/// Logical shift left. The carry is the bit at position `31 - count` of the
/// original operand, the last one pushed out of the word.
pub fn shl(a: i32, count: i32) -> (i32, Flags) {
    let count = count as u32 & 31;
    let result = ((a as u32) << count) as i32;
    let mut flags = Flags::from_result(result);
    if count > 0 {
        flags.c = (a as u32) >> (31 - count) & 1 != 0;
    }
    (result, flags)
}

/// Arithmetic shift right. The carry is the bit at position `count - 1` of
/// the original operand.
pub fn shr(a: i32, count: i32) -> (i32, Flags) {
    let count = count as u32 & 31;
    let result = a >> count;
    let mut flags = Flags::from_result(result);
    if count > 0 {
        flags.c = (a as u32) >> (count - 1) & 1 != 0;
    }
    (result, flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_add_basic() {
        let (r, f) = add(5, 3);
        assert_eq!(r, 8);
        assert_eq!(f, Flags { z: false, n: false, c: false, o: false });
    }

    #[test]
    fn test_add_zero_flag() {
        let (r, f) = add(7, -7);
        assert_eq!(r, 0);
        assert!(f.z);
        assert!(!f.n);
    }

    #[test]
    fn test_add_positive_overflow() {
        let (r, f) = add(i32::MAX, 1);
        assert_eq!(r, i32::MIN);
        assert!(f.c);
        assert!(f.o);
        assert!(f.n);
    }

    #[test]
    fn test_add_negative_overflow() {
        let (r, f) = add(i32::MIN, -1);
        assert_eq!(r, i32::MAX);
        assert!(f.c);
        assert!(f.o);
    }

    #[test]
    fn test_sub_borrow_is_unsigned_compare() {
        let (_, f) = sub(3, 5);
        assert!(f.c);
        let (_, f) = sub(5, 3);
        assert!(!f.c);
        // -1 is u32::MAX, so no borrow against small positives.
        let (_, f) = sub(-1, 5);
        assert!(!f.c);
    }

    #[test]
    fn test_sub_overflow() {
        let (r, f) = sub(i32::MAX, -1);
        assert_eq!(r, i32::MIN);
        assert!(f.o);
        let (_, f) = sub(5, 3);
        assert!(!f.o);
    }

    #[test]
    fn test_mul_fit_and_truncation() {
        let (r, f) = mul(123, 456);
        assert_eq!(r, 56088);
        assert!(!f.c && !f.o);

        let (_, f) = mul(1 << 20, 1 << 20);
        assert!(f.c);
        assert!(f.o);
    }

    #[test]
    fn test_div_by_zero() {
        assert_eq!(div(42, 0), Err(AluError::DivisionByZero));
    }

    #[test]
    fn test_div_min_by_minus_one() {
        let (r, f) = div(i32::MIN, -1).unwrap();
        assert_eq!(r, i32::MIN);
        assert!(f.o);
        assert!(!f.c);
    }

    #[test]
    fn test_div_basic() {
        let (r, f) = div(-9, 2).unwrap();
        assert_eq!(r, -4);
        assert!(f.n);
        assert!(!f.o);
    }

    #[test]
    fn test_bitwise_never_carry() {
        for (r, f) in [and(-1, 0x0f), or(0, 0), xor(-1, -1), not(0)] {
            let _ = r;
            assert!(!f.c);
            assert!(!f.o);
        }
        assert!(or(0, 0).1.z);
        assert!(not(0).1.n);
    }

    #[test]
    fn test_shl_carry() {
        // Bit 31 - 1 = bit 30 of the operand.
        let (_, f) = shl(1 << 30, 1);
        assert!(f.c);
        let (_, f) = shl(1, 1);
        assert!(!f.c);
        let (_, f) = shl(-1, 0);
        assert!(!f.c);
    }

    #[test]
    fn test_shr_carry_and_sign() {
        // Bit 0 of -3 (0xFFFF_FFFD) is shifted out.
        let (r, f) = shr(-3, 1);
        assert_eq!(r, -2); // arithmetic shift keeps the sign
        assert!(f.c);
        // Bit 0 of -2 (0xFFFF_FFFE) is clear, so no carry.
        let (r, f) = shr(-2, 1);
        assert_eq!(r, -1);
        assert!(!f.c);
        let (_, f) = shr(4, 1);
        assert!(!f.c);
        let (_, f) = shr(4, 0);
        assert!(!f.c);
    }

    proptest! {
        /// Carry/overflow for add, checked against a 64-bit reference model.
        #[test]
        fn prop_add_flags_match_wide_model(a in any::<i32>(), b in any::<i32>()) {
            let (r, f) = add(a, b);
            let wide = a as i64 + b as i64;
            prop_assert_eq!(r, wide as i32);
            prop_assert_eq!(f.o, wide != r as i64);
            prop_assert_eq!(f.c, wide != r as i64);
            prop_assert_eq!(f.z, r == 0);
            prop_assert_eq!(f.n, r < 0);
        }

        #[test]
        fn prop_sub_flags_match_wide_model(a in any::<i32>(), b in any::<i32>()) {
            let (r, f) = sub(a, b);
            let wide = a as i64 - b as i64;
            prop_assert_eq!(r, wide as i32);
            prop_assert_eq!(f.c, (a as u32) < (b as u32));
            prop_assert_eq!(f.o, wide != r as i64);
        }

        #[test]
        fn prop_mul_truncation_flag(a in any::<i32>(), b in any::<i32>()) {
            let (r, f) = mul(a, b);
            let wide = a as i64 * b as i64;
            prop_assert_eq!(r, wide as i32);
            prop_assert_eq!(f.c, wide != r as i64);
        }
    }
}
