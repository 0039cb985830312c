//! Scalar arithmetic modulo a word-sized prime, built on Barrett reduction.
//!
//! Every routine assumes the modulus is at most 61 bits; most additionally
//! require at least one operand to be already reduced. The conditions are the
//! classical Harvey/Barrett ones and are stated per function.

use crate::modulus::Modulus;

use super::numth;

/// `operand` must be at most modulus.
#[inline]
pub fn negate_mod(operand: u64, modulus: &Modulus) -> u64 {
    if operand == 0 {
        0
    } else {
        modulus.value() - operand
    }
}

/// `operand1 + operand2` must not exceed `2 * modulus - 1`.
#[inline]
pub fn add_mod(operand1: u64, operand2: u64, modulus: &Modulus) -> u64 {
    let sum = operand1 + operand2;
    if sum >= modulus.value() {
        sum - modulus.value()
    } else {
        sum
    }
}

/// `operand1` and `operand2` must be reduced.
#[inline]
pub fn sub_mod(operand1: u64, operand2: u64, modulus: &Modulus) -> u64 {
    let (diff, borrow) = operand1.overflowing_sub(operand2);
    if borrow {
        diff.wrapping_add(modulus.value())
    } else {
        diff
    }
}

/// Halves an even value in `[0, 2q-2]` or an odd value in `[0, q-2]`.
#[inline]
pub fn div2_mod(operand: u64, modulus: &Modulus) -> u64 {
    if operand & 1 != 0 {
        let (sum, carry) = operand.overflowing_add(modulus.value());
        let half = sum >> 1;
        if carry {
            half | (1 << 63)
        } else {
            half
        }
    } else {
        operand >> 1
    }
}

/// Barrett reduction of a full word.
#[inline]
pub fn barrett_reduce(input: u64, modulus: &Modulus) -> u64 {
    // floor(input * floor(2^64 / q) / 2^64) misses the true quotient by at
    // most one, so a single conditional subtraction suffices.
    let q_hat = ((input as u128 * modulus.const_ratio()[1] as u128) >> 64) as u64;
    let r = input - q_hat * modulus.value();
    if r >= modulus.value() {
        r - modulus.value()
    } else {
        r
    }
}

/// Barrett reduction of a 128-bit value.
pub fn barrett_reduce_u128(input: u128, modulus: &Modulus) -> u64 {
    let lo = input as u64;
    let hi = (input >> 64) as u64;
    let ratio = modulus.const_ratio();

    // 192-bit estimate of input * floor(2^128 / q) / 2^128, keeping only the
    // word that matters.
    let carry = ((lo as u128 * ratio[0] as u128) >> 64) as u64;
    let tmp = lo as u128 * ratio[1] as u128;
    let (mid, c) = (tmp as u64).overflowing_add(carry);
    let tmp_hi = (tmp >> 64) as u64 + c as u64;

    let tmp2 = hi as u128 * ratio[0] as u128;
    let (_, c2) = mid.overflowing_add(tmp2 as u64);
    let carry2 = (tmp2 >> 64) as u64 + c2 as u64;

    let q_hat = hi
        .wrapping_mul(ratio[1])
        .wrapping_add(tmp_hi)
        .wrapping_add(carry2);

    let r = lo.wrapping_sub(q_hat.wrapping_mul(modulus.value()));
    if r >= modulus.value() {
        r - modulus.value()
    } else {
        r
    }
}

#[inline]
pub fn mul_mod(operand1: u64, operand2: u64, modulus: &Modulus) -> u64 {
    barrett_reduce_u128(operand1 as u128 * operand2 as u128, modulus)
}

/// `(operand1 * operand2 + operand3) mod q`.
#[inline]
pub fn mul_add_mod(operand1: u64, operand2: u64, operand3: u64, modulus: &Modulus) -> u64 {
    barrett_reduce_u128(
        operand1 as u128 * operand2 as u128 + operand3 as u128,
        modulus,
    )
}

/// A factor together with its Shoup quotient `floor(factor * 2^64 / q)`,
/// enabling the fast single-word Barrett variant. The factor must be reduced.
#[derive(Clone, Debug, Default)]
pub struct MulModOperand {
    pub operand: u64,
    pub quotient: u64,
}

impl MulModOperand {
    pub fn new(operand: u64, modulus: &Modulus) -> Self {
        debug_assert!(operand < modulus.value());
        let quotient = (((operand as u128) << 64) / modulus.value() as u128) as u64;
        MulModOperand { operand, quotient }
    }
}

/// `x * y mod q` where `y` carries a precomputed quotient. The modulus must be
/// at most 63 bits.
#[inline]
pub fn mul_operand_mod(x: u64, y: &MulModOperand, modulus: &Modulus) -> u64 {
    let p = modulus.value();
    let hi = ((x as u128 * y.quotient as u128) >> 64) as u64;
    let r = y.operand.wrapping_mul(x).wrapping_sub(hi.wrapping_mul(p));
    if r >= p {
        r - p
    } else {
        r
    }
}

/// As [`mul_operand_mod`] but the result may lie in `[0, 2q)`.
#[inline]
pub fn mul_operand_mod_lazy(x: u64, y: &MulModOperand, modulus: &Modulus) -> u64 {
    let hi = ((x as u128 * y.quotient as u128) >> 64) as u64;
    y.operand
        .wrapping_mul(x)
        .wrapping_sub(hi.wrapping_mul(modulus.value()))
}

/// `(x * y + z) mod q` with a precomputed quotient for `y`.
#[inline]
pub fn mul_operand_add_mod(x: u64, y: &MulModOperand, z: u64, modulus: &Modulus) -> u64 {
    add_mod(
        mul_operand_mod(x, y, modulus),
        barrett_reduce(z, modulus),
        modulus,
    )
}

/// Reduces a little-endian multi-word value.
pub fn modulo_words(value: &[u64], modulus: &Modulus) -> u64 {
    match value.len() {
        0 => 0,
        1 => {
            if value[0] < modulus.value() {
                value[0]
            } else {
                barrett_reduce(value[0], modulus)
            }
        }
        _ => {
            let mut acc = 0u64;
            for &word in value.iter().rev() {
                acc = barrett_reduce_u128(((acc as u128) << 64) | word as u128, modulus);
            }
            acc
        }
    }
}

/// Inner product with 128-bit lazy accumulation; the operand count must stay
/// below [`super::MULTIPLY_ACCUMULATE_MOD_MAX`].
#[inline]
pub fn dot_product_mod(operand1: &[u64], operand2: &[u64], modulus: &Modulus) -> u64 {
    let mut accumulator: u128 = 0;
    for (&a, &b) in operand1.iter().zip(operand2.iter()) {
        accumulator = accumulator.wrapping_add(a as u128 * b as u128);
    }
    barrett_reduce_u128(accumulator, modulus)
}

#[inline]
pub fn try_invert_mod(operand: u64, modulus: &Modulus) -> Option<u64> {
    numth::try_invert_mod_u64(operand, modulus.value())
}

/// `operand ^ exponent mod q` via square-and-multiply.
pub fn exponentiate_mod(operand: u64, mut exponent: u64, modulus: &Modulus) -> u64 {
    if exponent == 0 {
        return 1;
    }
    if exponent == 1 {
        return operand;
    }
    let mut power = operand;
    let mut intermediate = 1;
    loop {
        if exponent & 1 != 0 {
            intermediate = mul_mod(power, intermediate, modulus);
        }
        exponent >>= 1;
        if exponent == 0 {
            break;
        }
        power = mul_mod(power, power, modulus);
    }
    intermediate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrett() {
        let modulus = Modulus::new(2305843009211596801);
        assert_eq!(barrett_reduce(u64::MAX, &modulus), u64::MAX % modulus.value());
        assert_eq!(barrett_reduce(modulus.value(), &modulus), 0);
        assert_eq!(barrett_reduce(modulus.value() - 1, &modulus), modulus.value() - 1);

        let wide = 0xdeadbeefdeadbeefu128 * 0x1234567890abcdefu128;
        assert_eq!(
            barrett_reduce_u128(wide, &modulus),
            (wide % modulus.value() as u128) as u64
        );
    }

    #[test]
    fn test_mul_mod() {
        let modulus = Modulus::new(0xffffee001);
        let a = 0xfffed001u64;
        let b = 0xdeadbeefu64;
        assert_eq!(
            mul_mod(a, b, &modulus),
            ((a as u128 * b as u128) % modulus.value() as u128) as u64
        );
        let op = MulModOperand::new(a % modulus.value(), &modulus);
        assert_eq!(
            mul_operand_mod(b, &op, &modulus),
            mul_mod(a % modulus.value(), b, &modulus)
        );
        let lazy = mul_operand_mod_lazy(b, &op, &modulus);
        assert!(lazy < 2 * modulus.value());
        assert_eq!(
            lazy % modulus.value(),
            mul_mod(a % modulus.value(), b, &modulus)
        );
    }

    #[test]
    fn test_modulo_words() {
        let modulus = Modulus::new(0xffffff53);
        let value = [0xAAAAAAAAAAAu64, 0xBBBBBBBBBB, 0xCCCCCCCCCC];
        let expected = {
            let mut acc: u128 = 0;
            for &word in value.iter().rev() {
                acc = ((acc << 64) | word as u128) % modulus.value() as u128;
            }
            acc as u64
        };
        assert_eq!(modulo_words(&value, &modulus), expected);
    }

    #[test]
    fn test_invert_exponentiate() {
        let modulus = Modulus::new(19);
        assert_eq!(try_invert_mod(5, &modulus), Some(4));
        assert_eq!(try_invert_mod(4, &modulus), Some(5));
        let modulus = Modulus::new(12289);
        for x in [2u64, 3, 4096, 12288] {
            let inv = try_invert_mod(x, &modulus).unwrap();
            assert_eq!(mul_mod(x, inv, &modulus), 1);
        }
        assert_eq!(exponentiate_mod(2, 12, &modulus), 4096 % modulus.value());
        assert_eq!(exponentiate_mod(7, 0, &modulus), 1);
    }

    #[test]
    fn test_div2() {
        let modulus = Modulus::new(17);
        assert_eq!(div2_mod(4, &modulus), 2);
        assert_eq!(div2_mod(5, &modulus), 11);
    }
}
