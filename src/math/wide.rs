//! Arbitrary-precision unsigned arithmetic on little-endian `[u64]` words.
//!
//! Fixed 128-bit work is done with native `u128` elsewhere; these routines
//! only exist for values wider than two words (total coefficient modulus,
//! punctured base products) and for the word-granular long division behind
//! the Barrett constants.

use super::significant_bit_count;

#[inline]
pub fn set_zero(value: &mut [u64]) {
    value.fill(0)
}

#[inline]
pub fn set_words(from: &[u64], count: usize, target: &mut [u64]) {
    target[..count].copy_from_slice(&from[..count]);
}

pub fn significant_bit_count_words(value: &[u64]) -> usize {
    let mut c = value.len() - 1;
    while c > 0 && value[c] == 0 {
        c -= 1;
    }
    64 * c + significant_bit_count(value[c])
}

pub fn significant_word_count(value: &[u64]) -> usize {
    let mut c = value.len();
    while c > 0 && value[c - 1] == 0 {
        c -= 1;
    }
    c
}

pub fn nonzero_word_count(value: &[u64]) -> usize {
    value.iter().filter(|&&x| x != 0).count()
}

/// Adds `operand2` into `result`; operands shorter than `result` are
/// zero-extended. Returns the outgoing carry.
pub fn add(operand1: &[u64], operand2: &[u64], result: &mut [u64]) -> u8 {
    let mut carry = false;
    for i in 0..result.len() {
        let a = operand1.get(i).copied().unwrap_or(0);
        let b = operand2.get(i).copied().unwrap_or(0);
        let (sum, c1) = a.overflowing_add(b);
        let (sum, c2) = sum.overflowing_add(carry as u64);
        result[i] = sum;
        carry = c1 | c2;
    }
    carry as u8
}

pub fn add_inplace(operand1: &mut [u64], operand2: &[u64]) -> u8 {
    let mut carry = false;
    for i in 0..operand1.len() {
        let b = operand2.get(i).copied().unwrap_or(0);
        let (sum, c1) = operand1[i].overflowing_add(b);
        let (sum, c2) = sum.overflowing_add(carry as u64);
        operand1[i] = sum;
        carry = c1 | c2;
    }
    carry as u8
}

pub fn add_word(operand1: &[u64], operand2: u64, result: &mut [u64]) -> u8 {
    let mut carry;
    (result[0], carry) = operand1[0].overflowing_add(operand2);
    for i in 1..result.len() {
        (result[i], carry) = operand1[i].overflowing_add(carry as u64);
    }
    carry as u8
}

pub fn add_word_inplace(operand: &mut [u64], value: u64) -> u8 {
    let mut carry;
    (operand[0], carry) = operand[0].overflowing_add(value);
    for i in 1..operand.len() {
        (operand[i], carry) = operand[i].overflowing_add(carry as u64);
    }
    carry as u8
}

/// Subtracts `operand2` from `operand1`; returns the outgoing borrow.
pub fn sub(operand1: &[u64], operand2: &[u64], result: &mut [u64]) -> u8 {
    let mut borrow = false;
    for i in 0..result.len() {
        let a = operand1.get(i).copied().unwrap_or(0);
        let b = operand2.get(i).copied().unwrap_or(0);
        let (diff, b1) = a.overflowing_sub(b);
        let (diff, b2) = diff.overflowing_sub(borrow as u64);
        result[i] = diff;
        borrow = b1 | b2;
    }
    borrow as u8
}

pub fn sub_inplace(operand1: &mut [u64], operand2: &[u64]) -> u8 {
    let mut borrow = false;
    for i in 0..operand1.len() {
        let b = operand2.get(i).copied().unwrap_or(0);
        let (diff, b1) = operand1[i].overflowing_sub(b);
        let (diff, b2) = diff.overflowing_sub(borrow as u64);
        operand1[i] = diff;
        borrow = b1 | b2;
    }
    borrow as u8
}

#[inline]
pub fn increment_inplace(operand: &mut [u64]) -> u8 {
    add_word_inplace(operand, 1)
}

#[inline]
pub fn increment(operand: &[u64], result: &mut [u64]) -> u8 {
    add_word(operand, 1, result)
}

pub fn right_shift_one_inplace(operand: &mut [u64]) {
    let n = operand.len();
    for i in 0..n - 1 {
        operand[i] = (operand[i] >> 1) | (operand[i + 1] << 63);
    }
    operand[n - 1] >>= 1;
}

/// Computes ceil(operand / 2).
pub fn half_round_up(operand: &[u64], result: &mut [u64]) {
    if result.is_empty() {
        return;
    }
    let low_bit = operand[0] & 1;
    result.copy_from_slice(operand);
    right_shift_one_inplace(result);
    if low_bit != 0 {
        increment_inplace(result);
    }
}

pub fn compare(operand1: &[u64], operand2: &[u64]) -> std::cmp::Ordering {
    let n = operand1.len().max(operand2.len());
    for i in (0..n).rev() {
        let a = operand1.get(i).copied().unwrap_or(0);
        let b = operand2.get(i).copied().unwrap_or(0);
        let cmp = a.cmp(&b);
        if cmp != std::cmp::Ordering::Equal {
            return cmp;
        }
    }
    std::cmp::Ordering::Equal
}

#[inline]
pub fn is_greater_than_or_equal(operand1: &[u64], operand2: &[u64]) -> bool {
    compare(operand1, operand2) != std::cmp::Ordering::Less
}

#[inline]
pub fn is_less_than(operand1: &[u64], operand2: &[u64]) -> bool {
    compare(operand1, operand2) == std::cmp::Ordering::Less
}

#[inline]
pub fn is_greater_than(operand1: &[u64], operand2: &[u64]) -> bool {
    compare(operand1, operand2) == std::cmp::Ordering::Greater
}

/// Modular addition of equally wide values; `operand1` and `operand2` must be
/// reduced modulo `modulus` already.
pub fn add_mod_inplace(operand1: &mut [u64], operand2: &[u64], modulus: &[u64]) {
    let carry = add_inplace(operand1, operand2) != 0;
    if carry || is_greater_than_or_equal(operand1, modulus) {
        sub_inplace(operand1, modulus);
    }
}

/// Multiplies a multi-word value by a single word; `result` may be wider or
/// narrower than `operand1` and excess product words are truncated.
pub fn multiply_word(operand1: &[u64], operand2: u64, result: &mut [u64]) {
    if operand1.is_empty() || operand2 == 0 {
        set_zero(result);
        return;
    }
    let mut carry: u64 = 0;
    let n = operand1.len().min(result.len());
    for i in 0..n {
        let product = operand1[i] as u128 * operand2 as u128 + carry as u128;
        result[i] = product as u64;
        carry = (product >> 64) as u64;
    }
    for r in result.iter_mut().skip(n) {
        *r = carry;
        carry = 0;
    }
}

/// Full schoolbook product, truncated to `result.len()` words.
pub fn multiply(operand1: &[u64], operand2: &[u64], result: &mut [u64]) {
    set_zero(result);
    let operand1_words = significant_word_count(operand1);
    let operand2_words = significant_word_count(operand2);
    for i in 0..operand1_words.min(result.len()) {
        let mut carry: u64 = 0;
        let j_max = operand2_words.min(result.len() - i);
        for j in 0..j_max {
            let product =
                operand1[i] as u128 * operand2[j] as u128 + result[i + j] as u128 + carry as u128;
            result[i + j] = product as u64;
            carry = (product >> 64) as u64;
        }
        if i + j_max < result.len() {
            result[i + j_max] = result[i + j_max].wrapping_add(carry);
        }
    }
}

/// Product of many words, written into `result` (which must have one word per
/// operand).
pub fn multiply_many_words(operands: &[u64], result: &mut [u64]) {
    if operands.is_empty() {
        return;
    }
    set_zero(result);
    result[0] = operands[0];
    let mut scratch = vec![0; operands.len()];
    for i in 1..operands.len() {
        multiply_word(&result[..i + 1], operands[i], &mut scratch[..i + 1]);
        set_words(&scratch, i + 1, result);
    }
}

/// Like [`multiply_many_words`] but leaving out the operand at `except`.
pub fn multiply_many_words_except(operands: &[u64], except: usize, result: &mut [u64]) {
    let count = operands.len();
    set_zero(result);
    if count == 1 && except == 0 {
        result[0] = 1;
        return;
    }
    result[0] = if except == 0 { 1 } else { operands[0] };
    let mut scratch = vec![0; count];
    for i in 1..count {
        if i != except {
            multiply_word(&result[..i + 1], operands[i], &mut scratch[..i + 1]);
            set_words(&scratch, i + 1, result);
        }
    }
}

/// Word-granular long division by a single-word divisor. On return the
/// numerator holds the remainder in its lowest word.
pub fn divide_word_inplace(numerator: &mut [u64], denominator: u64, quotient: &mut [u64]) {
    debug_assert!(denominator != 0);
    let mut remainder: u64 = 0;
    for i in (0..numerator.len()).rev() {
        let cur = ((remainder as u128) << 64) | numerator[i] as u128;
        quotient[i] = (cur / denominator as u128) as u64;
        remainder = (cur % denominator as u128) as u64;
    }
    set_zero(numerator);
    numerator[0] = remainder;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_sub() {
        let mut result = [0u64; 2];
        assert_eq!(add(&[u64::MAX, 0], &[1, 0], &mut result), 0);
        assert_eq!(result, [0, 1]);
        assert_eq!(add(&[u64::MAX, u64::MAX], &[1, 0], &mut result), 1);
        assert_eq!(result, [0, 0]);

        assert_eq!(sub(&[0, 1], &[1, 0], &mut result), 0);
        assert_eq!(result, [u64::MAX, 0]);
        assert_eq!(sub(&[0, 0], &[1, 0], &mut result), 1);
        assert_eq!(result, [u64::MAX, u64::MAX]);
    }

    #[test]
    fn test_counts() {
        assert_eq!(significant_bit_count_words(&[1, 0b1]), 65);
        assert_eq!(significant_word_count(&[1, 1, 0b11111, 0, 0]), 3);
        assert_eq!(nonzero_word_count(&[1, 0, 0b11111, 0, 3]), 3);
    }

    #[test]
    fn test_multiply() {
        let mut result = [0u64; 3];
        multiply_word(
            &[0xab0bc09f7b288a5e, 0x1613bdbc5066de5c],
            0x611bbb8ef414913d,
            &mut result,
        );
        assert_eq!(
            result,
            [0x9b38e7f2b6603666, 0xe96b9f5536fba9a, 0x85fdf261cebd933]
        );

        let mut result = [0u64; 6];
        multiply(
            &[0x2ab4f6ef5c8d6205, 0xfb49f1a6128fbd46, 0x66b72c7f86d79dd8],
            &[0xf6639b8f1e77ba65, 0xeda2107393685f21, 0xd7df5e486c4f352d],
            &mut result,
        );
        assert_eq!(
            result,
            [
                0x2e2db4ae63524df9,
                0x2b55e17efb94b806,
                0xc3b4577b011a8cf4,
                0xa3e9fd16fdb71a0a,
                0xb5a777d46f14340d,
                0x569d75c32ea5f167
            ]
        );
    }

    #[test]
    fn test_multiply_many() {
        let mut result = [0u64; 3];
        multiply_many_words(&[5, 7, 9], &mut result);
        assert_eq!(result, [315, 0, 0]);
        multiply_many_words_except(&[5, 7, 9], 1, &mut result);
        assert_eq!(result, [45, 0, 0]);
    }

    #[test]
    fn test_divide() {
        let mut numerator = [0u64, 0, 1];
        let mut quotient = [0u64; 3];
        // 2^128 / 3 = 0x5555...5555 (two words), remainder 1
        divide_word_inplace(&mut numerator, 3, &mut quotient);
        assert_eq!(quotient, [0x5555555555555555, 0x5555555555555555, 0]);
        assert_eq!(numerator[0], 1);

        let mut numerator = [16u64];
        let mut quotient = [0u64];
        divide_word_inplace(&mut numerator, 5, &mut quotient);
        assert_eq!(quotient[0], 3);
        assert_eq!(numerator[0], 1);
    }

    #[test]
    fn test_half_round_up() {
        let mut result = [0u64; 2];
        half_round_up(&[5, 0], &mut result);
        assert_eq!(result, [3, 0]);
        half_round_up(&[4, 0], &mut result);
        assert_eq!(result, [2, 0]);
        half_round_up(&[1, 1], &mut result);
        assert_eq!(result, [(1u64 << 63) + 1, 0]);
    }
}
