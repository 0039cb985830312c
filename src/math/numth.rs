//! Primality, primitive roots of unity, and small number-theoretic helpers.

use rand::Rng;

use crate::modulus::Modulus;

use super::zq;

const MILLER_RABIN_ROUNDS: usize = 40;
const PRIMITIVE_ROOT_ATTEMPTS: usize = 100;

/// Non-adjacent form of a signed value, as a list of signed powers of two.
pub fn naf(mut value: i32) -> Vec<i32> {
    let mut res = vec![];
    let sign = value < 0;
    value = value.abs();
    let mut i = 0;
    while value > 0 {
        let zi = if value & 1 != 0 { 2 - (value & 3) } else { 0 };
        value = (value - zi) >> 1;
        if zi != 0 {
            res.push((if sign { -zi } else { zi }) * (1 << i));
        }
        i += 1;
    }
    res
}

pub fn gcd(x: u64, y: u64) -> u64 {
    if y == 0 {
        x
    } else {
        gcd(y, x % y)
    }
}

/// Returns `(g, a, b)` with `g = gcd(x, y) = a*x + b*y`.
pub fn xgcd(mut x: u64, mut y: u64) -> (u64, i64, i64) {
    let (mut prev_a, mut a) = (1i64, 0i64);
    let (mut prev_b, mut b) = (0i64, 1i64);
    while y != 0 {
        let q = (x / y) as i64;
        let r = x % y;
        x = y;
        y = r;
        (prev_a, a) = (a, prev_a - q * a);
        (prev_b, b) = (b, prev_b - q * b);
    }
    (x, prev_a, prev_b)
}

#[inline]
pub fn are_coprime(x: u64, y: u64) -> bool {
    gcd(x, y) <= 1
}

pub fn try_invert_mod_u64(value: u64, modulus: u64) -> Option<u64> {
    if value == 0 {
        return None;
    }
    let (g, a, _) = xgcd(value, modulus);
    if g != 1 {
        None
    } else if a < 0 {
        Some((modulus as i64 + a) as u64)
    } else {
        Some(a as u64)
    }
}

/// Miller–Rabin with a fixed first base of 2 and random further bases.
pub fn is_prime(modulus: &Modulus) -> bool {
    let value = modulus.value();
    if value < 2 {
        return false;
    }
    for small in [2u64, 3, 5, 7, 11, 13] {
        if value == small {
            return true;
        }
        if value % small == 0 {
            return false;
        }
    }
    let mut d = value - 1;
    let mut r = 0;
    while d & 1 == 0 {
        d >>= 1;
        r += 1;
    }
    if r == 0 {
        return false;
    }
    let mut rng = rand::thread_rng();
    'witness: for i in 0..MILLER_RABIN_ROUNDS {
        let a = if i == 0 { 2 } else { rng.gen_range(3..value) };
        let mut x = zq::exponentiate_mod(a, d, modulus);
        if x == 1 || x == value - 1 {
            continue;
        }
        for _ in 0..r - 1 {
            x = zq::mul_mod(x, x, modulus);
            if x == value - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Finds `count` distinct primes of exactly `bit_size` bits, each congruent to
/// 1 modulo `factor`, scanning downward from the top of the range.
pub fn get_primes(factor: u64, bit_size: usize, mut count: usize) -> Vec<Modulus> {
    let mut destination = vec![];
    let mut value = ((1u64 << bit_size) - 1) / factor * factor + 1;
    let lower_bound = 1u64 << (bit_size - 1);
    while count > 0 && value > lower_bound {
        let candidate = Modulus::new(value);
        if candidate.is_prime() {
            destination.push(candidate);
            count -= 1;
        }
        value -= factor;
    }
    if count > 0 {
        panic!("[Logic error] Failed to find enough qualifying primes.");
    }
    destination
}

pub fn get_prime(factor: u64, bit_size: usize) -> Modulus {
    get_primes(factor, bit_size, 1).into_iter().next().unwrap()
}

/// For power-of-two `degree` it suffices that `root^(degree/2) == -1`.
pub fn is_primitive_root(root: u64, degree: u64, modulus: &Modulus) -> bool {
    root != 0 && zq::exponentiate_mod(root, degree >> 1, modulus) == modulus.value() - 1
}

pub fn try_primitive_root(degree: u64, modulus: &Modulus, destination: &mut u64) -> bool {
    let group_size = modulus.value() - 1;
    let quotient_group_size = group_size / degree;
    if group_size - quotient_group_size * degree != 0 {
        return false;
    }
    let mut rng = rand::thread_rng();
    for _ in 0..PRIMITIVE_ROOT_ATTEMPTS {
        // A random element raised to the quotient-group order lands in the
        // degree-th roots of unity; it is primitive with good probability.
        let candidate = zq::barrett_reduce(rng.gen::<u64>(), modulus);
        *destination = zq::exponentiate_mod(candidate, quotient_group_size, modulus);
        if is_primitive_root(*destination, degree, modulus) {
            return true;
        }
    }
    is_primitive_root(*destination, degree, modulus)
}

/// Finds the smallest primitive `degree`-th root of unity.
pub fn try_minimal_primitive_root(degree: u64, modulus: &Modulus, destination: &mut u64) -> bool {
    let mut root = 0;
    if !try_primitive_root(degree, modulus, &mut root) {
        return false;
    }
    let generator_sq = zq::mul_mod(root, root, modulus);
    let mut current = root;
    for _ in 0..(degree + 1) / 2 {
        if current < root {
            root = current;
        }
        current = zq::mul_mod(current, generator_sq, modulus);
    }
    *destination = root;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcd_xgcd() {
        assert_eq!(gcd(6, 15), 3);
        assert_eq!(gcd(15, 7), 1);
        assert_eq!(gcd(11112, 44445), 3);
        assert_eq!(xgcd(13, 19), (1, 3, -2));
        assert_eq!(xgcd(14, 21), (7, -1, 1));
        assert!(are_coprime(7, 15));
        assert!(!are_coprime(14, 21));
    }

    #[test]
    fn test_naf() {
        // 7 = 8 - 1, 3 = 4 - 1
        let mut v = naf(7);
        v.sort();
        assert_eq!(v, vec![-1, 8]);
        let sum = |v: Vec<i32>| v.into_iter().sum::<i32>();
        for x in [-11, -3, 1, 2, 3, 5, 12, 127] {
            assert_eq!(sum(naf(x)), x);
        }
        // No two adjacent nonzero digits.
        for x in 1..200 {
            let terms = naf(x);
            for w in terms.windows(2) {
                assert!(w[1].abs() / w[0].abs() >= 4);
            }
        }
    }

    #[test]
    fn test_is_prime() {
        assert!(!is_prime(&Modulus::new(0)));
        assert!(is_prime(&Modulus::new(2)));
        assert!(is_prime(&Modulus::new(65537)));
        assert!(!is_prime(&Modulus::new(65536)));
        assert!(is_prime(&Modulus::new(59399)));
        assert!(!is_prime(&Modulus::new(72307 * 59399)));
        assert!(is_prime(&Modulus::new(36893488147419103)));
        assert!(!is_prime(&Modulus::new(36893488147419107)));
    }

    #[test]
    fn test_primes_and_roots() {
        let primes = get_primes(2048, 30, 3);
        assert_eq!(primes.len(), 3);
        for p in &primes {
            assert!(p.is_prime());
            assert_eq!(p.value() % 2048, 1);
            assert_eq!(p.bit_count(), 30);
        }

        let modulus = Modulus::new(29);
        assert!(is_primitive_root(28, 2, &modulus));
        assert!(is_primitive_root(12, 4, &modulus));
        assert!(!is_primitive_root(12, 2, &modulus));
        let mut root = 0;
        assert!(try_minimal_primitive_root(4, &modulus, &mut root));
        assert_eq!(root, 12);
        let modulus = Modulus::new(1234565441);
        assert!(try_minimal_primitive_root(8, &modulus, &mut root));
        assert_eq!(root, 249725733);
    }
}
