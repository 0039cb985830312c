//! Negacyclic number-theoretic transform with Harvey-style lazy reduction.

use crate::modulus::Modulus;

use super::dwt::{DwtHandler, TransformArith};
use super::zq::{self, MulModOperand};
use super::{numth, reverse_bits};

/// Modular arithmetic with the lazy `[0, 4q)` invariant between butterfly
/// layers.
#[derive(Clone, Copy, Default)]
struct LazyModArith {
    modulus: Modulus,
    two_times_modulus: u64,
}

impl LazyModArith {
    fn new(modulus: &Modulus) -> Self {
        LazyModArith {
            modulus: *modulus,
            two_times_modulus: modulus.value() << 1,
        }
    }
}

impl TransformArith for LazyModArith {
    type Value = u64;
    type Root = MulModOperand;
    type Scalar = MulModOperand;

    #[inline]
    fn add(&self, a: &u64, b: &u64) -> u64 {
        a + b
    }

    #[inline]
    fn sub(&self, a: &u64, b: &u64) -> u64 {
        a + self.two_times_modulus - b
    }

    #[inline]
    fn mul_root(&self, a: &u64, r: &MulModOperand) -> u64 {
        zq::mul_operand_mod_lazy(*a, r, &self.modulus)
    }

    #[inline]
    fn mul_scalar(&self, a: &u64, s: &MulModOperand) -> u64 {
        zq::mul_operand_mod_lazy(*a, s, &self.modulus)
    }

    #[inline]
    fn guard(&self, a: &u64) -> u64 {
        if *a >= self.two_times_modulus {
            *a - self.two_times_modulus
        } else {
            *a
        }
    }
}

type NttHandler = DwtHandler<LazyModArith>;

/// Precomputed tables for the negacyclic NTT against one prime.
#[derive(Clone, Default)]
pub struct NttTables {
    root: u64,
    coeff_count_power: usize,
    coeff_count: usize,
    modulus: Modulus,
    inv_degree: MulModOperand,
    root_powers: Vec<MulModOperand>,
    inv_root_powers: Vec<MulModOperand>,
    handler: NttHandler,
}

impl NttTables {
    pub fn new(coeff_count_power: usize, modulus: &Modulus) -> Result<Self, String> {
        let coeff_count = 1usize << coeff_count_power;
        let modulus = *modulus;

        let mut root = 0;
        if !numth::try_minimal_primitive_root(2 * coeff_count as u64, &modulus, &mut root) {
            return Err("[Invalid argument] Modulus has no 2N-th root of unity.".to_string());
        }
        let inv_root = zq::try_invert_mod(root, &modulus)
            .ok_or_else(|| "[Invalid argument] Root of unity is not invertible.".to_string())?;

        // Powers of psi in bit-reversed order.
        let mut root_powers = vec![MulModOperand::default(); coeff_count];
        let root_operand = MulModOperand::new(root, &modulus);
        let mut power = root;
        for i in 1..coeff_count {
            root_powers[reverse_bits(i as u64, coeff_count_power) as usize] =
                MulModOperand::new(power, &modulus);
            power = zq::mul_operand_mod(power, &root_operand, &modulus);
        }
        root_powers[0] = MulModOperand::new(1, &modulus);

        // Powers of psi^-1 in the scrambled order the inverse butterflies
        // consume.
        let mut inv_root_powers = vec![MulModOperand::default(); coeff_count];
        let inv_root_operand = MulModOperand::new(inv_root, &modulus);
        let mut power = inv_root;
        for i in 1..coeff_count {
            inv_root_powers[reverse_bits((i - 1) as u64, coeff_count_power) as usize + 1] =
                MulModOperand::new(power, &modulus);
            power = zq::mul_operand_mod(power, &inv_root_operand, &modulus);
        }
        inv_root_powers[0] = MulModOperand::new(1, &modulus);

        let inv_degree = zq::try_invert_mod(coeff_count as u64, &modulus)
            .ok_or_else(|| "[Invalid argument] Degree is not invertible.".to_string())?;
        let inv_degree = MulModOperand::new(inv_degree, &modulus);

        let arith = LazyModArith::new(&modulus);
        Ok(NttTables {
            root,
            coeff_count_power,
            coeff_count,
            modulus,
            inv_degree,
            root_powers,
            inv_root_powers,
            handler: NttHandler::new(&arith),
        })
    }

    pub fn create_many(
        coeff_count_power: usize,
        moduli: &[Modulus],
    ) -> Result<Vec<NttTables>, String> {
        if moduli.is_empty() {
            return Err("[Invalid argument] Moduli list is empty.".to_string());
        }
        moduli
            .iter()
            .map(|m| Self::new(coeff_count_power, m))
            .collect()
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    pub fn root_powers(&self) -> &[MulModOperand] {
        &self.root_powers
    }

    pub fn inv_root_powers(&self) -> &[MulModOperand] {
        &self.inv_root_powers
    }

    pub fn coeff_count_power(&self) -> usize {
        self.coeff_count_power
    }

    pub fn coeff_count(&self) -> usize {
        self.coeff_count
    }

    pub fn modulus(&self) -> &Modulus {
        &self.modulus
    }

    /// Forward transform; outputs lie in `[0, 4q)`.
    pub fn forward_lazy(&self, operand: &mut [u64]) {
        self.handler
            .transform_to_rev(operand, self.coeff_count_power, &self.root_powers, None);
    }

    pub fn forward(&self, operand: &mut [u64]) {
        self.forward_lazy(operand);
        let modulus = self.modulus.value();
        let two_times_modulus = modulus << 1;
        for x in operand.iter_mut() {
            if *x >= two_times_modulus {
                *x -= two_times_modulus;
            }
            if *x >= modulus {
                *x -= modulus;
            }
        }
    }

    /// Inverse transform with the 1/n correction folded in; outputs lie in
    /// `[0, 2q)`.
    pub fn inverse_lazy(&self, operand: &mut [u64]) {
        self.handler.transform_from_rev(
            operand,
            self.coeff_count_power,
            &self.inv_root_powers,
            Some(&self.inv_degree),
        );
    }

    pub fn inverse(&self, operand: &mut [u64]) {
        self.inverse_lazy(operand);
        let modulus = self.modulus.value();
        for x in operand.iter_mut() {
            if *x >= modulus {
                *x -= modulus;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_table_construction() {
        let modulus = numth::get_prime(2 << 10, 40);
        let tables = NttTables::new(10, &modulus).unwrap();
        assert_eq!(tables.coeff_count(), 1024);
        assert_eq!(tables.coeff_count_power(), 10);

        let moduli = numth::get_primes(2 << 4, 20, 3);
        let tables = NttTables::create_many(4, &moduli).unwrap();
        assert_eq!(tables.len(), 3);
    }

    #[test]
    fn test_known_transforms() {
        let modulus = Modulus::new(0xffffffffffc0001);
        let tables = NttTables::new(1, &modulus).unwrap();

        let mut poly = [0, 0];
        tables.forward(&mut poly);
        assert_eq!(poly, [0, 0]);

        let mut poly = [1, 0];
        tables.forward(&mut poly);
        assert_eq!(poly, [1, 1]);

        // Monomial x maps to (psi, -psi).
        let psi = tables.root_powers()[1].operand;
        let mut poly = [0, 1];
        tables.forward(&mut poly);
        assert_eq!(poly, [psi, modulus.value() - psi]);
    }

    #[test]
    fn test_round_trip() {
        const LOG_N: usize = 7;
        let modulus = Modulus::new(0xffffffffffc0001);
        let tables = NttTables::new(LOG_N, &modulus).unwrap();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(11);
        let mut poly = [0u64; 1 << LOG_N];
        for x in poly.iter_mut() {
            *x = modulus.reduce(rng.gen());
        }
        let reference = poly;
        tables.forward(&mut poly);
        tables.inverse(&mut poly);
        assert_eq!(poly, reference);
    }

    #[test]
    fn test_negacyclic_convolution() {
        // (1 + x) * (1 + x) = 1 + 2x + x^2 in R = Z_q[x]/(x^4 + 1).
        let modulus = numth::get_prime(16, 20);
        let tables = NttTables::new(2, &modulus).unwrap();
        let mut a = [1u64, 1, 0, 0];
        tables.forward(&mut a);
        for x in a.iter_mut() {
            *x = zq::mul_mod(*x, *x, &modulus);
        }
        tables.inverse(&mut a);
        assert_eq!(a, [1, 2, 1, 0]);
    }
}
