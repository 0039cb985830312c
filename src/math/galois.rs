//! Galois automorphisms x -> x^elt of the negacyclic ring, in coefficient and
//! NTT domains, plus the step-to-element bookkeeping for slot rotations.

use std::sync::RwLock;

use crate::modulus::Modulus;

use super::zq;
use super::{numth, reverse_bits, try_power_of_two, POLY_DEGREE_MAX, POLY_DEGREE_MIN};

/// Generator of the rotation subgroup of (Z/2NZ)*.
pub(crate) const GALOIS_GENERATOR: usize = 3;

pub struct GaloisTool {
    coeff_count_power: usize,
    coeff_count: usize,
    // NTT-domain permutations, built on first use per element.
    permutation_tables: RwLock<Vec<Vec<usize>>>,
}

impl GaloisTool {
    pub fn new(coeff_count_power: usize) -> Self {
        let max_power = try_power_of_two(POLY_DEGREE_MAX as u64).unwrap();
        let min_power = try_power_of_two(POLY_DEGREE_MIN as u64).unwrap();
        assert!(
            (min_power..=max_power).contains(&coeff_count_power),
            "[Invalid argument] Coefficient count power out of range."
        );
        GaloisTool {
            coeff_count_power,
            coeff_count: 1 << coeff_count_power,
            permutation_tables: RwLock::new(vec![vec![]; 1 << coeff_count_power]),
        }
    }

    fn build_ntt_table(&self, galois_elt: usize) -> Vec<usize> {
        let coeff_count = self.coeff_count;
        let mask = (coeff_count - 1) as u64;
        let mut table = vec![0; coeff_count];
        for i in coeff_count..(coeff_count << 1) {
            let reversed = reverse_bits(i as u64, self.coeff_count_power + 1);
            let index_raw = ((galois_elt as u64).wrapping_mul(reversed) >> 1) & mask;
            table[i - coeff_count] = reverse_bits(index_raw, self.coeff_count_power) as usize;
        }
        table
    }

    /// The Galois element realizing a cyclic slot rotation by `step`
    /// (negative = right); step 0 yields the conjugation element 2N-1.
    pub fn get_elt_from_step(&self, step: isize) -> usize {
        let n = self.coeff_count;
        let m = n * 2;
        if step == 0 {
            return m - 1;
        }
        let sign = step < 0;
        let pos_step = step.unsigned_abs();
        assert!(
            pos_step < (n >> 1),
            "[Invalid argument] Step count too large."
        );
        let pos_step = pos_step & (m - 1);
        let step = if sign { (n >> 1) - pos_step } else { pos_step };
        let mut galois_elt = 1;
        for _ in 0..step {
            galois_elt = (galois_elt * GALOIS_GENERATOR) & (m - 1);
        }
        galois_elt
    }

    pub fn get_elts_from_steps(&self, steps: &[isize]) -> Vec<usize> {
        steps.iter().map(|&s| self.get_elt_from_step(s)).collect()
    }

    /// Elements for conjugation plus all powers-of-two rotations in both
    /// directions; the default Galois key set.
    pub fn get_elts_all(&self) -> Vec<usize> {
        let m = self.coeff_count << 1;
        let mut elts = vec![m - 1];
        let mut pos_power = GALOIS_GENERATOR;
        let mut neg_power =
            numth::try_invert_mod_u64(GALOIS_GENERATOR as u64, m as u64).unwrap() as usize;
        for _ in 0..self.coeff_count_power - 1 {
            elts.push(pos_power);
            pos_power = (pos_power * pos_power) & (m - 1);
            elts.push(neg_power);
            neg_power = (neg_power * neg_power) & (m - 1);
        }
        elts
    }

    /// Key index of an odd Galois element.
    pub fn get_index_from_elt(galois_elt: usize) -> usize {
        assert!(
            galois_elt & 1 != 0,
            "[Invalid argument] Galois element must be odd."
        );
        (galois_elt - 1) >> 1
    }

    /// Coefficient-domain application to a single RNS component.
    pub fn apply(&self, operand: &[u64], galois_elt: usize, modulus: &Modulus, result: &mut [u64]) {
        let mask = self.coeff_count - 1;
        let mut index_raw = 0;
        for &coeff in operand.iter().take(self.coeff_count) {
            let index = index_raw & mask;
            let mut value = coeff;
            if (index_raw >> self.coeff_count_power) & 1 != 0 {
                value = zq::negate_mod(value, modulus);
            }
            result[index] = value;
            index_raw += galois_elt;
        }
    }

    pub fn apply_rns(
        &self,
        poly: &[u64],
        galois_elt: usize,
        moduli: &[Modulus],
        result: &mut [u64],
    ) {
        let degree = self.coeff_count;
        for ((chunk, modulus), out) in poly
            .chunks(degree)
            .zip(moduli.iter())
            .zip(result.chunks_mut(degree))
        {
            self.apply(chunk, galois_elt, modulus, out);
        }
    }

    /// NTT-domain application: a pure index permutation.
    pub fn apply_ntt(&self, operand: &[u64], galois_elt: usize, result: &mut [u64]) {
        let index = Self::get_index_from_elt(galois_elt);

        let needs_build = {
            let tables = self.permutation_tables.read().unwrap();
            tables[index].is_empty()
        };
        if needs_build {
            let mut tables = self.permutation_tables.write().unwrap();
            if tables[index].is_empty() {
                tables[index] = self.build_ntt_table(galois_elt);
            }
        }

        let tables = self.permutation_tables.read().unwrap();
        let table = &tables[index];
        debug_assert_eq!(result.len(), self.coeff_count);
        for (r, &t) in result.iter_mut().zip(table.iter()) {
            *r = operand[t];
        }
    }

    pub fn apply_ntt_rns(
        &self,
        poly: &[u64],
        coeff_modulus_size: usize,
        galois_elt: usize,
        result: &mut [u64],
    ) {
        let degree = self.coeff_count;
        for (chunk, out) in poly
            .chunks(degree)
            .take(coeff_modulus_size)
            .zip(result.chunks_mut(degree))
        {
            self.apply_ntt(chunk, galois_elt, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elements() {
        let tool = GaloisTool::new(3);
        assert_eq!(tool.get_elt_from_step(0), 15);
        assert_eq!(tool.get_elt_from_step(1), 3);
        assert_eq!(tool.get_elt_from_step(-3), 3);
        assert_eq!(tool.get_elt_from_step(2), 9);
        assert_eq!(tool.get_elt_from_step(-2), 9);
        assert_eq!(tool.get_elt_from_step(3), 11);
        assert_eq!(tool.get_elt_from_step(-1), 11);
        assert_eq!(
            tool.get_elts_from_steps(&[0, 1, -3, 2, -2, 3, -1]),
            vec![15, 3, 3, 9, 9, 11, 11]
        );
        assert_eq!(tool.get_elts_all(), vec![15, 3, 11, 9, 9]);
        assert_eq!(GaloisTool::get_index_from_elt(15), 7);
        assert_eq!(GaloisTool::get_index_from_elt(3), 1);
        assert_eq!(GaloisTool::get_index_from_elt(9), 4);
    }

    #[test]
    fn test_apply() {
        let tool = GaloisTool::new(3);
        let modulus = Modulus::new(17);
        let input: Vec<u64> = (0..8).collect();
        let mut output = vec![0u64; 8];
        tool.apply(&input, 3, &modulus, &mut output);
        assert_eq!(output, vec![0, 14, 6, 1, 13, 7, 2, 12]);

        let mut output = vec![0u64; 8];
        tool.apply_ntt(&input, 3, &mut output);
        assert_eq!(output, vec![4, 5, 7, 6, 1, 0, 2, 3]);
    }
}
