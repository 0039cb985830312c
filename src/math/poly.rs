//! Element-wise operations on polynomials in RNS representation.
//!
//! Three granularities appear throughout: a bare function name operates on a
//! single RNS component (one prime), the `_rns` suffix walks all components
//! of one polynomial, and `_many` walks an array of polynomials (the layout
//! of a ciphertext data buffer). Everything is a straightforward index loop;
//! `degree` is the polynomial modulus degree N.

use crate::modulus::Modulus;

use super::ntt::NttTables;
use super::zq::{self, MulModOperand};

pub fn modulo(component: &[u64], modulus: &Modulus, result: &mut [u64]) {
    for (r, &c) in result.iter_mut().zip(component.iter()) {
        *r = modulus.reduce(c);
    }
}

pub fn negate_inplace(component: &mut [u64], modulus: &Modulus) {
    let modulus = modulus.value();
    for c in component.iter_mut() {
        *c = if *c != 0 { modulus - *c } else { 0 };
    }
}

pub fn negate_inplace_rns(poly: &mut [u64], degree: usize, moduli: &[Modulus]) {
    for (chunk, modulus) in poly.chunks_mut(degree).zip(moduli.iter()) {
        negate_inplace(chunk, modulus);
    }
}

pub fn negate_inplace_many(polys: &mut [u64], count: usize, degree: usize, moduli: &[Modulus]) {
    let d = degree * moduli.len();
    for poly in polys.chunks_mut(d).take(count) {
        negate_inplace_rns(poly, degree, moduli);
    }
}

pub fn negate(component: &[u64], modulus: &Modulus, result: &mut [u64]) {
    let modulus = modulus.value();
    for (&c, r) in component.iter().zip(result.iter_mut()) {
        *r = if c != 0 { modulus - c } else { 0 };
    }
}

pub fn negate_rns(poly: &[u64], degree: usize, moduli: &[Modulus], result: &mut [u64]) {
    for ((chunk, modulus), out) in poly
        .chunks(degree)
        .zip(moduli.iter())
        .zip(result.chunks_mut(degree))
    {
        negate(chunk, modulus, out);
    }
}

pub fn negate_many(polys: &[u64], count: usize, degree: usize, moduli: &[Modulus], result: &mut [u64]) {
    let d = degree * moduli.len();
    for (poly, out) in polys.chunks(d).take(count).zip(result.chunks_mut(d)) {
        negate_rns(poly, degree, moduli, out);
    }
}

pub fn add_inplace(comp1: &mut [u64], comp2: &[u64], modulus: &Modulus) {
    let modulus = modulus.value();
    for (a, &b) in comp1.iter_mut().zip(comp2.iter()) {
        let sum = *a + b;
        *a = if sum >= modulus { sum - modulus } else { sum };
    }
}

pub fn add_inplace_rns(poly1: &mut [u64], poly2: &[u64], degree: usize, moduli: &[Modulus]) {
    for ((chunk1, chunk2), modulus) in poly1
        .chunks_mut(degree)
        .zip(poly2.chunks(degree))
        .zip(moduli.iter())
    {
        add_inplace(chunk1, chunk2, modulus);
    }
}

pub fn add_inplace_many(
    polys1: &mut [u64],
    polys2: &[u64],
    count: usize,
    degree: usize,
    moduli: &[Modulus],
) {
    let d = degree * moduli.len();
    for (poly1, poly2) in polys1.chunks_mut(d).zip(polys2.chunks(d)).take(count) {
        add_inplace_rns(poly1, poly2, degree, moduli);
    }
}

pub fn sub_inplace(comp1: &mut [u64], comp2: &[u64], modulus: &Modulus) {
    let modulus = modulus.value();
    for (a, &b) in comp1.iter_mut().zip(comp2.iter()) {
        let (diff, borrow) = a.overflowing_sub(b);
        *a = if borrow { diff.wrapping_add(modulus) } else { diff };
    }
}

pub fn sub_inplace_rns(poly1: &mut [u64], poly2: &[u64], degree: usize, moduli: &[Modulus]) {
    for ((chunk1, chunk2), modulus) in poly1
        .chunks_mut(degree)
        .zip(poly2.chunks(degree))
        .zip(moduli.iter())
    {
        sub_inplace(chunk1, chunk2, modulus);
    }
}

pub fn sub_inplace_many(
    polys1: &mut [u64],
    polys2: &[u64],
    count: usize,
    degree: usize,
    moduli: &[Modulus],
) {
    let d = degree * moduli.len();
    for (poly1, poly2) in polys1.chunks_mut(d).zip(polys2.chunks(d)).take(count) {
        sub_inplace_rns(poly1, poly2, degree, moduli);
    }
}

pub fn add_scalar_inplace(component: &mut [u64], scalar: u64, modulus: &Modulus) {
    for c in component.iter_mut() {
        *c = zq::add_mod(*c, scalar, modulus);
    }
}

pub fn sub_scalar_inplace(component: &mut [u64], scalar: u64, modulus: &Modulus) {
    for c in component.iter_mut() {
        *c = zq::sub_mod(*c, scalar, modulus);
    }
}

pub fn multiply_scalar(component: &[u64], scalar: u64, modulus: &Modulus, result: &mut [u64]) {
    for (r, &c) in result.iter_mut().zip(component.iter()) {
        *r = zq::mul_mod(c, scalar, modulus);
    }
}

pub fn multiply_scalar_inplace(component: &mut [u64], scalar: u64, modulus: &Modulus) {
    for c in component.iter_mut() {
        *c = zq::mul_mod(*c, scalar, modulus);
    }
}

pub fn multiply_scalar_rns(
    poly: &[u64],
    scalar: u64,
    degree: usize,
    moduli: &[Modulus],
    result: &mut [u64],
) {
    for ((chunk, modulus), out) in poly
        .chunks(degree)
        .zip(moduli.iter())
        .zip(result.chunks_mut(degree))
    {
        multiply_scalar(chunk, scalar, modulus, out);
    }
}

pub fn multiply_scalar_inplace_rns(poly: &mut [u64], scalar: u64, degree: usize, moduli: &[Modulus]) {
    for (chunk, modulus) in poly.chunks_mut(degree).zip(moduli.iter()) {
        multiply_scalar_inplace(chunk, scalar, modulus);
    }
}

pub fn multiply_operand(
    component: &[u64],
    operand: &MulModOperand,
    modulus: &Modulus,
    result: &mut [u64],
) {
    for (r, &c) in result.iter_mut().zip(component.iter()) {
        *r = zq::mul_operand_mod(c, operand, modulus);
    }
}

pub fn multiply_operand_inplace(component: &mut [u64], operand: &MulModOperand, modulus: &Modulus) {
    for c in component.iter_mut() {
        *c = zq::mul_operand_mod(*c, operand, modulus);
    }
}

/// Coefficient-wise product of two components. Inputs may be lazy (up to
/// 64 bits); the output is fully reduced.
pub fn dyadic_product(comp1: &[u64], comp2: &[u64], modulus: &Modulus, result: &mut [u64]) {
    for (r, (&a, &b)) in result.iter_mut().zip(comp1.iter().zip(comp2.iter())) {
        *r = zq::barrett_reduce_u128(a as u128 * b as u128, modulus);
    }
}

pub fn dyadic_product_rns(
    poly1: &[u64],
    poly2: &[u64],
    degree: usize,
    moduli: &[Modulus],
    result: &mut [u64],
) {
    for (((chunk1, chunk2), modulus), out) in poly1
        .chunks(degree)
        .zip(poly2.chunks(degree))
        .zip(moduli.iter())
        .zip(result.chunks_mut(degree))
    {
        dyadic_product(chunk1, chunk2, modulus, out);
    }
}

pub fn dyadic_product_inplace(comp1: &mut [u64], comp2: &[u64], modulus: &Modulus) {
    for (a, &b) in comp1.iter_mut().zip(comp2.iter()) {
        *a = zq::barrett_reduce_u128(*a as u128 * b as u128, modulus);
    }
}

pub fn dyadic_product_inplace_rns(poly1: &mut [u64], poly2: &[u64], degree: usize, moduli: &[Modulus]) {
    for ((chunk1, chunk2), modulus) in poly1
        .chunks_mut(degree)
        .zip(poly2.chunks(degree))
        .zip(moduli.iter())
    {
        dyadic_product_inplace(chunk1, chunk2, modulus);
    }
}

pub fn dyadic_square_inplace(component: &mut [u64], modulus: &Modulus) {
    for c in component.iter_mut() {
        *c = zq::barrett_reduce_u128(*c as u128 * *c as u128, modulus);
    }
}

pub fn dyadic_square_inplace_rns(poly: &mut [u64], degree: usize, moduli: &[Modulus]) {
    for (chunk, modulus) in poly.chunks_mut(degree).zip(moduli.iter()) {
        dyadic_square_inplace(chunk, modulus);
    }
}

pub fn double_inplace(component: &mut [u64], modulus: &Modulus) {
    for c in component.iter_mut() {
        *c = zq::add_mod(*c, *c, modulus);
    }
}

pub fn double_inplace_rns(poly: &mut [u64], degree: usize, moduli: &[Modulus]) {
    for (chunk, modulus) in poly.chunks_mut(degree).zip(moduli.iter()) {
        double_inplace(chunk, modulus);
    }
}

/// Multiplies a component by `x^shift` in the negacyclic ring.
pub fn negacyclic_shift(component: &[u64], shift: usize, modulus: &Modulus, result: &mut [u64]) {
    let coeff_count = result.len();
    if shift == 0 {
        result.copy_from_slice(&component[..coeff_count]);
        return;
    }
    let mask = coeff_count - 1;
    let modulus_value = modulus.value();
    let mut index_raw = shift;
    for &coeff in component.iter().take(coeff_count) {
        let index = index_raw & mask;
        // Wrapping past a multiple of N flips the sign.
        if coeff == 0 || (index_raw & coeff_count) == 0 {
            result[index] = coeff;
        } else {
            result[index] = modulus_value - coeff;
        }
        index_raw += 1;
    }
}

pub fn negacyclic_multiply_monomial_inplace(
    component: &mut [u64],
    mono_coeff: u64,
    mono_exponent: usize,
    modulus: &Modulus,
) {
    let mut scaled = vec![0; component.len()];
    multiply_scalar(component, mono_coeff, modulus, &mut scaled);
    negacyclic_shift(&scaled, mono_exponent, modulus, component);
}

/// Monomial product with one shared coefficient, applied over a ciphertext
/// buffer.
pub fn negacyclic_multiply_monomial_inplace_many(
    polys: &mut [u64],
    mono_coeff: u64,
    mono_exponent: usize,
    count: usize,
    degree: usize,
    moduli: &[Modulus],
) {
    let d = degree * moduli.len();
    for poly in polys.chunks_mut(d).take(count) {
        for (chunk, modulus) in poly.chunks_mut(degree).zip(moduli.iter()) {
            negacyclic_multiply_monomial_inplace(chunk, mono_coeff, mono_exponent, modulus);
        }
    }
}

/// Monomial product with one coefficient per RNS prime.
pub fn negacyclic_multiply_monomials_inplace_many(
    polys: &mut [u64],
    mono_coeffs: &[u64],
    mono_exponent: usize,
    count: usize,
    degree: usize,
    moduli: &[Modulus],
) {
    let d = degree * moduli.len();
    for poly in polys.chunks_mut(d).take(count) {
        for ((chunk, modulus), &coeff) in poly
            .chunks_mut(degree)
            .zip(moduli.iter())
            .zip(mono_coeffs.iter())
        {
            negacyclic_multiply_monomial_inplace(chunk, coeff, mono_exponent, modulus);
        }
    }
}

#[inline]
pub fn ntt_lazy(component: &mut [u64], tables: &NttTables) {
    tables.forward_lazy(component);
}

#[inline]
pub fn ntt(component: &mut [u64], tables: &NttTables) {
    tables.forward(component);
}

#[inline]
pub fn intt_lazy(component: &mut [u64], tables: &NttTables) {
    tables.inverse_lazy(component);
}

#[inline]
pub fn intt(component: &mut [u64], tables: &NttTables) {
    tables.inverse(component);
}

pub fn ntt_rns(poly: &mut [u64], degree: usize, tables: &[NttTables]) {
    for (chunk, t) in poly.chunks_mut(degree).zip(tables.iter()) {
        t.forward(chunk);
    }
}

pub fn ntt_lazy_rns(poly: &mut [u64], degree: usize, tables: &[NttTables]) {
    for (chunk, t) in poly.chunks_mut(degree).zip(tables.iter()) {
        t.forward_lazy(chunk);
    }
}

pub fn intt_rns(poly: &mut [u64], degree: usize, tables: &[NttTables]) {
    for (chunk, t) in poly.chunks_mut(degree).zip(tables.iter()) {
        t.inverse(chunk);
    }
}

pub fn ntt_many(polys: &mut [u64], count: usize, degree: usize, tables: &[NttTables]) {
    let d = degree * tables.len();
    for poly in polys.chunks_mut(d).take(count) {
        ntt_rns(poly, degree, tables);
    }
}

pub fn ntt_lazy_many(polys: &mut [u64], count: usize, degree: usize, tables: &[NttTables]) {
    let d = degree * tables.len();
    for poly in polys.chunks_mut(d).take(count) {
        ntt_lazy_rns(poly, degree, tables);
    }
}

pub fn intt_many(polys: &mut [u64], count: usize, degree: usize, tables: &[NttTables]) {
    let d = degree * tables.len();
    for poly in polys.chunks_mut(d).take(count) {
        intt_rns(poly, degree, tables);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::numth;

    #[test]
    fn test_add_sub_negate() {
        let modulus = Modulus::new(13);
        let mut a = vec![0u64, 5, 12];
        add_inplace(&mut a, &[1, 8, 12], &modulus);
        assert_eq!(a, vec![1, 0, 11]);
        sub_inplace(&mut a, &[2, 0, 12], &modulus);
        assert_eq!(a, vec![12, 0, 12]);
        negate_inplace(&mut a, &modulus);
        assert_eq!(a, vec![1, 0, 1]);
    }

    #[test]
    fn test_scalar_ops() {
        let modulus = Modulus::new(17);
        let mut a = vec![1u64, 16, 8];
        multiply_scalar_inplace(&mut a, 3, &modulus);
        assert_eq!(a, vec![3, 14, 7]);
        add_scalar_inplace(&mut a, 15, &modulus);
        assert_eq!(a, vec![1, 12, 5]);
        sub_scalar_inplace(&mut a, 6, &modulus);
        assert_eq!(a, vec![12, 6, 16]);
    }

    #[test]
    fn test_negacyclic_shift() {
        let modulus = Modulus::new(97);
        let poly = [1u64, 2, 3, 4];
        let mut result = [0u64; 4];
        negacyclic_shift(&poly, 1, &modulus, &mut result);
        // x * (1 + 2x + 3x^2 + 4x^3) = -4 + x + 2x^2 + 3x^3
        assert_eq!(result, [93, 1, 2, 3]);
        negacyclic_shift(&poly, 4, &modulus, &mut result);
        assert_eq!(result, [96, 95, 94, 93]);
    }

    #[test]
    fn test_monomial_multiply() {
        let modulus = numth::get_prime(8, 20);
        let mut poly = vec![1u64, 2, 3, 4];
        negacyclic_multiply_monomial_inplace(&mut poly, 2, 1, &modulus);
        assert_eq!(poly, vec![modulus.value() - 8, 2, 4, 6]);
    }
}
