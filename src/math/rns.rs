//! RNS bases, fast base conversion, and the BEHZ toolchain.
//!
//! `RnsTool` holds everything a chain level needs for RNS-native BFV
//! multiplication (auxiliary base `Bsk`, the Montgomery factor `m_tilde`,
//! Shenoy–Kumaresan reconstruction), for modulus switching / rescaling
//! (divide-and-round by the last prime), and for BFV decryption (the
//! `{t, gamma}` base). See "A Full RNS Variant of FV like Somewhat
//! Homomorphic Encryption Schemes" (BEHZ, <https://eprint.iacr.org/2016/510>).

use itertools::multizip;

use crate::modulus::Modulus;

use super::ntt::NttTables;
use super::poly;
use super::zq::{self, MulModOperand};
use super::{numth, wide, COEFF_MOD_COUNT_MAX, COEFF_MOD_COUNT_MIN, INTERNAL_MOD_BIT_COUNT};
use super::{try_power_of_two, POLY_DEGREE_MAX, POLY_DEGREE_MIN};

/// A list of pairwise coprime moduli with CRT precomputations.
#[derive(Clone)]
pub struct RnsBase {
    base: Vec<Modulus>,
    base_prod: Vec<u64>,
    punctured_prod: Vec<Vec<u64>>,
    inv_punctured_prod_mod_base: Vec<MulModOperand>,
}

impl RnsBase {
    pub fn new(base: &[Modulus]) -> Result<Self, String> {
        if base.is_empty() {
            return Err("[Invalid argument] RNS base cannot be empty.".to_string());
        }
        for (i, modulus) in base.iter().enumerate() {
            if modulus.is_zero() {
                return Err("[Invalid argument] RNS base modulus cannot be zero.".to_string());
            }
            for other in &base[..i] {
                if !numth::are_coprime(modulus.value(), other.value()) {
                    return Err(
                        "[Invalid argument] RNS base moduli must be pairwise coprime.".to_string()
                    );
                }
            }
        }
        RnsBase {
            base: base.to_vec(),
            base_prod: vec![],
            punctured_prod: vec![],
            inv_punctured_prod_mod_base: vec![],
        }
        .initialize()
    }

    fn initialize(mut self) -> Result<Self, String> {
        let n = self.base.len();
        let mut base_prod = vec![0; n];
        let mut punctured_prod = vec![vec![0u64; n]; n];
        let mut inv_punctured_prod_mod_base = vec![MulModOperand::default(); n];

        if n > 1 {
            let values = self.base.iter().map(|x| x.value()).collect::<Vec<_>>();
            for (i, punctured) in punctured_prod.iter_mut().enumerate() {
                wide::multiply_many_words_except(&values, i, punctured);
            }
            wide::multiply_word(&punctured_prod[0], self.base[0].value(), &mut base_prod);
            for i in 0..n {
                let reduced = zq::modulo_words(&punctured_prod[i], &self.base[i]);
                let inverse = zq::try_invert_mod(reduced, &self.base[i]).ok_or_else(|| {
                    "[Invalid argument] Punctured product is not invertible.".to_string()
                })?;
                inv_punctured_prod_mod_base[i] = MulModOperand::new(inverse, &self.base[i]);
            }
        } else {
            base_prod[0] = self.base[0].value();
            punctured_prod[0] = vec![1];
            inv_punctured_prod_mod_base[0] = MulModOperand::new(1, &self.base[0]);
        }

        self.base_prod = base_prod;
        self.punctured_prod = punctured_prod;
        self.inv_punctured_prod_mod_base = inv_punctured_prod_mod_base;
        Ok(self)
    }

    pub fn contains(&self, modulus: &Modulus) -> bool {
        self.base.iter().any(|x| x == modulus)
    }

    pub fn extend_modulus(&self, modulus: &Modulus) -> Result<Self, String> {
        if modulus.is_zero() {
            return Err("[Invalid argument] Modulus cannot be zero.".to_string());
        }
        if self
            .base
            .iter()
            .any(|x| !numth::are_coprime(x.value(), modulus.value()))
        {
            return Err(
                "[Invalid argument] Extension modulus is not coprime with the base.".to_string(),
            );
        }
        let mut base = self.base.clone();
        base.push(*modulus);
        RnsBase {
            base,
            base_prod: vec![],
            punctured_prod: vec![],
            inv_punctured_prod_mod_base: vec![],
        }
        .initialize()
    }

    /// In-place CRT decomposition of one multi-word value (one word per base
    /// modulus).
    pub fn decompose(&self, value: &mut [u64]) {
        debug_assert_eq!(value.len(), self.base.len());
        if self.base.len() > 1 {
            let composed = value.to_vec();
            for (slot, modulus) in value.iter_mut().zip(self.base.iter()) {
                *slot = zq::modulo_words(&composed, modulus);
            }
        }
    }

    /// Decomposes `count` consecutive multi-word values; the output is laid
    /// out component-major (`[len × count]`).
    pub fn decompose_array(&self, value: &mut [u64]) {
        let size = self.base.len();
        debug_assert_eq!(value.len() % size, 0);
        let count = value.len() / size;
        if size > 1 {
            let composed = value.to_vec();
            for (i, modulus) in self.base.iter().enumerate() {
                for (j, chunk) in composed.chunks(size).enumerate() {
                    value[i * count + j] = zq::modulo_words(chunk, modulus);
                }
            }
        }
    }

    /// In-place CRT composition of one value.
    pub fn compose(&self, value: &mut [u64]) {
        let size = self.base.len();
        debug_assert_eq!(value.len(), size);
        if size > 1 {
            let residues = value.to_vec();
            wide::set_zero(value);
            let mut scratch = vec![0; size];
            for i in 0..size {
                let factor = zq::mul_operand_mod(
                    residues[i],
                    &self.inv_punctured_prod_mod_base[i],
                    &self.base[i],
                );
                wide::multiply_word(&self.punctured_prod[i], factor, &mut scratch);
                wide::add_mod_inplace(value, &scratch, &self.base_prod);
            }
        }
    }

    /// Composes a component-major array back into `count` consecutive
    /// multi-word values.
    pub fn compose_array(&self, value: &mut [u64]) {
        let size = self.base.len();
        debug_assert_eq!(value.len() % size, 0);
        let count = value.len() / size;
        if size > 1 {
            // Transpose into per-value residue tuples first.
            let mut transposed = vec![0; size * count];
            for i in 0..count {
                for j in 0..size {
                    transposed[j + i * size] = value[j * count + i];
                }
            }
            wide::set_zero(value);
            let mut scratch = vec![0; size];
            for (value_chunk, residues) in value.chunks_mut(size).zip(transposed.chunks(size)) {
                for (residue, inv_punctured, punctured, modulus) in multizip((
                    residues.iter(),
                    self.inv_punctured_prod_mod_base.iter(),
                    self.punctured_prod.iter(),
                    self.base.iter(),
                )) {
                    let factor = zq::mul_operand_mod(*residue, inv_punctured, modulus);
                    wide::multiply_word(punctured, factor, &mut scratch);
                    wide::add_mod_inplace(value_chunk, &scratch, &self.base_prod);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    pub fn base(&self) -> &[Modulus] {
        &self.base
    }

    pub fn base_at(&self, index: usize) -> &Modulus {
        &self.base[index]
    }

    pub fn base_prod(&self) -> &[u64] {
        &self.base_prod
    }

    pub fn punctured_prod(&self) -> &[Vec<u64>] {
        &self.punctured_prod
    }

    pub fn inv_punctured_prod_mod_base(&self) -> &[MulModOperand] {
        &self.inv_punctured_prod_mod_base
    }
}

impl std::ops::Index<usize> for RnsBase {
    type Output = Modulus;
    fn index(&self, index: usize) -> &Self::Output {
        &self.base[index]
    }
}

/// Fast (approximate) base conversion from `ibase` to `obase`.
struct BaseConverter {
    ibase: RnsBase,
    obase: RnsBase,
    base_change_matrix: Vec<Vec<u64>>,
}

impl BaseConverter {
    fn new(ibase: &RnsBase, obase: &RnsBase) -> Self {
        let mut base_change_matrix = vec![vec![0; ibase.len()]; obase.len()];
        for (i, row) in base_change_matrix.iter_mut().enumerate() {
            for (j, entry) in row.iter_mut().enumerate() {
                *entry = zq::modulo_words(&ibase.punctured_prod()[j], obase.base_at(i));
            }
        }
        BaseConverter {
            ibase: ibase.clone(),
            obase: obase.clone(),
            base_change_matrix,
        }
    }

    #[cfg(test)]
    fn fast_convert(&self, input: &[u64], output: &mut [u64]) {
        let ibase_size = self.ibase.len();
        let mut weighted = vec![0; ibase_size];
        for i in 0..ibase_size {
            weighted[i] = zq::mul_operand_mod(
                input[i],
                &self.ibase.inv_punctured_prod_mod_base()[i],
                self.ibase.base_at(i),
            );
        }
        for (i, out) in output.iter_mut().enumerate() {
            *out = zq::dot_product_mod(&weighted, &self.base_change_matrix[i], self.obase.base_at(i));
        }
    }

    /// Converts a component-major array of `count` values.
    fn fast_convert_array(&self, input: &[u64], output: &mut [u64]) {
        let ibase_size = self.ibase.len();
        let obase_size = self.obase.len();
        let count = input.len() / ibase_size;
        debug_assert_eq!(count * ibase_size, input.len());
        debug_assert_eq!(count * obase_size, output.len());

        // Weight the residues by the inverse punctured products, transposing
        // to value-major order for the dot products below.
        let mut weighted = vec![0; count * ibase_size];
        for i in 0..ibase_size {
            let op = &self.ibase.inv_punctured_prod_mod_base()[i];
            let base = self.ibase.base_at(i);
            if op.operand == 1 {
                for j in 0..count {
                    weighted[j * ibase_size + i] = zq::barrett_reduce(input[i * count + j], base);
                }
            } else {
                for j in 0..count {
                    weighted[j * ibase_size + i] =
                        zq::mul_operand_mod(input[i * count + j], op, base);
                }
            }
        }
        for i in 0..obase_size {
            for j in 0..count {
                output[i * count + j] = zq::dot_product_mod(
                    &weighted[j * ibase_size..(j + 1) * ibase_size],
                    &self.base_change_matrix[i],
                    self.obase.base_at(i),
                );
            }
        }
    }
}

/// Per-level RNS machinery: BEHZ multiplication support, last-prime
/// divide-and-round, and the BFV decryption base.
pub struct RnsTool {
    coeff_count: usize,
    base_q: RnsBase,
    base_b: RnsBase,
    base_bsk: RnsBase,
    base_bsk_m_tilde: RnsBase,
    base_t_gamma: Option<RnsBase>,
    base_q_to_bsk_conv: BaseConverter,
    base_q_to_m_tilde_conv: BaseConverter,
    base_b_to_q_conv: BaseConverter,
    base_b_to_m_sk_conv: BaseConverter,
    base_q_to_t_gamma_conv: Option<BaseConverter>,
    inv_prod_q_mod_bsk: Vec<MulModOperand>,
    neg_inv_prod_q_mod_m_tilde: MulModOperand,
    inv_prod_b_mod_m_sk: MulModOperand,
    inv_gamma_mod_t: Option<MulModOperand>,
    prod_b_mod_q: Vec<u64>,
    inv_m_tilde_mod_bsk: Vec<MulModOperand>,
    prod_q_mod_bsk: Vec<u64>,
    neg_inv_q_mod_t_gamma: Option<Vec<MulModOperand>>,
    prod_t_gamma_mod_q: Option<Vec<MulModOperand>>,
    inv_q_last_mod_q: Vec<MulModOperand>,
    base_bsk_ntt_tables: Vec<NttTables>,
    m_tilde: Modulus,
    m_sk: Modulus,
    t: Modulus,
    gamma: Modulus,
}

impl RnsTool {
    /// Builds the tool for ciphertext base `q` and plain modulus `t` (zero for
    /// CKKS).
    pub fn new(poly_modulus_degree: usize, q: &RnsBase, t: &Modulus) -> Result<Self, String> {
        if q.len() < COEFF_MOD_COUNT_MIN || q.len() > COEFF_MOD_COUNT_MAX {
            return Err("[Invalid argument] RNS base size out of bounds.".to_string());
        }
        let coeff_count_power = try_power_of_two(poly_modulus_degree as u64)
            .ok_or_else(|| "[Invalid argument] Degree must be a power of two.".to_string())?;
        if !(POLY_DEGREE_MIN..=POLY_DEGREE_MAX).contains(&poly_modulus_degree) {
            return Err("[Invalid argument] Degree out of bounds.".to_string());
        }

        let base_q_size = q.len();

        // The auxiliary base must satisfy K*n*t*q^2 < q*prod(B)*m_sk, with 32
        // bits reserved for the cross-term factor K*n. Grow B by one prime
        // when the budget of 61-bit internal primes would otherwise fall
        // short.
        let total_coeff_bit_count = wide::significant_bit_count_words(q.base_prod());
        let mut base_b_size = base_q_size;
        if 32 + t.bit_count() + total_coeff_bit_count
            >= INTERNAL_MOD_BIT_COUNT * base_q_size + INTERNAL_MOD_BIT_COUNT
        {
            base_b_size += 1;
        }
        let base_bsk_size = base_b_size + 1;
        let base_bsk_m_tilde_size = base_bsk_size + 1;

        // Sample the internal primes: m_sk, gamma, then the B primes.
        let coeff_count = poly_modulus_degree;
        let internal_primes = numth::get_primes(
            2 * coeff_count as u64,
            INTERNAL_MOD_BIT_COUNT,
            base_bsk_m_tilde_size,
        );
        let mut primes = internal_primes.iter();
        let m_sk = *primes.next().unwrap();
        let gamma = *primes.next().unwrap();
        let base_b_primes = primes.copied().collect::<Vec<_>>();

        // m_tilde is a power of two on purpose; sm_mrq relies on it.
        let m_tilde = Modulus::new(1 << 32);

        let base_q = q.clone();
        let base_b = RnsBase::new(&base_b_primes)?;
        let base_bsk = base_b.extend_modulus(&m_sk)?;
        let base_bsk_m_tilde = base_bsk.extend_modulus(&m_tilde)?;
        let base_t_gamma = if t.is_zero() {
            None
        } else {
            Some(RnsBase::new(&[*t, gamma])?)
        };

        let base_bsk_ntt_tables = NttTables::create_many(coeff_count_power, base_bsk.base())?;

        let base_q_to_bsk_conv = BaseConverter::new(&base_q, &base_bsk);
        let base_q_to_m_tilde_conv = BaseConverter::new(&base_q, &RnsBase::new(&[m_tilde])?);
        let base_b_to_q_conv = BaseConverter::new(&base_b, &base_q);
        let base_b_to_m_sk_conv = BaseConverter::new(&base_b, &RnsBase::new(&[m_sk])?);
        let base_q_to_t_gamma_conv = base_t_gamma
            .as_ref()
            .map(|base_t_gamma| BaseConverter::new(&base_q, base_t_gamma));

        let invert_in = |value: &[u64], modulus: &Modulus| -> Result<u64, String> {
            let reduced = zq::modulo_words(value, modulus);
            zq::try_invert_mod(reduced, modulus)
                .ok_or_else(|| "[Logic error] Required inverse does not exist.".to_string())
        };

        // prod(B) mod q
        let prod_b_mod_q = base_q
            .base()
            .iter()
            .map(|x| zq::modulo_words(base_b.base_prod(), x))
            .collect::<Vec<_>>();

        // prod(q)^(-1) mod Bsk
        let inv_prod_q_mod_bsk = base_bsk
            .base()
            .iter()
            .map(|modulus| {
                invert_in(base_q.base_prod(), modulus).map(|inv| MulModOperand::new(inv, modulus))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // prod(B)^(-1) mod m_sk
        let inv_prod_b_mod_m_sk =
            MulModOperand::new(invert_in(base_b.base_prod(), &m_sk)?, &m_sk);

        // m_tilde^(-1) mod Bsk
        let inv_m_tilde_mod_bsk = base_bsk
            .base()
            .iter()
            .map(|modulus| {
                zq::try_invert_mod(zq::barrett_reduce(m_tilde.value(), modulus), modulus)
                    .map(|inv| MulModOperand::new(inv, modulus))
                    .ok_or_else(|| "[Logic error] m_tilde is not invertible.".to_string())
            })
            .collect::<Result<Vec<_>, _>>()?;

        // -prod(q)^(-1) mod m_tilde
        let neg_inv_prod_q_mod_m_tilde = MulModOperand::new(
            zq::negate_mod(invert_in(base_q.base_prod(), &m_tilde)?, &m_tilde),
            &m_tilde,
        );

        // prod(q) mod Bsk
        let prod_q_mod_bsk = base_bsk
            .base()
            .iter()
            .map(|modulus| zq::modulo_words(base_q.base_prod(), modulus))
            .collect::<Vec<_>>();

        let mut inv_gamma_mod_t = None;
        let mut prod_t_gamma_mod_q = None;
        let mut neg_inv_q_mod_t_gamma = None;
        if let Some(base_t_gamma) = &base_t_gamma {
            inv_gamma_mod_t = Some(MulModOperand::new(
                zq::try_invert_mod(t.reduce(gamma.value()), t)
                    .ok_or_else(|| "[Logic error] gamma is not invertible mod t.".to_string())?,
                t,
            ));
            prod_t_gamma_mod_q = Some(
                base_q
                    .base()
                    .iter()
                    .map(|x| {
                        MulModOperand::new(
                            zq::mul_mod(
                                base_t_gamma.base_at(0).value(),
                                base_t_gamma.base_at(1).value(),
                                x,
                            ),
                            x,
                        )
                    })
                    .collect::<Vec<_>>(),
            );
            neg_inv_q_mod_t_gamma = Some(
                base_t_gamma
                    .base()
                    .iter()
                    .map(|x| {
                        invert_in(base_q.base_prod(), x)
                            .map(|inv| MulModOperand::new(zq::negate_mod(inv, x), x))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            );
        }

        // q_last^(-1) mod q_i, for modulus switching and rescaling.
        let last_q = base_q.base_at(base_q_size - 1);
        let inv_q_last_mod_q = base_q.base()[..base_q_size - 1]
            .iter()
            .map(|b| {
                zq::try_invert_mod(last_q.value(), b)
                    .map(|inv| MulModOperand::new(inv, b))
                    .ok_or_else(|| "[Logic error] q_last is not invertible.".to_string())
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RnsTool {
            coeff_count,
            base_q,
            base_b,
            base_bsk,
            base_bsk_m_tilde,
            base_t_gamma,
            base_q_to_bsk_conv,
            base_q_to_m_tilde_conv,
            base_b_to_q_conv,
            base_b_to_m_sk_conv,
            base_q_to_t_gamma_conv,
            inv_prod_q_mod_bsk,
            neg_inv_prod_q_mod_m_tilde,
            inv_prod_b_mod_m_sk,
            inv_gamma_mod_t,
            prod_b_mod_q,
            inv_m_tilde_mod_bsk,
            prod_q_mod_bsk,
            neg_inv_q_mod_t_gamma,
            prod_t_gamma_mod_q,
            inv_q_last_mod_q,
            base_bsk_ntt_tables,
            m_tilde,
            m_sk,
            t: *t,
            gamma,
        })
    }

    pub fn base_q(&self) -> &RnsBase {
        &self.base_q
    }

    pub fn base_b(&self) -> &RnsBase {
        &self.base_b
    }

    pub fn base_bsk(&self) -> &RnsBase {
        &self.base_bsk
    }

    pub fn base_bsk_m_tilde(&self) -> &RnsBase {
        &self.base_bsk_m_tilde
    }

    pub fn base_bsk_ntt_tables(&self) -> &[NttTables] {
        &self.base_bsk_ntt_tables
    }

    pub fn inv_q_last_mod_q(&self) -> &[MulModOperand] {
        &self.inv_q_last_mod_q
    }

    /// Divides a base-q polynomial by the last prime with rounding, leaving
    /// the result on the shortened base.
    pub fn divide_and_round_q_last_inplace(&self, input: &mut [u64]) {
        let base_q_size = self.base_q.len();
        let last_modulus = self.base_q.base_at(base_q_size - 1);
        let coeff_count = self.coeff_count;
        let last_offset = (base_q_size - 1) * coeff_count;

        // Add q_last/2 to turn the flooring below into rounding.
        let half = last_modulus.value() >> 1;
        poly::add_scalar_inplace(
            &mut input[last_offset..last_offset + coeff_count],
            half,
            last_modulus,
        );

        let mut last_mod_qi = vec![0; coeff_count];
        for i in 0..base_q_size - 1 {
            let b = self.base_q.base_at(i);
            poly::modulo(
                &input[last_offset..last_offset + coeff_count],
                b,
                &mut last_mod_qi,
            );
            // Cancel the rounding bias modulo q_i.
            let half_mod = zq::barrett_reduce(half, b);
            poly::sub_scalar_inplace(&mut last_mod_qi, half_mod, b);
            poly::sub_inplace(&mut input[i * coeff_count..(i + 1) * coeff_count], &last_mod_qi, b);
            poly::multiply_operand_inplace(
                &mut input[i * coeff_count..(i + 1) * coeff_count],
                &self.inv_q_last_mod_q[i],
                b,
            );
        }
    }

    /// NTT-domain variant of [`Self::divide_and_round_q_last_inplace`].
    pub fn divide_and_round_q_last_ntt_inplace(&self, input: &mut [u64], ntt_tables: &[NttTables]) {
        let base_q_size = self.base_q.len();
        let last_modulus = self.base_q.base_at(base_q_size - 1);
        let coeff_count = self.coeff_count;
        let last_offset = (base_q_size - 1) * coeff_count;

        ntt_tables[base_q_size - 1].inverse(&mut input[last_offset..last_offset + coeff_count]);

        let half = last_modulus.value() >> 1;
        poly::add_scalar_inplace(
            &mut input[last_offset..last_offset + coeff_count],
            half,
            last_modulus,
        );

        let mut last_mod_qi = vec![0; coeff_count];
        for i in 0..base_q_size - 1 {
            let b = self.base_q.base_at(i);
            if b.value() < last_modulus.value() {
                poly::modulo(
                    &input[last_offset..last_offset + coeff_count],
                    b,
                    &mut last_mod_qi,
                );
            } else {
                last_mod_qi.copy_from_slice(&input[last_offset..last_offset + coeff_count]);
            }

            // Lazy subtraction: shift by q_i - half and let the forward NTT
            // absorb values up to 4q_i.
            let neg_half_mod = b.value() - zq::barrett_reduce(half, b);
            for x in last_mod_qi.iter_mut() {
                *x += neg_half_mod;
            }
            let qi_lazy = b.value() << 2;
            ntt_tables[i].forward_lazy(&mut last_mod_qi);
            for j in 0..coeff_count {
                input[i * coeff_count + j] += qi_lazy - last_mod_qi[j];
            }
            poly::multiply_operand_inplace(
                &mut input[i * coeff_count..(i + 1) * coeff_count],
                &self.inv_q_last_mod_q[i],
                b,
            );
        }
    }

    /// Lifts a base-q polynomial into `Bsk ∪ {m_tilde}` after multiplying by
    /// `m_tilde` (so that [`Self::sm_mrq`] can Montgomery-reduce later).
    pub fn fastbconv_m_tilde(&self, input: &[u64], destination: &mut [u64]) {
        let base_q_size = self.base_q.len();
        let base_bsk_size = self.base_bsk.len();
        let coeff_count = self.coeff_count;

        let mut scaled = vec![0; coeff_count * base_q_size];
        poly::multiply_scalar_rns(
            input,
            self.m_tilde.value(),
            coeff_count,
            self.base_q.base(),
            &mut scaled,
        );

        self.base_q_to_bsk_conv
            .fast_convert_array(&scaled, &mut destination[..base_bsk_size * coeff_count]);
        self.base_q_to_m_tilde_conv.fast_convert_array(
            &scaled,
            &mut destination[base_bsk_size * coeff_count..(base_bsk_size + 1) * coeff_count],
        );
    }

    /// Small Montgomery reduction mod q: removes the q-overflows introduced by
    /// the approximate conversion, switching base from `Bsk ∪ {m_tilde}` to
    /// `Bsk`.
    pub fn sm_mrq(&self, input: &[u64], destination: &mut [u64]) {
        let base_bsk_size = self.base_bsk.len();
        let coeff_count = self.coeff_count;
        let m_tilde_div_2 = self.m_tilde.value() >> 1;

        // r = -input/q mod m_tilde
        let mut r_m_tilde = vec![0; coeff_count];
        poly::multiply_operand(
            &input[base_bsk_size * coeff_count..(base_bsk_size + 1) * coeff_count],
            &self.neg_inv_prod_q_mod_m_tilde,
            &self.m_tilde,
            &mut r_m_tilde,
        );

        for i in 0..base_bsk_size {
            let b = self.base_bsk.base_at(i);
            let prod_q_mod_bsk_elt = MulModOperand::new(self.prod_q_mod_bsk[i], b);
            for j in 0..coeff_count {
                // Centered reduction of r; m_tilde is a power of two so the
                // comparison below uses '>='.
                let mut r = r_m_tilde[j];
                if r >= m_tilde_div_2 {
                    r += b.value() - self.m_tilde.value();
                }
                // (input + q*r) * m_tilde^(-1) mod Bsk
                destination[i * coeff_count + j] = zq::mul_operand_mod(
                    zq::mul_operand_add_mod(r, &prod_q_mod_bsk_elt, input[i * coeff_count + j], b),
                    &self.inv_m_tilde_mod_bsk[i],
                    b,
                );
            }
        }
    }

    /// Divides a `q ∪ Bsk` polynomial by q with flooring, producing the
    /// quotient on base `Bsk`.
    pub fn fast_floor(&self, input: &[u64], destination: &mut [u64]) {
        let base_q_size = self.base_q.len();
        let base_bsk_size = self.base_bsk.len();
        let coeff_count = self.coeff_count;

        self.base_q_to_bsk_conv
            .fast_convert_array(&input[..base_q_size * coeff_count], destination);

        let input = &input[base_q_size * coeff_count..];
        for i in 0..base_bsk_size {
            let modulus = self.base_bsk.base_at(i);
            for j in 0..coeff_count {
                // The unreduced difference stays within the Barrett bound.
                destination[i * coeff_count + j] = zq::mul_operand_mod(
                    input[i * coeff_count + j]
                        + (modulus.value() - destination[i * coeff_count + j]),
                    &self.inv_prod_q_mod_bsk[i],
                    modulus,
                );
            }
        }
    }

    /// Shenoy–Kumaresan conversion from base `Bsk` back to base q.
    pub fn fastbconv_sk(&self, input: &[u64], destination: &mut [u64]) {
        let base_q_size = self.base_q.len();
        let base_b_size = self.base_b.len();
        let coeff_count = self.coeff_count;

        // Fast convert B -> q; the m_sk component is only used for the
        // correction term below.
        self.base_b_to_q_conv
            .fast_convert_array(&input[..base_b_size * coeff_count], destination);

        // alpha_sk = (conv(B -> m_sk) - input_sk) / prod(B) mod m_sk
        let mut b_mod_m_sk = vec![0; coeff_count];
        self.base_b_to_m_sk_conv
            .fast_convert_array(&input[..base_b_size * coeff_count], &mut b_mod_m_sk);
        let mut alpha_sk = vec![0; coeff_count];
        for i in 0..coeff_count {
            alpha_sk[i] = zq::mul_operand_mod(
                b_mod_m_sk[i] + (self.m_sk.value() - input[base_b_size * coeff_count + i]),
                &self.inv_prod_b_mod_m_sk,
                &self.m_sk,
            );
        }

        // alpha_sk is not centered; values above m_sk/2 represent negatives
        // and need the sign-flipped correction.
        let m_sk_div_2 = self.m_sk.value() >> 1;
        for i in 0..base_q_size {
            let b = self.base_q.base_at(i);
            let prod_b_mod_q_elt = MulModOperand::new(self.prod_b_mod_q[i], b);
            let neg_prod_b_mod_q_elt = MulModOperand::new(b.value() - self.prod_b_mod_q[i], b);
            for j in 0..coeff_count {
                let dest = &mut destination[i * coeff_count + j];
                if alpha_sk[j] > m_sk_div_2 {
                    *dest = zq::mul_operand_add_mod(
                        zq::negate_mod(alpha_sk[j], &self.m_sk),
                        &prod_b_mod_q_elt,
                        *dest,
                        b,
                    );
                } else {
                    *dest = zq::mul_operand_add_mod(alpha_sk[j], &neg_prod_b_mod_q_elt, *dest, b);
                }
            }
        }
    }

    /// BFV decryption tail: scales `input` (the raw phase) by `t/q` with
    /// rounding, using the `{t, gamma}` base to remove the error.
    pub fn decrypt_scale_and_round(&self, input: &[u64], destination: &mut [u64]) {
        let base_q_size = self.base_q.len();
        let base_t_gamma = self.base_t_gamma.as_ref().unwrap();
        let base_t_gamma_size = base_t_gamma.len();
        let coeff_count = self.coeff_count;

        // |gamma * t|_qi * input
        let mut scaled = vec![0; coeff_count * base_q_size];
        for i in 0..base_q_size {
            poly::multiply_operand(
                &input[i * coeff_count..(i + 1) * coeff_count],
                &self.prod_t_gamma_mod_q.as_ref().unwrap()[i],
                self.base_q.base_at(i),
                &mut scaled[i * coeff_count..(i + 1) * coeff_count],
            );
        }

        let mut in_t_gamma = vec![0; coeff_count * base_t_gamma_size];
        self.base_q_to_t_gamma_conv
            .as_ref()
            .unwrap()
            .fast_convert_array(&scaled, &mut in_t_gamma);

        for i in 0..base_t_gamma_size {
            poly::multiply_operand_inplace(
                &mut in_t_gamma[i * coeff_count..(i + 1) * coeff_count],
                &self.neg_inv_q_mod_t_gamma.as_ref().unwrap()[i],
                base_t_gamma.base_at(i),
            );
        }

        // Remove the gamma-scaled error, centering the gamma component.
        let gamma_div_2 = base_t_gamma.base_at(1).value() >> 1;
        let t = &self.t;
        let gamma = &self.gamma;
        let inv_gamma_mod_t = self.inv_gamma_mod_t.as_ref().unwrap();
        for i in 0..coeff_count {
            if in_t_gamma[coeff_count + i] > gamma_div_2 {
                destination[i] = zq::add_mod(
                    in_t_gamma[i],
                    t.reduce(gamma.value() - in_t_gamma[coeff_count + i]),
                    t,
                );
            } else {
                destination[i] =
                    zq::sub_mod(in_t_gamma[i], t.reduce(in_t_gamma[coeff_count + i]), t);
            }
            if destination[i] != 0 {
                destination[i] = zq::mul_operand_mod(destination[i], inv_gamma_mod_t, t);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_moduli(values: Vec<u64>) -> Vec<Modulus> {
        values.into_iter().map(Modulus::new).collect()
    }

    #[test]
    fn test_compose_decompose() {
        let check = |base: &RnsBase, input: Vec<u64>, residues: Vec<u64>| {
            let mut value = input.clone();
            base.decompose(&mut value);
            assert_eq!(value, residues);
            base.compose(&mut value);
            assert_eq!(value, input);
        };

        let base = RnsBase::new(&to_moduli(vec![3, 5])).unwrap();
        check(&base, vec![0, 0], vec![0, 0]);
        check(&base, vec![4, 0], vec![1, 4]);
        check(&base, vec![8, 0], vec![2, 3]);
        check(&base, vec![14, 0], vec![2, 4]);

        let base = RnsBase::new(&to_moduli(vec![2, 3, 5])).unwrap();
        check(&base, vec![11, 0, 0], vec![1, 2, 1]);
        check(&base, vec![29, 0, 0], vec![1, 2, 4]);

        let primes = numth::get_primes(2048, 60, 4);
        let base = RnsBase::new(&primes).unwrap();
        let input = vec![0xAAAAAAAAAAA, 0xBBBBBBBBBB, 0xCCCCCCCCCC, 0xDDDDDDDDDD];
        let residues = primes
            .iter()
            .map(|p| zq::modulo_words(&input, p))
            .collect::<Vec<_>>();
        check(&base, input, residues);
    }

    #[test]
    fn test_compose_decompose_array() {
        let check = |base: &RnsBase, input: Vec<u64>, residues: Vec<u64>| {
            let mut value = input.clone();
            base.decompose_array(&mut value);
            assert_eq!(value, residues);
            base.compose_array(&mut value);
            assert_eq!(value, input);
        };

        let base = RnsBase::new(&to_moduli(vec![3, 5])).unwrap();
        check(&base, vec![7, 0], vec![1, 2]);
        check(&base, vec![7, 0, 8, 0], vec![1, 2, 2, 3]);

        let base = RnsBase::new(&to_moduli(vec![3, 5, 7])).unwrap();
        check(
            &base,
            vec![7, 0, 0, 8, 0, 0, 9, 0, 0],
            vec![1, 2, 0, 2, 3, 4, 0, 1, 2],
        );
    }

    #[test]
    fn test_base_converter() {
        let convert = |in_mod: Vec<u64>, out_mod: Vec<u64>, input: Vec<u64>, output: Vec<u64>| {
            let ibase = RnsBase::new(&to_moduli(in_mod)).unwrap();
            let obase = RnsBase::new(&to_moduli(out_mod)).unwrap();
            let converter = BaseConverter::new(&ibase, &obase);
            let mut result = vec![0; output.len()];
            converter.fast_convert(&input, &mut result);
            assert_eq!(result, output);
        };

        convert(vec![2, 3], vec![2], vec![0, 0], vec![0]);
        convert(vec![2, 3], vec![2], vec![1, 1], vec![1]);
        convert(vec![2, 3], vec![2, 3], vec![1, 2], vec![1, 2]);
        convert(vec![2, 3], vec![3, 4, 5], vec![1, 1], vec![1, 3, 2]);
        convert(vec![3, 4, 5], vec![2, 3], vec![1, 1, 1], vec![1, 1]);
    }

    #[test]
    fn test_divide_and_round_q_last() {
        // Two 30-ish bit primes; dividing x*q_last + small by q_last should
        // recover roughly x.
        let degree = 4usize;
        let primes = numth::get_primes(2 * degree as u64, 30, 2);
        let base = RnsBase::new(&primes).unwrap();
        let tool = RnsTool::new(degree, &base, &Modulus::new(257)).unwrap();

        let q_last = primes[1].value();
        let x = [12345u64, 1, 0, 77];
        let mut input = vec![0u64; 2 * degree];
        for (i, &xi) in x.iter().enumerate() {
            let value = x_times_q_last(xi, q_last);
            input[i] = zq::modulo_words(&value, &primes[0]);
            input[degree + i] = zq::modulo_words(&value, &primes[1]);
        }
        tool.divide_and_round_q_last_inplace(&mut input);
        for (i, &xi) in x.iter().enumerate() {
            assert_eq!(input[i], xi);
        }
    }

    fn x_times_q_last(x: u64, q_last: u64) -> [u64; 2] {
        let wide = x as u128 * q_last as u128;
        [wide as u64, (wide >> 64) as u64]
    }
}
