use std::sync::Arc;

use num_complex::Complex;

use crate::context::Context;
use crate::math::dwt::{DwtHandler, TransformArith};
use crate::math::galois::GALOIS_GENERATOR;
use crate::math::{self, poly, wide, zq};
use crate::params::{ParmsId, SchemeType, PARMS_ID_ZERO};
use crate::plaintext::Plaintext;
use crate::validity::Validity;

/// SIMD slot encoder for the BFV scheme.
///
/// When the plain modulus is a prime congruent to 1 mod 2N, the plaintext
/// ring splits into N slots; this encoder maps `u64` vectors to and from that
/// slot view (a 2-by-(N/2) matrix whose rows rotate independently). It also
/// offers a raw polynomial encoding for callers that want to place
/// coefficients directly.
pub struct BatchEncoder {
    context: Arc<Context>,
    slots: usize,
    matrix_reps_index_map: Vec<usize>,
}

impl BatchEncoder {
    pub fn new(context: Arc<Context>) -> Self {
        if !context.parameters_set() {
            panic!("[Invalid argument] Encryption parameters are not set correctly.");
        }
        let context_data = context.first_context_data().unwrap();
        let parms = context_data.parms();
        if parms.scheme() != SchemeType::Bfv {
            panic!("[Invalid argument] Unsupported scheme.");
        }

        let slots = parms.poly_modulus_degree();
        let mut matrix_reps_index_map = vec![];
        if context_data.qualifiers().using_batching {
            // Slot i sits at the bit-reversed position of the exponent of the
            // 2N-th root that the generator walk visits; the second matrix
            // row walks the negated powers.
            let logn = math::try_power_of_two(slots as u64).unwrap();
            matrix_reps_index_map = vec![0; slots];
            let row_size = slots >> 1;
            let m = slots << 1;
            let mut pos = 1;
            for i in 0..row_size {
                let index1 = (pos - 1) >> 1;
                let index2 = (m - pos - 1) >> 1;
                matrix_reps_index_map[i] = math::reverse_bits(index1 as u64, logn) as usize;
                matrix_reps_index_map[i + row_size] =
                    math::reverse_bits(index2 as u64, logn) as usize;
                pos = (pos * GALOIS_GENERATOR) & (m - 1);
            }
        }

        BatchEncoder {
            context,
            slots,
            matrix_reps_index_map,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots
    }

    pub fn row_count(&self) -> usize {
        2
    }

    pub fn column_count(&self) -> usize {
        self.slots / 2
    }

    pub fn simd_encoding_supported(&self) -> bool {
        !self.matrix_reps_index_map.is_empty()
    }

    pub fn plain_modulus_value(&self) -> u64 {
        self.context
            .first_context_data()
            .unwrap()
            .parms()
            .plain_modulus()
            .value()
    }

    /// Encodes up to `slot_count` values into the slot view.
    pub fn encode(&self, values: &[u64], destination: &mut Plaintext) {
        if self.matrix_reps_index_map.is_empty() {
            panic!("[Invalid argument] The parameters do not support batching.");
        }
        if values.len() > self.slots {
            panic!("[Invalid argument] Too many values to encode.");
        }
        let context_data = self.context.first_context_data().unwrap();

        destination.set_parms_id(PARMS_ID_ZERO);
        destination.resize(self.slots);
        for (i, &value) in values.iter().enumerate() {
            destination.data_mut()[self.matrix_reps_index_map[i]] = value;
        }
        for i in values.len()..self.slots {
            destination.data_mut()[self.matrix_reps_index_map[i]] = 0;
        }
        // The index map already bit-reversed the values.
        context_data
            .plain_ntt_tables()
            .inverse(destination.data_mut());
    }

    pub fn encode_new(&self, values: &[u64]) -> Plaintext {
        let mut destination = Plaintext::default();
        self.encode(values, &mut destination);
        destination
    }

    /// Encodes raw polynomial coefficients (no slot transform).
    pub fn encode_polynomial(&self, values: &[u64], destination: &mut Plaintext) {
        if values.len() > self.slots {
            panic!("[Invalid argument] Too many coefficients to encode.");
        }
        let context_data = self.context.first_context_data().unwrap();
        let modulus = context_data.parms().plain_modulus();
        destination.set_parms_id(PARMS_ID_ZERO);
        destination.resize(values.len());
        for (slot, &value) in destination.data_mut().iter_mut().zip(values.iter()) {
            *slot = modulus.reduce(value);
        }
    }

    pub fn encode_polynomial_new(&self, values: &[u64]) -> Plaintext {
        let mut destination = Plaintext::default();
        self.encode_polynomial(values, &mut destination);
        destination
    }

    /// Decodes the slot view; the result always has `slot_count` entries.
    pub fn decode(&self, plain: &Plaintext, destination: &mut Vec<u64>) {
        if self.matrix_reps_index_map.is_empty() {
            panic!("[Invalid argument] The parameters do not support batching.");
        }
        if !plain.is_valid_for(&self.context) {
            panic!("[Invalid argument] Plaintext is not valid for encryption parameters.");
        }
        if plain.is_ntt_form() {
            panic!("[Invalid argument] Plaintext cannot be in NTT form.");
        }
        let context_data = self.context.first_context_data().unwrap();
        destination.resize(self.slots, 0);
        let mut coeffs = vec![0; self.slots];
        let plain_coeff_count = plain.coeff_count().min(self.slots);
        coeffs[..plain_coeff_count].copy_from_slice(&plain.data()[..plain_coeff_count]);
        context_data.plain_ntt_tables().forward(&mut coeffs);
        for (i, slot) in destination.iter_mut().enumerate() {
            *slot = coeffs[self.matrix_reps_index_map[i]];
        }
    }

    pub fn decode_new(&self, plain: &Plaintext) -> Vec<u64> {
        let mut destination = vec![];
        self.decode(plain, &mut destination);
        destination
    }

    pub fn decode_polynomial_new(&self, plain: &Plaintext) -> Vec<u64> {
        plain.data().to_vec()
    }
}

/// Complex arithmetic instantiation of the shared butterfly core.
#[derive(Clone, Copy, Default)]
struct ComplexArith;

type FftHandler = DwtHandler<ComplexArith>;

impl TransformArith for ComplexArith {
    type Value = Complex<f64>;
    type Root = Complex<f64>;
    type Scalar = f64;

    #[inline]
    fn add(&self, a: &Self::Value, b: &Self::Value) -> Self::Value {
        a + b
    }

    #[inline]
    fn sub(&self, a: &Self::Value, b: &Self::Value) -> Self::Value {
        a - b
    }

    #[inline]
    fn mul_root(&self, a: &Self::Value, r: &Self::Root) -> Self::Value {
        a * r
    }

    #[inline]
    fn mul_scalar(&self, a: &Self::Value, s: &Self::Scalar) -> Self::Value {
        a * s
    }

    #[inline]
    fn guard(&self, a: &Self::Value) -> Self::Value {
        *a
    }
}

/// Roots of unity on the unit circle, stored for one octant and unfolded by
/// symmetry.
struct ComplexRoots {
    roots: Vec<Complex<f64>>,
    degree: usize,
}

impl ComplexRoots {
    fn new(degree: usize) -> Self {
        let roots = (0..=degree / 8)
            .map(|i| {
                Complex::from_polar(1.0, 2.0 * std::f64::consts::PI * i as f64 / degree as f64)
            })
            .collect();
        Self { roots, degree }
    }

    fn get_root(&self, mut index: usize) -> Complex<f64> {
        index &= self.degree - 1;
        let mirror = |a: Complex<f64>| Complex::new(a.im, a.re);
        if index <= self.degree / 8 {
            self.roots[index]
        } else if index <= self.degree / 4 {
            mirror(self.roots[self.degree / 4 - index])
        } else if index < self.degree / 2 {
            -self.get_root(self.degree / 2 - index).conj()
        } else if index <= 3 * self.degree / 4 {
            -self.get_root(index - self.degree / 2)
        } else {
            self.get_root(self.degree - index).conj()
        }
    }
}

/// Canonical-embedding encoder for the CKKS scheme: maps vectors of up to N/2
/// complex numbers to NTT-form plaintexts at a chosen chain level and scale.
pub struct CkksEncoder {
    context: Arc<Context>,
    slots: usize,
    root_powers: Vec<Complex<f64>>,
    inv_root_powers: Vec<Complex<f64>>,
    matrix_reps_index_map: Vec<usize>,
    fft_handler: FftHandler,
}

impl CkksEncoder {
    pub fn new(context: Arc<Context>) -> Self {
        if !context.parameters_set() {
            panic!("[Invalid argument] Encryption parameters are not set correctly.");
        }
        let context_data = context.first_context_data().unwrap();
        if !context_data.is_ckks() {
            panic!("[Invalid argument] Unsupported scheme.");
        }
        let coeff_count = context_data.parms().poly_modulus_degree();
        let slots = coeff_count / 2;
        let logn = math::try_power_of_two(coeff_count as u64).unwrap();

        let mut matrix_reps_index_map = vec![0; coeff_count];
        let m = coeff_count * 2;
        let mut pos = 1;
        for i in 0..slots {
            let index1 = (pos - 1) >> 1;
            let index2 = (m - pos - 1) >> 1;
            matrix_reps_index_map[i] = math::reverse_bits(index1 as u64, logn) as usize;
            matrix_reps_index_map[i | slots] = math::reverse_bits(index2 as u64, logn) as usize;
            pos = (pos * GALOIS_GENERATOR) & (m - 1);
        }

        let mut root_powers = vec![Complex::default(); coeff_count];
        let mut inv_root_powers = vec![Complex::default(); coeff_count];
        if m >= 8 {
            let complex_roots = ComplexRoots::new(m);
            for i in 1..coeff_count {
                root_powers[i] =
                    complex_roots.get_root(math::reverse_bits(i as u64, logn) as usize);
                inv_root_powers[i] = complex_roots
                    .get_root(math::reverse_bits((i - 1) as u64, logn) as usize + 1)
                    .conj();
            }
        } else if m == 4 {
            root_powers[1] = Complex::new(0.0, 1.0);
            inv_root_powers[1] = Complex::new(0.0, -1.0);
        }

        Self {
            context,
            slots,
            root_powers,
            inv_root_powers,
            matrix_reps_index_map,
            fft_handler: FftHandler::new(&ComplexArith),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots
    }

    /// Encodes a complex vector at the given chain level (`None` = first) and
    /// scale.
    pub fn encode(
        &self,
        values: &[Complex<f64>],
        parms_id: Option<ParmsId>,
        scale: f64,
        destination: &mut Plaintext,
    ) {
        let parms_id = parms_id.unwrap_or(*self.context.first_parms_id());
        self.encode_internal(values, &parms_id, scale, destination);
    }

    pub fn encode_new(
        &self,
        values: &[Complex<f64>],
        parms_id: Option<ParmsId>,
        scale: f64,
    ) -> Plaintext {
        let mut destination = Plaintext::default();
        self.encode(values, parms_id, scale, &mut destination);
        destination
    }

    /// Encodes a single real number, replicated into every slot. The FFT is
    /// unnecessary in this case: the encoding is the constant polynomial.
    pub fn encode_f64(
        &self,
        value: f64,
        parms_id: Option<ParmsId>,
        scale: f64,
        destination: &mut Plaintext,
    ) {
        let parms_id = parms_id.unwrap_or(*self.context.first_parms_id());
        let context_data = self
            .context
            .context_data(&parms_id)
            .unwrap_or_else(|| panic!("[Invalid argument] parms_id is not valid for the context."));
        let parms = context_data.parms();
        let coeff_modulus = parms.coeff_modulus();
        let coeff_count = parms.poly_modulus_degree();

        if scale <= 0.0
            || scale.log2() + 1.0 >= context_data.total_coeff_modulus_bit_count() as f64
        {
            panic!("[Invalid argument] Scale out of bounds.");
        }
        let scaled = value * scale;
        let coeff_bit_count = scaled.abs().max(1.0).log2() as usize + 2;
        if coeff_bit_count >= context_data.total_coeff_modulus_bit_count() {
            panic!("[Invalid argument] Value is too large to encode.");
        }

        let rounded = scaled.round();
        let is_negative = rounded < 0.0;
        let magnitude = rounded.abs() as u64;

        destination.set_parms_id(PARMS_ID_ZERO);
        destination.resize(coeff_count * coeff_modulus.len());
        for (j, chunk) in destination
            .data_mut()
            .chunks_mut(coeff_count)
            .enumerate()
        {
            let mut reduced = coeff_modulus[j].reduce(magnitude);
            if is_negative {
                reduced = zq::negate_mod(reduced, &coeff_modulus[j]);
            }
            chunk.fill(reduced);
        }

        destination.set_parms_id(parms_id);
        destination.set_scale(scale);
    }

    fn encode_internal(
        &self,
        values: &[Complex<f64>],
        parms_id: &ParmsId,
        scale: f64,
        destination: &mut Plaintext,
    ) {
        let context_data = self
            .context
            .context_data(parms_id)
            .unwrap_or_else(|| panic!("[Invalid argument] parms_id is not valid for the context."));
        if !context_data.is_ckks() {
            panic!("[Invalid argument] Unsupported scheme.");
        }
        if values.len() > self.slots {
            panic!("[Invalid argument] Too many values to encode.");
        }

        let parms = context_data.parms();
        let coeff_modulus = parms.coeff_modulus();
        let coeff_modulus_size = coeff_modulus.len();
        let coeff_count = parms.poly_modulus_degree();

        if scale <= 0.0
            || scale.log2() + 1.0 >= context_data.total_coeff_modulus_bit_count() as f64
        {
            panic!("[Invalid argument] Scale out of bounds.");
        }

        // Fill the slots (and their conjugates) and run the inverse embedding.
        let n = self.slots * 2;
        let mut conj_values = vec![Complex::default(); n];
        for (i, value) in values.iter().enumerate() {
            conj_values[self.matrix_reps_index_map[i]] = *value;
            conj_values[self.matrix_reps_index_map[i + self.slots]] = value.conj();
        }
        let fix = scale / n as f64;
        self.fft_handler.transform_from_rev(
            &mut conj_values,
            math::try_power_of_two(n as u64).unwrap(),
            &self.inv_root_powers,
            Some(&fix),
        );

        let max_coeff = conj_values
            .iter()
            .map(|x| x.re.abs())
            .fold(0.0f64, f64::max);
        let max_coeff_bit_count = max_coeff.max(1.0).log2().ceil() as usize;
        if max_coeff_bit_count >= context_data.total_coeff_modulus_bit_count() {
            panic!("[Invalid argument] Values are too large to encode.");
        }

        destination.set_parms_id(PARMS_ID_ZERO);
        destination.resize(coeff_count * coeff_modulus_size);

        let two_pow_64 = 2.0f64.powi(64);
        let data = destination.data_mut();
        if max_coeff_bit_count <= 64 {
            for i in 0..n {
                let coeff = conj_values[i].re.round();
                let is_negative = coeff < 0.0;
                let magnitude = coeff.abs() as u64;
                for (j, modulus) in coeff_modulus.iter().enumerate() {
                    let mut reduced = modulus.reduce(magnitude);
                    if is_negative {
                        reduced = zq::negate_mod(reduced, modulus);
                    }
                    data[i + j * coeff_count] = reduced;
                }
            }
        } else if max_coeff_bit_count <= 128 {
            for i in 0..n {
                let coeff = conj_values[i].re.round();
                let is_negative = coeff < 0.0;
                let magnitude = coeff.abs();
                let wide_coeff = ((magnitude / two_pow_64) as u128) << 64
                    | (magnitude % two_pow_64) as u128;
                for (j, modulus) in coeff_modulus.iter().enumerate() {
                    let mut reduced = modulus.reduce_u128(wide_coeff);
                    if is_negative {
                        reduced = zq::negate_mod(reduced, modulus);
                    }
                    data[i + j * coeff_count] = reduced;
                }
            }
        } else {
            // Wider coefficients go through a full RNS decomposition.
            for i in 0..n {
                let coeff = conj_values[i].re.round();
                let is_negative = coeff < 0.0;
                let mut magnitude = coeff.abs();
                let mut words = vec![0; coeff_modulus_size];
                let mut index = 0;
                while magnitude >= 1.0 {
                    words[index] = (magnitude % two_pow_64) as u64;
                    magnitude /= two_pow_64;
                    index += 1;
                }
                context_data.rns_tool().base_q().decompose(&mut words);
                for (j, modulus) in coeff_modulus.iter().enumerate() {
                    data[i + j * coeff_count] = if is_negative {
                        zq::negate_mod(words[j], modulus)
                    } else {
                        words[j]
                    };
                }
            }
        }

        poly::ntt_rns(destination.data_mut(), coeff_count, context_data.small_ntt_tables());
        destination.set_parms_id(*parms_id);
        destination.set_scale(scale);
    }

    /// Decodes an NTT-form plaintext back to the slot vector.
    pub fn decode(&self, plain: &Plaintext, destination: &mut Vec<Complex<f64>>) {
        if !plain.is_ntt_form() {
            panic!("[Invalid argument] Plaintext is not in NTT form.");
        }
        if !plain.is_valid_for(&self.context) {
            panic!("[Invalid argument] Plaintext is not valid for encryption parameters.");
        }
        let context_data = self.context.context_data(plain.parms_id()).unwrap();
        let parms = context_data.parms();
        let coeff_modulus_size = parms.coeff_modulus().len();
        let coeff_count = parms.poly_modulus_degree();
        let logn = math::try_power_of_two(coeff_count as u64).unwrap();

        if plain.scale() <= 0.0
            || plain.scale().log2() as usize >= context_data.total_coeff_modulus_bit_count()
        {
            panic!("[Invalid argument] Plaintext scale is invalid.");
        }
        destination.resize(self.slots, Complex::default());

        let decryption_modulus = context_data.total_coeff_modulus();
        let upper_half_threshold = context_data.upper_half_threshold();
        let inv_scale = 1.0 / plain.scale();

        let mut coeffs = plain.data().to_vec();
        poly::intt_rns(&mut coeffs, coeff_count, context_data.small_ntt_tables());
        context_data.rns_tool().base_q().compose_array(&mut coeffs);

        // Rebuild signed floating-point coefficients from the composed
        // multi-precision values.
        let two_pow_64 = 2.0f64.powi(64);
        let mut values = vec![Complex::default(); coeff_count];
        for i in 0..coeff_count {
            let words = &coeffs[i * coeff_modulus_size..(i + 1) * coeff_modulus_size];
            let mut accumulated = 0.0f64;
            if wide::is_greater_than_or_equal(words, upper_half_threshold) {
                let mut scale_factor = inv_scale;
                for (word, modulus_word) in words.iter().zip(decryption_modulus.iter()) {
                    accumulated += if word > modulus_word {
                        (word - modulus_word) as f64 * scale_factor
                    } else {
                        -((modulus_word - word) as f64 * scale_factor)
                    };
                    scale_factor *= two_pow_64;
                }
            } else {
                let mut scale_factor = inv_scale;
                for word in words {
                    accumulated += *word as f64 * scale_factor;
                    scale_factor *= two_pow_64;
                }
            }
            values[i] = Complex::new(accumulated, 0.0);
        }

        self.fft_handler
            .transform_to_rev(&mut values, logn, &self.root_powers, None);
        for (i, slot) in destination.iter_mut().enumerate() {
            *slot = values[self.matrix_reps_index_map[i]];
        }
    }

    pub fn decode_new(&self, plain: &Plaintext) -> Vec<Complex<f64>> {
        let mut destination = vec![];
        self.decode(plain, &mut destination);
        destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modulus::CoeffModulus;
    use crate::params::{EncryptionParameters, SecurityLevel};

    #[test]
    fn test_batch_encoder_round_trip() {
        let parms = EncryptionParameters::new(SchemeType::Bfv)
            .set_poly_modulus_degree(64)
            .set_coeff_modulus(&CoeffModulus::create(64, vec![60]))
            .set_plain_modulus_u64(257);
        let context = Context::new(parms, false, SecurityLevel::None);
        assert!(context.first_context_data().unwrap().qualifiers().using_batching);
        let encoder = BatchEncoder::new(context);
        assert_eq!(encoder.slot_count(), 64);

        let values: Vec<u64> = (0..64).collect();
        let plain = encoder.encode_new(&values);
        assert_eq!(encoder.decode_new(&plain), values);

        // A constant vector encodes to a constant polynomial.
        let values = vec![5u64; 64];
        let plain = encoder.encode_new(&values);
        assert_eq!(plain.data()[0], 5);
        assert!(plain.data()[1..].iter().all(|&x| x == 0));
        assert_eq!(encoder.decode_new(&plain), values);

        let values: Vec<u64> = (0..20).collect();
        let plain = encoder.encode_new(&values);
        let decoded = encoder.decode_new(&plain);
        assert_eq!(&decoded[..20], &values[..]);
        assert!(decoded[20..].iter().all(|&x| x == 0));
    }

    #[test]
    fn test_ckks_encoder_round_trip() {
        let parms = EncryptionParameters::new(SchemeType::Ckks)
            .set_poly_modulus_degree(64)
            .set_coeff_modulus(&CoeffModulus::create(64, vec![40, 40, 40]));
        let context = Context::new(parms, true, SecurityLevel::None);
        let encoder = CkksEncoder::new(context);

        let values: Vec<Complex<f64>> = (0..32)
            .map(|i| Complex::new(i as f64 * 0.25 - 3.0, -(i as f64)))
            .collect();
        let scale = (1u64 << 30) as f64;
        let plain = encoder.encode_new(&values, None, scale);
        let decoded = encoder.decode_new(&plain);
        for (expected, got) in values.iter().zip(decoded.iter()) {
            assert!((expected - got).norm() < 1e-3);
        }

        let mut plain = Plaintext::default();
        encoder.encode_f64(42.5, None, scale, &mut plain);
        let decoded = encoder.decode_new(&plain);
        for slot in decoded {
            assert!((slot.re - 42.5).abs() < 1e-3);
            assert!(slot.im.abs() < 1e-3);
        }
    }
}
