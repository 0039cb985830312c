use crate::context::Context;
use crate::math;
use crate::params::{ParmsId, PARMS_ID_ZERO};

/// A ciphertext: `size` polynomials, each a `[k × N]` RNS tensor in
/// little-endian prime order, bound to one point of the modulus chain.
///
/// The data is operated on by the [`Evaluator`](crate::Evaluator); users
/// normally only move ciphertexts around. BFV ciphertexts live in coefficient
/// form, CKKS ciphertexts in NTT form.
#[derive(Clone)]
pub struct Ciphertext {
    size: usize,
    coeff_modulus_size: usize,
    poly_modulus_degree: usize,
    data: Vec<u64>,
    parms_id: ParmsId,
    scale: f64,
    is_ntt_form: bool,
}

impl Default for Ciphertext {
    fn default() -> Self {
        Ciphertext {
            size: 0,
            coeff_modulus_size: 0,
            poly_modulus_degree: 0,
            data: vec![],
            parms_id: PARMS_ID_ZERO,
            scale: 1.0,
            is_ntt_form: false,
        }
    }
}

impl Ciphertext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parms_id(&self) -> &ParmsId {
        &self.parms_id
    }

    pub fn set_parms_id(&mut self, parms_id: ParmsId) {
        self.parms_id = parms_id;
    }

    /// The CKKS scale; 1.0 for BFV.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
    }

    pub fn coeff_modulus_size(&self) -> usize {
        self.coeff_modulus_size
    }

    pub fn poly_modulus_degree(&self) -> usize {
        self.poly_modulus_degree
    }

    /// Number of polynomials (at least 2 for anything decryptable).
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_ntt_form(&self) -> bool {
        self.is_ntt_form
    }

    pub fn set_is_ntt_form(&mut self, is_ntt_form: bool) {
        self.is_ntt_form = is_ntt_form;
    }

    pub fn data(&self) -> &[u64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u64] {
        &mut self.data
    }

    /// Rebinds the ciphertext to a chain level and polynomial count,
    /// reallocating the backing buffer as needed.
    pub fn resize(&mut self, context: &Context, parms_id: &ParmsId, size: usize) {
        if !context.parameters_set() {
            panic!("[Invalid argument] Context parameters are not set correctly.");
        }
        let context_data = context
            .context_data(parms_id)
            .unwrap_or_else(|| panic!("[Invalid argument] parms_id is not valid for the context."));
        let parms = context_data.parms();
        self.parms_id = *parms_id;
        self.resize_internal(
            size,
            parms.poly_modulus_degree(),
            parms.coeff_modulus().len(),
        );
    }

    fn resize_internal(&mut self, size: usize, poly_modulus_degree: usize, coeff_modulus_size: usize) {
        if (size < math::CIPHERTEXT_SIZE_MIN && size != 0) || size > math::CIPHERTEXT_SIZE_MAX {
            panic!("[Invalid argument] Ciphertext size out of bounds.");
        }
        self.data.resize(size * poly_modulus_degree * coeff_modulus_size, 0);
        self.size = size;
        self.poly_modulus_degree = poly_modulus_degree;
        self.coeff_modulus_size = coeff_modulus_size;
    }

    #[inline]
    fn poly_words(&self) -> usize {
        self.poly_modulus_degree * self.coeff_modulus_size
    }

    pub fn poly(&self, index: usize) -> &[u64] {
        let d = self.poly_words();
        &self.data[index * d..(index + 1) * d]
    }

    pub fn poly_mut(&mut self, index: usize) -> &mut [u64] {
        let d = self.poly_words();
        &mut self.data[index * d..(index + 1) * d]
    }

    /// Two distinct polynomials, one mutable; panics if `a == b`.
    pub fn poly_pair_mut(&mut self, a: usize, b: usize) -> (&mut [u64], &[u64]) {
        assert_ne!(a, b);
        let d = self.poly_words();
        if a < b {
            let (left, right) = self.data.split_at_mut(b * d);
            (&mut left[a * d..(a + 1) * d], &right[..d])
        } else {
            let (left, right) = self.data.split_at_mut(a * d);
            (&mut right[..d], &left[b * d..(b + 1) * d])
        }
    }

    /// Polynomials `[lower, upper)` as one flat slice.
    pub fn polys(&self, lower: usize, upper: usize) -> &[u64] {
        let d = self.poly_words();
        &self.data[lower * d..upper * d]
    }

    pub fn polys_mut(&mut self, lower: usize, upper: usize) -> &mut [u64] {
        let d = self.poly_words();
        &mut self.data[lower * d..upper * d]
    }

    pub fn poly_component(&self, poly_index: usize, component_index: usize) -> &[u64] {
        let offset =
            self.poly_modulus_degree * (poly_index * self.coeff_modulus_size + component_index);
        &self.data[offset..offset + self.poly_modulus_degree]
    }

    pub fn poly_component_mut(&mut self, poly_index: usize, component_index: usize) -> &mut [u64] {
        let offset =
            self.poly_modulus_degree * (poly_index * self.coeff_modulus_size + component_index);
        &mut self.data[offset..offset + self.poly_modulus_degree]
    }

    /// A ciphertext whose c_1 component (and everything above) is zero
    /// decrypts without the secret key and usually indicates a programming
    /// error.
    pub fn is_transparent(&self) -> bool {
        if self.data.is_empty() || self.size < math::CIPHERTEXT_SIZE_MIN {
            true
        } else {
            self.polys(1, self.size).iter().all(|&x| x == 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_transparent() {
        let ciphertext = Ciphertext::new();
        assert!(ciphertext.is_transparent());
        assert_eq!(ciphertext.size(), 0);
    }
}
