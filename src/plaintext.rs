use serde::{Deserialize, Serialize};

use crate::math::wide;
use crate::params::{ParmsId, PARMS_ID_ZERO};

/// A plaintext polynomial.
///
/// In plain form (BFV before any NTT transform) the data is a coefficient
/// vector modulo the plain modulus, physically up to N words, and `parms_id`
/// is the zero sentinel. In RNS/NTT form (CKKS always; BFV after
/// `transform_plain_to_ntt`) the data is a full `[k × N]` RNS tensor bound to
/// a chain level.
#[derive(Clone, Serialize, Deserialize)]
pub struct Plaintext {
    coeff_count: usize,
    data: Vec<u64>,
    parms_id: ParmsId,
    scale: f64,
}

// ParmsId is a plain wrapper over four words; serialize it as such.
impl Serialize for ParmsId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ParmsId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(ParmsId(<[u64; 4]>::deserialize(deserializer)?))
    }
}

impl Default for Plaintext {
    fn default() -> Self {
        Plaintext {
            coeff_count: 0,
            data: vec![],
            parms_id: PARMS_ID_ZERO,
            scale: 1.0,
        }
    }
}

impl Plaintext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The zero sentinel when the plaintext is in plain coefficient form.
    pub fn parms_id(&self) -> &ParmsId {
        &self.parms_id
    }

    pub fn set_parms_id(&mut self, parms_id: ParmsId) {
        self.parms_id = parms_id;
    }

    /// The CKKS encoding scale; 1.0 for BFV plaintexts.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
    }

    pub fn coeff_count(&self) -> usize {
        self.coeff_count
    }

    pub fn set_coeff_count(&mut self, coeff_count: usize) {
        self.coeff_count = coeff_count;
    }

    pub fn nonzero_coeff_count(&self) -> usize {
        wide::nonzero_word_count(&self.data)
    }

    pub fn significant_coeff_count(&self) -> usize {
        wide::significant_word_count(&self.data)
    }

    pub fn is_ntt_form(&self) -> bool {
        self.parms_id != PARMS_ID_ZERO
    }

    /// Resizing is only meaningful in plain coefficient form.
    pub fn resize(&mut self, coeff_count: usize) {
        if self.is_ntt_form() {
            panic!("[Logic error] Cannot resize a plaintext in NTT form.");
        }
        self.coeff_count = coeff_count;
        self.data.resize(coeff_count, 0);
    }

    pub fn data(&self) -> &[u64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u64] {
        &mut self.data
    }

    pub fn data_at(&self, index: usize) -> u64 {
        self.data[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_and_counts() {
        let mut plain = Plaintext::new();
        assert!(!plain.is_ntt_form());
        plain.resize(8);
        assert_eq!(plain.coeff_count(), 8);
        plain.data_mut()[0] = 3;
        plain.data_mut()[5] = 1;
        assert_eq!(plain.nonzero_coeff_count(), 2);
        assert_eq!(plain.significant_coeff_count(), 6);
    }
}
