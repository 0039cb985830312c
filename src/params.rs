use serde::{Deserialize, Serialize};

use crate::math::{self, hash};
use crate::modulus::Modulus;

/// The encryption scheme a parameter set targets.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum SchemeType {
    /// Placeholder; not valid for encryption.
    #[default]
    None,
    /// Brakerski/Fan-Vercauteren: exact arithmetic modulo a plain modulus.
    /// RNS variant per BEHZ (<https://eprint.iacr.org/2016/510>).
    Bfv,
    /// Cheon-Kim-Kim-Song: approximate fixed-point arithmetic.
    /// RNS variant per <https://eprint.iacr.org/2018/931>.
    Ckks,
}

/// A fingerprint identifying one point of the modulus switching chain.
///
/// The zero id doubles as the sentinel for plaintexts in plain (non-NTT,
/// non-RNS) coefficient form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct ParmsId(pub(crate) hash::HashBlock);

/// The reserved zero id.
pub const PARMS_ID_ZERO: ParmsId = ParmsId(hash::HASH_ZERO_BLOCK);

impl ParmsId {
    pub fn is_zero(&self) -> bool {
        self.0 == hash::HASH_ZERO_BLOCK
    }
}

impl std::fmt::Display for ParmsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:016x}{:016x}{:016x}{:016x}",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Builder-style container for the user-chosen encryption parameters: scheme,
/// polynomial modulus degree N, coefficient modulus chain, and (BFV) plain
/// modulus. Every setter refreshes the [`ParmsId`] fingerprint.
#[derive(Default, Clone, Debug)]
pub struct EncryptionParameters {
    scheme: SchemeType,
    poly_modulus_degree: usize,
    coeff_modulus: Vec<Modulus>,
    plain_modulus: Modulus,
    parms_id: ParmsId,
}

impl EncryptionParameters {
    pub fn new(scheme: SchemeType) -> Self {
        let mut ret = EncryptionParameters {
            scheme,
            poly_modulus_degree: 0,
            coeff_modulus: vec![],
            plain_modulus: Modulus::new(0),
            parms_id: PARMS_ID_ZERO,
        };
        ret.compute_parms_id();
        ret
    }

    pub fn scheme(&self) -> SchemeType {
        self.scheme
    }

    pub fn poly_modulus_degree(&self) -> usize {
        self.poly_modulus_degree
    }

    pub fn coeff_modulus(&self) -> &[Modulus] {
        &self.coeff_modulus
    }

    pub fn plain_modulus(&self) -> &Modulus {
        &self.plain_modulus
    }

    pub fn parms_id(&self) -> &ParmsId {
        &self.parms_id
    }

    pub fn set_poly_modulus_degree(mut self, poly_modulus_degree: usize) -> Self {
        if self.scheme == SchemeType::None && poly_modulus_degree > 0 {
            panic!("[Logic error] Poly modulus degree is not supported for this scheme.");
        }
        self.poly_modulus_degree = poly_modulus_degree;
        self.compute_parms_id();
        self
    }

    pub fn set_coeff_modulus(mut self, coeff_modulus: &[Modulus]) -> Self {
        if self.scheme == SchemeType::None && !coeff_modulus.is_empty() {
            panic!("[Logic error] Coefficient modulus is not supported for this scheme.");
        }
        if coeff_modulus.len() > math::COEFF_MOD_COUNT_MAX
            || coeff_modulus.len() < math::COEFF_MOD_COUNT_MIN
        {
            panic!("[Invalid argument] Coefficient modulus size is invalid.");
        }
        self.coeff_modulus = coeff_modulus.to_vec();
        self.compute_parms_id();
        self
    }

    pub fn set_plain_modulus(mut self, plain_modulus: &Modulus) -> Self {
        if self.scheme != SchemeType::Bfv && !plain_modulus.is_zero() {
            panic!("[Logic error] Plain modulus is not supported for this scheme.");
        }
        self.plain_modulus = *plain_modulus;
        self.compute_parms_id();
        self
    }

    pub fn set_plain_modulus_u64(self, plain_modulus: u64) -> Self {
        self.set_plain_modulus(&Modulus::new(plain_modulus))
    }

    fn compute_parms_id(&mut self) {
        let mut words = Vec::with_capacity(3 + self.coeff_modulus.len());
        words.push(self.scheme as u64);
        words.push(self.poly_modulus_degree as u64);
        words.extend(self.coeff_modulus.iter().map(|x| x.value()));
        words.push(self.plain_modulus.value());
        hash::hash(&words, &mut self.parms_id.0);
        // The zero block is reserved for non-NTT plaintexts.
        if self.parms_id == PARMS_ID_ZERO {
            panic!("[Logic error] Parameter fingerprint hashed to the reserved zero block.");
        }
    }
}

/// Standard security levels from the HomomorphicEncryption.org standard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SecurityLevel {
    /// No enforced bound.
    #[default]
    None,
    /// 128-bit classical.
    Tc128,
    /// 192-bit classical.
    Tc192,
    /// 256-bit classical.
    Tc256,
}

/// Why a parameter set failed validation (or `Success`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ErrorType {
    /// Constructed but not yet validated.
    #[default]
    None,
    Success,
    InvalidScheme,
    InvalidCoeffModulusSize,
    InvalidCoeffModulusBitCount,
    InvalidCoeffModulusNoNtt,
    InvalidPolyModulusDegree,
    InvalidPolyModulusDegreeNonPowerOfTwo,
    InvalidParametersTooLarge,
    InvalidParametersInsecure,
    FailedCreatingRnsBase,
    InvalidPlainModulusBitCount,
    InvalidPlainModulusCoprimality,
    InvalidPlainModulusTooLarge,
    InvalidPlainModulusNonzero,
    FailedCreatingRnsTool,
}

/// Derived attributes of a validated parameter set. Read-only for users; the
/// evaluator keys algorithmic choices (batching rotations, fast plain lift,
/// base-conversion shortcuts) off these flags.
#[derive(Default, Debug)]
pub struct EncryptionParameterQualifiers {
    pub parameter_error: ErrorType,
    /// The polynomial modulus is X^N + 1 with N a power of two.
    pub using_fft: bool,
    /// All coefficient modulus primes are congruent to 1 mod 2N.
    pub using_ntt: bool,
    /// The plain modulus supports SIMD slot encoding (always true for CKKS).
    pub using_batching: bool,
    /// Every coefficient prime exceeds the plain modulus, so plaintexts lift
    /// into RNS without multi-precision arithmetic.
    pub using_fast_plain_lift: bool,
    /// The coefficient primes decrease along the chain.
    pub using_descending_modulus_chain: bool,
    pub sec_level: SecurityLevel,
}

impl EncryptionParameterQualifiers {
    #[inline]
    pub fn parameters_set(&self) -> bool {
        matches!(self.parameter_error, ErrorType::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parms_id_tracks_setters() {
        let parms = EncryptionParameters::new(SchemeType::Bfv);
        let id0 = *parms.parms_id();
        let parms = parms.set_poly_modulus_degree(8);
        let id1 = *parms.parms_id();
        assert_ne!(id0, id1);
        let parms = parms.set_coeff_modulus(&[Modulus::new(17), Modulus::new(97)]);
        let id2 = *parms.parms_id();
        assert_ne!(id1, id2);
        let parms = parms.set_plain_modulus_u64(5);
        assert_ne!(id2, *parms.parms_id());

        let again = EncryptionParameters::new(SchemeType::Bfv)
            .set_poly_modulus_degree(8)
            .set_coeff_modulus(&[Modulus::new(17), Modulus::new(97)])
            .set_plain_modulus_u64(5);
        assert_eq!(parms.parms_id(), again.parms_id());
    }

    #[test]
    #[should_panic]
    fn test_plain_modulus_rejected_for_ckks() {
        let _ = EncryptionParameters::new(SchemeType::Ckks)
            .set_poly_modulus_degree(8)
            .set_plain_modulus_u64(17);
    }
}
