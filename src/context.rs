use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use crate::math::{
    self, wide, zq, Blake3Prng, GaloisTool, MulModOperand, NttTables, PrngFactory, RnsBase, RnsTool,
};
use crate::modulus::CoeffModulus;
use crate::params::{
    EncryptionParameterQualifiers, EncryptionParameters, ErrorType, ParmsId, SchemeType,
    SecurityLevel,
};

/// Pre-computations for one point of the modulus switching chain.
///
/// Everything in here is immutable after construction and shared behind an
/// `Arc`, so a `ContextData` may be read from any number of threads.
pub struct ContextData {
    parms: EncryptionParameters,
    qualifiers: EncryptionParameterQualifiers,
    rns_tool: Option<RnsTool>,
    small_ntt_tables: Vec<NttTables>,
    plain_ntt_tables: Option<NttTables>,
    galois_tool: Option<GaloisTool>,
    total_coeff_modulus: Vec<u64>,
    total_coeff_modulus_bit_count: usize,
    coeff_div_plain_modulus: Vec<MulModOperand>,
    plain_upper_half_threshold: u64,
    plain_upper_half_increment: Vec<u64>,
    upper_half_threshold: Vec<u64>,
    upper_half_increment: Vec<u64>,
    coeff_modulus_mod_plain_modulus: u64,
    prev_context_data: OnceLock<Weak<ContextData>>,
    next_context_data: Option<Arc<ContextData>>,
    chain_index: usize,
}

impl ContextData {
    fn new(parms: EncryptionParameters) -> Self {
        ContextData {
            parms,
            qualifiers: EncryptionParameterQualifiers::default(),
            rns_tool: None,
            small_ntt_tables: vec![],
            plain_ntt_tables: None,
            galois_tool: None,
            total_coeff_modulus: vec![],
            total_coeff_modulus_bit_count: 0,
            coeff_div_plain_modulus: vec![],
            plain_upper_half_threshold: 0,
            plain_upper_half_increment: vec![],
            upper_half_threshold: vec![],
            upper_half_increment: vec![],
            coeff_modulus_mod_plain_modulus: 0,
            prev_context_data: OnceLock::new(),
            next_context_data: None,
            chain_index: 0,
        }
    }

    pub fn parms(&self) -> &EncryptionParameters {
        &self.parms
    }

    pub fn parms_id(&self) -> &ParmsId {
        self.parms.parms_id()
    }

    pub fn qualifiers(&self) -> &EncryptionParameterQualifiers {
        &self.qualifiers
    }

    /// Product of the coefficient modulus primes at this level.
    pub fn total_coeff_modulus(&self) -> &[u64] {
        &self.total_coeff_modulus
    }

    pub fn total_coeff_modulus_bit_count(&self) -> usize {
        self.total_coeff_modulus_bit_count
    }

    /// floor(q / t) in RNS form ("Delta" in the BFV literature).
    pub fn coeff_div_plain_modulus(&self) -> &[MulModOperand] {
        &self.coeff_div_plain_modulus
    }

    /// (t + 1) / 2 for BFV; 2^63 for CKKS.
    pub fn plain_upper_half_threshold(&self) -> u64 {
        self.plain_upper_half_threshold
    }

    /// The lift applied to upper-half plaintext coefficients: q - t (either
    /// multi-precision or per-prime, depending on `using_fast_plain_lift`)
    /// for BFV, and -2^64 mod q_i for CKKS.
    pub fn plain_upper_half_increment(&self) -> &[u64] {
        &self.plain_upper_half_increment
    }

    /// (q + 1) / 2, the decode threshold for CKKS.
    pub fn upper_half_threshold(&self) -> &[u64] {
        &self.upper_half_threshold
    }

    /// q mod t in RNS form.
    pub fn upper_half_increment(&self) -> &[u64] {
        &self.upper_half_increment
    }

    /// q mod t as a plain word.
    pub fn coeff_modulus_mod_plain_modulus(&self) -> u64 {
        self.coeff_modulus_mod_plain_modulus
    }

    pub fn small_ntt_tables(&self) -> &[NttTables] {
        &self.small_ntt_tables
    }

    pub fn plain_ntt_tables(&self) -> &NttTables {
        self.plain_ntt_tables.as_ref().unwrap()
    }

    pub(crate) fn rns_tool(&self) -> &RnsTool {
        self.rns_tool.as_ref().unwrap()
    }

    pub(crate) fn galois_tool(&self) -> &GaloisTool {
        self.galois_tool.as_ref().unwrap()
    }

    /// Distance from the end of the chain; the leaf level has index 0.
    pub fn chain_index(&self) -> usize {
        self.chain_index
    }

    pub fn next_context_data(&self) -> Option<Arc<ContextData>> {
        self.next_context_data.clone()
    }

    pub fn prev_context_data(&self) -> Option<Arc<ContextData>> {
        self.prev_context_data.get()?.upgrade()
    }

    pub fn is_bfv(&self) -> bool {
        self.parms.scheme() == SchemeType::Bfv
    }

    pub fn is_ckks(&self) -> bool {
        self.parms.scheme() == SchemeType::Ckks
    }
}

/// Validates a parameter set and owns the resulting modulus switching chain.
///
/// The first entry of the chain holds the *key* parameters (all primes,
/// including the special prime) used exclusively by key material. Data levels
/// follow, each dropping the last prime of its predecessor. Lookup is by
/// [`ParmsId`].
pub struct Context {
    key_parms_id: ParmsId,
    first_parms_id: ParmsId,
    last_parms_id: ParmsId,
    context_data_map: HashMap<ParmsId, Arc<ContextData>>,
    sec_level: SecurityLevel,
    using_keyswitching: bool,
    prng_factory: PrngFactory,
}

impl Context {
    /// Validates `parms` and builds the chain. `expand_mod_chain` controls
    /// whether data levels beyond the first are derived.
    pub fn new(
        parms: EncryptionParameters,
        expand_mod_chain: bool,
        sec_level: SecurityLevel,
    ) -> Arc<Self> {
        let key_parms_id = *parms.parms_id();

        // Validate levels outward from the key parameters; stop at the first
        // failure or when a single prime remains.
        let key_data = Self::validate(parms.clone(), sec_level);
        let key_valid = key_data.qualifiers.parameters_set();
        let mut levels = vec![key_data];

        let make_next = |parms: &EncryptionParameters| {
            let mut coeff_modulus = parms.coeff_modulus().to_vec();
            coeff_modulus.pop();
            parms.clone().set_coeff_modulus(&coeff_modulus)
        };

        if key_valid && parms.coeff_modulus().len() > 1 {
            let first = Self::validate(make_next(&parms), sec_level);
            if first.qualifiers.parameters_set() {
                levels.push(first);
            }
        }
        let using_keyswitching = levels.len() > 1;

        if expand_mod_chain && levels.len() > 1 {
            while levels.last().unwrap().parms.coeff_modulus().len() > 1 {
                let next = Self::validate(make_next(&levels.last().unwrap().parms), sec_level);
                if !next.qualifiers.parameters_set() {
                    break;
                }
                levels.push(next);
            }
        }

        // Wrap into Arcs leaf-first so each level can own its successor;
        // backward links are weak and filled in afterwards.
        let count = levels.len();
        let mut next: Option<Arc<ContextData>> = None;
        let mut arcs: Vec<Arc<ContextData>> = Vec::with_capacity(count);
        for (index, mut data) in levels.into_iter().enumerate().rev() {
            data.chain_index = count - 1 - index;
            data.next_context_data = next.take();
            let arc = Arc::new(data);
            next = Some(arc.clone());
            arcs.push(arc);
        }
        arcs.reverse();
        for pair in arcs.windows(2) {
            let _ = pair[1].prev_context_data.set(Arc::downgrade(&pair[0]));
        }

        let first_parms_id = if arcs.len() > 1 {
            *arcs[1].parms_id()
        } else {
            key_parms_id
        };
        let last_parms_id = *arcs.last().unwrap().parms_id();

        let context_data_map = arcs
            .into_iter()
            .map(|arc| (*arc.parms_id(), arc))
            .collect::<HashMap<_, _>>();

        Arc::new(Context {
            key_parms_id,
            first_parms_id,
            last_parms_id,
            context_data_map,
            sec_level,
            using_keyswitching,
            prng_factory: PrngFactory::new(),
        })
    }

    /// Shortcut with the default 128-bit security level and chain expansion.
    pub fn new_default(parms: EncryptionParameters) -> Arc<Self> {
        Self::new(parms, true, SecurityLevel::Tc128)
    }

    pub fn key_parms_id(&self) -> &ParmsId {
        &self.key_parms_id
    }

    pub fn first_parms_id(&self) -> &ParmsId {
        &self.first_parms_id
    }

    pub fn last_parms_id(&self) -> &ParmsId {
        &self.last_parms_id
    }

    pub fn context_data(&self, parms_id: &ParmsId) -> Option<Arc<ContextData>> {
        self.context_data_map.get(parms_id).cloned()
    }

    pub fn key_context_data(&self) -> Option<Arc<ContextData>> {
        self.context_data(&self.key_parms_id)
    }

    pub fn first_context_data(&self) -> Option<Arc<ContextData>> {
        self.context_data(&self.first_parms_id)
    }

    pub fn last_context_data(&self) -> Option<Arc<ContextData>> {
        self.context_data(&self.last_parms_id)
    }

    pub fn using_keyswitching(&self) -> bool {
        self.using_keyswitching
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.sec_level
    }

    pub fn parameters_set(&self) -> bool {
        self.first_context_data()
            .map(|data| data.qualifiers.parameters_set())
            .unwrap_or(false)
    }

    pub(crate) fn create_prng(&self) -> Blake3Prng {
        self.prng_factory.get_prng()
    }

    fn validate(parms: EncryptionParameters, sec_level: SecurityLevel) -> ContextData {
        let mut c = ContextData::new(parms);
        c.qualifiers.parameter_error = ErrorType::Success;

        if c.parms.scheme() == SchemeType::None {
            c.qualifiers.parameter_error = ErrorType::InvalidScheme;
            return c;
        }
        let coeff_modulus = c.parms.coeff_modulus().to_vec();
        let plain_modulus = *c.parms.plain_modulus();

        if coeff_modulus.len() > math::COEFF_MOD_COUNT_MAX
            || coeff_modulus.len() < math::COEFF_MOD_COUNT_MIN
        {
            c.qualifiers.parameter_error = ErrorType::InvalidCoeffModulusSize;
            return c;
        }
        let coeff_modulus_size = coeff_modulus.len();
        for modulus in &coeff_modulus {
            if modulus.value() >> math::USER_MOD_BIT_COUNT_MAX > 0
                || modulus.value() >> (math::USER_MOD_BIT_COUNT_MIN - 1) == 0
            {
                c.qualifiers.parameter_error = ErrorType::InvalidCoeffModulusBitCount;
                return c;
            }
        }

        // Product of all primes at this level.
        c.total_coeff_modulus = vec![0; coeff_modulus_size];
        let coeff_modulus_values = coeff_modulus.iter().map(|x| x.value()).collect::<Vec<_>>();
        wide::multiply_many_words(&coeff_modulus_values, &mut c.total_coeff_modulus);
        c.total_coeff_modulus_bit_count =
            wide::significant_bit_count_words(&c.total_coeff_modulus);

        let poly_modulus_degree = c.parms.poly_modulus_degree();
        if !(math::POLY_DEGREE_MIN..=math::POLY_DEGREE_MAX).contains(&poly_modulus_degree) {
            c.qualifiers.parameter_error = ErrorType::InvalidPolyModulusDegree;
            return c;
        }
        let coeff_count_power = match math::try_power_of_two(poly_modulus_degree as u64) {
            Some(power) => power,
            None => {
                c.qualifiers.parameter_error = ErrorType::InvalidPolyModulusDegreeNonPowerOfTwo;
                return c;
            }
        };
        if coeff_modulus_size.checked_mul(poly_modulus_degree).is_none() {
            c.qualifiers.parameter_error = ErrorType::InvalidParametersTooLarge;
            return c;
        }

        // X^(2^k) + 1 is guaranteed at this point.
        c.qualifiers.using_fft = true;

        c.qualifiers.sec_level = sec_level;
        if c.total_coeff_modulus_bit_count > CoeffModulus::max_bit_count(poly_modulus_degree, sec_level)
        {
            c.qualifiers.sec_level = SecurityLevel::None;
            if sec_level != SecurityLevel::None {
                c.qualifiers.parameter_error = ErrorType::InvalidParametersInsecure;
                return c;
            }
        }

        let coeff_modulus_base = match RnsBase::new(&coeff_modulus) {
            Ok(base) => base,
            Err(_) => {
                c.qualifiers.parameter_error = ErrorType::FailedCreatingRnsBase;
                return c;
            }
        };

        c.qualifiers.using_ntt = true;
        match NttTables::create_many(coeff_count_power, &coeff_modulus) {
            Ok(tables) => c.small_ntt_tables = tables,
            Err(_) => {
                c.qualifiers.using_ntt = false;
                c.qualifiers.parameter_error = ErrorType::InvalidCoeffModulusNoNtt;
                return c;
            }
        }

        match c.parms.scheme() {
            SchemeType::Bfv => {
                if plain_modulus.value() >> math::PLAIN_MOD_BIT_COUNT_MAX > 0
                    || plain_modulus.value() >> (math::PLAIN_MOD_BIT_COUNT_MIN - 1) == 0
                {
                    c.qualifiers.parameter_error = ErrorType::InvalidPlainModulusBitCount;
                    return c;
                }
                for modulus in &coeff_modulus {
                    if !math::numth::are_coprime(modulus.value(), plain_modulus.value()) {
                        c.qualifiers.parameter_error = ErrorType::InvalidPlainModulusCoprimality;
                        return c;
                    }
                }
                if !wide::is_less_than(&[plain_modulus.value()], &c.total_coeff_modulus) {
                    c.qualifiers.parameter_error = ErrorType::InvalidPlainModulusTooLarge;
                    return c;
                }

                // Batching needs an NTT over the plain modulus.
                c.qualifiers.using_batching = true;
                match NttTables::new(coeff_count_power, &plain_modulus) {
                    Ok(table) => c.plain_ntt_tables = Some(table),
                    Err(_) => c.qualifiers.using_batching = false,
                }

                c.qualifiers.using_fast_plain_lift = coeff_modulus
                    .iter()
                    .all(|modulus| modulus.value() > plain_modulus.value());

                // Delta = floor(q / t) and q mod t.
                let mut coeff_div_plain_modulus = vec![0; coeff_modulus_size];
                c.upper_half_increment = vec![0; coeff_modulus_size];
                let mut remainder = c.total_coeff_modulus.clone();
                wide::divide_word_inplace(
                    &mut remainder,
                    plain_modulus.value(),
                    &mut coeff_div_plain_modulus,
                );
                c.upper_half_increment.copy_from_slice(&remainder);
                c.coeff_modulus_mod_plain_modulus = c.upper_half_increment[0];

                coeff_modulus_base.decompose(&mut coeff_div_plain_modulus);
                c.coeff_div_plain_modulus = coeff_div_plain_modulus
                    .iter()
                    .zip(coeff_modulus_base.base().iter())
                    .map(|(&x, modulus)| MulModOperand::new(x, modulus))
                    .collect();
                coeff_modulus_base.decompose(&mut c.upper_half_increment);

                c.plain_upper_half_threshold = (plain_modulus.value() + 1) >> 1;

                // q - t, either per prime or as a multi-precision value.
                c.plain_upper_half_increment = vec![0; coeff_modulus_size];
                if c.qualifiers.using_fast_plain_lift {
                    for (increment, modulus) in c
                        .plain_upper_half_increment
                        .iter_mut()
                        .zip(coeff_modulus.iter())
                    {
                        *increment = modulus.value() - plain_modulus.value();
                    }
                } else {
                    wide::sub(
                        &c.total_coeff_modulus,
                        &[plain_modulus.value()],
                        &mut c.plain_upper_half_increment,
                    );
                }
            }
            SchemeType::Ckks => {
                if !plain_modulus.is_zero() {
                    c.qualifiers.parameter_error = ErrorType::InvalidPlainModulusNonzero;
                    return c;
                }

                // Slot encoding is intrinsic to CKKS.
                c.qualifiers.using_batching = true;
                c.qualifiers.using_fast_plain_lift = false;

                // Plaintext coefficients at or above 2^63 represent negative
                // values; the increment maps them to -2^64 + value mod q_i.
                c.plain_upper_half_threshold = 1 << 63;
                c.plain_upper_half_increment = coeff_modulus
                    .iter()
                    .map(|modulus| {
                        let half = modulus.reduce(1 << 63);
                        zq::mul_mod(half, modulus.value() - 2, modulus)
                    })
                    .collect();

                c.upper_half_threshold = vec![0; coeff_modulus_size];
                wide::increment(&c.total_coeff_modulus, &mut c.upper_half_threshold);
                wide::right_shift_one_inplace(&mut c.upper_half_threshold);
            }
            SchemeType::None => unreachable!(),
        }

        match RnsTool::new(poly_modulus_degree, &coeff_modulus_base, &plain_modulus) {
            Ok(tool) => c.rns_tool = Some(tool),
            Err(_) => {
                c.qualifiers.parameter_error = ErrorType::FailedCreatingRnsTool;
                return c;
            }
        }

        c.qualifiers.using_descending_modulus_chain = coeff_modulus
            .windows(2)
            .all(|pair| pair[0].value() > pair[1].value());

        c.galois_tool = Some(GaloisTool::new(coeff_count_power));

        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modulus::Modulus;

    fn to_moduli(values: Vec<u64>) -> Vec<Modulus> {
        values.into_iter().map(Modulus::new).collect()
    }

    #[test]
    fn test_bfv_validation() {
        let parms = EncryptionParameters::new(SchemeType::Bfv);
        let context = Context::new(parms.clone(), false, SecurityLevel::None);
        assert!(!context.parameters_set());

        let parms = parms
            .set_poly_modulus_degree(4)
            .set_coeff_modulus(&to_moduli(vec![17, 41]))
            .set_plain_modulus_u64(34);
        let context = Context::new(parms.clone(), false, SecurityLevel::None);
        assert_eq!(
            context.first_context_data().unwrap().qualifiers().parameter_error,
            ErrorType::InvalidPlainModulusCoprimality
        );

        let parms = parms
            .set_coeff_modulus(&to_moduli(vec![17]))
            .set_plain_modulus_u64(41);
        let context = Context::new(parms.clone(), false, SecurityLevel::None);
        assert_eq!(
            context.first_context_data().unwrap().qualifiers().parameter_error,
            ErrorType::InvalidPlainModulusTooLarge
        );

        let parms = parms
            .set_coeff_modulus(&to_moduli(vec![17, 41]))
            .set_plain_modulus_u64(18);
        let context = Context::new(parms.clone(), false, SecurityLevel::None);
        let data = context.first_context_data().unwrap();
        assert!(data.qualifiers().parameters_set());
        assert_eq!(data.total_coeff_modulus()[0], 697);
        assert!(!context.using_keyswitching());

        // With t smaller than both primes, the chain gets a key level and a
        // data level, and fast plain lift becomes available.
        let parms = parms
            .set_coeff_modulus(&to_moduli(vec![137, 193]))
            .set_plain_modulus_u64(73);
        let context = Context::new(parms.clone(), false, SecurityLevel::None);
        let first = context.first_context_data().unwrap();
        let key = context.key_context_data().unwrap();
        assert!(first.qualifiers().parameters_set());
        assert_eq!(first.total_coeff_modulus()[0], 137);
        assert_eq!(key.total_coeff_modulus()[0], 26441);
        assert!(first.qualifiers().using_fast_plain_lift);
        assert!(context.using_keyswitching());

        // Insecure parameters are rejected when a security level is enforced.
        let context = Context::new(parms, false, SecurityLevel::Tc128);
        assert!(!context.parameters_set());
    }

    #[test]
    fn test_chain_expansion() {
        let parms = EncryptionParameters::new(SchemeType::Bfv)
            .set_poly_modulus_degree(4)
            .set_coeff_modulus(&to_moduli(vec![41, 137, 193, 65537]))
            .set_plain_modulus_u64(73);
        let context = Context::new(parms.clone(), true, SecurityLevel::None);

        let key = context.key_context_data().unwrap();
        assert_eq!(key.chain_index(), 2);
        assert_eq!(key.total_coeff_modulus()[0], 71047416497);
        assert!(key.prev_context_data().is_none());
        assert_eq!(key.parms_id(), context.key_parms_id());

        let first = key.next_context_data().unwrap();
        assert_eq!(first.chain_index(), 1);
        assert_eq!(first.total_coeff_modulus()[0], 1084081);
        assert_eq!(
            first.prev_context_data().unwrap().parms_id(),
            key.parms_id()
        );

        let last = first.next_context_data().unwrap();
        assert_eq!(last.chain_index(), 0);
        assert_eq!(last.total_coeff_modulus()[0], 5617);
        assert!(last.next_context_data().is_none());
        assert_eq!(last.parms_id(), context.last_parms_id());

        // Without expansion only the key and first levels exist.
        let context = Context::new(parms, false, SecurityLevel::None);
        assert_eq!(context.key_context_data().unwrap().chain_index(), 1);
        assert_eq!(context.first_context_data().unwrap().chain_index(), 0);
        assert_eq!(context.first_parms_id(), context.last_parms_id());
    }

    #[test]
    fn test_ckks_chain() {
        let parms = EncryptionParameters::new(SchemeType::Ckks)
            .set_poly_modulus_degree(4)
            .set_coeff_modulus(&to_moduli(vec![41, 137, 193, 65537]));
        let context = Context::new(parms, true, SecurityLevel::None);
        let key = context.key_context_data().unwrap();
        assert_eq!(key.chain_index(), 3);
        let mut data = key;
        let mut count = 1;
        while let Some(next) = data.next_context_data() {
            data = next;
            count += 1;
        }
        assert_eq!(count, 4);
        assert_eq!(data.total_coeff_modulus()[0], 41);
        assert_eq!(data.parms_id(), context.last_parms_id());
    }
}
