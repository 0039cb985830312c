use std::ops::Index;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::ciphertext::Ciphertext;
use crate::context::Context;
use crate::math::{self, poly, rlwe, zq, GaloisTool};
use crate::params::ParmsId;
use crate::plaintext::Plaintext;

/// The secret key: a ternary polynomial stored in NTT form at the key level.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SecretKey {
    sk: Plaintext,
}

impl SecretKey {
    pub fn new(sk: Plaintext) -> Self {
        Self { sk }
    }

    pub fn parms_id(&self) -> &ParmsId {
        self.sk.parms_id()
    }

    pub fn as_plaintext(&self) -> &Plaintext {
        &self.sk
    }

    pub fn as_plaintext_mut(&mut self) -> &mut Plaintext {
        &mut self.sk
    }

    pub fn data(&self) -> &[u64] {
        self.sk.data()
    }

    pub fn data_mut(&mut self) -> &mut [u64] {
        self.sk.data_mut()
    }
}

/// The public key: an encryption of zero under the secret key, kept in NTT
/// form at the key level.
#[derive(Clone, Default)]
pub struct PublicKey {
    pk: Ciphertext,
}

impl PublicKey {
    pub fn new(pk: Ciphertext) -> Self {
        Self { pk }
    }

    pub fn parms_id(&self) -> &ParmsId {
        self.pk.parms_id()
    }

    pub fn set_parms_id(&mut self, parms_id: ParmsId) {
        self.pk.set_parms_id(parms_id);
    }

    pub fn as_ciphertext(&self) -> &Ciphertext {
        &self.pk
    }

    pub fn as_ciphertext_mut(&mut self) -> &mut Ciphertext {
        &mut self.pk
    }
}

impl From<Ciphertext> for PublicKey {
    fn from(pk: Ciphertext) -> Self {
        Self::new(pk)
    }
}

/// Generic key-switching keys: a vector of key entries, each a vector of
/// `decomp_mod_count` public-key-like pairs at the key level. Entry `i` of a
/// key vector is bound to decomposition prime `q_i`.
///
/// [`RelinKeys`] and [`GaloisKeys`] are thin wrappers that fix the indexing
/// convention.
#[derive(Clone, Default)]
pub struct KSwitchKeys {
    parms_id: ParmsId,
    keys: Vec<Vec<PublicKey>>,
}

impl KSwitchKeys {
    pub fn parms_id(&self) -> &ParmsId {
        &self.parms_id
    }

    pub fn set_parms_id(&mut self, parms_id: ParmsId) {
        self.parms_id = parms_id;
    }

    pub fn data(&self) -> &[Vec<PublicKey>] {
        &self.keys
    }

    pub fn data_mut(&mut self) -> &mut Vec<Vec<PublicKey>> {
        &mut self.keys
    }

    /// Number of non-empty key entries.
    pub fn len(&self) -> usize {
        self.keys.iter().filter(|key| !key.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Index<usize> for KSwitchKeys {
    type Output = Vec<PublicKey>;
    fn index(&self, index: usize) -> &Self::Output {
        &self.keys[index]
    }
}

/// Relinearization keys: key-switching keys for the secret key powers
/// `s^2, s^3, …`.
#[derive(Clone, Default)]
pub struct RelinKeys {
    keys: KSwitchKeys,
}

impl RelinKeys {
    /// Key entry index holding the key for `s^key_power`.
    pub fn get_index(key_power: usize) -> usize {
        assert!(
            key_power >= 2,
            "[Invalid argument] Key power must be at least 2."
        );
        key_power - 2
    }

    pub fn has_key(&self, key_power: usize) -> bool {
        let index = Self::get_index(key_power);
        index < self.keys.data().len() && !self.keys[index].is_empty()
    }

    pub fn key(&self, key_power: usize) -> &Vec<PublicKey> {
        &self.keys[Self::get_index(key_power)]
    }

    pub fn parms_id(&self) -> &ParmsId {
        self.keys.parms_id()
    }

    pub fn as_kswitch_keys(&self) -> &KSwitchKeys {
        &self.keys
    }
}

/// Galois keys: key-switching keys indexed by Galois element, enabling slot
/// rotations and conjugation.
#[derive(Clone, Default)]
pub struct GaloisKeys {
    keys: KSwitchKeys,
}

impl GaloisKeys {
    pub fn get_index(galois_elt: usize) -> usize {
        GaloisTool::get_index_from_elt(galois_elt)
    }

    pub fn has_key(&self, galois_elt: usize) -> bool {
        let index = Self::get_index(galois_elt);
        index < self.keys.data().len() && !self.keys[index].is_empty()
    }

    pub fn key(&self, galois_elt: usize) -> &Vec<PublicKey> {
        &self.keys[Self::get_index(galois_elt)]
    }

    pub fn parms_id(&self) -> &ParmsId {
        self.keys.parms_id()
    }

    pub fn as_kswitch_keys(&self) -> &KSwitchKeys {
        &self.keys
    }
}

/// Generates secret, public, relinearization and Galois keys for a context.
pub struct KeyGenerator {
    context: Arc<Context>,
    secret_key: SecretKey,
    // NTT-form powers of the secret key, extended on demand.
    secret_key_powers: RwLock<Vec<u64>>,
}

impl KeyGenerator {
    /// Samples a fresh secret key.
    pub fn new(context: Arc<Context>) -> Self {
        if !context.parameters_set() {
            panic!("[Invalid argument] Encryption parameters are not set correctly.");
        }
        let secret_key = Self::sample_secret_key(&context);
        let secret_key_powers = RwLock::new(secret_key.data().to_vec());
        Self {
            context,
            secret_key,
            secret_key_powers,
        }
    }

    /// Reuses an existing secret key.
    pub fn from_secret_key(context: Arc<Context>, secret_key: SecretKey) -> Self {
        if !context.parameters_set() {
            panic!("[Invalid argument] Encryption parameters are not set correctly.");
        }
        let secret_key_powers = RwLock::new(secret_key.data().to_vec());
        Self {
            context,
            secret_key,
            secret_key_powers,
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    fn sample_secret_key(context: &Context) -> SecretKey {
        let context_data = context.key_context_data().unwrap();
        let parms = context_data.parms();
        let coeff_count = parms.poly_modulus_degree();
        let coeff_modulus_size = parms.coeff_modulus().len();

        let mut secret_key = SecretKey::default();
        secret_key
            .as_plaintext_mut()
            .resize(coeff_count * coeff_modulus_size);
        let mut prng = context.create_prng();
        rlwe::sample::ternary(&mut prng, parms, secret_key.data_mut());
        poly::ntt_rns(secret_key.data_mut(), coeff_count, context_data.small_ntt_tables());
        secret_key
            .as_plaintext_mut()
            .set_parms_id(*context_data.parms_id());
        secret_key
            .as_plaintext_mut()
            .set_coeff_count(coeff_count * coeff_modulus_size);
        secret_key
    }

    pub fn create_public_key(&self) -> PublicKey {
        let context_data = self.context.key_context_data().unwrap();
        let mut public_key = PublicKey::default();
        rlwe::encrypt_zero::symmetric(
            &self.secret_key,
            &self.context,
            context_data.parms_id(),
            true,
            public_key.as_ciphertext_mut(),
        );
        public_key.set_parms_id(*context_data.parms_id());
        public_key
    }

    /// Extends the cached powers of s up to `max_power` (1-indexed).
    fn compute_secret_key_powers(&self, max_power: usize) {
        let context_data = self.context.key_context_data().unwrap();
        let parms = context_data.parms();
        let coeff_modulus = parms.coeff_modulus();
        let coeff_count = parms.poly_modulus_degree();
        let poly_words = coeff_count * coeff_modulus.len();

        let read_lock = self.secret_key_powers.read().unwrap();
        let old_count = read_lock.len() / poly_words;
        if old_count >= max_power {
            return;
        }
        let mut powers = vec![0; max_power * poly_words];
        powers[..old_count * poly_words].copy_from_slice(&read_lock);
        drop(read_lock);

        // All powers are NTT-form, so the next power is a dyadic product of
        // the previous one with s itself.
        for i in old_count..max_power {
            let (done, next) = powers.split_at_mut(i * poly_words);
            let previous = &done[(i - 1) * poly_words..];
            let first = &done[..poly_words];
            poly::dyadic_product_rns(
                previous,
                first,
                coeff_count,
                coeff_modulus,
                &mut next[..poly_words],
            );
        }

        let mut write_lock = self.secret_key_powers.write().unwrap();
        if write_lock.len() < powers.len() {
            *write_lock = powers;
        }
    }

    /// One key entry: encryptions of `q_last * new_key` folded into the i-th
    /// decomposition slot.
    fn generate_one_kswitch_key(&self, new_key: &[u64], destination: &mut Vec<PublicKey>) {
        if !self.context.using_keyswitching() {
            panic!("[Logic error] Key switching is not supported by these parameters.");
        }
        let key_context_data = self.context.key_context_data().unwrap();
        let key_parms = key_context_data.parms();
        let key_modulus = key_parms.coeff_modulus();
        let coeff_count = key_parms.poly_modulus_degree();
        let decomp_mod_count = self
            .context
            .first_context_data()
            .unwrap()
            .parms()
            .coeff_modulus()
            .len();
        let key_parms_id = key_context_data.parms_id();

        let mut scaled = vec![0; coeff_count];
        destination.resize(decomp_mod_count, PublicKey::default());
        for (i, entry) in destination.iter_mut().enumerate() {
            rlwe::encrypt_zero::symmetric(
                &self.secret_key,
                &self.context,
                key_parms_id,
                true,
                entry.as_ciphertext_mut(),
            );
            let factor =
                zq::barrett_reduce(key_modulus[key_modulus.len() - 1].value(), &key_modulus[i]);
            poly::multiply_scalar(
                &new_key[i * coeff_count..(i + 1) * coeff_count],
                factor,
                &key_modulus[i],
                &mut scaled,
            );
            poly::add_inplace(
                entry.as_ciphertext_mut().poly_component_mut(0, i),
                &scaled,
                &key_modulus[i],
            );
        }
    }

    /// Creates relinearization keys covering size-3 ciphertexts (the key for
    /// `s^2`).
    pub fn create_relin_keys(&self) -> RelinKeys {
        self.create_relin_keys_with_count(1)
    }

    /// Creates relinearization keys for `s^2 … s^(count+1)`; only needed when
    /// relinearizing ciphertexts of size above 3 directly.
    pub fn create_relin_keys_with_count(&self, count: usize) -> RelinKeys {
        if count == 0 || count > math::CIPHERTEXT_SIZE_MAX - 2 {
            panic!("[Invalid argument] Invalid relinearization key count.");
        }
        let context_data = self.context.key_context_data().unwrap();
        let parms = context_data.parms();
        let poly_words = parms.poly_modulus_degree() * parms.coeff_modulus().len();

        self.compute_secret_key_powers(count + 1);

        let mut relin_keys = RelinKeys::default();
        relin_keys.keys.data_mut().resize(count, vec![]);
        let powers = self.secret_key_powers.read().unwrap();
        for i in 0..count {
            // Key i encrypts s^(i+2).
            let power = &powers[(i + 1) * poly_words..(i + 2) * poly_words];
            self.generate_one_kswitch_key(power, &mut relin_keys.keys.data_mut()[i]);
        }
        relin_keys.keys.set_parms_id(*context_data.parms_id());
        relin_keys
    }

    /// Creates Galois keys for the given elements.
    pub fn create_galois_keys_from_elts(&self, galois_elts: &[usize]) -> GaloisKeys {
        let context_data = self.context.key_context_data().unwrap();
        let parms = context_data.parms();
        let galois_tool = context_data.galois_tool();
        let coeff_count = parms.poly_modulus_degree();
        let coeff_modulus_size = parms.coeff_modulus().len();

        let mut galois_keys = GaloisKeys::default();
        galois_keys.keys.data_mut().resize(coeff_count, vec![]);
        for &galois_elt in galois_elts {
            if galois_elt % 2 == 0 || galois_elt >= coeff_count << 1 {
                panic!("[Invalid argument] Invalid Galois element.");
            }
            if galois_keys.has_key(galois_elt) {
                continue;
            }
            let mut rotated_secret_key = vec![0; coeff_count * coeff_modulus_size];
            galois_tool.apply_ntt_rns(
                self.secret_key.data(),
                coeff_modulus_size,
                galois_elt,
                &mut rotated_secret_key,
            );
            let index = GaloisKeys::get_index(galois_elt);
            self.generate_one_kswitch_key(
                &rotated_secret_key,
                &mut galois_keys.keys.data_mut()[index],
            );
        }
        galois_keys.keys.set_parms_id(*context_data.parms_id());
        galois_keys
    }

    /// Creates Galois keys for the given rotation steps.
    pub fn create_galois_keys_from_steps(&self, steps: &[isize]) -> GaloisKeys {
        if !self
            .context
            .key_context_data()
            .unwrap()
            .qualifiers()
            .using_batching
        {
            panic!("[Logic error] Galois keys are not supported by these parameters.");
        }
        let elts = self
            .context
            .key_context_data()
            .unwrap()
            .galois_tool()
            .get_elts_from_steps(steps);
        self.create_galois_keys_from_elts(&elts)
    }

    /// Creates the default Galois key set: conjugation plus all power-of-two
    /// rotations.
    pub fn create_galois_keys(&self) -> GaloisKeys {
        let elts = self
            .context
            .key_context_data()
            .unwrap()
            .galois_tool()
            .get_elts_all();
        self.create_galois_keys_from_elts(&elts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modulus::CoeffModulus;
    use crate::params::{EncryptionParameters, SchemeType, SecurityLevel};
    use crate::validity::Validity;

    #[test]
    fn test_keygen_bfv() {
        let parms = EncryptionParameters::new(SchemeType::Bfv)
            .set_poly_modulus_degree(64)
            .set_plain_modulus_u64(65537)
            .set_coeff_modulus(&CoeffModulus::create(64, vec![60, 60]));
        let context = Context::new(parms, false, SecurityLevel::None);
        let keygen = KeyGenerator::new(context.clone());

        let relin_keys = keygen.create_relin_keys();
        assert_eq!(relin_keys.parms_id(), context.key_parms_id());
        assert_eq!(relin_keys.key(2).len(), 1);
        assert!(relin_keys.is_valid_for(&context));
        for keys in relin_keys.as_kswitch_keys().data() {
            for key in keys {
                assert!(!key.as_ciphertext().is_transparent());
            }
        }

        let galois_keys = keygen.create_galois_keys();
        assert!(galois_keys.is_valid_for(&context));
        assert_eq!(galois_keys.as_kswitch_keys().len(), 10);
        assert!(galois_keys.has_key(3));

        let galois_keys = keygen.create_galois_keys_from_elts(&[1, 3, 5, 7]);
        assert!(galois_keys.has_key(1));
        assert!(galois_keys.has_key(7));
        assert!(!galois_keys.has_key(9));
        assert_eq!(galois_keys.as_kswitch_keys().len(), 4);
    }

    #[test]
    fn test_keygen_ckks() {
        let parms = EncryptionParameters::new(SchemeType::Ckks)
            .set_poly_modulus_degree(256)
            .set_coeff_modulus(&CoeffModulus::create(256, vec![60, 30, 30]));
        let context = Context::new(parms, false, SecurityLevel::None);
        let keygen = KeyGenerator::new(context.clone());

        let relin_keys = keygen.create_relin_keys();
        assert_eq!(relin_keys.parms_id(), context.key_parms_id());
        assert!(relin_keys.is_valid_for(&context));
        // Two decomposition primes per key entry at this chain depth.
        assert_eq!(relin_keys.key(2).len(), 2);

        let galois_keys = keygen.create_galois_keys();
        assert!(galois_keys.is_valid_for(&context));
        assert_eq!(galois_keys.as_kswitch_keys().len(), 14);
    }
}
