use std::sync::{Arc, RwLock};

use crate::ciphertext::Ciphertext;
use crate::context::Context;
use crate::keys::SecretKey;
use crate::math::{self, poly, wide};
use crate::params::{SchemeType, PARMS_ID_ZERO};
use crate::plaintext::Plaintext;
use crate::validity::Validity;

/// Decrypts ciphertexts with the secret key and reports the BFV invariant
/// noise budget.
///
/// Ciphertexts must be in their default NTT form (coefficient form for BFV,
/// NTT form for CKKS).
pub struct Decryptor {
    context: Arc<Context>,
    // NTT-form powers of the secret key, extended on demand for ciphertexts
    // of size above 2.
    secret_key_powers: RwLock<Vec<u64>>,
}

impl Decryptor {
    pub fn new(context: Arc<Context>, secret_key: SecretKey) -> Self {
        if !context.parameters_set() {
            panic!("[Invalid argument] Encryption parameters are not set correctly.");
        }
        if !secret_key.is_valid_for(&context) {
            panic!("[Invalid argument] Secret key is not valid for the context.");
        }
        let key_context_data = context.key_context_data().unwrap();
        let parms = key_context_data.parms();
        let poly_words = parms.poly_modulus_degree() * parms.coeff_modulus().len();
        let secret_key_powers = secret_key.data().to_vec();
        debug_assert_eq!(secret_key_powers.len(), poly_words);
        Self {
            context,
            secret_key_powers: RwLock::new(secret_key_powers),
        }
    }

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

    /// Computes c_0 + c_1 s + … + c_{k-1} s^{k-1} mod q in RNS form, in the
    /// ciphertext's own (NTT or coefficient) domain.
    fn dot_product_with_key_powers(&self, encrypted: &Ciphertext, destination: &mut [u64]) {
        let context_data = self.context.context_data(encrypted.parms_id()).unwrap();
        let parms = context_data.parms();
        let coeff_modulus = parms.coeff_modulus();
        let coeff_count = parms.poly_modulus_degree();
        let poly_words = coeff_count * coeff_modulus.len();
        let key_poly_words = coeff_count
            * self
                .context
                .key_context_data()
                .unwrap()
                .parms()
                .coeff_modulus()
                .len();
        let ntt_tables = context_data.small_ntt_tables();
        let encrypted_size = encrypted.size();
        let is_ntt_form = encrypted.is_ntt_form();

        self.compute_secret_key_powers(encrypted_size - 1);
        let powers = self.secret_key_powers.read().unwrap();

        if encrypted_size == 2 {
            destination.copy_from_slice(encrypted.poly(1));
            if is_ntt_form {
                poly::dyadic_product_inplace_rns(destination, &powers, coeff_count, coeff_modulus);
            } else {
                poly::ntt_rns(destination, coeff_count, ntt_tables);
                poly::dyadic_product_inplace_rns(destination, &powers, coeff_count, coeff_modulus);
                poly::intt_rns(destination, coeff_count, ntt_tables);
            }
            poly::add_inplace_rns(destination, encrypted.poly(0), coeff_count, coeff_modulus);
        } else {
            // Fold every component against the matching key power in the NTT
            // domain.
            let mut components = encrypted.polys(1, encrypted_size).to_vec();
            if !is_ntt_form {
                poly::ntt_many(&mut components, encrypted_size - 1, coeff_count, ntt_tables);
            }
            for (i, component) in components.chunks_mut(poly_words).enumerate() {
                poly::dyadic_product_inplace_rns(
                    component,
                    &powers[i * key_poly_words..i * key_poly_words + poly_words],
                    coeff_count,
                    coeff_modulus,
                );
            }
            destination.fill(0);
            for component in components.chunks(poly_words) {
                poly::add_inplace_rns(destination, component, coeff_count, coeff_modulus);
            }
            if !is_ntt_form {
                poly::intt_rns(destination, coeff_count, ntt_tables);
            }
            poly::add_inplace_rns(destination, encrypted.poly(0), coeff_count, coeff_modulus);
        }
    }

    fn bfv_decrypt(&self, encrypted: &Ciphertext, destination: &mut Plaintext) {
        if encrypted.is_ntt_form() {
            panic!("[Invalid argument] BFV ciphertext cannot be in NTT form.");
        }
        let context_data = self.context.context_data(encrypted.parms_id()).unwrap();
        let parms = context_data.parms();
        let coeff_count = parms.poly_modulus_degree();
        let coeff_modulus_size = parms.coeff_modulus().len();

        // The phase equals Delta*m + v with ||v|| < Delta/2; scaling by t/q
        // with rounding recovers m.
        let mut phase = vec![0; coeff_count * coeff_modulus_size];
        self.dot_product_with_key_powers(encrypted, &mut phase);

        destination.set_parms_id(PARMS_ID_ZERO);
        destination.resize(coeff_count);
        context_data
            .rns_tool()
            .decrypt_scale_and_round(&phase, destination.data_mut());

        let significant = wide::significant_word_count(destination.data());
        destination.resize(significant.max(1));
    }

    fn ckks_decrypt(&self, encrypted: &Ciphertext, destination: &mut Plaintext) {
        if !encrypted.is_ntt_form() {
            panic!("[Invalid argument] CKKS ciphertext must be in NTT form.");
        }
        let context_data = self.context.context_data(encrypted.parms_id()).unwrap();
        let parms = context_data.parms();
        let rns_poly_words = parms.poly_modulus_degree() * parms.coeff_modulus().len();

        destination.set_parms_id(PARMS_ID_ZERO);
        destination.resize(rns_poly_words);
        self.dot_product_with_key_powers(encrypted, destination.data_mut());
        destination.set_parms_id(*encrypted.parms_id());
        destination.set_scale(encrypted.scale());
    }

    pub fn decrypt(&self, encrypted: &Ciphertext, destination: &mut Plaintext) {
        if !encrypted.is_valid_for(&self.context) {
            panic!("[Invalid argument] Ciphertext is not valid for the context.");
        }
        if encrypted.size() < math::CIPHERTEXT_SIZE_MIN {
            panic!("[Invalid argument] Ciphertext is empty.");
        }
        let scheme = self.context.first_context_data().unwrap().parms().scheme();
        match scheme {
            SchemeType::Bfv => self.bfv_decrypt(encrypted, destination),
            SchemeType::Ckks => self.ckks_decrypt(encrypted, destination),
            SchemeType::None => panic!("[Invalid argument] Unsupported scheme."),
        }
    }

    pub fn decrypt_new(&self, encrypted: &Ciphertext) -> Plaintext {
        let mut destination = Plaintext::new();
        self.decrypt(encrypted, &mut destination);
        destination
    }

    /// Remaining invariant noise budget of a BFV ciphertext, in bits. Zero
    /// means decryption is no longer reliable.
    pub fn invariant_noise_budget(&self, encrypted: &Ciphertext) -> usize {
        if !encrypted.is_valid_for(&self.context) {
            panic!("[Invalid argument] Ciphertext is not valid for the context.");
        }
        if encrypted.size() < math::CIPHERTEXT_SIZE_MIN {
            panic!("[Invalid argument] Ciphertext is empty.");
        }
        let scheme = self.context.key_context_data().unwrap().parms().scheme();
        if scheme != SchemeType::Bfv {
            panic!("[Logic error] Noise budget is only defined for BFV.");
        }
        if encrypted.is_ntt_form() {
            panic!("[Invalid argument] Ciphertext cannot be in NTT form.");
        }
        let context_data = self.context.context_data(encrypted.parms_id()).unwrap();
        let parms = context_data.parms();
        let coeff_modulus = parms.coeff_modulus();
        let coeff_modulus_size = coeff_modulus.len();
        let coeff_count = parms.poly_modulus_degree();
        let plain_modulus = parms.plain_modulus();

        // t * (c(s) mod q) composed over the full modulus is the scaled
        // invariant noise.
        let mut noise_poly = vec![0; coeff_count * coeff_modulus_size];
        self.dot_product_with_key_powers(encrypted, &mut noise_poly);
        poly::multiply_scalar_inplace_rns(
            &mut noise_poly,
            plain_modulus.value(),
            coeff_count,
            coeff_modulus,
        );
        context_data
            .rns_tool()
            .base_q()
            .compose_array(&mut noise_poly);

        let mut norm = vec![0; coeff_modulus_size];
        poly_infty_norm(
            &noise_poly,
            coeff_modulus_size,
            context_data.total_coeff_modulus(),
            &mut norm,
        );

        // The -1 accounts for the invariant noise being scaled by 2.
        let bit_count_diff = context_data.total_coeff_modulus_bit_count() as isize
            - wide::significant_bit_count_words(&norm) as isize
            - 1;
        bit_count_diff.max(0) as usize
    }
}

/// Infinity norm of a composed polynomial, taking the symmetric
/// representative modulo `modulus`.
fn poly_infty_norm(poly: &[u64], word_count: usize, modulus: &[u64], result: &mut [u64]) {
    let mut negative_threshold = vec![0; word_count];
    wide::half_round_up(modulus, &mut negative_threshold);
    result.fill(0);
    let mut abs_value = vec![0; word_count];
    for coeff in poly.chunks(word_count) {
        if wide::is_greater_than_or_equal(coeff, &negative_threshold) {
            wide::sub(modulus, coeff, &mut abs_value);
        } else {
            abs_value.copy_from_slice(coeff);
        }
        if wide::is_greater_than(&abs_value, result) {
            result.copy_from_slice(&abs_value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{BatchEncoder, CkksEncoder};
    use crate::encryptor::Encryptor;
    use crate::keys::KeyGenerator;
    use crate::modulus::{CoeffModulus, PlainModulus};
    use crate::params::{EncryptionParameters, SecurityLevel};
    use num_complex::Complex;
    use rand::Rng;

    fn random_vector(count: usize, modulus: u64) -> Vec<u64> {
        let mut rng = rand::thread_rng();
        (0..count).map(|_| rng.gen::<u64>() % modulus).collect()
    }

    #[test]
    fn test_bfv_round_trip() {
        let parms = EncryptionParameters::new(SchemeType::Bfv)
            .set_plain_modulus(&PlainModulus::batching(64, 30))
            .set_poly_modulus_degree(64)
            .set_coeff_modulus(&CoeffModulus::create(64, vec![40, 40]));
        let context = Context::new(parms, false, SecurityLevel::None);
        let keygen = KeyGenerator::new(context.clone());
        let encryptor = Encryptor::new(context.clone())
            .set_public_key(keygen.create_public_key())
            .set_secret_key(keygen.secret_key().clone());
        let decryptor = Decryptor::new(context.clone(), keygen.secret_key().clone());
        let encoder = BatchEncoder::new(context);

        let message = random_vector(encoder.slot_count(), encoder.plain_modulus_value());
        let plain = encoder.encode_new(&message);
        let encrypted = encryptor.encrypt_new(&plain);
        assert_eq!(encoder.decode_new(&decryptor.decrypt_new(&encrypted)), message);

        let encrypted = encryptor.encrypt_symmetric_new(&plain);
        assert_eq!(encoder.decode_new(&decryptor.decrypt_new(&encrypted)), message);
    }

    #[test]
    fn test_ckks_round_trip() {
        let parms = EncryptionParameters::new(SchemeType::Ckks)
            .set_poly_modulus_degree(64)
            .set_coeff_modulus(&CoeffModulus::create(64, vec![40, 40, 40]));
        let context = Context::new(parms, false, SecurityLevel::None);
        let keygen = KeyGenerator::new(context.clone());
        let encryptor = Encryptor::new(context.clone())
            .set_public_key(keygen.create_public_key())
            .set_secret_key(keygen.secret_key().clone());
        let decryptor = Decryptor::new(context.clone(), keygen.secret_key().clone());
        let encoder = CkksEncoder::new(context);

        let scale = (1u64 << 16) as f64;
        let message: Vec<Complex<f64>> = (1..=encoder.slot_count())
            .map(|x| Complex::new(x as f64, -(x as f64) / 2.0))
            .collect();
        let plain = encoder.encode_new(&message, None, scale);
        let encrypted = encryptor.encrypt_new(&plain);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&encrypted));
        for (expected, got) in message.iter().zip(decoded.iter()) {
            assert!((expected - got).norm() < 0.5);
        }
    }

    #[test]
    fn test_fresh_noise_budget_positive() {
        let parms = EncryptionParameters::new(SchemeType::Bfv)
            .set_plain_modulus(&PlainModulus::batching(64, 20))
            .set_poly_modulus_degree(64)
            .set_coeff_modulus(&CoeffModulus::create(64, vec![40, 40]));
        let context = Context::new(parms, false, SecurityLevel::None);
        let keygen = KeyGenerator::new(context.clone());
        let encryptor = Encryptor::new(context.clone()).set_public_key(keygen.create_public_key());
        let decryptor = Decryptor::new(context, keygen.secret_key().clone());

        let encrypted = encryptor.encrypt_zero_new();
        let budget = decryptor.invariant_noise_budget(&encrypted);
        assert!(budget > 0);
    }
}
