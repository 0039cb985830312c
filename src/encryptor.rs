use std::sync::Arc;

use crate::ciphertext::Ciphertext;
use crate::context::Context;
use crate::keys::{PublicKey, SecretKey};
use crate::math::{poly, rlwe, scaling};
use crate::params::{ParmsId, SchemeType};
use crate::plaintext::Plaintext;
use crate::validity::Validity;

/// Encrypts plaintexts, asymmetrically with a public key or symmetrically
/// with the secret key.
///
/// Fresh BFV ciphertexts are produced in coefficient form, fresh CKKS
/// ciphertexts in NTT form — the default forms the [`Evaluator`]
/// (crate::Evaluator) expects. When the context carries a special prime, the
/// encryption of zero happens at the key level's successor via modulus
/// switching inside the RLWE layer.
pub struct Encryptor {
    context: Arc<Context>,
    public_key: Option<PublicKey>,
    secret_key: Option<SecretKey>,
}

impl Encryptor {
    pub fn new(context: Arc<Context>) -> Self {
        if !context.parameters_set() {
            panic!("[Invalid argument] Encryption parameters are not set correctly.");
        }
        Self {
            context,
            public_key: None,
            secret_key: None,
        }
    }

    pub fn set_public_key(mut self, public_key: PublicKey) -> Self {
        if !public_key.is_valid_for(&self.context) {
            panic!("[Invalid argument] Public key is not valid for the context.");
        }
        self.public_key = Some(public_key);
        self
    }

    pub fn set_secret_key(mut self, secret_key: SecretKey) -> Self {
        if !secret_key.is_valid_for(&self.context) {
            panic!("[Invalid argument] Secret key is not valid for the context.");
        }
        self.secret_key = Some(secret_key);
        self
    }

    pub fn public_key(&self) -> &PublicKey {
        self.public_key.as_ref().unwrap()
    }

    pub fn secret_key(&self) -> &SecretKey {
        self.secret_key.as_ref().unwrap()
    }

    fn encrypt_zero_internal(
        &self,
        parms_id: &ParmsId,
        is_asymmetric: bool,
        destination: &mut Ciphertext,
    ) {
        if is_asymmetric && self.public_key.is_none() {
            panic!("[Invalid argument] Public key is not set.");
        }
        if !is_asymmetric && self.secret_key.is_none() {
            panic!("[Invalid argument] Secret key is not set.");
        }
        let context_data = self
            .context
            .context_data(parms_id)
            .unwrap_or_else(|| panic!("[Invalid argument] parms_id is not valid for the context."));
        let parms = context_data.parms();
        let poly_words = parms.poly_modulus_degree() * parms.coeff_modulus().len();
        let is_ntt_form = context_data.is_ckks();

        destination.resize(&self.context, parms_id, 2);

        if is_asymmetric {
            if let Some(prev_context_data) = context_data.prev_context_data() {
                // The public key lives one level up; encrypt zero there and
                // modulus switch the fresh encryption down.
                let prev_parms_id = prev_context_data.parms_id();
                let rns_tool = prev_context_data.rns_tool();

                let mut temp = Ciphertext::new();
                rlwe::encrypt_zero::asymmetric(
                    self.public_key(),
                    &self.context,
                    prev_parms_id,
                    is_ntt_form,
                    &mut temp,
                );
                for i in 0..temp.size() {
                    if is_ntt_form {
                        rns_tool.divide_and_round_q_last_ntt_inplace(
                            temp.poly_mut(i),
                            prev_context_data.small_ntt_tables(),
                        );
                    } else {
                        rns_tool.divide_and_round_q_last_inplace(temp.poly_mut(i));
                    }
                    destination
                        .poly_mut(i)
                        .copy_from_slice(&temp.poly(i)[..poly_words]);
                }
                destination.set_parms_id(*parms_id);
                destination.set_is_ntt_form(is_ntt_form);
                destination.set_scale(temp.scale());
            } else {
                rlwe::encrypt_zero::asymmetric(
                    self.public_key(),
                    &self.context,
                    parms_id,
                    is_ntt_form,
                    destination,
                );
            }
        } else {
            rlwe::encrypt_zero::symmetric(
                self.secret_key(),
                &self.context,
                parms_id,
                is_ntt_form,
                destination,
            );
        }
    }

    fn encrypt_internal(&self, plain: &Plaintext, is_asymmetric: bool, destination: &mut Ciphertext) {
        if !plain.is_valid_for(&self.context) {
            panic!("[Invalid argument] Plaintext is not valid for the context.");
        }
        let scheme = self.context.key_context_data().unwrap().parms().scheme();
        match scheme {
            SchemeType::Bfv => {
                if plain.is_ntt_form() {
                    panic!("[Invalid argument] BFV plaintext cannot be in NTT form.");
                }
                self.encrypt_zero_internal(self.context.first_parms_id(), is_asymmetric, destination);
                // Add round(q/t * m) into c_0.
                scaling::multiply_add_plain(
                    plain,
                    &self.context.first_context_data().unwrap(),
                    destination.poly_mut(0),
                );
            }
            SchemeType::Ckks => {
                if !plain.is_ntt_form() {
                    panic!("[Invalid argument] CKKS plaintext must be in NTT form.");
                }
                let context_data = self
                    .context
                    .context_data(plain.parms_id())
                    .unwrap_or_else(|| {
                        panic!("[Invalid argument] Plaintext is not valid for the context.")
                    });
                self.encrypt_zero_internal(plain.parms_id(), is_asymmetric, destination);
                let parms = context_data.parms();
                poly::add_inplace_rns(
                    destination.poly_mut(0),
                    plain.data(),
                    parms.poly_modulus_degree(),
                    parms.coeff_modulus(),
                );
                destination.set_scale(plain.scale());
            }
            SchemeType::None => panic!("[Invalid argument] Unsupported scheme."),
        }
    }

    /// Asymmetric encryption at the first data level.
    pub fn encrypt(&self, plain: &Plaintext, destination: &mut Ciphertext) {
        self.encrypt_internal(plain, true, destination);
    }

    pub fn encrypt_new(&self, plain: &Plaintext) -> Ciphertext {
        let mut destination = Ciphertext::new();
        self.encrypt(plain, &mut destination);
        destination
    }

    /// Symmetric encryption at the first data level.
    pub fn encrypt_symmetric(&self, plain: &Plaintext, destination: &mut Ciphertext) {
        self.encrypt_internal(plain, false, destination);
    }

    pub fn encrypt_symmetric_new(&self, plain: &Plaintext) -> Ciphertext {
        let mut destination = Ciphertext::new();
        self.encrypt_symmetric(plain, &mut destination);
        destination
    }

    /// Asymmetric encryption of zero at the first data level.
    pub fn encrypt_zero(&self, destination: &mut Ciphertext) {
        self.encrypt_zero_internal(self.context.first_parms_id(), true, destination);
    }

    pub fn encrypt_zero_new(&self) -> Ciphertext {
        let mut destination = Ciphertext::new();
        self.encrypt_zero(&mut destination);
        destination
    }

    /// Asymmetric encryption of zero at a chosen chain level.
    pub fn encrypt_zero_at(&self, parms_id: &ParmsId, destination: &mut Ciphertext) {
        self.encrypt_zero_internal(parms_id, true, destination);
    }

    pub fn encrypt_zero_new_at(&self, parms_id: &ParmsId) -> Ciphertext {
        let mut destination = Ciphertext::new();
        self.encrypt_zero_at(parms_id, &mut destination);
        destination
    }
}
