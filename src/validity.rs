use crate::ciphertext::Ciphertext;
use crate::context::Context;
use crate::keys::{GaloisKeys, KSwitchKeys, PublicKey, RelinKeys, SecretKey};
use crate::math;
use crate::plaintext::Plaintext;

/// Validity checks for HE objects against a [`Context`].
///
/// `is_metadata_valid_for` checks the cheap structural facts (chain binding,
/// sizes, scale conventions); `is_buffer_valid` checks the backing allocation
/// shape; `is_data_valid_for` additionally scans the coefficients for range
/// violations. The evaluator only runs the first two on its hot path.
pub trait Validity {
    fn is_metadata_valid_for(&self, context: &Context, allow_pure_key_levels: bool) -> bool;
    fn is_buffer_valid(&self) -> bool;
    fn is_data_valid_for(&self, context: &Context) -> bool;

    fn is_valid_for(&self, context: &Context) -> bool {
        self.is_data_valid_for(context) && self.is_buffer_valid()
    }
}

impl Validity for Plaintext {
    fn is_metadata_valid_for(&self, context: &Context, allow_pure_key_levels: bool) -> bool {
        if !context.parameters_set() {
            return false;
        }
        if self.is_ntt_form() {
            let context_data = match context.context_data(self.parms_id()) {
                Some(data) => data,
                None => return false,
            };
            let is_pure_key_level = context_data.chain_index()
                > context.first_context_data().unwrap().chain_index();
            if !allow_pure_key_levels && is_pure_key_level {
                return false;
            }
            let parms = context_data.parms();
            if self.coeff_count() != parms.coeff_modulus().len() * parms.poly_modulus_degree() {
                return false;
            }
        } else {
            let context_data = context.first_context_data().unwrap();
            if self.coeff_count() > context_data.parms().poly_modulus_degree() {
                return false;
            }
        }
        true
    }

    fn is_buffer_valid(&self) -> bool {
        self.data().len() == self.coeff_count()
    }

    fn is_data_valid_for(&self, context: &Context) -> bool {
        if !self.is_metadata_valid_for(context, false) {
            return false;
        }
        if self.is_ntt_form() {
            let context_data = context.context_data(self.parms_id()).unwrap();
            let parms = context_data.parms();
            let degree = parms.poly_modulus_degree();
            for (chunk, modulus) in self.data().chunks(degree).zip(parms.coeff_modulus().iter()) {
                if chunk.iter().any(|&x| x >= modulus.value()) {
                    return false;
                }
            }
        } else {
            let context_data = context.first_context_data().unwrap();
            let modulus = context_data.parms().plain_modulus().value();
            if self.data().iter().any(|&x| x >= modulus) {
                return false;
            }
        }
        true
    }
}

impl Validity for Ciphertext {
    fn is_metadata_valid_for(&self, context: &Context, allow_pure_key_levels: bool) -> bool {
        if !context.parameters_set() {
            return false;
        }
        let context_data = match context.context_data(self.parms_id()) {
            Some(data) => data,
            None => return false,
        };
        let is_pure_key_level =
            context_data.chain_index() > context.first_context_data().unwrap().chain_index();
        if !allow_pure_key_levels && is_pure_key_level {
            return false;
        }

        let parms = context_data.parms();
        if self.coeff_modulus_size() != parms.coeff_modulus().len()
            || self.poly_modulus_degree() != parms.poly_modulus_degree()
        {
            return false;
        }
        if self.size() < math::CIPHERTEXT_SIZE_MIN && self.size() != 0 {
            return false;
        }
        if self.size() > math::CIPHERTEXT_SIZE_MAX {
            return false;
        }

        // BFV pins the scale to 1; CKKS needs any nonzero scale.
        if context_data.is_bfv() && self.scale() != 1.0 {
            return false;
        }
        if context_data.is_ckks() && self.scale() == 0.0 {
            return false;
        }
        true
    }

    fn is_buffer_valid(&self) -> bool {
        self.data().len() == self.size() * self.coeff_modulus_size() * self.poly_modulus_degree()
    }

    fn is_data_valid_for(&self, context: &Context) -> bool {
        if !self.is_metadata_valid_for(context, false) {
            return false;
        }
        let context_data = context.context_data(self.parms_id()).unwrap();
        let parms = context_data.parms();
        let degree = parms.poly_modulus_degree();
        for poly_index in 0..self.size() {
            for (chunk, modulus) in self
                .poly(poly_index)
                .chunks(degree)
                .zip(parms.coeff_modulus().iter())
            {
                if chunk.iter().any(|&x| x >= modulus.value()) {
                    return false;
                }
            }
        }
        true
    }
}

impl Validity for SecretKey {
    fn is_metadata_valid_for(&self, context: &Context, allow_pure_key_levels: bool) -> bool {
        debug_assert!(allow_pure_key_levels);
        self.as_plaintext().is_metadata_valid_for(context, true)
            && self.parms_id() == context.key_parms_id()
    }

    fn is_buffer_valid(&self) -> bool {
        self.as_plaintext().is_buffer_valid()
    }

    fn is_data_valid_for(&self, context: &Context) -> bool {
        if !self.is_metadata_valid_for(context, true) {
            return false;
        }
        let context_data = context.key_context_data().unwrap();
        let parms = context_data.parms();
        let degree = parms.poly_modulus_degree();
        for (chunk, modulus) in self.data().chunks(degree).zip(parms.coeff_modulus().iter()) {
            if chunk.iter().any(|&x| x >= modulus.value()) {
                return false;
            }
        }
        true
    }
}

impl Validity for PublicKey {
    fn is_metadata_valid_for(&self, context: &Context, allow_pure_key_levels: bool) -> bool {
        debug_assert!(allow_pure_key_levels);
        self.as_ciphertext().is_metadata_valid_for(context, true)
            && self.parms_id() == context.key_parms_id()
            && self.as_ciphertext().is_ntt_form()
            && self.as_ciphertext().size() == math::CIPHERTEXT_SIZE_MIN
    }

    fn is_buffer_valid(&self) -> bool {
        self.as_ciphertext().is_buffer_valid()
    }

    fn is_data_valid_for(&self, context: &Context) -> bool {
        if !self.is_metadata_valid_for(context, true) {
            return false;
        }
        let context_data = context.context_data(self.parms_id()).unwrap();
        let parms = context_data.parms();
        let degree = parms.poly_modulus_degree();
        let ciphertext = self.as_ciphertext();
        for poly_index in 0..ciphertext.size() {
            for (chunk, modulus) in ciphertext
                .poly(poly_index)
                .chunks(degree)
                .zip(parms.coeff_modulus().iter())
            {
                if chunk.iter().any(|&x| x >= modulus.value()) {
                    return false;
                }
            }
        }
        true
    }
}

impl Validity for KSwitchKeys {
    fn is_metadata_valid_for(&self, context: &Context, allow_pure_key_levels: bool) -> bool {
        debug_assert!(allow_pure_key_levels);
        self.data()
            .iter()
            .all(|keys| keys.iter().all(|key| key.is_metadata_valid_for(context, true)))
    }

    fn is_buffer_valid(&self) -> bool {
        self.data()
            .iter()
            .all(|keys| keys.iter().all(|key| key.is_buffer_valid()))
    }

    fn is_data_valid_for(&self, context: &Context) -> bool {
        self.data()
            .iter()
            .all(|keys| keys.iter().all(|key| key.is_data_valid_for(context)))
    }
}

impl Validity for RelinKeys {
    fn is_metadata_valid_for(&self, context: &Context, allow_pure_key_levels: bool) -> bool {
        self.as_kswitch_keys()
            .is_metadata_valid_for(context, allow_pure_key_levels)
    }

    fn is_buffer_valid(&self) -> bool {
        self.as_kswitch_keys().is_buffer_valid()
    }

    fn is_data_valid_for(&self, context: &Context) -> bool {
        self.as_kswitch_keys().is_data_valid_for(context)
    }
}

impl Validity for GaloisKeys {
    fn is_metadata_valid_for(&self, context: &Context, allow_pure_key_levels: bool) -> bool {
        self.as_kswitch_keys()
            .is_metadata_valid_for(context, allow_pure_key_levels)
    }

    fn is_buffer_valid(&self) -> bool {
        self.as_kswitch_keys().is_buffer_valid()
    }

    fn is_data_valid_for(&self, context: &Context) -> bool {
        self.as_kswitch_keys().is_data_valid_for(context)
    }
}
