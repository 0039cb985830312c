//! RLWE samplers and encryptions of zero, the primitives under encryption and
//! key generation.

pub mod sample {
    use rand::distributions::Uniform;
    use rand::Rng;

    use crate::math::{self, security};
    use crate::params::EncryptionParameters;

    pub const NOISE_STANDARD_DEVIATION: f64 = security::ERROR_STD_DEV;

    /// Ternary secret/ephemeral polynomial over the full RNS base.
    pub fn ternary<T: Rng>(rng: &mut T, parms: &EncryptionParameters, destination: &mut [u64]) {
        let coeff_modulus = parms.coeff_modulus();
        let coeff_count = parms.poly_modulus_degree();
        let distribution = Uniform::new_inclusive(-1i64, 1);
        for i in 0..coeff_count {
            let sampled = rng.sample(distribution);
            for (j, modulus) in coeff_modulus.iter().enumerate() {
                destination[i + j * coeff_count] = match sampled {
                    -1 => modulus.value() - 1,
                    0 => 0,
                    1 => 1,
                    _ => unreachable!(),
                };
            }
        }
    }

    /// Centered binomial noise with sigma = 3.2 (21 coin flips per sample).
    pub fn centered_binomial<T: Rng>(
        rng: &mut T,
        parms: &EncryptionParameters,
        destination: &mut [u64],
    ) {
        let coeff_modulus = parms.coeff_modulus();
        let coeff_count = parms.poly_modulus_degree();

        if !math::are_close_f64(3.2, NOISE_STANDARD_DEVIATION) {
            panic!("[Logic error] The centered binomial sampler is fixed to standard deviation 3.2.");
        }

        let cbd = |rng: &mut T| {
            let mut x = [0u8; 6];
            rng.fill_bytes(&mut x);
            x[2] &= 0x1f;
            x[5] &= 0x1f;
            math::hamming_weight(x[0]) + math::hamming_weight(x[1]) + math::hamming_weight(x[2])
                - math::hamming_weight(x[3])
                - math::hamming_weight(x[4])
                - math::hamming_weight(x[5])
        };

        for i in 0..coeff_count {
            let sampled = cbd(rng);
            for (j, modulus) in coeff_modulus.iter().enumerate() {
                destination[i + j * coeff_count] = if sampled >= 0 {
                    sampled as u64
                } else {
                    modulus.value() - sampled.unsigned_abs() as u64
                };
            }
        }
    }

    /// Uniform polynomial over the full RNS base.
    pub fn uniform<T: Rng>(rng: &mut T, parms: &EncryptionParameters, destination: &mut [u64]) {
        let coeff_modulus = parms.coeff_modulus();
        let coeff_count = parms.poly_modulus_degree();
        for (j, modulus) in coeff_modulus.iter().enumerate() {
            let distribution = Uniform::new_inclusive(0, modulus.value() - 1);
            for i in 0..coeff_count {
                destination[i + j * coeff_count] = rng.sample(distribution);
            }
        }
    }
}

pub mod encrypt_zero {
    use crate::ciphertext::Ciphertext;
    use crate::context::Context;
    use crate::keys::{PublicKey, SecretKey};
    use crate::math::poly;
    use crate::params::ParmsId;

    use super::sample;

    /// Public-key encryption of zero: c_j = pk_j * u + e_j with ternary u and
    /// binomial e.
    pub fn asymmetric(
        public_key: &PublicKey,
        context: &Context,
        parms_id: &ParmsId,
        is_ntt_form: bool,
        destination: &mut Ciphertext,
    ) {
        let context_data = context.context_data(parms_id).unwrap();
        let parms = context_data.parms();
        let coeff_modulus = parms.coeff_modulus();
        let coeff_modulus_size = coeff_modulus.len();
        let coeff_count = parms.poly_modulus_degree();
        let ntt_tables = context_data.small_ntt_tables();
        let encrypted_size = public_key.as_ciphertext().size();
        let public_key = public_key.as_ciphertext();

        destination.resize(context, parms_id, encrypted_size);
        destination.set_is_ntt_form(is_ntt_form);
        destination.set_scale(1.0);

        let mut prng = context.create_prng();

        let mut u = vec![0; coeff_count * coeff_modulus_size];
        sample::ternary(&mut prng, parms, &mut u);
        poly::ntt_rns(&mut u, coeff_count, ntt_tables);
        for j in 0..encrypted_size {
            poly::dyadic_product_rns(
                &u,
                public_key.poly(j),
                coeff_count,
                coeff_modulus,
                destination.poly_mut(j),
            );
            if !is_ntt_form {
                poly::intt_rns(destination.poly_mut(j), coeff_count, ntt_tables);
            }
        }

        // Reuse u for the noise terms.
        for j in 0..encrypted_size {
            sample::centered_binomial(&mut prng, parms, &mut u);
            if is_ntt_form {
                poly::ntt_rns(&mut u, coeff_count, ntt_tables);
            }
            poly::add_inplace_rns(destination.poly_mut(j), &u, coeff_count, coeff_modulus);
        }
    }

    /// Secret-key encryption of zero: (-(a*s + e), a) with uniform a.
    pub fn symmetric(
        secret_key: &SecretKey,
        context: &Context,
        parms_id: &ParmsId,
        is_ntt_form: bool,
        destination: &mut Ciphertext,
    ) {
        let context_data = context.context_data(parms_id).unwrap();
        let parms = context_data.parms();
        let coeff_modulus = parms.coeff_modulus();
        let coeff_modulus_size = coeff_modulus.len();
        let coeff_count = parms.poly_modulus_degree();
        let ntt_tables = context_data.small_ntt_tables();
        let secret_key = secret_key.as_plaintext();

        destination.resize(context, parms_id, 2);
        destination.set_is_ntt_form(is_ntt_form);
        destination.set_scale(1.0);

        let mut prng = context.create_prng();

        // Sample a directly in NTT form.
        sample::uniform(&mut prng, parms, destination.poly_mut(1));

        let mut noise = vec![0; coeff_count * coeff_modulus_size];
        sample::centered_binomial(&mut prng, parms, &mut noise);

        // c_0 = a * s (both already NTT).
        let (c0, c1) = destination.poly_pair_mut(0, 1);
        poly::dyadic_product_rns(c1, secret_key.data(), coeff_count, coeff_modulus, c0);

        if is_ntt_form {
            poly::ntt_rns(&mut noise, coeff_count, ntt_tables);
        } else {
            poly::intt_rns(destination.poly_mut(0), coeff_count, ntt_tables);
        }
        poly::add_inplace_rns(destination.poly_mut(0), &noise, coeff_count, coeff_modulus);
        poly::negate_inplace_rns(destination.poly_mut(0), coeff_count, coeff_modulus);

        if !is_ntt_form {
            poly::intt_rns(destination.poly_mut(1), coeff_count, ntt_tables);
        }
    }
}
