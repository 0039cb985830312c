//! BFV plaintext embedding: add or subtract round(q/t * m) into the c_0
//! component of a ciphertext.
//!
//! Each coefficient m_i becomes floor((q * m_i + floor((t+1)/2)) / t),
//! computed in RNS as floor(q/t) * m_i plus a per-coefficient fix-up word
//! derived from (q mod t) * m_i.

use crate::context::ContextData;
use crate::plaintext::Plaintext;

use super::zq;

fn scaled_coeff_fix(plain_value: u64, context_data: &ContextData) -> u64 {
    let q_mod_t = context_data.coeff_modulus_mod_plain_modulus();
    let plain_upper_half_threshold = context_data.plain_upper_half_threshold();
    let t = context_data.parms().plain_modulus().value();
    // numerator = (q mod t) * m + (t+1)/2; fix = floor(numerator / t)
    let numerator = plain_value as u128 * q_mod_t as u128 + plain_upper_half_threshold as u128;
    (numerator / t as u128) as u64
}

pub fn multiply_add_plain(plain: &Plaintext, context_data: &ContextData, destination: &mut [u64]) {
    let parms = context_data.parms();
    let coeff_modulus = parms.coeff_modulus();
    let coeff_count = parms.poly_modulus_degree();
    let coeff_div_plain_modulus = context_data.coeff_div_plain_modulus();
    let plain_data = plain.data();
    let plain_coeff_count = plain.coeff_count();
    debug_assert!(plain_coeff_count <= coeff_count);

    for i in 0..plain_coeff_count {
        let fix = scaled_coeff_fix(plain_data[i], context_data);
        for (j, modulus) in coeff_modulus.iter().enumerate() {
            let scaled =
                zq::mul_operand_add_mod(plain_data[i], &coeff_div_plain_modulus[j], fix, modulus);
            destination[j * coeff_count + i] =
                zq::add_mod(destination[j * coeff_count + i], scaled, modulus);
        }
    }
}

pub fn multiply_sub_plain(plain: &Plaintext, context_data: &ContextData, destination: &mut [u64]) {
    let parms = context_data.parms();
    let coeff_modulus = parms.coeff_modulus();
    let coeff_count = parms.poly_modulus_degree();
    let coeff_div_plain_modulus = context_data.coeff_div_plain_modulus();
    let plain_data = plain.data();
    let plain_coeff_count = plain.coeff_count();
    debug_assert!(plain_coeff_count <= coeff_count);

    for i in 0..plain_coeff_count {
        let fix = scaled_coeff_fix(plain_data[i], context_data);
        for (j, modulus) in coeff_modulus.iter().enumerate() {
            let scaled =
                zq::mul_operand_add_mod(plain_data[i], &coeff_div_plain_modulus[j], fix, modulus);
            destination[j * coeff_count + i] =
                zq::sub_mod(destination[j * coeff_count + i], scaled, modulus);
        }
    }
}
