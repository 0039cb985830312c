use std::sync::Arc;

use crate::ciphertext::Ciphertext;
use crate::context::{Context, ContextData};
use crate::keys::{GaloisKeys, KSwitchKeys, RelinKeys};
use crate::math::{self, numth, poly, scaling, wide, zq, RnsTool};
use crate::modulus::Modulus;
use crate::params::{ParmsId, SchemeType, PARMS_ID_ZERO};
use crate::plaintext::Plaintext;
use crate::validity::Validity;

/// Homomorphic operations on [`Ciphertext`] objects.
///
/// The evaluator is a stateless view over a shared [`Context`]: it may be
/// used concurrently from any number of threads as long as no single
/// ciphertext is mutated from two of them.
///
/// Every operation comes in up to three flavors: `op_inplace` mutates its
/// first argument, `op` writes into a destination, and `op_new` returns a
/// fresh ciphertext. BFV operands must be in coefficient form and CKKS
/// operands in NTT form ("default NTT form") unless noted; binary operations
/// require both operands at the same chain level, and additive operations
/// additionally at (approximately) the same scale.
///
/// Multiplication grows ciphertexts (sizes s1 and s2 produce s1 + s2 - 1);
/// [`Evaluator::relinearize_inplace`] switches them back down to size 2 with
/// relinearization keys. Rotations ([`Evaluator::rotate_rows_inplace`] and
/// friends) require Galois keys.
pub struct Evaluator {
    context: Arc<Context>,
}

impl Evaluator {
    pub fn new(context: Arc<Context>) -> Self {
        if !context.parameters_set() {
            panic!("[Invalid argument] Encryption parameters are not set correctly.");
        }
        Self { context }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    fn check_ciphertext(&self, ciphertext: &Ciphertext) {
        if !ciphertext.is_metadata_valid_for(&self.context, false) || !ciphertext.is_buffer_valid()
        {
            panic!("[Invalid argument] Ciphertext is not valid for encryption parameters.");
        }
    }

    fn check_plaintext(&self, plain: &Plaintext) {
        if !plain.is_metadata_valid_for(&self.context, false) || !plain.is_buffer_valid() {
            panic!("[Invalid argument] Plaintext is not valid for encryption parameters.");
        }
    }

    fn context_data_for(&self, parms_id: &ParmsId) -> Arc<ContextData> {
        self.context.context_data(parms_id).unwrap_or_else(|| {
            panic!("[Invalid argument] parms_id is not valid for the context.")
        })
    }

    fn scheme(&self) -> SchemeType {
        self.context.first_context_data().unwrap().parms().scheme()
    }

    fn match_parms_id(&self, ciphertext1: &Ciphertext, ciphertext2: &Ciphertext) {
        if ciphertext1.parms_id() != ciphertext2.parms_id() {
            panic!("[Invalid argument] Ciphertexts are at different chain levels.");
        }
    }

    fn match_scale(&self, ciphertext1: &Ciphertext, ciphertext2: &Ciphertext) {
        if !math::are_close_f64(ciphertext1.scale(), ciphertext2.scale()) {
            panic!("[Invalid argument] Ciphertext scales do not match.");
        }
    }

    fn is_scale_within_bounds(scale: f64, context_data: &ContextData) -> bool {
        let scale_bit_count_bound = match context_data.parms().scheme() {
            SchemeType::Bfv => context_data.parms().plain_modulus().bit_count() as isize,
            SchemeType::Ckks => context_data.total_coeff_modulus_bit_count() as isize,
            SchemeType::None => -1,
        };
        !(scale <= 0.0 || (scale.log2() as isize) >= scale_bit_count_bound)
    }

    #[cfg(feature = "throw-on-transparent-ciphertext")]
    fn check_transparent(ciphertext: &Ciphertext) {
        if ciphertext.is_transparent() {
            panic!("[Logic error] Result ciphertext is transparent.");
        }
    }

    #[cfg(not(feature = "throw-on-transparent-ciphertext"))]
    fn check_transparent(_ciphertext: &Ciphertext) {}

    // ---- Additive arithmetic -------------------------------------------

    pub fn negate_inplace(&self, encrypted: &mut Ciphertext) {
        self.check_ciphertext(encrypted);
        let context_data = self.context_data_for(encrypted.parms_id());
        let parms = context_data.parms();
        let size = encrypted.size();
        poly::negate_inplace_many(
            encrypted.data_mut(),
            size,
            parms.poly_modulus_degree(),
            parms.coeff_modulus(),
        );
        Self::check_transparent(encrypted);
    }

    pub fn negate(&self, encrypted: &Ciphertext, destination: &mut Ciphertext) {
        *destination = encrypted.clone();
        self.negate_inplace(destination);
    }

    pub fn negate_new(&self, encrypted: &Ciphertext) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.negate_inplace(&mut destination);
        destination
    }

    pub fn add_inplace(&self, encrypted1: &mut Ciphertext, encrypted2: &Ciphertext) {
        self.check_ciphertext(encrypted1);
        self.check_ciphertext(encrypted2);
        self.match_parms_id(encrypted1, encrypted2);
        if encrypted1.is_ntt_form() != encrypted2.is_ntt_form() {
            panic!("[Invalid argument] Ciphertext NTT forms do not match.");
        }
        self.match_scale(encrypted1, encrypted2);

        let context_data = self.context_data_for(encrypted1.parms_id());
        let parms = context_data.parms();
        let coeff_modulus = parms.coeff_modulus();
        let coeff_count = parms.poly_modulus_degree();
        let encrypted1_size = encrypted1.size();
        let encrypted2_size = encrypted2.size();
        let min_size = encrypted1_size.min(encrypted2_size);
        let max_size = encrypted1_size.max(encrypted2_size);

        encrypted1.resize(&self.context, context_data.parms_id(), max_size);
        poly::add_inplace_many(
            encrypted1.data_mut(),
            encrypted2.data(),
            min_size,
            coeff_count,
            coeff_modulus,
        );
        // The larger operand's tail is copied through unchanged.
        if encrypted1_size < encrypted2_size {
            encrypted1
                .polys_mut(encrypted1_size, encrypted2_size)
                .copy_from_slice(encrypted2.polys(encrypted1_size, encrypted2_size));
        }
        Self::check_transparent(encrypted1);
    }

    pub fn add(&self, encrypted1: &Ciphertext, encrypted2: &Ciphertext, destination: &mut Ciphertext) {
        *destination = encrypted1.clone();
        self.add_inplace(destination, encrypted2);
    }

    pub fn add_new(&self, encrypted1: &Ciphertext, encrypted2: &Ciphertext) -> Ciphertext {
        let mut destination = encrypted1.clone();
        self.add_inplace(&mut destination, encrypted2);
        destination
    }

    pub fn add_many(&self, operands: &[Ciphertext], destination: &mut Ciphertext) {
        if operands.is_empty() {
            panic!("[Invalid argument] Operand list cannot be empty.");
        }
        *destination = operands[0].clone();
        for operand in &operands[1..] {
            self.add_inplace(destination, operand);
        }
    }

    pub fn add_many_new(&self, operands: &[Ciphertext]) -> Ciphertext {
        let mut destination = Ciphertext::new();
        self.add_many(operands, &mut destination);
        destination
    }

    pub fn sub_inplace(&self, encrypted1: &mut Ciphertext, encrypted2: &Ciphertext) {
        self.check_ciphertext(encrypted1);
        self.check_ciphertext(encrypted2);
        self.match_parms_id(encrypted1, encrypted2);
        if encrypted1.is_ntt_form() != encrypted2.is_ntt_form() {
            panic!("[Invalid argument] Ciphertext NTT forms do not match.");
        }
        self.match_scale(encrypted1, encrypted2);

        let context_data = self.context_data_for(encrypted1.parms_id());
        let parms = context_data.parms();
        let coeff_modulus = parms.coeff_modulus();
        let coeff_count = parms.poly_modulus_degree();
        let encrypted1_size = encrypted1.size();
        let encrypted2_size = encrypted2.size();
        let min_size = encrypted1_size.min(encrypted2_size);
        let max_size = encrypted1_size.max(encrypted2_size);

        encrypted1.resize(&self.context, context_data.parms_id(), max_size);
        poly::sub_inplace_many(
            encrypted1.data_mut(),
            encrypted2.data(),
            min_size,
            coeff_count,
            coeff_modulus,
        );
        // The subtrahend's surplus tail enters negated.
        if encrypted1_size < encrypted2_size {
            poly::negate_many(
                encrypted2.polys(encrypted1_size, encrypted2_size),
                encrypted2_size - encrypted1_size,
                coeff_count,
                coeff_modulus,
                encrypted1.polys_mut(encrypted1_size, encrypted2_size),
            );
        }
        Self::check_transparent(encrypted1);
    }

    pub fn sub(&self, encrypted1: &Ciphertext, encrypted2: &Ciphertext, destination: &mut Ciphertext) {
        *destination = encrypted1.clone();
        self.sub_inplace(destination, encrypted2);
    }

    pub fn sub_new(&self, encrypted1: &Ciphertext, encrypted2: &Ciphertext) -> Ciphertext {
        let mut destination = encrypted1.clone();
        self.sub_inplace(&mut destination, encrypted2);
        destination
    }

    // ---- Multiplication ------------------------------------------------

    /// Accumulates the polynomial convolution of two NTT-form ciphertext
    /// images into `destination`. Output index d collects all pairs with
    /// i + j = d, walking operand1 forward and operand2 backward.
    fn dyadic_convolute(
        operand1: &[u64],
        size1: usize,
        operand2: &[u64],
        size2: usize,
        destination: &mut [u64],
        dest_size: usize,
        coeff_count: usize,
        moduli: &[Modulus],
    ) {
        let d = coeff_count * moduli.len();
        let mut prod = vec![0; d];
        for i in 0..dest_size {
            let curr1_last = i.min(size1 - 1);
            let curr2_first = i.min(size2 - 1);
            let curr1_first = i - curr2_first;
            let steps = curr1_last - curr1_first + 1;
            for j in 0..steps {
                let shift1 = (curr1_first + j) * d;
                let shift2 = (curr2_first - j) * d;
                poly::dyadic_product_rns(
                    &operand1[shift1..shift1 + d],
                    &operand2[shift2..shift2 + d],
                    coeff_count,
                    moduli,
                    &mut prod,
                );
                poly::add_inplace_rns(
                    &mut destination[i * d..(i + 1) * d],
                    &prod,
                    coeff_count,
                    moduli,
                );
            }
        }
    }

    /// Lifts the polynomials of a BFV operand into bases q and Bsk and
    /// NTT-transforms both images (lazily).
    fn behz_extend_and_ntt(
        polys: &[u64],
        size: usize,
        coeff_count: usize,
        base_q_size: usize,
        rns_tool: &RnsTool,
        base_q_ntt_tables: &[crate::math::NttTables],
    ) -> (Vec<u64>, Vec<u64>) {
        let base_bsk_size = rns_tool.base_bsk().len();
        let base_bsk_m_tilde_size = rns_tool.base_bsk_m_tilde().len();
        let d_q = coeff_count * base_q_size;
        let d_bsk = coeff_count * base_bsk_size;

        let mut polys_q = polys[..size * d_q].to_vec();
        let mut polys_bsk = vec![0; size * d_bsk];
        let mut temp = vec![0; coeff_count * base_bsk_m_tilde_size];
        for i in 0..size {
            // Lift q -> Bsk u {m_tilde}, then Montgomery-reduce to Bsk.
            rns_tool.fastbconv_m_tilde(&polys[i * d_q..(i + 1) * d_q], &mut temp);
            rns_tool.sm_mrq(&temp, &mut polys_bsk[i * d_bsk..(i + 1) * d_bsk]);
        }
        poly::ntt_lazy_many(&mut polys_q, size, coeff_count, base_q_ntt_tables);
        poly::ntt_lazy_many(
            &mut polys_bsk,
            size,
            coeff_count,
            rns_tool.base_bsk_ntt_tables(),
        );
        (polys_q, polys_bsk)
    }

    /// Scales a convolution result by t, floor-divides by q, and converts
    /// back to base q, writing the final output polynomial.
    fn behz_scale_and_reconstruct(
        result_q: &[u64],
        result_bsk: &[u64],
        plain_modulus_value: u64,
        coeff_count: usize,
        base_q: &[Modulus],
        base_bsk: &[Modulus],
        rns_tool: &RnsTool,
        destination: &mut [u64],
    ) {
        let d_q = coeff_count * base_q.len();
        let mut combined = vec![0; d_q + coeff_count * base_bsk.len()];
        poly::multiply_scalar_rns(
            result_q,
            plain_modulus_value,
            coeff_count,
            base_q,
            &mut combined[..d_q],
        );
        poly::multiply_scalar_rns(
            result_bsk,
            plain_modulus_value,
            coeff_count,
            base_bsk,
            &mut combined[d_q..],
        );
        let mut quotient_bsk = vec![0; coeff_count * base_bsk.len()];
        rns_tool.fast_floor(&combined, &mut quotient_bsk);
        rns_tool.fastbconv_sk(&quotient_bsk, destination);
    }

    fn bfv_multiply(&self, encrypted1: &mut Ciphertext, encrypted2: &Ciphertext) {
        if encrypted1.is_ntt_form() || encrypted2.is_ntt_form() {
            panic!("[Invalid argument] BFV ciphertexts cannot be in NTT form.");
        }
        let context_data = self.context_data_for(encrypted1.parms_id());
        let parms = context_data.parms();
        let coeff_count = parms.poly_modulus_degree();
        let base_q = parms.coeff_modulus();
        let base_q_size = base_q.len();
        let encrypted1_size = encrypted1.size();
        let encrypted2_size = encrypted2.size();
        let plain_modulus = parms.plain_modulus();
        let rns_tool = context_data.rns_tool();
        let base_bsk = rns_tool.base_bsk().base();
        let base_bsk_size = base_bsk.len();
        let base_q_ntt_tables = context_data.small_ntt_tables();

        let dest_size = encrypted1_size + encrypted2_size - 1;
        encrypted1.resize(&self.context, context_data.parms_id(), dest_size);

        // Steps (1)-(3): extend both operands to q and Bsk, in NTT form. The
        // resize above kept the original polynomials intact.
        let (encrypted1_q, encrypted1_bsk) = Self::behz_extend_and_ntt(
            encrypted1.polys(0, encrypted1_size),
            encrypted1_size,
            coeff_count,
            base_q_size,
            rns_tool,
            base_q_ntt_tables,
        );
        let (encrypted2_q, encrypted2_bsk) = Self::behz_extend_and_ntt(
            encrypted2.polys(0, encrypted2_size),
            encrypted2_size,
            coeff_count,
            base_q_size,
            rns_tool,
            base_q_ntt_tables,
        );

        // Step (4): dyadic convolution in both bases.
        let mut temp_dest_q = vec![0; dest_size * coeff_count * base_q_size];
        let mut temp_dest_bsk = vec![0; dest_size * coeff_count * base_bsk_size];
        Self::dyadic_convolute(
            &encrypted1_q,
            encrypted1_size,
            &encrypted2_q,
            encrypted2_size,
            &mut temp_dest_q,
            dest_size,
            coeff_count,
            base_q,
        );
        Self::dyadic_convolute(
            &encrypted1_bsk,
            encrypted1_size,
            &encrypted2_bsk,
            encrypted2_size,
            &mut temp_dest_bsk,
            dest_size,
            coeff_count,
            base_bsk,
        );

        // Step (5): back to coefficient form.
        poly::intt_many(&mut temp_dest_q, dest_size, coeff_count, base_q_ntt_tables);
        poly::intt_many(
            &mut temp_dest_bsk,
            dest_size,
            coeff_count,
            rns_tool.base_bsk_ntt_tables(),
        );

        // Steps (6)-(8): scale by t, floor-divide by q, reconstruct base q.
        let d_q = coeff_count * base_q_size;
        let d_bsk = coeff_count * base_bsk_size;
        for i in 0..dest_size {
            Self::behz_scale_and_reconstruct(
                &temp_dest_q[i * d_q..(i + 1) * d_q],
                &temp_dest_bsk[i * d_bsk..(i + 1) * d_bsk],
                plain_modulus.value(),
                coeff_count,
                base_q,
                base_bsk,
                rns_tool,
                encrypted1.poly_mut(i),
            );
        }
    }

    fn ckks_multiply(&self, encrypted1: &mut Ciphertext, encrypted2: &Ciphertext) {
        if !encrypted1.is_ntt_form() || !encrypted2.is_ntt_form() {
            panic!("[Invalid argument] CKKS ciphertexts must be in NTT form.");
        }
        let context_data = self.context_data_for(encrypted1.parms_id());
        let parms = context_data.parms();
        let coeff_count = parms.poly_modulus_degree();
        let coeff_modulus = parms.coeff_modulus();
        let encrypted1_size = encrypted1.size();
        let encrypted2_size = encrypted2.size();

        let dest_size = encrypted1_size + encrypted2_size - 1;
        encrypted1.resize(&self.context, context_data.parms_id(), dest_size);

        let mut temp = vec![0; dest_size * coeff_count * coeff_modulus.len()];
        Self::dyadic_convolute(
            encrypted1.data(),
            encrypted1_size,
            encrypted2.data(),
            encrypted2_size,
            &mut temp,
            dest_size,
            coeff_count,
            coeff_modulus,
        );
        encrypted1.data_mut().copy_from_slice(&temp);

        encrypted1.set_scale(encrypted1.scale() * encrypted2.scale());
        if !Self::is_scale_within_bounds(encrypted1.scale(), &context_data) {
            panic!("[Invalid argument] Scale out of bounds.");
        }
    }

    pub fn multiply_inplace(&self, encrypted1: &mut Ciphertext, encrypted2: &Ciphertext) {
        self.check_ciphertext(encrypted1);
        self.check_ciphertext(encrypted2);
        self.match_parms_id(encrypted1, encrypted2);
        match self.scheme() {
            SchemeType::Bfv => self.bfv_multiply(encrypted1, encrypted2),
            SchemeType::Ckks => self.ckks_multiply(encrypted1, encrypted2),
            SchemeType::None => panic!("[Invalid argument] Unsupported scheme."),
        }
        Self::check_transparent(encrypted1);
    }

    pub fn multiply(
        &self,
        encrypted1: &Ciphertext,
        encrypted2: &Ciphertext,
        destination: &mut Ciphertext,
    ) {
        *destination = encrypted1.clone();
        self.multiply_inplace(destination, encrypted2);
    }

    pub fn multiply_new(&self, encrypted1: &Ciphertext, encrypted2: &Ciphertext) -> Ciphertext {
        let mut destination = encrypted1.clone();
        self.multiply_inplace(&mut destination, encrypted2);
        destination
    }

    fn bfv_square(&self, encrypted: &mut Ciphertext) {
        if encrypted.is_ntt_form() {
            panic!("[Invalid argument] BFV ciphertext cannot be in NTT form.");
        }
        if encrypted.size() != 2 {
            let copy = encrypted.clone();
            self.bfv_multiply(encrypted, &copy);
            return;
        }

        let context_data = self.context_data_for(encrypted.parms_id());
        let parms = context_data.parms();
        let coeff_count = parms.poly_modulus_degree();
        let base_q = parms.coeff_modulus();
        let base_q_size = base_q.len();
        let plain_modulus = parms.plain_modulus();
        let rns_tool = context_data.rns_tool();
        let base_bsk = rns_tool.base_bsk().base();
        let base_bsk_size = base_bsk.len();
        let base_q_ntt_tables = context_data.small_ntt_tables();

        let dest_size = 3;
        encrypted.resize(&self.context, context_data.parms_id(), dest_size);

        let (encrypted_q, encrypted_bsk) = Self::behz_extend_and_ntt(
            encrypted.polys(0, 2),
            2,
            coeff_count,
            base_q_size,
            rns_tool,
            base_q_ntt_tables,
        );

        // Size-2 specialization of the convolution:
        // d_0 = c_0^2, d_1 = 2 c_0 c_1, d_2 = c_1^2.
        let square_into = |image: &[u64], moduli: &[Modulus], dest: &mut Vec<u64>| {
            let d = coeff_count * moduli.len();
            let (c0, c1) = image.split_at(d);
            poly::dyadic_product_rns(c0, c0, coeff_count, moduli, &mut dest[..d]);
            poly::dyadic_product_rns(c0, c1, coeff_count, moduli, &mut dest[d..2 * d]);
            poly::double_inplace_rns(&mut dest[d..2 * d], coeff_count, moduli);
            poly::dyadic_product_rns(c1, c1, coeff_count, moduli, &mut dest[2 * d..3 * d]);
        };
        let mut temp_dest_q = vec![0; dest_size * coeff_count * base_q_size];
        let mut temp_dest_bsk = vec![0; dest_size * coeff_count * base_bsk_size];
        square_into(&encrypted_q, base_q, &mut temp_dest_q);
        square_into(&encrypted_bsk, base_bsk, &mut temp_dest_bsk);

        poly::intt_many(&mut temp_dest_q, dest_size, coeff_count, base_q_ntt_tables);
        poly::intt_many(
            &mut temp_dest_bsk,
            dest_size,
            coeff_count,
            rns_tool.base_bsk_ntt_tables(),
        );

        let d_q = coeff_count * base_q_size;
        let d_bsk = coeff_count * base_bsk_size;
        for i in 0..dest_size {
            Self::behz_scale_and_reconstruct(
                &temp_dest_q[i * d_q..(i + 1) * d_q],
                &temp_dest_bsk[i * d_bsk..(i + 1) * d_bsk],
                plain_modulus.value(),
                coeff_count,
                base_q,
                base_bsk,
                rns_tool,
                encrypted.poly_mut(i),
            );
        }
    }

    fn ckks_square(&self, encrypted: &mut Ciphertext) {
        if !encrypted.is_ntt_form() {
            panic!("[Invalid argument] CKKS ciphertext must be in NTT form.");
        }
        if encrypted.size() != 2 {
            let copy = encrypted.clone();
            self.ckks_multiply(encrypted, &copy);
            return;
        }

        let context_data = self.context_data_for(encrypted.parms_id());
        let parms = context_data.parms();
        let coeff_count = parms.poly_modulus_degree();
        let coeff_modulus = parms.coeff_modulus();
        let d = coeff_count * coeff_modulus.len();

        encrypted.resize(&self.context, context_data.parms_id(), 3);

        // c_2 first, while c_1 is still intact; then c_1, then c_0.
        let (head, c2) = encrypted.data_mut().split_at_mut(2 * d);
        let (c0, c1) = head.split_at_mut(d);
        poly::dyadic_product_rns(c1, c1, coeff_count, coeff_modulus, c2);
        poly::dyadic_product_inplace_rns(c1, c0, coeff_count, coeff_modulus);
        poly::double_inplace_rns(c1, coeff_count, coeff_modulus);
        poly::dyadic_square_inplace_rns(c0, coeff_count, coeff_modulus);

        encrypted.set_scale(encrypted.scale() * encrypted.scale());
        if !Self::is_scale_within_bounds(encrypted.scale(), &context_data) {
            panic!("[Invalid argument] Scale out of bounds.");
        }
    }

    pub fn square_inplace(&self, encrypted: &mut Ciphertext) {
        self.check_ciphertext(encrypted);
        match self.scheme() {
            SchemeType::Bfv => self.bfv_square(encrypted),
            SchemeType::Ckks => self.ckks_square(encrypted),
            SchemeType::None => panic!("[Invalid argument] Unsupported scheme."),
        }
        Self::check_transparent(encrypted);
    }

    pub fn square(&self, encrypted: &Ciphertext, destination: &mut Ciphertext) {
        *destination = encrypted.clone();
        self.square_inplace(destination);
    }

    pub fn square_new(&self, encrypted: &Ciphertext) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.square_inplace(&mut destination);
        destination
    }

    // ---- Key switching -------------------------------------------------

    /// Decomposes `target` against the current primes, multiplies the digits
    /// with the selected key, and folds the modulus-switched result into
    /// (c_0, c_1). `target` is the polynomial being eliminated, in the
    /// ciphertext's own domain.
    fn switch_key_inplace(
        &self,
        encrypted: &mut Ciphertext,
        target: &[u64],
        kswitch_keys: &KSwitchKeys,
        key_entry_index: usize,
    ) {
        self.check_ciphertext(encrypted);
        if !self.context.using_keyswitching() {
            panic!("[Logic error] Key switching is not supported by the context.");
        }
        if kswitch_keys.parms_id() != self.context.key_parms_id() {
            panic!("[Invalid argument] Key-switching keys do not match the context.");
        }
        if key_entry_index >= kswitch_keys.data().len() {
            panic!("[Invalid argument] Key-switching key is not present.");
        }

        let context_data = self.context_data_for(encrypted.parms_id());
        let parms = context_data.parms();
        let key_context_data = self.context.key_context_data().unwrap();
        let key_parms = key_context_data.parms();
        let scheme = parms.scheme();
        match scheme {
            SchemeType::Bfv => {
                if encrypted.is_ntt_form() {
                    panic!("[Invalid argument] BFV ciphertext cannot be in NTT form.");
                }
            }
            SchemeType::Ckks => {
                if !encrypted.is_ntt_form() {
                    panic!("[Invalid argument] CKKS ciphertext must be in NTT form.");
                }
            }
            SchemeType::None => panic!("[Invalid argument] Unsupported scheme."),
        }

        let coeff_count = parms.poly_modulus_degree();
        let decomp_mod_count = parms.coeff_modulus().len();
        let key_modulus = key_parms.coeff_modulus();
        let key_mod_count = key_modulus.len();
        let rns_mod_count = decomp_mod_count + 1;
        let key_ntt_tables = key_context_data.small_ntt_tables();
        let modswitch_factors = key_context_data.rns_tool().inv_q_last_mod_q();

        let key_vector = &kswitch_keys.data()[key_entry_index];
        if key_vector.is_empty() {
            panic!("[Invalid argument] Key-switching key is not present.");
        }
        let key_component_count = key_vector[0].as_ciphertext().size();
        for key in key_vector {
            if !key.is_metadata_valid_for(&self.context, true) || !key.is_buffer_valid() {
                panic!("[Invalid argument] Key-switching keys are not valid for encryption parameters.");
            }
        }
        debug_assert_eq!(target.len(), decomp_mod_count * coeff_count);

        // The decomposition digits are taken in coefficient space.
        let mut target_coeff = target.to_vec();
        if scheme == SchemeType::Ckks {
            poly::intt_rns(
                &mut target_coeff,
                coeff_count,
                &key_ntt_tables[..decomp_mod_count],
            );
        }

        let mut poly_prod = vec![0u64; key_component_count * rns_mod_count * coeff_count];
        let mut poly_lazy = vec![0u128; key_component_count * coeff_count];
        let mut operand_buffer = vec![0u64; coeff_count];

        for j in 0..rns_mod_count {
            // The special prime is the last key prime.
            let key_index = if j == decomp_mod_count {
                key_mod_count - 1
            } else {
                j
            };
            let key_prime = &key_modulus[key_index];
            // 120-bit products; 2^8 of them fit in a 128-bit accumulator.
            let lazy_reduction_summand_bound = math::MULTIPLY_ACCUMULATE_MOD_MAX;
            let mut lazy_reduction_counter = lazy_reduction_summand_bound;
            poly_lazy.fill(0);

            for i in 0..decomp_mod_count {
                // Digit i as an NTT polynomial against the current key prime.
                let operand: &[u64] = if scheme == SchemeType::Ckks && i == j {
                    // The caller's slice is already in NTT form for q_i.
                    &target[i * coeff_count..(i + 1) * coeff_count]
                } else {
                    let digit = &target_coeff[i * coeff_count..(i + 1) * coeff_count];
                    if key_modulus[i].value() <= key_prime.value() {
                        operand_buffer.copy_from_slice(digit);
                    } else {
                        poly::modulo(digit, key_prime, &mut operand_buffer);
                    }
                    poly::ntt_lazy(&mut operand_buffer, &key_ntt_tables[key_index]);
                    &operand_buffer
                };

                for (k, accumulator) in poly_lazy.chunks_mut(coeff_count).enumerate() {
                    let key_poly = key_vector[i].as_ciphertext().poly_component(k, key_index);
                    if lazy_reduction_counter == 0 {
                        for ((acc, &op), &key_coeff) in accumulator
                            .iter_mut()
                            .zip(operand.iter())
                            .zip(key_poly.iter())
                        {
                            let sum = (op as u128 * key_coeff as u128).wrapping_add(*acc);
                            *acc = zq::barrett_reduce_u128(sum, key_prime) as u128;
                        }
                    } else {
                        for ((acc, &op), &key_coeff) in accumulator
                            .iter_mut()
                            .zip(operand.iter())
                            .zip(key_poly.iter())
                        {
                            *acc = acc.wrapping_add(op as u128 * key_coeff as u128);
                        }
                    }
                }
                lazy_reduction_counter -= 1;
                if lazy_reduction_counter == 0 {
                    lazy_reduction_counter = lazy_reduction_summand_bound;
                }
            }

            // Flush the accumulators for this output prime.
            for (k, accumulator) in poly_lazy.chunks(coeff_count).enumerate() {
                let offset = (k * rns_mod_count + j) * coeff_count;
                let dest = &mut poly_prod[offset..offset + coeff_count];
                if lazy_reduction_counter == lazy_reduction_summand_bound {
                    for (d, &acc) in dest.iter_mut().zip(accumulator.iter()) {
                        *d = acc as u64;
                    }
                } else {
                    for (d, &acc) in dest.iter_mut().zip(accumulator.iter()) {
                        *d = zq::barrett_reduce_u128(acc, key_prime);
                    }
                }
            }
        }

        // Switch the special-prime component away, with rounding, and add the
        // result onto the ciphertext.
        let qk_modulus = &key_modulus[key_mod_count - 1];
        let half = qk_modulus.value() >> 1;
        let mut reduced = vec![0u64; coeff_count];
        for k in 0..key_component_count {
            let offset = k * rns_mod_count * coeff_count;
            let block = &mut poly_prod[offset..offset + rns_mod_count * coeff_count];
            let (digits, last) = block.split_at_mut(decomp_mod_count * coeff_count);

            poly::intt_lazy(last, &key_ntt_tables[key_mod_count - 1]);
            // Adding q_k/2 turns the flooring below into rounding.
            for x in last.iter_mut() {
                *x = zq::barrett_reduce(*x + half, qk_modulus);
            }

            for (j, component) in digits.chunks_mut(coeff_count).enumerate() {
                let qj = &key_modulus[j];
                poly::modulo(last, qj, &mut reduced);
                // Cancel the rounding bias modulo q_j.
                let fix = zq::barrett_reduce(half, qj);
                poly::sub_scalar_inplace(&mut reduced, fix, qj);
                // Bring both slices into the ciphertext's domain.
                if scheme == SchemeType::Ckks {
                    poly::ntt(&mut reduced, &key_ntt_tables[j]);
                } else {
                    poly::intt(component, &key_ntt_tables[j]);
                }
                poly::sub_inplace(component, &reduced, qj);
                poly::multiply_operand_inplace(component, &modswitch_factors[j], qj);
                poly::add_inplace(encrypted.poly_component_mut(k, j), component, qj);
            }
        }
    }

    fn relinearize_internal(
        &self,
        encrypted: &mut Ciphertext,
        relin_keys: &RelinKeys,
        destination_size: usize,
    ) {
        self.check_ciphertext(encrypted);
        let context_data = self.context_data_for(encrypted.parms_id());
        if relin_keys.parms_id() != self.context.key_parms_id() {
            panic!("[Invalid argument] Relinearization keys are not valid for the context.");
        }
        let mut encrypted_size = encrypted.size();
        if destination_size < 2 || destination_size > encrypted_size {
            panic!(
                "[Invalid argument] Destination size must be at least 2 and at most the ciphertext size."
            );
        }
        if destination_size == encrypted_size {
            return;
        }

        // Eat the top polynomial repeatedly; shrink the buffer only once.
        for _ in 0..encrypted_size - destination_size {
            let target = encrypted.poly(encrypted_size - 1).to_vec();
            self.switch_key_inplace(
                encrypted,
                &target,
                relin_keys.as_kswitch_keys(),
                RelinKeys::get_index(encrypted_size - 1),
            );
            encrypted_size -= 1;
        }
        encrypted.resize(&self.context, context_data.parms_id(), destination_size);
        Self::check_transparent(encrypted);
    }

    /// Relinearizes down to size 2.
    pub fn relinearize_inplace(&self, encrypted: &mut Ciphertext, relin_keys: &RelinKeys) {
        self.relinearize_internal(encrypted, relin_keys, 2);
    }

    pub fn relinearize(
        &self,
        encrypted: &Ciphertext,
        relin_keys: &RelinKeys,
        destination: &mut Ciphertext,
    ) {
        *destination = encrypted.clone();
        self.relinearize_inplace(destination, relin_keys);
    }

    pub fn relinearize_new(&self, encrypted: &Ciphertext, relin_keys: &RelinKeys) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.relinearize_inplace(&mut destination, relin_keys);
        destination
    }

    // ---- Modulus switching and rescaling -------------------------------

    fn mod_switch_scale_to_next_internal(
        &self,
        encrypted: &Ciphertext,
        destination: &mut Ciphertext,
    ) {
        let context_data = self.context_data_for(encrypted.parms_id());
        let parms = context_data.parms();
        let scheme = parms.scheme();
        match scheme {
            SchemeType::Bfv => {
                if encrypted.is_ntt_form() {
                    panic!("[Invalid argument] BFV ciphertext cannot be in NTT form.");
                }
            }
            SchemeType::Ckks => {
                if !encrypted.is_ntt_form() {
                    panic!("[Invalid argument] CKKS ciphertext must be in NTT form.");
                }
            }
            SchemeType::None => panic!("[Invalid argument] Unsupported scheme."),
        }
        let next_context_data = context_data
            .next_context_data()
            .unwrap_or_else(|| panic!("[Invalid argument] End of modulus switching chain reached."));
        let next_parms = next_context_data.parms();
        let rns_tool = context_data.rns_tool();

        let encrypted_size = encrypted.size();
        let coeff_count = next_parms.poly_modulus_degree();
        let next_coeff_modulus_size = next_parms.coeff_modulus().len();

        // Stage through a copy so the caller may alias source and
        // destination.
        let mut encrypted_copy = encrypted.clone();
        for i in 0..encrypted_size {
            match scheme {
                SchemeType::Bfv => {
                    rns_tool.divide_and_round_q_last_inplace(encrypted_copy.poly_mut(i))
                }
                SchemeType::Ckks => rns_tool.divide_and_round_q_last_ntt_inplace(
                    encrypted_copy.poly_mut(i),
                    context_data.small_ntt_tables(),
                ),
                SchemeType::None => unreachable!(),
            }
        }

        destination.resize(&self.context, next_context_data.parms_id(), encrypted_size);
        for i in 0..encrypted_size {
            destination
                .poly_mut(i)
                .copy_from_slice(&encrypted_copy.poly(i)[..coeff_count * next_coeff_modulus_size]);
        }
        destination.set_is_ntt_form(encrypted.is_ntt_form());
        if scheme == SchemeType::Ckks {
            // The dropped prime divides the scale.
            destination.set_scale(
                encrypted.scale() / parms.coeff_modulus().last().unwrap().value() as f64,
            );
        }
        Self::check_transparent(destination);
    }

    fn mod_switch_drop_to_next_internal(
        &self,
        encrypted: &Ciphertext,
        destination: &mut Ciphertext,
    ) {
        let context_data = self.context_data_for(encrypted.parms_id());
        if context_data.is_ckks() && !encrypted.is_ntt_form() {
            panic!("[Invalid argument] CKKS ciphertext must be in NTT form.");
        }
        let next_context_data = context_data
            .next_context_data()
            .unwrap_or_else(|| panic!("[Invalid argument] End of modulus switching chain reached."));
        let next_parms = next_context_data.parms();
        if !Self::is_scale_within_bounds(encrypted.scale(), &next_context_data) {
            panic!("[Invalid argument] Scale out of bounds.");
        }

        let encrypted_size = encrypted.size();
        let coeff_count = next_parms.poly_modulus_degree();
        let next_coeff_modulus_size = next_parms.coeff_modulus().len();

        destination.resize(&self.context, next_context_data.parms_id(), encrypted_size);
        for i in 0..encrypted_size {
            destination
                .poly_mut(i)
                .copy_from_slice(&encrypted.poly(i)[..coeff_count * next_coeff_modulus_size]);
        }
        destination.set_is_ntt_form(encrypted.is_ntt_form());
        destination.set_scale(encrypted.scale());
        Self::check_transparent(destination);
    }

    fn mod_switch_drop_to_next_plain_internal(&self, plain: &mut Plaintext) {
        if !plain.is_ntt_form() {
            panic!("[Invalid argument] Plaintext must be in NTT form.");
        }
        let context_data = self.context_data_for(plain.parms_id());
        let next_context_data = context_data
            .next_context_data()
            .unwrap_or_else(|| panic!("[Invalid argument] End of modulus switching chain reached."));
        let next_parms = next_context_data.parms();
        if !Self::is_scale_within_bounds(plain.scale(), &next_context_data) {
            panic!("[Invalid argument] Scale out of bounds.");
        }
        let dest_size = next_parms.poly_modulus_degree() * next_parms.coeff_modulus().len();
        plain.set_parms_id(PARMS_ID_ZERO);
        plain.resize(dest_size);
        plain.set_parms_id(*next_context_data.parms_id());
    }

    /// Switches to the next chain level: BFV scales by the dropped prime,
    /// CKKS drops it verbatim (keeping the scale; see
    /// [`Evaluator::rescale_to_next`] for the scaling variant).
    pub fn mod_switch_to_next(&self, encrypted: &Ciphertext, destination: &mut Ciphertext) {
        self.check_ciphertext(encrypted);
        if self.context.last_parms_id() == encrypted.parms_id() {
            panic!("[Invalid argument] End of modulus switching chain reached.");
        }
        match self.scheme() {
            SchemeType::Bfv => self.mod_switch_scale_to_next_internal(encrypted, destination),
            SchemeType::Ckks => self.mod_switch_drop_to_next_internal(encrypted, destination),
            SchemeType::None => panic!("[Invalid argument] Unsupported scheme."),
        }
    }

    pub fn mod_switch_to_next_inplace(&self, encrypted: &mut Ciphertext) {
        let cloned = encrypted.clone();
        self.mod_switch_to_next(&cloned, encrypted);
    }

    pub fn mod_switch_to_next_new(&self, encrypted: &Ciphertext) -> Ciphertext {
        let mut destination = Ciphertext::new();
        self.mod_switch_to_next(encrypted, &mut destination);
        destination
    }

    /// Walks the chain down to `parms_id`; rejects targets above the current
    /// level.
    pub fn mod_switch_to_inplace(&self, encrypted: &mut Ciphertext, parms_id: &ParmsId) {
        let context_data = self.context_data_for(encrypted.parms_id());
        let target_context_data = self.context_data_for(parms_id);
        if context_data.chain_index() < target_context_data.chain_index() {
            panic!("[Invalid argument] Cannot switch to a higher chain level.");
        }
        while encrypted.parms_id() != parms_id {
            self.mod_switch_to_next_inplace(encrypted);
        }
    }

    pub fn mod_switch_to(
        &self,
        encrypted: &Ciphertext,
        parms_id: &ParmsId,
        destination: &mut Ciphertext,
    ) {
        *destination = encrypted.clone();
        self.mod_switch_to_inplace(destination, parms_id);
    }

    pub fn mod_switch_to_new(&self, encrypted: &Ciphertext, parms_id: &ParmsId) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.mod_switch_to_inplace(&mut destination, parms_id);
        destination
    }

    /// Plaintext modulus switch: drops the last RNS component of an NTT-form
    /// plaintext.
    pub fn mod_switch_to_next_plain_inplace(&self, plain: &mut Plaintext) {
        self.check_plaintext(plain);
        self.mod_switch_drop_to_next_plain_internal(plain);
    }

    pub fn mod_switch_to_next_plain(&self, plain: &Plaintext, destination: &mut Plaintext) {
        *destination = plain.clone();
        self.mod_switch_to_next_plain_inplace(destination);
    }

    pub fn mod_switch_to_next_plain_new(&self, plain: &Plaintext) -> Plaintext {
        let mut destination = plain.clone();
        self.mod_switch_to_next_plain_inplace(&mut destination);
        destination
    }

    pub fn mod_switch_plain_to_inplace(&self, plain: &mut Plaintext, parms_id: &ParmsId) {
        if !plain.is_ntt_form() {
            panic!("[Invalid argument] Plaintext must be in NTT form.");
        }
        let context_data = self.context_data_for(plain.parms_id());
        let target_context_data = self.context_data_for(parms_id);
        if context_data.chain_index() < target_context_data.chain_index() {
            panic!("[Invalid argument] Cannot switch to a higher chain level.");
        }
        while plain.parms_id() != parms_id {
            self.mod_switch_to_next_plain_inplace(plain);
        }
    }

    pub fn mod_switch_plain_to(
        &self,
        plain: &Plaintext,
        parms_id: &ParmsId,
        destination: &mut Plaintext,
    ) {
        *destination = plain.clone();
        self.mod_switch_plain_to_inplace(destination, parms_id);
    }

    /// CKKS rescale: divides by the dropped prime, dividing the scale with
    /// it.
    pub fn rescale_to_next(&self, encrypted: &Ciphertext, destination: &mut Ciphertext) {
        self.check_ciphertext(encrypted);
        if self.context.last_parms_id() == encrypted.parms_id() {
            panic!("[Invalid argument] End of modulus switching chain reached.");
        }
        match self.scheme() {
            SchemeType::Bfv => {
                panic!("[Invalid argument] Rescaling is only supported for the CKKS scheme.")
            }
            SchemeType::Ckks => self.mod_switch_scale_to_next_internal(encrypted, destination),
            SchemeType::None => panic!("[Invalid argument] Unsupported scheme."),
        }
    }

    pub fn rescale_to_next_inplace(&self, encrypted: &mut Ciphertext) {
        let cloned = encrypted.clone();
        self.rescale_to_next(&cloned, encrypted);
    }

    pub fn rescale_to_next_new(&self, encrypted: &Ciphertext) -> Ciphertext {
        let mut destination = Ciphertext::new();
        self.rescale_to_next(encrypted, &mut destination);
        destination
    }

    pub fn rescale_to(
        &self,
        encrypted: &Ciphertext,
        parms_id: &ParmsId,
        destination: &mut Ciphertext,
    ) {
        self.check_ciphertext(encrypted);
        if self.scheme() != SchemeType::Ckks {
            panic!("[Invalid argument] Rescaling is only supported for the CKKS scheme.");
        }
        let context_data = self.context_data_for(encrypted.parms_id());
        let target_context_data = self.context_data_for(parms_id);
        if context_data.chain_index() < target_context_data.chain_index() {
            panic!("[Invalid argument] Cannot rescale to a higher chain level.");
        }
        *destination = encrypted.clone();
        while destination.parms_id() != parms_id {
            let source = destination.clone();
            self.mod_switch_scale_to_next_internal(&source, destination);
        }
    }

    pub fn rescale_to_inplace(&self, encrypted: &mut Ciphertext, parms_id: &ParmsId) {
        let cloned = encrypted.clone();
        self.rescale_to(&cloned, parms_id, encrypted);
    }

    // ---- Product trees -------------------------------------------------

    /// Multiplies a list of BFV ciphertexts as a balanced tree, relinearizing
    /// after every product.
    pub fn multiply_many(
        &self,
        operands: &[Ciphertext],
        relin_keys: &RelinKeys,
        destination: &mut Ciphertext,
    ) {
        if operands.is_empty() {
            panic!("[Invalid argument] Operand list cannot be empty.");
        }
        let context_data = self.context_data_for(operands[0].parms_id());
        if context_data.parms().scheme() != SchemeType::Bfv {
            panic!("[Logic error] Unsupported scheme.");
        }
        if operands.len() == 1 {
            *destination = operands[0].clone();
            return;
        }

        // First level pairs the inputs; later levels consume the worklist
        // from the front while products accumulate at the back.
        let mut worklist: Vec<Ciphertext> = Vec::with_capacity(operands.len());
        let mut i = 0;
        while i + 1 < operands.len() {
            let mut product = if operands[i].data() == operands[i + 1].data() {
                self.square_new(&operands[i])
            } else {
                self.multiply_new(&operands[i], &operands[i + 1])
            };
            self.relinearize_inplace(&mut product, relin_keys);
            worklist.push(product);
            i += 2;
        }
        if operands.len() & 1 == 1 {
            worklist.push(operands[operands.len() - 1].clone());
        }

        let mut i = 0;
        while i + 1 < worklist.len() {
            let mut product = self.multiply_new(&worklist[i], &worklist[i + 1]);
            self.relinearize_inplace(&mut product, relin_keys);
            worklist.push(product);
            i += 2;
        }
        *destination = worklist.pop().unwrap();
    }

    pub fn multiply_many_new(&self, operands: &[Ciphertext], relin_keys: &RelinKeys) -> Ciphertext {
        let mut destination = Ciphertext::new();
        self.multiply_many(operands, relin_keys, &mut destination);
        destination
    }

    /// Raises a BFV ciphertext to a positive power via
    /// [`Evaluator::multiply_many`].
    pub fn exponentiate_inplace(
        &self,
        encrypted: &mut Ciphertext,
        exponent: u64,
        relin_keys: &RelinKeys,
    ) {
        if self.context.context_data(encrypted.parms_id()).is_none() {
            panic!("[Invalid argument] Ciphertext is not valid for encryption parameters.");
        }
        if self.context.context_data(relin_keys.parms_id()).is_none() {
            panic!("[Invalid argument] Relinearization keys are not valid for the context.");
        }
        if exponent == 0 {
            panic!("[Invalid argument] Exponent cannot be zero.");
        }
        if exponent == 1 {
            return;
        }
        let operands = vec![encrypted.clone(); exponent as usize];
        self.multiply_many(&operands, relin_keys, encrypted);
    }

    pub fn exponentiate(
        &self,
        encrypted: &Ciphertext,
        exponent: u64,
        relin_keys: &RelinKeys,
        destination: &mut Ciphertext,
    ) {
        *destination = encrypted.clone();
        self.exponentiate_inplace(destination, exponent, relin_keys);
    }

    // ---- Plaintext operands --------------------------------------------

    pub fn add_plain_inplace(&self, encrypted: &mut Ciphertext, plain: &Plaintext) {
        self.check_ciphertext(encrypted);
        self.check_plaintext(plain);
        let context_data = self.context_data_for(encrypted.parms_id());
        let parms = context_data.parms();
        match parms.scheme() {
            SchemeType::Bfv => {
                if encrypted.is_ntt_form() {
                    panic!("[Invalid argument] BFV ciphertext cannot be in NTT form.");
                }
            }
            SchemeType::Ckks => {
                if !encrypted.is_ntt_form() {
                    panic!("[Invalid argument] CKKS ciphertext must be in NTT form.");
                }
                if encrypted.parms_id() != plain.parms_id() {
                    panic!("[Invalid argument] Ciphertext and plaintext are at different chain levels.");
                }
                if !math::are_close_f64(encrypted.scale(), plain.scale()) {
                    panic!("[Invalid argument] Ciphertext and plaintext scales do not match.");
                }
            }
            SchemeType::None => panic!("[Invalid argument] Unsupported scheme."),
        }
        if encrypted.is_ntt_form() != plain.is_ntt_form() {
            panic!("[Invalid argument] Ciphertext and plaintext NTT forms do not match.");
        }

        match parms.scheme() {
            SchemeType::Bfv => {
                scaling::multiply_add_plain(plain, &context_data, encrypted.poly_mut(0));
            }
            SchemeType::Ckks => {
                poly::add_inplace_rns(
                    encrypted.poly_mut(0),
                    plain.data(),
                    parms.poly_modulus_degree(),
                    parms.coeff_modulus(),
                );
            }
            SchemeType::None => unreachable!(),
        }
        Self::check_transparent(encrypted);
    }

    pub fn add_plain(&self, encrypted: &Ciphertext, plain: &Plaintext, destination: &mut Ciphertext) {
        *destination = encrypted.clone();
        self.add_plain_inplace(destination, plain);
    }

    pub fn add_plain_new(&self, encrypted: &Ciphertext, plain: &Plaintext) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.add_plain_inplace(&mut destination, plain);
        destination
    }

    pub fn sub_plain_inplace(&self, encrypted: &mut Ciphertext, plain: &Plaintext) {
        self.check_ciphertext(encrypted);
        self.check_plaintext(plain);
        let context_data = self.context_data_for(encrypted.parms_id());
        let parms = context_data.parms();
        match parms.scheme() {
            SchemeType::Bfv => {
                if encrypted.is_ntt_form() {
                    panic!("[Invalid argument] BFV ciphertext cannot be in NTT form.");
                }
            }
            SchemeType::Ckks => {
                if !encrypted.is_ntt_form() {
                    panic!("[Invalid argument] CKKS ciphertext must be in NTT form.");
                }
                if encrypted.parms_id() != plain.parms_id() {
                    panic!("[Invalid argument] Ciphertext and plaintext are at different chain levels.");
                }
                if !math::are_close_f64(encrypted.scale(), plain.scale()) {
                    panic!("[Invalid argument] Ciphertext and plaintext scales do not match.");
                }
            }
            SchemeType::None => panic!("[Invalid argument] Unsupported scheme."),
        }
        if encrypted.is_ntt_form() != plain.is_ntt_form() {
            panic!("[Invalid argument] Ciphertext and plaintext NTT forms do not match.");
        }

        match parms.scheme() {
            SchemeType::Bfv => {
                scaling::multiply_sub_plain(plain, &context_data, encrypted.poly_mut(0));
            }
            SchemeType::Ckks => {
                poly::sub_inplace_rns(
                    encrypted.poly_mut(0),
                    plain.data(),
                    parms.poly_modulus_degree(),
                    parms.coeff_modulus(),
                );
            }
            SchemeType::None => unreachable!(),
        }
        Self::check_transparent(encrypted);
    }

    pub fn sub_plain(&self, encrypted: &Ciphertext, plain: &Plaintext, destination: &mut Ciphertext) {
        *destination = encrypted.clone();
        self.sub_plain_inplace(destination, plain);
    }

    pub fn sub_plain_new(&self, encrypted: &Ciphertext, plain: &Plaintext) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.sub_plain_inplace(&mut destination, plain);
        destination
    }

    fn multiply_plain_normal(&self, encrypted: &mut Ciphertext, plain: &Plaintext) {
        let context_data = self.context_data_for(encrypted.parms_id());
        let parms = context_data.parms();
        let coeff_modulus = parms.coeff_modulus();
        let coeff_modulus_size = coeff_modulus.len();
        let coeff_count = parms.poly_modulus_degree();
        let plain_upper_half_threshold = context_data.plain_upper_half_threshold();
        let plain_upper_half_increment = context_data.plain_upper_half_increment();
        let ntt_tables = context_data.small_ntt_tables();
        let encrypted_size = encrypted.size();
        let plain_coeff_count = plain.coeff_count();

        let new_scale = encrypted.scale() * plain.scale();
        if !Self::is_scale_within_bounds(new_scale, &context_data) {
            panic!("[Invalid argument] Scale out of bounds.");
        }
        encrypted.set_scale(new_scale);

        // Monomial fast path. Not constant-time with respect to the
        // plaintext.
        if plain.nonzero_coeff_count() == 1 {
            let mono_exponent = plain.significant_coeff_count() - 1;
            let mono_coeff = plain.data_at(mono_exponent);
            if mono_coeff >= plain_upper_half_threshold {
                if !context_data.qualifiers().using_fast_plain_lift {
                    // Lift the monomial above q - t as one multi-precision
                    // value, then split into RNS.
                    let mut adjusted = vec![0; coeff_modulus_size];
                    wide::add_word(plain_upper_half_increment, mono_coeff, &mut adjusted);
                    context_data.rns_tool().base_q().decompose(&mut adjusted);
                    poly::negacyclic_multiply_monomials_inplace_many(
                        encrypted.data_mut(),
                        &adjusted,
                        mono_exponent,
                        encrypted_size,
                        coeff_count,
                        coeff_modulus,
                    );
                } else {
                    // The increment is already per-prime.
                    let adjusted: Vec<u64> = plain_upper_half_increment
                        .iter()
                        .map(|&increment| mono_coeff + increment)
                        .collect();
                    poly::negacyclic_multiply_monomials_inplace_many(
                        encrypted.data_mut(),
                        &adjusted,
                        mono_exponent,
                        encrypted_size,
                        coeff_count,
                        coeff_modulus,
                    );
                }
            } else {
                poly::negacyclic_multiply_monomial_inplace_many(
                    encrypted.data_mut(),
                    mono_coeff,
                    mono_exponent,
                    encrypted_size,
                    coeff_count,
                    coeff_modulus,
                );
            }
            return;
        }

        // Generic path: lift the plaintext into RNS, transform, and multiply
        // dyadically.
        let mut temp = vec![0; coeff_count * coeff_modulus_size];
        if !context_data.qualifiers().using_fast_plain_lift {
            for i in 0..plain_coeff_count {
                let plain_value = plain.data_at(i);
                if plain_value >= plain_upper_half_threshold {
                    wide::add_word(
                        plain_upper_half_increment,
                        plain_value,
                        &mut temp[i * coeff_modulus_size..(i + 1) * coeff_modulus_size],
                    );
                } else {
                    temp[i * coeff_modulus_size] = plain_value;
                }
            }
            context_data.rns_tool().base_q().decompose_array(&mut temp);
        } else {
            for (i, &increment) in plain_upper_half_increment.iter().enumerate() {
                for j in 0..plain_coeff_count {
                    let plain_value = plain.data_at(j);
                    temp[i * coeff_count + j] = if plain_value >= plain_upper_half_threshold {
                        plain_value + increment
                    } else {
                        plain_value
                    };
                }
            }
        }

        poly::ntt_rns(&mut temp, coeff_count, ntt_tables);
        let size = encrypted_size;
        poly::ntt_lazy_many(encrypted.data_mut(), size, coeff_count, ntt_tables);
        for i in 0..encrypted_size {
            poly::dyadic_product_inplace_rns(
                encrypted.poly_mut(i),
                &temp,
                coeff_count,
                coeff_modulus,
            );
        }
        poly::intt_many(encrypted.data_mut(), size, coeff_count, ntt_tables);
    }

    fn multiply_plain_ntt(&self, encrypted: &mut Ciphertext, plain: &Plaintext) {
        if !plain.is_ntt_form() {
            panic!("[Invalid argument] Plaintext must be in NTT form.");
        }
        if encrypted.parms_id() != plain.parms_id() {
            panic!("[Invalid argument] Ciphertext and plaintext are at different chain levels.");
        }
        let context_data = self.context_data_for(encrypted.parms_id());
        let parms = context_data.parms();
        let coeff_modulus = parms.coeff_modulus();
        let coeff_count = parms.poly_modulus_degree();

        for i in 0..encrypted.size() {
            poly::dyadic_product_inplace_rns(
                encrypted.poly_mut(i),
                plain.data(),
                coeff_count,
                coeff_modulus,
            );
        }

        let new_scale = encrypted.scale() * plain.scale();
        if !Self::is_scale_within_bounds(new_scale, &context_data) {
            panic!("[Invalid argument] Scale out of bounds.");
        }
        encrypted.set_scale(new_scale);
    }

    pub fn multiply_plain_inplace(&self, encrypted: &mut Ciphertext, plain: &Plaintext) {
        self.check_ciphertext(encrypted);
        self.check_plaintext(plain);
        if encrypted.is_ntt_form() != plain.is_ntt_form() {
            panic!("[Invalid argument] Ciphertext and plaintext NTT forms do not match.");
        }
        if encrypted.is_ntt_form() {
            self.multiply_plain_ntt(encrypted, plain);
        } else {
            self.multiply_plain_normal(encrypted, plain);
        }
        Self::check_transparent(encrypted);
    }

    pub fn multiply_plain(
        &self,
        encrypted: &Ciphertext,
        plain: &Plaintext,
        destination: &mut Ciphertext,
    ) {
        *destination = encrypted.clone();
        self.multiply_plain_inplace(destination, plain);
    }

    pub fn multiply_plain_new(&self, encrypted: &Ciphertext, plain: &Plaintext) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.multiply_plain_inplace(&mut destination, plain);
        destination
    }

    // ---- NTT transforms ------------------------------------------------

    /// Lifts a plain (BFV) plaintext into the RNS base of `parms_id` and
    /// transforms it, making it usable with NTT-form ciphertexts.
    pub fn transform_plain_to_ntt_inplace(&self, plain: &mut Plaintext, parms_id: &ParmsId) {
        self.check_plaintext(plain);
        if plain.is_ntt_form() {
            panic!("[Invalid argument] Plaintext is already in NTT form.");
        }
        let context_data = self.context_data_for(parms_id);
        let parms = context_data.parms();
        let coeff_modulus = parms.coeff_modulus();
        let coeff_modulus_size = coeff_modulus.len();
        let coeff_count = parms.poly_modulus_degree();
        let plain_coeff_count = plain.coeff_count();
        let plain_upper_half_threshold = context_data.plain_upper_half_threshold();
        let plain_upper_half_increment = context_data.plain_upper_half_increment();

        plain.resize(coeff_count * coeff_modulus_size);

        if !context_data.qualifiers().using_fast_plain_lift {
            let mut temp = vec![0; coeff_count * coeff_modulus_size];
            for i in 0..plain_coeff_count {
                let plain_value = plain.data_at(i);
                if plain_value >= plain_upper_half_threshold {
                    wide::add_word(
                        plain_upper_half_increment,
                        plain_value,
                        &mut temp[i * coeff_modulus_size..(i + 1) * coeff_modulus_size],
                    );
                } else {
                    temp[i * coeff_modulus_size] = plain_value;
                }
            }
            context_data.rns_tool().base_q().decompose_array(&mut temp);
            plain.data_mut().copy_from_slice(&temp);
        } else {
            // Populate the components top-down so the source coefficients at
            // the front are read before being overwritten.
            for i in 0..coeff_modulus_size {
                let component = coeff_modulus_size - 1 - i;
                let increment = plain_upper_half_increment[component];
                for j in 0..plain_coeff_count {
                    let plain_value = plain.data_at(j);
                    plain.data_mut()[component * coeff_count + j] =
                        if plain_value >= plain_upper_half_threshold {
                            plain_value + increment
                        } else {
                            plain_value
                        };
                }
            }
        }

        poly::ntt_rns(plain.data_mut(), coeff_count, context_data.small_ntt_tables());
        plain.set_parms_id(*parms_id);
    }

    pub fn transform_plain_to_ntt(
        &self,
        plain: &Plaintext,
        parms_id: &ParmsId,
        destination: &mut Plaintext,
    ) {
        *destination = plain.clone();
        self.transform_plain_to_ntt_inplace(destination, parms_id);
    }

    pub fn transform_plain_to_ntt_new(&self, plain: &Plaintext, parms_id: &ParmsId) -> Plaintext {
        let mut destination = plain.clone();
        self.transform_plain_to_ntt_inplace(&mut destination, parms_id);
        destination
    }

    pub fn transform_to_ntt_inplace(&self, encrypted: &mut Ciphertext) {
        self.check_ciphertext(encrypted);
        if encrypted.is_ntt_form() {
            panic!("[Invalid argument] Ciphertext is already in NTT form.");
        }
        let context_data = self.context_data_for(encrypted.parms_id());
        let parms = context_data.parms();
        let coeff_count = parms.poly_modulus_degree();
        let size = encrypted.size();
        poly::ntt_many(
            encrypted.data_mut(),
            size,
            coeff_count,
            context_data.small_ntt_tables(),
        );
        encrypted.set_is_ntt_form(true);
        Self::check_transparent(encrypted);
    }

    pub fn transform_to_ntt(&self, encrypted: &Ciphertext, destination: &mut Ciphertext) {
        *destination = encrypted.clone();
        self.transform_to_ntt_inplace(destination);
    }

    pub fn transform_to_ntt_new(&self, encrypted: &Ciphertext) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.transform_to_ntt_inplace(&mut destination);
        destination
    }

    pub fn transform_from_ntt_inplace(&self, encrypted: &mut Ciphertext) {
        self.check_ciphertext(encrypted);
        if !encrypted.is_ntt_form() {
            panic!("[Invalid argument] Ciphertext is not in NTT form.");
        }
        let context_data = self.context_data_for(encrypted.parms_id());
        let parms = context_data.parms();
        let coeff_count = parms.poly_modulus_degree();
        let size = encrypted.size();
        poly::intt_many(
            encrypted.data_mut(),
            size,
            coeff_count,
            context_data.small_ntt_tables(),
        );
        encrypted.set_is_ntt_form(false);
        Self::check_transparent(encrypted);
    }

    pub fn transform_from_ntt(&self, encrypted: &Ciphertext, destination: &mut Ciphertext) {
        *destination = encrypted.clone();
        self.transform_from_ntt_inplace(destination);
    }

    pub fn transform_from_ntt_new(&self, encrypted: &Ciphertext) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.transform_from_ntt_inplace(&mut destination);
        destination
    }

    // ---- Galois automorphisms and rotations ----------------------------

    pub fn apply_galois_inplace(
        &self,
        encrypted: &mut Ciphertext,
        galois_elt: usize,
        galois_keys: &GaloisKeys,
    ) {
        self.check_ciphertext(encrypted);
        if galois_keys.parms_id() != self.context.key_parms_id() {
            panic!("[Invalid argument] Galois keys are not valid for the context.");
        }
        let context_data = self.context_data_for(encrypted.parms_id());
        let parms = context_data.parms();
        let coeff_modulus = parms.coeff_modulus();
        let coeff_modulus_size = coeff_modulus.len();
        let coeff_count = parms.poly_modulus_degree();
        let key_context_data = self.context.key_context_data().unwrap();
        let galois_tool = key_context_data.galois_tool();

        let m = coeff_count * 2;
        if galois_elt & 1 == 0 || galois_elt >= m {
            panic!("[Invalid argument] Galois element is not valid.");
        }
        if !galois_keys.has_key(galois_elt) {
            panic!("[Invalid argument] Galois key is not present for the element.");
        }
        if encrypted.size() > 2 {
            panic!("[Invalid argument] Ciphertext size must be 2.");
        }

        let mut temp = vec![0; coeff_count * coeff_modulus_size];

        // The ordering below is load-bearing: the automorphism is not
        // in-place, c_0 must be written back before c_1 is permuted, and c_1
        // must be zeroed before key switching adds onto it.
        if encrypted.is_ntt_form() {
            galois_tool.apply_ntt_rns(encrypted.poly(0), coeff_modulus_size, galois_elt, &mut temp);
            encrypted.poly_mut(0).copy_from_slice(&temp);
            galois_tool.apply_ntt_rns(encrypted.poly(1), coeff_modulus_size, galois_elt, &mut temp);
        } else {
            galois_tool.apply_rns(encrypted.poly(0), galois_elt, coeff_modulus, &mut temp);
            encrypted.poly_mut(0).copy_from_slice(&temp);
            galois_tool.apply_rns(encrypted.poly(1), galois_elt, coeff_modulus, &mut temp);
        }
        encrypted.poly_mut(1).fill(0);
        self.switch_key_inplace(
            encrypted,
            &temp,
            galois_keys.as_kswitch_keys(),
            GaloisKeys::get_index(galois_elt),
        );
        Self::check_transparent(encrypted);
    }

    pub fn apply_galois(
        &self,
        encrypted: &Ciphertext,
        galois_elt: usize,
        galois_keys: &GaloisKeys,
        destination: &mut Ciphertext,
    ) {
        *destination = encrypted.clone();
        self.apply_galois_inplace(destination, galois_elt, galois_keys);
    }

    pub fn apply_galois_new(
        &self,
        encrypted: &Ciphertext,
        galois_elt: usize,
        galois_keys: &GaloisKeys,
    ) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.apply_galois_inplace(&mut destination, galois_elt, galois_keys);
        destination
    }

    /// Plaintext automorphism; useful when the automorphism can be pushed
    /// onto a plaintext operand instead of a ciphertext.
    pub fn apply_galois_plain_inplace(&self, plain: &mut Plaintext, galois_elt: usize) {
        self.check_plaintext(plain);
        let context_data = if plain.is_ntt_form() {
            self.context_data_for(plain.parms_id())
        } else {
            self.context.key_context_data().unwrap()
        };
        let parms = context_data.parms();
        let coeff_count = parms.poly_modulus_degree();
        let key_context_data = self.context.key_context_data().unwrap();
        let galois_tool = key_context_data.galois_tool();

        let m = coeff_count * 2;
        if galois_elt & 1 == 0 || galois_elt >= m {
            panic!("[Invalid argument] Galois element is not valid.");
        }

        let mut temp = vec![0; plain.data().len()];
        if plain.is_ntt_form() {
            galois_tool.apply_ntt_rns(
                plain.data(),
                parms.coeff_modulus().len(),
                galois_elt,
                &mut temp,
            );
        } else if context_data.is_ckks() {
            galois_tool.apply_rns(plain.data(), galois_elt, parms.coeff_modulus(), &mut temp);
        } else {
            galois_tool.apply(plain.data(), galois_elt, parms.plain_modulus(), &mut temp);
        }
        plain.data_mut().copy_from_slice(&temp);
    }

    pub fn apply_galois_plain_new(&self, plain: &Plaintext, galois_elt: usize) -> Plaintext {
        let mut destination = plain.clone();
        self.apply_galois_plain_inplace(&mut destination, galois_elt);
        destination
    }

    fn rotate_internal(&self, encrypted: &mut Ciphertext, steps: isize, galois_keys: &GaloisKeys) {
        let context_data = self.context_data_for(encrypted.parms_id());
        if !context_data.qualifiers().using_batching {
            panic!("[Invalid argument] Encryption parameters do not support batching.");
        }
        if galois_keys.parms_id() != self.context.key_parms_id() {
            panic!("[Invalid argument] Galois keys are not valid for the context.");
        }
        if steps == 0 {
            return;
        }
        let coeff_count = context_data.parms().poly_modulus_degree();
        let galois_tool = context_data.galois_tool();
        if galois_keys.has_key(galois_tool.get_elt_from_step(steps)) {
            let elt = galois_tool.get_elt_from_step(steps);
            self.apply_galois_inplace(encrypted, elt, galois_keys);
        } else {
            // Compose the rotation from signed powers of two; a single-term
            // decomposition means the direct key is simply missing.
            let naf_steps = numth::naf(steps as i32);
            if naf_steps.len() == 1 {
                panic!("[Logic error] Galois key is not present.");
            }
            for naf_step in naf_steps {
                // +-(N/2) is a full row cycle, a no-op.
                if naf_step.unsigned_abs() as usize != coeff_count >> 1 {
                    self.rotate_internal(encrypted, naf_step as isize, galois_keys);
                }
            }
        }
    }

    fn conjugate_internal(&self, encrypted: &mut Ciphertext, galois_keys: &GaloisKeys) {
        let context_data = self.context_data_for(encrypted.parms_id());
        if !context_data.qualifiers().using_batching {
            panic!("[Invalid argument] Encryption parameters do not support batching.");
        }
        let elt = context_data.galois_tool().get_elt_from_step(0);
        self.apply_galois_inplace(encrypted, elt, galois_keys);
    }

    /// Cyclic row rotation of a batched BFV ciphertext.
    pub fn rotate_rows_inplace(
        &self,
        encrypted: &mut Ciphertext,
        steps: isize,
        galois_keys: &GaloisKeys,
    ) {
        if self.scheme() != SchemeType::Bfv {
            panic!("[Invalid argument] Unsupported scheme.");
        }
        self.rotate_internal(encrypted, steps, galois_keys);
    }

    pub fn rotate_rows(
        &self,
        encrypted: &Ciphertext,
        steps: isize,
        galois_keys: &GaloisKeys,
        destination: &mut Ciphertext,
    ) {
        *destination = encrypted.clone();
        self.rotate_rows_inplace(destination, steps, galois_keys);
    }

    pub fn rotate_rows_new(
        &self,
        encrypted: &Ciphertext,
        steps: isize,
        galois_keys: &GaloisKeys,
    ) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.rotate_rows_inplace(&mut destination, steps, galois_keys);
        destination
    }

    /// Swaps the two rows of a batched BFV ciphertext.
    pub fn rotate_columns_inplace(&self, encrypted: &mut Ciphertext, galois_keys: &GaloisKeys) {
        if self.scheme() != SchemeType::Bfv {
            panic!("[Invalid argument] Unsupported scheme.");
        }
        self.conjugate_internal(encrypted, galois_keys);
    }

    pub fn rotate_columns(
        &self,
        encrypted: &Ciphertext,
        galois_keys: &GaloisKeys,
        destination: &mut Ciphertext,
    ) {
        *destination = encrypted.clone();
        self.rotate_columns_inplace(destination, galois_keys);
    }

    pub fn rotate_columns_new(&self, encrypted: &Ciphertext, galois_keys: &GaloisKeys) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.rotate_columns_inplace(&mut destination, galois_keys);
        destination
    }

    /// Cyclic slot rotation of a CKKS ciphertext.
    pub fn rotate_vector_inplace(
        &self,
        encrypted: &mut Ciphertext,
        steps: isize,
        galois_keys: &GaloisKeys,
    ) {
        if self.scheme() != SchemeType::Ckks {
            panic!("[Invalid argument] Unsupported scheme.");
        }
        self.rotate_internal(encrypted, steps, galois_keys);
    }

    pub fn rotate_vector(
        &self,
        encrypted: &Ciphertext,
        steps: isize,
        galois_keys: &GaloisKeys,
        destination: &mut Ciphertext,
    ) {
        *destination = encrypted.clone();
        self.rotate_vector_inplace(destination, steps, galois_keys);
    }

    pub fn rotate_vector_new(
        &self,
        encrypted: &Ciphertext,
        steps: isize,
        galois_keys: &GaloisKeys,
    ) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.rotate_vector_inplace(&mut destination, steps, galois_keys);
        destination
    }

    /// Complex conjugation of a CKKS ciphertext.
    pub fn complex_conjugate_inplace(&self, encrypted: &mut Ciphertext, galois_keys: &GaloisKeys) {
        if self.scheme() != SchemeType::Ckks {
            panic!("[Invalid argument] Unsupported scheme.");
        }
        self.conjugate_internal(encrypted, galois_keys);
    }

    pub fn complex_conjugate(
        &self,
        encrypted: &Ciphertext,
        galois_keys: &GaloisKeys,
        destination: &mut Ciphertext,
    ) {
        *destination = encrypted.clone();
        self.complex_conjugate_inplace(destination, galois_keys);
    }

    pub fn complex_conjugate_new(
        &self,
        encrypted: &Ciphertext,
        galois_keys: &GaloisKeys,
    ) -> Ciphertext {
        let mut destination = encrypted.clone();
        self.complex_conjugate_inplace(&mut destination, galois_keys);
        destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decryptor::Decryptor;
    use crate::encoder::{BatchEncoder, CkksEncoder};
    use crate::encryptor::Encryptor;
    use crate::keys::KeyGenerator;
    use crate::modulus::CoeffModulus;
    use crate::params::{EncryptionParameters, SecurityLevel};
    use num_complex::Complex;
    use rand::Rng;

    type BfvSuite = (
        Arc<Context>,
        BatchEncoder,
        KeyGenerator,
        Encryptor,
        Decryptor,
        Evaluator,
    );

    fn create_bfv_suite(degree: usize, plain_bits: usize, q_bits: Vec<usize>, expand: bool) -> BfvSuite {
        // Sample t together with the q primes so all of them are distinct.
        let mut all_bits = q_bits.clone();
        all_bits.push(plain_bits);
        let all_moduli = CoeffModulus::create(degree, all_bits);
        let parms = EncryptionParameters::new(SchemeType::Bfv)
            .set_poly_modulus_degree(degree)
            .set_plain_modulus(&all_moduli[q_bits.len()])
            .set_coeff_modulus(&all_moduli[..q_bits.len()]);
        build_bfv(parms, expand)
    }

    fn create_bfv_suite_with_plain_modulus(
        degree: usize,
        plain_modulus: u64,
        q_bits: Vec<usize>,
        expand: bool,
    ) -> BfvSuite {
        let parms = EncryptionParameters::new(SchemeType::Bfv)
            .set_poly_modulus_degree(degree)
            .set_plain_modulus_u64(plain_modulus)
            .set_coeff_modulus(&CoeffModulus::create(degree, q_bits));
        build_bfv(parms, expand)
    }

    fn build_bfv(parms: EncryptionParameters, expand: bool) -> BfvSuite {
        let context = Context::new(parms, expand, SecurityLevel::None);
        let keygen = KeyGenerator::new(context.clone());
        let encryptor = Encryptor::new(context.clone()).set_public_key(keygen.create_public_key());
        let decryptor = Decryptor::new(context.clone(), keygen.secret_key().clone());
        let evaluator = Evaluator::new(context.clone());
        let encoder = BatchEncoder::new(context.clone());
        (context, encoder, keygen, encryptor, decryptor, evaluator)
    }

    type CkksSuite = (
        Arc<Context>,
        CkksEncoder,
        KeyGenerator,
        Encryptor,
        Decryptor,
        Evaluator,
    );

    fn create_ckks_suite(degree: usize, q_bits: Vec<usize>, expand: bool) -> CkksSuite {
        let parms = EncryptionParameters::new(SchemeType::Ckks)
            .set_poly_modulus_degree(degree)
            .set_coeff_modulus(&CoeffModulus::create(degree, q_bits));
        let context = Context::new(parms, expand, SecurityLevel::None);
        let keygen = KeyGenerator::new(context.clone());
        let encryptor = Encryptor::new(context.clone()).set_public_key(keygen.create_public_key());
        let decryptor = Decryptor::new(context.clone(), keygen.secret_key().clone());
        let evaluator = Evaluator::new(context.clone());
        let encoder = CkksEncoder::new(context.clone());
        (context, encoder, keygen, encryptor, decryptor, evaluator)
    }

    fn random_u64_vector(encoder: &BatchEncoder) -> Vec<u64> {
        let mut rng = rand::thread_rng();
        let modulus = encoder.plain_modulus_value();
        (0..encoder.slot_count())
            .map(|_| rng.gen::<u64>() % modulus)
            .collect()
    }

    fn random_c64_vector(encoder: &CkksEncoder) -> Vec<Complex<f64>> {
        let mut rng = rand::thread_rng();
        (0..encoder.slot_count())
            .map(|_| {
                Complex::new(
                    (rng.gen::<f64>() - 0.5) * 32.0,
                    (rng.gen::<f64>() - 0.5) * 32.0,
                )
            })
            .collect()
    }

    fn assert_c64_close(expected: &[Complex<f64>], actual: &[Complex<f64>], tolerance: f64) {
        for (e, a) in expected.iter().zip(actual.iter()) {
            assert!(
                (e - a).norm() < tolerance,
                "expected {e}, got {a} (tolerance {tolerance})"
            );
        }
    }

    fn rotate_rows_reference(values: &[u64], steps: isize) -> Vec<u64> {
        let row = values.len() / 2;
        let steps = steps.rem_euclid(row as isize) as usize;
        let mut result = vec![0; values.len()];
        for i in 0..row {
            result[i] = values[(i + steps) % row];
            result[i + row] = values[(i + steps) % row + row];
        }
        result
    }

    #[test]
    fn test_bfv_additive_arithmetic() {
        let (_context, encoder, _keygen, encryptor, decryptor, evaluator) =
            create_bfv_suite(32, 30, vec![40, 40, 40], false);
        let t = encoder.plain_modulus_value();

        let message1 = random_u64_vector(&encoder);
        let message2 = random_u64_vector(&encoder);
        let encrypted1 = encryptor.encrypt_new(&encoder.encode_new(&message1));
        let encrypted2 = encryptor.encrypt_new(&encoder.encode_new(&message2));

        let negated = evaluator.negate_new(&encrypted1);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&negated));
        let expected: Vec<u64> = message1.iter().map(|&x| (t - x) % t).collect();
        assert_eq!(decoded, expected);

        let sum = evaluator.add_new(&encrypted1, &encrypted2);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&sum));
        let expected: Vec<u64> = message1
            .iter()
            .zip(message2.iter())
            .map(|(&x, &y)| (x + y) % t)
            .collect();
        assert_eq!(decoded, expected);

        let difference = evaluator.sub_new(&encrypted1, &encrypted2);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&difference));
        let expected: Vec<u64> = message1
            .iter()
            .zip(message2.iter())
            .map(|(&x, &y)| (t + x - y) % t)
            .collect();
        assert_eq!(decoded, expected);

        // Seeded fold over several ciphertexts.
        let messages: Vec<Vec<u64>> = (0..5).map(|_| random_u64_vector(&encoder)).collect();
        let ciphertexts: Vec<Ciphertext> = messages
            .iter()
            .map(|m| encryptor.encrypt_new(&encoder.encode_new(m)))
            .collect();
        let total = evaluator.add_many_new(&ciphertexts);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&total));
        let expected: Vec<u64> = (0..encoder.slot_count())
            .map(|i| messages.iter().map(|m| m[i]).sum::<u64>() % t)
            .collect();
        assert_eq!(decoded, expected);

        // Plain operand variants touch only c_0.
        let plain2 = encoder.encode_new(&message2);
        let sum = evaluator.add_plain_new(&encrypted1, &plain2);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&sum));
        let expected: Vec<u64> = message1
            .iter()
            .zip(message2.iter())
            .map(|(&x, &y)| (x + y) % t)
            .collect();
        assert_eq!(decoded, expected);

        let difference = evaluator.sub_plain_new(&encrypted1, &plain2);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&difference));
        let expected: Vec<u64> = message1
            .iter()
            .zip(message2.iter())
            .map(|(&x, &y)| (t + x - y) % t)
            .collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_bfv_multiply_and_square() {
        let (_context, encoder, _keygen, encryptor, decryptor, evaluator) =
            create_bfv_suite(32, 20, vec![60, 60, 60], false);
        let t = encoder.plain_modulus_value();

        let message1 = random_u64_vector(&encoder);
        let message2 = random_u64_vector(&encoder);
        let encrypted1 = encryptor.encrypt_new(&encoder.encode_new(&message1));
        let encrypted2 = encryptor.encrypt_new(&encoder.encode_new(&message2));

        let product = evaluator.multiply_new(&encrypted1, &encrypted2);
        assert_eq!(product.size(), encrypted1.size() + encrypted2.size() - 1);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&product));
        let expected: Vec<u64> = message1
            .iter()
            .zip(message2.iter())
            .map(|(&x, &y)| (x as u128 * y as u128 % t as u128) as u64)
            .collect();
        assert_eq!(decoded, expected);

        let squared = evaluator.square_new(&encrypted1);
        assert_eq!(squared.size(), 3);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&squared));
        let expected: Vec<u64> = message1
            .iter()
            .map(|&x| (x as u128 * x as u128 % t as u128) as u64)
            .collect();
        assert_eq!(decoded, expected);

        // Squaring an already-grown ciphertext falls back to general
        // multiplication.
        let fourth = evaluator.square_new(&squared);
        assert_eq!(fourth.size(), 5);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&fourth));
        let expected: Vec<u64> = message1
            .iter()
            .map(|&x| {
                let sq = x as u128 * x as u128 % t as u128;
                (sq * sq % t as u128) as u64
            })
            .collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_bfv_multiply_plain() {
        let (_context, encoder, _keygen, encryptor, decryptor, evaluator) =
            create_bfv_suite(32, 20, vec![60, 60, 60], false);
        let t = encoder.plain_modulus_value();

        let message1 = random_u64_vector(&encoder);
        let message2 = random_u64_vector(&encoder);
        let encrypted1 = encryptor.encrypt_new(&encoder.encode_new(&message1));

        let product = evaluator.multiply_plain_new(&encrypted1, &encoder.encode_new(&message2));
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&product));
        let expected: Vec<u64> = message1
            .iter()
            .zip(message2.iter())
            .map(|(&x, &y)| (x as u128 * y as u128 % t as u128) as u64)
            .collect();
        assert_eq!(decoded, expected);

        // A constant vector encodes to a monomial and takes the fast path,
        // including a constant in the upper half of the plain modulus.
        for constant in [3u64, t - 2] {
            let constant_vector = vec![constant; encoder.slot_count()];
            let product =
                evaluator.multiply_plain_new(&encrypted1, &encoder.encode_new(&constant_vector));
            let decoded = encoder.decode_new(&decryptor.decrypt_new(&product));
            let expected: Vec<u64> = message1
                .iter()
                .map(|&x| (x as u128 * constant as u128 % t as u128) as u64)
                .collect();
            assert_eq!(decoded, expected);
        }

        // NTT-domain plain multiplication.
        let mut encrypted_ntt = encrypted1.clone();
        evaluator.transform_to_ntt_inplace(&mut encrypted_ntt);
        let plain_ntt =
            evaluator.transform_plain_to_ntt_new(&encoder.encode_new(&message2), encrypted_ntt.parms_id());
        let mut product = evaluator.multiply_plain_new(&encrypted_ntt, &plain_ntt);
        evaluator.transform_from_ntt_inplace(&mut product);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&product));
        let expected: Vec<u64> = message1
            .iter()
            .zip(message2.iter())
            .map(|(&x, &y)| (x as u128 * y as u128 % t as u128) as u64)
            .collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_bfv_relinearize_and_mod_switch() {
        let (context, encoder, keygen, encryptor, decryptor, evaluator) =
            create_bfv_suite(32, 20, vec![60, 60, 60], true);
        let t = encoder.plain_modulus_value();
        let relin_keys = keygen.create_relin_keys();

        let message1 = random_u64_vector(&encoder);
        let message2 = random_u64_vector(&encoder);
        let encrypted1 = encryptor.encrypt_new(&encoder.encode_new(&message1));
        let encrypted2 = encryptor.encrypt_new(&encoder.encode_new(&message2));

        let mut product = evaluator.multiply_new(&encrypted1, &encrypted2);
        assert_eq!(product.size(), 3);
        evaluator.relinearize_inplace(&mut product, &relin_keys);
        assert_eq!(product.size(), 2);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&product));
        let expected: Vec<u64> = message1
            .iter()
            .zip(message2.iter())
            .map(|(&x, &y)| (x as u128 * y as u128 % t as u128) as u64)
            .collect();
        assert_eq!(decoded, expected);

        // Modulus switching preserves the plaintext and walks the chain down.
        let mut switched = product.clone();
        let chain_before = context
            .context_data(switched.parms_id())
            .unwrap()
            .chain_index();
        evaluator.mod_switch_to_next_inplace(&mut switched);
        let chain_after = context
            .context_data(switched.parms_id())
            .unwrap()
            .chain_index();
        assert!(chain_after < chain_before);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&switched));
        assert_eq!(decoded, expected);

        evaluator.mod_switch_to_inplace(&mut switched, context.last_parms_id());
        assert_eq!(switched.parms_id(), context.last_parms_id());
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&switched));
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_bfv_multiply_many_and_exponentiate() {
        let (_context, encoder, keygen, encryptor, decryptor, evaluator) =
            create_bfv_suite(128, 20, vec![60, 60, 60], true);
        let relin_keys = keygen.create_relin_keys();

        let factors = [2u64, 3, 4, 5];
        let ciphertexts: Vec<Ciphertext> = factors
            .iter()
            .map(|&f| encryptor.encrypt_new(&encoder.encode_new(&vec![f; encoder.slot_count()])))
            .collect();
        let product = evaluator.multiply_many_new(&ciphertexts, &relin_keys);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&product));
        assert!(decoded.iter().all(|&x| x == 120));

        // A single operand passes through unchanged.
        let single = evaluator.multiply_many_new(&ciphertexts[..1], &relin_keys);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&single));
        assert!(decoded.iter().all(|&x| x == 2));

        let mut power = encryptor.encrypt_new(&encoder.encode_new(&vec![3; encoder.slot_count()]));
        evaluator.exponentiate_inplace(&mut power, 4, &relin_keys);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&power));
        assert!(decoded.iter().all(|&x| x == 81));

        // Exponent one is a no-op.
        let mut identity = encryptor.encrypt_new(&encoder.encode_new(&vec![7; encoder.slot_count()]));
        let before = identity.data().to_vec();
        evaluator.exponentiate_inplace(&mut identity, 1, &relin_keys);
        assert_eq!(identity.data(), &before[..]);
    }

    #[test]
    fn test_bfv_rotations() {
        let (_context, encoder, keygen, encryptor, decryptor, evaluator) =
            create_bfv_suite(32, 20, vec![60, 60, 60], true);
        let galois_keys = keygen.create_galois_keys();

        let message = random_u64_vector(&encoder);
        let encrypted = encryptor.encrypt_new(&encoder.encode_new(&message));

        let rotated = evaluator.rotate_rows_new(&encrypted, 1, &galois_keys);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&rotated));
        assert_eq!(decoded, rotate_rows_reference(&message, 1));

        // 11 has no direct key in the default set and goes through the
        // signed-binary decomposition.
        let rotated = evaluator.rotate_rows_new(&encrypted, 11, &galois_keys);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&rotated));
        assert_eq!(decoded, rotate_rows_reference(&message, 11));

        let rotated = evaluator.rotate_rows_new(&encrypted, -2, &galois_keys);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&rotated));
        assert_eq!(decoded, rotate_rows_reference(&message, -2));

        let swapped = evaluator.rotate_columns_new(&encrypted, &galois_keys);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&swapped));
        let row = message.len() / 2;
        let mut expected = message[row..].to_vec();
        expected.extend_from_slice(&message[..row]);
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_galois_round_trip() {
        let (_context, encoder, keygen, encryptor, decryptor, evaluator) =
            create_bfv_suite(32, 20, vec![60, 60, 60], true);
        let galois_elt = 3;
        let m = 2 * 32;
        let inverse_elt = numth::try_invert_mod_u64(galois_elt as u64, m as u64).unwrap() as usize;
        let galois_keys = keygen.create_galois_keys_from_elts(&[galois_elt, inverse_elt]);

        let message = random_u64_vector(&encoder);
        let encrypted = encryptor.encrypt_new(&encoder.encode_new(&message));
        let transformed = evaluator.apply_galois_new(&encrypted, galois_elt, &galois_keys);
        let restored = evaluator.apply_galois_new(&transformed, inverse_elt, &galois_keys);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&restored));
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_ntt_transform_round_trip() {
        let (_context, encoder, _keygen, encryptor, decryptor, evaluator) =
            create_bfv_suite(32, 20, vec![60, 60], false);
        let message = random_u64_vector(&encoder);
        let encrypted = encryptor.encrypt_new(&encoder.encode_new(&message));

        let mut transformed = encrypted.clone();
        evaluator.transform_to_ntt_inplace(&mut transformed);
        assert!(transformed.is_ntt_form());
        evaluator.transform_from_ntt_inplace(&mut transformed);
        assert!(!transformed.is_ntt_form());
        // Bit-exact round trip.
        assert_eq!(transformed.data(), encrypted.data());

        // NTT-domain addition still decrypts correctly.
        let message2 = random_u64_vector(&encoder);
        let encrypted2 = encryptor.encrypt_new(&encoder.encode_new(&message2));
        let mut lhs = evaluator.transform_to_ntt_new(&encrypted);
        let rhs = evaluator.transform_to_ntt_new(&encrypted2);
        evaluator.add_inplace(&mut lhs, &rhs);
        evaluator.transform_from_ntt_inplace(&mut lhs);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&lhs));
        let t = encoder.plain_modulus_value();
        let expected: Vec<u64> = message
            .iter()
            .zip(message2.iter())
            .map(|(&x, &y)| (x + y) % t)
            .collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_ckks_arithmetic() {
        let (_context, encoder, _keygen, encryptor, decryptor, evaluator) =
            create_ckks_suite(64, vec![40, 40, 40], false);
        let scale = (1u64 << 30) as f64;

        let message1 = random_c64_vector(&encoder);
        let message2 = random_c64_vector(&encoder);
        let encrypted1 = encryptor.encrypt_new(&encoder.encode_new(&message1, None, scale));
        let encrypted2 = encryptor.encrypt_new(&encoder.encode_new(&message2, None, scale));

        let negated = evaluator.negate_new(&encrypted1);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&negated));
        let expected: Vec<Complex<f64>> = message1.iter().map(|x| -x).collect();
        assert_c64_close(&expected, &decoded, 1e-2);

        let sum = evaluator.add_new(&encrypted1, &encrypted2);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&sum));
        let expected: Vec<Complex<f64>> = message1
            .iter()
            .zip(message2.iter())
            .map(|(x, y)| x + y)
            .collect();
        assert_c64_close(&expected, &decoded, 1e-2);

        let difference = evaluator.sub_new(&encrypted1, &encrypted2);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&difference));
        let expected: Vec<Complex<f64>> = message1
            .iter()
            .zip(message2.iter())
            .map(|(x, y)| x - y)
            .collect();
        assert_c64_close(&expected, &decoded, 1e-2);

        let product = evaluator.multiply_new(&encrypted1, &encrypted2);
        assert_eq!(product.size(), 3);
        assert!(math::are_close_f64(product.scale(), scale * scale));
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&product));
        let expected: Vec<Complex<f64>> = message1
            .iter()
            .zip(message2.iter())
            .map(|(x, y)| x * y)
            .collect();
        assert_c64_close(&expected, &decoded, 1e-1);

        let squared = evaluator.square_new(&encrypted1);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&squared));
        let expected: Vec<Complex<f64>> = message1.iter().map(|x| x * x).collect();
        assert_c64_close(&expected, &decoded, 1e-1);

        let plain2 = encoder.encode_new(&message2, None, scale);
        let sum = evaluator.add_plain_new(&encrypted1, &plain2);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&sum));
        let expected: Vec<Complex<f64>> = message1
            .iter()
            .zip(message2.iter())
            .map(|(x, y)| x + y)
            .collect();
        assert_c64_close(&expected, &decoded, 1e-2);

        let product = evaluator.multiply_plain_new(&encrypted1, &plain2);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&product));
        let expected: Vec<Complex<f64>> = message1
            .iter()
            .zip(message2.iter())
            .map(|(x, y)| x * y)
            .collect();
        assert_c64_close(&expected, &decoded, 1e-1);
    }

    #[test]
    fn test_ckks_relinearize_rescale_rotate() {
        let (context, encoder, keygen, encryptor, decryptor, evaluator) =
            create_ckks_suite(64, vec![40, 40, 40, 40], true);
        let relin_keys = keygen.create_relin_keys();
        let galois_keys = keygen.create_galois_keys();
        let scale = (1u64 << 40) as f64;

        let message = random_c64_vector(&encoder);
        let encrypted = encryptor.encrypt_new(&encoder.encode_new(&message, None, scale));

        // Multiply, relinearize, rescale: scale returns near the original and
        // the chain moves down one level.
        let mut squared = evaluator.square_new(&encrypted);
        evaluator.relinearize_inplace(&mut squared, &relin_keys);
        assert_eq!(squared.size(), 2);
        let chain_before = context
            .context_data(squared.parms_id())
            .unwrap()
            .chain_index();
        evaluator.rescale_to_next_inplace(&mut squared);
        let chain_after = context
            .context_data(squared.parms_id())
            .unwrap()
            .chain_index();
        assert_eq!(chain_after + 1, chain_before);
        assert!(squared.scale() < scale * 2.0 && squared.scale() > scale / 2.0);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&squared));
        let expected: Vec<Complex<f64>> = message.iter().map(|x| x * x).collect();
        assert_c64_close(&expected, &decoded, 1e-1);

        // Plain modulus switching follows the ciphertext down.
        let mut plain = encoder.encode_new(&message, None, scale);
        evaluator.mod_switch_plain_to_inplace(&mut plain, squared.parms_id());
        assert_eq!(plain.parms_id(), squared.parms_id());

        let rotated = evaluator.rotate_vector_new(&encrypted, 1, &galois_keys);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&rotated));
        let mut expected = message.clone();
        expected.rotate_left(1);
        assert_c64_close(&expected, &decoded, 1e-2);

        let rotated = evaluator.rotate_vector_new(&encrypted, 11, &galois_keys);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&rotated));
        let mut expected = message.clone();
        expected.rotate_left(11);
        assert_c64_close(&expected, &decoded, 1e-2);

        let conjugated = evaluator.complex_conjugate_new(&encrypted, &galois_keys);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&conjugated));
        let expected: Vec<Complex<f64>> = message.iter().map(|x| x.conj()).collect();
        assert_c64_close(&expected, &decoded, 1e-2);
    }

    #[test]
    fn test_ckks_mod_switch_drop_keeps_scale() {
        let (_context, encoder, _keygen, encryptor, decryptor, evaluator) =
            create_ckks_suite(64, vec![40, 40, 40, 40], true);
        let scale = (1u64 << 30) as f64;
        let message = random_c64_vector(&encoder);
        let encrypted = encryptor.encrypt_new(&encoder.encode_new(&message, None, scale));

        let switched = evaluator.mod_switch_to_next_new(&encrypted);
        assert!(math::are_close_f64(switched.scale(), scale));
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&switched));
        assert_c64_close(&message, &decoded, 1e-2);
    }

    #[test]
    fn test_bfv_encrypted_arithmetic_production_degree() {
        let (_context, encoder, keygen, encryptor, decryptor, evaluator) =
            create_bfv_suite_with_plain_modulus(8192, 1032193, vec![60, 60, 60, 60, 60], true);
        let relin_keys = keygen.create_relin_keys();
        let slots = encoder.slot_count();

        // 7 + 3 = 10.
        let encrypted_x = encryptor.encrypt_new(&encoder.encode_new(&vec![7; slots]));
        let encrypted_y = encryptor.encrypt_new(&encoder.encode_new(&vec![3; slots]));
        let sum = evaluator.add_new(&encrypted_x, &encrypted_y);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&sum));
        assert!(decoded.iter().all(|&v| v == 10));

        // 6 * 5 = 30 with the size law and relinearization back to 2.
        let encrypted_x = encryptor.encrypt_new(&encoder.encode_new(&vec![6; slots]));
        let encrypted_y = encryptor.encrypt_new(&encoder.encode_new(&vec![5; slots]));
        let mut product = evaluator.multiply_new(&encrypted_x, &encrypted_y);
        assert_eq!(product.size(), 3);
        evaluator.relinearize_inplace(&mut product, &relin_keys);
        assert_eq!(product.size(), 2);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&product));
        assert!(decoded.iter().all(|&v| v == 30));

        // 2^10 = 1024.
        let mut power = encryptor.encrypt_new(&encoder.encode_new(&vec![2; slots]));
        evaluator.exponentiate_inplace(&mut power, 10, &relin_keys);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&power));
        assert!(decoded.iter().all(|&v| v == 1024));

        // Row rotation by 1, and by 3 via the signed-binary fallback when
        // only keys for 1, 2, 4 and -1 exist.
        let galois_keys = keygen.create_galois_keys_from_steps(&[1, 2, 4, -1]);
        let message: Vec<u64> = (1..=slots as u64).collect();
        let encrypted = encryptor.encrypt_new(&encoder.encode_new(&message));
        let rotated = evaluator.rotate_rows_new(&encrypted, 1, &galois_keys);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&rotated));
        assert_eq!(decoded, rotate_rows_reference(&message, 1));

        let rotated = evaluator.rotate_rows_new(&encrypted, 3, &galois_keys);
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&rotated));
        assert_eq!(decoded, rotate_rows_reference(&message, 3));
    }

    #[test]
    fn test_ckks_multiply_rescale_production_degree() {
        let (_context, encoder, keygen, encryptor, decryptor, evaluator) =
            create_ckks_suite(8192, vec![60, 40, 40, 60], true);
        let relin_keys = keygen.create_relin_keys();
        let scale = (1u64 << 40) as f64;

        let mut message = vec![Complex::new(0.0, 0.0); encoder.slot_count()];
        message[0] = Complex::new(1.5, 0.0);
        message[1] = Complex::new(-2.5, 0.0);
        message[2] = Complex::new(0.25, 0.0);

        let encrypted = encryptor.encrypt_new(&encoder.encode_new(&message, None, scale));
        let mut squared = evaluator.multiply_new(&encrypted, &encrypted);
        evaluator.relinearize_inplace(&mut squared, &relin_keys);
        evaluator.rescale_to_next_inplace(&mut squared);

        let decoded = encoder.decode_new(&decryptor.decrypt_new(&squared));
        let expected: Vec<Complex<f64>> = message.iter().map(|x| x * x).collect();
        assert_c64_close(&expected, &decoded, 1e-3);
    }

    #[test]
    #[should_panic(expected = "Operand list cannot be empty")]
    fn test_add_many_rejects_empty_input() {
        let (_context, _encoder, _keygen, _encryptor, _decryptor, evaluator) =
            create_bfv_suite(32, 30, vec![40, 40], false);
        let mut destination = Ciphertext::new();
        evaluator.add_many(&[], &mut destination);
    }

    #[test]
    #[should_panic(expected = "Exponent cannot be zero")]
    fn test_exponentiate_rejects_zero() {
        let (_context, encoder, keygen, encryptor, _decryptor, evaluator) =
            create_bfv_suite(32, 30, vec![40, 40, 40], true);
        let relin_keys = keygen.create_relin_keys();
        let mut encrypted = encryptor.encrypt_new(&encoder.encode_new(&[1, 2, 3]));
        evaluator.exponentiate_inplace(&mut encrypted, 0, &relin_keys);
    }

    #[test]
    #[should_panic(expected = "End of modulus switching chain")]
    fn test_mod_switch_rejects_leaf_level() {
        let (context, encoder, _keygen, encryptor, _decryptor, evaluator) =
            create_bfv_suite(32, 30, vec![40, 40, 40], true);
        let mut encrypted = encryptor.encrypt_new(&encoder.encode_new(&[1, 2, 3]));
        evaluator.mod_switch_to_inplace(&mut encrypted, context.last_parms_id());
        evaluator.mod_switch_to_next_inplace(&mut encrypted);
    }

    #[test]
    #[should_panic(expected = "higher chain level")]
    fn test_mod_switch_rejects_upward_walk() {
        let (context, encoder, _keygen, encryptor, _decryptor, evaluator) =
            create_bfv_suite(32, 30, vec![40, 40, 40], true);
        let mut encrypted = encryptor.encrypt_new(&encoder.encode_new(&[1, 2, 3]));
        let first = *encrypted.parms_id();
        evaluator.mod_switch_to_inplace(&mut encrypted, context.last_parms_id());
        evaluator.mod_switch_to_inplace(&mut encrypted, &first);
    }

    #[test]
    #[should_panic(expected = "Rescaling is only supported")]
    fn test_rescale_rejects_bfv() {
        let (_context, encoder, _keygen, encryptor, _decryptor, evaluator) =
            create_bfv_suite(32, 30, vec![40, 40, 40], true);
        let mut encrypted = encryptor.encrypt_new(&encoder.encode_new(&[1, 2, 3]));
        evaluator.rescale_to_next_inplace(&mut encrypted);
    }

    #[test]
    #[should_panic(expected = "Galois element is not valid")]
    fn test_apply_galois_rejects_even_element() {
        let (_context, encoder, keygen, encryptor, _decryptor, evaluator) =
            create_bfv_suite(32, 30, vec![40, 40, 40], true);
        let galois_keys = keygen.create_galois_keys();
        let mut encrypted = encryptor.encrypt_new(&encoder.encode_new(&[1, 2, 3]));
        evaluator.apply_galois_inplace(&mut encrypted, 4, &galois_keys);
    }

    #[test]
    #[should_panic(expected = "size must be 2")]
    fn test_apply_galois_rejects_large_ciphertext() {
        let (_context, encoder, keygen, encryptor, _decryptor, evaluator) =
            create_bfv_suite(32, 30, vec![40, 40, 40], true);
        let galois_keys = keygen.create_galois_keys();
        let encrypted = encryptor.encrypt_new(&encoder.encode_new(&[1, 2, 3]));
        let mut product = evaluator.multiply_new(&encrypted, &encrypted);
        evaluator.apply_galois_inplace(&mut product, 3, &galois_keys);
    }

    #[test]
    #[should_panic(expected = "already in NTT form")]
    fn test_double_ntt_transform_rejected() {
        let (_context, encoder, _keygen, encryptor, _decryptor, evaluator) =
            create_bfv_suite(32, 30, vec![40, 40], false);
        let mut encrypted = encryptor.encrypt_new(&encoder.encode_new(&[1, 2, 3]));
        evaluator.transform_to_ntt_inplace(&mut encrypted);
        evaluator.transform_to_ntt_inplace(&mut encrypted);
    }

    #[test]
    #[should_panic(expected = "Scale out of bounds")]
    fn test_ckks_scale_overflow_rejected() {
        let (_context, encoder, _keygen, encryptor, _decryptor, evaluator) =
            create_ckks_suite(64, vec![30, 30, 30], false);
        let scale = (1u64 << 40) as f64;
        let message = random_c64_vector(&encoder);
        let mut encrypted = encryptor.encrypt_new(&encoder.encode_new(&message, None, scale));
        // The squared scale of 2^80 exceeds the 60-bit working modulus.
        evaluator.square_inplace(&mut encrypted);
    }

    #[cfg(not(feature = "throw-on-transparent-ciphertext"))]
    #[test]
    fn test_subtracting_ciphertext_from_itself_is_transparent_zero() {
        let (_context, encoder, _keygen, encryptor, decryptor, evaluator) =
            create_bfv_suite(32, 20, vec![60, 60], false);
        let encrypted = encryptor.encrypt_new(&encoder.encode_new(&[5, 6, 7]));
        let difference = evaluator.sub_new(&encrypted, &encrypted);
        assert!(difference.is_transparent());
        let decoded = encoder.decode_new(&decryptor.decrypt_new(&difference));
        assert!(decoded.iter().all(|&x| x == 0));
    }

    #[cfg(feature = "throw-on-transparent-ciphertext")]
    #[test]
    #[should_panic(expected = "transparent")]
    fn test_subtracting_ciphertext_from_itself_panics() {
        let (_context, encoder, _keygen, encryptor, _decryptor, evaluator) =
            create_bfv_suite(32, 30, vec![40, 40], false);
        let encrypted = encryptor.encrypt_new(&encoder.encode_new(&[5, 6, 7]));
        let _ = evaluator.sub_new(&encrypted, &encrypted);
    }
}
