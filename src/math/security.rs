//! Largest allowed total coefficient modulus bit counts per the
//! HomomorphicEncryption.org security standard, for ternary secrets.

/// Standard deviation of the RLWE error distribution.
pub const ERROR_STD_DEV: f64 = 3.2;

/// Ternary secret, 128-bit classical security.
pub fn max_bits_128_classical(poly_modulus_degree: usize) -> usize {
    match poly_modulus_degree {
        1024 => 27,
        2048 => 54,
        4096 => 109,
        8192 => 218,
        16384 => 438,
        32768 => 881,
        _ => 0,
    }
}

/// Ternary secret, 192-bit classical security.
pub fn max_bits_192_classical(poly_modulus_degree: usize) -> usize {
    match poly_modulus_degree {
        1024 => 19,
        2048 => 37,
        4096 => 75,
        8192 => 152,
        16384 => 305,
        32768 => 611,
        _ => 0,
    }
}

/// Ternary secret, 256-bit classical security.
pub fn max_bits_256_classical(poly_modulus_degree: usize) -> usize {
    match poly_modulus_degree {
        1024 => 14,
        2048 => 29,
        4096 => 58,
        8192 => 118,
        16384 => 237,
        32768 => 476,
        _ => 0,
    }
}
