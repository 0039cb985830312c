//! Tansy: a Rust implementation of the BFV and CKKS homomorphic encryption
//! schemes, in their full-RNS variants.
//!
//! # Usage
//!
//! - **Parameters and context**: build an [`EncryptionParameters`] value
//!   (scheme, polynomial modulus degree, coefficient modulus chain, and — for
//!   BFV — a plain modulus), then validate it into a [`Context`]. The context
//!   precomputes the modulus switching chain and everything the other tools
//!   need; all tools are constructed from it and are thread-safe.
//! - **Encoding**: [`BatchEncoder`] views BFV plaintexts as vectors of
//!   integers modulo the plain modulus; [`CkksEncoder`] encodes vectors of
//!   complex numbers at a chosen scale.
//! - **Keys and encryption**: [`KeyGenerator`] produces the [`SecretKey`],
//!   [`PublicKey`], [`RelinKeys`] and [`GaloisKeys`]; [`Encryptor`] encrypts
//!   (with either key), [`Decryptor`] decrypts and reports the BFV noise
//!   budget.
//! - **Evaluation**: [`Evaluator`] computes on ciphertexts — addition,
//!   multiplication, relinearization, modulus switching and rescaling,
//!   rotations, NTT transforms.
//!
//! # Example
//!
//! ```
//! use tansy::*;
//!
//! let parms = EncryptionParameters::new(SchemeType::Bfv)
//!     .set_poly_modulus_degree(8192)
//!     .set_coeff_modulus(&CoeffModulus::create(8192, vec![60, 40, 60]))
//!     .set_plain_modulus(&PlainModulus::batching(8192, 20));
//! let context = Context::new(parms, true, SecurityLevel::Tc128);
//!
//! let encoder = BatchEncoder::new(context.clone());
//! let keygen = KeyGenerator::new(context.clone());
//! let encryptor = Encryptor::new(context.clone()).set_public_key(keygen.create_public_key());
//! let decryptor = Decryptor::new(context.clone(), keygen.secret_key().clone());
//! let evaluator = Evaluator::new(context.clone());
//!
//! let x = encryptor.encrypt_new(&encoder.encode_new(&[1, 2, 3, 4]));
//! let y = encryptor.encrypt_new(&encoder.encode_new(&[5, 6, 7, 8]));
//! let sum = evaluator.add_new(&x, &y);
//! let decoded = encoder.decode_new(&decryptor.decrypt_new(&sum));
//! assert_eq!(&decoded[..4], &[6, 8, 10, 12]);
//! ```

pub mod math;

mod ciphertext;
mod context;
mod decryptor;
mod encoder;
mod encryptor;
mod evaluator;
mod keys;
mod modulus;
mod params;
mod plaintext;
mod validity;

pub use ciphertext::Ciphertext;
pub use context::{Context, ContextData};
pub use decryptor::Decryptor;
pub use encoder::{BatchEncoder, CkksEncoder};
pub use encryptor::Encryptor;
pub use evaluator::Evaluator;
pub use keys::{GaloisKeys, KSwitchKeys, KeyGenerator, PublicKey, RelinKeys, SecretKey};
pub use modulus::{CoeffModulus, Modulus, PlainModulus};
pub use params::{
    EncryptionParameterQualifiers, EncryptionParameters, ErrorType, ParmsId, SchemeType,
    SecurityLevel, PARMS_ID_ZERO,
};
pub use plaintext::Plaintext;
pub use validity::Validity;
