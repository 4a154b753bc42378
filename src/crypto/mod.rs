//! Cryptographic primitives for the signing service.
//!
//! - [`bls`] - BLS12-381 signing over the Eth2 ciphersuite
//! - [`ecdsa`] - secp256k1 signing, recovery ids, compact encodings
//! - [`hash`] - Keccak-256 / SHA-256 helpers
//! - [`ssz`] - minimal SSZ merkleization and domain computation
//! - [`keystore`] - encrypted on-disk keystore files

pub mod bls;
pub mod ecdsa;
pub mod hash;
pub mod keystore;
pub mod ssz;

use thiserror::Error;

/// Errors from cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid signature encoding")]
    InvalidSignature,

    #[error("signature verification failed")]
    VerificationFailed,

    #[error("could not derive a recovery id matching the known public key")]
    UnrecoverableSignature,

    #[error("keystore error: {0}")]
    Keystore(String),
}
