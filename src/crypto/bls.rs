//! BLS12-381 signing over the Eth2 ciphersuite.

use blst::min_pk::{PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use super::CryptoError;

/// Domain separation tag for BLS signatures (Ethereum 2.0 compatible).
const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// BLS key pair for signing operations.
pub struct BlsKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl BlsKeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let mut ikm = [0u8; 32];
        OsRng.fill_bytes(&mut ikm);
        let secret = SecretKey::key_gen(&ikm, &[]).expect("32 bytes of IKM");
        let public = secret.sk_to_pk();
        ikm.zeroize();
        Self { secret, public }
    }

    /// Create from an existing 32-byte secret key.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_bytes(bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        let public = secret.sk_to_pk();
        Ok(Self { secret, public })
    }

    /// Compressed public key (48 bytes).
    pub fn public_key_bytes(&self) -> [u8; 48] {
        self.public.compress()
    }

    /// Secret key bytes. Only used when writing encrypted keystores.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Sign a message, returning the 96-byte compressed signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 96] {
        self.secret.sign(message, DST, &[]).compress()
    }

    /// Verify a signature produced by [`BlsKeyPair::sign`].
    pub fn verify(public_key: &[u8; 48], message: &[u8], signature: &[u8; 96]) -> bool {
        let Ok(public) = PublicKey::uncompress(public_key) else {
            return false;
        };
        let Ok(signature) = Signature::uncompress(signature) else {
            return false;
        };
        signature.verify(true, message, DST, &[], &public, true) == BLST_ERROR::BLST_SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let pair = BlsKeyPair::generate();
        let signature = pair.sign(b"message");
        assert!(BlsKeyPair::verify(
            &pair.public_key_bytes(),
            b"message",
            &signature
        ));
        assert!(!BlsKeyPair::verify(
            &pair.public_key_bytes(),
            b"other",
            &signature
        ));
    }

    #[test]
    fn secret_bytes_roundtrip() {
        let pair = BlsKeyPair::generate();
        let restored = BlsKeyPair::from_secret_bytes(&pair.secret_key_bytes()).unwrap();
        assert_eq!(restored.public_key_bytes(), pair.public_key_bytes());
    }

    #[test]
    fn rejects_invalid_secret() {
        assert!(BlsKeyPair::from_secret_bytes(&[0u8; 32]).is_err());
        assert!(BlsKeyPair::from_secret_bytes(&[1u8; 16]).is_err());
    }
}
