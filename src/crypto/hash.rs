//! Digest helpers.

use sha2::{Digest as Sha2Digest, Sha256};
use sha3::{Digest as Sha3Digest, Keccak256};

use crate::domain::Hash256;

/// Keccak-256 digest.
pub fn keccak256(data: &[u8]) -> Hash256 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 over two concatenated 32-byte nodes.
pub fn sha256_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// The `eth_sign` prefixed payload:
/// `"\x19Ethereum Signed Message:\n" + len(message) + message`.
pub fn eth_sign_prefix(message: &[u8]) -> Vec<u8> {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    let mut data = Vec::with_capacity(prefix.len() + message.len());
    data.extend_from_slice(prefix.as_bytes());
    data.extend_from_slice(message);
    data
}

/// Keccak-256 of the `eth_sign` prefixed payload.
pub fn eth_sign_prehash(message: &[u8]) -> Hash256 {
    keccak256(&eth_sign_prefix(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak256_empty_matches_known_vector() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn sha256_empty_matches_known_vector() {
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn eth_sign_prehash_includes_length() {
        // prefix for a 4-byte message is "\x19Ethereum Signed Message:\n4"
        let message = [0xde, 0xad, 0xbe, 0xaf];
        let mut raw = b"\x19Ethereum Signed Message:\n4".to_vec();
        raw.extend_from_slice(&message);
        assert_eq!(eth_sign_prehash(&message), keccak256(&raw));
    }
}
