//! secp256k1 signing: recoverable eth_sign encodings, compact Commit-Boost
//! encodings, and recovery-id derivation for backend-produced signatures.

use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use super::CryptoError;
use crate::crypto::hash::keccak256;
use crate::domain::Hash256;

/// secp256k1 key pair.
pub struct SecpKeyPair {
    signing_key: SigningKey,
}

impl SecpKeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Create from a 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// Secret scalar bytes. Only used when writing encrypted keystores.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    /// Compressed SEC1 public key (33 bytes).
    pub fn public_key_compressed(&self) -> [u8; 33] {
        let point = self.signing_key.verifying_key().to_encoded_point(true);
        point.as_bytes().try_into().expect("compressed point is 33 bytes")
    }

    /// Ethereum address: last 20 bytes of keccak256 of the uncompressed
    /// public key without the SEC1 tag byte.
    pub fn eth_address(&self) -> [u8; 20] {
        eth_address_of(self.signing_key.verifying_key())
    }

    /// Sign a 32-byte prehash, returning `R(32) ‖ S(32) ‖ V(1)`.
    ///
    /// `V` is the full header byte: `recId + 27`, or `recId + 27 + 2·chain_id`
    /// when a chain id is configured. `eth_sign` uses the bare offset.
    pub fn sign_prehash_eth1(
        &self,
        prehash: &Hash256,
        chain_id: Option<u64>,
    ) -> Result<[u8; 65], CryptoError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(prehash)
            .map_err(|_| CryptoError::InvalidSignature)?;
        Ok(encode_eth1(&signature, recovery_id, chain_id))
    }

    /// Deterministic ECDSA over the SHA-256 digest of `message`, encoded as
    /// a canonicalised 64-byte `R ‖ S` with no recovery byte.
    pub fn sign_compact_sha256(&self, message: &[u8]) -> [u8; 64] {
        let signature: Signature = self.signing_key.sign(message);
        let signature = signature.normalize_s().unwrap_or(signature);
        signature.to_bytes().into()
    }

    /// Verify a compact signature produced by [`SecpKeyPair::sign_compact_sha256`].
    pub fn verify_compact_sha256(&self, message: &[u8], signature: &[u8; 64]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        self.signing_key
            .verifying_key()
            .verify(message, &signature)
            .is_ok()
    }
}

/// Ethereum address of a verifying key.
pub fn eth_address_of(verifying_key: &VerifyingKey) -> [u8; 20] {
    let uncompressed = verifying_key.to_encoded_point(false);
    let digest = keccak256(&uncompressed.as_bytes()[1..]);
    digest[12..32].try_into().expect("20-byte suffix")
}

/// Lowercase `0x`-prefixed hex form of an Ethereum address.
pub fn eth_address_hex(address: &[u8; 20]) -> String {
    format!("0x{}", hex::encode(address))
}

fn encode_eth1(signature: &Signature, recovery_id: RecoveryId, chain_id: Option<u64>) -> [u8; 65] {
    let header = 27u64 + u64::from(recovery_id.to_byte()) + chain_id.map_or(0, |id| 2 * id);
    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&signature.to_bytes());
    out[64] = header as u8;
    out
}

/// Rebuild a recoverable eth1 signature from a backend-produced ECDSA
/// signature that carries no recovery id.
///
/// Azure Key Vault emits P1363 (`R ‖ S`, 64 bytes); AWS KMS emits ASN.1 DER.
/// The signature may sit in the "top" of the curve, which Ethereum forbids,
/// so it is canonicalised first. The recovery id is then found by trying
/// each candidate and comparing the recovered key to the known public key.
pub fn recoverable_from_backend(
    prehash: &Hash256,
    raw_signature: &[u8],
    public_key_compressed: &[u8; 33],
    chain_id: Option<u64>,
) -> Result<[u8; 65], CryptoError> {
    let signature = parse_backend_signature(raw_signature)?;
    let signature = signature.normalize_s().unwrap_or(signature);

    let expected =
        VerifyingKey::from_sec1_bytes(public_key_compressed).map_err(|_| CryptoError::InvalidPublicKey)?;
    // Backend signatures must verify against the key they claim to come from.
    expected
        .verify_prehash(prehash, &signature)
        .map_err(|_| CryptoError::VerificationFailed)?;

    for candidate in 0u8..4 {
        let Some(recovery_id) = RecoveryId::from_byte(candidate) else {
            continue;
        };
        let Ok(recovered) = VerifyingKey::recover_from_prehash(prehash, &signature, recovery_id)
        else {
            continue;
        };
        if recovered == expected {
            return Ok(encode_eth1(&signature, recovery_id, chain_id));
        }
    }
    Err(CryptoError::UnrecoverableSignature)
}

fn parse_backend_signature(raw: &[u8]) -> Result<Signature, CryptoError> {
    if raw.len() == 64 {
        Signature::from_slice(raw).map_err(|_| CryptoError::InvalidSignature)
    } else {
        Signature::from_der(raw).map_err(|_| CryptoError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::{eth_sign_prehash, sha256};
    use k256::ecdsa::signature::hazmat::PrehashSigner;

    #[test]
    fn eth1_signature_layout() {
        let pair = SecpKeyPair::generate();
        let prehash = eth_sign_prehash(&[0xde, 0xad, 0xbe, 0xaf]);
        let encoded = pair.sign_prehash_eth1(&prehash, None).unwrap();
        let v = encoded[64];
        assert!(v == 27 || v == 28);

        // (r, s) recover back to the signing key
        let signature = Signature::from_slice(&encoded[..64]).unwrap();
        let recovery_id = RecoveryId::from_byte(v - 27).unwrap();
        let recovered =
            VerifyingKey::recover_from_prehash(&prehash, &signature, recovery_id).unwrap();
        assert_eq!(&recovered, pair.signing_key.verifying_key());
    }

    #[test]
    fn chain_id_offsets_header_byte() {
        let pair = SecpKeyPair::generate();
        let prehash = sha256(b"payload");
        let bare = pair.sign_prehash_eth1(&prehash, None).unwrap();
        let offset = pair.sign_prehash_eth1(&prehash, Some(5)).unwrap();
        assert_eq!(u64::from(offset[64]), u64::from(bare[64]) + 10);
    }

    #[test]
    fn compact_signature_is_low_s() {
        let pair = SecpKeyPair::generate();
        let compact = pair.sign_compact_sha256(b"commit boost payload");
        let signature = Signature::from_slice(&compact).unwrap();
        assert!(signature.normalize_s().is_none());
        assert!(pair.verify_compact_sha256(b"commit boost payload", &compact));
    }

    #[test]
    fn recovers_id_from_p1363_backend_signature() {
        let pair = SecpKeyPair::generate();
        let prehash = sha256(b"digest for the backend");
        let signature: Signature = pair.signing_key.sign_prehash(&prehash).unwrap();
        let p1363: [u8; 64] = signature.to_bytes().into();

        let encoded = recoverable_from_backend(
            &prehash,
            &p1363,
            &pair.public_key_compressed(),
            None,
        )
        .unwrap();
        let recovery_id = RecoveryId::from_byte(encoded[64] - 27).unwrap();
        let normalized = Signature::from_slice(&encoded[..64]).unwrap();
        let recovered =
            VerifyingKey::recover_from_prehash(&prehash, &normalized, recovery_id).unwrap();
        assert_eq!(&recovered, pair.signing_key.verifying_key());
    }

    #[test]
    fn recovers_id_from_der_backend_signature() {
        let pair = SecpKeyPair::generate();
        let prehash = sha256(b"der digest");
        let signature: Signature = pair.signing_key.sign_prehash(&prehash).unwrap();
        let der = signature.to_der();

        let encoded = recoverable_from_backend(
            &prehash,
            der.as_bytes(),
            &pair.public_key_compressed(),
            None,
        )
        .unwrap();
        assert!(encoded[64] == 27 || encoded[64] == 28);
    }

    #[test]
    fn rejects_backend_signature_for_wrong_key() {
        let pair = SecpKeyPair::generate();
        let other = SecpKeyPair::generate();
        let prehash = sha256(b"digest");
        let signature: Signature = pair.signing_key.sign_prehash(&prehash).unwrap();
        let p1363: [u8; 64] = signature.to_bytes().into();

        let result =
            recoverable_from_backend(&prehash, &p1363, &other.public_key_compressed(), None);
        assert!(result.is_err());
    }

    #[test]
    fn eth_address_is_deterministic() {
        let pair = SecpKeyPair::generate();
        assert_eq!(pair.eth_address(), pair.eth_address());
        assert_eq!(eth_address_hex(&pair.eth_address()).len(), 42);
    }
}
