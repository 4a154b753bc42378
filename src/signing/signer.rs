//! Artifact signers.
//!
//! A signer is a tagged variant exposing one capability: produce an
//! [`ArtifactSignature`] for a message. The Commit-Boost K256 flavour is a
//! different signature *encoding* over the same curve, so the encoding
//! lives on the artifact, not on a signer subclass.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::crypto::bls::BlsKeyPair;
use crate::crypto::ecdsa::{self, SecpKeyPair};
use crate::crypto::hash::keccak256;
use crate::domain::{normalise_identifier, Hash256, KeyType};
use crate::error::{Result, SignerError};

/// Capability of a remote KMS: report the public key and sign a 32-byte
/// digest, returning a DER- or P1363-encoded ECDSA signature without a
/// recovery id.
#[async_trait]
pub trait RemoteKms: Send + Sync {
    async fn public_key(&self) -> Result<[u8; 33]>;
    async fn sign_digest(&self, digest: &Hash256) -> Result<Vec<u8>>;
}

/// A produced signature, carrying its wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSignature {
    /// 96-byte compressed BLS signature.
    Bls([u8; 96]),
    /// 65-byte `R ‖ S ‖ V` recoverable secp256k1 signature.
    SecpEth1([u8; 65]),
    /// 64-byte canonical `R ‖ S` compact secp256k1 signature.
    K256([u8; 64]),
}

impl ArtifactSignature {
    pub fn key_type(&self) -> KeyType {
        match self {
            ArtifactSignature::Bls(_) => KeyType::Bls,
            ArtifactSignature::SecpEth1(_) | ArtifactSignature::K256(_) => KeyType::Secp256k1,
        }
    }

    /// Lowercase `0x`-prefixed hex encoding.
    pub fn to_hex(&self) -> String {
        match self {
            ArtifactSignature::Bls(bytes) => format!("0x{}", hex::encode(bytes)),
            ArtifactSignature::SecpEth1(bytes) => format!("0x{}", hex::encode(bytes)),
            ArtifactSignature::K256(bytes) => format!("0x{}", hex::encode(bytes)),
        }
    }
}

impl fmt::Display for ArtifactSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A loaded signing key.
pub enum ArtifactSigner {
    BlsLocal(BlsSigner),
    SecpLocal(SecpSigner),
    SecpRemote(RemoteSecpSigner),
    K256(K256Signer),
}

impl ArtifactSigner {
    pub fn bls_local(keypair: BlsKeyPair) -> Self {
        ArtifactSigner::BlsLocal(BlsSigner::new(keypair))
    }

    pub fn secp_local(keypair: SecpKeyPair, apply_sha3: bool, chain_id: Option<u64>) -> Self {
        ArtifactSigner::SecpLocal(SecpSigner::new(keypair, apply_sha3, chain_id))
    }

    pub fn secp_remote(
        public_key: [u8; 33],
        backend: Arc<dyn RemoteKms>,
        apply_sha3: bool,
        chain_id: Option<u64>,
    ) -> Self {
        ArtifactSigner::SecpRemote(RemoteSecpSigner::new(public_key, backend, apply_sha3, chain_id))
    }

    pub fn k256(keypair: SecpKeyPair) -> Self {
        ArtifactSigner::K256(K256Signer::new(keypair))
    }

    /// Normalised public-key identifier.
    pub fn identifier(&self) -> &str {
        match self {
            ArtifactSigner::BlsLocal(signer) => &signer.identifier,
            ArtifactSigner::SecpLocal(signer) => &signer.identifier,
            ArtifactSigner::SecpRemote(signer) => &signer.identifier,
            ArtifactSigner::K256(signer) => &signer.identifier,
        }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            ArtifactSigner::BlsLocal(_) => KeyType::Bls,
            _ => KeyType::Secp256k1,
        }
    }

    /// Ethereum address for execution-layer signers, `None` for BLS.
    pub fn eth_address(&self) -> Option<[u8; 20]> {
        match self {
            ArtifactSigner::BlsLocal(_) => None,
            ArtifactSigner::SecpLocal(signer) => Some(signer.keypair.eth_address()),
            ArtifactSigner::SecpRemote(signer) => Some(signer.eth_address),
            ArtifactSigner::K256(signer) => Some(signer.keypair.eth_address()),
        }
    }

    /// Sign `message`, producing the scheme's wire encoding.
    pub async fn sign(&self, message: &[u8]) -> Result<ArtifactSignature> {
        match self {
            ArtifactSigner::BlsLocal(signer) => Ok(ArtifactSignature::Bls(signer.keypair.sign(message))),
            ArtifactSigner::SecpLocal(signer) => signer.sign(message),
            ArtifactSigner::SecpRemote(signer) => signer.sign(message).await,
            ArtifactSigner::K256(signer) => {
                Ok(ArtifactSignature::K256(signer.keypair.sign_compact_sha256(message)))
            }
        }
    }
}

impl fmt::Debug for ArtifactSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactSigner")
            .field("identifier", &self.identifier())
            .field("key_type", &self.key_type())
            .finish_non_exhaustive()
    }
}

/// Local BLS signer.
pub struct BlsSigner {
    identifier: String,
    keypair: BlsKeyPair,
}

impl BlsSigner {
    fn new(keypair: BlsKeyPair) -> Self {
        let identifier = normalise_identifier(&hex::encode(keypair.public_key_bytes()));
        Self { identifier, keypair }
    }
}

/// Local secp256k1 signer producing eth1 recoverable signatures.
pub struct SecpSigner {
    identifier: String,
    keypair: SecpKeyPair,
    apply_sha3: bool,
    chain_id: Option<u64>,
}

impl SecpSigner {
    fn new(keypair: SecpKeyPair, apply_sha3: bool, chain_id: Option<u64>) -> Self {
        let identifier = normalise_identifier(&hex::encode(keypair.public_key_compressed()));
        Self {
            identifier,
            keypair,
            apply_sha3,
            chain_id,
        }
    }

    fn sign(&self, message: &[u8]) -> Result<ArtifactSignature> {
        let prehash = prehash_for(message, self.apply_sha3)?;
        let encoded = self.keypair.sign_prehash_eth1(&prehash, self.chain_id)?;
        Ok(ArtifactSignature::SecpEth1(encoded))
    }
}

/// secp256k1 signer backed by a remote vault or KMS.
pub struct RemoteSecpSigner {
    identifier: String,
    public_key: [u8; 33],
    eth_address: [u8; 20],
    backend: Arc<dyn RemoteKms>,
    apply_sha3: bool,
    chain_id: Option<u64>,
}

impl RemoteSecpSigner {
    fn new(
        public_key: [u8; 33],
        backend: Arc<dyn RemoteKms>,
        apply_sha3: bool,
        chain_id: Option<u64>,
    ) -> Self {
        let identifier = normalise_identifier(&hex::encode(public_key));
        let eth_address = k256::ecdsa::VerifyingKey::from_sec1_bytes(&public_key)
            .map(|key| ecdsa::eth_address_of(&key))
            .unwrap_or_default();
        Self {
            identifier,
            public_key,
            eth_address,
            backend,
            apply_sha3,
            chain_id,
        }
    }

    async fn sign(&self, message: &[u8]) -> Result<ArtifactSignature> {
        let prehash = prehash_for(message, self.apply_sha3)?;
        let raw = self.backend.sign_digest(&prehash).await?;
        let encoded =
            ecdsa::recoverable_from_backend(&prehash, &raw, &self.public_key, self.chain_id)
                .map_err(|e| SignerError::Internal(format!("backend signature rejected: {e}")))?;
        Ok(ArtifactSignature::SecpEth1(encoded))
    }
}

/// Commit-Boost ECDSA proxy signer (compact encoding).
pub struct K256Signer {
    identifier: String,
    keypair: SecpKeyPair,
}

impl K256Signer {
    fn new(keypair: SecpKeyPair) -> Self {
        let identifier = normalise_identifier(&hex::encode(keypair.public_key_compressed()));
        Self { identifier, keypair }
    }
}

/// Keccak-hash the payload locally, or treat it as a ready-made digest.
fn prehash_for(message: &[u8], apply_sha3: bool) -> Result<Hash256> {
    if apply_sha3 {
        Ok(keccak256(message))
    } else {
        message.try_into().map_err(|_| {
            SignerError::BadRequest("digest payload must be exactly 32 bytes".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::eth_sign_prehash;

    #[tokio::test]
    async fn bls_signer_identifier_is_normalised_pubkey() {
        let keypair = BlsKeyPair::generate();
        let expected = format!("0x{}", hex::encode(keypair.public_key_bytes()));
        let signer = ArtifactSigner::bls_local(keypair);
        assert_eq!(signer.identifier(), expected);
        assert_eq!(signer.key_type(), KeyType::Bls);

        let signature = signer.sign(b"root").await.unwrap();
        assert_eq!(signature.to_hex().len(), 2 + 192);
    }

    #[tokio::test]
    async fn secp_signer_hex_is_65_bytes() {
        let signer = ArtifactSigner::secp_local(SecpKeyPair::generate(), true, None);
        let signature = signer.sign(b"payload").await.unwrap();
        let hex_str = signature.to_hex();
        assert_eq!(hex_str.len(), 2 + 130);
    }

    #[tokio::test]
    async fn secp_digest_mode_requires_32_bytes() {
        let signer = ArtifactSigner::secp_local(SecpKeyPair::generate(), false, None);
        assert!(signer.sign(b"short").await.is_err());
        assert!(signer.sign(&eth_sign_prehash(b"msg")).await.is_ok());
    }

    struct LocalKms {
        keypair: SecpKeyPair,
    }

    #[async_trait]
    impl RemoteKms for LocalKms {
        async fn public_key(&self) -> Result<[u8; 33]> {
            Ok(self.keypair.public_key_compressed())
        }

        async fn sign_digest(&self, digest: &Hash256) -> Result<Vec<u8>> {
            use k256::ecdsa::signature::hazmat::PrehashSigner;
            let key = k256::ecdsa::SigningKey::from_slice(&self.keypair.secret_key_bytes())
                .expect("valid secret");
            let signature: k256::ecdsa::Signature = key.sign_prehash(digest).expect("signable");
            Ok(signature.to_der().as_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn remote_signer_recovers_the_missing_recovery_id() {
        let keypair = SecpKeyPair::generate();
        let public_key = keypair.public_key_compressed();
        let backend = Arc::new(LocalKms { keypair });
        let signer = ArtifactSigner::secp_remote(public_key, backend, true, None);

        let signature = signer.sign(b"payload for the backend").await.unwrap();
        match signature {
            ArtifactSignature::SecpEth1(bytes) => {
                assert!(bytes[64] == 27 || bytes[64] == 28);
            }
            other => panic!("unexpected artifact: {other:?}"),
        }
    }

    #[tokio::test]
    async fn k256_signature_is_compact() {
        let signer = ArtifactSigner::k256(SecpKeyPair::generate());
        let signature = signer.sign(b"delegation message").await.unwrap();
        match signature {
            ArtifactSignature::K256(bytes) => assert_eq!(bytes.len(), 64),
            other => panic!("unexpected artifact: {other:?}"),
        }
    }
}
