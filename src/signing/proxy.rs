//! Commit-Boost proxy keys.
//!
//! A proxy key is a service-generated key authorised to sign on behalf of a
//! consensus key. Generation writes an encrypted keystore under the proxy
//! root before the key is ever used, so a restart finds it again.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use super::signer::ArtifactSigner;
use crate::crypto::bls::BlsKeyPair;
use crate::crypto::ecdsa::SecpKeyPair;
use crate::crypto::keystore::EncryptedKeystore;
use crate::crypto::ssz;
use crate::domain::{Hash256, KeyType};
use crate::error::{Result, SignerError};

/// Commit-Boost domain type, `"Comm"` in little-endian.
pub const COMMIT_BOOST_DOMAIN_TYPE: [u8; 4] = [0x6d, 0x6d, 0x6f, 0x43];

/// Signature scheme requested for a proxy key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProxyScheme {
    Bls,
    Ecdsa,
}

impl ProxyScheme {
    pub fn key_type(&self) -> KeyType {
        match self {
            ProxyScheme::Bls => KeyType::Bls,
            ProxyScheme::Ecdsa => KeyType::Secp256k1,
        }
    }
}

/// Configuration of the Commit-Boost API.
#[derive(Debug, Clone)]
pub struct CommitBoostParameters {
    pub proxy_keystores_path: PathBuf,
    pub proxy_keystores_password_file: PathBuf,
    pub genesis_fork_version: [u8; 4],
}

/// Generates proxy keys and persists their keystores.
pub struct ProxyKeyGenerator {
    parameters: CommitBoostParameters,
    // password file is read once per commit-boost session
    cached_password: Mutex<Option<String>>,
}

impl ProxyKeyGenerator {
    pub fn new(parameters: CommitBoostParameters) -> Self {
        Self {
            parameters,
            cached_password: Mutex::new(None),
        }
    }

    pub fn parameters(&self) -> &CommitBoostParameters {
        &self.parameters
    }

    /// Generate a fresh proxy key for `consensus_identifier`, write its
    /// encrypted keystore, and return the signer.
    pub fn generate(
        &self,
        consensus_identifier: &str,
        scheme: ProxyScheme,
    ) -> Result<ArtifactSigner> {
        let password = self.password()?;
        let (signer, secret) = match scheme {
            ProxyScheme::Bls => {
                let pair = BlsKeyPair::generate();
                let secret = pair.secret_key_bytes().to_vec();
                (ArtifactSigner::bls_local(pair), secret)
            }
            ProxyScheme::Ecdsa => {
                let pair = SecpKeyPair::generate();
                let secret = pair.secret_key_bytes().to_vec();
                (ArtifactSigner::k256(pair), secret)
            }
        };

        let dir = self
            .parameters
            .proxy_keystores_path
            .join(consensus_identifier)
            .join(scheme.key_type().dir_name());
        fs::create_dir_all(&dir)?;

        let keystore = EncryptedKeystore::encrypt(&secret, signer.identifier(), &password)?;
        let path = dir.join(format!("{}.json", signer.identifier()));
        keystore.write_to(&path)?;

        Ok(signer)
    }

    fn password(&self) -> Result<String> {
        let mut cached = self.cached_password.lock();
        if let Some(password) = cached.as_ref() {
            return Ok(password.clone());
        }
        let password = fs::read_to_string(&self.parameters.proxy_keystores_password_file)
            .map_err(|e| {
                SignerError::Internal(format!(
                    "read proxy keystore password file {}: {e}",
                    self.parameters.proxy_keystores_password_file.display()
                ))
            })?
            .trim_end()
            .to_string();
        *cached = Some(password.clone());
        Ok(password)
    }
}

/// Signing root of a proxy delegation message.
///
/// `domain = compute_domain(0x6d6d6f43, genesis_fork_version, gvr)`;
/// the message root is the two-field container of delegator and proxy
/// public keys, each merkleized as a fixed byte vector.
pub fn commit_boost_signing_root(
    delegator_pubkey: &[u8],
    proxy_pubkey: &[u8],
    genesis_fork_version: [u8; 4],
    genesis_validators_root: &Hash256,
) -> Hash256 {
    let message_root = ssz::merkleize(vec![
        ssz::hash_tree_root_bytes(delegator_pubkey),
        ssz::hash_tree_root_bytes(proxy_pubkey),
    ]);
    let domain = ssz::compute_domain(
        COMMIT_BOOST_DOMAIN_TYPE,
        genesis_fork_version,
        genesis_validators_root,
    );
    ssz::compute_signing_root(&message_root, &domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_generator(root: &std::path::Path) -> ProxyKeyGenerator {
        let password_file = root.join("password.txt");
        std::fs::write(&password_file, "proxy-pass\n").unwrap();
        ProxyKeyGenerator::new(CommitBoostParameters {
            proxy_keystores_path: root.join("proxies"),
            proxy_keystores_password_file: password_file,
            genesis_fork_version: [0, 0, 0, 0],
        })
    }

    #[test]
    fn generates_and_persists_bls_proxy() {
        let dir = tempdir().unwrap();
        let generator = test_generator(dir.path());

        let signer = generator.generate("0xaabb", ProxyScheme::Bls).unwrap();
        assert_eq!(signer.key_type(), KeyType::Bls);

        let keystore_path = dir
            .path()
            .join("proxies")
            .join("0xaabb")
            .join("BLS")
            .join(format!("{}.json", signer.identifier()));
        assert!(keystore_path.exists());

        let keystore = EncryptedKeystore::read_from(&keystore_path).unwrap();
        assert_eq!(keystore.public_key, signer.identifier());
        assert!(keystore.decrypt("proxy-pass").is_ok());
    }

    #[test]
    fn ecdsa_proxy_lands_in_secp_directory() {
        let dir = tempdir().unwrap();
        let generator = test_generator(dir.path());

        let signer = generator.generate("0xccdd", ProxyScheme::Ecdsa).unwrap();
        let expected_dir = dir.path().join("proxies").join("0xccdd").join("SECP256K1");
        assert!(expected_dir
            .join(format!("{}.json", signer.identifier()))
            .exists());
    }

    #[test]
    fn signing_root_binds_both_keys() {
        let gvr = [1u8; 32];
        let root_a = commit_boost_signing_root(&[2u8; 48], &[3u8; 48], [0, 0, 0, 0], &gvr);
        let root_b = commit_boost_signing_root(&[2u8; 48], &[4u8; 48], [0, 0, 0, 0], &gvr);
        let root_c = commit_boost_signing_root(&[5u8; 48], &[3u8; 48], [0, 0, 0, 0], &gvr);
        assert_ne!(root_a, root_b);
        assert_ne!(root_a, root_c);
    }
}
