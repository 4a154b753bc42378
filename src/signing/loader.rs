//! Directory-backed signer loading.
//!
//! Per-key failures are counted and surfaced through the healthcheck, never
//! fatal: a bad metadata file must not take down the keys that do load.

use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::metadata::{SigningMetadata, VaultConnectors};
use super::signer::ArtifactSigner;
use crate::crypto::bls::BlsKeyPair;
use crate::crypto::ecdsa::SecpKeyPair;
use crate::crypto::keystore::EncryptedKeystore;
use crate::domain::KeyType;
use crate::error::{Result, SignerError};

/// Values that loaded, plus the number of entries that did not.
#[derive(Debug)]
pub struct MappedResults<T> {
    pub values: Vec<T>,
    pub error_count: u32,
}

impl<T> MappedResults<T> {
    pub fn empty() -> Self {
        Self {
            values: Vec::new(),
            error_count: 0,
        }
    }

    pub fn errored(count: u32) -> Self {
        Self {
            values: Vec::new(),
            error_count: count,
        }
    }

    pub fn add(&mut self, value: T) {
        self.values.push(value);
    }

    pub fn add_error(&mut self) {
        self.error_count += 1;
    }

    pub fn merge(&mut self, other: MappedResults<T>) {
        self.values.extend(other.values);
        self.error_count += other.error_count;
    }
}

impl<T> Default for MappedResults<T> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Outcome of scanning a metadata directory.
#[derive(Debug)]
pub struct DirectoryLoadOutcome {
    pub signers: MappedResults<ArtifactSigner>,
}

/// Does this file name belong to the given identifier?
///
/// Accepted when the stem contains the hex key with or without its prefix.
pub fn file_matches_identifier(file_name: &str, identifier: &str) -> bool {
    let lowered = file_name.to_lowercase();
    let stripped = crate::domain::strip_identifier(identifier).to_lowercase();
    lowered.contains(&format!("0x{stripped}")) || lowered.contains(&stripped)
}

fn is_hidden(file_name: &str) -> bool {
    file_name.starts_with('.')
}

fn has_metadata_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false)
}

/// Load every signer described by the metadata files in `dir`.
///
/// Hidden files are skipped; extension matching is case-insensitive;
/// duplicate identifiers keep the first occurrence and count the rest as
/// errors; a file that fails to parse or build counts as an error.
pub async fn load_metadata_directory(
    dir: &Path,
    connectors: &dyn VaultConnectors,
    chain_id: Option<u64>,
) -> Result<DirectoryLoadOutcome> {
    let mut signers = MappedResults::empty();
    let mut seen: HashSet<String> = HashSet::new();

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    entries.sort();

    for path in entries {
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if is_hidden(file_name) || !has_metadata_extension(&path) || !path.is_file() {
            continue;
        }

        let metadata = match SigningMetadata::from_yaml_file(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unparseable metadata file");
                signers.add_error();
                continue;
            }
        };

        match metadata.into_signer(connectors, chain_id).await {
            Ok(signer) => {
                if seen.insert(signer.identifier().to_string()) {
                    debug!(identifier = signer.identifier(), "loaded signer");
                    signers.add(signer);
                } else {
                    warn!(
                        identifier = signer.identifier(),
                        file = %path.display(),
                        "duplicate identifier, keeping first occurrence"
                    );
                    signers.add_error();
                }
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "failed to build signer");
                signers.add_error();
            }
        }
    }

    Ok(DirectoryLoadOutcome { signers })
}

/// Bulk-load encrypted keystores from `dir` with a shared password file.
///
/// Used for Commit-Boost proxy keystores: `scheme` picks the signer flavour
/// the decrypted secret becomes.
pub fn load_keystore_signers(
    dir: &Path,
    password_file: &Path,
    key_type: KeyType,
) -> MappedResults<ArtifactSigner> {
    let mut results = MappedResults::empty();

    let password = match std::fs::read_to_string(password_file) {
        Ok(password) => password,
        Err(e) => {
            warn!(file = %password_file.display(), error = %e, "cannot read keystore password file");
            return MappedResults::errored(1);
        }
    };
    let password = password.trim_end();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot read keystore directory");
            return MappedResults::errored(1);
        }
    };

    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if is_hidden(file_name)
            || !path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("json"))
                .unwrap_or(false)
        {
            continue;
        }

        match load_one_keystore(&path, password, key_type) {
            Ok(signer) => results.add(signer),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "failed to load keystore");
                results.add_error();
            }
        }
    }

    results
}

fn load_one_keystore(path: &Path, password: &str, key_type: KeyType) -> Result<ArtifactSigner> {
    let keystore = EncryptedKeystore::read_from(path)?;
    let secret: Zeroizing<Vec<u8>> = keystore
        .decrypt(password)
        .map_err(|e| SignerError::KeystoreDecrypt(e.to_string()))?;
    match key_type {
        KeyType::Bls => Ok(ArtifactSigner::bls_local(BlsKeyPair::from_secret_bytes(&secret)?)),
        KeyType::Secp256k1 => Ok(ArtifactSigner::k256(SecpKeyPair::from_secret_bytes(&secret)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::metadata::UnconfiguredConnectors;
    use tempfile::tempdir;

    fn write_raw_metadata(dir: &Path, name: &str, secret_hex: &str) {
        let yaml = format!("type: file-raw\nkeyType: BLS\nprivateKey: \"{secret_hex}\"\n");
        std::fs::write(dir.join(name), yaml).unwrap();
    }

    #[tokio::test]
    async fn loads_directory_and_counts_errors() {
        let dir = tempdir().unwrap();
        let pair = BlsKeyPair::generate();
        let secret = hex::encode(pair.secret_key_bytes());

        write_raw_metadata(dir.path(), "key1.yaml", &secret);
        // duplicate of key1 under a different name
        write_raw_metadata(dir.path(), "key1-copy.YAML", &secret);
        // unparseable
        std::fs::write(dir.path().join("broken.yaml"), "type: file-raw\n").unwrap();
        // hidden, skipped entirely
        write_raw_metadata(dir.path(), ".hidden.yaml", &secret);
        // wrong extension, skipped entirely
        std::fs::write(dir.path().join("notes.txt"), "not metadata").unwrap();

        let outcome = load_metadata_directory(dir.path(), &UnconfiguredConnectors, None)
            .await
            .unwrap();
        assert_eq!(outcome.signers.values.len(), 1);
        // one duplicate + one parse failure
        assert_eq!(outcome.signers.error_count, 2);
    }

    #[test]
    fn filename_matching_accepts_prefixed_and_bare() {
        assert!(file_matches_identifier("0xABCD01.yaml", "0xabcd01"));
        assert!(file_matches_identifier("key-abcd01.yaml", "0xABCD01"));
        assert!(!file_matches_identifier("other.yaml", "0xabcd01"));
    }
}
