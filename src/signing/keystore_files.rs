//! On-disk lifecycle of the keystore + password + metadata triple kept for
//! each imported validator key.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::metadata::{FileKeystoreMetadata, SigningMetadata};
use crate::domain::{normalise_identifier, KeyType};
use crate::error::{Result, SignerError};

/// Manages the per-validator key files under the key store path.
pub struct KeystoreFileManager {
    keystore_path: PathBuf,
}

impl KeystoreFileManager {
    pub fn new(keystore_path: PathBuf) -> Self {
        Self { keystore_path }
    }

    pub fn root(&self) -> &Path {
        &self.keystore_path
    }

    pub fn metadata_file(&self, identifier: &str) -> PathBuf {
        self.keystore_path
            .join(format!("{}.yaml", normalise_identifier(identifier)))
    }

    pub fn keystore_file(&self, identifier: &str) -> PathBuf {
        self.keystore_path
            .join(format!("{}.json", normalise_identifier(identifier)))
    }

    pub fn password_file(&self, identifier: &str) -> PathBuf {
        self.keystore_path
            .join(format!("{}.password.txt", normalise_identifier(identifier)))
    }

    /// Whether any of the triple exists on disk.
    pub fn has_keystore_files(&self, identifier: &str) -> bool {
        self.metadata_file(identifier).exists()
            || self.keystore_file(identifier).exists()
            || self.password_file(identifier).exists()
    }

    /// Write the keystore, password, and metadata files for an imported key.
    pub fn import_keystore_files(
        &self,
        identifier: &str,
        keystore_json: &str,
        password: &str,
        key_type: KeyType,
    ) -> Result<()> {
        fs::create_dir_all(&self.keystore_path)?;

        let keystore_path = self.keystore_file(identifier);
        let password_path = self.password_file(identifier);
        write_synced(&keystore_path, keystore_json.as_bytes())?;
        write_synced(&password_path, password.as_bytes())?;

        let metadata = SigningMetadata::FileKeystore(FileKeystoreMetadata {
            keystore_file: keystore_path,
            keystore_password_file: password_path,
            key_type,
        });
        let yaml = serde_yaml::to_string(&metadata)
            .map_err(|e| SignerError::Internal(format!("encode metadata: {e}")))?;
        write_synced(&self.metadata_file(identifier), yaml.as_bytes())?;

        debug!(identifier = %normalise_identifier(identifier), "imported keystore files");
        Ok(())
    }

    /// Remove the keystore, password, and metadata files.
    ///
    /// Every failure is surfaced; nothing is silently left behind.
    pub fn delete_keystore_files(&self, identifier: &str) -> Result<()> {
        for path in [
            self.keystore_file(identifier),
            self.password_file(identifier),
            self.metadata_file(identifier),
        ] {
            if !path.exists() {
                continue;
            }
            fs::remove_file(&path).map_err(|e| {
                SignerError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Error deleting keystore file: {e}"),
                ))
            })?;
        }
        Ok(())
    }
}

fn write_synced(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}
