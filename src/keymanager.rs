//! Key-manager operations: coordinated removal and import of validator
//! keys across the registry, the filesystem, and the slashing store.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::crypto::keystore::EncryptedKeystore;
use crate::domain::{normalise_identifier, KeyType};
use crate::error::{Result, SignerError};
use crate::signing::{ArtifactSigner, KeystoreFileManager, SignerRegistry};
use crate::slashing::{
    import_interchange, DbValidatorManager, IncrementalExporter, InterchangeDocument,
    SlashingProtection,
};

/// Per-key outcome of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteKeystoreStatus {
    Deleted,
    NotActive,
    NotFound,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteKeystoreResult {
    pub status: DeleteKeystoreStatus,
    pub message: String,
}

/// Per-key outcome of an import request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKeystoreStatus {
    Imported,
    Duplicate,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportKeystoreResult {
    pub status: ImportKeystoreStatus,
    pub message: String,
}

/// Orchestrates keystore deletion.
pub struct DeleteKeystoresProcessor {
    registry: Arc<SignerRegistry>,
    slashing: Arc<SlashingProtection>,
    files: Arc<KeystoreFileManager>,
}

impl DeleteKeystoresProcessor {
    pub fn new(
        registry: Arc<SignerRegistry>,
        slashing: Arc<SlashingProtection>,
        files: Arc<KeystoreFileManager>,
    ) -> Self {
        Self {
            registry,
            slashing,
            files,
        }
    }

    /// Delete a batch of keys; returns per-key statuses and the combined
    /// EIP-3076 interchange for the keys that had slashing data.
    pub async fn delete(
        &self,
        public_keys: &[String],
    ) -> Result<(Vec<DeleteKeystoreResult>, String)> {
        let gvr = {
            let mut conn = self.slashing.pool().acquire().await?;
            crate::slashing::MetadataDao::genesis_validators_root(&mut conn)
                .await?
                .unwrap_or_else(|| crate::domain::hash256_to_hex(&[0u8; 32]))
        };

        let mut exporter = IncrementalExporter::new(Vec::new(), &gvr)?;
        let mut results = Vec::with_capacity(public_keys.len());
        for public_key in public_keys {
            results.push(self.delete_one(public_key, &mut exporter).await);
        }
        let body = exporter.finish()?;
        let interchange = String::from_utf8(body)
            .map_err(|e| SignerError::Internal(format!("interchange not utf-8: {e}")))?;
        Ok((results, interchange))
    }

    async fn delete_one(
        &self,
        public_key: &str,
        exporter: &mut IncrementalExporter<Vec<u8>>,
    ) -> DeleteKeystoreResult {
        let pubkey = normalise_identifier(public_key);

        if self.registry.get(&pubkey).is_none() {
            // a key we no longer hold but have history for is reported, and
            // its history still exported
            match self.slashing.has_slashing_data(&pubkey).await {
                Ok(true) => {
                    if let Err(e) = exporter.export_validator(self.slashing.pool(), &pubkey).await {
                        warn!(public_key = %pubkey, error = %e, "failed to export history for inactive key");
                    }
                    return DeleteKeystoreResult {
                        status: DeleteKeystoreStatus::NotActive,
                        message: String::new(),
                    };
                }
                Ok(false) => {
                    return DeleteKeystoreResult {
                        status: DeleteKeystoreStatus::NotFound,
                        message: String::new(),
                    }
                }
                Err(e) => {
                    return DeleteKeystoreResult {
                        status: DeleteKeystoreStatus::Error,
                        message: format!("error checking slashing data: {e}"),
                    }
                }
            }
        }

        let prior_enabled = match self.slashing.is_enabled(&pubkey).await {
            Ok(enabled) => enabled,
            Err(e) => {
                return DeleteKeystoreResult {
                    status: DeleteKeystoreStatus::Error,
                    message: format!("error reading validator state: {e}"),
                }
            }
        };

        if let Err(e) = self.try_delete(&pubkey).await {
            error!(public_key = %pubkey, error = %e, "delete failed, restoring enabled state");
            self.restore_enabled(&pubkey, prior_enabled).await;
            return DeleteKeystoreResult {
                status: DeleteKeystoreStatus::Error,
                message: format!("Error deleting keystore file: {e}"),
            };
        }

        let has_data = self.slashing.has_slashing_data(&pubkey).await.unwrap_or(false);
        if has_data {
            if let Err(e) = exporter.export_validator(self.slashing.pool(), &pubkey).await {
                error!(public_key = %pubkey, error = %e, "interchange export failed, restoring enabled state");
                self.restore_enabled(&pubkey, prior_enabled).await;
                return DeleteKeystoreResult {
                    status: DeleteKeystoreStatus::Error,
                    message: format!("error exporting slashing data: {e}"),
                };
            }
        }

        info!(public_key = %pubkey, "keystore deleted");
        DeleteKeystoreResult {
            status: DeleteKeystoreStatus::Deleted,
            message: String::new(),
        }
    }

    async fn try_delete(&self, pubkey: &str) -> Result<()> {
        // ordering matters: registry removal completes before the flag
        // flips, and the flag flips before files disappear
        self.registry.remove(pubkey).await?;
        self.slashing.set_enabled(pubkey, false).await?;
        self.files.delete_keystore_files(pubkey)?;
        Ok(())
    }

    async fn restore_enabled(&self, pubkey: &str, prior: Option<bool>) {
        if let Some(enabled) = prior {
            if let Err(e) = self.slashing.set_enabled(pubkey, enabled).await {
                error!(public_key = %pubkey, error = %e, "failed to restore validator enabled state");
            }
        }
    }
}

/// A keystore+password pair submitted for import.
#[derive(Debug, Clone, Deserialize)]
pub struct KeystoreImport {
    pub keystore: String,
    pub password: String,
}

/// Orchestrates keystore import.
pub struct ImportKeystoresProcessor {
    registry: Arc<SignerRegistry>,
    slashing: Arc<SlashingProtection>,
    validators: Arc<DbValidatorManager>,
}

impl ImportKeystoresProcessor {
    pub fn new(
        registry: Arc<SignerRegistry>,
        slashing: Arc<SlashingProtection>,
        validators: Arc<DbValidatorManager>,
    ) -> Self {
        Self {
            registry,
            slashing,
            validators,
        }
    }

    /// Import keys, optionally preceded by their slashing history.
    pub async fn import(
        &self,
        imports: Vec<KeystoreImport>,
        slashing_protection: Option<&str>,
    ) -> Result<Vec<ImportKeystoreResult>> {
        if let Some(raw) = slashing_protection {
            let document: InterchangeDocument = serde_json::from_str(raw)
                .map_err(|e| SignerError::BadRequest(format!("slashing_protection: {e}")))?;
            import_interchange(self.slashing.pool(), &document).await?;
        }

        let mut results = Vec::with_capacity(imports.len());
        for import in imports {
            results.push(self.import_one(import).await);
        }
        Ok(results)
    }

    async fn import_one(&self, import: KeystoreImport) -> ImportKeystoreResult {
        let keystore: EncryptedKeystore = match serde_json::from_str(&import.keystore) {
            Ok(keystore) => keystore,
            Err(e) => {
                return ImportKeystoreResult {
                    status: ImportKeystoreStatus::Error,
                    message: format!("invalid keystore: {e}"),
                }
            }
        };
        let pubkey = normalise_identifier(&keystore.public_key);

        if self.registry.get(&pubkey).is_some() {
            return ImportKeystoreResult {
                status: ImportKeystoreStatus::Duplicate,
                message: String::new(),
            };
        }

        let secret = match keystore.decrypt(&import.password) {
            Ok(secret) => secret,
            Err(e) => {
                return ImportKeystoreResult {
                    status: ImportKeystoreStatus::Error,
                    message: format!("keystore decrypt failed: {e}"),
                }
            }
        };
        let signer = match crate::crypto::bls::BlsKeyPair::from_secret_bytes(&secret) {
            Ok(pair) => ArtifactSigner::bls_local(pair),
            Err(e) => {
                return ImportKeystoreResult {
                    status: ImportKeystoreStatus::Error,
                    message: format!("invalid BLS key: {e}"),
                }
            }
        };
        if signer.identifier() != pubkey {
            return ImportKeystoreResult {
                status: ImportKeystoreStatus::Error,
                message: "keystore public key does not match its secret".to_string(),
            };
        }

        if let Err(e) = self
            .validators
            .add_validator(&pubkey, &import.keystore, &import.password, KeyType::Bls)
            .await
        {
            return ImportKeystoreResult {
                status: ImportKeystoreStatus::Error,
                message: format!("register validator: {e}"),
            };
        }
        if let Err(e) = self.registry.add(signer).await {
            return ImportKeystoreResult {
                status: ImportKeystoreStatus::Error,
                message: format!("register signer: {e}"),
            };
        }

        info!(public_key = %pubkey, "keystore imported");
        ImportKeystoreResult {
            status: ImportKeystoreStatus::Imported,
            message: String::new(),
        }
    }
}
