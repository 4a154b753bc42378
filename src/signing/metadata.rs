//! Per-key YAML metadata files.
//!
//! Each file describes where one private key lives, discriminated by `type`.
//! Cloud backends appear only through their capability: secret vaults hand
//! back a hex-encoded private key, KMS backends sign digests remotely.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::Zeroizing;

use super::signer::{ArtifactSigner, RemoteKms};
use crate::crypto::bls::BlsKeyPair;
use crate::crypto::ecdsa::SecpKeyPair;
use crate::crypto::keystore::EncryptedKeystore;
use crate::domain::KeyType;
use crate::error::{Result, SignerError};

fn default_key_type() -> KeyType {
    KeyType::Bls
}

/// AWS credential sourcing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AwsAuthMode {
    Environment,
    Specified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRawMetadata {
    pub private_key: String,
    #[serde(default = "default_key_type")]
    pub key_type: KeyType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileKeystoreMetadata {
    pub keystore_file: PathBuf,
    pub keystore_password_file: PathBuf,
    #[serde(default = "default_key_type")]
    pub key_type: KeyType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashicorpMetadata {
    pub server_host: String,
    #[serde(default)]
    pub server_port: Option<u16>,
    #[serde(default)]
    pub timeout: Option<u64>,
    pub key_path: String,
    #[serde(default)]
    pub key_name: Option<String>,
    pub token: String,
    #[serde(default)]
    pub tls_enabled: Option<bool>,
    #[serde(default)]
    pub tls_known_server_file: Option<PathBuf>,
    #[serde(default = "default_key_type")]
    pub key_type: KeyType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureSecretMetadata {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub vault_name: String,
    pub secret_name: String,
    #[serde(default = "default_key_type")]
    pub key_type: KeyType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureKeyMetadata {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub vault_name: String,
    pub key_name: String,
    #[serde(default = "default_key_type")]
    pub key_type: KeyType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsSecretMetadata {
    pub authentication_mode: AwsAuthMode,
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    pub secret_name: String,
    #[serde(default = "default_key_type")]
    pub key_type: KeyType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsKmsMetadata {
    pub authentication_mode: AwsAuthMode,
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    pub kms_key_id: String,
    #[serde(default)]
    pub endpoint_override: Option<String>,
}

/// One parsed metadata file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SigningMetadata {
    FileRaw(FileRawMetadata),
    FileKeystore(FileKeystoreMetadata),
    Hashicorp(HashicorpMetadata),
    AzureSecret(AzureSecretMetadata),
    AzureKey(AzureKeyMetadata),
    AwsSecret(AwsSecretMetadata),
    AwsKms(AwsKmsMetadata),
}

impl SigningMetadata {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| SignerError::MetadataParse(e.to_string()))
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SignerError::MetadataParse(format!("read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Build the signer this metadata describes.
    pub async fn into_signer(
        self,
        connectors: &dyn VaultConnectors,
        chain_id: Option<u64>,
    ) -> Result<ArtifactSigner> {
        match self {
            SigningMetadata::FileRaw(meta) => {
                signer_from_secret_hex(&meta.private_key, meta.key_type, chain_id)
            }
            SigningMetadata::FileKeystore(meta) => {
                let keystore = EncryptedKeystore::read_from(&meta.keystore_file)
                    .map_err(|e| SignerError::MetadataParse(e.to_string()))?;
                let password = std::fs::read_to_string(&meta.keystore_password_file)
                    .map_err(|e| {
                        SignerError::MetadataParse(format!(
                            "read password file {}: {e}",
                            meta.keystore_password_file.display()
                        ))
                    })?;
                let secret = keystore
                    .decrypt(password.trim_end())
                    .map_err(|e| SignerError::KeystoreDecrypt(e.to_string()))?;
                signer_from_secret_bytes(&secret, meta.key_type, chain_id)
            }
            SigningMetadata::Hashicorp(meta) => {
                let secret = connectors.hashicorp_secret(&meta).await?;
                signer_from_secret_hex(&secret, meta.key_type, chain_id)
            }
            SigningMetadata::AzureSecret(meta) => {
                let secret = connectors.azure_secret(&meta).await?;
                signer_from_secret_hex(&secret, meta.key_type, chain_id)
            }
            SigningMetadata::AwsSecret(meta) => {
                let secret = connectors.aws_secret(&meta).await?;
                signer_from_secret_hex(&secret, meta.key_type, chain_id)
            }
            SigningMetadata::AzureKey(meta) => {
                if meta.key_type == KeyType::Bls {
                    return Err(SignerError::MetadataParse(
                        "azure-key metadata only supports SECP256K1 keys".to_string(),
                    ));
                }
                let backend = connectors.azure_key_signer(&meta)?;
                remote_signer(backend, chain_id).await
            }
            SigningMetadata::AwsKms(meta) => {
                let backend = connectors.aws_kms_signer(&meta)?;
                remote_signer(backend, chain_id).await
            }
        }
    }
}

/// Connectors for the cloud backends named in metadata files.
///
/// Only the capability appears here; wire protocols live outside this crate.
#[async_trait]
pub trait VaultConnectors: Send + Sync {
    async fn hashicorp_secret(&self, meta: &HashicorpMetadata) -> Result<Zeroizing<String>>;
    async fn azure_secret(&self, meta: &AzureSecretMetadata) -> Result<Zeroizing<String>>;
    async fn aws_secret(&self, meta: &AwsSecretMetadata) -> Result<Zeroizing<String>>;
    fn azure_key_signer(&self, meta: &AzureKeyMetadata) -> Result<Arc<dyn RemoteKms>>;
    fn aws_kms_signer(&self, meta: &AwsKmsMetadata) -> Result<Arc<dyn RemoteKms>>;
}

/// Connectors used when no cloud backend is configured.
pub struct UnconfiguredConnectors;

#[async_trait]
impl VaultConnectors for UnconfiguredConnectors {
    async fn hashicorp_secret(&self, meta: &HashicorpMetadata) -> Result<Zeroizing<String>> {
        Err(SignerError::BackendUnavailable(format!(
            "no HashiCorp connector configured for {}",
            meta.server_host
        )))
    }

    async fn azure_secret(&self, meta: &AzureSecretMetadata) -> Result<Zeroizing<String>> {
        Err(SignerError::BackendUnavailable(format!(
            "no Azure connector configured for vault {}",
            meta.vault_name
        )))
    }

    async fn aws_secret(&self, meta: &AwsSecretMetadata) -> Result<Zeroizing<String>> {
        Err(SignerError::BackendUnavailable(format!(
            "no AWS Secrets Manager connector configured for {}",
            meta.secret_name
        )))
    }

    fn azure_key_signer(&self, meta: &AzureKeyMetadata) -> Result<Arc<dyn RemoteKms>> {
        Err(SignerError::BackendUnavailable(format!(
            "no Azure Key Vault connector configured for key {}",
            meta.key_name
        )))
    }

    fn aws_kms_signer(&self, meta: &AwsKmsMetadata) -> Result<Arc<dyn RemoteKms>> {
        Err(SignerError::BackendUnavailable(format!(
            "no AWS KMS connector configured for key {}",
            meta.kms_key_id
        )))
    }
}

async fn remote_signer(
    backend: Arc<dyn RemoteKms>,
    chain_id: Option<u64>,
) -> Result<ArtifactSigner> {
    let public_key = backend.public_key().await?;
    Ok(ArtifactSigner::secp_remote(public_key, backend, true, chain_id))
}

fn signer_from_secret_hex(
    secret_hex: &str,
    key_type: KeyType,
    chain_id: Option<u64>,
) -> Result<ArtifactSigner> {
    let stripped = crate::domain::strip_identifier(secret_hex.trim());
    let bytes = Zeroizing::new(
        hex::decode(stripped).map_err(|e| SignerError::MetadataParse(format!("private key: {e}")))?,
    );
    signer_from_secret_bytes(&bytes, key_type, chain_id)
}

fn signer_from_secret_bytes(
    secret: &[u8],
    key_type: KeyType,
    chain_id: Option<u64>,
) -> Result<ArtifactSigner> {
    match key_type {
        KeyType::Bls => Ok(ArtifactSigner::bls_local(BlsKeyPair::from_secret_bytes(secret)?)),
        KeyType::Secp256k1 => Ok(ArtifactSigner::secp_local(
            SecpKeyPair::from_secret_bytes(secret)?,
            true,
            chain_id,
        )),
    }
}
