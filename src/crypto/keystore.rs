//! Encrypted keystore files (Argon2id + XChaCha20-Poly1305).
//!
//! One JSON file per key, carrying the public key identifier, a UUID, the
//! KDF parameters, and the sealed secret.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use super::CryptoError;

/// Argon2id cost parameters stored alongside the ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
    pub salt: String,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 65536,
            t_cost: 3,
            p_cost: 4,
            salt: String::new(),
        }
    }
}

/// Cipher envelope: XChaCha20-Poly1305 with a random 24-byte nonce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherParams {
    pub function: String,
    pub nonce: String,
    pub ciphertext: String,
}

/// On-disk keystore document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedKeystore {
    pub uuid: Uuid,
    pub public_key: String,
    pub kdf: KdfParams,
    pub cipher: CipherParams,
}

impl EncryptedKeystore {
    /// Seal `secret` under `password`.
    pub fn encrypt(
        secret: &[u8],
        public_key: &str,
        password: &str,
    ) -> Result<Self, CryptoError> {
        let mut salt = [0u8; 32];
        let mut nonce = [0u8; 24];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let kdf = KdfParams {
            salt: hex::encode(salt),
            ..KdfParams::default()
        };
        let mut key = derive_key(password, &salt, &kdf)?;
        let cipher = XChaCha20Poly1305::new((&key).into());
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), secret)
            .map_err(|e| CryptoError::Keystore(format!("encryption failed: {e}")))?;
        key.zeroize();

        Ok(Self {
            uuid: Uuid::new_v4(),
            public_key: public_key.to_string(),
            kdf,
            cipher: CipherParams {
                function: "xchacha20poly1305".to_string(),
                nonce: hex::encode(nonce),
                ciphertext: hex::encode(ciphertext),
            },
        })
    }

    /// Open the sealed secret with `password`.
    pub fn decrypt(&self, password: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if self.cipher.function != "xchacha20poly1305" {
            return Err(CryptoError::Keystore(format!(
                "unsupported cipher function: {}",
                self.cipher.function
            )));
        }
        let salt = hex::decode(&self.kdf.salt)
            .map_err(|e| CryptoError::Keystore(format!("bad salt encoding: {e}")))?;
        let nonce = hex::decode(&self.cipher.nonce)
            .map_err(|e| CryptoError::Keystore(format!("bad nonce encoding: {e}")))?;
        let ciphertext = hex::decode(&self.cipher.ciphertext)
            .map_err(|e| CryptoError::Keystore(format!("bad ciphertext encoding: {e}")))?;
        if nonce.len() != 24 {
            return Err(CryptoError::Keystore("nonce must be 24 bytes".to_string()));
        }

        let mut key = derive_key(password, &salt, &self.kdf)?;
        let cipher = XChaCha20Poly1305::new((&key).into());
        let plaintext = cipher
            .decrypt(XNonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| CryptoError::Keystore("decryption failed: wrong password or corrupt keystore".to_string()))?;
        key.zeroize();
        Ok(Zeroizing::new(plaintext))
    }

    /// Write the keystore to `path` and fsync it.
    pub fn write_to(&self, path: &Path) -> Result<(), CryptoError> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| CryptoError::Keystore(format!("serialization failed: {e}")))?;
        let mut file = File::create(path)
            .map_err(|e| CryptoError::Keystore(format!("create {}: {e}", path.display())))?;
        file.write_all(&json)
            .map_err(|e| CryptoError::Keystore(format!("write {}: {e}", path.display())))?;
        file.sync_all()
            .map_err(|e| CryptoError::Keystore(format!("fsync {}: {e}", path.display())))?;
        Ok(())
    }

    /// Read a keystore from `path`.
    pub fn read_from(path: &Path) -> Result<Self, CryptoError> {
        let json = std::fs::read(path)
            .map_err(|e| CryptoError::Keystore(format!("read {}: {e}", path.display())))?;
        serde_json::from_slice(&json)
            .map_err(|e| CryptoError::Keystore(format!("parse {}: {e}", path.display())))
    }
}

fn derive_key(password: &str, salt: &[u8], params: &KdfParams) -> Result<[u8; 32], CryptoError> {
    let argon_params = Params::new(params.m_cost, params.t_cost, params.p_cost, Some(32))
        .map_err(|e| CryptoError::Keystore(format!("bad KDF parameters: {e}")))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
    let mut key = [0u8; 32];
    argon
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::Keystore(format!("key derivation failed: {e}")))?;
    Ok(key)
}
