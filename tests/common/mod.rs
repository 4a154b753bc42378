//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use sqlx::SqlitePool;
use tempfile::TempDir;

use sentinel_signer::crypto::bls::BlsKeyPair;
use sentinel_signer::crypto::ecdsa::SecpKeyPair;
use sentinel_signer::domain::Hash256;
use sentinel_signer::slashing::{open_database, SlashingProtection};

/// Genesis validators root used throughout the suites.
pub fn test_gvr() -> Hash256 {
    [0x42u8; 32]
}

pub fn gvr_hex() -> String {
    format!("0x{}", hex::encode(test_gvr()))
}

/// A file-backed SQLite database in a temp directory.
pub async fn test_db() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("slashing.db").display());
    let pool = open_database(&url).await.unwrap();
    (dir, pool)
}

/// A slashing store with the test genesis validators root registered.
pub async fn test_store() -> (TempDir, Arc<SlashingProtection>) {
    let (dir, pool) = test_db().await;
    let store = Arc::new(SlashingProtection::new(pool));
    store
        .register_genesis_validators_root(&test_gvr())
        .await
        .unwrap();
    (dir, store)
}

/// Deterministic BLS key pair for fixtures.
pub fn bls_pair(seed: u8) -> BlsKeyPair {
    let mut ikm = [seed; 32];
    ikm[0] = ikm[0].wrapping_add(1);
    // key_gen is deterministic in its input keying material
    let secret = blst_secret_from_ikm(&ikm);
    BlsKeyPair::from_secret_bytes(&secret).unwrap()
}

fn blst_secret_from_ikm(ikm: &[u8; 32]) -> [u8; 32] {
    blst::min_pk::SecretKey::key_gen(ikm, &[]).unwrap().to_bytes()
}

pub fn bls_identifier(pair: &BlsKeyPair) -> String {
    format!("0x{}", hex::encode(pair.public_key_bytes()))
}

pub fn secp_identifier(pair: &SecpKeyPair) -> String {
    format!("0x{}", hex::encode(pair.public_key_compressed()))
}

/// Write a `file-raw` metadata file for a BLS key.
pub fn write_bls_metadata(dir: &Path, name: &str, pair: &BlsKeyPair) {
    let yaml = format!(
        "type: file-raw\nkeyType: BLS\nprivateKey: \"0x{}\"\n",
        hex::encode(pair.secret_key_bytes())
    );
    std::fs::write(dir.join(name), yaml).unwrap();
}

/// Write a `file-raw` metadata file for a secp256k1 key.
pub fn write_secp_metadata(dir: &Path, name: &str, pair: &SecpKeyPair) {
    let yaml = format!(
        "type: file-raw\nkeyType: SECP256K1\nprivateKey: \"0x{}\"\n",
        hex::encode(pair.secret_key_bytes())
    );
    std::fs::write(dir.join(name), yaml).unwrap();
}
