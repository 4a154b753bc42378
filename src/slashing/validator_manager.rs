//! Transactional validator add/delete used by the key-manager endpoints.
//!
//! The file operations run inside the database transaction scope: if either
//! the files or the flag transition fail, neither change survives.

use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

use super::dao::ValidatorsDao;
use crate::domain::{normalise_identifier, KeyType};
use crate::error::Result;
use crate::signing::KeystoreFileManager;

pub struct DbValidatorManager {
    pool: SqlitePool,
    files: Arc<KeystoreFileManager>,
}

impl DbValidatorManager {
    pub fn new(pool: SqlitePool, files: Arc<KeystoreFileManager>) -> Self {
        Self { pool, files }
    }

    pub fn files(&self) -> &KeystoreFileManager {
        &self.files
    }

    /// Write the key's files, register the validator, and enable it.
    pub async fn add_validator(
        &self,
        public_key: &str,
        keystore_json: &str,
        password: &str,
        key_type: KeyType,
    ) -> Result<()> {
        let pubkey = normalise_identifier(public_key);
        let mut tx = self.pool.begin().await?;

        let validator_id = ValidatorsDao::register(&mut tx, &pubkey).await?;
        ValidatorsDao::set_enabled(&mut tx, validator_id, true).await?;
        // file write participates in the transaction: a failure here aborts
        // the registration
        self.files
            .import_keystore_files(&pubkey, keystore_json, password, key_type)?;

        tx.commit().await?;
        info!(public_key = %pubkey, "validator added");
        Ok(())
    }

    /// Delete the key's files and disable the validator atomically.
    pub async fn delete_validator(&self, public_key: &str) -> Result<()> {
        let pubkey = normalise_identifier(public_key);
        let mut tx = self.pool.begin().await?;

        if let Some(record) = ValidatorsDao::find(&mut tx, &pubkey).await? {
            ValidatorsDao::set_enabled(&mut tx, record.id, false).await?;
        }
        self.files.delete_keystore_files(&pubkey)?;

        tx.commit().await?;
        info!(public_key = %pubkey, "validator deleted");
        Ok(())
    }
}
