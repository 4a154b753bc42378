//! The anti-slashing decision procedure.
//!
//! Every check-and-record runs inside a single database transaction: the
//! store must record everything a signature could be produced for before
//! the signature exists. A rejection is a normal return value, not an
//! error; callers decide how to surface it.

use sqlx::SqlitePool;
use std::fmt;
use tracing::{info, warn};

use super::dao::{
    LowWatermarkDao, MetadataDao, SignedAttestationsDao, SignedBlocksDao, ValidatorsDao,
};
use crate::domain::{hash256_to_hex, Epoch, Hash256, Slot};
use crate::error::{Result, SignerError};

/// Why a signing request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    GenesisValidatorsRootMismatch,
    ValidatorDisabled,
    BelowLowWatermark,
    BelowHighWatermark,
    ConflictingBlock { slot: Slot },
    ConflictingAttestation { target_epoch: Epoch },
    SourceNotBeforeTarget,
    SurroundsExisting,
    SurroundedByExisting,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::GenesisValidatorsRootMismatch => {
                write!(f, "genesis validators root does not match the stored value")
            }
            DenialReason::ValidatorDisabled => write!(f, "validator is disabled"),
            DenialReason::BelowLowWatermark => write!(f, "at or below the low watermark"),
            DenialReason::BelowHighWatermark => write!(f, "at or below the high watermark"),
            DenialReason::ConflictingBlock { slot } => {
                write!(f, "a different block was already signed at slot {slot}")
            }
            DenialReason::ConflictingAttestation { target_epoch } => write!(
                f,
                "a different attestation was already signed at target epoch {target_epoch}"
            ),
            DenialReason::SourceNotBeforeTarget => {
                write!(f, "source epoch is not before target epoch")
            }
            DenialReason::SurroundsExisting => {
                write!(f, "attestation surrounds a previously signed attestation")
            }
            DenialReason::SurroundedByExisting => {
                write!(f, "attestation is surrounded by a previously signed attestation")
            }
        }
    }
}

/// Outcome of a slashing check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashingCheck {
    Permitted,
    Denied(DenialReason),
}

impl SlashingCheck {
    pub fn is_permitted(&self) -> bool {
        matches!(self, SlashingCheck::Permitted)
    }
}

/// The slashing-protection store.
pub struct SlashingProtection {
    pool: SqlitePool,
}

impl SlashingProtection {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Database connectivity probe for the healthcheck.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("SELECT 1").execute(&mut *conn).await?;
        Ok(())
    }

    /// Record the genesis validators root at startup. Write-once: a
    /// different root than the stored one fails.
    pub async fn register_genesis_validators_root(
        &self,
        genesis_validators_root: &Hash256,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        MetadataDao::insert_genesis_validators_root(
            &mut tx,
            &hash256_to_hex(genesis_validators_root),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Register validators so their records exist before the first sign.
    pub async fn register_validators(&self, public_keys: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for public_key in public_keys {
            ValidatorsDao::register(&mut tx, public_key).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// May `public_key` sign a block at `slot` with `signing_root`?
    ///
    /// On permit the block is recorded in the same transaction.
    pub async fn may_sign_block(
        &self,
        public_key: &str,
        signing_root: &Hash256,
        slot: Slot,
        genesis_validators_root: &Hash256,
    ) -> Result<SlashingCheck> {
        let mut tx = self.pool.begin().await?;

        if let Some(denial) = self.common_gates(&mut tx, genesis_validators_root).await? {
            return Ok(SlashingCheck::Denied(denial));
        }
        let validator = ValidatorsDao::find(&mut tx, public_key).await?;
        let validator_id = match validator {
            Some(record) if !record.enabled => {
                warn!(public_key, "refusing to sign for disabled validator");
                return Ok(SlashingCheck::Denied(DenialReason::ValidatorDisabled));
            }
            Some(record) => record.id,
            None => ValidatorsDao::register(&mut tx, public_key).await?,
        };

        if let Some(watermark) = LowWatermarkDao::get(&mut tx, validator_id).await? {
            if let Some(min_slot) = watermark.min_block_slot {
                if slot as i64 <= min_slot {
                    return Ok(SlashingCheck::Denied(DenialReason::BelowLowWatermark));
                }
            }
        }
        if let Some(high) = MetadataDao::high_watermark(&mut tx).await? {
            if slot as i64 <= high.slot {
                return Ok(SlashingCheck::Denied(DenialReason::BelowHighWatermark));
            }
        }

        let root_hex = hash256_to_hex(signing_root);
        let existing = SignedBlocksDao::find_at_slot(&mut tx, validator_id, slot).await?;
        for row in &existing {
            match &row.signing_root {
                // same root or an unknown root already at this slot: the
                // request is a repeat, not a new block
                Some(stored) if *stored == root_hex => return Ok(SlashingCheck::Permitted),
                None => return Ok(SlashingCheck::Permitted),
                Some(_) => {
                    warn!(public_key, slot, "conflicting block signing request");
                    return Ok(SlashingCheck::Denied(DenialReason::ConflictingBlock { slot }));
                }
            }
        }

        let inserted = SignedBlocksDao::insert(&mut tx, validator_id, slot, Some(&root_hex)).await;
        match inserted {
            Ok(()) => {
                tx.commit().await?;
                Ok(SlashingCheck::Permitted)
            }
            // a concurrent transaction recorded this slot first
            Err(e) if is_unique_violation(&e) => {
                Ok(SlashingCheck::Denied(DenialReason::ConflictingBlock { slot }))
            }
            Err(e) => Err(e),
        }
    }

    /// May `public_key` sign an attestation `(source, target)` with
    /// `signing_root`? On permit the attestation is recorded in the same
    /// transaction.
    pub async fn may_sign_attestation(
        &self,
        public_key: &str,
        signing_root: &Hash256,
        source_epoch: Epoch,
        target_epoch: Epoch,
        genesis_validators_root: &Hash256,
    ) -> Result<SlashingCheck> {
        if source_epoch >= target_epoch {
            return Ok(SlashingCheck::Denied(DenialReason::SourceNotBeforeTarget));
        }

        let mut tx = self.pool.begin().await?;

        if let Some(denial) = self.common_gates(&mut tx, genesis_validators_root).await? {
            return Ok(SlashingCheck::Denied(denial));
        }
        let validator = ValidatorsDao::find(&mut tx, public_key).await?;
        let validator_id = match validator {
            Some(record) if !record.enabled => {
                warn!(public_key, "refusing to sign for disabled validator");
                return Ok(SlashingCheck::Denied(DenialReason::ValidatorDisabled));
            }
            Some(record) => record.id,
            None => ValidatorsDao::register(&mut tx, public_key).await?,
        };

        if let Some(watermark) = LowWatermarkDao::get(&mut tx, validator_id).await? {
            if let Some(min_target) = watermark.min_attestation_target_epoch {
                if target_epoch as i64 <= min_target {
                    return Ok(SlashingCheck::Denied(DenialReason::BelowLowWatermark));
                }
            }
            if let Some(min_source) = watermark.min_attestation_source_epoch {
                if (source_epoch as i64) < min_source {
                    return Ok(SlashingCheck::Denied(DenialReason::BelowLowWatermark));
                }
            }
        }
        if let Some(high) = MetadataDao::high_watermark(&mut tx).await? {
            if target_epoch as i64 <= high.epoch {
                return Ok(SlashingCheck::Denied(DenialReason::BelowHighWatermark));
            }
        }

        let root_hex = hash256_to_hex(signing_root);
        let existing = SignedAttestationsDao::find_at_target(&mut tx, validator_id, target_epoch).await?;
        for row in &existing {
            match &row.signing_root {
                Some(stored) if *stored == root_hex => return Ok(SlashingCheck::Permitted),
                None => return Ok(SlashingCheck::Permitted),
                Some(_) => {
                    warn!(public_key, target_epoch, "conflicting attestation signing request");
                    return Ok(SlashingCheck::Denied(DenialReason::ConflictingAttestation {
                        target_epoch,
                    }));
                }
            }
        }

        if SignedAttestationsDao::find_surrounding(&mut tx, validator_id, source_epoch, target_epoch)
            .await?
            .is_some()
        {
            warn!(public_key, source_epoch, target_epoch, "surrounded attestation request");
            return Ok(SlashingCheck::Denied(DenialReason::SurroundedByExisting));
        }
        if SignedAttestationsDao::find_surrounded(&mut tx, validator_id, source_epoch, target_epoch)
            .await?
            .is_some()
        {
            warn!(public_key, source_epoch, target_epoch, "surrounding attestation request");
            return Ok(SlashingCheck::Denied(DenialReason::SurroundsExisting));
        }

        let inserted = SignedAttestationsDao::insert(
            &mut tx,
            validator_id,
            source_epoch,
            target_epoch,
            Some(&root_hex),
        )
        .await;
        match inserted {
            Ok(()) => {
                tx.commit().await?;
                Ok(SlashingCheck::Permitted)
            }
            Err(e) if is_unique_violation(&e) => {
                Ok(SlashingCheck::Denied(DenialReason::ConflictingAttestation { target_epoch }))
            }
            Err(e) => Err(e),
        }
    }

    async fn common_gates(
        &self,
        conn: &mut sqlx::SqliteConnection,
        genesis_validators_root: &Hash256,
    ) -> Result<Option<DenialReason>> {
        match MetadataDao::genesis_validators_root(conn).await? {
            Some(stored) if stored == hash256_to_hex(genesis_validators_root) => Ok(None),
            Some(stored) => {
                warn!(
                    stored = %stored,
                    requested = %hash256_to_hex(genesis_validators_root),
                    "genesis validators root mismatch"
                );
                Ok(Some(DenialReason::GenesisValidatorsRootMismatch))
            }
            None => {
                warn!("no genesis validators root registered, refusing to sign");
                Ok(Some(DenialReason::GenesisValidatorsRootMismatch))
            }
        }
    }

    /// Whether the validator has any recorded slashing data.
    pub async fn has_slashing_data(&self, public_key: &str) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        let Some(record) = ValidatorsDao::find(&mut conn, public_key).await? else {
            return Ok(false);
        };
        let blocks = SignedBlocksDao::count_for_validator(&mut conn, record.id).await?;
        let attestations =
            SignedAttestationsDao::count_for_validator(&mut conn, record.id).await?;
        Ok(blocks > 0 || attestations > 0)
    }

    pub async fn is_enabled(&self, public_key: &str) -> Result<Option<bool>> {
        let mut conn = self.pool.acquire().await?;
        Ok(ValidatorsDao::find(&mut conn, public_key)
            .await?
            .map(|record| record.enabled))
    }

    /// Flip the enabled flag; returns rows affected.
    pub async fn set_enabled(&self, public_key: &str, enabled: bool) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let Some(record) = ValidatorsDao::find(&mut tx, public_key).await? else {
            return Ok(0);
        };
        let rows = ValidatorsDao::set_enabled(&mut tx, record.id, enabled).await?;
        tx.commit().await?;
        info!(public_key, enabled, "validator enabled flag updated");
        Ok(rows)
    }

    /// Set the global high watermark. Requires a registered genesis
    /// validators root; otherwise reports zero rows affected.
    pub async fn set_high_watermark(&self, slot: Slot, epoch: Epoch) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let rows = MetadataDao::set_high_watermark(&mut tx, slot, epoch).await?;
        tx.commit().await?;
        if rows == 0 {
            warn!("high watermark not set: no genesis validators root registered");
        } else {
            info!(slot, epoch, "high watermark set");
        }
        Ok(rows)
    }

    pub async fn delete_high_watermark(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let rows = MetadataDao::delete_high_watermark(&mut tx).await?;
        tx.commit().await?;
        Ok(rows)
    }

    pub async fn high_watermark(&self) -> Result<Option<super::dao::HighWatermark>> {
        let mut conn = self.pool.acquire().await?;
        MetadataDao::high_watermark(&mut conn).await
    }
}

fn is_unique_violation(error: &SignerError) -> bool {
    match error {
        SignerError::Database(sqlx::Error::Database(db)) => {
            matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation)
        }
        _ => false,
    }
}
