//! Data access objects over the slashing-protection schema.
//!
//! DAOs own nothing durable between calls; every method runs against the
//! connection it is given so callers compose them inside one transaction.
//! Slots and epochs are stored as `INTEGER`, signing roots as lowercase hex.

use sqlx::{FromRow, SqliteConnection};

use crate::domain::{Epoch, Slot};
use crate::error::{Result, SignerError};

#[derive(Debug, Clone, FromRow)]
pub struct ValidatorRecord {
    pub id: i64,
    pub public_key: String,
    pub enabled: bool,
}

pub struct ValidatorsDao;

impl ValidatorsDao {
    /// Insert the validator if unknown; either way return its surrogate id.
    pub async fn register(conn: &mut SqliteConnection, public_key: &str) -> Result<i64> {
        if let Some(record) = Self::find(conn, public_key).await? {
            return Ok(record.id);
        }
        let result = sqlx::query("INSERT INTO validators (public_key, enabled) VALUES (?, 1)")
            .bind(public_key)
            .execute(&mut *conn)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn find(
        conn: &mut SqliteConnection,
        public_key: &str,
    ) -> Result<Option<ValidatorRecord>> {
        let record = sqlx::query_as::<_, ValidatorRecord>(
            "SELECT id, public_key, enabled FROM validators WHERE public_key = ?",
        )
        .bind(public_key)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(record)
    }

    pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<ValidatorRecord>> {
        let records = sqlx::query_as::<_, ValidatorRecord>(
            "SELECT id, public_key, enabled FROM validators ORDER BY public_key ASC",
        )
        .fetch_all(&mut *conn)
        .await?;
        Ok(records)
    }

    /// Flip the enabled flag; returns the number of rows affected.
    pub async fn set_enabled(
        conn: &mut SqliteConnection,
        validator_id: i64,
        enabled: bool,
    ) -> Result<u64> {
        let result = sqlx::query("UPDATE validators SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(validator_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SignedBlockRow {
    pub validator_id: i64,
    pub slot: i64,
    pub signing_root: Option<String>,
}

pub struct SignedBlocksDao;

impl SignedBlocksDao {
    pub async fn find_at_slot(
        conn: &mut SqliteConnection,
        validator_id: i64,
        slot: Slot,
    ) -> Result<Vec<SignedBlockRow>> {
        let rows = sqlx::query_as::<_, SignedBlockRow>(
            "SELECT validator_id, slot, signing_root FROM signed_blocks \
             WHERE validator_id = ? AND slot = ?",
        )
        .bind(validator_id)
        .bind(slot as i64)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    pub async fn insert(
        conn: &mut SqliteConnection,
        validator_id: i64,
        slot: Slot,
        signing_root: Option<&str>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO signed_blocks (validator_id, slot, signing_root) VALUES (?, ?, ?)")
            .bind(validator_id)
            .bind(slot as i64)
            .bind(signing_root)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn for_validator(
        conn: &mut SqliteConnection,
        validator_id: i64,
    ) -> Result<Vec<SignedBlockRow>> {
        let rows = sqlx::query_as::<_, SignedBlockRow>(
            "SELECT validator_id, slot, signing_root FROM signed_blocks \
             WHERE validator_id = ? ORDER BY slot ASC",
        )
        .bind(validator_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    pub async fn count_for_validator(
        conn: &mut SqliteConnection,
        validator_id: i64,
    ) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM signed_blocks WHERE validator_id = ?")
                .bind(validator_id)
                .fetch_one(&mut *conn)
                .await?;
        Ok(count.0)
    }

    /// Delete rows below `slot`, always keeping the most recent row.
    pub async fn prune_below(
        conn: &mut SqliteConnection,
        validator_id: i64,
        slot: Slot,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM signed_blocks WHERE validator_id = ? AND slot < ? \
             AND slot < (SELECT MAX(slot) FROM signed_blocks WHERE validator_id = ?)",
        )
        .bind(validator_id)
        .bind(slot as i64)
        .bind(validator_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SignedAttestationRow {
    pub validator_id: i64,
    pub source_epoch: i64,
    pub target_epoch: i64,
    pub signing_root: Option<String>,
}

pub struct SignedAttestationsDao;

impl SignedAttestationsDao {
    pub async fn find_at_target(
        conn: &mut SqliteConnection,
        validator_id: i64,
        target_epoch: Epoch,
    ) -> Result<Vec<SignedAttestationRow>> {
        let rows = sqlx::query_as::<_, SignedAttestationRow>(
            "SELECT validator_id, source_epoch, target_epoch, signing_root \
             FROM signed_attestations WHERE validator_id = ? AND target_epoch = ?",
        )
        .bind(validator_id)
        .bind(target_epoch as i64)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    /// An existing attestation surrounding `(source, target)`.
    pub async fn find_surrounding(
        conn: &mut SqliteConnection,
        validator_id: i64,
        source_epoch: Epoch,
        target_epoch: Epoch,
    ) -> Result<Option<SignedAttestationRow>> {
        let row = sqlx::query_as::<_, SignedAttestationRow>(
            "SELECT validator_id, source_epoch, target_epoch, signing_root \
             FROM signed_attestations \
             WHERE validator_id = ? AND source_epoch < ? AND target_epoch > ? LIMIT 1",
        )
        .bind(validator_id)
        .bind(source_epoch as i64)
        .bind(target_epoch as i64)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row)
    }

    /// An existing attestation surrounded by `(source, target)`.
    pub async fn find_surrounded(
        conn: &mut SqliteConnection,
        validator_id: i64,
        source_epoch: Epoch,
        target_epoch: Epoch,
    ) -> Result<Option<SignedAttestationRow>> {
        let row = sqlx::query_as::<_, SignedAttestationRow>(
            "SELECT validator_id, source_epoch, target_epoch, signing_root \
             FROM signed_attestations \
             WHERE validator_id = ? AND source_epoch > ? AND target_epoch < ? LIMIT 1",
        )
        .bind(validator_id)
        .bind(source_epoch as i64)
        .bind(target_epoch as i64)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row)
    }

    pub async fn insert(
        conn: &mut SqliteConnection,
        validator_id: i64,
        source_epoch: Epoch,
        target_epoch: Epoch,
        signing_root: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO signed_attestations \
             (validator_id, source_epoch, target_epoch, signing_root) VALUES (?, ?, ?, ?)",
        )
        .bind(validator_id)
        .bind(source_epoch as i64)
        .bind(target_epoch as i64)
        .bind(signing_root)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn for_validator(
        conn: &mut SqliteConnection,
        validator_id: i64,
    ) -> Result<Vec<SignedAttestationRow>> {
        let rows = sqlx::query_as::<_, SignedAttestationRow>(
            "SELECT validator_id, source_epoch, target_epoch, signing_root \
             FROM signed_attestations WHERE validator_id = ? ORDER BY target_epoch ASC",
        )
        .bind(validator_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    pub async fn count_for_validator(
        conn: &mut SqliteConnection,
        validator_id: i64,
    ) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM signed_attestations WHERE validator_id = ?")
                .bind(validator_id)
                .fetch_one(&mut *conn)
                .await?;
        Ok(count.0)
    }

    /// Delete rows below `target_epoch`, always keeping the most recent row.
    pub async fn prune_below(
        conn: &mut SqliteConnection,
        validator_id: i64,
        target_epoch: Epoch,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM signed_attestations WHERE validator_id = ? AND target_epoch < ? \
             AND target_epoch < \
             (SELECT MAX(target_epoch) FROM signed_attestations WHERE validator_id = ?)",
        )
        .bind(validator_id)
        .bind(target_epoch as i64)
        .bind(validator_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Per-validator monotone minima of previously observed slot/epochs.
#[derive(Debug, Clone, Copy, Default, FromRow)]
pub struct LowWatermark {
    pub min_block_slot: Option<i64>,
    pub min_attestation_source_epoch: Option<i64>,
    pub min_attestation_target_epoch: Option<i64>,
}

pub struct LowWatermarkDao;

impl LowWatermarkDao {
    pub async fn get(
        conn: &mut SqliteConnection,
        validator_id: i64,
    ) -> Result<Option<LowWatermark>> {
        let row = sqlx::query_as::<_, LowWatermark>(
            "SELECT min_block_slot, min_attestation_source_epoch, min_attestation_target_epoch \
             FROM low_watermarks WHERE validator_id = ?",
        )
        .bind(validator_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row)
    }

    /// Raise the block-slot watermark; never lowers it.
    pub async fn raise_block_slot(
        conn: &mut SqliteConnection,
        validator_id: i64,
        slot: Slot,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO low_watermarks (validator_id, min_block_slot) VALUES (?, ?) \
             ON CONFLICT (validator_id) DO UPDATE SET \
             min_block_slot = MAX(COALESCE(min_block_slot, 0), excluded.min_block_slot)",
        )
        .bind(validator_id)
        .bind(slot as i64)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Raise the attestation watermarks; never lowers them.
    pub async fn raise_attestation_epochs(
        conn: &mut SqliteConnection,
        validator_id: i64,
        source_epoch: Epoch,
        target_epoch: Epoch,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO low_watermarks \
             (validator_id, min_attestation_source_epoch, min_attestation_target_epoch) \
             VALUES (?, ?, ?) \
             ON CONFLICT (validator_id) DO UPDATE SET \
             min_attestation_source_epoch = \
                 MAX(COALESCE(min_attestation_source_epoch, 0), excluded.min_attestation_source_epoch), \
             min_attestation_target_epoch = \
                 MAX(COALESCE(min_attestation_target_epoch, 0), excluded.min_attestation_target_epoch)",
        )
        .bind(validator_id)
        .bind(source_epoch as i64)
        .bind(target_epoch as i64)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

/// Global floor below which no signature is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct HighWatermark {
    pub slot: i64,
    pub epoch: i64,
}

pub struct MetadataDao;

impl MetadataDao {
    pub async fn genesis_validators_root(conn: &mut SqliteConnection) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT genesis_validators_root FROM metadata WHERE id = 1")
                .fetch_optional(&mut *conn)
                .await?;
        Ok(row.map(|(gvr,)| gvr))
    }

    /// Write-once insert: inserting a different root than the stored one fails.
    pub async fn insert_genesis_validators_root(
        conn: &mut SqliteConnection,
        genesis_validators_root: &str,
    ) -> Result<()> {
        match Self::genesis_validators_root(conn).await? {
            None => {
                sqlx::query("INSERT INTO metadata (id, genesis_validators_root) VALUES (1, ?)")
                    .bind(genesis_validators_root)
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            }
            Some(stored) if stored == genesis_validators_root => Ok(()),
            Some(stored) => Err(SignerError::StorageFailure(format!(
                "genesis validators root is write-once: stored {stored}, attempted {genesis_validators_root}"
            ))),
        }
    }

    pub async fn high_watermark(conn: &mut SqliteConnection) -> Result<Option<HighWatermark>> {
        let row: Option<(Option<i64>, Option<i64>)> = sqlx::query_as(
            "SELECT high_watermark_slot, high_watermark_epoch FROM metadata WHERE id = 1",
        )
        .fetch_optional(&mut *conn)
        .await?;
        Ok(match row {
            Some((Some(slot), Some(epoch))) => Some(HighWatermark { slot, epoch }),
            _ => None,
        })
    }

    /// Set the high watermark. Without a genesis validators root there is no
    /// metadata row to update, so zero rows are affected.
    pub async fn set_high_watermark(
        conn: &mut SqliteConnection,
        slot: Slot,
        epoch: Epoch,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE metadata SET high_watermark_slot = ?, high_watermark_epoch = ? WHERE id = 1",
        )
        .bind(slot as i64)
        .bind(epoch as i64)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_high_watermark(conn: &mut SqliteConnection) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE metadata SET high_watermark_slot = NULL, high_watermark_epoch = NULL \
             WHERE id = 1",
        )
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }
}
