//! Periodic pruning of old slashing-protection rows.

use sqlx::SqlitePool;
use tracing::info;

use super::dao::{LowWatermarkDao, SignedAttestationsDao, SignedBlocksDao, ValidatorsDao};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub pruned_blocks: u64,
    pub pruned_attestations: u64,
}

/// Removes per-validator history that has fallen below the retention
/// horizon. The most recent row per validator is never removed.
pub struct Pruner {
    pool: SqlitePool,
    epochs_to_keep: u64,
    slots_per_epoch: u64,
}

impl Pruner {
    pub fn new(pool: SqlitePool, epochs_to_keep: u64, slots_per_epoch: u64) -> Self {
        Self {
            pool,
            epochs_to_keep,
            slots_per_epoch,
        }
    }

    pub async fn prune(&self) -> Result<PruneReport> {
        let mut report = PruneReport::default();
        let mut tx = self.pool.begin().await?;

        let validators = ValidatorsDao::list(&mut tx).await?;
        for validator in validators {
            let Some(watermark) = LowWatermarkDao::get(&mut tx, validator.id).await? else {
                continue;
            };

            if let Some(min_target) = watermark.min_attestation_target_epoch {
                let horizon = (min_target as u64).saturating_sub(self.epochs_to_keep);
                report.pruned_attestations +=
                    SignedAttestationsDao::prune_below(&mut tx, validator.id, horizon).await?;
            }
            if let Some(min_slot) = watermark.min_block_slot {
                let horizon = (min_slot as u64)
                    .saturating_sub(self.epochs_to_keep.saturating_mul(self.slots_per_epoch));
                report.pruned_blocks +=
                    SignedBlocksDao::prune_below(&mut tx, validator.id, horizon).await?;
            }
        }

        tx.commit().await?;
        info!(
            blocks = report.pruned_blocks,
            attestations = report.pruned_attestations,
            "pruning pass complete"
        );
        Ok(report)
    }
}
