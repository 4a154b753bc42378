//! Slashing protection: durable per-validator signing history and the
//! anti-slashing decision procedure.

mod dao;
mod engine;
mod interchange;
mod pruner;
mod validator_manager;

pub use dao::{
    HighWatermark, LowWatermark, LowWatermarkDao, MetadataDao, SignedAttestationRow,
    SignedAttestationsDao, SignedBlockRow, SignedBlocksDao, ValidatorRecord, ValidatorsDao,
};
pub use engine::{DenialReason, SlashingCheck, SlashingProtection};
pub use interchange::{
    export_interchange, import_interchange, ImportReport, IncrementalExporter,
    InterchangeAttestation, InterchangeBlock, InterchangeDocument, InterchangeMetadata,
    InterchangeValidator, INTERCHANGE_FORMAT_VERSION,
};
pub use pruner::{PruneReport, Pruner};
pub use validator_manager::DbValidatorManager;

/// Open a SQLite-backed slashing database and run migrations.
pub async fn open_database(url: &str) -> crate::error::Result<sqlx::SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await?;
    crate::migrations::run(&pool).await?;
    Ok(pool)
}
