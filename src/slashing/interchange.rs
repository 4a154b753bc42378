//! EIP-3076 slashing-protection interchange import and export.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::io::Write;
use tracing::{info, warn};

use super::dao::{
    LowWatermarkDao, MetadataDao, SignedAttestationRow, SignedAttestationsDao, SignedBlockRow,
    SignedBlocksDao, ValidatorsDao,
};
use crate::domain::{normalise_identifier, string_u64};
use crate::error::{Result, SignerError};

pub const INTERCHANGE_FORMAT_VERSION: &str = "5";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterchangeMetadata {
    pub interchange_format_version: String,
    pub genesis_validators_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterchangeBlock {
    #[serde(with = "string_u64")]
    pub slot: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_root: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterchangeAttestation {
    #[serde(with = "string_u64")]
    pub source_epoch: u64,
    #[serde(with = "string_u64")]
    pub target_epoch: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_root: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterchangeValidator {
    pub pubkey: String,
    pub signed_blocks: Vec<InterchangeBlock>,
    pub signed_attestations: Vec<InterchangeAttestation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterchangeDocument {
    pub metadata: InterchangeMetadata,
    pub data: Vec<InterchangeValidator>,
}

/// What an import did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub validators: usize,
    pub imported_blocks: usize,
    pub imported_attestations: usize,
    pub duplicates_skipped: usize,
    pub errors: usize,
}

/// Import an interchange document.
///
/// The stored genesis validators root must match the document's (it is
/// inserted when absent); a mismatch fails the whole import. Entries are
/// filtered through the slashing rules against the current low watermark;
/// duplicates are skipped silently, conflicts are counted as errors and the
/// first-seen row wins. The low watermark only ever rises.
pub async fn import_interchange(
    pool: &SqlitePool,
    document: &InterchangeDocument,
) -> Result<ImportReport> {
    if document.metadata.interchange_format_version != INTERCHANGE_FORMAT_VERSION {
        return Err(SignerError::BadRequest(format!(
            "unsupported interchange format version: {}",
            document.metadata.interchange_format_version
        )));
    }
    let incoming_gvr = normalise_identifier(&document.metadata.genesis_validators_root);

    let mut tx = pool.begin().await?;
    MetadataDao::insert_genesis_validators_root(&mut tx, &incoming_gvr).await?;

    let mut report = ImportReport::default();
    for validator in &document.data {
        let pubkey = normalise_identifier(&validator.pubkey);
        let validator_id = ValidatorsDao::register(&mut tx, &pubkey).await?;
        report.validators += 1;

        let watermark = LowWatermarkDao::get(&mut tx, validator_id)
            .await?
            .unwrap_or_default();

        for block in &validator.signed_blocks {
            let root = block.signing_root.as_deref().map(normalise_identifier);
            if let Some(min_slot) = watermark.min_block_slot {
                if (block.slot as i64) <= min_slot {
                    report.errors += 1;
                    continue;
                }
            }
            let existing = SignedBlocksDao::find_at_slot(&mut tx, validator_id, block.slot).await?;
            match block_disposition(&existing, root.as_deref()) {
                Disposition::Insert => {
                    SignedBlocksDao::insert(&mut tx, validator_id, block.slot, root.as_deref())
                        .await?;
                    report.imported_blocks += 1;
                }
                Disposition::Duplicate => report.duplicates_skipped += 1,
                Disposition::Conflict => {
                    warn!(pubkey = %pubkey, slot = block.slot, "conflicting block in interchange, keeping first-seen");
                    report.errors += 1;
                }
            }
        }

        for attestation in &validator.signed_attestations {
            let root = attestation.signing_root.as_deref().map(normalise_identifier);
            if attestation.source_epoch >= attestation.target_epoch {
                report.errors += 1;
                continue;
            }
            if let Some(min_target) = watermark.min_attestation_target_epoch {
                if (attestation.target_epoch as i64) <= min_target {
                    report.errors += 1;
                    continue;
                }
            }
            if let Some(min_source) = watermark.min_attestation_source_epoch {
                if (attestation.source_epoch as i64) < min_source {
                    report.errors += 1;
                    continue;
                }
            }
            let existing =
                SignedAttestationsDao::find_at_target(&mut tx, validator_id, attestation.target_epoch)
                    .await?;
            match attestation_disposition(&existing, root.as_deref()) {
                Disposition::Insert => {
                    if SignedAttestationsDao::find_surrounding(
                        &mut tx,
                        validator_id,
                        attestation.source_epoch,
                        attestation.target_epoch,
                    )
                    .await?
                    .is_some()
                        || SignedAttestationsDao::find_surrounded(
                            &mut tx,
                            validator_id,
                            attestation.source_epoch,
                            attestation.target_epoch,
                        )
                        .await?
                        .is_some()
                    {
                        warn!(
                            pubkey = %pubkey,
                            source = attestation.source_epoch,
                            target = attestation.target_epoch,
                            "surround conflict in interchange"
                        );
                        report.errors += 1;
                        continue;
                    }
                    SignedAttestationsDao::insert(
                        &mut tx,
                        validator_id,
                        attestation.source_epoch,
                        attestation.target_epoch,
                        root.as_deref(),
                    )
                    .await?;
                    report.imported_attestations += 1;
                }
                Disposition::Duplicate => report.duplicates_skipped += 1,
                Disposition::Conflict => {
                    warn!(
                        pubkey = %pubkey,
                        target = attestation.target_epoch,
                        "conflicting attestation in interchange, keeping first-seen"
                    );
                    report.errors += 1;
                }
            }
        }

        // the import never lowers a low watermark, only raises it
        if let Some(min_slot) = validator.signed_blocks.iter().map(|b| b.slot).min() {
            LowWatermarkDao::raise_block_slot(&mut tx, validator_id, min_slot).await?;
        }
        let min_source = validator.signed_attestations.iter().map(|a| a.source_epoch).min();
        let min_target = validator.signed_attestations.iter().map(|a| a.target_epoch).min();
        if let (Some(source), Some(target)) = (min_source, min_target) {
            LowWatermarkDao::raise_attestation_epochs(&mut tx, validator_id, source, target).await?;
        }
    }

    tx.commit().await?;
    info!(
        validators = report.validators,
        blocks = report.imported_blocks,
        attestations = report.imported_attestations,
        errors = report.errors,
        "interchange import complete"
    );
    Ok(report)
}

enum Disposition {
    Insert,
    Duplicate,
    Conflict,
}

fn block_disposition(existing: &[SignedBlockRow], root: Option<&str>) -> Disposition {
    if existing.is_empty() {
        return Disposition::Insert;
    }
    for row in existing {
        match (&row.signing_root, root) {
            (Some(stored), Some(incoming)) if stored == incoming => return Disposition::Duplicate,
            (None, _) | (_, None) => return Disposition::Duplicate,
            _ => {}
        }
    }
    Disposition::Conflict
}

fn attestation_disposition(existing: &[SignedAttestationRow], root: Option<&str>) -> Disposition {
    if existing.is_empty() {
        return Disposition::Insert;
    }
    for row in existing {
        match (&row.signing_root, root) {
            (Some(stored), Some(incoming)) if stored == incoming => return Disposition::Duplicate,
            (None, _) | (_, None) => return Disposition::Duplicate,
            _ => {}
        }
    }
    Disposition::Conflict
}

/// Export the whole store, sorted by validator public key, slot, and target
/// epoch.
pub async fn export_interchange(pool: &SqlitePool) -> Result<InterchangeDocument> {
    let mut conn = pool.acquire().await?;
    let genesis_validators_root = MetadataDao::genesis_validators_root(&mut conn)
        .await?
        .ok_or_else(|| {
            SignerError::StorageFailure(
                "cannot export: no genesis validators root registered".to_string(),
            )
        })?;

    let mut data = Vec::new();
    for validator in ValidatorsDao::list(&mut conn).await? {
        data.push(collect_validator(&mut conn, validator.id, validator.public_key).await?);
    }

    Ok(InterchangeDocument {
        metadata: InterchangeMetadata {
            interchange_format_version: INTERCHANGE_FORMAT_VERSION.to_string(),
            genesis_validators_root,
        },
        data,
    })
}

async fn collect_validator(
    conn: &mut sqlx::SqliteConnection,
    validator_id: i64,
    pubkey: String,
) -> Result<InterchangeValidator> {
    let signed_blocks = SignedBlocksDao::for_validator(conn, validator_id)
        .await?
        .into_iter()
        .map(|row| InterchangeBlock {
            slot: row.slot as u64,
            signing_root: row.signing_root,
        })
        .collect();
    let signed_attestations = SignedAttestationsDao::for_validator(conn, validator_id)
        .await?
        .into_iter()
        .map(|row| InterchangeAttestation {
            source_epoch: row.source_epoch as u64,
            target_epoch: row.target_epoch as u64,
            signing_root: row.signing_root,
        })
        .collect();
    Ok(InterchangeValidator {
        pubkey,
        signed_blocks,
        signed_attestations,
    })
}

/// Streams an interchange document one validator at a time, writing the
/// outer envelope around the validator array.
pub struct IncrementalExporter<W: Write> {
    writer: W,
    wrote_validator: bool,
}

impl<W: Write> IncrementalExporter<W> {
    /// Start the envelope.
    pub fn new(mut writer: W, genesis_validators_root: &str) -> Result<Self> {
        let metadata = InterchangeMetadata {
            interchange_format_version: INTERCHANGE_FORMAT_VERSION.to_string(),
            genesis_validators_root: genesis_validators_root.to_string(),
        };
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| SignerError::Internal(format!("encode interchange metadata: {e}")))?;
        write!(writer, "{{\"metadata\":{metadata_json},\"data\":[")?;
        Ok(Self {
            writer,
            wrote_validator: false,
        })
    }

    /// Append one validator's history.
    pub async fn export_validator(&mut self, pool: &SqlitePool, public_key: &str) -> Result<()> {
        let pubkey = normalise_identifier(public_key);
        let mut conn = pool.acquire().await?;
        let Some(record) = ValidatorsDao::find(&mut conn, &pubkey).await? else {
            return Err(SignerError::SignerNotFound(pubkey));
        };
        let validator = collect_validator(&mut conn, record.id, record.public_key).await?;
        let validator_json = serde_json::to_string(&validator)
            .map_err(|e| SignerError::Internal(format!("encode interchange validator: {e}")))?;
        if self.wrote_validator {
            write!(self.writer, ",")?;
        }
        write!(self.writer, "{validator_json}")?;
        self.wrote_validator = true;
        Ok(())
    }

    /// Close the envelope and hand the writer back.
    pub fn finish(mut self) -> Result<W> {
        write!(self.writer, "]}}")?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}
