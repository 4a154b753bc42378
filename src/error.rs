//! Error types for the signing service.
//!
//! One sum covers every "fails with" contract; rule-engine rejections are a
//! normal return value, not an error, and only become `SlashingRejected`
//! when a sign request is actually refused.

use thiserror::Error;

use crate::crypto::CryptoError;

/// Errors that can occur across the signing service.
#[derive(Debug, Error)]
pub enum SignerError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Request payload malformed or inconsistent
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No signer loaded for the identifier
    #[error("no signer loaded for identifier '{0}'")]
    SignerNotFound(String),

    /// A signer exists but cannot currently produce signatures
    #[error("signer unavailable: {0}")]
    SignerUnavailable(String),

    /// The slashing-protection rules refused the signature
    #[error("slashing protection rejected the request: {0}")]
    SlashingRejected(String),

    /// Durable store failure outside of plain sqlx errors
    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// Vault / KMS backend unreachable or misbehaving
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Key metadata file could not be parsed
    #[error("metadata parse error: {0}")]
    MetadataParse(String),

    /// Keystore present but could not be decrypted
    #[error("keystore decrypt error: {0}")]
    KeystoreDecrypt(String),

    /// Cryptographic failure
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias used throughout the service.
pub type Result<T> = std::result::Result<T, SignerError>;
