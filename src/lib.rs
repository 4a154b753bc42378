//! Remote signing service for Ethereum validators.
//!
//! Operators keep validator private keys inside this service (sourced from
//! files, cloud vaults, or KMS backends) and clients request signatures
//! over an HTTP API. Consensus keys are guarded by durable slashing
//! protection: the service never produces two signatures that would
//! penalise a validator, even across restarts.
//!
//! ## Modules
//!
//! - [`domain`] - key types and identifier normalisation
//! - [`crypto`] - BLS/secp256k1 signing, SSZ merkleization, keystores
//! - [`signing`] - artifact signers, metadata loading, the signer registry
//! - [`slashing`] - the slashing-protection store and interchange
//! - [`dispatcher`] - per-domain sign orchestration
//! - [`keymanager`] - coordinated key import/removal
//! - [`jsonrpc`] - execution-layer JSON-RPC result providers
//! - [`api`] - HTTP routes and handlers
//! - [`server`] - configuration and bootstrap

pub mod api;
pub mod crypto;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod jsonrpc;
pub mod keymanager;
pub mod migrations;
pub mod server;
pub mod signing;
pub mod slashing;

// Re-export commonly used types
pub use domain::{normalise_identifier, Epoch, Hash256, KeyType, Slot};
pub use error::{Result, SignerError};
pub use signing::{ArtifactSignature, ArtifactSigner, SignerRegistry};
pub use slashing::{SlashingCheck, SlashingProtection};
