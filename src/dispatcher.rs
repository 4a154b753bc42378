//! Per-domain sign orchestration.
//!
//! Threads each request through identifier normalisation, registry lookup,
//! the slashing rule engine (consensus block/attestation domains only), and
//! signer dispatch. The registry snapshot is cloned before any database or
//! backend call, so no read lock is held across a suspension point.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::crypto::ssz;
use crate::domain::{
    hash256_from_hex, hex_bytes4, hex_hash256, normalise_identifier, string_u64, Epoch, Hash256,
    KeyType, Slot,
};
use crate::error::{Result, SignerError};
use crate::signing::{
    commit_boost_signing_root, ArtifactSigner, ProxyKeyGenerator, ProxyScheme, SignerRegistry,
};
use crate::slashing::{SlashingCheck, SlashingProtection};

const SLOTS_PER_EPOCH: u64 = 32;

const DOMAIN_BEACON_PROPOSER: [u8; 4] = [0, 0, 0, 0];
const DOMAIN_BEACON_ATTESTER: [u8; 4] = [1, 0, 0, 0];
const DOMAIN_RANDAO: [u8; 4] = [2, 0, 0, 0];
const DOMAIN_VOLUNTARY_EXIT: [u8; 4] = [4, 0, 0, 0];
const DOMAIN_SELECTION_PROOF: [u8; 4] = [5, 0, 0, 0];

#[derive(Debug, Clone, Deserialize)]
pub struct Fork {
    #[serde(with = "hex_bytes4")]
    pub previous_version: [u8; 4],
    #[serde(with = "hex_bytes4")]
    pub current_version: [u8; 4],
    #[serde(with = "string_u64")]
    pub epoch: Epoch,
}

impl Fork {
    fn version_at(&self, epoch: Epoch) -> [u8; 4] {
        if epoch < self.epoch {
            self.previous_version
        } else {
            self.current_version
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForkInfo {
    pub fork: Fork,
    #[serde(with = "hex_hash256")]
    pub genesis_validators_root: Hash256,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Checkpoint {
    #[serde(with = "string_u64")]
    pub epoch: Epoch,
    #[serde(with = "hex_hash256")]
    pub root: Hash256,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttestationData {
    #[serde(with = "string_u64")]
    pub slot: Slot,
    #[serde(with = "string_u64")]
    pub index: u64,
    #[serde(with = "hex_hash256")]
    pub beacon_block_root: Hash256,
    pub source: Checkpoint,
    pub target: Checkpoint,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeaconBlockHeader {
    #[serde(with = "string_u64")]
    pub slot: Slot,
    #[serde(with = "string_u64")]
    pub proposer_index: u64,
    #[serde(with = "hex_hash256")]
    pub parent_root: Hash256,
    #[serde(with = "hex_hash256")]
    pub state_root: Hash256,
    #[serde(with = "hex_hash256")]
    pub body_root: Hash256,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeaconBlockWrapper {
    #[serde(default)]
    pub version: Option<String>,
    pub block_header: BeaconBlockHeader,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregationSlot {
    #[serde(with = "string_u64")]
    pub slot: Slot,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RandaoReveal {
    #[serde(with = "string_u64")]
    pub epoch: Epoch,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoluntaryExit {
    #[serde(with = "string_u64")]
    pub epoch: Epoch,
    #[serde(with = "string_u64")]
    pub validator_index: u64,
}

/// A consensus-layer sign request body, discriminated by `type`.
#[derive(Debug, Clone, Deserialize)]
pub struct Eth2SignRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub fork_info: Option<ForkInfo>,
    #[serde(default, rename = "signingRoot")]
    pub signing_root: Option<String>,
    #[serde(default)]
    pub beacon_block: Option<BeaconBlockWrapper>,
    #[serde(default)]
    pub attestation: Option<AttestationData>,
    #[serde(default)]
    pub aggregation_slot: Option<AggregationSlot>,
    #[serde(default)]
    pub randao_reveal: Option<RandaoReveal>,
    #[serde(default)]
    pub voluntary_exit: Option<VoluntaryExit>,
}

/// Commit-Boost `request_signature` body.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitBoostSignRequest {
    #[serde(rename = "type")]
    pub kind: CommitBoostSignerKind,
    pub pubkey: String,
    #[serde(with = "hex_hash256")]
    pub object_root: Hash256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitBoostSignerKind {
    Consensus,
    ProxyBls,
    ProxyEcdsa,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxyKeyMessage {
    pub delegator: String,
    pub proxy: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateProxyKeyResponse {
    pub message: ProxyKeyMessage,
    pub signature: String,
}

/// Commit-Boost context: fork version and genesis validators root used for
/// delegation signing roots, plus the keystore-writing generator.
pub struct CommitBoostContext {
    pub generator: Arc<ProxyKeyGenerator>,
    pub genesis_fork_version: [u8; 4],
    pub genesis_validators_root: Hash256,
}

/// The sign dispatcher.
pub struct SignDispatcher {
    registry: Arc<SignerRegistry>,
    slashing: Option<Arc<SlashingProtection>>,
    commit_boost: Option<CommitBoostContext>,
}

impl SignDispatcher {
    pub fn new(
        registry: Arc<SignerRegistry>,
        slashing: Option<Arc<SlashingProtection>>,
        commit_boost: Option<CommitBoostContext>,
    ) -> Self {
        Self {
            registry,
            slashing,
            commit_boost,
        }
    }

    pub fn registry(&self) -> &Arc<SignerRegistry> {
        &self.registry
    }

    pub fn slashing(&self) -> Option<&Arc<SlashingProtection>> {
        self.slashing.as_ref()
    }

    /// Sign a consensus-layer request. Blocks and attestations pass the
    /// slashing rule engine before the signer is invoked.
    #[instrument(skip(self, request), fields(kind = %request.kind))]
    pub async fn sign_eth2(&self, identifier: &str, request: Eth2SignRequest) -> Result<String> {
        let identifier = normalise_identifier(identifier);
        let signer = self
            .registry
            .get(&identifier)
            .ok_or_else(|| SignerError::SignerNotFound(identifier.clone()))?;

        let signing_root = match request.kind.as_str() {
            "BLOCK" | "BLOCK_V2" => {
                let fork_info = require_fork_info(&request)?;
                let block = request.beacon_block.as_ref().ok_or_else(|| {
                    SignerError::BadRequest("beacon_block is required for block requests".to_string())
                })?;
                let header = &block.block_header;
                let object_root = ssz::beacon_block_header_root(
                    header.slot,
                    header.proposer_index,
                    &header.parent_root,
                    &header.state_root,
                    &header.body_root,
                );
                let root = signing_root_for(
                    fork_info,
                    DOMAIN_BEACON_PROPOSER,
                    header.slot / SLOTS_PER_EPOCH,
                    &object_root,
                );
                check_provided_root(&request, &root)?;
                self.check_block(&identifier, &root, header.slot, fork_info).await?;
                root
            }
            "ATTESTATION" => {
                let fork_info = require_fork_info(&request)?;
                let attestation = request.attestation.as_ref().ok_or_else(|| {
                    SignerError::BadRequest(
                        "attestation is required for attestation requests".to_string(),
                    )
                })?;
                let object_root = ssz::attestation_data_root(
                    attestation.slot,
                    attestation.index,
                    &attestation.beacon_block_root,
                    (attestation.source.epoch, attestation.source.root),
                    (attestation.target.epoch, attestation.target.root),
                );
                let root = signing_root_for(
                    fork_info,
                    DOMAIN_BEACON_ATTESTER,
                    attestation.target.epoch,
                    &object_root,
                );
                check_provided_root(&request, &root)?;
                self.check_attestation(
                    &identifier,
                    &root,
                    attestation.source.epoch,
                    attestation.target.epoch,
                    fork_info,
                )
                .await?;
                root
            }
            "AGGREGATION_SLOT" => {
                let fork_info = require_fork_info(&request)?;
                let aggregation = request.aggregation_slot.as_ref().ok_or_else(|| {
                    SignerError::BadRequest(
                        "aggregation_slot is required for aggregation slot requests".to_string(),
                    )
                })?;
                let object_root = ssz::hash_tree_root_u64(aggregation.slot);
                signing_root_for(
                    fork_info,
                    DOMAIN_SELECTION_PROOF,
                    aggregation.slot / SLOTS_PER_EPOCH,
                    &object_root,
                )
            }
            "RANDAO_REVEAL" => {
                let fork_info = require_fork_info(&request)?;
                let randao = request.randao_reveal.as_ref().ok_or_else(|| {
                    SignerError::BadRequest(
                        "randao_reveal is required for randao requests".to_string(),
                    )
                })?;
                let object_root = ssz::hash_tree_root_u64(randao.epoch);
                signing_root_for(fork_info, DOMAIN_RANDAO, randao.epoch, &object_root)
            }
            "VOLUNTARY_EXIT" => {
                let fork_info = require_fork_info(&request)?;
                let exit = request.voluntary_exit.as_ref().ok_or_else(|| {
                    SignerError::BadRequest(
                        "voluntary_exit is required for voluntary exit requests".to_string(),
                    )
                })?;
                let object_root = ssz::merkleize(vec![
                    ssz::hash_tree_root_u64(exit.epoch),
                    ssz::hash_tree_root_u64(exit.validator_index),
                ]);
                signing_root_for(fork_info, DOMAIN_VOLUNTARY_EXIT, exit.epoch, &object_root)
            }
            // every other request type must carry its signing root
            _ => parse_provided_root(&request)?.ok_or_else(|| {
                SignerError::BadRequest(format!(
                    "signingRoot is required for {} requests",
                    request.kind
                ))
            })?,
        };

        let signature = signer.sign(&signing_root).await?;
        Ok(signature.to_hex())
    }

    /// Sign raw execution-layer data. The signer applies the Keccak digest.
    pub async fn sign_eth1(&self, identifier: &str, data: &[u8]) -> Result<String> {
        let signer = self.lookup_eth1(identifier)?;
        let signature = signer.sign(data).await?;
        Ok(signature.to_hex())
    }

    /// Commit-Boost `request_signature`.
    pub async fn sign_commit_boost(&self, request: CommitBoostSignRequest) -> Result<String> {
        let context = self.commit_boost.as_ref().ok_or_else(|| {
            SignerError::BadRequest("commit boost API is not enabled".to_string())
        })?;

        let signer = match request.kind {
            CommitBoostSignerKind::Consensus => self
                .registry
                .get(&request.pubkey)
                .ok_or_else(|| SignerError::SignerNotFound(normalise_identifier(&request.pubkey)))?,
            CommitBoostSignerKind::ProxyBls | CommitBoostSignerKind::ProxyEcdsa => self
                .registry
                .get_proxy(&request.pubkey)
                .ok_or_else(|| SignerError::SignerNotFound(normalise_identifier(&request.pubkey)))?,
        };

        let domain = ssz::compute_domain(
            crate::signing::COMMIT_BOOST_DOMAIN_TYPE,
            context.genesis_fork_version,
            &context.genesis_validators_root,
        );
        let signing_root = ssz::compute_signing_root(&request.object_root, &domain);
        let signature = signer.sign(&signing_root).await?;
        Ok(signature.to_hex())
    }

    /// Commit-Boost `generate_proxy_key`: create, persist, and register a
    /// proxy key, then return the delegation message signed by the consensus
    /// key.
    pub async fn generate_proxy_key(
        &self,
        consensus_identifier: &str,
        scheme: ProxyScheme,
    ) -> Result<GenerateProxyKeyResponse> {
        let context = self.commit_boost.as_ref().ok_or_else(|| {
            SignerError::BadRequest("commit boost API is not enabled".to_string())
        })?;

        let consensus = normalise_identifier(consensus_identifier);
        let consensus_signer = self
            .registry
            .get(&consensus)
            .ok_or_else(|| SignerError::SignerNotFound(consensus.clone()))?;
        if consensus_signer.key_type() != KeyType::Bls {
            return Err(SignerError::BadRequest(
                "proxy keys can only delegate from a BLS consensus key".to_string(),
            ));
        }

        let proxy_signer = context.generator.generate(&consensus, scheme)?;
        let proxy = proxy_signer.identifier().to_string();
        self.registry.add_proxy(proxy_signer, &consensus).await?;
        info!(consensus = %consensus, proxy = %proxy, "generated proxy key");

        let delegator_bytes = hex::decode(crate::domain::strip_identifier(&consensus))
            .map_err(|e| SignerError::Internal(format!("consensus identifier: {e}")))?;
        let proxy_bytes = hex::decode(crate::domain::strip_identifier(&proxy))
            .map_err(|e| SignerError::Internal(format!("proxy identifier: {e}")))?;
        let signing_root = commit_boost_signing_root(
            &delegator_bytes,
            &proxy_bytes,
            context.genesis_fork_version,
            &context.genesis_validators_root,
        );
        let signature = consensus_signer.sign(&signing_root).await?;

        Ok(GenerateProxyKeyResponse {
            message: ProxyKeyMessage {
                delegator: consensus,
                proxy,
            },
            signature: signature.to_hex(),
        })
    }

    /// Execution-layer lookup: by public-key identifier, falling back to the
    /// Ethereum address form.
    pub fn lookup_eth1(&self, identifier: &str) -> Result<Arc<ArtifactSigner>> {
        let normalised = normalise_identifier(identifier);
        if let Some(signer) = self.registry.get(&normalised) {
            return Ok(signer);
        }
        self.registry
            .find_by_eth_address(&normalised)
            .ok_or(SignerError::SignerNotFound(normalised))
    }

    async fn check_block(
        &self,
        identifier: &str,
        signing_root: &Hash256,
        slot: Slot,
        fork_info: &ForkInfo,
    ) -> Result<()> {
        let Some(slashing) = &self.slashing else {
            return Ok(());
        };
        let check = slashing
            .may_sign_block(identifier, signing_root, slot, &fork_info.genesis_validators_root)
            .await?;
        match check {
            SlashingCheck::Permitted => Ok(()),
            SlashingCheck::Denied(reason) => Err(SignerError::SlashingRejected(reason.to_string())),
        }
    }

    async fn check_attestation(
        &self,
        identifier: &str,
        signing_root: &Hash256,
        source_epoch: Epoch,
        target_epoch: Epoch,
        fork_info: &ForkInfo,
    ) -> Result<()> {
        let Some(slashing) = &self.slashing else {
            return Ok(());
        };
        let check = slashing
            .may_sign_attestation(
                identifier,
                signing_root,
                source_epoch,
                target_epoch,
                &fork_info.genesis_validators_root,
            )
            .await?;
        match check {
            SlashingCheck::Permitted => Ok(()),
            SlashingCheck::Denied(reason) => Err(SignerError::SlashingRejected(reason.to_string())),
        }
    }
}

fn require_fork_info(request: &Eth2SignRequest) -> Result<&ForkInfo> {
    request.fork_info.as_ref().ok_or_else(|| {
        SignerError::BadRequest(format!("fork_info is required for {} requests", request.kind))
    })
}

fn signing_root_for(
    fork_info: &ForkInfo,
    domain_type: [u8; 4],
    epoch: Epoch,
    object_root: &Hash256,
) -> Hash256 {
    let fork_version = fork_info.fork.version_at(epoch);
    let domain = ssz::compute_domain(
        domain_type,
        fork_version,
        &fork_info.genesis_validators_root,
    );
    ssz::compute_signing_root(object_root, &domain)
}

fn parse_provided_root(request: &Eth2SignRequest) -> Result<Option<Hash256>> {
    match &request.signing_root {
        None => Ok(None),
        Some(raw) => hash256_from_hex(raw)
            .map(Some)
            .map_err(|e| SignerError::BadRequest(format!("signingRoot: {e}"))),
    }
}

/// When the client supplies a signing root alongside the object, the two
/// must agree.
fn check_provided_root(request: &Eth2SignRequest, computed: &Hash256) -> Result<()> {
    if let Some(provided) = parse_provided_root(request)? {
        if provided != *computed {
            return Err(SignerError::BadRequest(
                "provided signingRoot does not match the computed signing root".to_string(),
            ));
        }
    }
    Ok(())
}
