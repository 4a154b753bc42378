//! End-to-end signing flows through the dispatcher and registry.

mod common;

use std::sync::Arc;

use common::{bls_identifier, bls_pair, secp_identifier, test_gvr, test_store};
use sentinel_signer::crypto::bls::BlsKeyPair;
use sentinel_signer::crypto::ecdsa::SecpKeyPair;
use sentinel_signer::crypto::hash::eth_sign_prehash;
use sentinel_signer::dispatcher::{
    CommitBoostContext, CommitBoostSignRequest, Eth2SignRequest, SignDispatcher,
};
use sentinel_signer::domain::KeyType;
use sentinel_signer::error::SignerError;
use sentinel_signer::signing::{
    ArtifactSigner, CommitBoostParameters, MappedResults, ProxyKeyGenerator, ProxyScheme,
    SignerRegistry, SignerSupplier,
};

struct FixtureSupplier {
    bls_secrets: Vec<[u8; 32]>,
    secp_secrets: Vec<[u8; 32]>,
}

#[async_trait::async_trait]
impl SignerSupplier for FixtureSupplier {
    async fn supply(&self) -> MappedResults<ArtifactSigner> {
        let mut results = MappedResults::empty();
        for secret in &self.bls_secrets {
            results.add(ArtifactSigner::bls_local(
                BlsKeyPair::from_secret_bytes(secret).unwrap(),
            ));
        }
        for secret in &self.secp_secrets {
            results.add(ArtifactSigner::secp_local(
                SecpKeyPair::from_secret_bytes(secret).unwrap(),
                true,
                None,
            ));
        }
        results
    }
}

async fn registry_with(pair: &BlsKeyPair) -> Arc<SignerRegistry> {
    let registry = SignerRegistry::new(
        Arc::new(FixtureSupplier {
            bls_secrets: vec![pair.secret_key_bytes()],
            secp_secrets: vec![],
        }),
        None,
        false,
        None,
    );
    registry.load().await.unwrap();
    registry
}

fn block_request(slot: u64, body_root_tag: u8) -> Eth2SignRequest {
    serde_json::from_value(serde_json::json!({
        "type": "BLOCK_V2",
        "fork_info": {
            "fork": {
                "previous_version": "0x00000000",
                "current_version": "0x00000000",
                "epoch": "0",
            },
            "genesis_validators_root": common::gvr_hex(),
        },
        "beacon_block": {
            "version": "CAPELLA",
            "block_header": {
                "slot": slot.to_string(),
                "proposer_index": "11",
                "parent_root": format!("0x{}", hex::encode([1u8; 32])),
                "state_root": format!("0x{}", hex::encode([2u8; 32])),
                "body_root": format!("0x{}", hex::encode([body_root_tag; 32])),
            },
        },
    }))
    .unwrap()
}

#[tokio::test]
async fn block_sign_records_then_signs_and_repeats() {
    let (_dir, store) = test_store().await;
    let pair = bls_pair(1);
    let identifier = bls_identifier(&pair);
    let registry = registry_with(&pair).await;
    let dispatcher = SignDispatcher::new(registry, Some(store.clone()), None);

    let signature = dispatcher
        .sign_eth2(&identifier, block_request(10, 3))
        .await
        .unwrap();
    assert_eq!(signature.len(), 2 + 192);

    // same block again: idempotent accept, same signature
    let repeat = dispatcher
        .sign_eth2(&identifier, block_request(10, 3))
        .await
        .unwrap();
    assert_eq!(signature, repeat);

    // different body at the same slot: slashing rejection
    let conflict = dispatcher
        .sign_eth2(&identifier, block_request(10, 4))
        .await;
    assert!(matches!(conflict, Err(SignerError::SlashingRejected(_))));
}

#[tokio::test]
async fn attestation_sign_passes_rule_engine() {
    let (_dir, store) = test_store().await;
    let pair = bls_pair(2);
    let identifier = bls_identifier(&pair);
    let registry = registry_with(&pair).await;
    let dispatcher = SignDispatcher::new(registry, Some(store.clone()), None);

    let request = |source: u64, target: u64| -> Eth2SignRequest {
        serde_json::from_value(serde_json::json!({
            "type": "ATTESTATION",
            "fork_info": {
                "fork": {
                    "previous_version": "0x00000000",
                    "current_version": "0x00000000",
                    "epoch": "0",
                },
                "genesis_validators_root": common::gvr_hex(),
            },
            "attestation": {
                "slot": (target * 32).to_string(),
                "index": "0",
                "beacon_block_root": format!("0x{}", hex::encode([7u8; 32])),
                "source": {"epoch": source.to_string(), "root": format!("0x{}", hex::encode([8u8; 32]))},
                "target": {"epoch": target.to_string(), "root": format!("0x{}", hex::encode([9u8; 32]))},
            },
        }))
        .unwrap()
    };

    dispatcher.sign_eth2(&identifier, request(5, 6)).await.unwrap();

    let surround = dispatcher.sign_eth2(&identifier, request(4, 7)).await;
    assert!(matches!(surround, Err(SignerError::SlashingRejected(_))));
}

#[tokio::test]
async fn unknown_identifier_is_not_found() {
    let (_dir, store) = test_store().await;
    let pair = bls_pair(3);
    let registry = registry_with(&pair).await;
    let dispatcher = SignDispatcher::new(registry, Some(store), None);

    let missing = format!("0x{}", hex::encode([0xeeu8; 48]));
    let result = dispatcher.sign_eth2(&missing, block_request(1, 1)).await;
    assert!(matches!(result, Err(SignerError::SignerNotFound(_))));
}

#[tokio::test]
async fn identifier_lookup_is_case_insensitive() {
    let (_dir, store) = test_store().await;
    let pair = bls_pair(4);
    let identifier = bls_identifier(&pair).to_uppercase();
    let registry = registry_with(&pair).await;
    let dispatcher = SignDispatcher::new(registry, Some(store), None);

    // uppercase with 0X prefix resolves to the same signer
    dispatcher
        .sign_eth2(&identifier, block_request(2, 1))
        .await
        .unwrap();
}

#[tokio::test]
async fn generate_proxy_key_persists_registers_and_signs() {
    let (_dir, store) = test_store().await;
    let proxy_dir = tempfile::tempdir().unwrap();
    let password_file = proxy_dir.path().join("password.txt");
    std::fs::write(&password_file, "proxy-pass\n").unwrap();

    let pair = bls_pair(5);
    let consensus = bls_identifier(&pair);
    let registry = registry_with(&pair).await;

    let parameters = CommitBoostParameters {
        proxy_keystores_path: proxy_dir.path().join("proxies"),
        proxy_keystores_password_file: password_file,
        genesis_fork_version: [0, 0, 0, 0],
    };
    let context = CommitBoostContext {
        generator: Arc::new(ProxyKeyGenerator::new(parameters)),
        genesis_fork_version: [0, 0, 0, 0],
        genesis_validators_root: test_gvr(),
    };
    let dispatcher = SignDispatcher::new(registry.clone(), Some(store), Some(context));

    let response = dispatcher
        .generate_proxy_key(&consensus, ProxyScheme::Bls)
        .await
        .unwrap();
    assert_eq!(response.message.delegator, consensus);

    // the new key is a registered proxy of the consensus key
    let grouped = registry.proxy_identifiers(&consensus);
    assert!(grouped[&KeyType::Bls].contains(&response.message.proxy));

    // the delegation signature verifies under the consensus key
    let proxy_bytes = hex::decode(&response.message.proxy[2..]).unwrap();
    let signing_root = sentinel_signer::signing::commit_boost_signing_root(
        &pair.public_key_bytes(),
        &proxy_bytes,
        [0, 0, 0, 0],
        &test_gvr(),
    );
    let signature: [u8; 96] = hex::decode(&response.signature[2..])
        .unwrap()
        .try_into()
        .unwrap();
    assert!(BlsKeyPair::verify(
        &pair.public_key_bytes(),
        &signing_root,
        &signature
    ));

    // keystore landed under <root>/<consensus>/BLS/
    let keystore_path = proxy_dir
        .path()
        .join("proxies")
        .join(&consensus)
        .join("BLS")
        .join(format!("{}.json", response.message.proxy));
    assert!(keystore_path.exists());

    // request_signature with the proxy id succeeds
    let request: CommitBoostSignRequest = serde_json::from_value(serde_json::json!({
        "type": "proxy_bls",
        "pubkey": response.message.proxy,
        "object_root": format!("0x{}", hex::encode([0x33u8; 32])),
    }))
    .unwrap();
    let proxy_signature = dispatcher.sign_commit_boost(request).await.unwrap();
    assert_eq!(proxy_signature.len(), 2 + 192);
}

#[tokio::test]
async fn ecdsa_proxy_signature_is_canonical_compact() {
    let (_dir, store) = test_store().await;
    let proxy_dir = tempfile::tempdir().unwrap();
    let password_file = proxy_dir.path().join("password.txt");
    std::fs::write(&password_file, "proxy-pass\n").unwrap();

    let pair = bls_pair(6);
    let consensus = bls_identifier(&pair);
    let registry = registry_with(&pair).await;
    let context = CommitBoostContext {
        generator: Arc::new(ProxyKeyGenerator::new(CommitBoostParameters {
            proxy_keystores_path: proxy_dir.path().join("proxies"),
            proxy_keystores_password_file: password_file,
            genesis_fork_version: [0, 0, 0, 0],
        })),
        genesis_fork_version: [0, 0, 0, 0],
        genesis_validators_root: test_gvr(),
    };
    let dispatcher = SignDispatcher::new(registry.clone(), Some(store), Some(context));

    let response = dispatcher
        .generate_proxy_key(&consensus, ProxyScheme::Ecdsa)
        .await
        .unwrap();
    assert_eq!(registry.proxy_identifiers(&consensus)[&KeyType::Secp256k1].len(), 1);

    let request: CommitBoostSignRequest = serde_json::from_value(serde_json::json!({
        "type": "proxy_ecdsa",
        "pubkey": response.message.proxy,
        "object_root": format!("0x{}", hex::encode([0x44u8; 32])),
    }))
    .unwrap();
    let signature = dispatcher.sign_commit_boost(request).await.unwrap();
    // 64 bytes, no recovery byte
    assert_eq!(signature.len(), 2 + 128);

    // s is in the lower half of the curve order
    let bytes = hex::decode(&signature[2..]).unwrap();
    let parsed = k256::ecdsa::Signature::from_slice(&bytes).unwrap();
    assert!(parsed.normalize_s().is_none());
}

#[tokio::test]
async fn failed_delete_restores_enabled_flag() {
    use sentinel_signer::keymanager::{DeleteKeystoreStatus, DeleteKeystoresProcessor};
    use sentinel_signer::signing::KeystoreFileManager;

    let (_dir, store) = test_store().await;
    let pair = bls_pair(7);
    let identifier = bls_identifier(&pair);
    let registry = registry_with(&pair).await;

    store
        .register_validators(&[identifier.clone()])
        .await
        .unwrap();
    assert_eq!(store.is_enabled(&identifier).await.unwrap(), Some(true));

    // an undeletable keystore file: a non-empty directory in its place
    let files_dir = tempfile::tempdir().unwrap();
    let files = Arc::new(KeystoreFileManager::new(files_dir.path().to_path_buf()));
    let keystore = files.keystore_file(&identifier);
    std::fs::create_dir_all(keystore.join("nested")).unwrap();
    std::fs::write(keystore.join("nested").join("x"), "x").unwrap();

    let processor = DeleteKeystoresProcessor::new(registry, store.clone(), files);
    let (results, _interchange) = processor.delete(&[identifier.clone()]).await.unwrap();
    assert_eq!(results[0].status, DeleteKeystoreStatus::Error);
    assert!(results[0].message.contains("Error deleting keystore file:"));

    // the enabled flag equals its pre-call value
    assert_eq!(store.is_enabled(&identifier).await.unwrap(), Some(true));
}

#[tokio::test]
async fn eth1_sign_matches_local_keypair() {
    let secp = SecpKeyPair::generate();
    let secret = secp.secret_key_bytes();
    let identifier = secp_identifier(&secp);

    let registry = SignerRegistry::new(
        Arc::new(FixtureSupplier {
            bls_secrets: vec![],
            secp_secrets: vec![secret],
        }),
        None,
        false,
        None,
    );
    registry.load().await.unwrap();
    let dispatcher = SignDispatcher::new(registry, None, None);

    let payload = [0xde, 0xad, 0xbe, 0xaf];
    let signature_hex = dispatcher.sign_eth1(&identifier, &payload).await.unwrap();
    let bytes = hex::decode(&signature_hex[2..]).unwrap();
    assert_eq!(bytes.len(), 65);

    // r ‖ s equals a local deterministic signature over keccak256(payload)
    let prehash = sentinel_signer::crypto::hash::keccak256(&payload);
    let expected = secp.sign_prehash_eth1(&prehash, None).unwrap();
    assert_eq!(bytes.as_slice(), expected.as_slice());

    // the eth_sign prefix variant signs a different digest
    assert_ne!(prehash, eth_sign_prehash(&payload));
}
