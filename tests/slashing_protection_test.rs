//! Slashing-protection rule engine integration tests.

mod common;

use common::{test_gvr, test_store};
use sentinel_signer::slashing::{DenialReason, Pruner, SlashingCheck};

const VALIDATOR: &str = "0xb845089a1457f811bfc000588fbb4e713669be8ce060ea6be3c6ece09afc3794fe22c6c0e5b7b90e8c3a2b9ce85e2a49";

fn root(tag: u8) -> [u8; 32] {
    let mut root = [0u8; 32];
    root[31] = tag;
    root
}

#[tokio::test]
async fn block_accept_resign_and_conflict() {
    let (_dir, store) = test_store().await;

    // accept at slot 10
    let check = store
        .may_sign_block(VALIDATOR, &root(0x0b), 10, &test_gvr())
        .await
        .unwrap();
    assert_eq!(check, SlashingCheck::Permitted);

    // immediate re-sign of the same (slot, root) is idempotent
    let check = store
        .may_sign_block(VALIDATOR, &root(0x0b), 10, &test_gvr())
        .await
        .unwrap();
    assert_eq!(check, SlashingCheck::Permitted);

    // a different root at the same slot is slashable
    let check = store
        .may_sign_block(VALIDATOR, &root(0x0c), 10, &test_gvr())
        .await
        .unwrap();
    assert_eq!(
        check,
        SlashingCheck::Denied(DenialReason::ConflictingBlock { slot: 10 })
    );

    // the accepted sequence holds exactly one row for slot 10
    let document = sentinel_signer::slashing::export_interchange(store.pool())
        .await
        .unwrap();
    let blocks = &document.data[0].signed_blocks;
    assert_eq!(blocks.iter().filter(|b| b.slot == 10).count(), 1);
}

#[tokio::test]
async fn attestation_surround_rules() {
    let (_dir, store) = test_store().await;

    // accept (source=5, target=6)
    let check = store
        .may_sign_attestation(VALIDATOR, &root(0x12), 5, 6, &test_gvr())
        .await
        .unwrap();
    assert_eq!(check, SlashingCheck::Permitted);

    // (4, 7) surrounds the existing (5, 6)
    let check = store
        .may_sign_attestation(VALIDATOR, &root(0x13), 4, 7, &test_gvr())
        .await
        .unwrap();
    assert_eq!(check, SlashingCheck::Denied(DenialReason::SurroundsExisting));

    // (5, 7) with a different root does not conflict
    let check = store
        .may_sign_attestation(VALIDATOR, &root(0x14), 5, 7, &test_gvr())
        .await
        .unwrap();
    assert_eq!(check, SlashingCheck::Permitted);

    // source must precede target
    let check = store
        .may_sign_attestation(VALIDATOR, &root(0x15), 6, 6, &test_gvr())
        .await
        .unwrap();
    assert_eq!(check, SlashingCheck::Denied(DenialReason::SourceNotBeforeTarget));

    // widen the history, then request inside the widest vote
    let check = store
        .may_sign_attestation(VALIDATOR, &root(0x16), 5, 10, &test_gvr())
        .await
        .unwrap();
    assert_eq!(check, SlashingCheck::Permitted);

    let check = store
        .may_sign_attestation(VALIDATOR, &root(0x17), 6, 8, &test_gvr())
        .await
        .unwrap();
    assert_eq!(check, SlashingCheck::Denied(DenialReason::SurroundedByExisting));
}

#[tokio::test]
async fn same_target_different_root_is_denied() {
    let (_dir, store) = test_store().await;

    assert_eq!(
        store
            .may_sign_attestation(VALIDATOR, &root(1), 5, 6, &test_gvr())
            .await
            .unwrap(),
        SlashingCheck::Permitted
    );
    assert_eq!(
        store
            .may_sign_attestation(VALIDATOR, &root(2), 5, 6, &test_gvr())
            .await
            .unwrap(),
        SlashingCheck::Denied(DenialReason::ConflictingAttestation { target_epoch: 6 })
    );
    // the same root is an idempotent repeat
    assert_eq!(
        store
            .may_sign_attestation(VALIDATOR, &root(1), 5, 6, &test_gvr())
            .await
            .unwrap(),
        SlashingCheck::Permitted
    );
}

#[tokio::test]
async fn genesis_validators_root_gates_all_signing() {
    let (_dir, store) = test_store().await;

    let wrong_gvr = [0x99u8; 32];
    let check = store
        .may_sign_block(VALIDATOR, &root(1), 10, &wrong_gvr)
        .await
        .unwrap();
    assert_eq!(
        check,
        SlashingCheck::Denied(DenialReason::GenesisValidatorsRootMismatch)
    );

    // the stored root is write-once
    assert!(store.register_genesis_validators_root(&test_gvr()).await.is_ok());
    assert!(store.register_genesis_validators_root(&wrong_gvr).await.is_err());
}

#[tokio::test]
async fn disabled_validator_cannot_sign() {
    let (_dir, store) = test_store().await;

    store
        .register_validators(&[VALIDATOR.to_string()])
        .await
        .unwrap();
    assert_eq!(store.set_enabled(VALIDATOR, false).await.unwrap(), 1);

    let check = store
        .may_sign_block(VALIDATOR, &root(1), 10, &test_gvr())
        .await
        .unwrap();
    assert_eq!(check, SlashingCheck::Denied(DenialReason::ValidatorDisabled));

    assert_eq!(store.set_enabled(VALIDATOR, true).await.unwrap(), 1);
    let check = store
        .may_sign_block(VALIDATOR, &root(1), 10, &test_gvr())
        .await
        .unwrap();
    assert_eq!(check, SlashingCheck::Permitted);
}

#[tokio::test]
async fn high_watermark_blocks_signing_at_or_below() {
    let (_dir, store) = test_store().await;

    assert_eq!(store.set_high_watermark(100, 3).await.unwrap(), 1);

    let check = store
        .may_sign_block(VALIDATOR, &root(1), 100, &test_gvr())
        .await
        .unwrap();
    assert_eq!(check, SlashingCheck::Denied(DenialReason::BelowHighWatermark));

    let check = store
        .may_sign_block(VALIDATOR, &root(1), 101, &test_gvr())
        .await
        .unwrap();
    assert_eq!(check, SlashingCheck::Permitted);

    let check = store
        .may_sign_attestation(VALIDATOR, &root(2), 2, 3, &test_gvr())
        .await
        .unwrap();
    assert_eq!(check, SlashingCheck::Denied(DenialReason::BelowHighWatermark));

    let check = store
        .may_sign_attestation(VALIDATOR, &root(2), 2, 4, &test_gvr())
        .await
        .unwrap();
    assert_eq!(check, SlashingCheck::Permitted);

    assert_eq!(store.delete_high_watermark().await.unwrap(), 1);
    let check = store
        .may_sign_block(VALIDATOR, &root(1), 50, &test_gvr())
        .await
        .unwrap();
    assert_eq!(check, SlashingCheck::Permitted);
}

#[tokio::test]
async fn high_watermark_requires_genesis_validators_root() {
    let (_dir, pool) = common::test_db().await;
    let store = sentinel_signer::slashing::SlashingProtection::new(pool);

    // no metadata row yet: the update affects zero rows
    assert_eq!(store.set_high_watermark(100, 3).await.unwrap(), 0);
    assert!(store.high_watermark().await.unwrap().is_none());
}

#[tokio::test]
async fn low_watermark_from_import_rejects_older_requests() {
    let (_dir, store) = test_store().await;

    // import raises the low watermark to (slot 5, source 2, target 3)
    let document: sentinel_signer::slashing::InterchangeDocument = serde_json::from_value(
        serde_json::json!({
            "metadata": {
                "interchange_format_version": "5",
                "genesis_validators_root": common::gvr_hex(),
            },
            "data": [{
                "pubkey": VALIDATOR,
                "signed_blocks": [{"slot": "5"}],
                "signed_attestations": [{"source_epoch": "2", "target_epoch": "3"}],
            }],
        }),
    )
    .unwrap();
    sentinel_signer::slashing::import_interchange(store.pool(), &document)
        .await
        .unwrap();

    // at or below the block watermark
    assert_eq!(
        store
            .may_sign_block(VALIDATOR, &root(1), 5, &test_gvr())
            .await
            .unwrap(),
        SlashingCheck::Denied(DenialReason::BelowLowWatermark)
    );
    assert_eq!(
        store
            .may_sign_block(VALIDATOR, &root(1), 10, &test_gvr())
            .await
            .unwrap(),
        SlashingCheck::Permitted
    );

    // below the source watermark
    assert_eq!(
        store
            .may_sign_attestation(VALIDATOR, &root(2), 1, 9, &test_gvr())
            .await
            .unwrap(),
        SlashingCheck::Denied(DenialReason::BelowLowWatermark)
    );
    // at or below the target watermark
    assert_eq!(
        store
            .may_sign_attestation(VALIDATOR, &root(2), 2, 3, &test_gvr())
            .await
            .unwrap(),
        SlashingCheck::Denied(DenialReason::BelowLowWatermark)
    );
    assert_eq!(
        store
            .may_sign_attestation(VALIDATOR, &root(2), 2, 9, &test_gvr())
            .await
            .unwrap(),
        SlashingCheck::Permitted
    );
}

#[tokio::test]
async fn pruning_keeps_most_recent_row() {
    let (_dir, store) = test_store().await;

    for slot in [10u64, 20, 30] {
        assert_eq!(
            store
                .may_sign_block(VALIDATOR, &root(slot as u8), slot, &test_gvr())
                .await
                .unwrap(),
            SlashingCheck::Permitted
        );
    }

    // raise the watermark well past the history, then prune with no margin
    let document: sentinel_signer::slashing::InterchangeDocument = serde_json::from_value(
        serde_json::json!({
            "metadata": {
                "interchange_format_version": "5",
                "genesis_validators_root": common::gvr_hex(),
            },
            "data": [{
                "pubkey": VALIDATOR,
                "signed_blocks": [{"slot": "100"}],
                "signed_attestations": [],
            }],
        }),
    )
    .unwrap();
    sentinel_signer::slashing::import_interchange(store.pool(), &document)
        .await
        .unwrap();

    let pruner = Pruner::new(store.pool().clone(), 0, 1);
    let report = pruner.prune().await.unwrap();
    assert!(report.pruned_blocks >= 2);

    let document = sentinel_signer::slashing::export_interchange(store.pool())
        .await
        .unwrap();
    let slots: Vec<u64> = document.data[0].signed_blocks.iter().map(|b| b.slot).collect();
    // the most recent row survives every pruning pass
    assert!(slots.contains(&100));
}
