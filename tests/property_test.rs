//! Property-based tests using proptest.
//!
//! These verify invariants that should hold for any valid input.

use proptest::prelude::*;

use sentinel_signer::crypto::ecdsa::SecpKeyPair;
use sentinel_signer::crypto::hash::{eth_sign_prehash, keccak256};
use sentinel_signer::crypto::ssz;
use sentinel_signer::domain::normalise_identifier;

fn arb_hex_identifier() -> impl Strategy<Value = String> {
    (proptest::collection::vec(any::<u8>(), 1..64), any::<bool>(), any::<bool>()).prop_map(
        |(bytes, prefix, upper)| {
            let mut hex_str = hex::encode(bytes);
            if upper {
                hex_str = hex_str.to_uppercase();
            }
            if prefix {
                format!("0x{hex_str}")
            } else {
                hex_str
            }
        },
    )
}

proptest! {
    /// Normalisation is idempotent and case/prefix-insensitive.
    #[test]
    fn identifier_normalisation_is_canonical(raw in arb_hex_identifier()) {
        let normalised = normalise_identifier(&raw);
        prop_assert!(normalised.starts_with("0x"));
        prop_assert_eq!(normalise_identifier(&normalised), normalised.clone());
        prop_assert_eq!(normalise_identifier(&raw.to_uppercase()), normalised.clone());
        prop_assert_eq!(normalise_identifier(&raw.to_lowercase()), normalised);
    }

    /// The eth_sign prefix binds the message length.
    #[test]
    fn eth_sign_prehash_differs_from_bare_keccak(message in proptest::collection::vec(any::<u8>(), 0..256)) {
        prop_assert_ne!(eth_sign_prehash(&message), keccak256(&message));
    }

    /// Merkleization is deterministic and order-sensitive.
    #[test]
    fn merkleize_is_deterministic(chunks in proptest::collection::vec(any::<[u8; 32]>(), 1..16)) {
        let once = ssz::merkleize(chunks.clone());
        let twice = ssz::merkleize(chunks.clone());
        prop_assert_eq!(once, twice);

        if chunks.len() > 1 && chunks[0] != chunks[1] {
            let mut swapped = chunks;
            swapped.swap(0, 1);
            prop_assert_ne!(ssz::merkleize(swapped), once);
        }
    }

    /// Domains for different domain types never collide.
    #[test]
    fn domains_are_separated(gvr in any::<[u8; 32]>(), version in any::<[u8; 4]>()) {
        let proposer = ssz::compute_domain([0, 0, 0, 0], version, &gvr);
        let attester = ssz::compute_domain([1, 0, 0, 0], version, &gvr);
        prop_assert_ne!(proposer, attester);
    }
}

// ECDSA properties run fewer cases: each involves key generation.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Every compact signature is canonical (`s` in the lower half).
    #[test]
    fn k256_signatures_are_canonical(message in proptest::collection::vec(any::<u8>(), 1..128)) {
        let pair = SecpKeyPair::generate();
        let compact = pair.sign_compact_sha256(&message);
        let signature = k256::ecdsa::Signature::from_slice(&compact).unwrap();
        prop_assert!(signature.normalize_s().is_none());
        prop_assert!(pair.verify_compact_sha256(&message, &compact));
    }

    /// eth1 signatures carry a valid header byte and 64-byte body.
    #[test]
    fn eth1_signatures_have_recoverable_header(message in proptest::collection::vec(any::<u8>(), 1..128)) {
        let pair = SecpKeyPair::generate();
        let prehash = eth_sign_prehash(&message);
        let encoded = pair.sign_prehash_eth1(&prehash, None).unwrap();
        prop_assert!(encoded[64] == 27 || encoded[64] == 28);
    }
}
