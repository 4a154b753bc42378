//! Minimal SSZ merkleization: enough to compute signing roots for the
//! consensus objects this service signs, and the domain separation values
//! they are mixed with.

use crate::crypto::hash::sha256_pair;
use crate::domain::{Epoch, Hash256, Slot};

const ZERO_CHUNK: Hash256 = [0u8; 32];

/// Split a byte vector into zero-padded 32-byte chunks.
fn chunkify(data: &[u8]) -> Vec<Hash256> {
    let mut chunks = Vec::with_capacity(data.len().div_ceil(32).max(1));
    for piece in data.chunks(32) {
        let mut chunk = ZERO_CHUNK;
        chunk[..piece.len()].copy_from_slice(piece);
        chunks.push(chunk);
    }
    if chunks.is_empty() {
        chunks.push(ZERO_CHUNK);
    }
    chunks
}

/// Merkleize chunks, zero-padding to the next power of two.
pub fn merkleize(mut chunks: Vec<Hash256>) -> Hash256 {
    let width = chunks.len().next_power_of_two();
    chunks.resize(width, ZERO_CHUNK);
    while chunks.len() > 1 {
        chunks = chunks
            .chunks(2)
            .map(|pair| sha256_pair(&pair[0], &pair[1]))
            .collect();
    }
    chunks[0]
}

/// Hash tree root of a fixed-length byte vector (`Vector[byte, N]`).
pub fn hash_tree_root_bytes(data: &[u8]) -> Hash256 {
    merkleize(chunkify(data))
}

/// Hash tree root of a `uint64`.
pub fn hash_tree_root_u64(value: u64) -> Hash256 {
    let mut chunk = ZERO_CHUNK;
    chunk[..8].copy_from_slice(&value.to_le_bytes());
    chunk
}

/// `Checkpoint { epoch, root }` hash tree root.
pub fn checkpoint_root(epoch: Epoch, root: &Hash256) -> Hash256 {
    sha256_pair(&hash_tree_root_u64(epoch), root)
}

/// `AttestationData` hash tree root.
pub fn attestation_data_root(
    slot: Slot,
    index: u64,
    beacon_block_root: &Hash256,
    source: (Epoch, Hash256),
    target: (Epoch, Hash256),
) -> Hash256 {
    merkleize(vec![
        hash_tree_root_u64(slot),
        hash_tree_root_u64(index),
        *beacon_block_root,
        checkpoint_root(source.0, &source.1),
        checkpoint_root(target.0, &target.1),
    ])
}

/// `BeaconBlockHeader` hash tree root.
pub fn beacon_block_header_root(
    slot: Slot,
    proposer_index: u64,
    parent_root: &Hash256,
    state_root: &Hash256,
    body_root: &Hash256,
) -> Hash256 {
    merkleize(vec![
        hash_tree_root_u64(slot),
        hash_tree_root_u64(proposer_index),
        *parent_root,
        *state_root,
        *body_root,
    ])
}

/// `ForkData { current_version, genesis_validators_root }` hash tree root.
fn fork_data_root(fork_version: [u8; 4], genesis_validators_root: &Hash256) -> Hash256 {
    let mut version_chunk = ZERO_CHUNK;
    version_chunk[..4].copy_from_slice(&fork_version);
    sha256_pair(&version_chunk, genesis_validators_root)
}

/// `compute_domain`: domain type joined with the first 28 bytes of the fork
/// data root.
pub fn compute_domain(
    domain_type: [u8; 4],
    fork_version: [u8; 4],
    genesis_validators_root: &Hash256,
) -> Hash256 {
    let data_root = fork_data_root(fork_version, genesis_validators_root);
    let mut domain = ZERO_CHUNK;
    domain[..4].copy_from_slice(&domain_type);
    domain[4..].copy_from_slice(&data_root[..28]);
    domain
}

/// `compute_signing_root`: the object root mixed with its domain.
pub fn compute_signing_root(object_root: &Hash256, domain: &Hash256) -> Hash256 {
    sha256_pair(object_root, domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256;

    #[test]
    fn single_chunk_merkleizes_to_itself() {
        let chunk = [3u8; 32];
        assert_eq!(merkleize(vec![chunk]), chunk);
    }

    #[test]
    fn bytes48_uses_two_chunks() {
        let data = [5u8; 48];
        let mut low = [0u8; 32];
        low.copy_from_slice(&data[..32]);
        let mut high = [0u8; 32];
        high[..16].copy_from_slice(&data[32..]);
        assert_eq!(hash_tree_root_bytes(&data), sha256_pair(&low, &high));
    }

    #[test]
    fn five_field_container_pads_to_eight_chunks() {
        let root = beacon_block_header_root(1, 2, &[3u8; 32], &[4u8; 32], &[5u8; 32]);
        let manual = merkleize(vec![
            hash_tree_root_u64(1),
            hash_tree_root_u64(2),
            [3u8; 32],
            [4u8; 32],
            [5u8; 32],
            [0u8; 32],
            [0u8; 32],
            [0u8; 32],
        ]);
        assert_eq!(root, manual);
    }

    #[test]
    fn domain_starts_with_domain_type() {
        let domain = compute_domain([0x6d, 0x6d, 0x6f, 0x43], [0, 0, 0, 0], &[0u8; 32]);
        assert_eq!(&domain[..4], &[0x6d, 0x6d, 0x6f, 0x43]);
    }

    #[test]
    fn signing_root_differs_by_domain() {
        let object = sha256(b"object");
        let domain_a = compute_domain([0, 0, 0, 0], [0, 0, 0, 0], &[0u8; 32]);
        let domain_b = compute_domain([1, 0, 0, 0], [0, 0, 0, 0], &[0u8; 32]);
        assert_ne!(
            compute_signing_root(&object, &domain_a),
            compute_signing_root(&object, &domain_b)
        );
    }
}
