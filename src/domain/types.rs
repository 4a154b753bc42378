//! Key and signature types shared across the service.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte digest (signing roots, genesis validators root).
pub type Hash256 = [u8; 32];

/// Consensus-layer slot number.
pub type Slot = u64;

/// Consensus-layer epoch number.
pub type Epoch = u64;

/// Signature scheme of a loaded key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "BLS")]
    Bls,
    #[serde(rename = "SECP256K1")]
    Secp256k1,
}

impl KeyType {
    /// Directory name used for proxy keystore discovery.
    pub fn dir_name(&self) -> &'static str {
        match self {
            KeyType::Bls => "BLS",
            KeyType::Secp256k1 => "SECP256K1",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Normalise a public key identifier: lowercase hex with a `0x` prefix.
///
/// Accepts any hex case and an optional `0x`/`0X` prefix on input. Registry
/// keys and every identifier exposed over the API use the normalised form.
pub fn normalise_identifier(identifier: &str) -> String {
    format!("0x{}", strip_identifier(identifier).to_lowercase())
}

/// Strip the `0x`/`0X` prefix from an identifier.
pub fn strip_identifier(identifier: &str) -> &str {
    identifier
        .strip_prefix("0x")
        .or_else(|| identifier.strip_prefix("0X"))
        .unwrap_or(identifier)
}

/// Decode a hex string (with or without `0x` prefix) into a 32-byte digest.
pub fn hash256_from_hex(hex_str: &str) -> Result<Hash256, hex::FromHexError> {
    let bytes = hex::decode(strip_identifier(hex_str))?;
    bytes
        .try_into()
        .map_err(|_| hex::FromHexError::InvalidStringLength)
}

/// Encode a 32-byte digest as lowercase `0x`-prefixed hex.
pub fn hash256_to_hex(hash: &Hash256) -> String {
    format!("0x{}", hex::encode(hash))
}

/// `uint64` fields carried as decimal strings on the wire (consensus API
/// and interchange convention).
pub mod string_u64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// 32-byte digests carried as `0x`-prefixed hex on the wire.
pub mod hex_hash256 {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{hash256_from_hex, hash256_to_hex, Hash256};

    pub fn serialize<S: Serializer>(value: &Hash256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hash256_to_hex(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hash256_from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// 4-byte fork versions carried as `0x`-prefixed hex on the wire.
pub mod hex_bytes4 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8; 4], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 4], D::Error> {
        let raw = String::deserialize(deserializer)?;
        let bytes = hex::decode(super::strip_identifier(&raw)).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 4 bytes"))
    }
}
