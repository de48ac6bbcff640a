use crate::constants::HASH_SIZE;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// A 256-bit digest truncated to its first 128 bits.
///
/// Ordering is the lexicographic order of the raw bytes, which is the order
/// the dev manifest is sorted and binary searched in.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetHash([u8; HASH_SIZE]);

impl AssetHash {
    pub const fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Keeps the first [`HASH_SIZE`] bytes of a full digest.
    pub fn truncate(digest: &[u8; 32]) -> Self {
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(&digest[..HASH_SIZE]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for AssetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for AssetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetHash({self})")
    }
}

impl FromStr for AssetHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; HASH_SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for AssetHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AssetHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The injected 256-bit hash primitive.
pub trait HashProvider: Send + Sync + 'static + Clone {
    fn digest(&self, data: &[u8]) -> [u8; 32];

    fn hash(&self, data: &[u8]) -> AssetHash {
        AssetHash::truncate(&self.digest(data))
    }
}

/// BLAKE3, used for production content hashes.
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake3Hasher;

impl HashProvider for Blake3Hasher {
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        *blake3::hash(data).as_bytes()
    }
}

/// SHA-256, used for dev-mode path hashes.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256Hasher;

impl HashProvider for Sha256Hasher {
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_to_first_sixteen_bytes() {
        let hash = Sha256Hasher.hash(b"hello");
        // sha256("hello") = 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824
        assert_eq!(hash.to_hex(), "2cf24dba5fb0a30e26e83b2ac5b9e29e");
    }

    #[test]
    fn hex_round_trips_through_serde() {
        let hash = Blake3Hasher.hash(b"content");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let back: AssetHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn rejects_wrong_length_hex() {
        assert!("abcd".parse::<AssetHash>().is_err());
    }

    #[test]
    fn orders_by_raw_bytes() {
        let low = AssetHash::from_bytes([0x00; HASH_SIZE]);
        let mut mid_bytes = [0x00; HASH_SIZE];
        mid_bytes[HASH_SIZE - 1] = 0x01;
        let mid = AssetHash::from_bytes(mid_bytes);
        let high = AssetHash::from_bytes([0xff; HASH_SIZE]);
        assert!(low < mid && mid < high);
    }
}
