//! The local-development manifest.
//!
//! Production manifests map paths to content hashes computed from file bytes.
//! Locally that would mean re-reading every file on each rebuild, so the dev
//! manifest stores the *path* hash in the content-hash slot too, and a
//! [`ReverseMap`] resolves that hash back to a file on disk at request time.
//!
//! A consequence worth knowing: editing a file without renaming it does not
//! change its dev manifest entry. Anything relying on the content-hash slot
//! for change detection will not see the edit in dev mode.

use crate::collector::FileCollector;
use crate::error::ManifestError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use stratus_core::prelude::*;
use tracing::{info, warn};

/// A dev manifest buffer: `HEADER_SIZE` header bytes followed by
/// `ENTRY_SIZE`-byte records sorted ascending by path hash.
#[derive(Clone, PartialEq, Eq)]
pub struct DevManifest {
    bytes: Vec<u8>,
}

impl std::fmt::Debug for DevManifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevManifest")
            .field("entries", &self.len())
            .finish()
    }
}

impl DevManifest {
    /// Sorts `path_hashes` and lays them out as a dev-mode buffer.
    pub fn encode(mut path_hashes: Vec<AssetHash>) -> Self {
        path_hashes.sort_unstable();

        // Two files landing on the same path hash is left unresolved: binary
        // search may return either record.
        for pair in path_hashes.windows(2) {
            if pair[0] == pair[1] {
                warn!("Path hash collision in dev manifest: {}", pair[0]);
            }
        }

        let mut bytes = vec![0u8; HEADER_SIZE + path_hashes.len() * ENTRY_SIZE];
        bytes[0] = DEV_MODE_FLAG;
        for (i, hash) in path_hashes.iter().enumerate() {
            let offset = HEADER_SIZE + i * ENTRY_SIZE;
            bytes[offset + PATH_HASH_OFFSET..offset + PATH_HASH_OFFSET + PATH_HASH_SIZE]
                .copy_from_slice(hash.as_bytes());
            bytes[offset + CONTENT_HASH_OFFSET..offset + CONTENT_HASH_OFFSET + CONTENT_HASH_SIZE]
                .copy_from_slice(hash.as_bytes());
        }
        Self { bytes }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ManifestError> {
        if bytes.len() < HEADER_SIZE || (bytes.len() - HEADER_SIZE) % ENTRY_SIZE != 0 {
            return Err(ManifestError::InvalidLength(bytes.len()));
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn is_dev_mode(&self) -> bool {
        self.bytes[0] == DEV_MODE_FLAG
    }

    pub fn len(&self) -> usize {
        (self.bytes.len() - HEADER_SIZE) / ENTRY_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn hash_at(&self, index: usize, offset: usize) -> AssetHash {
        let start = HEADER_SIZE + index * ENTRY_SIZE + offset;
        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(&self.bytes[start..start + HASH_SIZE]);
        AssetHash::from_bytes(hash)
    }

    pub fn path_hash_at(&self, index: usize) -> AssetHash {
        self.hash_at(index, PATH_HASH_OFFSET)
    }

    pub fn content_hash_at(&self, index: usize) -> AssetHash {
        self.hash_at(index, CONTENT_HASH_OFFSET)
    }

    /// Binary searches for `path_hash`, returning the entry's content hash.
    pub fn lookup(&self, path_hash: &AssetHash) -> Option<AssetHash> {
        let mut low = 0;
        let mut high = self.len();
        while low < high {
            let mid = low + (high - low) / 2;
            match self.path_hash_at(mid).cmp(path_hash) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Some(self.content_hash_at(mid)),
            }
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseMapEntry {
    pub file_path: PathBuf,
    pub content_type: String,
}

/// Dev-only lookup from path-hash hex to the file that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReverseMap {
    entries: HashMap<String, ReverseMapEntry>,
}

impl ReverseMap {
    pub fn from_files(files: &FileSet) -> Self {
        let entries = files
            .values()
            .map(|file| {
                (
                    file.hash.to_hex(),
                    ReverseMapEntry {
                        file_path: file.absolute_path.clone(),
                        content_type: file.content_type.clone(),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn resolve(&self, hash: &AssetHash) -> Option<&ReverseMapEntry> {
        self.entries.get(&hash.to_hex())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub async fn build_dev_manifest(dir: &Path) -> Result<DevManifest, AssetError> {
    let files = FileCollector::new(Sha256Hasher)
        .collect_path_hashed(dir)
        .await?;
    info!("Built dev asset manifest with {} entries", files.len());
    Ok(DevManifest::encode(
        files.values().map(|file| file.hash).collect(),
    ))
}

pub async fn build_reverse_map(dir: &Path) -> Result<ReverseMap, AssetError> {
    let files = FileCollector::new(Sha256Hasher)
        .collect_path_hashed(dir)
        .await?;
    Ok(ReverseMap::from_files(&files))
}
