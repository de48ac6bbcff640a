use crate::hash::AssetHash;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// One file found while walking an asset directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the asset directory, `/`-joined, every segment
    /// percent-encoded, without a leading slash.
    pub relative_path: String,

    pub absolute_path: PathBuf,

    /// Size in bytes
    pub size: u64,

    /// Content hash on the production path, path hash on the dev path.
    pub hash: AssetHash,

    pub content_type: String,
}

impl FileEntry {
    /// The path the file is served under, e.g. `/images/a%20b.png`.
    pub fn served_path(&self) -> String {
        format!("/{}", self.relative_path)
    }
}

/// Result of one directory walk, keyed by [`FileEntry::relative_path`].
pub type FileSet = BTreeMap<String, FileEntry>;

/// The production manifest of one deployment.
/// It maps served paths ("/textures/test.png") to content identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetManifest {
    pub assets: HashMap<String, AssetInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub hash: AssetHash,

    /// Size in bytes
    pub size: u64,
}

impl AssetManifest {
    pub fn from_files(files: &FileSet) -> Self {
        let assets = files
            .values()
            .map(|file| {
                (
                    file.served_path(),
                    AssetInfo {
                        hash: file.hash,
                        size: file.size,
                    },
                )
            })
            .collect();
        Self { assets }
    }

    pub fn get(&self, served_path: &str) -> Option<&AssetInfo> {
        self.assets.get(served_path)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
