//! Walking an asset directory into a [`FileSet`].
//!
//! Both manifest builders and the upload pipeline start here. They differ in
//! two ways: the hash each file gets (content hash in production, path hash in
//! dev) and ignore globs, which only the upload path applies. Manifests are
//! built from the unfiltered walk.

use crate::encode::encode_relative_path;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{StreamExt, TryStreamExt, stream};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use stratus_core::prelude::*;
use tracing::debug;
use walkdir::WalkDir;

/// Files never uploaded as assets, regardless of caller configuration.
pub const DEFAULT_IGNORE: &[&str] = &[
    "**/_worker.js",
    "**/_redirects",
    "**/_headers",
    "**/_routes.json",
    "**/functions",
    "**/.DS_Store",
    "**/node_modules",
    "**/.git",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetLimits {
    pub max_count: usize,
    pub max_size: u64,
}

impl Default for AssetLimits {
    fn default() -> Self {
        Self {
            max_count: MAX_ASSET_COUNT,
            max_size: MAX_ASSET_SIZE,
        }
    }
}

/// Walks a directory and hashes every regular file in it.
///
/// Symlinks and directories are skipped. Construct with [`FileCollector::new`]
/// for manifest builds; [`FileCollector::ignore`] is meant for the upload path
/// only, since the deployed manifest has to see every file.
#[derive(Clone)]
pub struct FileCollector<H: HashProvider> {
    hasher: H,
    ignore: Option<Arc<GlobSet>>,
    limits: AssetLimits,
    concurrency: usize,
}

impl<H: HashProvider> FileCollector<H> {
    pub fn new(hasher: H) -> Self {
        let concurrency = std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(8);
        Self {
            hasher,
            ignore: None,
            limits: AssetLimits::default(),
            concurrency,
        }
    }

    /// Skips [`DEFAULT_IGNORE`] plus `patterns`. Matching a directory skips
    /// everything below it.
    pub fn ignore<I, S>(mut self, patterns: I) -> Result<Self, AssetError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        for pattern in DEFAULT_IGNORE.iter().copied() {
            builder.add(glob(pattern)?);
        }
        for pattern in patterns {
            builder.add(glob(pattern.as_ref())?);
        }
        let set = builder
            .build()
            .map_err(|e| AssetError::IgnorePattern(e.to_string()))?;
        self.ignore = Some(Arc::new(set));
        Ok(self)
    }

    pub fn limits(mut self, limits: AssetLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Production walk: every file gets `hash(base64(bytes) + extension)`.
    pub async fn collect(&self, dir: &Path) -> Result<FileSet, AssetError> {
        let hasher = self.hasher.clone();
        self.collect_with(dir, move |file: &Path, _served: &str| {
            content_hash(&hasher, file)
        })
        .await
    }

    /// Dev walk: every file gets [`path_hash`] of its served path, contents
    /// are never read.
    pub async fn collect_path_hashed(&self, dir: &Path) -> Result<FileSet, AssetError> {
        self.collect_with(dir, |_file: &Path, served: &str| Ok(path_hash(served)))
            .await
    }

    async fn collect_with<F>(&self, dir: &Path, hash_file: F) -> Result<FileSet, AssetError>
    where
        F: Fn(&Path, &str) -> std::io::Result<AssetHash> + Clone + Send + Sync + 'static,
    {
        let root = dir.to_path_buf();
        let ignore = self.ignore.clone();
        let limits = self.limits;
        let candidates = tokio::task::spawn_blocking(move || {
            list_candidates(&root, ignore.as_deref(), limits.max_count)
        })
        .await
        .map_err(|e| AssetError::Task(e.to_string()))??;

        let counter = Arc::new(AtomicUsize::new(0));

        stream::iter(candidates)
            .map(|candidate| {
                let counter = counter.clone();
                let hash_file = hash_file.clone();
                let directory = dir.to_path_buf();
                async move {
                    let task = tokio::task::spawn_blocking(move || {
                        inspect_file(candidate, &directory, &counter, limits, hash_file)
                    });
                    match task.await {
                        Ok(result) => result,
                        Err(e) => Err(AssetError::Task(e.to_string())),
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .try_fold(FileSet::new(), |mut files, entry| async move {
                files.insert(entry.relative_path.clone(), entry);
                Ok(files)
            })
            .await
    }
}

struct Candidate {
    absolute_path: PathBuf,
    relative_path: String,
}

fn glob(pattern: &str) -> Result<Glob, AssetError> {
    Glob::new(pattern).map_err(|e| AssetError::IgnorePattern(format!("{pattern}: {e}")))
}

/// Fails with [`AssetError::TooManyAssets`] as soon as the walk finds one file
/// more than `max_count`, before any file is read.
fn list_candidates(
    root: &Path,
    ignore: Option<&GlobSet>,
    max_count: usize,
) -> Result<Vec<Candidate>, AssetError> {
    let is_ignored = |path: &Path| {
        ignore.is_some_and(|set| {
            path.strip_prefix(root)
                .map(|relative| set.is_match(relative))
                .unwrap_or(false)
        })
    };

    let mut candidates = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            let ignored = is_ignored(entry.path());
            if ignored {
                debug!("Ignoring asset: {}", entry.path().display());
            }
            !ignored
        });

    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let file_type = entry.file_type();
        if file_type.is_symlink() || file_type.is_dir() {
            continue;
        }
        if candidates.len() == max_count {
            return Err(AssetError::TooManyAssets {
                directory: root.to_path_buf(),
                limit: max_count,
                count: max_count + 1,
            });
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        candidates.push(Candidate {
            relative_path: encode_relative_path(relative),
            absolute_path: entry.into_path(),
        });
    }
    Ok(candidates)
}

fn inspect_file<F>(
    candidate: Candidate,
    directory: &Path,
    counter: &AtomicUsize,
    limits: AssetLimits,
    hash_file: F,
) -> Result<FileEntry, AssetError>
where
    F: Fn(&Path, &str) -> std::io::Result<AssetHash>,
{
    let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
    if count > limits.max_count {
        return Err(AssetError::TooManyAssets {
            directory: directory.to_path_buf(),
            limit: limits.max_count,
            count,
        });
    }

    let size = std::fs::symlink_metadata(&candidate.absolute_path)?.len();
    if size > limits.max_size {
        return Err(AssetError::AssetTooLarge {
            path: candidate.absolute_path,
            size,
            limit: limits.max_size,
        });
    }

    let served = format!("/{}", candidate.relative_path);
    let hash = hash_file(&candidate.absolute_path, &served)?;
    let content_type = mime_guess::from_path(&candidate.absolute_path)
        .first_or_octet_stream()
        .to_string();

    Ok(FileEntry {
        relative_path: candidate.relative_path,
        absolute_path: candidate.absolute_path,
        size,
        hash,
        content_type,
    })
}

/// `hash(base64(bytes) + extension)`, extension without the leading dot.
pub fn content_hash<H: HashProvider>(hasher: &H, file: &Path) -> std::io::Result<AssetHash> {
    let bytes = std::fs::read(file)?;
    let extension = file
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut input = STANDARD.encode(bytes);
    input.push_str(&extension);
    Ok(hasher.hash(input.as_bytes()))
}

/// Dev-mode path hash of an encoded served path such as `/my%20page.html`.
pub fn path_hash(served_path: &str) -> AssetHash {
    Sha256Hasher.hash(served_path.as_bytes())
}
