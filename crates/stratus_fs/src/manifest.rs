use crate::collector::FileCollector;
use std::path::Path;
use stratus_core::prelude::*;
use tracing::info;

/// Builds the production manifest for `dir`.
///
/// Every regular file is included; ignore globs are an upload concern and are
/// not applied here.
pub async fn build_prod_manifest<H: HashProvider>(
    dir: &Path,
    hasher: H,
) -> Result<AssetManifest, AssetError> {
    let files = FileCollector::new(hasher).collect(dir).await?;
    info!("Built asset manifest with {} entries", files.len());
    Ok(AssetManifest::from_files(&files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::content_hash;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        fs::create_dir_all(dir.path().join("img dir/nested")).unwrap();
        fs::write(dir.path().join("img dir/nested/logo.png"), [0u8, 1, 2, 3]).unwrap();
        fs::write(dir.path().join("_headers"), "/*\n  X-Test: 1\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn one_entry_per_file_keyed_by_encoded_path() {
        let dir = fixture();
        let manifest = build_prod_manifest(dir.path(), Blake3Hasher).await.unwrap();

        let mut keys: Vec<_> = manifest.assets.keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["/_headers", "/img%20dir/nested/logo.png", "/index.html"]
        );

        let logo = manifest.get("/img%20dir/nested/logo.png").unwrap();
        assert_eq!(logo.size, 4);
        assert_eq!(
            logo.hash,
            content_hash(&Blake3Hasher, &dir.path().join("img dir/nested/logo.png")).unwrap()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn skips_symlinks() {
        let dir = fixture();
        std::os::unix::fs::symlink(
            dir.path().join("index.html"),
            dir.path().join("link.html"),
        )
        .unwrap();

        let manifest = build_prod_manifest(dir.path(), Blake3Hasher).await.unwrap();
        assert!(manifest.get("/link.html").is_none());
        assert_eq!(manifest.len(), 3);
    }

    #[tokio::test]
    async fn hash_depends_on_content_and_extension() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "same").unwrap();
        fs::write(dir.path().join("b.txt"), "same").unwrap();
        fs::write(dir.path().join("c.css"), "same").unwrap();

        let manifest = build_prod_manifest(dir.path(), Blake3Hasher).await.unwrap();
        let a = manifest.get("/a.txt").unwrap().hash;
        let b = manifest.get("/b.txt").unwrap().hash;
        let c = manifest.get("/c.css").unwrap().hash;
        assert_eq!(a, b);
        assert_ne!(a, c);

        let again = build_prod_manifest(dir.path(), Blake3Hasher).await.unwrap();
        assert_eq!(again, manifest);
    }

    #[tokio::test]
    async fn serializes_as_a_flat_object() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();

        let manifest = build_prod_manifest(dir.path(), Blake3Hasher).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&manifest.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["/a.txt"]["size"], 1);
        assert_eq!(json["/a.txt"]["hash"].as_str().unwrap().len(), 32);
    }
}
