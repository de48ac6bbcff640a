//! # Stratus FileSystem
//!
//! Walks an asset directory and turns it into the artifacts a deployment
//! needs:
//!
//! * a [`FileSet`](stratus_core::manifest::FileSet) of hashed files, consumed
//!   by the upload pipeline,
//! * the production [`AssetManifest`](stratus_core::manifest::AssetManifest),
//! * the binary [`DevManifest`] plus its [`ReverseMap`] for local serving.
//!
//! ## Usage
//!
//! ```no_run
//! use stratus_core::prelude::*;
//! use stratus_fs::build_prod_manifest;
//!
//! # async fn run() -> Result<(), AssetError> {
//! let manifest = build_prod_manifest("./public".as_ref(), Blake3Hasher).await?;
//! println!("{}", manifest.len());
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod dev;
pub mod encode;
pub mod error;
pub mod manifest;

pub use collector::{AssetLimits, DEFAULT_IGNORE, FileCollector, content_hash, path_hash};
pub use dev::{DevManifest, ReverseMap, ReverseMapEntry, build_dev_manifest, build_reverse_map};
pub use error::ManifestError;
pub use manifest::build_prod_manifest;
