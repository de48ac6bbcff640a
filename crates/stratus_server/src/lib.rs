use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use stratus_core::prelude::*;
use stratus_fs::{DevManifest, FileCollector, ReverseMap};
use stratus_rules::RulesMatcher;
use tower_http::trace::TraceLayer;
use tracing::info;

mod api;

pub mod rules;
pub mod state;

use rules::{HEADERS_FILE, HeaderRule, REDIRECTS_FILE, RedirectRule, RulesConfig};
use state::DevState;

/// Files at the root of the asset directory that configure the site and are
/// never served.
pub const CONTROL_FILES: &[&str] = &[HEADERS_FILE, REDIRECTS_FILE, "_worker.js"];

/// The builder for the local dev asset server.
///
/// Files are looked up through the dev manifest and its reverse map, exactly
/// like a deployed site resolves them, so a missing or mis-encoded path fails
/// locally the same way it would in production.
#[derive(Clone, Debug)]
pub struct DevAssetServer {
    dir: PathBuf,
    redirects: Vec<(String, RedirectRule)>,
    headers: Vec<(String, HeaderRule)>,
}

impl DevAssetServer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            redirects: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Adds redirect rules. The first matching rule wins.
    pub fn redirects<I, K>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = (K, RedirectRule)>,
        K: Into<String>,
    {
        self.redirects
            .extend(rules.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }

    /// Adds header rules. Every matching rule applies, in order.
    pub fn headers<I, K>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = (K, HeaderRule)>,
        K: Into<String>,
    {
        self.headers
            .extend(rules.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }

    pub fn rules(self, config: RulesConfig) -> Self {
        self.redirects(config.redirects).headers(config.headers)
    }

    /// Walks the directory once and compiles the rules. Rules from the
    /// directory's `_redirects` and `_headers` files apply after the ones
    /// configured here. Files added later are not picked up until the router
    /// is rebuilt.
    pub async fn build(self) -> Result<Router, AssetError> {
        let mut files = FileCollector::new(Sha256Hasher)
            .collect_path_hashed(&self.dir)
            .await?;
        for name in CONTROL_FILES {
            files.remove(*name);
        }

        let from_dir = RulesConfig::from_dir(&self.dir).await?;
        let server = self.rules(from_dir);
        let state = DevState {
            manifest: DevManifest::encode(files.values().map(|file| file.hash).collect()),
            reverse_map: ReverseMap::from_files(&files),
            redirects: RulesMatcher::compile(server.redirects),
            headers: RulesMatcher::compile(server.headers),
        };
        info!(
            "Serving {} assets from {} ({} redirect rules, {} header rules)",
            state.manifest.len(),
            server.dir.display(),
            state.redirects.len(),
            state.headers.len()
        );

        Ok(Router::new()
            .fallback(api::serve_asset)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::new(state)))
    }
}

pub mod prelude {
    pub use crate::DevAssetServer;
    pub use crate::rules::*;
}
