pub use stratus_core::*;

#[cfg(feature = "fs")]
pub mod fs {
    pub use stratus_fs::*;
}

#[cfg(feature = "rules")]
pub mod rules {
    pub use stratus_rules::*;
}

#[cfg(feature = "client")]
pub mod client {
    pub use stratus_client::*;
}

#[cfg(feature = "server")]
pub mod server {
    pub use stratus_server::*;
}

pub mod prelude {
    pub use stratus_core::prelude::*;

    #[cfg(feature = "fs")]
    pub use stratus_fs::{
        DevManifest, FileCollector, ReverseMap, build_dev_manifest, build_prod_manifest,
        build_reverse_map,
    };

    #[cfg(feature = "rules")]
    pub use stratus_rules::{RulesMatcher, replacer};

    #[cfg(feature = "client")]
    pub use stratus_client::{HttpAssetsApi, TokenSource, UploadOptions, Uploader};

    #[cfg(feature = "server")]
    pub use stratus_server::DevAssetServer;

    #[cfg(feature = "server")]
    pub use stratus_server::rules::{HeaderRule, RedirectRule, RulesConfig};
}
